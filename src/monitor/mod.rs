// =============================================================================
// Monitor core — account records, registry, aggregation, poll engine
// =============================================================================

pub mod account;
pub mod aggregate;
pub mod engine;
pub mod registry;
