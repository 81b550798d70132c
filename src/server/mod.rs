// =============================================================================
// Push channel — subscriber fan-out and control protocol
// =============================================================================

pub mod protocol;
pub mod ws;

pub use ws::{router, ServerState};
