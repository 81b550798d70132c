// =============================================================================
// Broker Manager REST Client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All requests
// carry X-MGR-APIKEY as a header plus a signed query string so the bridge
// can reject replayed or tampered requests.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use super::{AccountDetailsRaw, BrokerApi};

type HmacSha256 = Hmac<Sha256>;

/// REST client for the broker-manager bridge.
#[derive(Clone)]
pub struct ManagerClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl ManagerClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `ManagerClient`.
    ///
    /// # Arguments
    /// * `base_url` — bridge base URL, e.g. `https://manager:8443`.
    /// * `api_key`  — manager API key (sent as a header, never in the query).
    /// * `secret`   — secret used exclusively for HMAC signing.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MGR-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url = base_url.into();
        debug!(base_url = %base_url, "ManagerClient initialised");

        Self {
            secret: secret.into(),
            base_url,
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp
    /// and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// GET a signed endpoint and parse the JSON body, bailing on non-2xx.
    async fn get_json(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("manager GET {path} returned {status}: {body}");
        }

        Ok(body)
    }
}

#[async_trait]
impl BrokerApi for ManagerClient {
    #[instrument(skip(self), name = "manager::ping")]
    async fn ping(&self) -> Result<()> {
        self.get_json("/api/v1/ping", "").await?;
        debug!("manager handshake ok");
        Ok(())
    }

    #[instrument(skip(self), name = "manager::get_account_details")]
    async fn get_account_details(&self, login_id: u64) -> Result<Option<AccountDetailsRaw>> {
        let body = self
            .get_json(&format!("/api/v1/accounts/{login_id}"), "")
            .await?;

        // The bridge reports an unknown or deleted login as a null body.
        if body.is_null() {
            return Ok(None);
        }

        let details: AccountDetailsRaw = serde_json::from_value(body)
            .with_context(|| format!("malformed account details for {login_id}"))?;
        Ok(Some(details))
    }

    #[instrument(skip(self), name = "manager::get_open_positions")]
    async fn get_open_positions(&self, login_id: u64) -> Result<Vec<serde_json::Value>> {
        let body = self
            .get_json(&format!("/api/v1/accounts/{login_id}/positions"), "")
            .await?;

        match body {
            serde_json::Value::Array(items) => Ok(items),
            serde_json::Value::Null => Ok(Vec::new()),
            other => anyhow::bail!("unexpected positions payload for {login_id}: {other}"),
        }
    }

    #[instrument(skip(self), name = "manager::get_closed_trades")]
    async fn get_closed_trades(
        &self,
        login_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>> {
        let params = format!("from={}", since.timestamp());
        let body = self
            .get_json(&format!("/api/v1/accounts/{login_id}/deals"), &params)
            .await?;

        match body {
            serde_json::Value::Array(items) => Ok(items),
            serde_json::Value::Null => Ok(Vec::new()),
            other => anyhow::bail!("unexpected deals payload for {login_id}: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = ManagerClient::new("http://localhost:8443", "key", "secret");
        let a = client.sign("from=100&timestamp=1");
        let b = client.sign("from=100&timestamp=1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_secret() {
        let a = ManagerClient::new("http://localhost:8443", "key", "secret-a").sign("x=1");
        let b = ManagerClient::new("http://localhost:8443", "key", "secret-b").sign("x=1");
        assert_ne!(a, b);
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let client = ManagerClient::new("http://localhost:8443", "key", "secret");
        let qs = client.signed_query("from=100");
        assert!(qs.starts_with("from=100&timestamp="));
        assert!(qs.contains("&signature="));
    }
}
