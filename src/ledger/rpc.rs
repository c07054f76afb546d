//! JSON-RPC ledger client
//!
//! Talks JSON-RPC 2.0 over HTTP to the node fronting the certificate contract.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::{EventFilter, EventKind, LedgerClient, LedgerTxn, RawEvent, Receipt};
use crate::certificate::CertificateRecord;
use crate::error::{CertLedgerError, Result};

/// JSON-RPC error code used by EVM-style nodes for a reverted call
const EXECUTION_REVERTED: i64 = 3;

pub struct RpcLedgerClient {
    rpc_url: String,
    http_client: Client,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: String, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CertLedgerError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            rpc_url,
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("Ledger RPC {} (id {})", method, id);

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("Ledger RPC {} transport failure: {}", method, e);
                CertLedgerError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CertLedgerError::LedgerUnavailable(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let envelope: RpcResponse = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(if error.code == EXECUTION_REVERTED {
                CertLedgerError::RejectedByLedger(error.message)
            } else {
                CertLedgerError::LedgerUnavailable(format!(
                    "{} failed with code {}: {}",
                    method, error.code, error.message
                ))
            });
        }

        let result = envelope.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| {
            CertLedgerError::LedgerUnavailable(format!("Malformed {} response: {}", method, e))
        })
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn submit(&self, txn: LedgerTxn) -> Result<Receipt> {
        self.call("ledger_submit", json!([txn])).await
    }

    async fn get_record(&self, hash: &str) -> Result<Option<CertificateRecord>> {
        self.call("ledger_getRecord", json!([hash])).await
    }

    async fn query_events(&self, kind: EventKind, filter: &EventFilter) -> Result<Vec<RawEvent>> {
        self.call("ledger_queryEvents", json!([kind, filter])).await
    }

    async fn get_block_timestamp(&self, block_ordinal: u64) -> Result<Option<DateTime<Utc>>> {
        let seconds: Option<i64> = self
            .call("ledger_getBlockTimestamp", json!([block_ordinal]))
            .await?;
        Ok(seconds.and_then(|s| Utc.timestamp_opt(s, 0).single()))
    }
}
