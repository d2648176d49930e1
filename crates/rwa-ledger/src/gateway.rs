//! JSON-RPC HTTP gateway to the ledger.
//!
//! Every call is a JSON-RPC 2.0 POST to a single endpoint. Ledger
//! rejections arrive as `error` objects whose `data.logs` may carry
//! diagnostic log lines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use rwa_core::{Address, Order};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{RpcError, RpcResult};
use crate::operation::{OperationRef, SignedOperation};
use crate::rpc::{BoxFuture, LedgerRpc};

/// Default timeout for read calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for send-and-confirm calls.
const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    logs: Vec<String>,
}

/// Map a decoded response to its `result` or a typed error.
fn into_result(response: RpcResponse) -> RpcResult<Value> {
    if let Some(err) = response.error {
        let logs = err.data.map(|d| d.logs).unwrap_or_default();
        debug!(code = err.code, "Ledger returned error");
        return Err(RpcError::Rejected {
            message: err.message,
            logs,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> RpcResult<T> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::Decode(format!("{method}: {e}")))
}

/// Ledger client over HTTP JSON-RPC.
pub struct JsonRpcLedger {
    client: Client,
    url: String,
    confirm_timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    /// Create a client for `url`.
    pub fn new(url: impl Into<String>) -> RpcResult<Self> {
        Self::with_timeouts(url, DEFAULT_TIMEOUT, DEFAULT_CONFIRM_TIMEOUT)
    }

    pub fn with_timeouts(
        url: impl Into<String>,
        timeout: Duration,
        confirm_timeout: Duration,
    ) -> RpcResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            confirm_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value, timeout: Option<Duration>) -> RpcResult<Value> {
        self.post(method, params, timeout, false).await
    }

    /// POST one request. With `confirming`, failures that may follow
    /// delivery of the request come back as `ConfirmationUnknown`.
    async fn post(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
        confirming: bool,
    ) -> RpcResult<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_failure(&e, confirming))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let body: RpcResponse = response.json().await.map_err(|e| {
            if confirming {
                RpcError::ConfirmationUnknown(format!("{method}: unreadable response: {e}"))
            } else {
                RpcError::Decode(format!("{method}: {e}"))
            }
        })?;
        into_result(body)
    }
}

/// Whether a failed request can have reached the ledger.
fn maybe_delivered(e: &reqwest::Error) -> bool {
    !(e.is_builder() || e.is_connect())
}

fn transport_failure(e: &reqwest::Error, confirming: bool) -> RpcError {
    classify_transport(format!("HTTP request failed: {e}"), maybe_delivered(e), confirming)
}

fn classify_transport(message: String, delivered: bool, confirming: bool) -> RpcError {
    if delivered && confirming {
        RpcError::ConfirmationUnknown(message)
    } else {
        RpcError::HttpClient(message)
    }
}

/// Decode a confirmed reference; a 2xx we cannot read is not a rejection.
fn confirmed_reference(value: Value) -> RpcResult<OperationRef> {
    decode("sendAndConfirmOperation", value).map_err(|e| match e {
        RpcError::Decode(msg) => RpcError::ConfirmationUnknown(msg),
        other => other,
    })
}

impl LedgerRpc for JsonRpcLedger {
    fn send_operation<'a>(&'a self, op: &'a SignedOperation) -> BoxFuture<'a, RpcResult<OperationRef>> {
        Box::pin(async move {
            let value = self
                .post(
                    "sendAndConfirmOperation",
                    json!([op]),
                    Some(self.confirm_timeout),
                    true,
                )
                .await?;
            confirmed_reference(value)
        })
    }

    fn account_exists<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, RpcResult<bool>> {
        Box::pin(async move {
            let value = self.call("accountExists", json!([address]), None).await?;
            decode("accountExists", value)
        })
    }

    fn token_balance<'a>(&'a self, account: &'a Address) -> BoxFuture<'a, RpcResult<Option<u64>>> {
        Box::pin(async move {
            let value = self.call("getTokenBalance", json!([account]), None).await?;
            decode("getTokenBalance", value)
        })
    }

    fn recent_operation_refs<'a>(
        &'a self,
        address: &'a Address,
        limit: usize,
    ) -> BoxFuture<'a, RpcResult<Vec<OperationRef>>> {
        Box::pin(async move {
            let value = self
                .call(
                    "getOperationRefsForAddress",
                    json!([address, { "limit": limit }]),
                    None,
                )
                .await?;
            decode("getOperationRefsForAddress", value)
        })
    }

    fn simulate_logs<'a>(&'a self, op: &'a SignedOperation) -> BoxFuture<'a, RpcResult<Vec<String>>> {
        Box::pin(async move {
            #[derive(Deserialize)]
            struct Simulation {
                #[serde(default)]
                logs: Vec<String>,
            }
            let value = self.call("simulateOperation", json!([op]), None).await?;
            decode::<Simulation>("simulateOperation", value).map(|s| s.logs)
        })
    }

    fn list_orders<'a>(&'a self, program: &'a Address) -> BoxFuture<'a, RpcResult<Vec<Order>>> {
        Box::pin(async move {
            let value = self.call("getProgramOrders", json!([program]), None).await?;
            decode("getProgramOrders", value)
        })
    }

    fn fetch_order<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, RpcResult<Option<Order>>> {
        Box::pin(async move {
            let value = self.call("getOrder", json!([address]), None).await?;
            decode("getOrder", value)
        })
    }
}
