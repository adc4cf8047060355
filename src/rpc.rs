//! Thin JSON-RPC 2.0 client over reqwest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::RpcError;
use crate::metrics;

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC client bound to one endpoint.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Create a client with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Underlying HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Build a request body.
    pub fn request_body(&self, method: &str, params: Value) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    /// Perform a single call.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let body = self.request_body(method, params);
        self.send(method, &body, &[]).await
    }

    /// Send a prepared body with extra headers and decode the result.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        headers: &[(&str, String)],
    ) -> Result<T, RpcError> {
        let start = Instant::now();
        let mut request = self.http.post(&self.url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response: RpcResponse = request.send().await?.json().await?;
        metrics::record_rpc_latency(start, method);

        if let Some(err) = response.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        // A null result (e.g. an unknown receipt) reaches `T` as `Value::Null`.
        serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|e| RpcError::InvalidResponse(format!("{method}: {e}")))
    }

    /// Perform a batch of calls, returning results in request order.
    ///
    /// Per-entry errors are returned in place; a transport failure fails the
    /// whole batch.
    pub async fn batch(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        if params.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let bodies: Vec<Value> = params
            .into_iter()
            .map(|p| self.request_body(method, p))
            .collect();
        let ids: Vec<u64> = bodies
            .iter()
            .filter_map(|b| b.get("id").and_then(Value::as_u64))
            .collect();

        let responses: Vec<RpcResponse> = self
            .http
            .post(&self.url)
            .json(&bodies)
            .send()
            .await?
            .json()
            .await?;
        metrics::record_rpc_latency(start, method);
        debug!(method, count = ids.len(), "rpc batch completed");

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = responses.iter().find(|r| r.id == Some(id));
            let result = match entry {
                None => Err(RpcError::InvalidResponse(format!("{method}: missing id {id}"))),
                Some(RpcResponse { error: Some(e), .. }) => Err(RpcError::Rpc {
                    code: e.code,
                    message: e.message.clone(),
                }),
                Some(RpcResponse { result: Some(v), .. }) => Ok(v.clone()),
                Some(_) => Err(RpcError::InvalidResponse(format!("{method}: empty entry"))),
            };
            out.push(result);
        }
        Ok(out)
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Result<u128, RpcError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {value}: {e}")))
}

/// Parse `0x`-prefixed hex data.
pub fn parse_data(value: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| RpcError::InvalidResponse(format!("bad hex data: {e}")))
}

/// Format a quantity as `0x`-prefixed hex.
pub fn quantity(value: impl Into<u128>) -> String {
    format!("{:#x}", value.into())
}
