use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::LedgerError;
use super::types::{FeeEstimate, MintReceipt, MintRequest, RpcRequest, RpcResponse};

const MINT_METHOD: &str = "mintCompressed";
const FEE_METHOD: &str = "getMintFee";

/// JSON-RPC code the ledger uses for a temporarily unhealthy node.
const NODE_UNHEALTHY: i64 = -32005;

/// The two remote operations the minting core depends on.
pub trait LedgerClient: Send + Sync + 'static {
    /// Submit one mint. Returns the receipt or a classified failure.
    fn submit(
        &self,
        req: &MintRequest,
    ) -> impl Future<Output = Result<MintReceipt, LedgerError>> + Send;

    /// Current per-item fee in lamports.
    fn estimate_fee(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;
}

pub struct RpcLedgerClient {
    url: String,
    api_key: Option<String>,
    client: Client,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(url: String, api_key: Option<String>) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        Ok(Self {
            url,
            api_key,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc<P, T>(&self, method: &str, params: P) -> Result<T, LedgerError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&RpcRequest::new(id, method, params));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000));
            return Err(LedgerError::RateLimited { retry_after_ms });
        }

        if status.is_server_error() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LedgerError::Server {
                status: status.as_u16(),
                message,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LedgerError::Rejected {
                message: format!("status {}: {message}", status.as_u16()),
                fee_charged: 0,
            });
        }

        let body = response
            .json::<RpcResponse<T>>()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(if err.code == NODE_UNHEALTHY {
                LedgerError::Server {
                    status: status.as_u16(),
                    message: err.message,
                }
            } else {
                LedgerError::Rejected {
                    message: format!("rpc error {}: {}", err.code, err.message),
                    fee_charged: err.data.map(|d| d.fee).unwrap_or(0),
                }
            });
        }

        body.result
            .ok_or_else(|| LedgerError::Decode("response carried neither result nor error".into()))
    }
}

impl LedgerClient for RpcLedgerClient {
    async fn submit(&self, req: &MintRequest) -> Result<MintReceipt, LedgerError> {
        self.rpc(MINT_METHOD, [req]).await
    }

    async fn estimate_fee(&self) -> Result<u64, LedgerError> {
        let estimate: FeeEstimate = self.rpc(FEE_METHOD, ()).await?;
        Ok(estimate.lamports)
    }
}
