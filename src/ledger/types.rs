//! Tipos de dados trocados com o endpoint JSON-RPC do ledger.
//!
//! [`MintRequest`] e [`MintReceipt`] são o contrato do núcleo; os
//! envelopes `RpcRequest`/`RpcResponse` seguem o formato JSON-RPC 2.0.

use serde::{Deserialize, Serialize};

use crate::planner::TreeParams;

/// Uma operação de escrita: mintar um item na folha `leaf_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    /// Job ao qual o item pertence.
    pub job_id: String,
    /// Posição do item na árvore.
    pub leaf_index: u64,
    /// Nome do item.
    pub name: String,
    /// Referência endereçada por conteúdo para o blob de metadados.
    pub metadata_uri: String,
    /// Dono de destino; `None` usa a carteira do minter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Parâmetros estruturais da árvore de destino.
    pub tree: TreeParams,
}

/// Recibo de um mint aceito pelo ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintReceipt {
    /// Assinatura da transação.
    pub signature: String,
    /// Taxa efetivamente cobrada, em lamports.
    pub fee_lamports: u64,
}

/// Estimativa de taxa por item retornada pelo endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub lamports: u64,
}

/// Envelope de requisição JSON-RPC 2.0.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

impl<'a, P: Serialize> RpcRequest<'a, P> {
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Envelope de resposta JSON-RPC 2.0: exatamente um de `result` ou `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// Objeto de erro JSON-RPC. `data.fee` informa taxa cobrada, quando houver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<RpcErrorData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcErrorData {
    #[serde(default)]
    pub fee: u64,
}
