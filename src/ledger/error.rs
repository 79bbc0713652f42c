//! Tipos de erro do cliente do ledger remoto.
//!
//! Define [`LedgerError`] com variantes para rate limiting, timeouts,
//! falhas de conexão, erros do servidor e rejeições. A classificação
//! retentável/fatal usada pelo gateway vive em [`LedgerError::is_retryable`].

use thiserror::Error;

/// Erros que podem ocorrer ao falar com o endpoint do ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// O endpoint sinalizou rate limit (HTTP 429).
    /// `retry_after_ms` carrega a dica do cabeçalho `retry-after`, se houver.
    #[error("rate limited{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// A chamada excedeu o timeout.
    #[error("request timed out")]
    Timeout,

    /// Falha na camada de rede (DNS, conexão recusada, reset).
    #[error("connection failed: {0}")]
    Connection(String),

    /// Erro transitório do servidor (5xx ou nó indisponível).
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// O ledger rejeitou a operação. Não adianta retentar.
    /// `fee_charged` é a taxa cobrada mesmo assim (transação aterrissou e falhou).
    #[error("rejected: {message}")]
    Rejected { message: String, fee_charged: u64 },

    /// A resposta não pôde ser decodificada.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    retry_after_ms
        .map(|ms| format!(", retry after {ms}ms"))
        .unwrap_or_default()
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::RateLimited { .. }
                | LedgerError::Timeout
                | LedgerError::Connection(_)
                | LedgerError::Server { .. }
        )
    }

    pub fn fee_charged(&self) -> u64 {
        match self {
            LedgerError::Rejected { fee_charged, .. } => *fee_charged,
            _ => 0,
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout
        } else if err.is_decode() {
            LedgerError::Decode(err.to_string())
        } else {
            LedgerError::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = LedgerError::RateLimited {
            retry_after_ms: Some(2000),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 2000ms");
        let err = LedgerError::RateLimited {
            retry_after_ms: None,
        };
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn classification() {
        assert!(LedgerError::Timeout.is_retryable());
        assert!(LedgerError::Connection("reset".into()).is_retryable());
        assert!(
            LedgerError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(LedgerError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(
            !LedgerError::Rejected {
                message: "malformed".into(),
                fee_charged: 0
            }
            .is_retryable()
        );
        assert!(!LedgerError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LedgerError>();
    }
}
