//! Configuração do bulkmint carregada a partir de `bulkmint.toml`.
//!
//! A struct [`BulkmintConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `BULKMINT_RPC_URL` e `BULKMINT_API_KEY` têm
//! precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::gateway::{CallOptions, GatewayConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::state_machine::JobOptions;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "bulkmint.toml";

/// Configuração de nível superior carregada de `bulkmint.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BulkmintConfig {
    /// Endpoint JSON-RPC do ledger.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Chave de API enviada como bearer token; vazia desativa o cabeçalho.
    #[serde(default)]
    pub api_key: String,

    /// Diretório onde os jobs são persistidos.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub jobs: JobsSection,
}

/// Seção `[gateway]`: limites de concorrência, timeouts e backoff.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Máximo de chamadas remotas simultâneas, somando todos os jobs.
    pub max_in_flight: usize,
    pub timeout_ms: u64,
    /// Retentativas após a primeira tentativa.
    pub retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Passo do atraso adaptativo aplicado após rate limit.
    pub delay_step_ms: u64,
    pub max_delay_ms: u64,
    /// Sucessos consecutivos antes de reduzir o atraso.
    pub decay_after: u32,
}

impl Default for GatewaySection {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            max_in_flight: defaults.max_in_flight,
            timeout_ms: defaults.call_options.timeout.as_millis() as u64,
            retries: defaults.call_options.retries,
            base_backoff_ms: defaults.base_backoff.as_millis() as u64,
            max_backoff_ms: defaults.max_backoff.as_millis() as u64,
            delay_step_ms: defaults.delay_step.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            decay_after: defaults.decay_after,
        }
    }
}

/// Seção `[jobs]`: tamanho de lote e limites por job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    pub batch_size: usize,
    /// Submissões concorrentes dentro de um lote.
    pub batch_parallelism: usize,
    /// Falhas toleradas antes de marcar o job como `Failed`.
    pub max_failed_items: Option<u64>,
}

impl Default for JobsSection {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            batch_size: orchestrator.job_options.batch_size,
            batch_parallelism: orchestrator.batch_parallelism,
            max_failed_items: orchestrator.job_options.max_failed_items,
        }
    }
}

// Valor padrão para o endpoint: validador local.
fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}

// Valor padrão para o diretório de jobs: ".bulkmint/jobs".
fn default_store_dir() -> PathBuf {
    PathBuf::from(".bulkmint/jobs")
}

impl Default for BulkmintConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            api_key: String::new(),
            store_dir: default_store_dir(),
            gateway: GatewaySection::default(),
            jobs: JobsSection::default(),
        }
    }
}

impl BulkmintConfig {
    /// Carrega a configuração de `bulkmint.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de `path`, aplicando as variáveis de ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<BulkmintConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
        if let Ok(url) = std::env::var("BULKMINT_RPC_URL")
            && !url.is_empty()
        {
            config.rpc_url = url;
        }
        if let Ok(key) = std::env::var("BULKMINT_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    /// Chave de API, se configurada.
    pub fn api_key(&self) -> Option<String> {
        (!self.api_key.is_empty()).then(|| self.api_key.clone())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let g = &self.gateway;
        GatewayConfig {
            max_in_flight: g.max_in_flight.max(1),
            call_options: CallOptions {
                retries: g.retries,
                timeout: Duration::from_millis(g.timeout_ms),
            },
            base_backoff: Duration::from_millis(g.base_backoff_ms),
            max_backoff: Duration::from_millis(g.max_backoff_ms),
            delay_step: Duration::from_millis(g.delay_step_ms),
            max_delay: Duration::from_millis(g.max_delay_ms),
            decay_after: g.decay_after,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batch_parallelism: self.jobs.batch_parallelism.max(1),
            job_options: JobOptions {
                batch_size: self.jobs.batch_size.max(1),
                max_failed_items: self.jobs.max_failed_items,
            },
        }
    }
}
