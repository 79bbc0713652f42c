//! Interface de linha de comando do bulkmint baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (plan, mint, status,
//! resume, cancel) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// bulkmint: planejador e orquestrador de mints comprimidos em lote.
#[derive(Debug, Parser)]
#[command(name = "bulkmint", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./bulkmint.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Parâmetros da árvore aceitos por `plan` e `mint`.
#[derive(Debug, Clone, clap::Args)]
pub struct TreeArgs {
    /// Número mínimo de folhas da árvore.
    #[arg(long)]
    pub capacity: u64,

    /// Largura mínima do buffer de escritas concorrentes.
    #[arg(long)]
    pub buffer: Option<u32>,

    /// Profundidade explícita do canopy.
    #[arg(long)]
    pub canopy: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Calcula parâmetros da árvore e custo estimado sem mintar nada.
    Plan {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Cria e executa um job a partir de um arquivo JSON de registros.
    Mint {
        /// Arquivo JSON com a lista de registros (name, metadata_uri, owner).
        #[arg(long)]
        records: PathBuf,

        #[command(flatten)]
        tree: TreeArgs,

        /// Tamanho do lote, sobrescreve `[jobs].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Falhas toleradas antes de abortar o job.
        #[arg(long)]
        max_failed: Option<u64>,
    },

    /// Mostra o status de um job ou lista todos os jobs persistidos.
    Status {
        job_id: Option<String>,
    },

    /// Retoma um job pausado ou interrompido.
    Resume {
        job_id: String,
    },

    /// Cancela um job, marcando os itens restantes como pulados.
    Cancel {
        job_id: String,
    },
}
