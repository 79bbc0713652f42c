//! Interface de terminal do bulkmint: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! a execução de um job no terminal a partir dos snapshots do accountant.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::accountant::{Eta, Progress};
use crate::planner::Plan;
use crate::state_machine::{AuditRecord, Job, JobStatus};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Formata lamports como SOL com 4 casas decimais.
pub fn format_sol(lamports: u64) -> String {
    format!("{:.4} SOL", lamports as f64 / LAMPORTS_PER_SOL)
}

fn format_eta(eta: Eta) -> String {
    match eta {
        Eta::Indeterminate => "--".to_string(),
        Eta::Done => "done".to_string(),
        Eta::Remaining(d) => {
            let secs = d.as_secs();
            format!("{}m{:02}s", secs / 60, secs % 60)
        }
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        JobStatus::Cancelled | JobStatus::Paused => Style::new().yellow(),
        JobStatus::Pending | JobStatus::Processing => Style::new().cyan(),
    }
}

/// Indicador visual de progresso para a execução de um job no terminal.
pub struct JobProgress {
    // Barra de progresso do indicatif, com tamanho igual ao total de itens.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia a barra para um job com `total` itens.
    pub fn start(job_id: &str, total: u64) -> Self {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        pb.set_style(style);
        pb.set_message(format!("job {job_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a barra a partir de um snapshot de progresso.
    pub fn update(&self, progress: &Progress) {
        self.pb.set_position(progress.processed);
        self.pb.set_message(format!(
            "{:.1}% eta {} cost {}",
            progress.percent_complete,
            format_eta(progress.eta),
            format_sol(progress.accrued_cost)
        ));
    }

    /// Exibe um aviso acima da barra sem interrompê-la.
    pub fn notice(&self, message: &str) {
        self.pb
            .println(format!("  {} {message}", self.yellow.apply_to("!")));
    }

    /// Finaliza a barra e exibe o resultado final do job.
    pub fn complete(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.status {
            JobStatus::Completed => println!(
                "  {} Job completed: {} minted, {} failed",
                self.green.apply_to("✓"),
                job.succeeded_count,
                job.failed_count
            ),
            JobStatus::Failed => println!(
                "  {} Job failed: {}",
                self.red.apply_to("✗"),
                job.last_error.as_deref().unwrap_or("unknown error")
            ),
            JobStatus::Cancelled => {
                println!("  {} Job cancelled", self.yellow.apply_to("■"))
            }
            status => println!(
                "  {} Job {status}; resume with `bulkmint resume {}`",
                self.yellow.apply_to("‖"),
                job.id
            ),
        }
    }
}

/// Imprime o plano calculado pelo planner.
pub fn print_plan(plan: &Plan) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("─── Tree Plan ───"));
    println!("  depth          {}", plan.params.depth);
    println!("  buffer width   {}", plan.params.buffer_width);
    println!("  canopy depth   {}", plan.params.canopy_depth);
    println!("  capacity       {}", plan.params.capacity());
    println!("  proof length   {}", plan.params.proof_len());
    println!("  account size   {} bytes", plan.params.account_size());
    println!("  rent           {}", format_sol(plan.rent_lamports));
    println!("  fee per item   {} lamports", plan.per_item_fee);
    println!("  estimated cost {}", format_sol(plan.estimated_cost));
}

/// Imprime uma linha resumida por job.
pub fn print_job_line(job: &Job, progress: &Progress) {
    println!(
        "{}  {:<10}  {:>6.1}%  {}/{}  {}",
        job.id,
        status_style(job.status).apply_to(job.status),
        progress.percent_complete,
        progress.processed,
        progress.total,
        format_sol(job.accrued_cost)
    );
}

/// Imprime o registro de auditoria formatado em JSON com estilo colorido.
pub fn print_audit(record: &AuditRecord) {
    println!();
    println!(
        "{}",
        status_style(record.status).apply_to("─── Audit Record ───")
    );
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}
