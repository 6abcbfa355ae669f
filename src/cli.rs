use crate::api::{AnalysisApi, HttpApi};
use crate::model::{AnalysisForm, DashboardConfig, DashboardEvent};
use crate::orchestrator::{PollTick, SessionController};
use crate::storage::{FileStore, KvStore, MemoryStore};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "analysis-dashboard",
    version,
    about = "Terminal dashboard for the market analysis service"
)]
pub struct Cli {
    /// Base URL of the analysis service
    #[arg(
        long,
        global = true,
        env = "ANALYSIS_DASHBOARD_URL",
        default_value = "http://localhost:5000"
    )]
    pub base_url: String,

    /// How often the active session's progress is polled
    #[arg(long, global = true, default_value = "3s", value_parser = parse_poll_interval)]
    pub poll_interval: humantime::Duration,

    /// How long a notification stays on screen
    #[arg(long, global = true, default_value = "5s")]
    pub notification_ttl: humantime::Duration,

    /// Where the active session id and last form are kept between runs
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Keep client state in memory only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Log file for TUI mode (default: <data dir>/analysis-dashboard/dashboard.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Interactive dashboard (default)
    Tui,
    /// Start an analysis and follow its progress
    Analyze(AnalyzeArgs),
    /// List known sessions
    Sessions {
        #[arg(long)]
        json: bool,
    },
    /// Show one session
    Status {
        session_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Pause a running session
    Pause { session_id: String },
    /// Resume a paused session
    Resume { session_id: String },
    /// Save a session's progress on the service and locally
    Save { session_id: String },
    /// Continue a paused, failed or saved session
    Continue { session_id: String },
    /// Delete a session
    Delete {
        session_id: String,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Delete every session
    Clear {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Upload supporting files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct AnalyzeArgs {
    /// Market segment (at least 3 characters)
    #[arg(long)]
    pub segmento: String,
    /// Product or service
    #[arg(long)]
    pub produto: String,
    #[arg(long)]
    pub publico: Option<String>,
    #[arg(long)]
    pub preco: Option<String>,
    #[arg(long)]
    pub objetivo_receita: Option<String>,
    #[arg(long)]
    pub orcamento_marketing: Option<String>,
    #[arg(long)]
    pub prazo_lancamento: Option<String>,
    #[arg(long)]
    pub concorrentes: Option<String>,
    #[arg(long)]
    pub dados_adicionais: Option<String>,
    /// Free-form question for the analysis
    #[arg(long)]
    pub query: Option<String>,
    /// Print the session id and exit without waiting
    #[arg(long)]
    pub no_wait: bool,
    /// Print the final progress snapshot as JSON
    #[arg(long)]
    pub json: bool,
}

impl AnalyzeArgs {
    fn to_form(&self) -> AnalysisForm {
        let opt = |v: &Option<String>| v.clone().filter(|v| !v.trim().is_empty());
        AnalysisForm {
            segmento: self.segmento.clone(),
            produto: self.produto.clone(),
            publico: opt(&self.publico),
            preco: opt(&self.preco),
            objetivo_receita: opt(&self.objetivo_receita),
            orcamento_marketing: opt(&self.orcamento_marketing),
            prazo_lancamento: opt(&self.prazo_lancamento),
            concorrentes: opt(&self.concorrentes),
            dados_adicionais: opt(&self.dados_adicionais),
            query: opt(&self.query),
        }
    }
}

impl Cli {
    pub fn is_tui(&self) -> bool {
        matches!(self.command, None | Some(Command::Tui))
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.is_tui() {
        #[cfg(feature = "tui")]
        {
            let log_path = args
                .log_file
                .clone()
                .unwrap_or_else(|| crate::storage::state_dir().join("dashboard.log"));
            crate::logging::init_file(args.verbose, &log_path)?;
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            crate::logging::init_stderr(args.verbose)?;
            return run_text(args, Command::Sessions { json: false }).await;
        }
    }

    crate::logging::init_stderr(args.verbose)?;
    let command = args
        .command
        .clone()
        .context("no subcommand given")?;
    run_text(args, command).await
}

/// Build a `DashboardConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> DashboardConfig {
    DashboardConfig {
        base_url: args.base_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        notification_ttl: Duration::from(args.notification_ttl),
        user_agent: format!("analysis-dashboard/{}", env!("CARGO_PKG_VERSION")),
    }
}

pub fn open_store(args: &Cli) -> Box<dyn KvStore> {
    if args.ephemeral {
        return Box::new(MemoryStore::new());
    }
    let path = args.state_file.clone().unwrap_or_else(FileStore::default_path);
    tracing::debug!(path = %path.display(), "using state file");
    Box::new(FileStore::open(path))
}

/// How destructive commands get the go-ahead.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Confirmation {
    /// Ask on the terminal.
    Prompt,
    /// Answer given up front (`--yes`).
    Answer(bool),
}

impl Confirmation {
    async fn ask(self, prompt: String) -> Result<bool> {
        match self {
            Self::Prompt => confirm(prompt).await,
            Self::Answer(answer) => Ok(answer),
        }
    }
}

/// Controller plus the channels text mode reads directly.
pub(crate) struct Wiring {
    pub ctrl: SessionController,
    pub ticks: mpsc::Receiver<PollTick>,
    pub events: mpsc::UnboundedReceiver<DashboardEvent>,
    pub confirm: Confirmation,
}

impl Wiring {
    fn new(cfg: &DashboardConfig, api: Arc<dyn AnalysisApi>, store: Box<dyn KvStore>) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (ctrl, inbox) = SessionController::new(cfg, api, store, event_tx);
        Self {
            ctrl,
            ticks: inbox.ticks,
            events,
            confirm: Confirmation::Prompt,
        }
    }

    fn gate(&self, yes: bool) -> Confirmation {
        if yes {
            Confirmation::Answer(true)
        } else {
            self.confirm
        }
    }
}

pub(crate) fn build_controller(args: &Cli) -> Result<Wiring> {
    let cfg = build_config(args);
    let api: Arc<dyn AnalysisApi> = Arc::new(HttpApi::new(&cfg)?);
    Ok(Wiring::new(&cfg, api, open_store(args)))
}

/// Forward queued controller events to the writer. Only notifications and
/// progress are of interest in text mode.
fn forward_events(
    events: &mut mpsc::UnboundedReceiver<DashboardEvent>,
    out: &mpsc::UnboundedSender<OutputLine>,
) {
    while let Ok(ev) = events.try_recv() {
        match ev {
            DashboardEvent::Notified(n) => {
                let _ = out.send(OutputLine::Stderr(crate::text_summary::notification_line(&n)));
            }
            DashboardEvent::Progress(snap) => {
                let _ = out.send(OutputLine::Stderr(crate::text_summary::progress_line(&snap)));
            }
            _ => {}
        }
    }
}

async fn run_text(args: Cli, command: Command) -> Result<()> {
    let mut w = build_controller(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();

    let res = run_command(&mut w, command, &out_tx).await;

    w.ctrl.dispose();
    forward_events(&mut w.events, &out_tx);
    drop(out_tx);
    let _ = out_handle.await;
    res
}

async fn run_command(
    w: &mut Wiring,
    command: Command,
    out: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    match command {
        Command::Tui => Ok(()),
        Command::Analyze(a) => run_analyze(w, &a, out).await,
        Command::Sessions { json } => {
            if !w.ctrl.refresh_sessions().await {
                anyhow::bail!("could not load sessions");
            }
            let sessions = w.ctrl.sessions();
            if json {
                let _ = out.send(OutputLine::Stdout(serde_json::to_string_pretty(&sessions)?));
            } else {
                for line in crate::text_summary::build_session_list(&sessions).lines {
                    let _ = out.send(OutputLine::Stdout(line));
                }
            }
            Ok(())
        }
        Command::Status { session_id, json } => {
            let session = w
                .ctrl
                .show_detail(&session_id)
                .await
                .with_context(|| format!("could not load session {session_id}"))?;
            if json {
                let _ = out.send(OutputLine::Stdout(serde_json::to_string_pretty(&session)?));
            } else {
                for line in crate::text_summary::build_session_detail(&session).lines {
                    let _ = out.send(OutputLine::Stdout(line));
                }
            }
            Ok(())
        }
        Command::Pause { session_id } => {
            ensure(w.ctrl.pause(&session_id).await, "pause", &session_id)
        }
        Command::Resume { session_id } => {
            ensure(w.ctrl.resume(&session_id).await, "resume", &session_id)
        }
        Command::Save { session_id } => ensure(w.ctrl.save(&session_id).await, "save", &session_id),
        Command::Continue { session_id } => {
            // Continue is gated on the cached status.
            w.ctrl.refresh_sessions().await;
            ensure(
                w.ctrl.continue_session(&session_id).await,
                "continue",
                &session_id,
            )
        }
        Command::Delete { session_id, yes } => {
            if !w.gate(yes).ask(format!("Delete session {session_id}?")).await? {
                let _ = out.send(OutputLine::Stderr("Cancelled".into()));
                return Ok(());
            }
            ensure(
                w.ctrl.delete_session(&session_id).await,
                "delete",
                &session_id,
            )
        }
        Command::Clear { yes } => {
            if !w.gate(yes).ask("Delete ALL sessions?".to_string()).await? {
                let _ = out.send(OutputLine::Stderr("Cancelled".into()));
                return Ok(());
            }
            if !w.ctrl.clear_all().await {
                anyhow::bail!("could not clear sessions");
            }
            Ok(())
        }
        Command::Upload { files } => {
            let uploaded = w.ctrl.upload_files(&files).await;
            forward_events(&mut w.events, out);
            if uploaded < files.len() {
                anyhow::bail!("{} of {} files were not uploaded", files.len() - uploaded, files.len());
            }
            Ok(())
        }
    }
}

fn parse_poll_interval(raw: &str) -> Result<humantime::Duration, String> {
    let d: humantime::Duration = raw.parse().map_err(|e| format!("{e}"))?;
    if d.is_zero() {
        return Err("poll interval must be greater than zero".into());
    }
    Ok(d)
}

fn ensure(ok: bool, action: &str, session_id: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        anyhow::bail!("could not {action} session {session_id}")
    }
}

/// Ask on stderr, read one line from stdin. Anything but y/yes declines.
async fn confirm(prompt: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || -> Result<bool> {
        eprint!("{prompt} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .context("read confirmation")?;
        Ok(is_yes(&answer))
    })
    .await
    .context("confirmation prompt failed")?
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn run_analyze(
    w: &mut Wiring,
    a: &AnalyzeArgs,
    out: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let started = tokio::select! {
        ok = w.ctrl.start_analysis(a.to_form()) => ok,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("interrupted before the service accepted the analysis");
        }
    };
    if !started {
        forward_events(&mut w.events, out);
        anyhow::bail!("analysis was not started");
    }
    let session_id = w
        .ctrl
        .active_session()
        .context("no active session after start")?
        .to_string();
    forward_events(&mut w.events, out);

    if a.no_wait {
        let _ = out.send(OutputLine::Stdout(session_id));
        return Ok(());
    }

    loop {
        tokio::select! {
            tick = w.ticks.recv() => {
                let Some(tick) = tick else { break };
                w.ctrl.on_poll_tick(tick).await;
                forward_events(&mut w.events, out);
                if !w.ctrl.is_polling() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = out.send(OutputLine::Stderr(format!(
                    "Stopped following {session_id}; it keeps running on the service"
                )));
                return Ok(());
            }
        }
    }

    let completed = w.ctrl.progress().map(|p| p.completed).unwrap_or(false);
    if a.json {
        if let Some(snap) = w.ctrl.progress() {
            let _ = out.send(OutputLine::Stdout(serde_json::to_string_pretty(snap)?));
        }
    } else {
        let _ = out.send(OutputLine::Stdout(session_id.clone()));
    }
    if !completed {
        anyhow::bail!("analysis {session_id} did not complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["analysis-dashboard"]).unwrap();
        assert!(cli.is_tui());
        let cfg = build_config(&cli);
        assert_eq!(cfg.poll_interval, Duration::from_secs(3));
        assert_eq!(cfg.notification_ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_analyze_args_build_form() {
        let cli = Cli::try_parse_from([
            "analysis-dashboard",
            "analyze",
            "--segmento",
            "Moda",
            "--produto",
            "Tênis",
            "--preco",
            "199",
            "--publico",
            " ",
            "--poll-interval",
            "500ms",
        ])
        .unwrap();
        assert!(!cli.is_tui());
        assert_eq!(build_config(&cli).poll_interval, Duration::from_millis(500));
        let Some(Command::Analyze(a)) = cli.command else {
            panic!("expected analyze");
        };
        let form = a.to_form();
        assert_eq!(form.segmento, "Moda");
        assert_eq!(form.preco.as_deref(), Some("199"));
        assert_eq!(form.publico, None);
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err = Cli::try_parse_from(["analysis-dashboard", "--poll-interval", "0s", "sessions"])
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"), "{err}");
        assert!(Cli::try_parse_from(["analysis-dashboard", "--poll-interval", "soon"]).is_err());
    }

    #[test]
    fn test_upload_needs_files() {
        assert!(Cli::try_parse_from(["analysis-dashboard", "upload"]).is_err());
    }

    fn fake_wiring(api: Arc<FakeApi>, confirm: Confirmation) -> Wiring {
        let cli = Cli::try_parse_from(["analysis-dashboard"]).unwrap();
        let mut w = Wiring::new(&build_config(&cli), api, Box::new(MemoryStore::new()));
        w.confirm = confirm;
        w
    }

    fn cancelled(lines: &mut mpsc::UnboundedReceiver<OutputLine>) -> usize {
        let mut n = 0;
        while let Ok(line) = lines.try_recv() {
            if matches!(line, OutputLine::Stderr(ref l) if l == "Cancelled") {
                n += 1;
            }
        }
        n
    }

    #[tokio::test]
    async fn test_declined_delete_and_clear_send_nothing() {
        let api = Arc::new(FakeApi::new());
        let mut w = fake_wiring(api.clone(), Confirmation::Answer(false));
        let (out, mut lines) = mpsc::unbounded_channel();

        let delete = Command::Delete {
            session_id: "s1".into(),
            yes: false,
        };
        run_command(&mut w, delete, &out).await.unwrap();
        run_command(&mut w, Command::Clear { yes: false }, &out).await.unwrap();

        assert!(api.calls().is_empty());
        assert_eq!(cancelled(&mut lines), 2);
    }

    #[tokio::test]
    async fn test_yes_skips_the_question() {
        let api = Arc::new(FakeApi::new());
        let mut w = fake_wiring(api.clone(), Confirmation::Answer(false));
        let (out, _lines) = mpsc::unbounded_channel();

        let delete = Command::Delete {
            session_id: "s1".into(),
            yes: true,
        };
        run_command(&mut w, delete, &out).await.unwrap();
        assert_eq!(api.calls(), vec!["DELETE /api/sessions/s1".to_string()]);
    }

    #[test]
    fn test_confirmation_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }
}
