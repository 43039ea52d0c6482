//! # lattice-cli
//!
//! Binary entry point for Lattice.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration resolution (YAML file, then environment)
//! - `lattice session`: a mediated two-role session
//! - `lattice invoke`: one provider call
//! - `lattice trace`: the primary CLI's escalation attempts
//! - `lattice kernel`: kernel lookups

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use lattice_adapters::{CliAttemptRunner, EscalationController, ProviderAdapter, ResponseClassifier};
use lattice_core::{
    EventKind, JsonlTranscript, Kernel, LatticeConfig, SessionRequest, SignalSource, TurnMediator,
    strain_score,
};
use lattice_proto::{ExecutionStrategy, InvocationRequest, Responder, Role, Session};
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn apply(self) {
        let enabled = match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        };
        colored::control::set_override(enabled);
    }
}

/// Lattice - resilient CLI driving and two-role turn mediation
#[derive(Parser, Debug)]
#[command(name = "lattice", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "lattice.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a mediated session between the two roles
    Session(SessionArgs),

    /// Send one prompt to one provider
    Invoke(InvokeArgs),

    /// Run the primary CLI's escalation chain and show every attempt
    Trace(TraceArgs),

    /// Inspect the kernel document
    Kernel(KernelArgs),
}

#[derive(Parser, Debug)]
struct SessionArgs {
    /// Task prompt for the opening proposal
    prompt: String,

    /// Modal domain for the signal lookup
    #[arg(long)]
    modal: Option<String>,

    /// Event name for the signal lookup
    #[arg(long)]
    event: Option<String>,

    /// Which side of the modal domain the event is on
    #[arg(long)]
    kind: Option<EventKind>,

    /// Turn budget, opening proposal included
    #[arg(long)]
    turns: Option<u32>,

    /// Stop once a turn's strain exceeds this
    #[arg(long)]
    threshold: Option<f64>,

    /// Kernel document (overrides session.kernel_path)
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Write a JSONL transcript of this run here
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Provider for role S1 (overrides config and S1_PROVIDER)
    #[arg(long)]
    s1: Option<String>,

    /// Provider for role S2 (overrides config and S2_PROVIDER)
    #[arg(long)]
    s2: Option<String>,

    /// Print the session as JSON instead of formatted turns
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct InvokeArgs {
    /// Prompt text
    prompt: String,

    /// Provider id (codex, gemini, mock, ...)
    #[arg(short, long, default_value = "codex")]
    provider: String,

    /// Kernel document used as priming context; empty context when absent
    #[arg(long)]
    kernel: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct TraceArgs {
    /// Prompt text, sent without priming
    prompt: String,

    /// Run only this strategy (direct, pty, pty-inject, script, script-inject)
    #[arg(long)]
    strategy: Option<ExecutionStrategy>,

    /// Per-attempt timeout in seconds (overrides primary.timeout_secs)
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the attempt log as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct KernelArgs {
    /// Kernel document (overrides session.kernel_path)
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Look up one modal domain's events, or one event's signal with --event
    #[arg(long)]
    modal: Option<String>,

    #[arg(long, requires = "modal")]
    event: Option<String>,

    #[arg(long, default_value_t = EventKind::Outputs)]
    kind: EventKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for results
    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli.color.apply();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Session(args) => session_command(config, args).await,
        Commands::Invoke(args) => invoke_command(&config, args).await,
        Commands::Trace(args) => trace_command(&config, args).await,
        Commands::Kernel(args) => kernel_command(&config, &args),
    }
}

fn load_config(path: &Path) -> Result<LatticeConfig> {
    let mut config = if path.exists() {
        LatticeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?
    } else {
        debug!("Config file {:?} not found, using defaults", path);
        LatticeConfig::default()
    };
    config.apply_env();

    for warning in config.validate() {
        warn!("{}", warning);
    }
    Ok(config)
}

fn load_kernel(config: &LatticeConfig, override_path: Option<&Path>) -> Result<Kernel> {
    let path = override_path.map_or_else(
        || PathBuf::from(&config.session.kernel_path),
        Path::to_path_buf,
    );
    Kernel::from_file(&path).with_context(|| format!("Failed to load kernel from {:?}", path))
}

async fn session_command(mut config: LatticeConfig, args: SessionArgs) -> Result<()> {
    if let Some(provider) = args.s1 {
        config.roles.role_a = provider;
    }
    if let Some(provider) = args.s2 {
        config.roles.role_b = provider;
    }

    let kernel = load_kernel(&config, args.kernel.as_deref())?;
    let defaults = &config.session;
    let request = SessionRequest {
        prompt: args.prompt,
        modal: args.modal.unwrap_or_else(|| defaults.modal.clone()),
        event: args.event.unwrap_or_else(|| defaults.event.clone()),
        event_kind: args.kind.unwrap_or(defaults.event_kind),
        turns: args.turns.unwrap_or(defaults.turns),
        strain_threshold: args.threshold.unwrap_or(defaults.strain_threshold),
    };

    let adapter = ProviderAdapter::from_config(&config);
    let mut mediator = TurnMediator::new(adapter, kernel, config.roles.clone());
    if let Some(path) = &args.transcript {
        let transcript = JsonlTranscript::create(path)
            .with_context(|| format!("Failed to create transcript at {:?}", path))?;
        info!(path = %path.display(), "Writing transcript");
        mediator = mediator.with_transcript(Box::new(transcript));
    }

    let session = mediator.run_session(&request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_session(&session, request.strain_threshold);
    }
    Ok(())
}

fn print_session(session: &Session, threshold: f64) {
    for message in &session.messages {
        let speaker = match message.speaker {
            Role::A => message.speaker.label().cyan().bold(),
            Role::B => message.speaker.label().magenta().bold(),
        };
        println!(
            "{} {} {}",
            speaker,
            format!("turn {} · {}", message.turn, message.phase).dimmed(),
            format!("strain {:.2}", message.strain).dimmed()
        );
        println!("{}\n", message.text);
    }

    if session.stopped_on_strain {
        let strain = session.last().map_or(0.0, |m| m.strain);
        println!(
            "{}",
            format!(
                "Stopped after {} turn(s): strain {:.2} exceeded {:.2}",
                session.len(),
                strain,
                threshold
            )
            .yellow()
        );
    } else {
        println!(
            "{}",
            format!("Completed {} turn(s)", session.len()).green()
        );
    }
}

async fn invoke_command(config: &LatticeConfig, args: InvokeArgs) -> Result<()> {
    let context = match &args.kernel {
        Some(path) => load_kernel(config, Some(path))?.context(),
        None => serde_json::json!({}),
    };
    let adapter = ProviderAdapter::from_config(config);
    let text = adapter.respond(&args.provider, &args.prompt, &context).await;
    println!("{text}");
    Ok(())
}

async fn trace_command(config: &LatticeConfig, args: TraceArgs) -> Result<()> {
    let primary = &config.primary;
    let controller = EscalationController::new(
        CliAttemptRunner::from_config(primary),
        ResponseClassifier::new(&primary.label).with_markers(primary.error_markers.iter().cloned()),
        primary.strategy_chain(),
        primary.label.clone(),
    );

    let timeout = args.timeout.map_or_else(|| primary.timeout(), Duration::from_secs);
    let mut request = InvocationRequest::new(args.prompt, "codex").with_timeout(timeout);
    if let Some(strategy) = args.strategy {
        request = request.with_strategy(strategy);
    }
    let escalation = controller.invoke_detailed(&request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&escalation)?);
        return Ok(());
    }

    for (index, attempt) in escalation.attempts.iter().enumerate() {
        let outcome = if attempt.outcome.is_accepted() {
            attempt.outcome.to_string().green()
        } else {
            attempt.outcome.to_string().red()
        };
        println!(
            "{}. {:<14} {:<26} exit={:<5} {:>6}ms",
            index + 1,
            attempt.strategy.to_string().bold(),
            outcome,
            attempt
                .result
                .exit_code
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
            attempt.result.elapsed.as_millis()
        );
    }
    println!("\n{}", escalation.text);
    Ok(())
}

fn kernel_command(config: &LatticeConfig, args: &KernelArgs) -> Result<()> {
    let kernel = load_kernel(config, args.kernel.as_deref())?;

    let Some(modal) = &args.modal else {
        for name in kernel.modal_names() {
            println!("{}", name.bold());
        }
        return Ok(());
    };

    let Some(event) = &args.event else {
        for name in kernel.events(modal, args.kind) {
            println!("{name}");
        }
        return Ok(());
    };

    let signal = kernel.signal(modal, event, args.kind);
    let resonance = kernel.resonance(signal);
    match signal {
        Some(value) => println!("signal     {value}"),
        None => println!("signal     {}", "absent".yellow()),
    }
    println!("resonance  {}", resonance.join(", "));
    println!("strain     {:.2}", strain_score(signal, &resonance));
    Ok(())
}
