mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowsmith_compiler::{compile_to, plan, validate};
use flowsmith_core::config::{dirs_home, AppConfig};
use flowsmith_core::secrets::EnvSecretResolver;
use flowsmith_core::traits::Environment;
use flowsmith_core::{Flow, OutputStream, RunEvent, TargetForm, WrittenArtifact};
use flowsmith_runner::{ConflictChecker, ProcessEnvironment, Runner};

#[derive(Parser)]
#[command(name = "flowsmith", version, about = "Compile multi-agent flows into runnable Python")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowsmith.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a flow for structural problems
    Validate {
        /// Flow file (JSON)
        flow: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate the program and its secrets module
    Compile {
        /// Flow file (JSON)
        flow: PathBuf,
        /// Emit a notebook instead of a script
        #[arg(long)]
        notebook: bool,
        /// Output directory (defaults to compiler.output_dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Compile a flow and execute it
    Run {
        /// Flow file (JSON)
        flow: PathBuf,
        #[arg(long)]
        notebook: bool,
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Skip installing the flow's requirements
        #[arg(long)]
        no_install: bool,
        /// Stop the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Install packages into the configured interpreter
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Report conflicting packages in the configured interpreter
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config,
    /// Run environment health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowsmith=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowsmith", &mut std::io::stdout());
        return Ok(());
    }

    let (config, source) = load_config(&cli.config)?;

    match cli.command {
        Commands::Validate { flow, json } => {
            let flow = Flow::load(&flow)?;
            let report = validate(&flow);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if !report.is_ok() {
                if !json {
                    eprintln!("{}", report);
                }
                anyhow::bail!(
                    "{} violation(s) in flow '{}'",
                    report.violations.len(),
                    flow.name
                );
            }
            let plan = plan(&flow)?;
            println!(
                "Flow '{}' is valid: {} chat(s), {} group(s), {} nested registration(s)",
                flow.name,
                plan.invocations.len(),
                plan.groups.len(),
                plan.nested.len()
            );
        }
        Commands::Compile { flow, notebook, out } => {
            let flow = Flow::load(&flow)?;
            let written = compile(&config, &flow, notebook, out.as_deref())?;
            println!("Wrote {}", written.path.display());
            println!("Wrote {} (keep it private)", written.secrets_path.display());
            if !written.requirements.is_empty() {
                println!("Requirements: {}", written.requirements.join(" "));
            }
        }
        Commands::Run {
            flow,
            notebook,
            out,
            no_install,
            timeout,
        } => {
            let mut config = config;
            if no_install {
                config.runner.install_requirements = false;
            }
            if timeout.is_some() {
                config.runner.timeout_secs = timeout;
            }
            let flow = Flow::load(&flow)?;
            let written = compile(&config, &flow, notebook, out.as_deref())?;
            run_artifact(&config, &written).await?;
        }
        Commands::Install { packages } => {
            let env = ProcessEnvironment::from_config(&config.runner);
            let report = env.install(packages).await?;
            println!("Installed: {}", report.installed.join(" "));
            let snapshot = env.reload().await?;
            let conflicts = ConflictChecker::with_config(&config.conflicts)?.check(&snapshot);
            for warning in &conflicts.warnings {
                eprintln!("warning: {}", warning);
            }
        }
        Commands::Check { json } => {
            let env = ProcessEnvironment::from_config(&config.runner);
            let snapshot = env.reload().await?;
            let report = ConflictChecker::with_config(&config.conflicts)?.check(&snapshot);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.is_clean() {
                println!("No conflicts among {} installed packages", snapshot.len());
            } else {
                for warning in &report.warnings {
                    println!("  [!!] {}", warning);
                }
            }
        }
        Commands::Config => {
            println!("# {}", source);
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Doctor => {
            println!("Flowsmith Doctor");
            println!("================");
            doctor::run_doctor(&config, &source).await;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Load `path`, else `~/.flowsmith/config.toml`, else defaults.
fn load_config(path: &Path) -> anyhow::Result<(AppConfig, String)> {
    if path.exists() {
        return Ok((AppConfig::load(path)?, path.display().to_string()));
    }
    if let Some(home) = dirs_home().map(|h| h.join(".flowsmith").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok((AppConfig::load(&home)?, home.display().to_string()));
        }
    }
    Ok((AppConfig::default(), "built-in defaults".to_string()))
}

fn compile(
    config: &AppConfig,
    flow: &Flow,
    notebook: bool,
    out: Option<&Path>,
) -> anyhow::Result<WrittenArtifact> {
    let form = if notebook {
        TargetForm::Notebook
    } else {
        config.compiler.target
    };
    let dir = out.map(PathBuf::from).unwrap_or_else(|| config.output_dir());
    Ok(compile_to(flow, form, &EnvSecretResolver, &config.compiler, &dir)?)
}

async fn run_artifact(config: &AppConfig, artifact: &WrittenArtifact) -> anyhow::Result<()> {
    let env = Arc::new(ProcessEnvironment::from_config(&config.runner));
    let checker = ConflictChecker::with_config(&config.conflicts)?;
    let runner = Runner::new(env, Arc::new(EnvSecretResolver), config.runner.clone())
        .with_conflict_checker(checker);
    let mut handle = runner.start(artifact);

    // Ctrl-C stops the run
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancelling run...");
            cancel.cancel();
        }
    });

    while let Some(event) = handle.events.recv().await {
        match event {
            RunEvent::Output {
                stream: OutputStream::Stdout,
                line,
            } => println!("{}", line),
            RunEvent::Output {
                stream: OutputStream::Stderr,
                line,
            } => eprintln!("{}", line),
            RunEvent::Conflict { message } => eprintln!("warning: {}", message),
            RunEvent::State(_) | RunEvent::Degraded { .. } => {}
        }
    }
    let result = handle.wait().await;

    println!(
        "Run {} after {:.1}s",
        result.state,
        result.elapsed_ms as f64 / 1000.0
    );
    if let Some(path) = &result.log_path {
        println!("Run log: {}", path.display());
    }
    match result.error {
        None => Ok(()),
        Some(error) => {
            if !result.tail.is_empty() {
                eprintln!("Last output:");
                for line in &result.tail {
                    eprintln!("  {}", line);
                }
            }
            Err(error.into())
        }
    }
}
