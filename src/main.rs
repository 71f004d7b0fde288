use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use procshield::commands::{Cli, Commands, ConfigArgs, LogArgs, RunArgs};
use procshield::error::{Categorized, ConfigError, ErrorCategory};
use procshield::presentation::{format_row, run_console_renderer, ChannelSink};
use procshield::signal::{self, Shutdown};
use procshield::utils::config_paths::ConfigPaths;
use procshield::utils::logger::init_logger;
use procshield::{DryRunControl, GateMode, Pipeline, ShieldConfig, StaticGate};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const RENDERER_DRAIN: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run_monitor(args).await,
        Commands::CheckConfig { config, init } => check_config(config, init),
        Commands::ScanOnce {
            config,
            log,
            dry_run,
            json,
        } => scan_once(config, log, dry_run, json).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            let fatal_config = err
                .downcast_ref::<ConfigError>()
                .map(|config_err| config_err.category() == ErrorCategory::Fatal)
                .unwrap_or(false);
            if fatal_config {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<ShieldConfig, ConfigError> {
    ShieldConfig::load(args.config.as_deref())
}

fn init_logging(config: &ShieldConfig) -> Result<()> {
    init_logger(config.logging.level.as_deref(), config.logging.file.clone())
        .context("failed to initialise logging")
}

async fn run_monitor(args: RunArgs) -> Result<ExitCode> {
    let mut config = load_config(&args.config)?;
    args.apply(&mut config);
    config.validate()?;
    init_logging(&config)?;

    let (sink, events) = ChannelSink::new();
    let renderer = tokio::spawn(run_console_renderer(events));

    let mut builder = Pipeline::builder(config).sink(Arc::new(sink));
    if args.dry_run {
        builder = builder.control(Arc::new(DryRunControl));
    }
    let pipeline = builder.build()?;

    let shutdown = Shutdown::new();
    let hook = signal::install(shutdown.clone());
    let summary = pipeline.run(shutdown.clone()).await;
    shutdown.trigger();
    let _ = hook.await;

    drop(pipeline);
    let _ = tokio::time::timeout(RENDERER_DRAIN, renderer).await;

    println!(
        "{} trusted={} suspicious={} blocked={} (ticks: {})",
        "Summary:".bold(),
        summary.counters.trusted.to_string().green(),
        summary.counters.suspicious.to_string().yellow(),
        summary.counters.blocked.to_string().red(),
        summary.ticks
    );

    if summary.abandoned_alerts > 0 {
        // An unanswered terminal prompt would keep the runtime from shutting down.
        std::process::exit(0);
    }
    Ok(ExitCode::SUCCESS)
}

fn check_config(args: ConfigArgs, init: bool) -> Result<ExitCode> {
    if init {
        init_config_file()?;
    }

    let source = match &args.config {
        Some(path) => path.display().to_string(),
        None => ConfigPaths::new()
            .map(|paths| format!("{} (optional)", paths.config_file.display()))
            .unwrap_or_else(|_| "built-in defaults".to_string()),
    };

    let config = load_config(&args)?;
    config.validate()?;

    println!("{} {}", "Config OK:".green().bold(), source);
    println!("{}", config.to_toml().context("failed to render config")?);
    Ok(ExitCode::SUCCESS)
}

fn init_config_file() -> Result<()> {
    let paths = ConfigPaths::new()?;
    if paths.config_file.exists() {
        println!("{} already exists, leaving it alone", paths.config_file.display());
        return Ok(());
    }

    paths.ensure_dirs()?;
    let rendered = ShieldConfig::default()
        .to_toml()
        .context("failed to render default config")?;
    std::fs::write(&paths.config_file, rendered)
        .with_context(|| format!("failed to write {}", paths.config_file.display()))?;
    println!("{} {}", "Wrote".green(), paths.config_file.display());
    Ok(())
}

async fn scan_once(args: ConfigArgs, log: LogArgs, dry_run: bool, json: bool) -> Result<ExitCode> {
    let mut config = load_config(&args)?;
    log.apply(&mut config);
    config.gate = GateMode::Deny;
    config.validate()?;
    init_logging(&config)?;

    let mut builder = Pipeline::builder(config).gate(Arc::new(StaticGate::deny()));
    if dry_run {
        builder = builder.control(Arc::new(DryRunControl));
    }
    let pipeline = builder.build()?;
    let (report, records) = pipeline.scan_once().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("{}", format_row(&record.view()));
        }
        println!(
            "{} observed={} scored={} excluded={} without path={}",
            "Scan:".bold(),
            report.observed,
            report.queued,
            report.excluded,
            report.missing_path
        );
    }
    Ok(ExitCode::SUCCESS)
}
