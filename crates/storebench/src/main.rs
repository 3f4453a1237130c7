//! storebench - write/read latency benchmark for origin-private storage.

// Use mimalloc for reduced allocation latency (enabled by default).
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use storebench::{
    cli::{Cli, Command},
    config::BenchmarkConfig,
    results::{ResultsPrinter, export_json, format_bytes},
    session::Session,
};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise use default based on verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    });

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .with(filter)
        .init();

    let command = cli.command();
    let json_output = cli.json.clone();
    let config = cli.into_config().context("Invalid benchmark configuration")?;

    print_banner(&config);

    std::fs::create_dir_all(&config.root)
        .with_context(|| format!("Failed to create data root {}", config.root.display()))?;

    // One cooperative main context; the sync backend gets its own thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let mut session = Session::new(config.clone()).context("Failed to start session")?;

    let unanswered = runtime.block_on(async {
        match command {
            Command::Run => {
                session.run_all().await;
            }
            Command::Write => {
                session.write_all().await;
            }
            Command::Read => {
                session.write_all().await;
                session.read_all().await;
            }
        }
        session.settle(config.worker_timeout).await
    });

    let printer = ResultsPrinter::new(config.color);
    printer.print(session.results());
    printer.print_pending_note(unanswered);

    if let Some(path) = json_output {
        export_json(session.results(), &config, &path).context("Failed to export JSON")?;
        println!("Results exported to: {}", path.display());
    }

    session.shutdown();
    Ok(())
}

fn print_banner(config: &BenchmarkConfig) {
    use owo_colors::OwoColorize;

    let workloads = format!(
        "1 x {}, {} x {}",
        format_bytes(config.single_file_bytes),
        config.file_count,
        format_bytes(config.file_bytes)
    );

    println!();
    if config.color {
        println!(
            "{}: {} ({})",
            "storebench".cyan().bold(),
            config.root.display(),
            workloads.dimmed()
        );
    } else {
        println!("storebench: {} ({workloads})", config.root.display());
    }
}
