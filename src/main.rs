//! remote-sweep - Concurrent scanner and classifier for remote file stores
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use remote_sweep::config::{validate_store, CliArgs, ScanConfig};
use remote_sweep::content::{Classifier, SkinToneClassifier};
use remote_sweep::progress::{print_header, print_report, ProgressReporter};
use remote_sweep::transport::{Connector, LocalConnector};
use remote_sweep::walker::ScanCoordinator;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<()> {
    setup_logging(args.verbose)?;

    let store = args.store.clone();
    let config = ScanConfig::from_args(args).context("Invalid configuration")?;
    validate_store(&store).context("Invalid store")?;

    let connector = LocalConnector::new(store);
    if config.show_progress {
        print_header(
            &connector.endpoint(),
            &config.root,
            config.connections,
            config.threshold,
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(scan(config, connector))
}

async fn scan(config: ScanConfig, connector: LocalConnector) -> Result<()> {
    let show_progress = config.show_progress;
    let classifier: Arc<dyn Classifier> = Arc::new(SkinToneClassifier::new());
    let coordinator = ScanCoordinator::new(config, connector, classifier);

    // Setup signal handler for graceful shutdown
    let shutdown_flag = coordinator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight files...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let progress = show_progress.then(|| Arc::new(ProgressReporter::new()));
    let ticker = progress.as_ref().map(|reporter| {
        reporter.set_status("Connecting...");
        let reporter = Arc::clone(reporter);
        let handle = coordinator.progress_handle();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            loop {
                interval.tick().await;
                reporter.update(&handle.snapshot());
            }
        })
    });

    let result = coordinator.run().await;

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    let report = result.context("Scan failed")?;

    if let Some(reporter) = &progress {
        if report.completed {
            reporter.finish("Scan completed");
        } else {
            reporter.finish("Scan interrupted");
        }
    }

    print_report(&report);

    if !report.completed {
        info!("Scan was interrupted before completion");
    }
    if report.stats.error_count > 0 {
        info!(errors = report.stats.error_count, "Scan completed with errors");
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("remote_sweep=debug,warn")
    } else {
        EnvFilter::new("remote_sweep=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
