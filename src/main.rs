//! linelogd - A Shared Record Log over TCP
//!
//! This is the main entry point for the linelogd server.
//! It binds the listener, creates the shared log, optionally detaches from
//! the terminal, and serves until SIGINT or SIGTERM.

use anyhow::Context;
use linelogd::config::Config;
use linelogd::server::Server;
use linelogd::signal::ShutdownSignals;
use linelogd::system::daemonize;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and the optional config file
    let config = Config::load()?;

    init_tracing(&config)?;

    // Socket and log are acquired before detaching so failures reach the terminal
    let server = match Server::bind(config.clone()) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e).context("failed to start server");
        }
    };

    if config.daemon {
        info!("Detaching from terminal");
        daemonize().context("failed to daemonize")?;
    } else {
        print_banner(&config);
    }

    // The runtime is built after the fork; worker threads do not survive one
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(async move {
        let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;

        let report = server
            .run(async move {
                let signal = signals.recv().await;
                info!(?signal, "Caught signal, exiting");
            })
            .await
            .context("server shutdown failed")?;

        info!(
            connections = report.connections_served,
            records = report.records_appended,
            discarded = report.records_discarded,
            bytes_read = report.bytes_read,
            bytes_written = report.bytes_written,
            "Final statistics"
        );
        Ok::<(), anyhow::Error>(())
    })
}

/// Set up logging to stderr, or to `log_file` when one is configured
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.init(),
    }

    Ok(())
}

fn print_banner(config: &Config) {
    println!(
        r#"
linelogd v{} - Shared Record Log
──────────────────────────────────────────────────────────────
Listening on {}
Appending records to {}

Use Ctrl+C to shutdown gracefully.
"#,
        linelogd::VERSION,
        config.listen_addr(),
        config.data_file.display()
    );
}
