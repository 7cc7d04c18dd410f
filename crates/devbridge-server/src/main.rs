use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use devbridge_server::{start_http_server, start_ws_server, Cli, ServerState};
use tracing::info;

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&cli) {
        eprintln!("devbridge error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.load_config().context("loading configuration")?;
    info!(root = %config.project_root.display(), "starting devbridge");
    let state = Arc::new(ServerState::new(config));

    let shutdown_state = Arc::clone(&state);
    ctrlc::set_handler(move || {
        info!("interrupted, stopping processes");
        shutdown_state.registry.shutdown();
        std::process::exit(130);
    })
    .context("installing interrupt handler")?;

    let http = start_http_server(Arc::clone(&state)).context("starting http api")?;
    let ws = start_ws_server(Arc::clone(&state)).context("starting websocket bridge")?;
    info!(http = %http.listen, ws = %ws.listen, "devbridge ready");
    http.join();
    ws.join();
    state.registry.shutdown();
    Ok(())
}
