// toxhook host: replays a recorded engine trace through the router on a fixed iterate tick.

mod app;
mod config;
mod gateway;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use toxhook_core::{EventRouter, TraceReader};
use tracing_subscriber::EnvFilter;

use crate::gateway::{LoggingGateway, Presence};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: toxhook-host [--version|-V] <trace-file>";

fn main() -> anyhow::Result<()> {
    let mut trace_path = None;
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("toxhook-host {}", VERSION);
            return Ok(());
        }
        trace_path = Some(PathBuf::from(arg));
    }
    let trace_path = trace_path.context(USAGE)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    let trace = std::fs::read(&trace_path)
        .with_context(|| format!("reading trace {}", trace_path.display()))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, trace))
}

async fn run(cfg: config::Config, trace: Vec<u8>) -> anyhow::Result<()> {
    let presence = Presence::default();
    let mut router = EventRouter::new(LoggingGateway::new(presence.clone()), cfg.router.clone());
    app::install(&router, cfg.download_dir.clone(), presence)?;

    let trampoline = router.trampoline();
    let mut frames = TraceReader::new(&trace);
    // One tick never feeds more than the queue holds, since every tick drains it.
    let batch = cfg.router.event_queue_capacity.max(1);
    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.iterate_interval_ms.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    tracing::info!(bytes = trace.len(), "replaying trace");
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                tracing::info!("shutting down");
                break;
            }
            _ = ticker.tick() => {
                let mut exhausted = false;
                for _ in 0..batch {
                    match frames.next() {
                        Some(Ok(raw)) => {
                            if let Err(e) = trampoline.invoke(raw) {
                                tracing::warn!("dropped frame at byte {}: {e}", frames.offset());
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!("trace ends early: {e}");
                            exhausted = true;
                            break;
                        }
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }
                let drained = router.drain_pending();
                for e in &drained.errors {
                    tracing::warn!("{e}");
                }
                if drained.events > 0 {
                    tracing::debug!(events = drained.events, commands = drained.commands, "drained");
                }
                if exhausted {
                    tracing::info!(transfers = router.transfers().len(), "trace replayed");
                    break;
                }
            }
        }
    }
    router.stop();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
