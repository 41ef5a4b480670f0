use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

use clusterd_store::StatusStore;

use crate::config::DaemonConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{io_err, DaemonError};
use crate::pidfile::PidFile;
use crate::watcher;

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: DaemonConfig) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the daemon until a termination signal or a fatal error.
///
/// The PID file is written first and removed last, whatever the outcome.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    let pid_file = PidFile::create(&config.root).map_err(|e| e.in_subsystem("pid_file"))?;
    tracing::info!(
        pid = std::process::id(),
        root = %config.root.display(),
        role = %config.node_role,
        "clusterd starting",
    );

    let result = run_tasks(config).await;

    if let Err(err) = pid_file.remove() {
        tracing::warn!(error = %err, "could not remove pid file");
    }
    match &result {
        Ok(()) => tracing::info!("clusterd stopped"),
        Err(err) => tracing::error!(error = %err, "clusterd exiting on fatal error"),
    }
    result
}

async fn run_tasks(config: DaemonConfig) -> Result<(), DaemonError> {
    let store = StatusStore::open(&config.db_path)
        .map_err(|e| DaemonError::from(e).in_subsystem("status_store"))?;

    // Bound before the watcher exists, so its first connect finds the socket.
    let dispatcher = Dispatcher::bind(&config.socket_path, store, config.response_mode)
        .map_err(|e| e.in_subsystem("dispatcher"))?;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let dispatcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = dispatcher.run(shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let config = config.clone();
        tokio::spawn(async move {
            let result = watcher::run(config, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move { signal_task(shutdown, shutdown_rx).await })
    };

    let (dispatcher_result, watcher_result, signal_result) =
        tokio::join!(dispatcher_handle, watcher_handle, signal_handle);

    handle_join("dispatcher", dispatcher_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Wait for SIGHUP, SIGINT or SIGTERM and broadcast shutdown.
async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut hangup = signal(SignalKind::hangup()).map_err(|e| io_err("SIGHUP handler", e))?;
    let mut interrupt =
        signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT handler", e))?;
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;

    let name = tokio::select! {
        _ = shutdown_rx.recv() => return Ok(()),
        _ = hangup.recv() => "SIGHUP",
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    };
    tracing::info!(signal = name, "received signal, shutting down");
    let _ = shutdown.send(());
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner.map_err(|err| err.in_subsystem(task)),
        Err(err) => Err(DaemonError::Protocol(format!("{task} task join failure: {err}"))),
    }
}

/// Install the global subscriber. `verbosity` is the number of `-d` flags;
/// `RUST_LOG` overrides it. Later calls are no-ops.
pub fn init_tracing(verbosity: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
