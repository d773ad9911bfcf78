//! JSON-RPC over stdio: one request per stdin line, one response per stdout
//! line, handled concurrently.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use triage_daemon::{DaemonError, Dispatcher, SessionRegistry, TriageConfig};
use triage_protocol::{error_codes, RequestId, RpcRequest, RpcResponse};

/// Bound on waiting for in-flight requests once input has ended.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

enum Stop {
    EndOfInput,
    Signal,
}

pub async fn run(config: TriageConfig) -> Result<(), DaemonError> {
    let registry = SessionRegistry::start(config);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));

    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());
    #[cfg(unix)]
    let _signals = triage_daemon::SignalHandler::setup(
        Arc::clone(&shutdown),
        Some(Arc::clone(&notify) as triage_daemon::ShutdownNotifierHandle),
    )?;

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_responses(out_rx));

    info!(pid = std::process::id(), "Serving JSON-RPC on stdio");
    let mut tasks = JoinSet::new();
    let outcome = read_requests(&dispatcher, &out_tx, &notify, &mut tasks).await;

    if matches!(outcome, Ok(Stop::EndOfInput)) {
        debug!(in_flight = tasks.len(), "Input closed, finishing in-flight requests");
        if tokio::time::timeout(DRAIN_TIMEOUT, drain(&mut tasks))
            .await
            .is_err()
        {
            warn!("In-flight requests did not finish in time");
        }
    }

    let terminated = registry.shutdown().await;
    info!(sessions = terminated, "Registry shut down");

    tasks.abort_all();
    drain(&mut tasks).await;
    drop(out_tx);
    let written = writer
        .await
        .map_err(|e| DaemonError::Output(e.to_string()))?;

    outcome?;
    written
}

async fn read_requests(
    dispatcher: &Arc<Dispatcher>,
    out_tx: &mpsc::UnboundedSender<String>,
    notify: &Notify,
    tasks: &mut JoinSet<()>,
) -> Result<Stop, DaemonError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = notify.notified() => {
                info!("Shutdown signal received");
                return Ok(Stop::Signal);
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RpcRequest>(&line) {
                        Ok(request) => {
                            let dispatcher = Arc::clone(dispatcher);
                            let out_tx = out_tx.clone();
                            tasks.spawn(async move {
                                let response = dispatcher.handle(request).await;
                                send_response(&out_tx, &response);
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "Rejecting unparseable request");
                            let response = RpcResponse::error(
                                RequestId::Null,
                                error_codes::PARSE_ERROR,
                                &format!("Parse error: {}", err),
                            );
                            send_response(out_tx, &response);
                        }
                    }
                }
                Ok(None) => return Ok(Stop::EndOfInput),
                Err(err) => return Err(DaemonError::Input(err.to_string())),
            },
        }
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

fn send_response(out_tx: &mpsc::UnboundedSender<String>, response: &RpcResponse) {
    match serde_json::to_string(response) {
        Ok(json) => {
            if out_tx.send(json).is_err() {
                warn!(id = %response.id(), "Response writer closed, dropping response");
            }
        }
        Err(err) => warn!(id = %response.id(), error = %err, "Failed to serialize response"),
    }
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<String>) -> Result<(), DaemonError> {
    let mut stdout = tokio::io::stdout();
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| DaemonError::Output(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| DaemonError::Output(e.to_string()))?;
    }
    Ok(())
}
