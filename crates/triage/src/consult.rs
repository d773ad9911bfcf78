use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::info;
use triage_daemon::{SessionError, SessionRegistry, TriageConfig};
use triage_protocol::Command;

use crate::commands::Symptom;

/// Start a session, report each symptom, fetch the diagnosis, and end the
/// session. Every reply is printed as one JSON line.
///
/// SIGINT/SIGTERM abandon the conversation; the worker is still terminated
/// before this returns.
pub async fn run(
    config: TriageConfig,
    symptoms: Vec<Symptom>,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = SessionRegistry::new(config);

    let notify = Arc::new(Notify::new());
    #[cfg(unix)]
    let _signals = triage_daemon::SignalHandler::setup(
        Arc::new(std::sync::atomic::AtomicBool::new(false)),
        Some(Arc::clone(&notify) as triage_daemon::ShutdownNotifierHandle),
    )?;

    let result = tokio::select! {
        result = converse(&registry, &symptoms) => result,
        _ = notify.notified() => {
            info!("Shutdown signal received, abandoning consultation");
            Err(SessionError::ShuttingDown)
        }
    };

    let terminated = registry.shutdown().await;
    info!(sessions = terminated, "Registry shut down");
    Ok(result?)
}

async fn converse(registry: &SessionRegistry, symptoms: &[Symptom]) -> Result<(), SessionError> {
    let (session_id, started) = registry.create_session().await?;
    info!(session_id = %session_id, symptoms = symptoms.len(), "Consultation started");
    emit(json!({ "step": "start", "session_id": session_id, "data": started }));

    for symptom in symptoms {
        let reply = registry
            .dispatch(
                &session_id,
                &Command::add_symptom(symptom.name.as_str(), symptom.certainty),
            )
            .await?;
        emit(json!({ "step": "answer", "symptom": symptom.name, "data": reply }));
    }

    let diagnosis = registry
        .dispatch(&session_id, &Command::get_diagnosis())
        .await?;
    emit(json!({ "step": "result", "data": diagnosis }));

    registry.terminate(&session_id).await;
    Ok(())
}

fn emit(value: Value) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", value);
}
