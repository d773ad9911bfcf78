//! JSON-RPC method routing onto the session registry.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use triage_protocol::{error_codes, Command, RequestId, RpcRequest, RpcResponse};

use crate::error::SessionError;
use crate::registry::SessionRegistry;

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        debug!(id = %request.id, method = %request.method, "Dispatching request");
        match request.method.as_str() {
            "ping" => RpcResponse::success(request.id.clone(), json!({ "pong": true })),
            "health" => self.handle_health(request),
            "sessions.list" => self.handle_list(request),
            "diagnose.start" => self.handle_start(request).await,
            "diagnose.answer" => self.handle_answer(request).await,
            "diagnose.result" => self.handle_result(request).await,
            "diagnose.end" => self.handle_end(request).await,
            _ => RpcResponse::error(
                request.id.clone(),
                error_codes::METHOD_NOT_FOUND,
                &format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_health(&self, request: RpcRequest) -> RpcResponse {
        RpcResponse::success(
            request.id.clone(),
            json!({
                "status": if self.registry.is_closed() { "stopping" } else { "ok" },
                "sessions": self.registry.session_count(),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        )
    }

    fn handle_list(&self, request: RpcRequest) -> RpcResponse {
        RpcResponse::success(request.id.clone(), json!({ "sessions": self.registry.list() }))
    }

    async fn handle_start(&self, request: RpcRequest) -> RpcResponse {
        match self.registry.create_session().await {
            Ok((session_id, data)) => RpcResponse::success(
                request.id.clone(),
                json!({ "session_id": session_id, "data": data }),
            ),
            Err(err) => domain_error_response(request.id.clone(), &err),
        }
    }

    async fn handle_answer(&self, request: RpcRequest) -> RpcResponse {
        let session_id = match request.require_str("session_id") {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let symptom = match request.require_str("symptom") {
            Ok(symptom) => symptom.trim(),
            Err(resp) => return resp,
        };
        let certainty = match request.param_f64("certainty") {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            _ => {
                return RpcResponse::error(
                    request.id.clone(),
                    error_codes::INVALID_PARAMS,
                    "'certainty' must be a number between 0 and 1",
                )
            }
        };

        let command = Command::add_symptom(symptom, certainty);
        self.forward(request.id.clone(), session_id, &command).await
    }

    async fn handle_result(&self, request: RpcRequest) -> RpcResponse {
        let session_id = match request.require_str("session_id") {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        self.forward(request.id.clone(), session_id, &Command::get_diagnosis())
            .await
    }

    async fn handle_end(&self, request: RpcRequest) -> RpcResponse {
        let session_id = match request.require_str("session_id") {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let existed = self.registry.terminate(session_id).await;
        RpcResponse::success(
            request.id.clone(),
            json!({ "terminated": true, "existed": existed }),
        )
    }

    async fn forward(&self, id: RequestId, session_id: &str, command: &Command) -> RpcResponse {
        match self.registry.dispatch(session_id, command).await {
            Ok(data) => RpcResponse::success(id, json!({ "data": data })),
            Err(err) => domain_error_response(id, &err),
        }
    }
}

pub fn domain_error_response(id: RequestId, err: &SessionError) -> RpcResponse {
    RpcResponse::domain_error(id, err.code(), &err.to_string(), err.error_data())
}
