use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
    let _enter = span.enter();

    let families: [fn(&mut AppState, &Request) -> Option<serde_json::Value>; 10] = [
        handlers::core::try_handle,
        handlers::classes::try_handle,
        handlers::students::try_handle,
        handlers::subjects::try_handle,
        handlers::teachers::try_handle,
        handlers::results::try_handle,
        handlers::grading::try_handle,
        handlers::reports::try_handle,
        handlers::analytics::try_handle,
        handlers::setup::try_handle,
    ];
    for handle in families {
        if let Some(resp) = handle(state, &req) {
            if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
                let code = resp
                    .pointer("/error/code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                tracing::warn!(code, "request failed");
            } else {
                tracing::debug!("request ok");
            }
            return resp;
        }
    }

    tracing::warn!("unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
