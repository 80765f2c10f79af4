use crate::grading::{self, GradeScale};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_grading_classify(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("marks") else {
        return err(&req.id, "bad_params", "missing marks", None);
    };
    let marks = match grading::validate_mark(raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "invalid_mark",
                e.to_string(),
                Some(json!({ "marks": raw })),
            )
        }
    };
    match grading::classify_mark(marks as i64) {
        Ok(grade) => ok(&req.id, json!({ "marks": marks, "grade": grade })),
        Err(e) => err(&req.id, "invalid_mark", e.to_string(), None),
    }
}

fn handle_grading_scale(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let scale = match req.params.get("scale") {
        None => GradeScale::Standard,
        Some(v) if v.is_null() => GradeScale::Standard,
        Some(v) => match v.as_str().and_then(GradeScale::parse) {
            Some(s) => s,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "scale must be 'standard' or 'condensed'",
                    None,
                )
            }
        },
    };
    ok(
        &req.id,
        json!({
            "scale": scale.as_str(),
            "bands": grading::scale_table(scale)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.classify" => Some(handle_grading_classify(state, req)),
        "grading.scale" => Some(handle_grading_scale(state, req)),
        _ => None,
    }
}
