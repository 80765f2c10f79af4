use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    apply_patch, db_conn, field, like_pattern, optional_filter, parse_create, required_str,
    row_exists, write_err, Field, FieldKind,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use uuid::Uuid;

const SUBJECT_FIELDS: [Field; 5] = [
    field("code", "code", FieldKind::Text),
    field("name", "name", FieldKind::Text),
    field("department", "department", FieldKind::Text),
    field("creditHours", "credit_hours", FieldKind::OptCount),
    field("status", "status", FieldKind::Status),
];

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    let search = match optional_filter(req, "search") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT id, code, name, department, credit_hours, status,
                (SELECT COUNT(*) FROM teacher_subjects ts WHERE ts.subject_id = subjects.id)
         FROM subjects",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(q) = search {
        let pat = like_pattern(&q);
        sql.push_str(" WHERE lower(name) LIKE ? ESCAPE '\\' OR lower(code) LIKE ? ESCAPE '\\'");
        binds.push(Value::Text(pat.clone()));
        binds.push(Value::Text(pat));
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "department": r.get::<_, String>(3)?,
                "creditHours": r.get::<_, Option<i64>>(4)?,
                "status": r.get::<_, String>(5)?,
                "assignmentCount": r.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut values = match parse_create(req, &SUBJECT_FIELDS) {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Codes are matched case-sensitively by the UNIQUE index, so normalize them.
    if let Some(Value::Text(code)) = values.first_mut() {
        *code = code.to_ascii_uppercase();
    }

    let subject_id = Uuid::new_v4().to_string();
    let ts = db::now_ts();
    values.insert(0, subject_id.clone().into());
    values.push(ts.clone().into());
    values.push(ts.into());
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, code, name, department, credit_hours, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter(values),
    ) {
        return write_err(req, "db_insert_failed", "subjects", e);
    }

    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = apply_patch(conn, req, "subjects", &subject_id, &SUBJECT_FIELDS) {
        return e;
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "subjects", &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (table, sql) in [
        ("results", "DELETE FROM results WHERE subject_id = ?"),
        ("teacher_subjects", "DELETE FROM teacher_subjects WHERE subject_id = ?"),
        ("subjects", "DELETE FROM subjects WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&subject_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
