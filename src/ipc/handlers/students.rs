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

const STUDENT_FIELDS: [Field; 8] = [
    field("admissionNumber", "admission_number", FieldKind::Text),
    field("firstName", "first_name", FieldKind::Text),
    field("lastName", "last_name", FieldKind::Text),
    field("classId", "class_id", FieldKind::Text),
    field("gender", "gender", FieldKind::OptText),
    field("dateOfBirth", "date_of_birth", FieldKind::OptText),
    field("guardianContact", "guardian_contact", FieldKind::OptText),
    field("status", "status", FieldKind::Status),
];

fn class_must_exist(conn: &rusqlite::Connection, req: &Request, class_id: &str) -> Result<(), serde_json::Value> {
    match row_exists(conn, "classes", class_id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(err(&req.id, "not_found", "class not found", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let class_id = match optional_filter(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match optional_filter(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let search = match optional_filter(req, "search") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT s.id, s.admission_number, s.first_name, s.last_name, s.class_id, c.name,
                s.gender, s.date_of_birth, s.guardian_contact, s.status
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = class_id {
        sql.push_str(" AND s.class_id = ?");
        binds.push(Value::Text(cid));
    }
    if let Some(st) = status {
        sql.push_str(" AND s.status = ?");
        binds.push(Value::Text(st.to_ascii_lowercase()));
    }
    if let Some(q) = search {
        let pat = like_pattern(&q);
        sql.push_str(
            " AND (lower(s.first_name || ' ' || s.last_name) LIKE ? ESCAPE '\\'
                   OR lower(s.admission_number) LIKE ? ESCAPE '\\')",
        );
        binds.push(Value::Text(pat.clone()));
        binds.push(Value::Text(pat));
    }
    sql.push_str(" ORDER BY s.last_name, s.first_name, s.admission_number");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "admissionNumber": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "classId": r.get::<_, String>(4)?,
                "className": r.get::<_, String>(5)?,
                "gender": r.get::<_, Option<String>>(6)?,
                "dateOfBirth": r.get::<_, Option<String>>(7)?,
                "guardianContact": r.get::<_, Option<String>>(8)?,
                "status": r.get::<_, String>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut values = match parse_create(req, &STUDENT_FIELDS) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = class_must_exist(conn, req, &class_id) {
        return e;
    }

    let student_id = Uuid::new_v4().to_string();
    let ts = db::now_ts();
    values.insert(0, student_id.clone().into());
    values.push(ts.clone().into());
    values.push(ts.into());
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, admission_number, first_name, last_name, class_id, gender,
                              date_of_birth, guardian_contact, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter(values),
    ) {
        return write_err(req, "db_insert_failed", "students", e);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let new_class = req
        .params
        .pointer("/patch/classId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    if let Some(cid) = &new_class {
        if let Err(e) = class_must_exist(conn, req, cid) {
            return e;
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = apply_patch(&tx, req, "students", &student_id, &STUDENT_FIELDS) {
        let _ = tx.rollback();
        return e;
    }
    // Results belong to the student's current class.
    let mut moved_results = 0;
    if let Some(cid) = &new_class {
        moved_results = match tx.execute(
            "UPDATE results SET class_id = ? WHERE student_id = ? AND class_id <> ?",
            (cid, &student_id, cid),
        ) {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "results" })),
                );
            }
        };
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    if let Some(cid) = &new_class {
        tracing::info!(student_id = %student_id, class_id = %cid, moved_results, "student moved");
    }
    ok(&req.id, json!({ "ok": true, "movedResults": moved_results }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "students", &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let removed_results = match tx.execute("DELETE FROM results WHERE student_id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "results" })),
            );
        }
    };
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    tracing::info!(student_id = %student_id, removed_results, "student deleted");
    ok(&req.id, json!({ "ok": true, "removedResults": removed_results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
