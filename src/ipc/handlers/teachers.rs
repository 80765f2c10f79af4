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

const TEACHER_FIELDS: [Field; 9] = [
    field("employeeId", "employee_id", FieldKind::Text),
    field("name", "name", FieldKind::Text),
    field("email", "email", FieldKind::Text),
    field("phone", "phone", FieldKind::OptText),
    field("department", "department", FieldKind::Text),
    field("qualification", "qualification", FieldKind::OptText),
    field("experience", "experience", FieldKind::OptCount),
    field("joinDate", "join_date", FieldKind::OptText),
    field("status", "status", FieldKind::Status),
];

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };
    let department = match optional_filter(req, "department") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let search = match optional_filter(req, "search") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT t.id, t.employee_id, t.name, t.email, t.phone, t.department,
                t.qualification, t.experience, t.join_date, t.status,
                (SELECT COUNT(*) FROM teacher_subjects ts WHERE ts.teacher_id = t.id)
         FROM teachers t
         WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        sql.push_str(" AND t.department = ?");
        binds.push(Value::Text(d));
    }
    if let Some(q) = search {
        let pat = like_pattern(&q);
        sql.push_str(
            " AND (lower(t.name) LIKE ? ESCAPE '\\'
                   OR lower(t.email) LIKE ? ESCAPE '\\'
                   OR lower(t.employee_id) LIKE ? ESCAPE '\\')",
        );
        binds.push(Value::Text(pat.clone()));
        binds.push(Value::Text(pat.clone()));
        binds.push(Value::Text(pat));
    }
    sql.push_str(" ORDER BY t.name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "employeeId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "email": r.get::<_, String>(3)?,
                "phone": r.get::<_, Option<String>>(4)?,
                "department": r.get::<_, String>(5)?,
                "qualification": r.get::<_, Option<String>>(6)?,
                "experience": r.get::<_, Option<i64>>(7)?,
                "joinDate": r.get::<_, Option<String>>(8)?,
                "status": r.get::<_, String>(9)?,
                "assignmentCount": r.get::<_, i64>(10)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut values = match parse_create(req, &TEACHER_FIELDS) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(Value::Text(email)) = values.get(2) {
        if !email.contains('@') {
            return err(&req.id, "bad_params", "email must contain '@'", None);
        }
    }

    let teacher_id = Uuid::new_v4().to_string();
    let ts = db::now_ts();
    values.insert(0, teacher_id.clone().into());
    values.push(ts.clone().into());
    values.push(ts.into());
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, employee_id, name, email, phone, department, qualification,
                              experience, join_date, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter(values),
    ) {
        return write_err(req, "db_insert_failed", "teachers", e);
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(email) = req.params.pointer("/patch/email").and_then(|v| v.as_str()) {
        if !email.contains('@') {
            return err(&req.id, "bad_params", "email must contain '@'", None);
        }
    }
    if let Err(e) = apply_patch(conn, req, "teachers", &teacher_id, &TEACHER_FIELDS) {
        return e;
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "teachers", &teacher_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (table, sql) in [
        ("teacher_subjects", "DELETE FROM teacher_subjects WHERE teacher_id = ?"),
        ("teachers", "DELETE FROM teachers WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&teacher_id]) {
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

fn handle_teachers_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut ids = Vec::with_capacity(3);
    for (key, table) in [
        ("teacherId", "teachers"),
        ("subjectId", "subjects"),
        ("classId", "classes"),
    ] {
        let id = match required_str(req, key) {
            Ok(v) => v,
            Err(e) => return e,
        };
        match row_exists(conn, table, &id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    format!("{} not found", key),
                    Some(json!({ "table": table })),
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
        ids.push(id);
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teacher_subjects(id, teacher_id, subject_id, class_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&assignment_id, &ids[0], &ids[1], &ids[2], db::now_ts()),
    ) {
        return write_err(req, "db_insert_failed", "teacher_subjects", e);
    }
    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_teachers_unassign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM teacher_subjects WHERE id = ?", [&assignment_id]) {
        Ok(0) => err(&req.id, "not_found", "assignment not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_teachers_assignments(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT ts.id, ts.subject_id, s.code, s.name, ts.class_id, c.name
         FROM teacher_subjects ts
         JOIN subjects s ON s.id = ts.subject_id
         JOIN classes c ON c.id = ts.class_id
         WHERE ts.teacher_id = ?
         ORDER BY c.name, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&teacher_id], |r| {
            Ok(json!({
                "assignmentId": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "subjectCode": r.get::<_, String>(2)?,
                "subjectName": r.get::<_, String>(3)?,
                "classId": r.get::<_, String>(4)?,
                "className": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        "teachers.assign" => Some(handle_teachers_assign(state, req)),
        "teachers.unassign" => Some(handle_teachers_unassign(state, req)),
        "teachers.assignments" => Some(handle_teachers_assignments(state, req)),
        _ => None,
    }
}
