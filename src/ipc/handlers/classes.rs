use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    apply_patch, db_conn, field, parse_create, required_str, row_exists, write_err, Field, FieldKind,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

const CLASS_FIELDS: [Field; 5] = [
    field("name", "name", FieldKind::Text),
    field("level", "level", FieldKind::Text),
    field("capacity", "capacity", FieldKind::OptCount),
    field("description", "description", FieldKind::OptText),
    field("status", "status", FieldKind::Status),
];

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subquery so the count is not multiplied by joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.level,
           c.capacity,
           c.description,
           c.status,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.level, c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "level": row.get::<_, String>(2)?,
                "capacity": row.get::<_, Option<i64>>(3)?,
                "description": row.get::<_, Option<String>>(4)?,
                "status": row.get::<_, String>(5)?,
                "studentCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut values = match parse_create(req, &CLASS_FIELDS) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let class_id = Uuid::new_v4().to_string();
    let ts = db::now_ts();
    values.insert(0, class_id.clone().into());
    values.push(ts.clone().into());
    values.push(ts.into());
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, level, capacity, description, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter(values),
    ) {
        return write_err(req, "db_insert_failed", "classes", e);
    }

    tracing::info!(class_id = %class_id, "class created");
    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = apply_patch(conn, req, "classes", &class_id, &CLASS_FIELDS) {
        return e;
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "classes", &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_count > 0 {
        return err(
            &req.id,
            "conflict",
            "class still has students; move or delete them first",
            Some(json!({ "studentCount": student_count })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order (no ON DELETE CASCADE). Results entered here for
    // students who have since moved go with the student; only orphans are dropped.
    for (table, sql) in [
        (
            "results",
            "UPDATE results
             SET class_id = (SELECT s.class_id FROM students s WHERE s.id = results.student_id)
             WHERE class_id = ?1
               AND EXISTS (SELECT 1 FROM students s WHERE s.id = results.student_id)",
        ),
        ("results", "DELETE FROM results WHERE class_id = ?"),
        ("teacher_subjects", "DELETE FROM teacher_subjects WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&class_id]) {
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
    tracing::info!(class_id = %class_id, "class deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
