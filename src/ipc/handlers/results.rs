use crate::calc;
use crate::db;
use crate::grading::{self, GradeLabel};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, grading_config, optional_filter, required_str, row_exists, write_err,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug)]
struct EntryInput {
    student_id: String,
    marks: u8,
    grade: GradeLabel,
    remarks: Option<String>,
}

fn parse_entries(req: &Request) -> Result<Vec<EntryInput>, serde_json::Value> {
    let Some(raw) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "entries must be an array", None));
    };
    if raw.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            "enter marks for at least one student",
            None,
        ));
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();
    for (index, entry) in raw.iter().enumerate() {
        let Some(student_id) = entry
            .get("studentId")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("entries[{}].studentId is required", index),
                None,
            ));
        };
        if !seen.insert(student_id.to_string()) {
            return Err(err(
                &req.id,
                "bad_params",
                format!("duplicate entry for student {}", student_id),
                Some(json!({ "studentId": student_id, "index": index })),
            ));
        }

        let raw_marks = entry.get("marks").cloned().unwrap_or(serde_json::Value::Null);
        let marks = match grading::validate_mark(&raw_marks) {
            Ok(v) => v,
            Err(e) => {
                return Err(err(
                    &req.id,
                    "invalid_mark",
                    e.to_string(),
                    Some(json!({ "studentId": student_id, "index": index, "marks": raw_marks })),
                ))
            }
        };
        let grade = match grading::classify_mark(marks as i64) {
            Ok(g) => g,
            Err(e) => return Err(err(&req.id, "invalid_mark", e.to_string(), None)),
        };

        let remarks = match entry.get("remarks") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => match v.as_str() {
                Some(s) if s.trim().is_empty() => None,
                Some(s) => Some(s.trim().to_string()),
                None => {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        format!("entries[{}].remarks must be string or null", index),
                        None,
                    ))
                }
            },
        };

        out.push(EntryInput {
            student_id: student_id.to_string(),
            marks,
            grade,
            remarks,
        });
    }
    Ok(out)
}

fn handle_results_enter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut keys = Vec::with_capacity(5);
    for key in ["classId", "subjectId", "examType", "term", "academicYear"] {
        match required_str(req, key) {
            Ok(v) => keys.push(v),
            Err(e) => return e,
        }
    }
    let (class_id, subject_id, term, academic_year) = (&keys[0], &keys[1], &keys[3], &keys[4]);
    let cfg = match grading_config(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    // One stored spelling per exam type.
    let exam_type = &cfg.canonical_exam_type(&keys[2]);

    for (table, id, label) in [("classes", class_id, "class"), ("subjects", subject_id, "subject")] {
        match row_exists(conn, table, id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", format!("{} not found", label), None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    // Validate everything before touching the store.
    let entries = match parse_entries(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let members: HashSet<String> = match conn
        .prepare("SELECT id FROM students WHERE class_id = ?")
        .and_then(|mut stmt| {
            stmt.query_map([class_id], |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        }) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(outsider) = entries.iter().find(|e| !members.contains(&e.student_id)) {
        return err(
            &req.id,
            "bad_params",
            "student does not belong to the selected class",
            Some(json!({ "studentId": outsider.student_id })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let ts = db::now_ts();
    for e in &entries {
        if let Err(db_e) = tx.execute(
            "INSERT INTO results(id, student_id, class_id, subject_id, exam_type, term, academic_year,
                                 marks, grade, remarks, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, exam_type, term, academic_year) DO UPDATE SET
               class_id = excluded.class_id,
               exam_type = excluded.exam_type,
               marks = excluded.marks,
               grade = excluded.grade,
               remarks = excluded.remarks,
               updated_at = excluded.updated_at",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                e.student_id,
                class_id,
                subject_id,
                exam_type,
                term,
                academic_year,
                e.marks as i64,
                e.grade.as_str(),
                e.remarks,
                ts,
                ts,
            ],
        ) {
            let _ = tx.rollback();
            return write_err(req, "db_insert_failed", "results", db_e);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    let values: Vec<f64> = entries.iter().map(|e| e.marks as f64).collect();
    let class_average = calc::mean(&values).map(calc::round_off_1_decimal);
    tracing::info!(
        class_id = %class_id,
        subject_id = %subject_id,
        exam_type = %exam_type,
        saved = entries.len(),
        "results saved"
    );

    ok(
        &req.id,
        json!({
            "saved": entries.len(),
            "results": entries
                .iter()
                .map(|e| json!({
                    "studentId": e.student_id,
                    "marks": e.marks,
                    "grade": e.grade
                }))
                .collect::<Vec<_>>(),
            "classAverage": class_average
        }),
    )
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };

    let mut sql = String::from(
        "SELECT r.id, r.student_id, s.admission_number, s.first_name || ' ' || s.last_name,
                r.class_id, r.subject_id, sub.code, sub.name, r.exam_type, r.term,
                r.academic_year, r.marks, r.grade, r.remarks, r.updated_at
         FROM results r
         JOIN students s ON s.id = r.student_id
         JOIN subjects sub ON sub.id = r.subject_id
         WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    for (key, column) in [
        ("classId", "r.class_id"),
        ("studentId", "r.student_id"),
        ("subjectId", "r.subject_id"),
        ("examType", "r.exam_type"),
        ("term", "r.term"),
        ("academicYear", "r.academic_year"),
    ] {
        match optional_filter(req, key) {
            Ok(Some(v)) => {
                sql.push_str(&format!(" AND {} = ?", column));
                binds.push(Value::Text(v));
            }
            Ok(None) => {}
            Err(e) => return e,
        }
    }
    sql.push_str(" ORDER BY r.academic_year, r.term, sub.name, s.last_name, s.first_name, r.exam_type");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "admissionNumber": r.get::<_, String>(2)?,
                "studentName": r.get::<_, String>(3)?,
                "classId": r.get::<_, String>(4)?,
                "subjectId": r.get::<_, String>(5)?,
                "subjectCode": r.get::<_, String>(6)?,
                "subjectName": r.get::<_, String>(7)?,
                "examType": r.get::<_, String>(8)?,
                "term": r.get::<_, String>(9)?,
                "academicYear": r.get::<_, String>(10)?,
                "marks": r.get::<_, i64>(11)?,
                "grade": r.get::<_, String>(12)?,
                "remarks": r.get::<_, Option<String>>(13)?,
                "updatedAt": r.get::<_, String>(14)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let result_id = match required_str(req, "resultId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM results WHERE id = ?", [&result_id]) {
        Ok(0) => err(&req.id, "not_found", "result not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.enter" => Some(handle_results_enter(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        _ => None,
    }
}
