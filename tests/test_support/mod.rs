#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value.pointer("/error/code").and_then(|v| v.as_str())
}

/// Opens a fresh workspace and seeds one class with the given students.
/// Returns `(workspace, class_id, student_ids)`.
pub fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
    students: &[(&str, &str, &str)],
) -> (PathBuf, String, Vec<String>) {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "name": "Form 2 East", "level": "Form 2", "capacity": 40 }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let mut ids = Vec::new();
    for (i, (adm, first, last)) in students.iter().enumerate() {
        let s = request_ok(
            stdin,
            reader,
            &format!("seed-student-{}", i),
            "students.create",
            json!({
                "admissionNumber": adm,
                "firstName": first,
                "lastName": last,
                "classId": class_id
            }),
        );
        ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }
    (workspace, class_id, ids)
}

pub fn create_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    code: &str,
    name: &str,
) -> String {
    let s = request_ok(
        stdin,
        reader,
        &format!("subject-{}", code),
        "subjects.create",
        json!({ "code": code, "name": name, "department": "Sciences" }),
    );
    s["subjectId"].as_str().expect("subjectId").to_string()
}

/// Enters one exam's marks for a class, `Term 1` of `2024`.
pub fn enter_marks(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    class_id: &str,
    subject_id: &str,
    exam_type: &str,
    entries: &[(&str, i64)],
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "results.enter",
        json!({
            "classId": class_id,
            "subjectId": subject_id,
            "examType": exam_type,
            "term": "Term 1",
            "academicYear": "2024",
            "entries": entries
                .iter()
                .map(|(sid, marks)| json!({ "studentId": sid, "marks": marks }))
                .collect::<Vec<_>>()
        }),
    )
}
