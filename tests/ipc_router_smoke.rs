mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].is_string());
    assert!(health["workspacePath"].is_null());

    // Store-backed methods refuse to run before a workspace is selected.
    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "results.enter",
        json!({ "classId": "c", "subjectId": "s", "examType": "CAT 1", "term": "Term 1", "academicYear": "2024", "entries": [] }),
    );
    assert_eq!(error_code(&early), Some("no_workspace"));
    let listed = request_ok(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    assert_eq!(listed["classes"], json!([]));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("gradebook.sqlite3").is_file());

    let calls = [
        ("classes.list", json!({})),
        ("students.list", json!({})),
        ("subjects.list", json!({})),
        ("teachers.list", json!({})),
        ("results.list", json!({})),
        ("grading.classify", json!({ "marks": 64 })),
        ("grading.scale", json!({})),
        ("reports.classCards", json!({ "classId": "missing", "term": "Term 1", "academicYear": "2024" })),
        ("analytics.classSummary", json!({ "classId": "missing", "term": "Term 1", "academicYear": "2024" })),
        ("analytics.topPerformers", json!({ "term": "Term 1", "academicYear": "2024" })),
        ("dashboard.summary", json!({ "term": "Term 1", "academicYear": "2024" })),
        ("setup.get", json!({})),
    ];
    for (i, (method, params)) in calls.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("f{}", i), method, params.clone());
        assert_ne!(
            error_code(&resp),
            Some("not_implemented"),
            "{} was not routed",
            method
        );
    }

    let unknown = request(&mut stdin, &mut reader, "5", "gradebook.nope", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(error_code(&bad), Some("bad_json"));

    // The loop keeps serving after a malformed line.
    let _ = request_ok(&mut stdin, &mut reader, "6", "health", json!({}));

    drop(stdin);
    let status = child.wait().expect("wait for sidecar");
    assert!(status.success());
}
