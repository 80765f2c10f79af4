mod test_support;

use serde_json::json;
use test_support::{
    create_subject, error_code, request, request_ok, seed_class, spawn_sidecar,
};

#[test]
fn setup_defaults_persist_and_validate() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (workspace, class_id, ids) = seed_class(
        &mut stdin,
        &mut reader,
        "gradebook-setup",
        &[("ADM001", "Amina", "Otieno")],
    );

    let defaults = request_ok(&mut stdin, &mut reader, "g0", "setup.get", json!({}));
    assert_eq!(defaults["school"]["academicYear"], json!("2024"));
    assert_eq!(defaults["school"]["currentTerm"], json!("Term 1"));
    assert_eq!(defaults["grading"]["passThreshold"], json!(50));
    assert_eq!(defaults["grading"]["overallScale"], json!("standard"));
    assert_eq!(
        defaults["grading"]["examTypes"],
        json!(["CAT 1", "CAT 2", "Midterm", "End Term"])
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "setup.update",
        json!({
            "section": "grading",
            "patch": { "examTypes": ["End Term", "CAT 1"], "passThreshold": 45 }
        }),
    );
    assert_eq!(updated["settings"]["passThreshold"], json!(45));

    for (i, (section, patch)) in [
        ("grading", json!({ "passThreshold": 150 })),
        ("grading", json!({ "overallScale": "eight-step" })),
        ("grading", json!({ "examTypes": [] })),
        ("grading", json!({ "gradingSystem": "letter" })),
        ("school", json!({ "academicYear": "" })),
        ("planner", json!({})),
    ]
    .iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "setup.update",
            json!({ "section": section, "patch": patch }),
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "{} {}", section, patch);
    }

    // Components on a report card follow the configured exam order.
    let math = create_subject(&mut stdin, &mut reader, "MATH", "Mathematics");
    for (i, exam) in ["CAT 1", "End Term"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("enter-{}", i),
            "results.enter",
            json!({
                "classId": class_id,
                "subjectId": math,
                "examType": exam,
                "term": "Term 1",
                "academicYear": "2024",
                "entries": [{ "studentId": ids[0], "marks": 60 + i as i64 * 10 }]
            }),
        );
    }
    let card = request_ok(
        &mut stdin,
        &mut reader,
        "card",
        "reports.studentCard",
        json!({ "studentId": ids[0], "term": "Term 1", "academicYear": "2024" }),
    );
    let order: Vec<&str> = card["subjects"][0]["components"]
        .as_array()
        .expect("components")
        .iter()
        .map(|c| c["examType"].as_str().expect("examType"))
        .collect();
    assert_eq!(order, vec!["End Term", "CAT 1"]);
    assert_eq!(card["subjects"][0]["percentage"], json!(65.0));

    // Saved sections survive a restart.
    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin2,
        &mut reader2,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reloaded = request_ok(&mut stdin2, &mut reader2, "g1", "setup.get", json!({}));
    assert_eq!(reloaded["grading"]["examTypes"], json!(["End Term", "CAT 1"]));
    assert_eq!(reloaded["grading"]["passThreshold"], json!(45));
    assert_eq!(reloaded["grading"]["overallScale"], json!("standard"));
}

#[test]
fn grading_classify_and_scale_tables() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // Pure grading needs no workspace.
    for (i, (marks, grade)) in [(0, "E"), (29, "E"), (30, "D-"), (49, "C-"), (50, "C"), (79, "A-"), (80, "A"), (100, "A")]
        .iter()
        .enumerate()
    {
        let r = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "grading.classify",
            json!({ "marks": marks }),
        );
        assert_eq!(r["grade"], json!(grade), "marks {}", marks);
    }
    for (i, bad) in [json!(-1), json!(101), json!(72.5), json!("80")].iter().enumerate() {
        let r = request(
            &mut stdin,
            &mut reader,
            &format!("x{}", i),
            "grading.classify",
            json!({ "marks": bad }),
        );
        assert_eq!(error_code(&r), Some("invalid_mark"), "marks {}", bad);
    }

    let standard = request_ok(&mut stdin, &mut reader, "s1", "grading.scale", json!({}));
    let bands = standard["bands"].as_array().expect("bands");
    assert_eq!(bands.len(), 12);
    assert_eq!(bands[0], json!({ "grade": "A", "min": 80.0, "max": 100.0 }));
    let condensed = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "grading.scale",
        json!({ "scale": "condensed" }),
    );
    assert_eq!(condensed["bands"].as_array().map(|b| b.len()), Some(8));
    assert_eq!(condensed["bands"][7]["grade"], json!("D"));
    let bad = request(&mut stdin, &mut reader, "s3", "grading.scale", json!({ "scale": "x" }));
    assert_eq!(error_code(&bad), Some("bad_params"));
}
