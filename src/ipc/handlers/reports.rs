use crate::calc::{self, CalcContext, StudentReport, TermModel};
use crate::config::{self, GradingConfig, SetupSection};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, grading_config, required_str, term_filters};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// School header printed on every card.
fn school_header(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let school = config::load_section(conn, SetupSection::School)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(json!({
        "name": school.get("name"),
        "address": school.get("address"),
        "phone": school.get("phone"),
        "email": school.get("email"),
        "principal": school.get("principal")
    }))
}

fn card_json(
    model: &TermModel,
    report: &StudentReport,
    school: &serde_json::Value,
    cfg: &GradingConfig,
) -> serde_json::Value {
    let s = &report.summary;
    json!({
        "school": school,
        "class": model.class,
        "term": model.filters.term,
        "academicYear": model.filters.academic_year,
        "student": {
            "studentId": s.student_id,
            "admissionNumber": s.admission_number,
            "name": s.display_name
        },
        "subjects": report.subjects,
        "summary": {
            "subjectCount": s.subject_count,
            "averagePercentage": s.average_percentage,
            "overallGrade": s.overall_grade,
            "position": s.position,
            "outOf": model.summary.graded_student_count,
            "classSize": model.summary.student_count
        },
        "overallScale": cfg.overall_scale.as_str()
    })
}

fn handle_reports_student_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match term_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student: Option<(String, String)> = match conn
        .query_row(
            "SELECT class_id, status FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_id, status)) = student else {
        return err(&req.id, "not_found", "student not found", None);
    };
    if status != "active" {
        return err(
            &req.id,
            "bad_params",
            "report cards are only produced for active students",
            Some(json!({ "studentId": student_id, "status": status })),
        );
    }

    let cfg = match grading_config(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school = match school_header(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = CalcContext {
        conn,
        class_id: Some(class_id.as_str()),
    };
    let model = match calc::compute_term_model(&ctx, &filters, &cfg) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let Some(report) = model
        .students
        .iter()
        .find(|r| r.summary.student_id == student_id)
    else {
        return err(&req.id, "not_found", "student not found in class", None);
    };

    ok(&req.id, card_json(&model, report, &school, &cfg))
}

fn handle_reports_class_cards(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match term_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match grading_config(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school = match school_header(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = CalcContext {
        conn,
        class_id: Some(class_id.as_str()),
    };
    let model = match calc::compute_term_model(&ctx, &filters, &cfg) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    // Position order; students without results go last, by name.
    let mut ordered: Vec<&StudentReport> = model.students.iter().collect();
    ordered.sort_by(|a, b| {
        let ka = a.summary.position.unwrap_or(usize::MAX);
        let kb = b.summary.position.unwrap_or(usize::MAX);
        ka.cmp(&kb)
            .then_with(|| a.summary.display_name.cmp(&b.summary.display_name))
    });
    let cards: Vec<serde_json::Value> = ordered
        .iter()
        .map(|r| card_json(&model, r, &school, &cfg))
        .collect();

    tracing::info!(class_id = %class_id, cards = cards.len(), "class report cards built");
    ok(
        &req.id,
        json!({
            "class": model.class,
            "term": model.filters.term,
            "academicYear": model.filters.academic_year,
            "classSummary": model.summary,
            "cards": cards
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentCard" => Some(handle_reports_student_card(state, req)),
        "reports.classCards" => Some(handle_reports_class_cards(state, req)),
        _ => None,
    }
}
