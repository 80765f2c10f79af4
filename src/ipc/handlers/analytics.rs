use crate::calc::{self, CalcContext, TermFilters};
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, db_conn, grading_config, optional_filter, required_str, term_filters,
};
use crate::ipc::types::{AppState, Request};
use serde::Serialize;
use serde_json::json;

const DEFAULT_TOP_LIMIT: usize = 5;
const MAX_TOP_LIMIT: usize = 100;

/// One point of a chart series. The UI picks a renderer from `kind`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChartDatum {
    PieSlice {
        label: String,
        count: usize,
        percentage: f64,
    },
    Bar {
        label: String,
        value: Option<f64>,
        count: usize,
    },
    Line {
        label: String,
        value: Option<f64>,
    },
}

fn distribution_chart(dist: &calc::GradeDistribution) -> Vec<ChartDatum> {
    dist.buckets
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| ChartDatum::PieSlice {
            label: b.grade.to_string(),
            count: b.count,
            percentage: b.percentage,
        })
        .collect()
}

fn parse_limit(req: &Request) -> Result<usize, serde_json::Value> {
    match req.params.get("limit") {
        None => Ok(DEFAULT_TOP_LIMIT),
        Some(v) if v.is_null() => Ok(DEFAULT_TOP_LIMIT),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 && n as usize <= MAX_TOP_LIMIT => Ok(n as usize),
            _ => Err(err(
                &req.id,
                "bad_params",
                format!("limit must be an integer in 1..={}", MAX_TOP_LIMIT),
                None,
            )),
        },
    }
}

fn handle_analytics_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let ctx = CalcContext {
        conn,
        class_id: Some(class_id.as_str()),
    };
    let model = match calc::compute_term_model(&ctx, &filters, &cfg) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "class": model.class,
            "filters": model.filters,
            "summary": model.summary,
            "distributionChart": distribution_chart(&model.summary.grade_distribution)
        }),
    )
}

fn handle_analytics_subject_performance(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let ctx = CalcContext {
        conn,
        class_id: Some(class_id.as_str()),
    };
    let model = match calc::compute_term_model(&ctx, &filters, &cfg) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let mut subjects = Vec::with_capacity(model.subjects.len());
    let mut chart = Vec::with_capacity(model.subjects.len());
    for subj in &model.subjects {
        let percentages: Vec<f64> = model
            .students
            .iter()
            .filter_map(|r| r.subjects.iter().find(|s| s.subject_id == subj.id))
            .map(|s| s.percentage)
            .collect();
        let average = calc::mean(&percentages).map(calc::round_off_1_decimal);
        let grade = grading::classify_average(average, grading::GradeScale::Standard).ok();
        subjects.push(json!({
            "subjectId": subj.id,
            "code": subj.code,
            "name": subj.name,
            "average": average,
            "grade": grade,
            "passRate": calc::pass_rate(&percentages, cfg.pass_threshold as f64),
            "students": percentages.len()
        }));
        chart.push(ChartDatum::Bar {
            label: subj.name.clone(),
            value: average,
            count: percentages.len(),
        });
    }

    ok(
        &req.id,
        json!({
            "class": model.class,
            "filters": model.filters,
            "subjects": subjects,
            "chart": chart
        }),
    )
}

fn handle_analytics_top_performers(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match optional_filter(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match term_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match parse_limit(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match grading_config(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = CalcContext {
        conn,
        class_id: class_id.as_deref(),
    };
    let model = match calc::compute_term_model(&ctx, &filters, &cfg) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let mut ranked: Vec<&calc::StudentSummary> = model
        .students
        .iter()
        .map(|r| &r.summary)
        .filter(|s| s.position.is_some())
        .collect();
    ranked.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    let top: Vec<serde_json::Value> = ranked
        .iter()
        .take(limit)
        .map(|s| {
            json!({
                "position": s.position,
                "studentId": s.student_id,
                "name": s.display_name,
                "admissionNumber": s.admission_number,
                "classId": s.class_id,
                "average": s.average_percentage,
                "grade": s.overall_grade
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "filters": model.filters,
            "limit": limit,
            "students": top
        }),
    )
}

fn handle_analytics_term_trend(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class = match calc::load_class_info(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let cfg = match grading_config(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let terms = match calc::list_terms(conn, &class_id, &academic_year) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let ctx = CalcContext {
        conn,
        class_id: Some(class_id.as_str()),
    };
    let mut points = Vec::with_capacity(terms.len());
    let mut chart = Vec::with_capacity(terms.len());
    for term in terms {
        let filters = TermFilters {
            term: term.clone(),
            academic_year: academic_year.clone(),
            ..TermFilters::default()
        };
        let model = match calc::compute_term_model(&ctx, &filters, &cfg) {
            Ok(v) => v,
            Err(e) => return calc_err(req, e),
        };
        let s = &model.summary;
        points.push(json!({
            "term": term,
            "classAverage": s.class_average,
            "classGrade": s.class_grade,
            "passRate": s.pass_rate,
            "gradedStudents": s.graded_student_count,
            "marks": s.mark_count
        }));
        chart.push(ChartDatum::Line {
            label: term,
            value: s.class_average,
        });
    }

    ok(
        &req.id,
        json!({
            "class": class,
            "academicYear": academic_year,
            "terms": points,
            "chart": chart
        }),
    )
}

fn count_rows(
    conn: &rusqlite::Connection,
    req: &Request,
    sql: &str,
    params: &[&str],
) -> Result<i64, serde_json::Value> {
    conn.query_row(sql, rusqlite::params_from_iter(params.iter()), |r| r.get(0))
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_dashboard_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
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

    let mut counts = [0_i64; 5];
    let queries: [(&str, Vec<&str>); 5] = [
        ("SELECT COUNT(*) FROM students WHERE status = 'active'", vec![]),
        ("SELECT COUNT(*) FROM subjects WHERE status = 'active'", vec![]),
        ("SELECT COUNT(*) FROM teachers WHERE status = 'active'", vec![]),
        ("SELECT COUNT(*) FROM classes WHERE status = 'active'", vec![]),
        (
            "SELECT COUNT(*) FROM results WHERE term = ? AND academic_year = ?",
            vec![filters.term.as_str(), filters.academic_year.as_str()],
        ),
    ];
    for (slot, (sql, params)) in counts.iter_mut().zip(queries.iter()) {
        *slot = match count_rows(conn, req, sql, params) {
            Ok(v) => v,
            Err(e) => return e,
        };
    }

    let ctx = CalcContext {
        conn,
        class_id: None,
    };
    let model = match calc::compute_term_model(&ctx, &filters, &cfg) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "term": filters.term,
            "academicYear": filters.academic_year,
            "activeStudents": counts[0],
            "subjects": counts[1],
            "teachers": counts[2],
            "classes": counts[3],
            "resultsEntered": counts[4],
            "averagePercentage": model.summary.class_average,
            "averageGrade": model.summary.class_grade,
            "passRate": model.summary.pass_rate,
            "distributionChart": distribution_chart(&model.summary.grade_distribution)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.classSummary" => Some(handle_analytics_class_summary(state, req)),
        "analytics.subjectPerformance" => Some(handle_analytics_subject_performance(state, req)),
        "analytics.topPerformers" => Some(handle_analytics_top_performers(state, req)),
        "analytics.termTrend" => Some(handle_analytics_term_trend(state, req)),
        "dashboard.summary" => Some(handle_dashboard_summary(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_data_is_tagged_by_kind() {
        let slice = ChartDatum::PieSlice {
            label: "A".to_string(),
            count: 3,
            percentage: 30.0,
        };
        assert_eq!(
            serde_json::to_value(&slice).expect("ser"),
            json!({ "kind": "pieSlice", "label": "A", "count": 3, "percentage": 30.0 })
        );
        let line = ChartDatum::Line {
            label: "Term 1".to_string(),
            value: None,
        };
        assert_eq!(
            serde_json::to_value(&line).expect("ser"),
            json!({ "kind": "line", "label": "Term 1", "value": null })
        );
    }

    #[test]
    fn pie_chart_skips_empty_buckets() {
        let dist = calc::grade_distribution(&[90.0, 85.0, 10.0]);
        let chart = distribution_chart(&dist);
        assert_eq!(chart.len(), 2);
        assert!(matches!(&chart[0], ChartDatum::PieSlice { label, count: 2, .. } if label == "A"));
    }
}
