use crate::config::GradingConfig;
use crate::grading::{self, GradeError, GradeLabel, GradeScale};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One-decimal display rounding: `floor(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<GradeError> for CalcError {
    fn from(e: GradeError) -> Self {
        match e {
            GradeError::InvalidMark(_) => CalcError::new("invalid_mark", e.to_string()),
            GradeError::InsufficientData => CalcError::new("insufficient_data", e.to_string()),
        }
    }
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

// ---------------------------------------------------------------------------
// Subject aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub exam_type: String,
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub components: Vec<Component>,
    pub total: u32,
    pub max_total: u32,
    pub percentage: f64,
    pub grade: GradeLabel,
}

/// Sum the components unweighted and normalize against `components × 100`.
/// The grade is taken from the percentage after rounding to one decimal, so
/// a subject shown as 80.0 always grades `A`. Returns `None` for an empty component list.
pub fn aggregate_subject(components: Vec<Component>) -> Option<SubjectAggregate> {
    if components.is_empty() {
        return None;
    }
    let total: u32 = components.iter().map(|c| c.value as u32).sum();
    let max_total = components.len() as u32 * grading::MARK_MAX as u32;
    let percentage = round_off_1_decimal(total as f64 / max_total as f64 * 100.0);
    // Components are already validated to 0..=100, so the percentage is too.
    let grade = grading::classify_percentage(percentage, GradeScale::Standard).ok()?;
    Some(SubjectAggregate {
        components,
        total,
        max_total,
        percentage,
        grade,
    })
}

/// Configured exam types first in configured order, anything else after
/// them alphabetically.
pub fn order_components(components: &mut [Component], exam_types: &[String]) {
    let pos = |t: &str| {
        exam_types
            .iter()
            .position(|e| e.eq_ignore_ascii_case(t))
            .unwrap_or(usize::MAX)
    };
    components.sort_by(|a, b| {
        pos(&a.exam_type)
            .cmp(&pos(&b.exam_type))
            .then_with(|| a.exam_type.cmp(&b.exam_type))
    });
}

// ---------------------------------------------------------------------------
// Class / student aggregation
// ---------------------------------------------------------------------------

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean of subject percentages. Subjects without a result are simply absent.
/// Rounded to one decimal here; grading and ranking use the rounded value.
pub fn student_average(subject_percentages: &[f64]) -> Option<f64> {
    mean(subject_percentages).map(round_off_1_decimal)
}

/// Mean over students that have an average; students with no results are excluded.
pub fn class_average(student_averages: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = student_averages.iter().flatten().copied().collect();
    mean(&present).map(round_off_1_decimal)
}

pub fn pass_rate(values: &[f64], threshold: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let passed = values.iter().filter(|v| **v >= threshold).count();
    Some(round_off_1_decimal(
        passed as f64 / values.len() as f64 * 100.0,
    ))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBucket {
    pub grade: GradeLabel,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDistribution {
    pub total: usize,
    pub buckets: Vec<GradeBucket>,
}

/// Bucket every value by its standard-scale grade. Percentages are kept in
/// tenths and the rounding shortfall is handed to the largest remainders, so
/// a non-empty distribution always sums to exactly 100.0.
pub fn grade_distribution(values: &[f64]) -> GradeDistribution {
    let mut counts = [0_usize; 12];
    for v in values {
        if let Ok(g) = grading::classify_percentage(*v, GradeScale::Standard) {
            counts[g as usize] += 1;
        }
    }
    let total: usize = counts.iter().sum();

    let mut tenths = [0_usize; 12];
    if total > 0 {
        let mut remainders = [0_usize; 12];
        for (i, c) in counts.iter().enumerate() {
            tenths[i] = c * 1000 / total;
            remainders[i] = c * 1000 % total;
        }
        let mut deficit = 1000 - tenths.iter().sum::<usize>();
        let mut order: Vec<usize> = (0..counts.len()).collect();
        order.sort_by(|a, b| remainders[*b].cmp(&remainders[*a]).then(a.cmp(b)));
        for i in order {
            if deficit == 0 || remainders[i] == 0 {
                break;
            }
            tenths[i] += 1;
            deficit -= 1;
        }
    }

    GradeDistribution {
        total,
        buckets: GradeLabel::ALL
            .iter()
            .enumerate()
            .map(|(i, g)| GradeBucket {
                grade: *g,
                count: counts[i],
                percentage: tenths[i] as f64 / 10.0,
            })
            .collect(),
    }
}

/// Standard competition ranking, highest score first: `[90, 85, 85, 70]`
/// ranks `[1, 2, 2, 4]`. Scores tie when they display the same at one decimal.
pub fn competition_ranks(scores: &[f64]) -> Vec<usize> {
    let keys: Vec<i64> = scores
        .iter()
        .map(|s| (round_off_1_decimal(*s) * 10.0).round() as i64)
        .collect();
    keys.iter()
        .map(|k| 1 + keys.iter().filter(|other| *other > k).count())
        .collect()
}

// ---------------------------------------------------------------------------
// Term models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermFilters {
    pub term: String,
    pub academic_year: String,
    pub subject_id: Option<String>,
    pub exam_type: Option<String>,
}

fn required_text(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Result<String, CalcError> {
    match obj.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(CalcError::new("bad_params", format!("missing {}", key))),
    }
}

fn optional_text(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, CalcError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(CalcError::new(
                    "bad_params",
                    format!("{} must be string or null", key),
                ));
            };
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("ALL") {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn parse_term_filters(raw: &serde_json::Value) -> Result<TermFilters, CalcError> {
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "params must be an object"));
    };
    Ok(TermFilters {
        term: required_text(obj, "term")?,
        academic_year: required_text(obj, "academicYear")?,
        subject_id: optional_text(obj, "subjectId")?,
        exam_type: optional_text(obj, "examType")?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub id: String,
    pub admission_number: String,
    pub display_name: String,
    pub class_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRow {
    pub id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkRow {
    pub student_id: String,
    pub subject_id: String,
    pub exam_type: String,
    pub marks: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub components: Vec<Component>,
    pub total: u32,
    pub max_total: u32,
    pub percentage: f64,
    pub grade: GradeLabel,
    pub position: usize,
    pub out_of: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: String,
    pub admission_number: String,
    pub display_name: String,
    pub class_id: String,
    pub subject_count: usize,
    pub average_percentage: Option<f64>,
    pub overall_grade: Option<GradeLabel>,
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub summary: StudentSummary,
    pub subjects: Vec<SubjectResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub pass_threshold: u8,
    pub student_count: usize,
    pub graded_student_count: usize,
    pub mark_count: usize,
    pub class_average: Option<f64>,
    pub class_grade: Option<GradeLabel>,
    pub pass_rate: Option<f64>,
    pub grade_distribution: GradeDistribution,
}

/// Students in input order with per-subject results and positions filled in.
/// Marks for students not in `students`, or subjects not in `subjects`, are ignored.
pub fn build_student_reports(
    students: &[StudentRow],
    subjects: &[SubjectRow],
    marks: &[MarkRow],
    cfg: &GradingConfig,
) -> Vec<StudentReport> {
    let subject_by_id: HashMap<&str, &SubjectRow> =
        subjects.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut grouped: HashMap<(&str, &str), Vec<Component>> = HashMap::new();
    for m in marks {
        grouped
            .entry((m.student_id.as_str(), m.subject_id.as_str()))
            .or_default()
            .push(Component {
                exam_type: m.exam_type.clone(),
                value: m.marks,
            });
    }

    let mut reports: Vec<StudentReport> = students
        .iter()
        .map(|st| {
            let mut rows: Vec<SubjectResult> = Vec::new();
            for subj in subjects {
                let Some(comps) = grouped.get(&(st.id.as_str(), subj.id.as_str())) else {
                    continue;
                };
                let mut comps = comps.clone();
                order_components(&mut comps, &cfg.exam_types);
                let Some(agg) = aggregate_subject(comps) else {
                    continue;
                };
                rows.push(SubjectResult {
                    subject_id: subj.id.clone(),
                    subject_code: subj.code.clone(),
                    subject_name: subj.name.clone(),
                    components: agg.components,
                    total: agg.total,
                    max_total: agg.max_total,
                    percentage: agg.percentage,
                    grade: agg.grade,
                    position: 0,
                    out_of: 0,
                });
            }
            let percentages: Vec<f64> = rows.iter().map(|r| r.percentage).collect();
            let average_percentage = student_average(&percentages);
            let overall_grade =
                grading::classify_average(average_percentage, cfg.overall_scale).ok();
            StudentReport {
                summary: StudentSummary {
                    student_id: st.id.clone(),
                    admission_number: st.admission_number.clone(),
                    display_name: st.display_name.clone(),
                    class_id: st.class_id.clone(),
                    subject_count: rows.len(),
                    average_percentage,
                    overall_grade,
                    position: None,
                },
                subjects: rows,
            }
        })
        .collect();

    // Overall positions among students with data.
    let graded: Vec<(usize, f64)> = reports
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.summary.average_percentage.map(|a| (i, a)))
        .collect();
    let ranks = competition_ranks(&graded.iter().map(|(_, a)| *a).collect::<Vec<_>>());
    for ((i, _), rank) in graded.iter().zip(ranks) {
        reports[*i].summary.position = Some(rank);
    }

    // Per-subject positions.
    for subj in subjects {
        let entries: Vec<(usize, usize, f64)> = reports
            .iter()
            .enumerate()
            .filter_map(|(ri, r)| {
                r.subjects
                    .iter()
                    .position(|s| s.subject_id == subj.id)
                    .map(|si| (ri, si, r.subjects[si].percentage))
            })
            .collect();
        let ranks = competition_ranks(&entries.iter().map(|(_, _, p)| *p).collect::<Vec<_>>());
        let out_of = entries.len();
        for ((ri, si, _), rank) in entries.iter().zip(ranks) {
            let row = &mut reports[*ri].subjects[*si];
            row.position = rank;
            row.out_of = out_of;
        }
    }

    reports
}

/// Class-level view. Distribution and pass rate count individual marks; the
/// class average is the mean of student averages.
pub fn summarize_class(reports: &[StudentReport], marks: &[MarkRow], cfg: &GradingConfig) -> ClassSummary {
    let student_ids: std::collections::HashSet<&str> = reports
        .iter()
        .map(|r| r.summary.student_id.as_str())
        .collect();
    let values: Vec<f64> = marks
        .iter()
        .filter(|m| student_ids.contains(m.student_id.as_str()))
        .map(|m| m.marks as f64)
        .collect();
    let averages: Vec<Option<f64>> = reports.iter().map(|r| r.summary.average_percentage).collect();
    let class_avg = class_average(&averages);

    ClassSummary {
        pass_threshold: cfg.pass_threshold,
        student_count: reports.len(),
        graded_student_count: averages.iter().filter(|a| a.is_some()).count(),
        mark_count: values.len(),
        class_average: class_avg,
        class_grade: grading::classify_average(class_avg, cfg.overall_scale).ok(),
        pass_rate: pass_rate(&values, cfg.pass_threshold as f64),
        grade_distribution: grade_distribution(&values),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub level: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassInfo>,
    pub filters: TermFilters,
    pub summary: ClassSummary,
    pub students: Vec<StudentReport>,
    #[serde(skip)]
    pub subjects: Vec<SubjectRow>,
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    /// `None` means every active student in the school.
    pub class_id: Option<&'a str>,
}

pub fn load_class_info(conn: &Connection, class_id: &str) -> Result<ClassInfo, CalcError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT name, level FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((name, level)) = row else {
        return Err(CalcError::new("not_found", "class not found")
            .with_details(serde_json::json!({ "classId": class_id })));
    };
    Ok(ClassInfo {
        id: class_id.to_string(),
        name,
        level,
    })
}

fn load_active_students(conn: &Connection, class_id: Option<&str>) -> Result<Vec<StudentRow>, CalcError> {
    let mut sql = String::from(
        "SELECT id, admission_number, first_name, last_name, class_id
         FROM students
         WHERE status = 'active'",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = class_id {
        sql.push_str(" AND class_id = ?");
        binds.push(Value::Text(cid.to_string()));
    }
    sql.push_str(" ORDER BY last_name, first_name, admission_number");
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    stmt.query_map(params_from_iter(binds), |r| {
        let first: String = r.get(2)?;
        let last: String = r.get(3)?;
        Ok(StudentRow {
            id: r.get(0)?,
            admission_number: r.get(1)?,
            display_name: format!("{} {}", first, last),
            class_id: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn load_subjects(conn: &Connection, subject_id: Option<&str>) -> Result<Vec<SubjectRow>, CalcError> {
    let mut sql = String::from("SELECT id, code, name FROM subjects");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(sid) = subject_id {
        sql.push_str(" WHERE id = ?");
        binds.push(Value::Text(sid.to_string()));
    }
    sql.push_str(" ORDER BY name");
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    stmt.query_map(params_from_iter(binds), |r| {
        Ok(SubjectRow {
            id: r.get(0)?,
            code: r.get(1)?,
            name: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// Marks follow the student's current class, not the class they were entered under.
fn load_marks(conn: &Connection, class_id: Option<&str>, filters: &TermFilters) -> Result<Vec<MarkRow>, CalcError> {
    let mut sql = String::from(
        "SELECT r.student_id, r.subject_id, r.exam_type, r.marks
         FROM results r
         JOIN students s ON s.id = r.student_id
         WHERE r.term = ? AND r.academic_year = ?",
    );
    let mut binds: Vec<Value> = vec![
        Value::Text(filters.term.clone()),
        Value::Text(filters.academic_year.clone()),
    ];
    if let Some(cid) = class_id {
        sql.push_str(" AND s.class_id = ?");
        binds.push(Value::Text(cid.to_string()));
    }
    if let Some(sid) = &filters.subject_id {
        sql.push_str(" AND r.subject_id = ?");
        binds.push(Value::Text(sid.clone()));
    }
    if let Some(et) = &filters.exam_type {
        sql.push_str(" AND r.exam_type = ?");
        binds.push(Value::Text(et.clone()));
    }
    sql.push_str(" ORDER BY r.student_id, r.subject_id, r.exam_type");
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })
        .map_err(db_err)?;
    let mut out = Vec::new();
    for row in rows {
        let (student_id, subject_id, exam_type, raw) = row.map_err(db_err)?;
        // The CHECK constraint keeps stored marks in range; re-validate anyway
        // so a hand-edited workspace cannot skew aggregates.
        grading::classify_mark(raw)?;
        out.push(MarkRow {
            student_id,
            subject_id,
            exam_type,
            marks: raw as u8,
        });
    }
    Ok(out)
}

pub fn compute_term_model(
    ctx: &CalcContext<'_>,
    filters: &TermFilters,
    cfg: &GradingConfig,
) -> Result<TermModel, CalcError> {
    let class = match ctx.class_id {
        Some(cid) => Some(load_class_info(ctx.conn, cid)?),
        None => None,
    };
    let students = load_active_students(ctx.conn, ctx.class_id)?;
    let subjects = load_subjects(ctx.conn, filters.subject_id.as_deref())?;
    let marks = load_marks(ctx.conn, ctx.class_id, filters)?;

    let students_out = build_student_reports(&students, &subjects, &marks, cfg);
    let summary = summarize_class(&students_out, &marks, cfg);
    tracing::debug!(
        class_id = ctx.class_id.unwrap_or("*"),
        term = %filters.term,
        year = %filters.academic_year,
        marks = marks.len(),
        "computed term model"
    );

    Ok(TermModel {
        class,
        filters: filters.clone(),
        summary,
        students: students_out,
        subjects,
    })
}

/// Terms with at least one result for a current member of the class, in lexical order.
pub fn list_terms(conn: &Connection, class_id: &str, academic_year: &str) -> Result<Vec<String>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT r.term
             FROM results r
             JOIN students s ON s.id = r.student_id
             WHERE s.class_id = ? AND r.academic_year = ?
             ORDER BY r.term",
        )
        .map_err(db_err)?;
    stmt.query_map((class_id, academic_year), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(exam_type: &str, value: u8) -> Component {
        Component {
            exam_type: exam_type.to_string(),
            value,
        }
    }

    fn student(id: &str) -> StudentRow {
        StudentRow {
            id: id.to_string(),
            admission_number: format!("ADM-{}", id),
            display_name: format!("Student {}", id),
            class_id: "c1".to_string(),
        }
    }

    fn subject(id: &str) -> SubjectRow {
        SubjectRow {
            id: id.to_string(),
            code: id.to_ascii_uppercase(),
            name: id.to_string(),
        }
    }

    fn mark(student_id: &str, subject_id: &str, exam_type: &str, marks: u8) -> MarkRow {
        MarkRow {
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
            exam_type: exam_type.to_string(),
            marks,
        }
    }

    #[test]
    fn round_off_half_up() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(35.6818), 35.7);
    }

    #[test]
    fn four_components_of_eighty_normalize_to_grade_a() {
        let agg = aggregate_subject(vec![
            comp("CAT 1", 80),
            comp("CAT 2", 80),
            comp("Midterm", 80),
            comp("End Term", 80),
        ])
        .expect("aggregate");
        assert_eq!(agg.total, 320);
        assert_eq!(agg.max_total, 400);
        assert_eq!(agg.percentage, 80.0);
        assert_eq!(agg.grade, GradeLabel::A);
    }

    #[test]
    fn aggregate_normalizes_by_recorded_component_count() {
        let agg = aggregate_subject(vec![comp("CAT 1", 70), comp("Midterm", 61)]).expect("aggregate");
        assert_eq!(agg.total, 131);
        assert_eq!(agg.max_total, 200);
        assert_eq!(agg.percentage, 65.5);
        assert_eq!(agg.grade, GradeLabel::B);
        assert_eq!(aggregate_subject(Vec::new()), None);
    }

    #[test]
    fn grades_follow_the_rounded_percentage() {
        // 1679 / 2100 is 79.95..., shown as 80.0 and graded A rather than A-.
        let mut comps: Vec<Component> = (0..20).map(|i| comp(&format!("Quiz {}", i), 80)).collect();
        comps.push(comp("Quiz 20", 79));
        let agg = aggregate_subject(comps).expect("aggregate");
        assert_eq!(agg.total, 1679);
        assert_eq!(agg.percentage, 80.0);
        assert_eq!(agg.grade, GradeLabel::A);

        let avg = student_average(&[79.92, 80.0]);
        assert_eq!(avg, Some(80.0));
        assert_eq!(
            grading::classify_average(avg, GradeScale::Standard).ok(),
            Some(GradeLabel::A)
        );
    }

    #[test]
    fn components_follow_configured_exam_order() {
        let order = vec!["CAT 1".to_string(), "Midterm".to_string(), "End Term".to_string()];
        let mut comps = vec![
            comp("Project", 1),
            comp("End Term", 2),
            comp("Assignment", 3),
            comp("cat 1", 4),
        ];
        order_components(&mut comps, &order);
        let names: Vec<&str> = comps.iter().map(|c| c.exam_type.as_str()).collect();
        assert_eq!(names, vec!["cat 1", "End Term", "Assignment", "Project"]);
    }

    #[test]
    fn averages_exclude_missing_data() {
        assert_eq!(student_average(&[]), None);
        assert_eq!(student_average(&[80.0, 70.0, 65.0]), Some(71.7));
        assert_eq!(class_average(&[Some(80.0), None, Some(60.0)]), Some(70.0));
        assert_eq!(class_average(&[None, None]), None);
    }

    #[test]
    fn pass_rate_uses_inclusive_threshold() {
        assert_eq!(pass_rate(&[], 50.0), None);
        assert_eq!(pass_rate(&[50.0, 49.0, 80.0, 10.0], 50.0), Some(50.0));
        assert_eq!(pass_rate(&[40.0, 41.0, 39.0], 40.0), Some(66.7));
    }

    #[test]
    fn ranks_use_standard_competition_ranking() {
        assert_eq!(competition_ranks(&[90.0, 85.0, 85.0, 70.0]), vec![1, 2, 2, 4]);
        assert_eq!(competition_ranks(&[70.0, 85.0, 90.0, 85.0]), vec![4, 2, 1, 2]);
        assert_eq!(competition_ranks(&[85.04, 85.0]), vec![1, 1]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn distribution_over_forty_marks_sums_to_hundred() {
        let marks: Vec<f64> = (0..40).map(|i| ((i * 37) % 101) as f64).collect();
        let dist = grade_distribution(&marks);
        assert_eq!(dist.total, 40);
        assert_eq!(dist.buckets.len(), 12);
        assert_eq!(dist.buckets.iter().map(|b| b.count).sum::<usize>(), 40);
        let sum: f64 = dist.buckets.iter().map(|b| b.percentage).sum();
        assert!((sum - 100.0).abs() <= 0.1, "sum was {}", sum);
    }

    #[test]
    fn distribution_with_thirds_still_sums_to_hundred() {
        let dist = grade_distribution(&[90.0, 60.0, 10.0]);
        let pcts: Vec<f64> = dist
            .buckets
            .iter()
            .filter(|b| b.count > 0)
            .map(|b| b.percentage)
            .collect();
        assert_eq!(pcts, vec![33.4, 33.3, 33.3]);
        let tenths: usize = dist.buckets.iter().map(|b| (b.percentage * 10.0).round() as usize).sum();
        assert_eq!(tenths, 1000);
    }

    #[test]
    fn empty_distribution_is_all_zero() {
        let dist = grade_distribution(&[]);
        assert_eq!(dist.total, 0);
        assert!(dist.buckets.iter().all(|b| b.count == 0 && b.percentage == 0.0));
    }

    #[test]
    fn empty_class_reports_no_data_instead_of_zero() {
        let cfg = GradingConfig::default();
        let students = vec![student("s1"), student("s2")];
        let reports = build_student_reports(&students, &[subject("math")], &[], &cfg);
        let summary = summarize_class(&reports, &[], &cfg);
        assert_eq!(summary.class_average, None);
        assert_eq!(summary.pass_rate, None);
        assert_eq!(summary.class_grade, None);
        assert_eq!(summary.student_count, 2);
        assert_eq!(summary.graded_student_count, 0);
        assert!(reports.iter().all(|r| r.summary.average_percentage.is_none()
            && r.summary.overall_grade.is_none()
            && r.summary.position.is_none()));

        let none = summarize_class(&[], &[], &cfg);
        assert_eq!(none.class_average, None);
        assert_eq!(none.pass_rate, None);
    }

    #[test]
    fn reports_rank_students_and_subjects() {
        let cfg = GradingConfig::default();
        let students = vec![student("a"), student("b"), student("c"), student("d")];
        let subjects = vec![subject("eng"), subject("math")];
        let marks = vec![
            mark("a", "math", "CAT 1", 90),
            mark("a", "eng", "CAT 1", 90),
            mark("b", "math", "CAT 1", 80),
            mark("b", "eng", "CAT 1", 90),
            mark("c", "math", "CAT 1", 90),
            mark("c", "eng", "CAT 1", 80),
            mark("d", "math", "CAT 1", 70),
            mark("d", "eng", "CAT 1", 70),
            mark("zz", "math", "CAT 1", 10),
        ];
        let reports = build_student_reports(&students, &subjects, &marks, &cfg);
        let positions: Vec<Option<usize>> = reports.iter().map(|r| r.summary.position).collect();
        assert_eq!(positions, vec![Some(1), Some(2), Some(2), Some(4)]);
        assert_eq!(reports[1].summary.average_percentage, Some(85.0));

        let math_positions: Vec<usize> = reports
            .iter()
            .map(|r| {
                r.subjects
                    .iter()
                    .find(|s| s.subject_id == "math")
                    .map(|s| s.position)
                    .unwrap_or(0)
            })
            .collect();
        assert_eq!(math_positions, vec![1, 3, 1, 4]);

        let summary = summarize_class(&reports, &marks, &cfg);
        assert_eq!(summary.mark_count, 8, "marks of students outside the class are ignored");
        assert_eq!(summary.class_average, Some(82.5));
        assert_eq!(summary.pass_rate, Some(100.0));
    }

    #[test]
    fn overall_grade_follows_configured_scale() {
        let mut cfg = GradingConfig::default();
        let students = vec![student("a")];
        let subjects = vec![subject("math")];
        let marks = vec![mark("a", "math", "CAT 1", 42)];

        let standard = build_student_reports(&students, &subjects, &marks, &cfg);
        assert_eq!(standard[0].summary.overall_grade, Some(GradeLabel::DPlus));
        assert_eq!(standard[0].subjects[0].grade, GradeLabel::DPlus);

        cfg.overall_scale = GradeScale::Condensed;
        let condensed = build_student_reports(&students, &subjects, &marks, &cfg);
        assert_eq!(condensed[0].summary.overall_grade, Some(GradeLabel::D));
        // Subject grades always use the standard table.
        assert_eq!(condensed[0].subjects[0].grade, GradeLabel::DPlus);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let cfg = GradingConfig::default();
        let students = vec![student("a"), student("b")];
        let subjects = vec![subject("math"), subject("bio")];
        let marks = vec![
            mark("a", "math", "CAT 1", 77),
            mark("a", "math", "Midterm", 64),
            mark("a", "bio", "End Term", 51),
            mark("b", "bio", "CAT 2", 33),
        ];
        let first = build_student_reports(&students, &subjects, &marks, &cfg);
        let second = build_student_reports(&students, &subjects, &marks, &cfg);
        assert_eq!(first, second);
        assert_eq!(
            summarize_class(&first, &marks, &cfg),
            summarize_class(&second, &marks, &cfg)
        );
    }

    #[test]
    fn term_filters_require_term_and_year() {
        let ok = parse_term_filters(&serde_json::json!({
            "term": "Term 2",
            "academicYear": "2024",
            "subjectId": "ALL",
            "examType": "Midterm"
        }))
        .expect("filters");
        assert_eq!(ok.term, "Term 2");
        assert_eq!(ok.subject_id, None);
        assert_eq!(ok.exam_type.as_deref(), Some("Midterm"));

        let missing = parse_term_filters(&serde_json::json!({ "term": "Term 2" }));
        assert_eq!(missing.err().map(|e| e.code), Some("bad_params".to_string()));
    }
}
