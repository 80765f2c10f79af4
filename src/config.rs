use crate::db;
use crate::grading::GradeScale;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

pub const DEFAULT_PASS_THRESHOLD: u8 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    School,
    Grading,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::School, SetupSection::Grading];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::Grading => "grading",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::Grading => "setup.grading",
        }
    }
}

pub fn default_exam_types() -> Vec<String> {
    ["CAT 1", "CAT 2", "Midterm", "End Term"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "name": "",
            "address": "",
            "phone": "",
            "email": "",
            "principal": "",
            "academicYear": "2024",
            "currentTerm": "Term 1"
        }),
        SetupSection::Grading => json!({
            "passThreshold": DEFAULT_PASS_THRESHOLD,
            "overallScale": GradeScale::Standard.as_str(),
            "examTypes": default_exam_types()
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_non_empty(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = parse_string_max(v, key, max_len)?;
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(s)
}

fn parse_exam_types(v: &Value) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| "examTypes must be an array of strings".to_string())?;
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for item in arr {
        let s = parse_non_empty(item, "examTypes[]", 40)?;
        if !seen.insert(s.to_ascii_lowercase()) {
            return Err(format!("duplicate exam type: {}", s));
        }
        out.push(s);
    }
    if out.is_empty() {
        return Err("examTypes must contain at least one exam type".to_string());
    }
    Ok(out)
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "name" | "principal" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "address" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 240)?));
                }
                "phone" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
                }
                "email" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "academicYear" => {
                    obj.insert(k.clone(), Value::String(parse_non_empty(v, k, 20)?));
                }
                "currentTerm" => {
                    obj.insert(k.clone(), Value::String(parse_non_empty(v, k, 40)?));
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "passThreshold" => {
                    obj.insert(k.clone(), json!(parse_i64_range(v, k, 0, 100)?));
                }
                "overallScale" => {
                    let s = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    let scale = GradeScale::parse(s)
                        .ok_or_else(|| "overallScale must be 'standard' or 'condensed'".to_string())?;
                    obj.insert(k.clone(), json!(scale.as_str()));
                }
                "examTypes" => {
                    obj.insert(k.clone(), json!(parse_exam_types(v)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults rather than blocking reads.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring saved settings");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradingConfig {
    pub pass_threshold: u8,
    pub overall_scale: GradeScale,
    pub exam_types: Vec<String>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            overall_scale: GradeScale::Standard,
            exam_types: default_exam_types(),
        }
    }
}

impl GradingConfig {
    fn from_section(v: &Value) -> Self {
        let mut cfg = Self::default();
        if let Some(n) = v.get("passThreshold").and_then(|x| x.as_u64()) {
            cfg.pass_threshold = n.min(100) as u8;
        }
        if let Some(scale) = v
            .get("overallScale")
            .and_then(|x| x.as_str())
            .and_then(GradeScale::parse)
        {
            cfg.overall_scale = scale;
        }
        if let Some(types) = v.get("examTypes").and_then(|x| x.as_array()) {
            let parsed: Vec<String> = types
                .iter()
                .filter_map(|t| t.as_str().map(|s| s.to_string()))
                .collect();
            if !parsed.is_empty() {
                cfg.exam_types = parsed;
            }
        }
        cfg
    }

    pub fn load(conn: &rusqlite::Connection) -> anyhow::Result<Self> {
        Ok(Self::from_section(&load_section(conn, SetupSection::Grading)?))
    }

    /// Configured spelling of `raw` when it names a configured exam type,
    /// ignoring case; otherwise `raw` unchanged.
    pub fn canonical_exam_type(&self, raw: &str) -> String {
        self.exam_types
            .iter()
            .find(|t| t.eq_ignore_ascii_case(raw))
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grading_patch_validates_fields() {
        let mut current = default_section(SetupSection::Grading);
        let patch = json!({ "passThreshold": 40, "overallScale": "condensed" });
        merge_section_patch(
            SetupSection::Grading,
            &mut current,
            patch.as_object().expect("object"),
        )
        .expect("valid patch");
        let cfg = GradingConfig::from_section(&current);
        assert_eq!(cfg.pass_threshold, 40);
        assert_eq!(cfg.overall_scale, GradeScale::Condensed);
        assert_eq!(cfg.exam_types, default_exam_types());

        for bad in [
            json!({ "passThreshold": 101 }),
            json!({ "passThreshold": "50" }),
            json!({ "overallScale": "eight-step" }),
            json!({ "examTypes": [] }),
            json!({ "examTypes": ["CAT 1", "cat 1"] }),
            json!({ "gradingSystem": "letter" }),
        ] {
            let mut cur = default_section(SetupSection::Grading);
            assert!(
                merge_section_patch(SetupSection::Grading, &mut cur, bad.as_object().expect("object"))
                    .is_err(),
                "patch should be rejected: {}",
                bad
            );
        }
    }

    #[test]
    fn defaults_match_grading_config_default() {
        let cfg = GradingConfig::from_section(&default_section(SetupSection::Grading));
        assert_eq!(cfg, GradingConfig::default());
    }

    #[test]
    fn exam_types_resolve_to_configured_spelling() {
        let cfg = GradingConfig::default();
        assert_eq!(cfg.canonical_exam_type("cat 1"), "CAT 1");
        assert_eq!(cfg.canonical_exam_type("END TERM"), "End Term");
        assert_eq!(cfg.canonical_exam_type("Opener"), "Opener");
    }
}
