use crate::calc::{self, CalcError, TermFilters};
use crate::config::GradingConfig;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::{json, Map};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent, null, empty and "all" all mean "no filter".
pub fn optional_filter(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be string or null", key),
                    None,
                ));
            };
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("all") {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn calc_err(req: &Request, e: CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

pub fn grading_config(conn: &Connection, req: &Request) -> Result<GradingConfig, serde_json::Value> {
    GradingConfig::load(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

pub fn term_filters(req: &Request) -> Result<TermFilters, serde_json::Value> {
    calc::parse_term_filters(&req.params).map_err(|e| calc_err(req, e))
}

/// Write failures: unique-key collisions become `conflict`, everything else `fallback`.
pub fn write_err(req: &Request, fallback: &str, table: &str, e: rusqlite::Error) -> serde_json::Value {
    if db::is_unique_violation(&e) {
        return err(
            &req.id,
            "conflict",
            format!("a {} row with the same key already exists", table),
            Some(json!({ "table": table })),
        );
    }
    err(&req.id, fallback, e.to_string(), Some(json!({ "table": table })))
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Required, trimmed, non-empty.
    Text,
    /// Null or string; empty strings are stored as NULL.
    OptText,
    /// Null or a non-negative integer.
    OptCount,
    /// "active" or "inactive".
    Status,
}

#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub key: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

pub const fn field(key: &'static str, column: &'static str, kind: FieldKind) -> Field {
    Field { key, column, kind }
}

fn parse_field(f: &Field, v: &serde_json::Value) -> Result<Value, String> {
    match f.kind {
        FieldKind::Text => {
            let s = v
                .as_str()
                .map(str::trim)
                .ok_or_else(|| format!("{} must be string", f.key))?;
            if s.is_empty() {
                return Err(format!("{} must not be empty", f.key));
            }
            Ok(Value::Text(s.to_string()))
        }
        FieldKind::OptText => {
            if v.is_null() {
                return Ok(Value::Null);
            }
            let s = v
                .as_str()
                .map(str::trim)
                .ok_or_else(|| format!("{} must be string or null", f.key))?;
            if s.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Text(s.to_string()))
            }
        }
        FieldKind::OptCount => {
            if v.is_null() {
                return Ok(Value::Null);
            }
            let n = v
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| format!("{} must be a non-negative integer or null", f.key))?;
            Ok(Value::Integer(n))
        }
        FieldKind::Status => match v.as_str().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "active" || s == "inactive" => Ok(Value::Text(s)),
            _ => Err(format!("{} must be 'active' or 'inactive'", f.key)),
        },
    }
}

/// Values for an INSERT in `fields` order. Required text fields must be present;
/// other fields default to NULL, statuses to "active".
pub fn parse_create(req: &Request, fields: &[Field]) -> Result<Vec<Value>, serde_json::Value> {
    let mut out = Vec::with_capacity(fields.len());
    for f in fields {
        let v = match req.params.get(f.key) {
            Some(v) => parse_field(f, v).map_err(|m| err(&req.id, "bad_params", m, None))?,
            None => match f.kind {
                FieldKind::Text => {
                    return Err(err(&req.id, "bad_params", format!("missing {}", f.key), None))
                }
                FieldKind::Status => Value::Text("active".to_string()),
                FieldKind::OptText | FieldKind::OptCount => Value::Null,
            },
        };
        out.push(v);
    }
    Ok(out)
}

fn patch_obj<'a>(req: &'a Request) -> Result<&'a Map<String, serde_json::Value>, serde_json::Value> {
    req.params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| err(&req.id, "bad_params", "patch must be an object", None))
}

/// Apply `params.patch` to one row. Unknown keys are rejected; `updated_at` is bumped.
pub fn apply_patch(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
    fields: &[Field],
) -> Result<(), serde_json::Value> {
    let patch = patch_obj(req)?;
    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    for (k, v) in patch {
        let Some(f) = fields.iter().find(|f| f.key == k) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("unknown {} field: {}", table, k),
                None,
            ));
        };
        let parsed = parse_field(f, v).map_err(|m| err(&req.id, "bad_params", m, None))?;
        sets.push(format!("{} = ?", f.column));
        binds.push(parsed);
    }
    if sets.is_empty() {
        return Err(err(&req.id, "bad_params", "patch must not be empty", None));
    }
    sets.push("updated_at = ?".to_string());
    binds.push(Value::Text(db::now_ts()));
    binds.push(Value::Text(id.to_string()));

    let sql = format!("UPDATE {} SET {} WHERE id = ?", table, sets.join(", "));
    match conn.execute(&sql, params_from_iter(binds)) {
        Ok(0) => Err(err(&req.id, "not_found", format!("{} row not found", table), None)),
        Ok(_) => Ok(()),
        Err(e) => Err(write_err(req, "db_update_failed", table, e)),
    }
}

/// `LIKE` pattern for a case-insensitive substring search.
pub fn like_pattern(search: &str) -> String {
    let escaped = search
        .to_ascii_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
