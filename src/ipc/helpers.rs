use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_u64(params: &serde_json::Value, key: &str) -> Result<u64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn actor_user_id(params: &serde_json::Value) -> String {
    optional_str(params, "actorUserId").unwrap_or_else(|| "system".to_string())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Append one row to the domain activity log.
pub fn log_audit(
    conn: &Connection,
    action: &str,
    entity: &str,
    entity_id: &str,
    actor_user_id: &str,
    metadata: serde_json::Value,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO audit_log(id, action, entity, entity_id, actor_user_id, metadata, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            action,
            entity,
            entity_id,
            actor_user_id,
            metadata.to_string(),
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "audit_log" }))
    })?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ClassroomInfo {
    pub id: String,
    pub school_id: String,
    pub school_name: String,
    pub year_grade: String,
    pub label: String,
    pub shift: String,
}

impl ClassroomInfo {
    /// "Escola X — 6º A (Manhã)", the heading every classroom report uses.
    pub fn subtitle(&self) -> String {
        format!(
            "{} — {} {} ({})",
            self.school_name, self.year_grade, self.label, self.shift
        )
    }
}

pub fn classroom_info(
    conn: &Connection,
    classroom_id: &str,
) -> Result<Option<ClassroomInfo>, HandlerErr> {
    conn.query_row(
        "SELECT c.id, c.school_id, s.name, c.year_grade, c.label, c.shift
         FROM classrooms c
         JOIN schools s ON s.id = c.school_id
         WHERE c.id = ?",
        [classroom_id],
        |r| {
            Ok(ClassroomInfo {
                id: r.get(0)?,
                school_id: r.get(1)?,
                school_name: r.get(2)?,
                year_grade: r.get(3)?,
                label: r.get(4)?,
                shift: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

/// Ids of the active students of a classroom in name order — the roster
/// every seating operation works from.
pub fn active_student_ids(
    conn: &Connection,
    classroom_id: &str,
) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id
             FROM students
             WHERE classroom_id = ? AND status = 'Ativo'
             ORDER BY name",
        )
        .map_err(db_err)?;
    stmt.query_map([classroom_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}
