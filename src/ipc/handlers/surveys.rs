use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, db_err, log_audit, now_rfc3339, optional_str, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn bio_form_locked(conn: &Connection, classroom_id: &str) -> Result<bool, HandlerErr> {
    let locked: Option<i64> = conn
        .query_row(
            "SELECT bio_form_locked FROM access_locks WHERE classroom_id = ?",
            [classroom_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    // No row means the classroom predates the lock table: treat as locked.
    Ok(locked.map(|v| v != 0).unwrap_or(true))
}

fn bio_form_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;

    let student: Option<(String, String)> = conn
        .query_row(
            "SELECT classroom_id, name FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((classroom_id, name)) = student else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let form: Option<(String, i64, Option<String>)> = conn
        .query_row(
            "SELECT sections_json, completed, updated_at FROM bio_forms WHERE student_id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let (sections_text, completed, updated_at) =
        form.unwrap_or_else(|| ("{}".to_string(), 0, None));
    let sections: serde_json::Value =
        serde_json::from_str(&sections_text).unwrap_or_else(|_| json!({}));

    Ok(json!({
        "studentId": student_id,
        "studentName": name,
        "classroomId": classroom_id,
        "sections": sections,
        "completed": completed != 0,
        "updatedAt": updated_at,
        "locked": bio_form_locked(conn, &classroom_id)?
    }))
}

fn bio_form_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let sections = params
        .get("sections")
        .cloned()
        .ok_or_else(|| HandlerErr::new("bad_params", "missing sections"))?;
    if !sections.is_object() {
        return Err(HandlerErr::new("bad_params", "sections must be an object"));
    }
    let completed = params
        .get("completed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let classroom_id: Option<String> = conn
        .query_row(
            "SELECT classroom_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(classroom_id) = classroom_id else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    // Students only write their own form while the homeroom teacher has
    // released it; staff roles are not gated by the lock.
    let role = optional_str(params, "role").and_then(|r| Role::parse(&r));
    if role == Some(Role::Aluno) && bio_form_locked(conn, &classroom_id)? {
        return Err(HandlerErr::new(
            "locked",
            "bio form access is locked for this classroom",
        ));
    }

    conn.execute(
        "INSERT INTO bio_forms(student_id, sections_json, completed, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           sections_json = excluded.sections_json,
           completed = excluded.completed,
           updated_at = excluded.updated_at",
        (
            &student_id,
            sections.to_string(),
            completed as i64,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "bio_forms" }),
        )
    })?;

    log_audit(
        conn,
        "UPDATE",
        "bio_forms",
        &student_id,
        &actor_user_id(params),
        json!({ "completed": completed }),
    )?;

    Ok(json!({ "ok": true, "completed": completed }))
}

fn locks_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;

    let row: Option<(i64, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT bio_form_locked, locked_at, locked_by FROM access_locks WHERE classroom_id = ?",
            [&classroom_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let (locked, locked_at, locked_by) = row.unwrap_or((1, None, None));

    Ok(json!({
        "classroomId": classroom_id,
        "bioFormLocked": locked != 0,
        "lockedAt": locked_at,
        "lockedBy": locked_by
    }))
}

fn locks_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let locked = params
        .get("locked")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing locked"))?;
    let actor = actor_user_id(params);

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classrooms WHERE id = ?",
            [&classroom_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "classroom not found"));
    }

    conn.execute(
        "INSERT INTO access_locks(classroom_id, bio_form_locked, locked_at, locked_by)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(classroom_id) DO UPDATE SET
           bio_form_locked = excluded.bio_form_locked,
           locked_at = excluded.locked_at,
           locked_by = excluded.locked_by",
        (&classroom_id, locked as i64, now_rfc3339(), &actor),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "access_locks" }),
        )
    })?;

    log_audit(
        conn,
        if locked { "LOCK" } else { "UNLOCK" },
        "access_locks",
        &classroom_id,
        &actor,
        json!({ "bioFormLocked": locked }),
    )?;

    Ok(json!({ "ok": true, "bioFormLocked": locked }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f = match req.method.as_str() {
        "bioForm.get" => bio_form_get,
        "bioForm.save" => bio_form_save,
        "locks.get" => locks_get,
        "locks.set" => locks_set,
        _ => return None,
    };

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
