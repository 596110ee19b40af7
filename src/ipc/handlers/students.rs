use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, db_err, log_audit, now_rfc3339, optional_str, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_row_json(row: &rusqlite::Row<'_>) -> Result<serde_json::Value, rusqlite::Error> {
    let id: String = row.get(0)?;
    let enrollment_code: Option<String> = row.get(1)?;
    let name: String = row.get(2)?;
    let birthdate: Option<String> = row.get(3)?;
    let responsible_name: Option<String> = row.get(4)?;
    let responsible_phone: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    let is_leader: i64 = row.get(7)?;
    let is_vice_leader: i64 = row.get(8)?;
    Ok(json!({
        "id": id,
        "enrollmentCode": enrollment_code,
        "name": name,
        "birthdate": birthdate,
        "responsibleName": responsible_name,
        "responsiblePhone": responsible_phone,
        "status": status,
        "isLeader": is_leader != 0,
        "isViceLeader": is_vice_leader != 0
    }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let status_filter = optional_str(params, "status");

    let mut stmt = conn
        .prepare(
            "SELECT id, enrollment_code, name, birthdate, responsible_name, responsible_phone,
                    status, is_leader, is_vice_leader
             FROM students
             WHERE classroom_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY name",
        )
        .map_err(db_err)?;
    let students = stmt
        .query_map((&classroom_id, &status_filter), |row| student_row_json(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": students }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }

    let school_id: Option<String> = conn
        .query_row(
            "SELECT school_id FROM classrooms WHERE id = ?",
            [&classroom_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(school_id) = school_id else {
        return Err(HandlerErr::new("not_found", "classroom not found"));
    };

    let student_id = Uuid::new_v4().to_string();
    let enrollment_code = optional_str(params, "enrollmentCode");
    let birthdate = optional_str(params, "birthdate");
    let responsible_name = optional_str(params, "responsibleName");
    let responsible_phone = optional_str(params, "responsiblePhone");
    let status = optional_str(params, "status").unwrap_or_else(|| "Ativo".to_string());

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO students(id, school_id, classroom_id, enrollment_code, name, birthdate,
                              responsible_name, responsible_phone, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &school_id,
            &classroom_id,
            &enrollment_code,
            &name,
            &birthdate,
            &responsible_name,
            &responsible_phone,
            &status,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "students" }),
        )
    })?;
    // Every student carries an (initially empty) survey form.
    tx.execute(
        "INSERT INTO bio_forms(student_id, sections_json, completed) VALUES(?, '{}', 0)",
        [&student_id],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "bio_forms" }),
        )
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log_audit(
        conn,
        "CREATE",
        "students",
        &student_id,
        &actor_user_id(params),
        json!({ "name": name }),
    )?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let patch = params.get("patch").cloned().unwrap_or_else(|| json!({}));
    for (key, column) in [
        ("name", "name"),
        ("enrollmentCode", "enrollment_code"),
        ("birthdate", "birthdate"),
        ("responsibleName", "responsible_name"),
        ("responsiblePhone", "responsible_phone"),
        ("status", "status"),
    ] {
        let Some(value) = patch.get(key) else {
            continue;
        };
        let value: Option<String> = value.as_str().map(|s| s.to_string());
        // Name and status are NOT NULL columns; the rest may be cleared.
        if value.is_none() && (key == "name" || key == "status") {
            return Err(HandlerErr::new(
                "bad_params",
                format!("{} must be a string", key),
            ));
        }
        let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
        conn.execute(&sql, (&value, &student_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    log_audit(
        conn,
        "UPDATE",
        "students",
        &student_id,
        &actor_user_id(params),
        json!({}),
    )?;

    Ok(json!({ "ok": true }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    // Persisted seat maps may still name this student; loads drop stale
    // occupants, so no cleanup is needed there.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (table, sql) in [
        ("bio_forms", "DELETE FROM bio_forms WHERE student_id = ?"),
        (
            "student_photos",
            "DELETE FROM student_photos WHERE student_id = ?",
        ),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": table }),
            ));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log_audit(
        conn,
        "DELETE",
        "students",
        &student_id,
        &actor_user_id(params),
        json!({}),
    )?;

    Ok(json!({ "ok": true }))
}

/// Toggle a leadership flag. A classroom has at most one leader and one
/// vice-leader; granting the flag clears it on every other student first.
fn students_set_leader(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let field = required_str(params, "field")?;
    let value = params
        .get("value")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing value"))?;

    let column = match field.as_str() {
        "isLeader" => "is_leader",
        "isViceLeader" => "is_vice_leader",
        other => {
            return Err(HandlerErr::with_details(
                "bad_params",
                "field must be isLeader or isViceLeader",
                json!({ "field": other }),
            ))
        }
    };

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

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if value {
        let sql = format!(
            "UPDATE students SET {} = 0 WHERE classroom_id = ? AND id != ?",
            column
        );
        tx.execute(&sql, (&classroom_id, &student_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
    tx.execute(&sql, (value as i64, &student_id))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log_audit(
        conn,
        "UPDATE",
        "students",
        &student_id,
        &actor_user_id(params),
        json!({ "field": field, "value": value }),
    )?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f = match req.method.as_str() {
        "students.list" => students_list,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.setLeader" => students_set_leader,
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
