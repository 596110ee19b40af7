use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, db_err, log_audit, now_rfc3339, optional_str, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn classrooms_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_filter = optional_str(params, "schoolId");

    let sql = "SELECT
                 c.id,
                 c.school_id,
                 s.name,
                 c.year_grade,
                 c.label,
                 c.shift,
                 c.dt_user_id,
                 (SELECT COUNT(*) FROM students st WHERE st.classroom_id = c.id) AS student_count
               FROM classrooms c
               JOIN schools s ON s.id = c.school_id
               WHERE (?1 IS NULL OR c.school_id = ?1)
               ORDER BY c.year_grade, c.label";
    let mut stmt = conn.prepare(sql).map_err(db_err)?;

    let classrooms = stmt
        .query_map([&school_filter], |row| {
            let id: String = row.get(0)?;
            let school_id: String = row.get(1)?;
            let school_name: String = row.get(2)?;
            let year_grade: String = row.get(3)?;
            let label: String = row.get(4)?;
            let shift: String = row.get(5)?;
            let dt_user_id: Option<String> = row.get(6)?;
            let student_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "schoolId": school_id,
                "schoolName": school_name,
                "yearGrade": year_grade,
                "label": label,
                "shift": shift,
                "dtUserId": dt_user_id,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "classrooms": classrooms }))
}

fn classrooms_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = required_str(params, "schoolId")?;
    let year_grade = required_str(params, "yearGrade")?;
    let label = required_str(params, "label")?;
    let shift = required_str(params, "shift")?;
    let dt_user_id = optional_str(params, "dtUserId");

    let school_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if school_exists.is_none() {
        return Err(HandlerErr::new("not_found", "school not found"));
    }

    let classroom_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO classrooms(id, school_id, year_grade, label, shift, dt_user_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &classroom_id,
            &school_id,
            &year_grade,
            &label,
            &shift,
            &dt_user_id,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "classrooms" }),
        )
    })?;
    // Every classroom starts with the student survey locked.
    tx.execute(
        "INSERT INTO access_locks(classroom_id, bio_form_locked) VALUES(?, 1)",
        [&classroom_id],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "access_locks" }),
        )
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log_audit(
        conn,
        "CREATE",
        "classrooms",
        &classroom_id,
        &actor_user_id(params),
        json!({ "yearGrade": year_grade, "label": label }),
    )?;

    Ok(json!({ "classroomId": classroom_id }))
}

fn classrooms_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
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

    for (key, column) in [
        ("yearGrade", "year_grade"),
        ("label", "label"),
        ("shift", "shift"),
    ] {
        if let Some(value) = optional_str(params, key) {
            let sql = format!("UPDATE classrooms SET {} = ? WHERE id = ?", column);
            conn.execute(&sql, (&value, &classroom_id))
                .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
    }
    if let Some(dt) = params.get("dtUserId") {
        let dt: Option<String> = dt.as_str().map(|s| s.to_string());
        conn.execute(
            "UPDATE classrooms SET dt_user_id = ? WHERE id = ?",
            (&dt, &classroom_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    log_audit(
        conn,
        "UPDATE",
        "classrooms",
        &classroom_id,
        &actor_user_id(params),
        json!({}),
    )?;

    Ok(json!({ "ok": true }))
}

fn classrooms_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
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

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    // NOTE: additional tables will be added over time; keep this list updated.
    let child_deletes: [(&str, &str); 5] = [
        (
            "bio_forms",
            "DELETE FROM bio_forms
             WHERE student_id IN (SELECT id FROM students WHERE classroom_id = ?)",
        ),
        (
            "student_photos",
            "DELETE FROM student_photos
             WHERE student_id IN (SELECT id FROM students WHERE classroom_id = ?)",
        ),
        ("seat_maps", "DELETE FROM seat_maps WHERE classroom_id = ?"),
        (
            "access_locks",
            "DELETE FROM access_locks WHERE classroom_id = ?",
        ),
        ("students", "DELETE FROM students WHERE classroom_id = ?"),
    ];

    for (table, sql) in child_deletes {
        if let Err(e) = tx.execute(sql, [&classroom_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": table }),
            ));
        }
    }

    if let Err(e) = tx.execute("DELETE FROM classrooms WHERE id = ?", [&classroom_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "classrooms" }),
        ));
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log_audit(
        conn,
        "DELETE",
        "classrooms",
        &classroom_id,
        &actor_user_id(params),
        json!({}),
    )?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "classrooms.list" | "classrooms.create" | "classrooms.update" | "classrooms.delete" => true,
        _ => false,
    };
    if !handled {
        return None;
    }

    if req.method == "classrooms.list" && state.db.is_none() {
        return Some(ok(&req.id, json!({ "classrooms": [] })));
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "classrooms.list" => classrooms_list(conn, &req.params),
        "classrooms.create" => classrooms_create(conn, &req.params),
        "classrooms.update" => classrooms_update(conn, &req.params),
        "classrooms.delete" => {
            let resp = classrooms_delete(conn, &req.params);
            if resp.is_ok() {
                // A deleted classroom has no editing session to keep.
                if let Ok(classroom_id) = required_str(&req.params, "classroomId") {
                    state.seating_sessions.remove(&classroom_id);
                }
            }
            resp
        }
        _ => unreachable!(),
    };

    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
