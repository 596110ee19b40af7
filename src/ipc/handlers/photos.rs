use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, db_err, log_audit, now_rfc3339, required_str, student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn photos_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.is_leader, s.is_vice_leader, p.storage_path, p.updated_at
             FROM students s
             LEFT JOIN student_photos p ON p.student_id = s.id
             WHERE s.classroom_id = ? AND s.status = 'Ativo'
             ORDER BY s.name",
        )
        .map_err(db_err)?;
    let students = stmt
        .query_map([&classroom_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let is_leader: i64 = row.get(2)?;
            let is_vice_leader: i64 = row.get(3)?;
            let storage_path: Option<String> = row.get(4)?;
            let updated_at: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "isLeader": is_leader != 0,
                "isViceLeader": is_vice_leader != 0,
                "storagePath": storage_path,
                "photoUpdatedAt": updated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": students }))
}

fn photos_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let storage_path = required_str(params, "storagePath")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let actor = actor_user_id(params);

    conn.execute(
        "INSERT INTO student_photos(student_id, storage_path, updated_at, updated_by)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           storage_path = excluded.storage_path,
           updated_at = excluded.updated_at,
           updated_by = excluded.updated_by",
        (&student_id, &storage_path, now_rfc3339(), &actor),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "student_photos" }),
        )
    })?;

    log_audit(
        conn,
        "UPDATE",
        "student_photos",
        &student_id,
        &actor,
        json!({ "storagePath": storage_path }),
    )?;

    Ok(json!({ "ok": true }))
}

fn photos_remove(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;

    let removed = conn
        .execute("DELETE FROM student_photos WHERE student_id = ?", [&student_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "student_photos" }),
            )
        })?;

    if removed > 0 {
        log_audit(
            conn,
            "DELETE",
            "student_photos",
            &student_id,
            &actor_user_id(params),
            json!({}),
        )?;
    }

    Ok(json!({ "removed": removed > 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f = match req.method.as_str() {
        "photos.list" => photos_list,
        "photos.set" => photos_set,
        "photos.remove" => photos_remove,
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
