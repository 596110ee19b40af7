use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, db_err, log_audit, now_rfc3339, optional_str, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn schools_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.inep,
               s.name,
               (SELECT COUNT(*) FROM classrooms c WHERE c.school_id = s.id) AS classroom_count,
               (SELECT COUNT(*) FROM students st WHERE st.school_id = s.id) AS student_count
             FROM schools s
             ORDER BY s.name",
        )
        .map_err(db_err)?;

    let schools = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let inep: Option<String> = row.get(1)?;
            let name: String = row.get(2)?;
            let classroom_count: i64 = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "inep": inep,
                "name": name,
                "classroomCount": classroom_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "schools": schools }))
}

fn schools_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let inep = optional_str(params, "inep");

    let school_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, inep, name, created_at) VALUES(?, ?, ?, ?)",
        (&school_id, &inep, &name, now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "schools" }))
    })?;

    log_audit(
        conn,
        "CREATE",
        "schools",
        &school_id,
        &actor_user_id(params),
        json!({ "name": name }),
    )?;

    Ok(json!({ "schoolId": school_id, "name": name }))
}

fn schools_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = required_str(params, "schoolId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "school not found"));
    }

    if let Some(name) = optional_str(params, "name") {
        conn.execute("UPDATE schools SET name = ? WHERE id = ?", (&name, &school_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(inep) = params.get("inep") {
        let inep: Option<String> = inep.as_str().map(|s| s.to_string());
        conn.execute("UPDATE schools SET inep = ? WHERE id = ?", (&inep, &school_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    log_audit(
        conn,
        "UPDATE",
        "schools",
        &school_id,
        &actor_user_id(params),
        json!({}),
    )?;

    Ok(json!({ "ok": true }))
}

fn schools_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = required_str(params, "schoolId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "school not found"));
    }

    let classroom_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM classrooms WHERE school_id = ?",
            [&school_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if classroom_count > 0 {
        return Err(HandlerErr::with_details(
            "db_delete_failed",
            "school still has classrooms",
            json!({ "classroomCount": classroom_count }),
        ));
    }

    conn.execute("DELETE FROM schools WHERE id = ?", [&school_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "schools" }),
            )
        })?;

    log_audit(
        conn,
        "DELETE",
        "schools",
        &school_id,
        &actor_user_id(params),
        json!({}),
    )?;

    Ok(json!({ "ok": true }))
}

fn run(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.list" => Some(match state.db.as_ref() {
            None => ok(&req.id, json!({ "schools": [] })),
            Some(conn) => match schools_list(conn) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            },
        }),
        "schools.create" => Some(run(state, req, schools_create)),
        "schools.update" => Some(run(state, req, schools_update)),
        "schools.delete" => Some(run(state, req, schools_delete)),
        _ => None,
    }
}
