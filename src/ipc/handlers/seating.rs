use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, active_student_ids, classroom_info, db_err, log_audit, now_rfc3339,
    required_i64, required_str, required_u64, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::seating::{LayoutError, SavedLayout, SeatingPlan, DEFAULT_COLS, DEFAULT_ROWS};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn layout_err(e: LayoutError) -> HandlerErr {
    HandlerErr::new(e.code(), e.message())
}

fn session_view(conn: &Connection, plan: &SeatingPlan) -> Result<serde_json::Value, HandlerErr> {
    let mut students = Vec::with_capacity(plan.roster().len());
    for id in plan.roster() {
        let row: Option<(String, i64, i64, Option<String>)> = conn
            .query_row(
                "SELECT s.name, s.is_leader, s.is_vice_leader, p.storage_path
                 FROM students s
                 LEFT JOIN student_photos p ON p.student_id = s.id
                 WHERE s.id = ?",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()
            .map_err(db_err)?;
        let Some((name, is_leader, is_vice_leader, storage_path)) = row else {
            continue;
        };
        students.push(json!({
            "id": id,
            "name": name,
            "isLeader": is_leader != 0,
            "isViceLeader": is_vice_leader != 0,
            "photoPath": storage_path
        }));
    }

    Ok(json!({
        "rows": plan.rows(),
        "cols": plan.cols(),
        "seats": plan.seats(),
        "students": students,
        "unplaced": plan.unplaced_students()
    }))
}

/// Load the persisted layout for a classroom against the given roster,
/// normalizing anything stale. A missing, unreadable, or dimensionally
/// invalid blob falls back to the default empty grid.
pub fn load_plan(
    conn: &Connection,
    classroom_id: &str,
    roster: Vec<String>,
) -> Result<SeatingPlan, HandlerErr> {
    let blob: Option<String> = conn
        .query_row(
            "SELECT layout_json FROM seat_maps WHERE classroom_id = ?",
            [classroom_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;

    let saved = blob.and_then(|text| serde_json::from_str::<SavedLayout>(&text).ok());
    let plan = match saved {
        Some(saved) => SeatingPlan::from_saved(&saved, roster.clone()).or_else(|_| {
            SeatingPlan::new(DEFAULT_ROWS as i64, DEFAULT_COLS as i64, roster)
        }),
        None => SeatingPlan::new(DEFAULT_ROWS as i64, DEFAULT_COLS as i64, roster),
    };
    plan.map_err(layout_err)
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let classroom_id = match required_str(&req.params, "classroomId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match classroom_info(conn, &classroom_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "classroom not found", None),
        Err(e) => return e.response(&req.id),
    }

    let roster = match active_student_ids(conn, &classroom_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let plan = match load_plan(conn, &classroom_id, roster) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let view = match session_view(conn, &plan) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    state.seating_sessions.insert(classroom_id, plan);
    ok(&req.id, view)
}

fn with_session(
    state: &mut AppState,
    req: &Request,
    apply: impl FnOnce(&mut SeatingPlan, &serde_json::Value) -> Result<(), HandlerErr>,
) -> serde_json::Value {
    let classroom_id = match required_str(&req.params, "classroomId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(plan) = state.seating_sessions.get_mut(&classroom_id) else {
        return err(
            &req.id,
            "not_found",
            "no open seating session for classroom",
            None,
        );
    };

    if let Err(e) = apply(plan, &req.params) {
        return e.response(&req.id);
    }
    match session_view(conn, plan) {
        Ok(view) => ok(&req.id, view),
        Err(e) => e.response(&req.id),
    }
}

fn handle_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_session(state, req, |plan, params| {
        let student_id = required_str(params, "studentId")?;
        let row = required_u64(params, "row")? as usize;
        let col = required_u64(params, "col")? as usize;
        plan.assign(&student_id, row, col).map_err(layout_err)
    })
}

fn handle_unassign(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_session(state, req, |plan, params| {
        let row = required_u64(params, "row")? as usize;
        let col = required_u64(params, "col")? as usize;
        plan.unassign(row, col).map_err(layout_err)
    })
}

fn handle_resize(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_session(state, req, |plan, params| {
        let rows = required_i64(params, "rows")?;
        let cols = required_i64(params, "cols")?;
        plan.resize(rows, cols).map_err(layout_err)
    })
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_session(state, req, |plan, _params| {
        plan.clear();
        Ok(())
    })
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let classroom_id = match required_str(&req.params, "classroomId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(plan) = state.seating_sessions.get(&classroom_id) else {
        return err(
            &req.id,
            "not_found",
            "no open seating session for classroom",
            None,
        );
    };

    let saved = plan.to_saved();
    let blob = match serde_json::to_string(&saved) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    let actor = actor_user_id(&req.params);

    // Last-writer-wins upsert: one layout per classroom, no history.
    if let Err(e) = conn.execute(
        "INSERT INTO seat_maps(classroom_id, layout_json, updated_at, updated_by)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(classroom_id) DO UPDATE SET
           layout_json = excluded.layout_json,
           updated_at = excluded.updated_at,
           updated_by = excluded.updated_by",
        (&classroom_id, &blob, now_rfc3339(), &actor),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "seat_maps" })),
        );
    }

    if let Err(e) = log_audit(
        conn,
        "UPDATE",
        "seat_maps",
        &classroom_id,
        &actor,
        json!({ "rows": saved.rows, "cols": saved.cols }),
    ) {
        return e.response(&req.id);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let classroom_id = match required_str(&req.params, "classroomId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let discarded = state.seating_sessions.remove(&classroom_id).is_some();
    ok(&req.id, json!({ "discarded": discarded }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "seating.open" => Some(handle_open(state, req)),
        "seating.assign" => Some(handle_assign(state, req)),
        "seating.unassign" => Some(handle_unassign(state, req)),
        "seating.resize" => Some(handle_resize(state, req)),
        "seating.clear" => Some(handle_clear(state, req)),
        "seating.save" => Some(handle_save(state, req)),
        "seating.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
