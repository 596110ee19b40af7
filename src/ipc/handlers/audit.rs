use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, optional_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const AUDIT_LIST_MAX: i64 = 500;

fn audit_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entity = optional_str(params, "entity");
    let entity_id = optional_str(params, "entityId");
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(50)
        .clamp(1, AUDIT_LIST_MAX);

    let mut stmt = conn
        .prepare(
            "SELECT id, action, entity, entity_id, actor_user_id, metadata, created_at
             FROM audit_log
             WHERE (?1 IS NULL OR entity = ?1)
               AND (?2 IS NULL OR entity_id = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
        )
        .map_err(db_err)?;
    let entries = stmt
        .query_map((&entity, &entity_id, limit), |row| {
            let id: String = row.get(0)?;
            let action: String = row.get(1)?;
            let entity: String = row.get(2)?;
            let entity_id: String = row.get(3)?;
            let actor_user_id: String = row.get(4)?;
            let metadata_text: String = row.get(5)?;
            let created_at: Option<String> = row.get(6)?;
            Ok(json!({
                "id": id,
                "action": action,
                "entity": entity,
                "entityId": entity_id,
                "actorUserId": actor_user_id,
                "metadata": serde_json::from_str::<serde_json::Value>(&metadata_text)
                    .unwrap_or_else(|_| json!({})),
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method != "audit.list" {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match audit_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
