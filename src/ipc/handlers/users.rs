use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, db_err, log_audit, now_rfc3339, optional_str, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const ALL_ROLES: [Role; 5] = [
    Role::AdminSme,
    Role::CoordPpdt,
    Role::GestorEscola,
    Role::Dt,
    Role::Aluno,
];

fn roles_list() -> serde_json::Value {
    let roles: Vec<serde_json::Value> = ALL_ROLES
        .iter()
        .map(|r| {
            json!({
                "role": r.as_str(),
                "label": r.label(),
                "permissions": r.permissions()
            })
        })
        .collect();
    json!({ "roles": roles })
}

fn profiles_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, role, school_id, classroom_id, full_name
             FROM profiles
             ORDER BY full_name",
        )
        .map_err(db_err)?;
    let profiles = stmt
        .query_map([], |row| {
            let user_id: String = row.get(0)?;
            let role: String = row.get(1)?;
            let school_id: Option<String> = row.get(2)?;
            let classroom_id: Option<String> = row.get(3)?;
            let full_name: String = row.get(4)?;
            Ok(json!({
                "userId": user_id,
                "role": role,
                "roleLabel": Role::parse(&role).map(|r| r.label()),
                "schoolId": school_id,
                "classroomId": classroom_id,
                "fullName": full_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "profiles": profiles }))
}

fn profiles_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let full_name = required_str(params, "fullName")?;
    let role_raw = required_str(params, "role")?;
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "unknown role",
            json!({ "role": role_raw }),
        ));
    };
    let school_id = optional_str(params, "schoolId");
    let classroom_id = optional_str(params, "classroomId");

    conn.execute(
        "INSERT INTO profiles(user_id, role, school_id, classroom_id, full_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            role.as_str(),
            &school_id,
            &classroom_id,
            &full_name,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "profiles" }),
        )
    })?;

    log_audit(
        conn,
        "CREATE",
        "profiles",
        &user_id,
        &actor_user_id(params),
        json!({ "role": role.as_str() }),
    )?;

    Ok(json!({ "userId": user_id, "role": role.as_str() }))
}

fn profiles_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM profiles WHERE user_id = ?", [&user_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "profile not found"));
    }

    conn.execute("DELETE FROM profiles WHERE user_id = ?", [&user_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "profiles" }),
            )
        })?;

    log_audit(
        conn,
        "DELETE",
        "profiles",
        &user_id,
        &actor_user_id(params),
        json!({}),
    )?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method == "roles.list" {
        return Some(ok(&req.id, roles_list()));
    }

    let f = match req.method.as_str() {
        "profiles.list" => profiles_list,
        "profiles.create" => profiles_create,
        "profiles.delete" => profiles_delete,
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
