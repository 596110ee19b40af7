use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn workspace_path(state: &AppState, params: &serde_json::Value) -> Result<PathBuf, HandlerErr> {
    if let Some(p) = params.get("workspacePath").and_then(|v| v.as_str()) {
        return Ok(PathBuf::from(p));
    }
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match workspace_path(state, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let out_path = match required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match workspace_path(state, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let in_path = match required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // Release the connection before the database file is replaced.
    let is_current = state.workspace.as_deref() == Some(workspace.as_path());
    if is_current {
        state.db = None;
        state.seating_sessions.clear();
    }

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(v) => v,
        Err(e) => {
            if is_current {
                // Best-effort reopen of whatever is on disk now.
                state.db = db::open_db(&workspace).ok();
            }
            return err(&req.id, "bad_bundle", format!("{e:#}"), None);
        }
    };

    if is_current {
        match db::open_db(&workspace) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }

    ok(
        &req.id,
        json!({ "bundleFormatDetected": summary.bundle_format_detected }),
    )
}

fn export_students_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let out_path = PathBuf::from(required_str(params, "outPath")?);

    let mut stmt = conn
        .prepare(
            "SELECT name, enrollment_code, birthdate, responsible_name, responsible_phone, status
             FROM students
             WHERE classroom_id = ?
             ORDER BY name",
        )
        .map_err(db_err)?;
    let rows: Vec<(String, Option<String>, Option<String>, Option<String>, Option<String>, String)> =
        stmt.query_map([&classroom_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut csv =
        String::from("Nome,Matrícula,Nascimento,Responsável,Telefone,Situação\n");
    for (name, code, birth, responsible, phone, status) in &rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_quote(name),
            csv_quote(code.as_deref().unwrap_or("")),
            csv_quote(birth.as_deref().unwrap_or("")),
            csv_quote(responsible.as_deref().unwrap_or("")),
            csv_quote(phone.as_deref().unwrap_or("")),
            csv_quote(status),
        ));
    }

    std::fs::write(&out_path, csv).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "rowCount": rows.len()
    }))
}

fn handle_export_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match export_students_csv(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        "exchange.exportStudentsCsv" => Some(handle_export_students_csv(state, req)),
        _ => None,
    }
}
