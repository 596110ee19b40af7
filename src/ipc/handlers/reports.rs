use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    active_student_ids, classroom_info, db_err, optional_str, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::render::{render_seating, PageConfig, PhotoResolver, SeatStudent};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;

use super::seating::load_plan;

/// Resolves stored photo paths against the workspace directory. A missing
/// or unreadable file fails that one cell, nothing more.
struct WorkspacePhotos {
    root: PathBuf,
}

impl PhotoResolver for WorkspacePhotos {
    fn resolve(&self, photo_ref: &str) -> anyhow::Result<String> {
        let path = self.root.join(photo_ref);
        if !path.is_file() {
            return Err(anyhow::anyhow!(
                "photo not found: {}",
                path.to_string_lossy()
            ));
        }
        Ok(path.to_string_lossy().to_string())
    }
}

fn page_config(params: &serde_json::Value) -> PageConfig {
    let mut config = PageConfig::default();
    if let Some(w) = params.get("pageWidth").and_then(|v| v.as_f64()) {
        if w > 0.0 {
            config.width = w;
        }
    }
    if let Some(h) = params.get("pageHeight").and_then(|v| v.as_f64()) {
        if h > 0.0 {
            config.height = h;
        }
    }
    config
}

fn seat_students(
    conn: &Connection,
    classroom_id: &str,
) -> Result<HashMap<String, SeatStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.is_leader, s.is_vice_leader, p.storage_path
             FROM students s
             LEFT JOIN student_photos p ON p.student_id = s.id
             WHERE s.classroom_id = ? AND s.status = 'Ativo'",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([classroom_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let is_leader: i64 = r.get(2)?;
            let is_vice_leader: i64 = r.get(3)?;
            let storage_path: Option<String> = r.get(4)?;
            Ok((
                id,
                SeatStudent {
                    display_name: name,
                    is_leader: is_leader != 0,
                    is_vice_leader: is_vice_leader != 0,
                    photo_ref: storage_path,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(rows.into_iter().collect())
}

fn handle_seating_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let classroom_id = match required_str(&req.params, "classroomId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let info = match classroom_info(conn, &classroom_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "classroom not found", None),
        Err(e) => return e.response(&req.id),
    };

    // Prefer the open editing session; fall back to the persisted layout.
    let plan = match state.seating_sessions.get(&classroom_id) {
        Some(plan) => plan.clone(),
        None => {
            let roster = match active_student_ids(conn, &classroom_id) {
                Ok(v) => v,
                Err(e) => return e.response(&req.id),
            };
            match load_plan(conn, &classroom_id, roster) {
                Ok(v) => v,
                Err(e) => return e.response(&req.id),
            }
        }
    };

    let students = match seat_students(conn, &classroom_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let photos = WorkspacePhotos {
        root: state
            .workspace
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let doc = render_seating(
        &plan,
        &students,
        &photos,
        &page_config(&req.params),
        "Mapeamento de Sala",
        &info.subtitle(),
    );
    match serde_json::to_value(&doc) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "server_error", e.to_string(), None),
    }
}

fn class_list_model(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let info = classroom_info(conn, &classroom_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "classroom not found"))?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.enrollment_code, s.name, s.birthdate, s.responsible_name, s.status,
                    s.is_leader, s.is_vice_leader,
                    COALESCE(b.completed, 0),
                    p.student_id IS NOT NULL
             FROM students s
             LEFT JOIN bio_forms b ON b.student_id = s.id
             LEFT JOIN student_photos p ON p.student_id = s.id
             WHERE s.classroom_id = ?
             ORDER BY s.name",
        )
        .map_err(db_err)?;
    let students = stmt
        .query_map([&classroom_id], |row| {
            let id: String = row.get(0)?;
            let enrollment_code: Option<String> = row.get(1)?;
            let name: String = row.get(2)?;
            let birthdate: Option<String> = row.get(3)?;
            let responsible_name: Option<String> = row.get(4)?;
            let status: String = row.get(5)?;
            let is_leader: i64 = row.get(6)?;
            let is_vice_leader: i64 = row.get(7)?;
            let bio_completed: i64 = row.get(8)?;
            let has_photo: bool = row.get(9)?;
            Ok(json!({
                "id": id,
                "enrollmentCode": enrollment_code,
                "name": name,
                "birthdate": birthdate,
                "responsibleName": responsible_name,
                "status": status,
                "isLeader": is_leader != 0,
                "isViceLeader": is_vice_leader != 0,
                "bioCompleted": bio_completed != 0,
                "hasPhoto": has_photo
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({
        "classroom": {
            "id": info.id,
            "schoolId": info.school_id,
            "schoolName": info.school_name,
            "yearGrade": info.year_grade,
            "label": info.label,
            "shift": info.shift,
            "subtitle": info.subtitle()
        },
        "students": students
    }))
}

/// Frequency table for one survey answer across a classroom, the shape the
/// statistics report charts from.
fn field_stats(
    rows: &[(String, serde_json::Value)],
    section_id: &str,
    field_id: &str,
) -> Vec<serde_json::Value> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for (_, sections) in rows {
        let value = sections
            .get(section_id)
            .and_then(|s| s.get(field_id))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if value.is_empty() {
            continue;
        }
        *counts.entry(value.to_string()).or_insert(0) += 1;
        total += 1;
    }

    let mut stats: Vec<(String, usize)> = counts.into_iter().collect();
    stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    stats
        .into_iter()
        .map(|(label, value)| {
            let percentage = if total > 0 {
                ((value as f64 / total as f64) * 100.0).round() as i64
            } else {
                0
            };
            json!({ "label": label, "value": value, "percentage": percentage })
        })
        .collect()
}

fn characterization_model(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let info = classroom_info(conn, &classroom_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "classroom not found"))?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.birthdate, s.responsible_name, s.status,
                    COALESCE(b.sections_json, '{}'), COALESCE(b.completed, 0)
             FROM students s
             LEFT JOIN bio_forms b ON b.student_id = s.id
             WHERE s.classroom_id = ?
             ORDER BY s.name",
        )
        .map_err(db_err)?;
    let raw_rows = stmt
        .query_map([&classroom_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let birthdate: Option<String> = row.get(2)?;
            let responsible_name: Option<String> = row.get(3)?;
            let status: String = row.get(4)?;
            let sections_text: String = row.get(5)?;
            let completed: i64 = row.get(6)?;
            Ok((id, name, birthdate, responsible_name, status, sections_text, completed))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut rows_json = Vec::with_capacity(raw_rows.len());
    let mut section_rows: Vec<(String, serde_json::Value)> = Vec::with_capacity(raw_rows.len());
    let mut bio_completed = 0usize;
    for (id, name, birthdate, responsible_name, status, sections_text, completed) in raw_rows {
        let sections: serde_json::Value =
            serde_json::from_str(&sections_text).unwrap_or_else(|_| json!({}));
        if completed != 0 {
            bio_completed += 1;
        }
        rows_json.push(json!({
            "studentId": id,
            "name": name,
            "birthdate": birthdate,
            "responsibleName": responsible_name,
            "status": status,
            "sections": sections,
            "bioCompleted": completed != 0
        }));
        section_rows.push((id, sections));
    }

    let mut stats_json = Vec::new();
    if let Some(stat_fields) = params.get("statFields").and_then(|v| v.as_array()) {
        for requested in stat_fields {
            let Some(section_id) = requested.get("sectionId").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(field_id) = requested.get("fieldId").and_then(|v| v.as_str()) else {
                continue;
            };
            stats_json.push(json!({
                "sectionId": section_id,
                "fieldId": field_id,
                "stats": field_stats(&section_rows, section_id, field_id)
            }));
        }
    }

    let total = rows_json.len();
    Ok(json!({
        "classroom": {
            "id": info.id,
            "schoolName": info.school_name,
            "yearGrade": info.year_grade,
            "label": info.label,
            "shift": info.shift,
            "subtitle": info.subtitle()
        },
        "rows": rows_json,
        "general": {
            "total": total,
            "bioCompleted": bio_completed,
            "bioPending": total - bio_completed
        },
        "fieldStats": stats_json
    }))
}

fn dashboard_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_filter = optional_str(params, "schoolId");
    let classroom_filter = optional_str(params, "classroomId");

    let total_schools: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM schools WHERE (?1 IS NULL OR id = ?1)",
            [&school_filter],
            |r| r.get(0),
        )
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.school_id,
               s.name,
               c.year_grade,
               c.label,
               c.shift,
               (SELECT COUNT(*) FROM students st WHERE st.classroom_id = c.id) AS total_students,
               (SELECT COUNT(*) FROM students st
                  JOIN bio_forms b ON b.student_id = st.id
                WHERE st.classroom_id = c.id AND b.completed = 1) AS bio_completed,
               (SELECT COUNT(*) FROM students st
                  JOIN student_photos p ON p.student_id = st.id
                WHERE st.classroom_id = c.id) AS photos_uploaded
             FROM classrooms c
             JOIN schools s ON s.id = c.school_id
             WHERE (?1 IS NULL OR c.school_id = ?1)
               AND (?2 IS NULL OR c.id = ?2)
             ORDER BY s.name, c.year_grade, c.label",
        )
        .map_err(db_err)?;
    let classroom_rows: Vec<(serde_json::Value, i64, i64, i64)> = stmt
        .query_map((&school_filter, &classroom_filter), |row| {
            let id: String = row.get(0)?;
            let school_id: String = row.get(1)?;
            let school_name: String = row.get(2)?;
            let year_grade: String = row.get(3)?;
            let label: String = row.get(4)?;
            let shift: String = row.get(5)?;
            let total_students: i64 = row.get(6)?;
            let bio_completed: i64 = row.get(7)?;
            let photos_uploaded: i64 = row.get(8)?;
            let j = json!({
                "classroomId": id,
                "schoolId": school_id,
                "schoolName": school_name,
                "yearGrade": year_grade,
                "label": label,
                "shift": shift,
                "totalStudents": total_students,
                "bioCompleted": bio_completed,
                "bioPending": total_students - bio_completed,
                "photosUploaded": photos_uploaded,
                "photosMissing": total_students - photos_uploaded
            });
            Ok((j, total_students, bio_completed, photos_uploaded))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let total_classrooms = classroom_rows.len() as i64;
    let total_students: i64 = classroom_rows.iter().map(|r| r.1).sum();
    let bio_completed: i64 = classroom_rows.iter().map(|r| r.2).sum();
    let photos_uploaded: i64 = classroom_rows.iter().map(|r| r.3).sum();
    let classrooms: Vec<serde_json::Value> =
        classroom_rows.into_iter().map(|r| r.0).collect();

    Ok(json!({
        "totals": {
            "schools": total_schools,
            "classrooms": total_classrooms,
            "students": total_students,
            "bioCompleted": bio_completed,
            "bioPending": total_students - bio_completed,
            "photosUploaded": photos_uploaded,
            "photosMissing": total_students - photos_uploaded
        },
        "classrooms": classrooms
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method == "reports.seatingModel" {
        return Some(handle_seating_model(state, req));
    }

    let f = match req.method.as_str() {
        "reports.classListModel" => class_list_model,
        "reports.characterizationModel" => characterization_model,
        "dashboard.stats" => dashboard_stats,
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
