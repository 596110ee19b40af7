use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_user_id, db_err, log_audit, now_rfc3339, optional_str, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

const FIELD_ALIASES: [(&str, &[&str]); 5] = [
    (
        "name",
        &["nome", "name", "aluno", "nome_aluno", "nome_do_aluno", "student_name"],
    ),
    (
        "enrollmentCode",
        &["matricula", "matrícula", "enrollment", "código", "codigo", "enrollment_code"],
    ),
    (
        "birthdate",
        &["nascimento", "birthdate", "data_nascimento", "dt_nasc", "birth_date"],
    ),
    (
        "responsibleName",
        &["responsavel", "responsável", "responsible", "pai_mae", "nome_responsavel"],
    ),
    (
        "responsiblePhone",
        &["telefone", "phone", "fone", "cel", "celular", "contato"],
    ),
];

/// Guess which import field a spreadsheet column holds. Headers arrive in
/// whatever casing and language the school's export produced.
pub fn normalize_header(header: &str) -> Option<&'static str> {
    let lower = header.trim().to_lowercase();
    let canon: String = lower
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    // An exact alias wins over a substring hit, so "nome_responsavel"
    // maps to the responsible field rather than the student name.
    for (field, aliases) in FIELD_ALIASES {
        if aliases.contains(&canon.as_str()) {
            return Some(field);
        }
    }
    for (field, aliases) in FIELD_ALIASES {
        if aliases.iter().any(|a| canon.contains(a)) {
            return Some(field);
        }
    }
    None
}

/// Accepts `dd/mm/yyyy` (and `-` separated) or ISO `yyyy-mm-dd`; anything
/// else is dropped rather than guessed.
pub fn normalize_birthdate(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    let parts: Vec<&str> = t.split(['/', '-']).collect();
    if parts.len() != 3 {
        return None;
    }
    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let (year, month, day) = if parts[0].len() == 4 {
        (nums[0], nums[1], nums[2])
    } else {
        (nums[2], nums[1], nums[0])
    };
    if year < 1000 || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(format!("{:04}-{:02}-{:02}", year, month, day))
}

#[derive(Debug, Clone, Default)]
struct ImportRow {
    line_no: usize,
    name: String,
    enrollment_code: Option<String>,
    birthdate: Option<String>,
    birthdate_raw: Option<String>,
    responsible_name: Option<String>,
    responsible_phone: Option<String>,
}

fn parse_roster_csv(text: &str) -> (Vec<(String, &'static str)>, Vec<ImportRow>, usize) {
    let mut lines = text.lines();
    let Some(header_line) = lines.next() else {
        return (Vec::new(), Vec::new(), 0);
    };

    let headers = parse_csv_record(header_line);
    let mut columns: Vec<Option<&'static str>> = Vec::with_capacity(headers.len());
    let mut header_map: Vec<(String, &'static str)> = Vec::new();
    for h in &headers {
        let field = normalize_header(h);
        if let Some(field) = field {
            header_map.push((h.trim().to_string(), field));
        }
        columns.push(field);
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (idx, raw_line) in lines.enumerate() {
        if raw_line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_record(raw_line);
        let mut row = ImportRow {
            // Header is line 1; data starts at line 2.
            line_no: idx + 2,
            ..Default::default()
        };
        for (col, value) in fields.iter().enumerate() {
            let Some(Some(field)) = columns.get(col) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match *field {
                "name" => row.name = value.to_string(),
                "enrollmentCode" => row.enrollment_code = Some(value.to_string()),
                "birthdate" => {
                    row.birthdate_raw = Some(value.to_string());
                    row.birthdate = normalize_birthdate(value);
                }
                "responsibleName" => row.responsible_name = Some(value.to_string()),
                "responsiblePhone" => row.responsible_phone = Some(value.to_string()),
                _ => {}
            }
        }
        if row.name.is_empty() {
            skipped += 1;
            continue;
        }
        rows.push(row);
    }
    (header_map, rows, skipped)
}

fn import_preview(
    _conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let text = required_str(params, "text")?;
    let (header_map, rows, skipped) = parse_roster_csv(&text);

    let header_json: Vec<serde_json::Value> = header_map
        .iter()
        .map(|(orig, field)| json!({ "header": orig, "field": field }))
        .collect();
    let rows_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "lineNo": r.line_no,
                "name": r.name,
                "enrollmentCode": r.enrollment_code,
                "birthdate": r.birthdate,
                "birthdateRaw": r.birthdate_raw,
                "responsibleName": r.responsible_name,
                "responsiblePhone": r.responsible_phone
            })
        })
        .collect();

    Ok(json!({
        "headerMap": header_json,
        "rows": rows_json,
        "rowCount": rows_json.len(),
        "skipped": skipped
    }))
}

fn import_apply(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let text = required_str(params, "text")?;
    let file_name = optional_str(params, "fileName");
    let actor = actor_user_id(params);

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

    let (_header_map, rows, skipped) = parse_roster_csv(&text);

    let mut inserted = 0usize;
    let mut updated = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for row in &rows {
        // Duplicate detection keys on enrollment code plus birthdate, the
        // same pair a school's paper records disambiguate on.
        let existing: Option<String> = match (&row.enrollment_code, &row.birthdate) {
            (Some(code), Some(birth)) => tx
                .query_row(
                    "SELECT id FROM students WHERE enrollment_code = ? AND birthdate = ?",
                    (code, birth),
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?,
            _ => None,
        };

        if let Some(student_id) = existing {
            let res = tx.execute(
                "UPDATE students
                 SET name = ?, school_id = ?, classroom_id = ?,
                     responsible_name = ?, responsible_phone = ?
                 WHERE id = ?",
                (
                    &row.name,
                    &school_id,
                    &classroom_id,
                    &row.responsible_name,
                    &row.responsible_phone,
                    &student_id,
                ),
            );
            match res {
                Ok(_) => updated += 1,
                Err(e) => errors.push(json!({
                    "lineNo": row.line_no,
                    "name": row.name,
                    "message": e.to_string()
                })),
            }
            continue;
        }

        let student_id = Uuid::new_v4().to_string();
        let res = tx.execute(
            "INSERT INTO students(id, school_id, classroom_id, enrollment_code, name, birthdate,
                                  responsible_name, responsible_phone, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'Ativo', ?)",
            (
                &student_id,
                &school_id,
                &classroom_id,
                &row.enrollment_code,
                &row.name,
                &row.birthdate,
                &row.responsible_name,
                &row.responsible_phone,
                now_rfc3339(),
            ),
        );
        match res {
            Ok(_) => {
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
                inserted += 1;
            }
            Err(e) => errors.push(json!({
                "lineNo": row.line_no,
                "name": row.name,
                "message": e.to_string()
            })),
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log_audit(
        conn,
        "IMPORT",
        "students",
        &classroom_id,
        &actor,
        json!({
            "file": file_name,
            "inserted": inserted,
            "updated": updated,
            "errors": errors.len()
        }),
    )?;

    Ok(json!({
        "inserted": inserted,
        "updated": updated,
        "skipped": skipped,
        "errors": errors
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f = match req.method.as_str() {
        "students.importPreview" => import_preview,
        "students.importApply" => import_apply,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_guessing_covers_common_aliases() {
        assert_eq!(normalize_header("Nome do Aluno"), Some("name"));
        assert_eq!(normalize_header("MATRÍCULA"), Some("enrollmentCode"));
        assert_eq!(normalize_header("Data Nascimento"), Some("birthdate"));
        assert_eq!(normalize_header("responsável"), Some("responsibleName"));
        assert_eq!(normalize_header("Celular"), Some("responsiblePhone"));
        assert_eq!(normalize_header("Observações"), None);
    }

    #[test]
    fn birthdate_accepts_brazilian_and_iso_forms() {
        assert_eq!(
            normalize_birthdate("15/03/2014").as_deref(),
            Some("2014-03-15")
        );
        assert_eq!(
            normalize_birthdate("7-1-2013").as_deref(),
            Some("2013-01-07")
        );
        assert_eq!(
            normalize_birthdate("2014-03-15").as_deref(),
            Some("2014-03-15")
        );
        assert_eq!(normalize_birthdate("15.03.2014"), None);
        assert_eq!(normalize_birthdate("32/13/2014"), None);
    }

    #[test]
    fn rows_without_a_name_are_skipped() {
        let csv = "Nome,Matrícula\nAna Souza,MAT001\n,MAT002\n";
        let (map, rows, skipped) = parse_roster_csv(csv);
        assert_eq!(map.len(), 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Ana Souza");
        assert_eq!(rows[0].line_no, 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn quoted_fields_keep_embedded_commas() {
        let fields = parse_csv_record("\"Silva, João\",MAT001,\"diz \"\"oi\"\"\"");
        assert_eq!(fields, vec!["Silva, João", "MAT001", "diz \"oi\""]);
    }
}
