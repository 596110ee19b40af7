use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_turmad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn turmad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response, got {}",
        resp
    );
    resp.get("result").expect("result")
}

#[test]
fn bundle_export_then_import_restores_the_workspace() {
    let src_workspace = temp_dir("turmad-backup-src");
    let dst_workspace = temp_dir("turmad-backup-dst");
    let bundle = src_workspace.join("escola.turmabackup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    result(&request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": src_workspace.to_string_lossy() }),
    ));
    let school = request(
        &mut stdin,
        &mut reader,
        "2",
        "schools.create",
        json!({ "name": "EMEF Cópia", "inep": "11111111" }),
    );
    let school_id = result(&school)
        .get("schoolId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    result(&request(
        &mut stdin,
        &mut reader,
        "3",
        "classrooms.create",
        json!({
            "schoolId": school_id,
            "yearGrade": "6º",
            "label": "A",
            "shift": "Manhã"
        }),
    ));

    let exported = request(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    let summary = result(&exported);
    assert_eq!(
        summary.get("bundleFormat").and_then(|v| v.as_str()),
        Some("turma-workspace-v1")
    );
    let sha = summary
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("dbSha256");
    assert_eq!(sha.len(), 64);
    assert!(bundle.is_file());

    // Restore into a second workspace and check the data came along.
    let imported = request(
        &mut stdin,
        &mut reader,
        "5",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": dst_workspace.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        result(&imported)
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("turma-workspace-v1")
    );

    result(&request(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": dst_workspace.to_string_lossy() }),
    ));
    let listed = request(&mut stdin, &mut reader, "7", "schools.list", json!({}));
    let schools = result(&listed)
        .get("schools")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(schools.len(), 1);
    assert_eq!(
        schools[0].get("name").and_then(|v| v.as_str()),
        Some("EMEF Cópia")
    );
    assert_eq!(
        schools[0].get("classroomCount").and_then(|v| v.as_i64()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(src_workspace);
    let _ = std::fs::remove_dir_all(dst_workspace);
}

#[test]
fn import_rejects_a_foreign_bundle_format() {
    let workspace = temp_dir("turmad-backup-bad");
    let bogus = workspace.join("bogus.zip");
    // A zip signature with garbage after it is not a workspace bundle.
    std::fs::write(&bogus, [0x50, 0x4B, 0x03, 0x04, 0, 0, 0, 0]).expect("write bogus zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bogus.to_string_lossy()
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_bundle")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
