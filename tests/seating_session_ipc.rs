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

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

fn seat_at(view: &serde_json::Value, row: usize, col: usize) -> Option<String> {
    view.get("seats")
        .and_then(|s| s.get(row))
        .and_then(|r| r.get(col))
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn unplaced(view: &serde_json::Value) -> Vec<String> {
    view.get("unplaced")
        .and_then(|v| v.as_array())
        .expect("unplaced")
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}

struct Harness {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u32,
}

impl Harness {
    fn start(workspace: &PathBuf) -> Harness {
        let (child, stdin, reader) = spawn_sidecar();
        let mut h = Harness {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        let resp = h.call(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        result(&resp);
        h
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn seed_classroom(h: &mut Harness, names: &[&str]) -> (String, Vec<String>) {
    let school = h.call("schools.create", json!({ "name": "EMEF Sessão" }));
    let school_id = result(&school)
        .get("schoolId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let classroom = h.call(
        "classrooms.create",
        json!({
            "schoolId": school_id,
            "yearGrade": "7º",
            "label": "B",
            "shift": "Tarde"
        }),
    );
    let classroom_id = result(&classroom)
        .get("classroomId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let mut ids = Vec::new();
    for name in names {
        let created = h.call(
            "students.create",
            json!({ "classroomId": classroom_id, "name": name }),
        );
        ids.push(
            result(&created)
                .get("studentId")
                .and_then(|v| v.as_str())
                .unwrap()
                .to_string(),
        );
    }
    (classroom_id, ids)
}

#[test]
fn session_edits_persist_only_on_save() {
    let workspace = temp_dir("turmad-seating-session");
    let mut h = Harness::start(&workspace);
    // Names in alphabetical order so roster order matches creation order.
    let (classroom_id, ids) = seed_classroom(&mut h, &["Ana", "Bruno", "Carla"]);
    let (ana, bruno, carla) = (&ids[0], &ids[1], &ids[2]);

    let opened = h.call("seating.open", json!({ "classroomId": classroom_id }));
    let view = result(&opened);
    assert_eq!(view.get("rows").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(view.get("cols").and_then(|v| v.as_u64()), Some(6));
    assert_eq!(unplaced(view), vec![ana.clone(), bruno.clone(), carla.clone()]);

    let resp = h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": ana, "row": 0, "col": 0 }),
    );
    assert_eq!(seat_at(result(&resp), 0, 0).as_deref(), Some(ana.as_str()));

    // Dropping Bruno on Ana's seat evicts her; she is not relocated.
    let resp = h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": bruno, "row": 0, "col": 0 }),
    );
    let view = result(&resp);
    assert_eq!(seat_at(view, 0, 0).as_deref(), Some(bruno.as_str()));
    assert_eq!(unplaced(view), vec![ana.clone(), carla.clone()]);

    let resp = h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": carla, "row": 4, "col": 5 }),
    );
    result(&resp);

    // Shrinking drops Carla at (4,5) but keeps Bruno at (0,0).
    let resp = h.call(
        "seating.resize",
        json!({ "classroomId": classroom_id, "rows": 3, "cols": 3 }),
    );
    let view = result(&resp);
    assert_eq!(seat_at(view, 0, 0).as_deref(), Some(bruno.as_str()));
    assert_eq!(unplaced(view), vec![ana.clone(), carla.clone()]);

    // Close without saving: nothing was persisted yet.
    result(&h.call("seating.close", json!({ "classroomId": classroom_id })));
    let reopened = h.call("seating.open", json!({ "classroomId": classroom_id }));
    let view = result(&reopened);
    assert_eq!(view.get("rows").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(unplaced(view).len(), 3);

    // Now edit, save, reopen: the saved grid comes back verbatim.
    result(&h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": bruno, "row": 1, "col": 2 }),
    ));
    result(&h.call(
        "seating.resize",
        json!({ "classroomId": classroom_id, "rows": 4, "cols": 4 }),
    ));
    result(&h.call("seating.save", json!({ "classroomId": classroom_id })));
    result(&h.call("seating.close", json!({ "classroomId": classroom_id })));

    let reopened = h.call("seating.open", json!({ "classroomId": classroom_id }));
    let view = result(&reopened);
    assert_eq!(view.get("rows").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(view.get("cols").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(seat_at(view, 1, 2).as_deref(), Some(bruno.as_str()));
    assert_eq!(unplaced(view), vec![ana.clone(), carla.clone()]);

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn engine_errors_surface_with_typed_codes() {
    let workspace = temp_dir("turmad-seating-errors");
    let mut h = Harness::start(&workspace);
    let (classroom_id, ids) = seed_classroom(&mut h, &["Ana"]);

    result(&h.call("seating.open", json!({ "classroomId": classroom_id })));

    let resp = h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": "ghost", "row": 0, "col": 0 }),
    );
    assert_eq!(error_code(&resp), "unknown_student");

    let resp = h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": ids[0], "row": 9, "col": 0 }),
    );
    assert_eq!(error_code(&resp), "out_of_bounds");

    let resp = h.call(
        "seating.unassign",
        json!({ "classroomId": classroom_id, "row": 0, "col": 42 }),
    );
    assert_eq!(error_code(&resp), "out_of_bounds");

    let resp = h.call(
        "seating.resize",
        json!({ "classroomId": classroom_id, "rows": 0, "cols": 3 }),
    );
    assert_eq!(error_code(&resp), "invalid_dimensions");

    // A failed transition leaves the session usable.
    let resp = h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": ids[0], "row": 0, "col": 0 }),
    );
    assert_eq!(seat_at(result(&resp), 0, 0).as_deref(), Some(ids[0].as_str()));

    let resp = h.call(
        "seating.assign",
        json!({ "classroomId": "nope", "studentId": ids[0], "row": 0, "col": 0 }),
    );
    assert_eq!(error_code(&resp), "not_found");

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn stale_persisted_occupants_are_dropped_on_reopen() {
    let workspace = temp_dir("turmad-seating-stale");
    let mut h = Harness::start(&workspace);
    let (classroom_id, ids) = seed_classroom(&mut h, &["Ana", "Bruno"]);
    let (ana, bruno) = (&ids[0], &ids[1]);

    result(&h.call("seating.open", json!({ "classroomId": classroom_id })));
    result(&h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": ana, "row": 0, "col": 0 }),
    ));
    result(&h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": bruno, "row": 1, "col": 1 }),
    ));
    result(&h.call("seating.save", json!({ "classroomId": classroom_id })));
    result(&h.call("seating.close", json!({ "classroomId": classroom_id })));

    // Bruno leaves the school; his saved seat must not break the next open.
    result(&h.call("students.delete", json!({ "studentId": bruno })));

    let reopened = h.call("seating.open", json!({ "classroomId": classroom_id }));
    let view = result(&reopened);
    assert_eq!(seat_at(view, 0, 0).as_deref(), Some(ana.as_str()));
    assert_eq!(seat_at(view, 1, 1), None);
    assert!(unplaced(view).is_empty());

    // Deactivated students fall off the roster the same way.
    result(&h.call(
        "students.update",
        json!({ "studentId": ana, "patch": { "status": "Inativo" } }),
    ));
    let reopened = h.call("seating.open", json!({ "classroomId": classroom_id }));
    let view = result(&reopened);
    assert_eq!(seat_at(view, 0, 0), None);
    assert!(unplaced(view).is_empty());

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn clear_empties_every_seat_and_keeps_the_grid() {
    let workspace = temp_dir("turmad-seating-clear");
    let mut h = Harness::start(&workspace);
    let (classroom_id, ids) = seed_classroom(&mut h, &["Ana", "Bruno"]);

    result(&h.call("seating.open", json!({ "classroomId": classroom_id })));
    result(&h.call(
        "seating.resize",
        json!({ "classroomId": classroom_id, "rows": 2, "cols": 7 }),
    ));
    result(&h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": ids[0], "row": 0, "col": 6 }),
    ));
    result(&h.call(
        "seating.assign",
        json!({ "classroomId": classroom_id, "studentId": ids[1], "row": 1, "col": 0 }),
    ));

    let resp = h.call("seating.clear", json!({ "classroomId": classroom_id }));
    let view = result(&resp);
    assert_eq!(view.get("rows").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(view.get("cols").and_then(|v| v.as_u64()), Some(7));
    assert_eq!(unplaced(view).len(), 2);
    for row in 0..2 {
        for col in 0..7 {
            assert_eq!(seat_at(view, row, col), None);
        }
    }

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
