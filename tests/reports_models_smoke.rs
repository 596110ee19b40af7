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

struct Ids {
    classroom_id: String,
    student_ids: Vec<String>,
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Ids {
    result(&request(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    ));
    let school = request(
        stdin,
        reader,
        "seed-2",
        "schools.create",
        json!({ "name": "EMEF Relatórios" }),
    );
    let school_id = result(&school)
        .get("schoolId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let classroom = request(
        stdin,
        reader,
        "seed-3",
        "classrooms.create",
        json!({
            "schoolId": school_id,
            "yearGrade": "6º",
            "label": "A",
            "shift": "Manhã"
        }),
    );
    let classroom_id = result(&classroom)
        .get("classroomId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let mut student_ids = Vec::new();
    for (i, name) in [
        "Ana Beatriz",
        "Bruno Henrique de Albuquerque Cavalcante",
        "Carla Dias",
    ]
    .iter()
    .enumerate()
    {
        let created = request(
            stdin,
            reader,
            &format!("seed-s{}", i),
            "students.create",
            json!({ "classroomId": classroom_id, "name": name }),
        );
        student_ids.push(
            result(&created)
                .get("studentId")
                .and_then(|v| v.as_str())
                .unwrap()
                .to_string(),
        );
    }
    Ids {
        classroom_id,
        student_ids,
    }
}

#[test]
fn seating_model_lays_out_the_saved_grid() {
    let workspace = temp_dir("turmad-report-seating");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let ids = seed(&mut stdin, &mut reader, &workspace);

    result(&request(
        &mut stdin,
        &mut reader,
        "1",
        "students.setLeader",
        json!({ "studentId": ids.student_ids[0], "field": "isLeader", "value": true }),
    ));
    result(&request(
        &mut stdin,
        &mut reader,
        "2",
        "seating.open",
        json!({ "classroomId": ids.classroom_id }),
    ));
    result(&request(
        &mut stdin,
        &mut reader,
        "3",
        "seating.resize",
        json!({ "classroomId": ids.classroom_id, "rows": 2, "cols": 3 }),
    ));
    result(&request(
        &mut stdin,
        &mut reader,
        "4",
        "seating.assign",
        json!({
            "classroomId": ids.classroom_id,
            "studentId": ids.student_ids[0],
            "row": 0, "col": 0
        }),
    ));
    result(&request(
        &mut stdin,
        &mut reader,
        "5",
        "seating.assign",
        json!({
            "classroomId": ids.classroom_id,
            "studentId": ids.student_ids[1],
            "row": 1, "col": 2
        }),
    ));
    result(&request(
        &mut stdin,
        &mut reader,
        "6",
        "seating.save",
        json!({ "classroomId": ids.classroom_id }),
    ));

    let modeled = request(
        &mut stdin,
        &mut reader,
        "7",
        "reports.seatingModel",
        json!({ "classroomId": ids.classroom_id }),
    );
    let doc = result(&modeled);

    assert_eq!(doc.get("title").and_then(|v| v.as_str()), Some("Mapeamento de Sala"));
    assert_eq!(doc.get("pageWidth").and_then(|v| v.as_f64()), Some(297.0));
    assert_eq!(
        doc.get("board")
            .and_then(|b| b.get("label"))
            .and_then(|v| v.as_str()),
        Some("QUADRO")
    );

    let cells = doc.get("cells").and_then(|v| v.as_array()).unwrap();
    assert_eq!(cells.len(), 6);

    let occupant = |row: u64, col: u64| -> Option<serde_json::Value> {
        cells
            .iter()
            .find(|c| {
                c.get("row").and_then(|v| v.as_u64()) == Some(row)
                    && c.get("col").and_then(|v| v.as_u64()) == Some(col)
            })
            .and_then(|c| c.get("occupant"))
            .cloned()
    };

    let ana = occupant(0, 0).expect("cell (0,0) occupied");
    assert_eq!(ana.get("label").and_then(|v| v.as_str()), Some("Ana Beatriz"));
    assert_eq!(ana.get("annotation").and_then(|v| v.as_str()), Some("(L)"));

    // Long names are cut to the print budget.
    let bruno = occupant(1, 2).expect("cell (1,2) occupied");
    let label = bruno.get("label").and_then(|v| v.as_str()).unwrap();
    assert_eq!(label, "Bruno Henrique de ...");

    assert!(occupant(0, 1).is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn characterization_model_aggregates_survey_answers() {
    let workspace = temp_dir("turmad-report-char");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let ids = seed(&mut stdin, &mut reader, &workspace);

    let answers = [
        ("Alugada", "Matemática", true),
        ("Própria", "Matemática", true),
        ("Própria", "História", false),
    ];
    for (i, (moradia, disciplina, completed)) in answers.iter().enumerate() {
        result(&request(
            &mut stdin,
            &mut reader,
            &format!("b{}", i),
            "bioForm.save",
            json!({
                "studentId": ids.student_ids[i],
                "sections": {
                    "familia": { "tipo_moradia": moradia },
                    "vida_escolar": { "disciplina_preferida": disciplina }
                },
                "completed": completed,
                "role": "DT"
            }),
        ));
    }

    let modeled = request(
        &mut stdin,
        &mut reader,
        "1",
        "reports.characterizationModel",
        json!({
            "classroomId": ids.classroom_id,
            "statFields": [
                { "sectionId": "familia", "fieldId": "tipo_moradia" },
                { "sectionId": "vida_escolar", "fieldId": "disciplina_preferida" }
            ]
        }),
    );
    let model = result(&modeled);

    let general = model.get("general").unwrap();
    assert_eq!(general.get("total").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(general.get("bioCompleted").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(general.get("bioPending").and_then(|v| v.as_u64()), Some(1));

    let field_stats = model.get("fieldStats").and_then(|v| v.as_array()).unwrap();
    assert_eq!(field_stats.len(), 2);

    let moradia = field_stats[0].get("stats").and_then(|v| v.as_array()).unwrap();
    assert_eq!(
        moradia[0].get("label").and_then(|v| v.as_str()),
        Some("Própria")
    );
    assert_eq!(moradia[0].get("value").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        moradia[0].get("percentage").and_then(|v| v.as_i64()),
        Some(67)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn dashboard_stats_roll_up_per_classroom_counters() {
    let workspace = temp_dir("turmad-report-dash");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let ids = seed(&mut stdin, &mut reader, &workspace);

    result(&request(
        &mut stdin,
        &mut reader,
        "1",
        "bioForm.save",
        json!({
            "studentId": ids.student_ids[0],
            "sections": {},
            "completed": true,
            "role": "DT"
        }),
    ));
    result(&request(
        &mut stdin,
        &mut reader,
        "2",
        "photos.set",
        json!({
            "studentId": ids.student_ids[0],
            "storagePath": "photos/ana.jpg",
            "actorUserId": "dt-1"
        }),
    ));

    let stats = request(&mut stdin, &mut reader, "3", "dashboard.stats", json!({}));
    let model = result(&stats);
    let totals = model.get("totals").unwrap();
    assert_eq!(totals.get("schools").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(totals.get("classrooms").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(totals.get("students").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(totals.get("bioCompleted").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(totals.get("bioPending").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(totals.get("photosUploaded").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(totals.get("photosMissing").and_then(|v| v.as_u64()), Some(2));

    let classrooms = model.get("classrooms").and_then(|v| v.as_array()).unwrap();
    assert_eq!(classrooms.len(), 1);
    assert_eq!(
        classrooms[0].get("totalStudents").and_then(|v| v.as_u64()),
        Some(3)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
