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
    let exe = env!("CARGO_BIN_EXE_schoolbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolbookd");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

const TERM: &str = "Term 3";
const EXAM_TYPE: &str = "End of Term";

struct Roster {
    student_id: String,
    subject_ids: Vec<(String, String)>, // (name, id)
}

fn seed_jhs_roster(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> Roster {
    let class = request(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "name": "JHS 2", "category": "JHS" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let student = request(
        stdin,
        reader,
        "seed-student",
        "students.create",
        json!({ "classId": class_id, "lastName": "Mensah", "firstName": "Ama" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    let subjects = [
        ("English Language", "ENG", "core"),
        ("Mathematics", "MAT", "core"),
        ("Integrated Science", "SCI", "core"),
        ("Social Studies", "SOC", "core"),
        ("Fante", "FAN", "elective"),
        ("Computing", "ICT", "elective"),
        ("Creative Arts", "CRA", "elective"),
        ("French", "FRE", "elective"),
    ];
    let mut subject_ids = Vec::new();
    for (i, (name, code, subject_type)) in subjects.iter().enumerate() {
        let created = request(
            stdin,
            reader,
            &format!("seed-subject-{i}"),
            "subjects.create",
            json!({
                "name": name,
                "code": code,
                "category": "JHS",
                "subjectType": subject_type
            }),
        );
        subject_ids.push((
            name.to_string(),
            created["subjectId"].as_str().expect("subjectId").to_string(),
        ));
    }

    Roster {
        student_id,
        subject_ids,
    }
}

fn subject_id(roster: &Roster, name: &str) -> String {
    roster
        .subject_ids
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, id)| id.clone())
        .expect("seeded subject")
}

fn enter_mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    roster: &Roster,
    name: &str,
    score: f64,
) -> serde_json::Value {
    request(
        stdin,
        reader,
        &format!("mark-{name}"),
        "marks.upsert",
        json!({
            "studentId": roster.student_id,
            "subjectId": subject_id(roster, name),
            "term": TERM,
            "examType": EXAM_TYPE,
            "score": score
        }),
    )
}

#[test]
fn worked_example_produces_aggregate_nine() {
    let workspace = temp_dir("schoolbook-worked-example");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let roster = seed_jhs_roster(&mut stdin, &mut reader);

    // Core: 100/98/90/67 -> grades 1/1/1/3 (sum 6).
    enter_mark(&mut stdin, &mut reader, &roster, "English Language", 100.0);
    enter_mark(&mut stdin, &mut reader, &roster, "Mathematics", 98.0);
    enter_mark(&mut stdin, &mut reader, &roster, "Integrated Science", 90.0);
    let social = enter_mark(&mut stdin, &mut reader, &roster, "Social Studies", 67.0);
    assert_eq!(social["grade"].as_i64(), Some(3));
    assert_eq!(social["gradeDescription"].as_str(), Some("HIGH"));

    // Electives: Fante 91 and Computing 86 beat Creative Arts 84 and
    // French 60 on raw score, so grades 1 and 2 are selected (sum 3).
    enter_mark(&mut stdin, &mut reader, &roster, "Fante", 91.0);
    enter_mark(&mut stdin, &mut reader, &roster, "Computing", 86.0);
    enter_mark(&mut stdin, &mut reader, &roster, "Creative Arts", 84.0);
    enter_mark(&mut stdin, &mut reader, &roster, "French", 60.0);

    let simple = request(
        &mut stdin,
        &mut reader,
        "calc",
        "aggregates.calculate",
        json!({ "studentId": roster.student_id, "term": TERM, "examType": EXAM_TYPE }),
    );
    assert_eq!(simple["aggregate"].as_f64(), Some(9.0));

    let detailed = request(
        &mut stdin,
        &mut reader,
        "breakdown",
        "aggregates.breakdown",
        json!({ "studentId": roster.student_id, "term": TERM, "examType": EXAM_TYPE }),
    );
    let breakdown = &detailed["breakdown"];
    assert_eq!(breakdown["aggregate"].as_f64(), Some(9.0));
    assert!(breakdown["error"].is_null());
    assert_eq!(breakdown["subjectScope"].as_str(), Some("categoryScoped"));

    let core = breakdown["coreSubjects"].as_array().expect("coreSubjects");
    assert_eq!(core.len(), 4);
    assert!(core.iter().all(|d| d["selected"].as_bool() == Some(true)));

    let selected = breakdown["selectedElectives"]
        .as_array()
        .expect("selectedElectives");
    let selected_names: Vec<&str> = selected
        .iter()
        .map(|d| d["subjectName"].as_str().expect("subjectName"))
        .collect();
    assert_eq!(selected_names, ["Fante", "Computing"]);
    assert!(selected.iter().all(|d| d["selected"].as_bool() == Some(true)));

    let all_electives = breakdown["allElectives"].as_array().expect("allElectives");
    let elective_scores: Vec<f64> = all_electives
        .iter()
        .map(|d| d["score"].as_f64().expect("score"))
        .collect();
    assert_eq!(elective_scores, [91.0, 86.0, 84.0, 60.0]);
    assert_eq!(all_electives[2]["selected"].as_bool(), Some(false));
    assert_eq!(all_electives[3]["selected"].as_bool(), Some(false));

    let details = &breakdown["calculationDetails"];
    assert_eq!(details["coreTotal"].as_i64(), Some(6));
    assert_eq!(details["electiveTotal"].as_i64(), Some(3));
    assert_eq!(details["aggregate"].as_i64(), Some(9));
    assert_eq!(details["coreCount"].as_i64(), Some(4));
    assert_eq!(details["electiveCount"].as_i64(), Some(2));
    assert_eq!(
        details["selectionMethod"].as_str(),
        Some("Highest scoring elective subjects selected")
    );

    // Both calculators agree on the same inputs.
    assert_eq!(breakdown["aggregate"], simple["aggregate"]);

    // Mark entry already refreshed the stored aggregate.
    let class_id = {
        let classes = request(&mut stdin, &mut reader, "classes", "classes.list", json!({}));
        classes["classes"][0]["id"]
            .as_str()
            .expect("class id")
            .to_string()
    };
    let students = request(
        &mut stdin,
        &mut reader,
        "students",
        "students.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(students["students"][0]["aggregate"].as_f64(), Some(9.0));

    let _ = child.kill();
}
