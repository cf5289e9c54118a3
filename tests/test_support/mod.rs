#![allow(dead_code)]

use serde_json::json;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

/// Ids of the records created by `seed_cohort`.
pub struct Seeded {
    pub class_id: String,
    pub teacher_id: String,
    pub mid_term_id: String,
    pub end_of_term_id: String,
    pub subjects: HashMap<&'static str, String>,
    pub students: HashMap<&'static str, String>,
}

impl Seeded {
    pub fn subject(&self, name: &str) -> &str {
        self.subjects.get(name).expect("seeded subject")
    }

    pub fn student(&self, name: &str) -> &str {
        self.students.get(name).expect("seeded student")
    }
}

pub const SUBJECTS: [&str; 5] = [
    "Mathematics",
    "English Language",
    "Integrated Science",
    "Social Studies",
    "French",
];

/// Mid-Term marks per student, in `SUBJECTS` order.
pub const MID_TERM_MARKS: [(&str, [f64; 5]); 3] = [
    ("Ama", [80.0, 70.0, 60.0, 50.0, 40.0]),
    ("Kofi", [90.0, 80.0, 60.0, 40.0, 40.0]),
    ("Esi", [70.0, 60.0, 60.0, 50.0, 50.0]),
];

/// Select a fresh workspace and file a small JHS 2A cohort:
/// a Mid-Term with five subjects for Ama, Kofi and Esi, an End of Term with
/// French only for Ama and Kofi, and Yaw with no results at all.
pub fn seed_cohort(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Seeded {
    let mut n = 0_u32;
    let mut call = |method: &str, params: serde_json::Value| {
        n += 1;
        request_ok(stdin, reader, &format!("seed-{}", n), method, params)
    };

    let _ = call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = str_field(&call("classes.create", json!({ "name": "JHS 2A" })), "classId");
    let teacher_id = str_field(
        &call(
            "teachers.create",
            json!({ "name": "Mr. Mensah", "email": "mensah@example.edu" }),
        ),
        "teacherId",
    );
    let mid_term_id = str_field(
        &call(
            "examinations.create",
            json!({ "name": "Mid-Term", "date": "2024-03-01" }),
        ),
        "examinationId",
    );
    let end_of_term_id = str_field(
        &call(
            "examinations.create",
            json!({ "name": "End of Term", "date": "2024-07-15" }),
        ),
        "examinationId",
    );

    let mut subjects = HashMap::new();
    for name in SUBJECTS {
        let id = str_field(&call("subjects.create", json!({ "name": name })), "subjectId");
        subjects.insert(name, id);
    }
    let mut students = HashMap::new();
    for name in ["Ama", "Kofi", "Esi", "Yaw"] {
        let id = str_field(
            &call(
                "students.create",
                json!({ "name": name, "classId": class_id.clone() }),
            ),
            "studentId",
        );
        students.insert(name, id);
    }

    for (i, subject) in SUBJECTS.iter().enumerate() {
        let session = call(
            "sessions.open",
            json!({
                "examinationId": mid_term_id.clone(),
                "classId": class_id.clone(),
                "subjectId": subjects[subject].clone(),
                "teacherId": teacher_id.clone(),
            }),
        );
        let marks: Vec<serde_json::Value> = MID_TERM_MARKS
            .iter()
            .map(|(student, row)| {
                json!({ "studentId": students[student].clone(), "marks": row[i] })
            })
            .collect();
        let _ = call(
            "marks.submit",
            json!({ "sessionId": str_field(&session, "id"), "marks": marks }),
        );
    }

    let session = call(
        "sessions.open",
        json!({
            "examinationId": end_of_term_id.clone(),
            "classId": class_id.clone(),
            "subjectId": subjects["French"].clone(),
        }),
    );
    let _ = call(
        "marks.submit",
        json!({
            "sessionId": str_field(&session, "id"),
            "marks": [
                { "studentId": students["Ama"].clone(), "marks": 65 },
                { "studentId": students["Kofi"].clone(), "marks": 55 }
            ]
        }),
    );

    Seeded {
        class_id,
        teacher_id,
        mid_term_id,
        end_of_term_id,
        subjects,
        students,
    }
}
