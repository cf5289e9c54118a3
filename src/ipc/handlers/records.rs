use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 120;

fn required_name(req: &Request) -> Result<String, serde_json::Value> {
    let name = required_str(req, "name")?;
    if name.len() > MAX_NAME_LEN {
        return Err(err(
            &req.id,
            "bad_params",
            format!("name length must be <= {}", MAX_NAME_LEN),
            None,
        ));
    }
    Ok(name)
}

fn insert_named(
    conn: &Connection,
    req: &Request,
    table: &'static str,
    id_key: &'static str,
    name: &str,
) -> serde_json::Value {
    let id = Uuid::new_v4().to_string();
    let sql = format!("INSERT INTO {}(id, name) VALUES(?, ?)", table);
    if let Err(e) = conn.execute(&sql, (&id, name)) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        );
    }
    let mut result = json!({ "name": name });
    result[id_key] = json!(id);
    ok(&req.id, result)
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_name(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    insert_named(conn, req, "classes", "classId", &name)
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_name(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    insert_named(conn, req, "subjects", "subjectId", &name)
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_name(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = optional_str(req, "email");

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, name, email) VALUES(?, ?, ?)",
        (&teacher_id, &name, &email),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    ok(
        &req.id,
        json!({ "teacherId": teacher_id, "name": name, "email": email }),
    )
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_name(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, class_id) VALUES(?, ?, ?)",
        (&student_id, &name, &class_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(
        &req.id,
        json!({ "studentId": student_id, "name": name, "classId": class_id }),
    )
}

fn handle_examinations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_name(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    // New examinations are dated today unless told otherwise.
    let date = match optional_str(req, "date") {
        None => chrono::Local::now().date_naive(),
        Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    "date must be YYYY-MM-DD",
                    Some(json!({ "date": raw })),
                )
            }
        },
    };
    let date = date.format("%Y-%m-%d").to_string();

    let examination_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO examinations(id, name, examination_date) VALUES(?, ?, ?)",
        (&examination_id, &name, &date),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "examinations" })),
        );
    }
    ok(
        &req.id,
        json!({ "examinationId": examination_id, "name": name, "date": date }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "examinations.create" => Some(handle_examinations_create(state, req)),
        _ => None,
    }
}
