use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, MarkEntry, MarksError, SessionStatus};
use crate::store::{SessionResolver, SqliteResultStore};
use serde_json::json;

fn marks_err(req: &Request, e: MarksError) -> serde_json::Value {
    if let MarksError::Storage(ref inner) = e {
        tracing::error!("marks write failed: {}", inner);
    }
    err(&req.id, e.code(), e.to_string(), None)
}

fn handle_sessions_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let examination_id = match required_str(req, "examinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = optional_str(req, "teacherId");

    match marks::open_session(
        conn,
        &examination_id,
        &class_id,
        &subject_id,
        teacher_id.as_deref(),
    ) {
        Ok(session) => ok(&req.id, json!(session)),
        Err(e) => marks_err(req, e),
    }
}

fn handle_sessions_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let examination_id = match required_str(req, "examinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let store = SqliteResultStore::new(conn);
    match store.find_session(&examination_id, &class_id, &subject_id) {
        Ok(session_id) => ok(&req.id, json!({ "sessionId": session_id })),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_sessions_lock(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match marks::lock_session(conn, &session_id) {
        Ok(()) => ok(
            &req.id,
            json!({ "sessionId": session_id, "status": SessionStatus::Locked.as_str() }),
        ),
        Err(e) => marks_err(req, e),
    }
}

fn handle_sessions_list_for_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let store = SqliteResultStore::new(conn);
    match store.sessions_for_teacher(&teacher_id) {
        Ok(Some(sessions)) => ok(
            &req.id,
            json!({ "teacherId": teacher_id, "sessions": sessions }),
        ),
        Ok(None) => err(
            &req.id,
            "not_found",
            format!("teacher not found: {}", teacher_id),
            None,
        ),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_marks_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("marks") else {
        return err(&req.id, "bad_params", "missing marks", None);
    };
    let entries: Vec<MarkEntry> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                "marks must be an array of { studentId, marks }",
                Some(json!({ "reason": e.to_string() })),
            )
        }
    };

    match marks::submit_marks(conn, &session_id, &entries) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => marks_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.open" => Some(handle_sessions_open(state, req)),
        "sessions.resolve" => Some(handle_sessions_resolve(state, req)),
        "sessions.lock" => Some(handle_sessions_lock(state, req)),
        "sessions.listForTeacher" => Some(handle_sessions_list_for_teacher(state, req)),
        "marks.submit" => Some(handle_marks_submit(state, req)),
        _ => None,
    }
}
