use crate::config;
use crate::error::ReportError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, GeneralResultsFilter};
use crate::store::SqliteResultStore;
use serde_json::json;

fn report_err(req: &Request, e: ReportError) -> serde_json::Value {
    if e.is_retryable() {
        tracing::error!(method = %req.method, "report request failed: {}", e);
    }
    err(
        &req.id,
        e.code(),
        e.to_string(),
        Some(json!({ "retryable": e.is_retryable() })),
    )
}

fn parse_filter(req: &Request) -> Result<GeneralResultsFilter, serde_json::Value> {
    let Some(raw) = req.params.get("filter") else {
        return Ok(GeneralResultsFilter::All);
    };
    if raw.is_null() {
        return Ok(GeneralResultsFilter::All);
    }
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            "filter must be {\"kind\":\"all\"} or \
             {\"kind\":\"specific\", examinationId, classId, subjectId}",
            Some(json!({ "reason": e.to_string() })),
        )
    })
}

fn handle_student_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match config::load_reports_config(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let store = SqliteResultStore::new(conn);
    match report::build_student_report(&store, &cfg, &student_id) {
        Ok(r) => ok(&req.id, json!(r)),
        Err(e) => report_err(req, e),
    }
}

fn handle_general_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = match parse_filter(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let store = SqliteResultStore::new(conn);
    match report::build_general_results(&store, &filter) {
        Ok(r) => ok(&req.id, json!(r)),
        Err(e) => report_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentReport" => Some(handle_student_report(state, req)),
        "reports.generalResults" => Some(handle_general_results(state, req)),
        _ => None,
    }
}
