//! Write side of the Result Store: opening sessions and submitting marks.
//!
//! The report builder never calls into this module; it only reads what has
//! been filed here.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarksError {
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("session {0} is locked")]
    Locked(String),

    #[error("{0}")]
    Invalid(String),
}

impl MarksError {
    fn not_found(what: &'static str, id: &str) -> Self {
        MarksError::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            MarksError::Storage(_) => "db_update_failed",
            MarksError::NotFound { .. } => "not_found",
            MarksError::Locked(_) => "session_locked",
            MarksError::Invalid(_) => "bad_params",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Submitted,
    Locked,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "submitted" => Some(Self::Submitted),
            "locked" => Some(Self::Locked),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Submitted => "submitted",
            Self::Locked => "locked",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub examination_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub teacher_id: Option<String>,
    pub status: SessionStatus,
    pub created: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub student_id: String,
    pub marks: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSummary {
    pub inserted: usize,
    pub updated: usize,
}

pub fn now_timestamp() -> String {
    // Fixed width so stored timestamps sort as text.
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn require_row(
    conn: &Connection,
    table: &'static str,
    what: &'static str,
    id: &str,
) -> Result<(), MarksError> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    if found.is_none() {
        return Err(MarksError::not_found(what, id));
    }
    Ok(())
}

fn load_session(conn: &Connection, session_id: &str) -> Result<Option<SessionInfo>, MarksError> {
    let row = conn
        .query_row(
            "SELECT id, examination_id, class_id, subject_id, teacher_id, status
             FROM sessions WHERE id = ?",
            [session_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(
        |(id, examination_id, class_id, subject_id, teacher_id, status)| SessionInfo {
            id,
            examination_id,
            class_id,
            subject_id,
            teacher_id,
            status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Open),
            created: false,
        },
    ))
}

/// Return the session for the triple, creating it (status `open`) if absent.
pub fn open_session(
    conn: &Connection,
    examination_id: &str,
    class_id: &str,
    subject_id: &str,
    teacher_id: Option<&str>,
) -> Result<SessionInfo, MarksError> {
    require_row(conn, "examinations", "examination", examination_id)?;
    require_row(conn, "classes", "class", class_id)?;
    require_row(conn, "subjects", "subject", subject_id)?;
    if let Some(t) = teacher_id {
        require_row(conn, "teachers", "teacher", t)?;
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM sessions
             WHERE examination_id = ? AND class_id = ? AND subject_id = ?",
            (examination_id, class_id, subject_id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        if let Some(info) = load_session(conn, &id)? {
            return Ok(info);
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(
            id, examination_id, class_id, subject_id, teacher_id, status, created_at
         )
         VALUES(?, ?, ?, ?, ?, 'open', ?)",
        (
            &id,
            examination_id,
            class_id,
            subject_id,
            teacher_id,
            now_timestamp(),
        ),
    )?;
    tracing::info!(session_id = %id, examination_id, class_id, subject_id, "session opened");
    Ok(SessionInfo {
        id,
        examination_id: examination_id.to_string(),
        class_id: class_id.to_string(),
        subject_id: subject_id.to_string(),
        teacher_id: teacher_id.map(|s| s.to_string()),
        status: SessionStatus::Open,
        created: true,
    })
}

pub fn lock_session(conn: &Connection, session_id: &str) -> Result<(), MarksError> {
    let changed = conn.execute(
        "UPDATE sessions SET status = 'locked' WHERE id = ?",
        [session_id],
    )?;
    if changed == 0 {
        return Err(MarksError::not_found("session", session_id));
    }
    Ok(())
}

/// Upsert marks keyed by (session, student). Resubmission overwrites.
pub fn submit_marks(
    conn: &Connection,
    session_id: &str,
    entries: &[MarkEntry],
) -> Result<SubmitSummary, MarksError> {
    if entries.is_empty() {
        return Err(MarksError::Invalid("no marks to submit".into()));
    }
    for e in entries {
        if !e.marks.is_finite() || !(0.0..=100.0).contains(&e.marks) {
            return Err(MarksError::Invalid(format!(
                "marks for student {} must be within 0..=100",
                e.student_id
            )));
        }
    }

    let Some(session) = load_session(conn, session_id)? else {
        return Err(MarksError::not_found("session", session_id));
    };
    if session.status == SessionStatus::Locked {
        return Err(MarksError::Locked(session_id.to_string()));
    }

    let tx = conn.unchecked_transaction()?;
    let mut summary = SubmitSummary::default();
    let now = now_timestamp();
    for e in entries {
        let class_id: Option<Option<String>> = tx
            .query_row(
                "SELECT class_id FROM students WHERE id = ?",
                [&e.student_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(class_id) = class_id else {
            return Err(MarksError::not_found("student", &e.student_id));
        };
        if class_id.as_deref() != Some(session.class_id.as_str()) {
            return Err(MarksError::Invalid(format!(
                "student {} is not in the session's class",
                e.student_id
            )));
        }

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM results WHERE session_id = ? AND student_id = ?",
                (session_id, &e.student_id),
                |r| r.get(0),
            )
            .optional()?;
        tx.execute(
            "INSERT INTO results(id, session_id, student_id, marks, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, student_id)
             DO UPDATE SET marks = excluded.marks, updated_at = excluded.updated_at",
            (
                uuid::Uuid::new_v4().to_string(),
                session_id,
                &e.student_id,
                e.marks,
                &now,
                &now,
            ),
        )?;
        if exists.is_some() {
            summary.updated += 1;
        } else {
            summary.inserted += 1;
        }
    }
    tx.execute(
        "UPDATE sessions SET status = 'submitted' WHERE id = ? AND status = 'open'",
        [session_id],
    )?;
    tx.commit()?;

    tracing::info!(
        session_id,
        inserted = summary.inserted,
        updated = summary.updated,
        "marks submitted"
    );
    Ok(summary)
}
