use crate::config::CoreSubjectSet;
use crate::error::ReportError;
use crate::marks::SessionStatus;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub id: String,
    pub name: String,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
}

/// One stored mark joined through its session. The joined columns are
/// `None` when the session (or what it points at) no longer exists.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentResultRow {
    pub marks: f64,
    pub session_id: String,
    pub examination_id: Option<String>,
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
    pub examination_name: Option<String>,
    pub examination_date: Option<String>,
    pub class_name: Option<String>,
    pub subject_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortTotal {
    pub student_id: String,
    pub total_marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralResultsScope<'a> {
    /// Every stored result, newest first.
    All,
    /// Results filed under one session.
    Session(&'a str),
}

/// Flat export row: one mark with every identifier it hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralResultRecord {
    pub result_id: String,
    pub marks: f64,
    pub session_id: String,
    pub student_id: String,
    pub student_name: String,
    pub examination_id: String,
    pub examination_name: String,
    pub examination_date: Option<String>,
    pub class_id: String,
    pub class_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub teacher_id: Option<String>,
    pub teacher_name: Option<String>,
    pub teacher_email: Option<String>,
    pub created_at: String,
}

/// A session a teacher filed marks under, with what it covers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherSession {
    pub session_id: String,
    pub examination_id: String,
    pub examination_name: String,
    pub examination_date: Option<String>,
    pub class_id: String,
    pub class_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub status: SessionStatus,
    pub result_count: i64,
    pub created_at: String,
}

/// Maps an (examination, class, subject) triple to the session its marks
/// are filed under. Never creates sessions.
pub trait SessionResolver {
    fn find_session(
        &self,
        examination_id: &str,
        class_id: &str,
        subject_id: &str,
    ) -> Result<Option<String>, ReportError>;
}

/// Cohort-wide score queries used for ranking.
pub trait CohortScoreProvider {
    /// Every mark filed under one session.
    fn cohort_scores_for_session(&self, session_id: &str) -> Result<Vec<f64>, ReportError>;

    /// Per-student sum of all marks for one examination and class. Subjects
    /// with a blank name are left out, as they are from a student's report.
    fn cohort_totals(
        &self,
        examination_id: &str,
        class_id: &str,
    ) -> Result<Vec<CohortTotal>, ReportError>;

    /// Per-student sum restricted to the core subjects.
    fn cohort_core_totals(
        &self,
        examination_id: &str,
        class_id: &str,
        core_subjects: &CoreSubjectSet,
    ) -> Result<Vec<CohortTotal>, ReportError>;
}

/// Read interface of the Result Store consumed by the report builder.
pub trait ResultStore: SessionResolver + CohortScoreProvider {
    fn find_student(&self, student_id: &str) -> Result<Option<StudentIdentity>, ReportError>;

    fn results_for_student(&self, student_id: &str)
        -> Result<Vec<StudentResultRow>, ReportError>;

    fn general_results(
        &self,
        scope: GeneralResultsScope<'_>,
    ) -> Result<Vec<GeneralResultRecord>, ReportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SqliteResultStore<'a> {
    pub conn: &'a Connection,
}

impl<'a> SqliteResultStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Sessions attributed to a teacher, newest first. `None` when the
    /// teacher does not exist.
    pub fn sessions_for_teacher(
        &self,
        teacher_id: &str,
    ) -> Result<Option<Vec<TeacherSession>>, ReportError> {
        let known: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
                r.get(0)
            })
            .optional()?;
        if known.is_none() {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT s.id, e.id, e.name, e.examination_date, c.id, c.name,
                    sub.id, sub.name, s.status, COUNT(r.id), s.created_at
             FROM sessions s
             JOIN examinations e ON e.id = s.examination_id
             JOIN classes c ON c.id = s.class_id
             JOIN subjects sub ON sub.id = s.subject_id
             LEFT JOIN results r ON r.session_id = s.id
             WHERE s.teacher_id = ?
             GROUP BY s.id
             ORDER BY s.created_at DESC, s.rowid DESC",
        )?;
        let sessions = stmt
            .query_map([teacher_id], |r| {
                let status: String = r.get(8)?;
                Ok(TeacherSession {
                    session_id: r.get(0)?,
                    examination_id: r.get(1)?,
                    examination_name: r.get(2)?,
                    examination_date: r.get(3)?,
                    class_id: r.get(4)?,
                    class_name: r.get(5)?,
                    subject_id: r.get(6)?,
                    subject_name: r.get(7)?,
                    status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Open),
                    result_count: r.get(9)?,
                    created_at: r.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(sessions))
    }

    fn totals_query(
        &self,
        sql: &str,
        bind_values: Vec<Value>,
    ) -> Result<Vec<CohortTotal>, ReportError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind_values), |r| {
                Ok(CohortTotal {
                    student_id: r.get(0)?,
                    total_marks: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl SessionResolver for SqliteResultStore<'_> {
    fn find_session(
        &self,
        examination_id: &str,
        class_id: &str,
        subject_id: &str,
    ) -> Result<Option<String>, ReportError> {
        // A session whose examination, class or subject is gone no longer resolves.
        let id = self
            .conn
            .query_row(
                "SELECT s.id
                 FROM sessions s
                 JOIN examinations e ON e.id = s.examination_id
                 JOIN classes c ON c.id = s.class_id
                 JOIN subjects sub ON sub.id = s.subject_id
                 WHERE s.examination_id = ? AND s.class_id = ? AND s.subject_id = ?",
                (examination_id, class_id, subject_id),
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }
}

impl CohortScoreProvider for SqliteResultStore<'_> {
    fn cohort_scores_for_session(&self, session_id: &str) -> Result<Vec<f64>, ReportError> {
        let mut stmt = self
            .conn
            .prepare("SELECT marks FROM results WHERE session_id = ?")?;
        let scores = stmt
            .query_map([session_id], |r| r.get::<_, f64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scores)
    }

    fn cohort_totals(
        &self,
        examination_id: &str,
        class_id: &str,
    ) -> Result<Vec<CohortTotal>, ReportError> {
        self.totals_query(
            "SELECT r.student_id, SUM(r.marks)
             FROM results r
             JOIN sessions s ON s.id = r.session_id
             JOIN subjects sub ON sub.id = s.subject_id
             WHERE s.examination_id = ? AND s.class_id = ?
               AND TRIM(sub.name) <> ''
             GROUP BY r.student_id",
            vec![
                Value::Text(examination_id.to_string()),
                Value::Text(class_id.to_string()),
            ],
        )
    }

    fn cohort_core_totals(
        &self,
        examination_id: &str,
        class_id: &str,
        core_subjects: &CoreSubjectSet,
    ) -> Result<Vec<CohortTotal>, ReportError> {
        let keys = core_subjects.match_keys();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat("?")
            .take(keys.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT r.student_id, SUM(r.marks)
             FROM results r
             JOIN sessions s ON s.id = r.session_id
             JOIN subjects sub ON sub.id = s.subject_id
             WHERE s.examination_id = ? AND s.class_id = ?
               AND LOWER(TRIM(sub.name)) IN ({})
             GROUP BY r.student_id",
            placeholders
        );
        let mut bind_values: Vec<Value> = Vec::with_capacity(keys.len() + 2);
        bind_values.push(Value::Text(examination_id.to_string()));
        bind_values.push(Value::Text(class_id.to_string()));
        for k in keys {
            bind_values.push(Value::Text(k.clone()));
        }
        self.totals_query(&sql, bind_values)
    }
}

const GENERAL_RESULTS_SELECT: &str = "SELECT r.id, r.marks, r.session_id, r.created_at,
        st.id, st.name,
        e.id, e.name, e.examination_date,
        c.id, c.name,
        sub.id, sub.name,
        t.id, t.name, t.email
     FROM results r
     JOIN students st ON st.id = r.student_id
     JOIN sessions s ON s.id = r.session_id
     JOIN examinations e ON e.id = s.examination_id
     JOIN classes c ON c.id = s.class_id
     JOIN subjects sub ON sub.id = s.subject_id
     LEFT JOIN teachers t ON t.id = s.teacher_id";

fn general_row(r: &Row<'_>) -> rusqlite::Result<GeneralResultRecord> {
    Ok(GeneralResultRecord {
        result_id: r.get(0)?,
        marks: r.get(1)?,
        session_id: r.get(2)?,
        created_at: r.get(3)?,
        student_id: r.get(4)?,
        student_name: r.get(5)?,
        examination_id: r.get(6)?,
        examination_name: r.get(7)?,
        examination_date: r.get(8)?,
        class_id: r.get(9)?,
        class_name: r.get(10)?,
        subject_id: r.get(11)?,
        subject_name: r.get(12)?,
        teacher_id: r.get(13)?,
        teacher_name: r.get(14)?,
        teacher_email: r.get(15)?,
    })
}

impl ResultStore for SqliteResultStore<'_> {
    fn find_student(&self, student_id: &str) -> Result<Option<StudentIdentity>, ReportError> {
        let student = self
            .conn
            .query_row(
                "SELECT st.id, st.name, st.class_id, c.name
                 FROM students st
                 LEFT JOIN classes c ON c.id = st.class_id
                 WHERE st.id = ?",
                [student_id],
                |r| {
                    Ok(StudentIdentity {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        class_id: r.get(2)?,
                        class_name: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(student)
    }

    fn results_for_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<StudentResultRow>, ReportError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.marks, r.session_id,
                    s.examination_id, s.class_id, s.subject_id,
                    e.name, e.examination_date, c.name, sub.name
             FROM results r
             LEFT JOIN sessions s ON s.id = r.session_id
             LEFT JOIN examinations e ON e.id = s.examination_id
             LEFT JOIN classes c ON c.id = s.class_id
             LEFT JOIN subjects sub ON sub.id = s.subject_id
             WHERE r.student_id = ?
             ORDER BY r.rowid",
        )?;
        let rows = stmt
            .query_map([student_id], |r| {
                Ok(StudentResultRow {
                    marks: r.get(0)?,
                    session_id: r.get(1)?,
                    examination_id: r.get(2)?,
                    class_id: r.get(3)?,
                    subject_id: r.get(4)?,
                    examination_name: r.get(5)?,
                    examination_date: r.get(6)?,
                    class_name: r.get(7)?,
                    subject_name: r.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn general_results(
        &self,
        scope: GeneralResultsScope<'_>,
    ) -> Result<Vec<GeneralResultRecord>, ReportError> {
        let rows = match scope {
            GeneralResultsScope::All => {
                let sql = format!(
                    "{} ORDER BY r.created_at DESC, r.rowid DESC",
                    GENERAL_RESULTS_SELECT
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], general_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            GeneralResultsScope::Session(session_id) => {
                let sql = format!(
                    "{} WHERE r.session_id = ? ORDER BY st.name COLLATE NOCASE, r.rowid",
                    GENERAL_RESULTS_SELECT
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([session_id], general_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }
}
