use crate::calc::{self, ExaminationAggregate, IntegrityIssue};
use crate::config::ReportsConfig;
use crate::error::ReportError;
use crate::rank::{rank, rank_member, Rank};
use crate::store::{GeneralResultRecord, GeneralResultsScope, ResultStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject_id: String,
    pub subject_name: String,
    pub marks: f64,
    pub is_core: bool,
    pub session_id: String,
    pub rank: Rank,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaminationSummary {
    pub examination_id: String,
    pub examination_name: String,
    pub examination_date: Option<String>,
    pub class_id: String,
    pub class_name: String,
    pub subjects: Vec<SubjectResult>,
    pub overall_total: f64,
    pub overall_rank: Rank,
    pub core_total: f64,
    pub core_rank: Rank,
    pub cohort_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub student_name: String,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
    pub core_subjects: Vec<String>,
    /// Newest examination first.
    pub examinations: Vec<ExaminationSummary>,
    pub issues: Vec<IntegrityIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GeneralResultsFilter {
    All,
    #[serde(rename_all = "camelCase")]
    Specific {
        examination_id: String,
        class_id: String,
        subject_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralResults {
    /// Session the specific filter resolved to; `None` for the unfiltered
    /// listing or when no session matches.
    pub session_id: Option<String>,
    pub results: Vec<GeneralResultRecord>,
}

fn rank_examination<S>(
    store: &S,
    config: &ReportsConfig,
    student_id: &str,
    exam: ExaminationAggregate,
) -> Result<ExaminationSummary, ReportError>
where
    S: ResultStore + ?Sized,
{
    let mut subjects = Vec::with_capacity(exam.subjects.len());
    for s in exam.subjects {
        let cohort = store.cohort_scores_for_session(&s.session_id)?;
        let subject_rank = rank(s.marks, &cohort);
        if subject_rank == Rank::NotAvailable {
            tracing::debug!(session_id = %s.session_id, "subject rank unavailable");
        }
        subjects.push(SubjectResult {
            subject_id: s.subject_id,
            subject_name: s.subject_name,
            marks: s.marks,
            is_core: s.is_core,
            session_id: s.session_id,
            rank: subject_rank,
        });
    }

    let totals = store.cohort_totals(&exam.examination_id, &exam.class_id)?;
    let overall_rank = rank_member(student_id, exam.overall_total, &totals);
    let core_totals =
        store.cohort_core_totals(&exam.examination_id, &exam.class_id, &config.core_subjects)?;
    let core_rank = rank_member(student_id, exam.core_total, &core_totals);
    for (label, own_rank, cohort) in [
        ("overall", overall_rank, &totals),
        ("core", core_rank, &core_totals),
    ] {
        if own_rank == Rank::NotAvailable && cohort.iter().any(|t| t.student_id == student_id) {
            tracing::warn!(
                examination_id = %exam.examination_id,
                "{} cohort total disagrees with the listed subjects; rank withheld",
                label
            );
        }
    }
    tracing::debug!(
        examination_id = %exam.examination_id,
        overall = ?overall_rank.position(),
        core = ?core_rank.position(),
        "examination ranked"
    );

    Ok(ExaminationSummary {
        examination_id: exam.examination_id,
        examination_name: exam.examination_name,
        examination_date: exam.examination_date,
        class_id: exam.class_id,
        class_name: exam.class_name,
        subjects,
        overall_total: exam.overall_total,
        overall_rank,
        core_total: exam.core_total,
        core_rank,
        cohort_size: totals.len(),
    })
}

/// Aggregate and rank every examination a student sat.
///
/// Missing cohort data turns the affected rank into N/A; only storage
/// failures abort the report.
#[tracing::instrument(skip(store, config))]
pub fn build_student_report<S>(
    store: &S,
    config: &ReportsConfig,
    student_id: &str,
) -> Result<StudentReport, ReportError>
where
    S: ResultStore + ?Sized,
{
    if student_id.trim().is_empty() {
        return Err(ReportError::Invalid("student id must not be empty".into()));
    }
    let student = store
        .find_student(student_id)?
        .ok_or_else(|| ReportError::not_found("student", student_id))?;
    let rows = store.results_for_student(student_id)?;
    let aggregate = calc::aggregate_student(&rows, store, &config.core_subjects)?;

    let mut examinations = Vec::with_capacity(aggregate.examinations.len());
    for exam in aggregate.examinations {
        examinations.push(rank_examination(store, config, student_id, exam)?);
    }

    tracing::info!(
        examinations = examinations.len(),
        issues = aggregate.issues.len(),
        skipped_rows = aggregate.skipped_rows,
        "student report built"
    );
    Ok(StudentReport {
        student_id: student.id,
        student_name: student.name,
        class_id: student.class_id,
        class_name: student.class_name,
        core_subjects: config.core_subjects.names().to_vec(),
        examinations,
        issues: aggregate.issues,
    })
}

/// Flat, unranked listing for bulk export.
pub fn build_general_results<S>(
    store: &S,
    filter: &GeneralResultsFilter,
) -> Result<GeneralResults, ReportError>
where
    S: ResultStore + ?Sized,
{
    match filter {
        GeneralResultsFilter::All => Ok(GeneralResults {
            session_id: None,
            results: store.general_results(GeneralResultsScope::All)?,
        }),
        GeneralResultsFilter::Specific {
            examination_id,
            class_id,
            subject_id,
        } => {
            for (key, value) in [
                ("examinationId", examination_id),
                ("classId", class_id),
                ("subjectId", subject_id),
            ] {
                if value.trim().is_empty() {
                    return Err(ReportError::Invalid(format!("{} must not be empty", key)));
                }
            }
            let Some(session_id) = store.find_session(examination_id, class_id, subject_id)? else {
                tracing::debug!(%examination_id, %class_id, %subject_id, "no session for filter");
                return Ok(GeneralResults {
                    session_id: None,
                    results: Vec::new(),
                });
            };
            let results = store.general_results(GeneralResultsScope::Session(&session_id))?;
            Ok(GeneralResults {
                session_id: Some(session_id),
                results,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreSubjectSet;
    use crate::db;
    use crate::marks::{self, MarkEntry};
    use crate::store::{
        CohortScoreProvider, CohortTotal, SessionResolver, SqliteResultStore, StudentIdentity,
        StudentResultRow,
    };
    use rusqlite::Connection;

    const SUBJECTS: [(&str, &str); 5] = [
        ("math", "Mathematics"),
        ("eng", "English Language"),
        ("sci", "Integrated Science"),
        ("soc", "Social Studies"),
        ("ict", "ICT"),
    ];

    fn submit(conn: &Connection, exam: &str, subject: &str, marks: &[(&str, f64)]) {
        let s = marks::open_session(conn, exam, "jhs2a", subject, Some("t1"))
            .expect("open session");
        let entries: Vec<MarkEntry> = marks
            .iter()
            .map(|(id, m)| MarkEntry {
                student_id: id.to_string(),
                marks: *m,
            })
            .collect();
        marks::submit_marks(conn, &s.id, &entries).expect("submit");
    }

    /// Ama 300/260, Kofi 310/270, Esi 290/240 in the Mid-Term.
    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO classes(id, name) VALUES('jhs2a', 'JHS 2A');
             INSERT INTO teachers(id, name, email) VALUES('t1', 'Mr Mensah', 'mensah@example.org');
             INSERT INTO examinations(id, name, examination_date) VALUES
                ('mid', 'Mid-Term', '2024-03-01'),
                ('t1-exam', 'First Term', '2023-12-10');
             INSERT INTO students(id, name, class_id) VALUES
                ('ama', 'Ama', 'jhs2a'), ('kofi', 'Kofi', 'jhs2a'),
                ('esi', 'Esi', 'jhs2a'), ('yaw', 'Yaw', 'jhs2a');",
        )
        .expect("seed");
        for (id, name) in SUBJECTS {
            conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (id, name))
                .expect("subject");
        }
        submit(&conn, "mid", "math", &[("ama", 80.0), ("kofi", 90.0), ("esi", 70.0)]);
        submit(&conn, "mid", "eng", &[("ama", 70.0), ("kofi", 80.0), ("esi", 60.0)]);
        submit(&conn, "mid", "sci", &[("ama", 60.0), ("kofi", 60.0), ("esi", 60.0)]);
        submit(&conn, "mid", "soc", &[("ama", 50.0), ("kofi", 40.0), ("esi", 50.0)]);
        submit(&conn, "mid", "ict", &[("ama", 40.0), ("kofi", 40.0), ("esi", 50.0)]);
        submit(&conn, "t1-exam", "math", &[("ama", 55.0), ("kofi", 65.0)]);
        conn
    }

    fn subject_rank(exam: &ExaminationSummary, subject_id: &str) -> Rank {
        exam.subjects
            .iter()
            .find(|s| s.subject_id == subject_id)
            .map(|s| s.rank)
            .expect("subject listed")
    }

    #[test]
    fn ama_mid_term_totals_and_ranks() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);
        let report =
            build_student_report(&store, &ReportsConfig::default(), "ama").expect("report");

        assert_eq!(report.student_name, "Ama");
        assert_eq!(report.class_name.as_deref(), Some("JHS 2A"));
        assert_eq!(report.examinations.len(), 2);

        let mid = &report.examinations[0];
        assert_eq!(mid.examination_name, "Mid-Term");
        assert_eq!(mid.overall_total, 300.0);
        assert_eq!(mid.core_total, 260.0);
        assert_eq!(mid.overall_rank, Rank::Position(2));
        assert_eq!(mid.core_rank, Rank::Position(2));
        assert_eq!(mid.cohort_size, 3);

        assert_eq!(subject_rank(mid, "math"), Rank::Position(2));
        assert_eq!(subject_rank(mid, "sci"), Rank::Position(1));
        assert_eq!(subject_rank(mid, "soc"), Rank::Position(1));
        assert_eq!(subject_rank(mid, "ict"), Rank::Position(2));

        let first_term = &report.examinations[1];
        assert_eq!(first_term.examination_name, "First Term");
        assert_eq!(first_term.overall_rank, Rank::Position(2));
    }

    #[test]
    fn report_is_idempotent_without_writes() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);
        let cfg = ReportsConfig::default();
        let a = build_student_report(&store, &cfg, "kofi").expect("first");
        let b = build_student_report(&store, &cfg, "kofi").expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn recomputes_after_cohort_changes() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);
        let cfg = ReportsConfig::default();
        let before = build_student_report(&store, &cfg, "ama").expect("before");
        assert_eq!(before.examinations[0].overall_rank, Rank::Position(2));

        submit(&conn, "mid", "ict", &[("kofi", 20.0)]);
        let after = build_student_report(&store, &cfg, "ama").expect("after");
        // Kofi drops to 290, level with Esi.
        assert_eq!(after.examinations[0].overall_rank, Rank::Position(1));
    }

    #[test]
    fn injected_core_set_changes_core_total() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);
        let cfg = ReportsConfig {
            core_subjects: CoreSubjectSet::new(["ict", "MATHEMATICS"]).expect("set"),
        };
        let report = build_student_report(&store, &cfg, "ama").expect("report");
        let mid = &report.examinations[0];
        assert_eq!(mid.core_total, 120.0);
        // Kofi 130, Ama 120, Esi 120.
        assert_eq!(mid.core_rank, Rank::Position(2));
        assert_eq!(report.core_subjects, ["ict".to_string(), "MATHEMATICS".to_string()]);
    }

    #[test]
    fn student_without_results_gets_empty_report() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);
        let report =
            build_student_report(&store, &ReportsConfig::default(), "yaw").expect("report");
        assert!(report.examinations.is_empty());
        assert!(report.issues.is_empty());
    }

    /// One Mid-Term for Ama and Kofi over the given (id, name) subjects.
    fn two_students(subjects: &[(&str, &str)]) -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO classes(id, name) VALUES('jhs2a', 'JHS 2A');
             INSERT INTO teachers(id, name) VALUES('t1', 'Mr Mensah');
             INSERT INTO examinations(id, name, examination_date)
                VALUES('mid', 'Mid-Term', '2024-03-01');
             INSERT INTO students(id, name, class_id) VALUES
                ('ama', 'Ama', 'jhs2a'), ('kofi', 'Kofi', 'jhs2a');",
        )
        .expect("seed");
        for (id, name) in subjects {
            conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (*id, *name))
                .expect("subject");
        }
        conn
    }

    #[test]
    fn blank_named_subject_is_left_out_of_every_cohort_total() {
        let conn = two_students(&[("math", "Mathematics"), ("blank", "  ")]);
        submit(&conn, "mid", "math", &[("ama", 60.0), ("kofi", 80.0)]);
        submit(&conn, "mid", "blank", &[("ama", 50.0)]);
        let store = SqliteResultStore::new(&conn);

        let report =

            build_student_report(&store, &ReportsConfig::default(), "ama").expect("report");
        let mid = &report.examinations[0];
        assert_eq!(mid.overall_total, 60.0);
        assert_eq!(mid.overall_rank, Rank::Position(2));
        assert_eq!(mid.core_total, 60.0);
        assert_eq!(mid.core_rank, Rank::Position(2));
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, calc::IssueKind::UnnamedSubject);

        let kofi =

            build_student_report(&store, &ReportsConfig::default(), "kofi").expect("report");
        assert_eq!(kofi.examinations[0].overall_rank, Rank::Position(1));
    }

    #[test]
    fn core_membership_agrees_between_report_and_cohort_query() {
        let conn = two_students(&[("mathtab", "Mathematics\t"), ("eng", " English Language ")]);
        submit(&conn, "mid", "mathtab", &[("ama", 70.0), ("kofi", 50.0)]);
        submit(&conn, "mid", "eng", &[("ama", 60.0), ("kofi", 65.0)]);
        let store = SqliteResultStore::new(&conn);

        let report =

            build_student_report(&store, &ReportsConfig::default(), "ama").expect("report");
        let mid = &report.examinations[0];
        let tab = mid
            .subjects
            .iter()
            .find(|s| s.subject_id == "mathtab")
            .expect("listed");
        assert!(!tab.is_core);
        assert_eq!(mid.core_total, 60.0);
        assert_eq!(mid.core_rank, Rank::Position(2));
        assert_eq!(mid.overall_total, 130.0);
        assert_eq!(mid.overall_rank, Rank::Position(1));
    }

    #[test]
    fn blank_ids_are_rejected_as_invalid() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);
        let e = build_student_report(&store, &ReportsConfig::default(), "  ").unwrap_err();
        assert_eq!(e.code(), "bad_params");
        assert!(!e.is_retryable());

        let filter = GeneralResultsFilter::Specific {
            examination_id: "mid".into(),
            class_id: "".into(),
            subject_id: "math".into(),
        };
        let e = build_general_results(&store, &filter).unwrap_err();
        assert_eq!(e.code(), "bad_params");
        assert!(e.to_string().contains("classId"));
    }

    #[test]
    fn unknown_student_is_not_found() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);
        let e = build_student_report(&store, &ReportsConfig::default(), "nobody").unwrap_err();
        assert_eq!(e.code(), "not_found");
        assert!(!e.is_retryable());
    }

    /// Wraps the SQLite store to simulate empty cohorts or a failing backend.
    struct FlakyStore<'a> {
        inner: SqliteResultStore<'a>,
        empty_session_cohorts: bool,
        fail_totals: bool,
        totals_bonus: f64,
    }

    impl SessionResolver for FlakyStore<'_> {
        fn find_session(&self, e: &str, c: &str, s: &str) -> Result<Option<String>, ReportError> {
            self.inner.find_session(e, c, s)
        }
    }

    impl CohortScoreProvider for FlakyStore<'_> {
        fn cohort_scores_for_session(&self, session_id: &str) -> Result<Vec<f64>, ReportError> {
            if self.empty_session_cohorts {
                return Ok(Vec::new());
            }
            self.inner.cohort_scores_for_session(session_id)
        }

        fn cohort_totals(&self, e: &str, c: &str) -> Result<Vec<CohortTotal>, ReportError> {
            if self.fail_totals {
                return Err(ReportError::Storage(rusqlite::Error::InvalidQuery));
            }
            let mut totals = self.inner.cohort_totals(e, c)?;
            for t in &mut totals {
                t.total_marks += self.totals_bonus;
            }
            Ok(totals)
        }

        fn cohort_core_totals(
            &self,
            e: &str,
            c: &str,
            core: &CoreSubjectSet,
        ) -> Result<Vec<CohortTotal>, ReportError> {
            self.inner.cohort_core_totals(e, c, core)
        }
    }

    impl ResultStore for FlakyStore<'_> {
        fn find_student(&self, id: &str) -> Result<Option<StudentIdentity>, ReportError> {
            self.inner.find_student(id)
        }

        fn results_for_student(&self, id: &str) -> Result<Vec<StudentResultRow>, ReportError> {
            self.inner.results_for_student(id)
        }

        fn general_results(
            &self,
            scope: GeneralResultsScope<'_>,
        ) -> Result<Vec<GeneralResultRecord>, ReportError> {
            self.inner.general_results(scope)
        }
    }

    #[test]
    fn empty_subject_cohort_degrades_to_na_only() {
        let conn = seeded();
        let store = FlakyStore {
            inner: SqliteResultStore::new(&conn),
            empty_session_cohorts: true,
            fail_totals: false,
            totals_bonus: 0.0,
        };
        let report =
            build_student_report(&store, &ReportsConfig::default(), "ama").expect("report");
        let mid = &report.examinations[0];
        assert!(mid.subjects.iter().all(|s| s.rank == Rank::NotAvailable));
        assert_eq!(mid.overall_rank, Rank::Position(2));
        assert_eq!(mid.overall_total, 300.0);
    }

    #[test]
    fn cohort_total_disagreeing_with_listed_total_is_not_ranked() {
        let conn = seeded();
        let store = FlakyStore {
            inner: SqliteResultStore::new(&conn),
            empty_session_cohorts: false,
            fail_totals: false,
            totals_bonus: 5.0,
        };
        let report =
            build_student_report(&store, &ReportsConfig::default(), "ama").expect("report");
        let mid = &report.examinations[0];
        assert_eq!(mid.overall_total, 300.0);
        assert_eq!(mid.overall_rank, Rank::NotAvailable);
        assert_eq!(mid.core_rank, Rank::Position(2));
    }

    #[test]
    fn storage_failure_aborts_the_request() {
        let conn = seeded();
        let store = FlakyStore {
            inner: SqliteResultStore::new(&conn),
            empty_session_cohorts: false,
            fail_totals: true,
            totals_bonus: 0.0,
        };
        let e = build_student_report(&store, &ReportsConfig::default(), "ama").unwrap_err();
        assert!(e.is_retryable());
        assert_eq!(e.code(), "db_query_failed");
    }

    #[test]
    fn general_results_all_and_specific() {
        let conn = seeded();
        let store = SqliteResultStore::new(&conn);

        let all = build_general_results(&store, &GeneralResultsFilter::All).expect("all");
        assert_eq!(all.results.len(), 17);
        assert!(all.session_id.is_none());
        // The first-term maths session was submitted last.
        assert_eq!(all.results[0].examination_id, "t1-exam");
        assert_eq!(all.results[0].teacher_name.as_deref(), Some("Mr Mensah"));

        let filter = GeneralResultsFilter::Specific {
            examination_id: "mid".into(),
            class_id: "jhs2a".into(),
            subject_id: "math".into(),
        };
        let specific = build_general_results(&store, &filter).expect("specific");
        assert!(specific.session_id.is_some());
        let names: Vec<&str> = specific.results.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, ["Ama", "Esi", "Kofi"]);
        assert!(specific.results.iter().all(|r| r.subject_name == "Mathematics"));

        let missing = GeneralResultsFilter::Specific {
            examination_id: "t1-exam".into(),
            class_id: "jhs2a".into(),
            subject_id: "ict".into(),
        };
        let none = build_general_results(&store, &missing).expect("missing");
        assert!(none.session_id.is_none());
        assert!(none.results.is_empty());
    }

    #[test]
    fn general_filter_deserializes_from_tagged_json() {
        let f: GeneralResultsFilter = serde_json::from_value(serde_json::json!({
            "kind": "specific",
            "examinationId": "e",
            "classId": "c",
            "subjectId": "s"
        }))
        .expect("parse");
        assert_eq!(
            f,
            GeneralResultsFilter::Specific {
                examination_id: "e".into(),
                class_id: "c".into(),
                subject_id: "s".into()
            }
        );
        let all: GeneralResultsFilter =
            serde_json::from_value(serde_json::json!({ "kind": "all" })).expect("parse");
        assert_eq!(all, GeneralResultsFilter::All);
    }
}
