use crate::config::{self, CoreSubjectSet};
use crate::error::ReportError;
use crate::store::{SessionResolver, StudentResultRow};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMark {
    pub subject_id: String,
    pub subject_name: String,
    pub marks: f64,
    pub is_core: bool,
    pub session_id: String,
}

/// One examination's marks for a student, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaminationAggregate {
    pub examination_id: String,
    pub examination_name: String,
    pub examination_date: Option<String>,
    pub class_id: String,
    pub class_name: String,
    pub subjects: Vec<SubjectMark>,
    pub overall_total: f64,
    pub core_total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The same subject appears more than once in one examination.
    DuplicateSubject,
    /// The subject has no usable name, so core membership is unknown.
    UnnamedSubject,
    /// The row is filed under a session other than the one the triple resolves to.
    SessionMismatch,
    /// The row belongs to a different class than the rest of the examination.
    ClassMismatch,
}

/// A data-integrity violation found while aggregating. The values involved
/// are left out of every total.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub kind: IssueKind,
    pub examination_id: String,
    pub subject_id: Option<String>,
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub examinations: Vec<ExaminationAggregate>,
    pub issues: Vec<IntegrityIssue>,
    pub skipped_rows: usize,
}

#[derive(Debug)]
struct ExamBucket {
    examination_id: String,
    examination_name: String,
    examination_date: Option<String>,
    class_id: String,
    class_name: String,
    by_subject: Vec<(String, Vec<SubjectMark>)>,
}

impl ExamBucket {
    fn push(&mut self, mark: SubjectMark) {
        match self
            .by_subject
            .iter_mut()
            .find(|(id, _)| *id == mark.subject_id)
        {
            Some((_, marks)) => marks.push(mark),
            None => self.by_subject.push((mark.subject_id.clone(), vec![mark])),
        }
    }
}

/// Parse an examination date stored as `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_exam_date(raw: Option<&str>) -> Option<NaiveDate> {
    let s = raw?.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Newest first; undated examinations are treated as current and lead.
fn examination_order(a: &ExaminationAggregate, b: &ExaminationAggregate) -> Ordering {
    let da = parse_exam_date(a.examination_date.as_deref());
    let db = parse_exam_date(b.examination_date.as_deref());
    let by_date = match (da, db) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x),
    };
    by_date
        .then_with(|| {
            a.examination_name
                .to_ascii_lowercase()
                .cmp(&b.examination_name.to_ascii_lowercase())
        })
        .then_with(|| a.examination_id.cmp(&b.examination_id))
}

/// Group a student's result rows by examination and total them.
///
/// Rows whose session no longer resolves are dropped silently. Rows that
/// violate data integrity are excluded and reported in `issues`.
pub fn aggregate_student<R>(
    rows: &[StudentResultRow],
    resolver: &R,
    core_subjects: &CoreSubjectSet,
) -> Result<StudentAggregate, ReportError>
where
    R: SessionResolver + ?Sized,
{
    let mut issues: Vec<IntegrityIssue> = Vec::new();
    let mut skipped_rows = 0_usize;
    let mut resolved: HashMap<(String, String, String), Option<String>> = HashMap::new();
    let mut buckets: Vec<ExamBucket> = Vec::new();

    for row in rows {
        let (
            Some(examination_id),
            Some(class_id),
            Some(subject_id),
            Some(examination_name),
            Some(class_name),
        ) = (
            row.examination_id.as_ref(),
            row.class_id.as_ref(),
            row.subject_id.as_ref(),
            row.examination_name.as_ref(),
            row.class_name.as_ref(),
        )
        else {
            tracing::debug!(session_id = %row.session_id, "skipping result with dangling session");
            skipped_rows += 1;
            continue;
        };

        let key = (examination_id.clone(), class_id.clone(), subject_id.clone());
        let session_id = match resolved.get(&key) {
            Some(v) => v.clone(),
            None => {
                let v = resolver.find_session(examination_id, class_id, subject_id)?;
                resolved.insert(key, v.clone());
                v
            }
        };
        let Some(session_id) = session_id else {
            tracing::debug!(
                examination_id = %examination_id,
                class_id = %class_id,
                subject_id = %subject_id,
                "skipping result whose session no longer resolves"
            );
            skipped_rows += 1;
            continue;
        };
        if session_id != row.session_id {
            issues.push(IntegrityIssue {
                kind: IssueKind::SessionMismatch,
                examination_id: examination_id.clone(),
                subject_id: Some(subject_id.clone()),
                session_id: row.session_id.clone(),
                message: format!(
                    "result filed under session {} but the triple resolves to {}",
                    row.session_id, session_id
                ),
            });
            continue;
        }

        let subject_name = row
            .subject_name
            .as_deref()
            .map(config::normalize_subject_name)
            .filter(|s| !s.is_empty());
        let Some(subject_name) = subject_name else {
            issues.push(IntegrityIssue {
                kind: IssueKind::UnnamedSubject,
                examination_id: examination_id.clone(),
                subject_id: Some(subject_id.clone()),
                session_id: row.session_id.clone(),
                message: "subject has no name; core membership cannot be determined".into(),
            });
            continue;
        };

        let bucket_idx = match buckets
            .iter()
            .position(|b| b.examination_id == *examination_id)
        {
            Some(i) => i,
            None => {
                buckets.push(ExamBucket {
                    examination_id: examination_id.clone(),
                    examination_name: examination_name.clone(),
                    examination_date: row.examination_date.clone(),
                    class_id: class_id.clone(),
                    class_name: class_name.clone(),
                    by_subject: Vec::new(),
                });
                buckets.len() - 1
            }
        };
        let bucket = &mut buckets[bucket_idx];
        if bucket.class_id != *class_id {
            issues.push(IntegrityIssue {
                kind: IssueKind::ClassMismatch,
                examination_id: examination_id.clone(),
                subject_id: Some(subject_id.clone()),
                session_id: row.session_id.clone(),
                message: format!(
                    "result recorded in class {} but the examination was sat in class {}",
                    class_id, bucket.class_id
                ),
            });
            continue;
        }

        bucket.push(SubjectMark {
            subject_id: subject_id.clone(),
            subject_name: subject_name.to_string(),
            marks: row.marks,
            is_core: core_subjects.contains(subject_name),
            session_id: row.session_id.clone(),
        });
    }

    let mut examinations: Vec<ExaminationAggregate> = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let mut subjects: Vec<SubjectMark> = Vec::new();
        for (subject_id, marks) in bucket.by_subject {
            if marks.len() > 1 {
                issues.push(IntegrityIssue {
                    kind: IssueKind::DuplicateSubject,
                    examination_id: bucket.examination_id.clone(),
                    subject_id: Some(subject_id),
                    session_id: marks[0].session_id.clone(),
                    message: format!(
                        "{} results for one subject in one examination",
                        marks.len()
                    ),
                });
                continue;
            }
            subjects.extend(marks);
        }
        subjects.sort_by(|a, b| {
            a.subject_name
                .to_ascii_lowercase()
                .cmp(&b.subject_name.to_ascii_lowercase())
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });

        let overall_total: f64 = subjects.iter().map(|s| s.marks).sum();
        let core_total: f64 = subjects.iter().filter(|s| s.is_core).map(|s| s.marks).sum();
        examinations.push(ExaminationAggregate {
            examination_id: bucket.examination_id,
            examination_name: bucket.examination_name,
            examination_date: bucket.examination_date,
            class_id: bucket.class_id,
            class_name: bucket.class_name,
            subjects,
            overall_total,
            core_total,
        });
    }
    examinations.sort_by(examination_order);

    for issue in &issues {
        tracing::warn!(
            kind = ?issue.kind,
            examination_id = %issue.examination_id,
            session_id = %issue.session_id,
            "excluded from aggregation: {}",
            issue.message
        );
    }

    Ok(StudentAggregate {
        examinations,
        issues,
        skipped_rows,
    })
}
