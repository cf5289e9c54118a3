use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const DEFAULT_CORE_SUBJECTS: [&str; 4] = [
    "Mathematics",
    "English Language",
    "Integrated Science",
    "Social Studies",
];

const MAX_CORE_SUBJECTS: usize = 20;
const MAX_SUBJECT_NAME_LEN: usize = 64;
const DEFAULT_BUSY_TIMEOUT_MS: i64 = 5000;

/// Stored subject names are compared with surrounding spaces removed.
/// Only U+0020 is stripped, matching SQLite's one-argument `TRIM`, so the
/// report and the cohort queries agree on what a name is.
pub fn normalize_subject_name(name: &str) -> &str {
    name.trim_matches(' ')
}

/// Key used for core membership, in Rust and in SQL
/// (`LOWER(TRIM(name))`, which lowercases ASCII only).
pub fn subject_match_key(name: &str) -> String {
    normalize_subject_name(name).to_ascii_lowercase()
}

/// The configured set of subject names aggregated and ranked as the core
/// sub-total. Membership is an ASCII case-insensitive exact match on the
/// space-trimmed name; no substring or alias matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSubjectSet {
    names: Vec<String>,
    keys: Vec<String>,
}

impl CoreSubjectSet {
    pub fn new<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self {
            names: Vec::new(),
            keys: Vec::new(),
        };
        for raw in names {
            let name = raw.as_ref().trim();
            if name.is_empty() {
                return Err("core subject names must not be empty".into());
            }
            if name.len() > MAX_SUBJECT_NAME_LEN {
                return Err(format!(
                    "core subject names must be <= {} chars",
                    MAX_SUBJECT_NAME_LEN
                ));
            }
            let key = subject_match_key(name);
            if out.keys.contains(&key) {
                continue;
            }
            out.names.push(name.to_string());
            out.keys.push(key);
        }
        if out.names.is_empty() {
            return Err("coreSubjects must contain at least one subject".into());
        }
        if out.names.len() > MAX_CORE_SUBJECTS {
            return Err(format!(
                "coreSubjects must contain at most {} subjects",
                MAX_CORE_SUBJECTS
            ));
        }
        Ok(out)
    }

    pub fn contains(&self, subject_name: &str) -> bool {
        let key = subject_match_key(subject_name);
        self.keys.iter().any(|k| *k == key)
    }

    /// Names as configured, for display.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Lowercased match keys, for store-side filtering.
    pub fn match_keys(&self) -> &[String] {
        &self.keys
    }
}

impl Default for CoreSubjectSet {
    fn default() -> Self {
        Self {
            names: DEFAULT_CORE_SUBJECTS.iter().map(|s| s.to_string()).collect(),
            keys: DEFAULT_CORE_SUBJECTS
                .iter()
                .map(|s| subject_match_key(s))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportsConfig {
    pub core_subjects: CoreSubjectSet,
}

#[derive(Debug, Clone, Copy)]
pub struct StorageConfig {
    pub busy_timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Reports,
    Storage,
}

impl SetupSection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            "storage" => Some(Self::Storage),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Reports => "setup.reports",
            Self::Storage => "setup.storage",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "coreSubjects": DEFAULT_CORE_SUBJECTS,
        }),
        SetupSection::Storage => json!({
            "busyTimeoutMs": DEFAULT_BUSY_TIMEOUT_MS,
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_core_subjects(v: &Value, key: &str) -> Result<CoreSubjectSet, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let mut names = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be an array of strings", key))?;
        names.push(s);
    }
    CoreSubjectSet::new(names)
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "coreSubjects" => {
                    let set = parse_core_subjects(v, k)?;
                    obj.insert(k.clone(), json!(set.names()));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Storage => match k.as_str() {
                "busyTimeoutMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 60_000)?));
                }
                _ => return Err(format!("unknown storage field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Apply field by field so one bad stored value keeps the rest.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(e) = merge_section_patch(section, &mut current, &single) {
                    tracing::warn!(
                        section = section.key(),
                        field = %k,
                        "ignoring stored setting: {}",
                        e
                    );
                }
            }
        }
    }
    Ok(current)
}

pub fn load_reports_config(conn: &Connection) -> anyhow::Result<ReportsConfig> {
    let section = load_section(conn, SetupSection::Reports)?;
    let core_subjects = section
        .get("coreSubjects")
        .map(|v| parse_core_subjects(v, "coreSubjects"))
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or_default();
    Ok(ReportsConfig { core_subjects })
}

pub fn load_storage_config(conn: &Connection) -> anyhow::Result<StorageConfig> {
    let section = load_section(conn, SetupSection::Storage)?;
    let ms = section
        .get("busyTimeoutMs")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)
        .max(0);
    Ok(StorageConfig {
        busy_timeout: Duration::from_millis(ms as u64),
    })
}
