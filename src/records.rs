use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::grading::{assess, Assessment, ScoreInputs};
use crate::visibility::{category_label, stored_category, where_clause, RecordFilter, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub attendance: f64,
    pub activities: f64,
    pub quizzes: f64,
    pub performance_task: f64,
    pub exam: f64,
    pub written_works: f64,
    pub final_grade: f64,
    pub risk: String,
    pub notes: String,
    pub section: String,
    pub subject: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Record {
    pub fn section_label(&self) -> String {
        category_label(Some(self.section.as_str()))
    }
}

/// Validated user input for one record; derived fields are computed on write.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub name: String,
    pub attendance: f64,
    pub scores: ScoreInputs,
    pub notes: String,
    pub section: String,
    pub subject: String,
}

impl RecordDraft {
    pub fn assessment(&self) -> Assessment {
        assess(&self.scores)
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, ValidationError> {
        let field = |k: &str| params.get(k);
        let name = text_value(field("name")).trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::new("name", "missing name"));
        }
        Ok(Self {
            name,
            attendance: score_value("attendance", field("attendance"))?,
            scores: ScoreInputs {
                activities: score_value("activities", field("activities"))?,
                quizzes: score_value("quizzes", field("quizzes"))?,
                performance_task: score_value("performance_task", field("performance_task"))?,
                exam: score_value("exam", field("exam"))?,
            },
            notes: text_value(field("notes")),
            section: stored_category(Some(text_value(field("section")).as_str())),
            subject: stored_category(Some(text_value(field("subject")).as_str())),
        })
    }

    pub fn summary(&self) -> serde_json::Value {
        json!({
            "attendance": self.attendance,
            "activities": self.scores.activities,
            "quizzes": self.scores.quizzes,
            "performance_task": self.scores.performance_task,
            "exam": self.scores.exam,
        })
    }
}

fn text_value(v: Option<&serde_json::Value>) -> String {
    match v {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Parses a numeric form field. Blank or absent means 0.
pub fn score_value(field: &str, v: Option<&serde_json::Value>) -> Result<f64, ValidationError> {
    let parsed = match v {
        None | Some(serde_json::Value::Null) => Some(0.0),
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Some(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(x) if x.is_finite() && x >= 0.0 => Ok(x),
        Some(_) => Err(ValidationError::new(field, "must be a non-negative number")),
        None => Err(ValidationError::new(field, "must be numeric")),
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

const RECORD_COLUMNS: &str = "id, name, owner, attendance, activities, quizzes, performance_task, exam,
    written_works, final_grade, risk, notes, section, subject, created_at, updated_at";

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        id: r.get(0)?,
        name: r.get(1)?,
        owner: r.get(2)?,
        attendance: r.get(3)?,
        activities: r.get(4)?,
        quizzes: r.get(5)?,
        performance_task: r.get(6)?,
        exam: r.get(7)?,
        written_works: r.get(8)?,
        final_grade: r.get(9)?,
        risk: r.get(10)?,
        notes: r.get(11)?,
        section: r.get::<_, Option<String>>(12)?.unwrap_or_default(),
        subject: r.get::<_, Option<String>>(13)?.unwrap_or_default(),
        created_at: r.get(14)?,
        updated_at: r.get(15)?,
    })
}

pub fn load(conn: &Connection, record_id: &str) -> rusqlite::Result<Option<Record>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
        [record_id],
        row_to_record,
    )
    .optional()
}

/// Inserts a new record owned by `owner` and returns its id.
pub fn insert(conn: &Connection, owner: &str, draft: &RecordDraft) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    let a = draft.assessment();
    let now = now_stamp();
    conn.execute(
        "INSERT INTO records(
            id, name, owner, attendance, activities, quizzes, performance_task, exam,
            written_works, final_grade, risk, notes, section, subject, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter([
            Value::Text(id.clone()),
            Value::Text(draft.name.clone()),
            Value::Text(owner.to_string()),
            Value::Real(draft.attendance),
            Value::Real(draft.scores.activities),
            Value::Real(draft.scores.quizzes),
            Value::Real(draft.scores.performance_task),
            Value::Real(draft.scores.exam),
            Value::Real(a.written_works),
            Value::Real(a.final_grade),
            Value::Text(a.risk.label().to_string()),
            Value::Text(draft.notes.clone()),
            Value::Text(draft.section.clone()),
            Value::Text(draft.subject.clone()),
            Value::Text(now.clone()),
            Value::Text(now),
        ]),
    )?;
    Ok(id)
}

/// Rewrites the mutable fields and their derived values. Owner never changes.
pub fn update(conn: &Connection, record_id: &str, draft: &RecordDraft) -> rusqlite::Result<usize> {
    let a = draft.assessment();
    conn.execute(
        "UPDATE records SET
            name = ?, attendance = ?, activities = ?, quizzes = ?, performance_task = ?, exam = ?,
            written_works = ?, final_grade = ?, risk = ?, notes = ?, section = ?, subject = ?,
            updated_at = ?
         WHERE id = ?",
        params_from_iter([
            Value::Text(draft.name.clone()),
            Value::Real(draft.attendance),
            Value::Real(draft.scores.activities),
            Value::Real(draft.scores.quizzes),
            Value::Real(draft.scores.performance_task),
            Value::Real(draft.scores.exam),
            Value::Real(a.written_works),
            Value::Real(a.final_grade),
            Value::Text(a.risk.label().to_string()),
            Value::Text(draft.notes.clone()),
            Value::Text(draft.section.clone()),
            Value::Text(draft.subject.clone()),
            Value::Text(now_stamp()),
            Value::Text(record_id.to_string()),
        ]),
    )
}

pub fn delete(conn: &Connection, record_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM records WHERE id = ?", [record_id])
}

pub fn count(conn: &Connection, scope: &Scope, filter: &RecordFilter) -> rusqlite::Result<usize> {
    let (clause, params) = where_clause(scope, filter);
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM records {clause}"),
        params_from_iter(params),
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

/// Records in scope, ordered by creation. `page` is `(offset, limit)`.
pub fn list(
    conn: &Connection,
    scope: &Scope,
    filter: &RecordFilter,
    page: Option<(usize, usize)>,
) -> rusqlite::Result<Vec<Record>> {
    let (clause, mut params) = where_clause(scope, filter);
    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records {clause} ORDER BY rowid");
    if let Some((offset, limit)) = page {
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(Value::Integer(limit as i64));
        params.push(Value::Integer(offset as i64));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sorted distinct labels of a categorical column within `scope`.
pub fn category_options(
    conn: &Connection,
    scope: &Scope,
    column: CategoryColumn,
) -> rusqlite::Result<Vec<String>> {
    let (clause, params) = where_clause(scope, &RecordFilter::default());
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {} FROM records {clause}",
        column.as_str()
    ))?;
    let mut labels = stmt
        .query_map(params_from_iter(params), |r| r.get::<_, Option<String>>(0))?
        .map(|v| v.map(|s| category_label(s.as_deref())))
        .collect::<Result<Vec<_>, _>>()?;
    labels.sort();
    labels.dedup();
    Ok(labels)
}

#[derive(Debug, Clone, Copy)]
pub enum CategoryColumn {
    Section,
    Subject,
}

impl CategoryColumn {
    fn as_str(self) -> &'static str {
        match self {
            CategoryColumn::Section => "section",
            CategoryColumn::Subject => "subject",
        }
    }
}
