use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::records::{Record, RecordDraft};

pub const EXPORT_HEADER: &[&str] = &[
    "name",
    "section",
    "subject",
    "activities",
    "quizzes",
    "performance_task",
    "exam",
    "attendance",
    "final_grade",
    "risk",
    "notes",
];

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                buf.push('"');
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(std::mem::take(&mut buf));
            continue;
        }
        buf.push(ch);
    }
    out.push(buf);
    out
}

/// Splits CSV text into records. Line breaks inside quoted fields stay part
/// of the field, matching what `csv_quote` writes.
pub fn split_csv_records(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    for ch in text.chars() {
        match ch {
            '"' => {
                // An escaped quote toggles twice and leaves the state unchanged.
                in_quotes = !in_quotes;
                buf.push(ch);
            }
            '\n' if !in_quotes => {
                if buf.ends_with('\r') {
                    buf.pop();
                }
                out.push(std::mem::take(&mut buf));
            }
            _ => buf.push(ch),
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row: usize,
    pub errors: Vec<String>,
    pub raw: Map<String, Value>,
}

/// A parsed CSV upload waiting to be saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub owner: String,
    pub drafts: Vec<RecordDraft>,
    pub errors: Vec<RowError>,
}

/// Parses a header-keyed CSV into drafts. Data rows are numbered from 1;
/// rows with a missing name or a non-numeric score go to `errors`.
pub fn parse_import_csv(owner: &str, text: &str) -> ImportBatch {
    let records = split_csv_records(text);
    let mut lines = records.iter().filter(|l| !l.trim().is_empty());
    let header: Vec<String> = match lines.next() {
        Some(h) => parse_csv_record(h.trim_start_matches('\u{feff}'))
            .into_iter()
            .map(|k| k.trim().to_ascii_lowercase())
            .collect(),
        None => Vec::new(),
    };

    let mut drafts = Vec::new();
    let mut errors = Vec::new();
    for (idx, line) in lines.enumerate() {
        let row_no = idx + 1;
        let fields = parse_csv_record(line);
        let mut raw = Map::new();
        for (i, key) in header.iter().enumerate() {
            let v = fields.get(i).map(|s| s.trim()).unwrap_or("");
            raw.insert(key.clone(), Value::String(v.to_string()));
        }

        match RecordDraft::from_params(&Value::Object(raw.clone())) {
            Ok(d) => drafts.push(d),
            Err(e) => {
                let msg = if e.field == "name" {
                    "missing name".to_string()
                } else {
                    format!("invalid numeric: {}", e.field)
                };
                errors.push(RowError {
                    row: row_no,
                    errors: vec![msg],
                    raw,
                });
            }
        }
    }

    ImportBatch {
        owner: owner.to_string(),
        drafts,
        errors,
    }
}

pub fn export_csv(records: &[Record]) -> String {
    let mut csv = EXPORT_HEADER.join(",");
    csv.push('\n');
    for r in records {
        let row = [
            csv_quote(&r.name),
            csv_quote(&r.section),
            csv_quote(&r.subject),
            r.activities.to_string(),
            r.quizzes.to_string(),
            r.performance_task.to_string(),
            r.exam.to_string(),
            r.attendance.to_string(),
            format!("{:.2}", r.final_grade),
            csv_quote(&r.risk),
            csv_quote(&r.notes),
        ];
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    csv
}
