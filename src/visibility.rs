//! Role and ownership scoping for records.
//!
//! Admins read and delete everything; edits are owner-only for every role.
//! Teachers only ever see their own records.

use std::fmt;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UNASSIGNED: &str = "Unassigned";
pub const ALL: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Teacher => "Teacher",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn new(username: &str, role: Role) -> Self {
        Self {
            username: username.to_string(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Edit,
    Delete,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Read => "view",
            Intent::Edit => "edit",
            Intent::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    OwnedBy(String),
}

impl Scope {
    pub fn permits(&self, owner: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::OwnedBy(u) => u == owner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denied {
    #[error("You can only {intent} records you added.")]
    NotOwner { intent: Intent },
    #[error("Admin access required.")]
    AdminRequired,
}

pub fn scope_for(actor: &Actor, intent: Intent) -> Scope {
    match (actor.role, intent) {
        (Role::Admin, Intent::Read) | (Role::Admin, Intent::Delete) => Scope::All,
        _ => Scope::OwnedBy(actor.username.clone()),
    }
}

pub fn authorize(actor: &Actor, intent: Intent, owner: &str) -> Result<(), Denied> {
    if scope_for(actor, intent).permits(owner) {
        Ok(())
    } else {
        Err(Denied::NotOwner { intent })
    }
}

pub fn require_admin(actor: &Actor) -> Result<(), Denied> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(Denied::AdminRequired)
    }
}

/// Filter on a categorical column where blank means "Unassigned".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    All,
    Unassigned,
    Named(String),
}

impl Category {
    pub fn parse(raw: Option<&str>) -> Self {
        let v = raw.map(str::trim).unwrap_or("");
        if v.is_empty() || v == ALL {
            Category::All
        } else if v == UNASSIGNED {
            Category::Unassigned
        } else {
            Category::Named(v.to_string())
        }
    }

    fn push_clause(&self, column: &str, clauses: &mut Vec<String>, params: &mut Vec<Value>) {
        match self {
            Category::All => {}
            Category::Unassigned => {
                clauses.push(format!("({column} IS NULL OR {column} = '')"));
            }
            Category::Named(v) => {
                clauses.push(format!("{column} = ?"));
                params.push(Value::Text(v.clone()));
            }
        }
    }
}

/// Display label for a stored category value.
pub fn category_label(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") => UNASSIGNED.to_string(),
        Some(v) => v.to_string(),
    }
}

/// Value to store for a submitted category; "Unassigned" is stored blank.
pub fn stored_category(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") => String::new(),
        Some(UNASSIGNED) => String::new(),
        Some(v) => v.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub query: Option<String>,
    pub section: Category,
    pub subject: Category,
    pub risk: Option<String>,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            query: None,
            section: Category::All,
            subject: Category::All,
            risk: None,
        }
    }
}

impl RecordFilter {
    pub fn from_params(params: &serde_json::Value) -> Self {
        let text = |k: &str| params.get(k).and_then(|v| v.as_str());
        let query = text("q")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let risk = text("risk")
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != ALL)
            .map(str::to_string);
        Self {
            query,
            section: Category::parse(text("section")),
            subject: Category::parse(text("subject")),
            risk,
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Builds the `WHERE` clause for `records` that applies the scope and filter.
pub fn where_clause(scope: &Scope, filter: &RecordFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Scope::OwnedBy(owner) = scope {
        clauses.push("owner = ?".to_string());
        params.push(Value::Text(owner.clone()));
    }
    if let Some(q) = &filter.query {
        // SQLite LIKE is ASCII case-insensitive.
        clauses.push("name LIKE ? ESCAPE '\\'".to_string());
        params.push(Value::Text(format!("%{}%", escape_like(q))));
    }
    filter.section.push_clause("section", &mut clauses, &mut params);
    filter.subject.push_clause("subject", &mut clauses, &mut params);
    if let Some(risk) = &filter.risk {
        clauses.push("risk = ?".to_string());
        params.push(Value::Text(risk.clone()));
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}
