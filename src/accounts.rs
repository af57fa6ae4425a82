use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::visibility::{Actor, Role};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub created_at: String,
    #[serde(skip)]
    pub password_hash: String,
}

impl Account {
    pub fn actor(&self) -> Actor {
        Actor::new(&self.username, self.role)
    }
}

const ACCOUNT_COLUMNS: &str = "id, username, role, created_at, password_hash";

fn row_to_account(r: &Row<'_>) -> rusqlite::Result<Account> {
    let role: String = r.get(2)?;
    Ok(Account {
        id: r.get(0)?,
        username: r.get(1)?,
        // The column carries a CHECK constraint; anything else is corrupt data.
        role: Role::parse(&role).unwrap_or(Role::Teacher),
        created_at: r.get(3)?,
        password_hash: r.get(4)?,
    })
}

pub fn find_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM actors WHERE username = ?"),
        [username],
        row_to_account,
    )
    .optional()
}

pub fn find_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM actors WHERE id = ?"),
        [id],
        row_to_account,
    )
    .optional()
}

/// Inserts a new account unless the username is taken. Returns the new id,
/// or `None` on a duplicate.
pub fn insert(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    role: Role,
) -> rusqlite::Result<Option<String>> {
    if find_by_username(conn, username)?.is_some() {
        return Ok(None);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO actors(id, username, password_hash, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            username,
            password_hash,
            role.as_str(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    )?;
    Ok(Some(id))
}

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM actors ORDER BY username"
    ))?;
    let rows = stmt
        .query_map([], row_to_account)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM actors WHERE id = ?", [id])
}

pub fn set_role(conn: &Connection, id: &str, role: Role) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE actors SET role = ? WHERE id = ?",
        (role.as_str(), id),
    )
}

pub fn set_password(conn: &Connection, username: &str, password_hash: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE actors SET password_hash = ? WHERE username = ?",
        (password_hash, username),
    )
}
