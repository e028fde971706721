use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use uuid::Uuid;

/// The user a valid session token resolves to. Handlers receive this
/// already looked up; they never touch tokens themselves.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub login: String,
    pub full_name: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Salted SHA-256, stored as "salt$hexdigest".
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, digest_hex(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    digest_hex(salt, password) == digest
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

pub fn issue_session(conn: &Connection, user_id: i64, ttl_minutes: i64) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires = now + Duration::minutes(ttl_minutes);
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (&token, user_id, now.to_rfc3339(), expires.to_rfc3339()),
    )?;
    Ok(token)
}

pub fn revoke_session(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(n > 0)
}

/// RFC 3339 UTC strings compare lexicographically, so expiry checks
/// run as plain string comparisons in SQL.
pub fn purge_expired_sessions(conn: &Connection) -> anyhow::Result<usize> {
    let n = conn.execute(
        "DELETE FROM sessions WHERE expires_at < ?",
        [Utc::now().to_rfc3339()],
    )?;
    Ok(n)
}

pub fn user_for_token(conn: &Connection, token: &str) -> anyhow::Result<Option<CurrentUser>> {
    let user = conn
        .query_row(
            "SELECT u.id, u.login, u.full_name, u.is_active, u.created_at, u.updated_at
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ? AND s.expires_at >= ? AND u.is_active = 1",
            (token, Utc::now().to_rfc3339()),
            |row| {
                Ok(CurrentUser {
                    id: row.get(0)?,
                    login: row.get(1)?,
                    full_name: row.get(2)?,
                    is_active: row.get::<_, i64>(3)? != 0,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}
