use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::users::user_json;
use crate::ipc::helpers::{require_db, str_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn login_taken(conn: &Connection, login: &str) -> Result<bool, HandlerErr> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE login = ?", [login], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(existing.is_some())
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let login = match str_param(req, "login") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let full_name = match str_param(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // Passwords are taken verbatim; only emptiness is rejected.
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        Some(_) => return err(&req.id, "bad_params", "password must not be empty", None),
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    match login_taken(conn, &login) {
        Ok(true) => return err(&req.id, "conflict", "login already taken", None),
        Ok(false) => {}
        Err(e) => return e.response(&req.id),
    }

    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO users(login, password_hash, full_name, is_active, created_at, updated_at)
         VALUES(?, ?, ?, 1, ?, ?)",
        (
            &login,
            auth::hash_password(&password),
            &full_name,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }
    let user_id = conn.last_insert_rowid();
    log::info!("registered user {} ({})", user_id, login);

    ok(
        &req.id,
        json!({
            "user": {
                "id": user_id,
                "login": login,
                "fullName": full_name,
                "isActive": true,
                "createdAt": &now,
                "updatedAt": &now,
            }
        }),
    )
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let login = match str_param(req, "login") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let row: Option<(i64, String, i64)> = match conn
        .query_row(
            "SELECT id, password_hash, is_active FROM users WHERE login = ?",
            [&login],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // One message for both unknown login and wrong password.
    let Some((user_id, password_hash, is_active)) = row else {
        return err(&req.id, "unauthorized", "invalid login or password", None);
    };
    if !auth::verify_password(&password, &password_hash) {
        return err(&req.id, "unauthorized", "invalid login or password", None);
    }
    if is_active == 0 {
        return err(&req.id, "unauthorized", "account is deactivated", None);
    }

    let token = match auth::issue_session(conn, user_id, state.config.session_ttl_minutes) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "sessions" })),
            )
        }
    };

    let user = match auth::user_for_token(conn, &token) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "db_query_failed", "session lookup failed", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    log::info!("user {} logged in", user.id);

    ok(&req.id, json!({ "token": token, "user": user_json(&user) }))
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let token = match str_param(req, "token") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match auth::revoke_session(conn, &token) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
