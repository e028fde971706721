use crate::auth::CurrentUser;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    opt_i64_param, opt_str_param, require_db, require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const USERS_LIST_DEFAULT_LIMIT: i64 = 100;
const USERS_LIST_MAX_LIMIT: i64 = 1000;

pub fn user_json(user: &CurrentUser) -> serde_json::Value {
    json!({
        "id": user.id,
        "login": &user.login,
        "fullName": &user.full_name,
        "isActive": user.is_active,
        "createdAt": &user.created_at,
        "updatedAt": &user.updated_at,
    })
}

fn load_user(conn: &Connection, user_id: i64) -> Result<Option<CurrentUser>, HandlerErr> {
    conn.query_row(
        "SELECT id, login, full_name, is_active, created_at, updated_at
         FROM users WHERE id = ?",
        [user_id],
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
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    // `table` is one of our own literals, never request input.
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    conn.query_row(&sql, [], |r| r.get(0))
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_me(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let user = match require_user(conn, req) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };

    let students_count = match count_rows(conn, "students") {
        Ok(n) => n,
        Err(e) => return e.response(&req.id),
    };
    let groups_count = match count_rows(conn, "groups") {
        Ok(n) => n,
        Err(e) => return e.response(&req.id),
    };

    let mut payload = user_json(&user);
    payload["studentsCount"] = json!(students_count);
    payload["groupsCount"] = json!(groups_count);
    ok(&req.id, json!({ "user": payload }))
}

fn handle_update_me(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let user = match require_user(conn, req) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };

    let full_name = match opt_str_param(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let login = match opt_str_param(req, "login") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if full_name.is_none() && login.is_none() {
        return ok(&req.id, json!({ "user": user_json(&user) }));
    }

    if let Some(new_login) = login.as_deref() {
        if new_login != user.login {
            let taken: Option<i64> = match conn
                .query_row(
                    "SELECT id FROM users WHERE login = ? AND id != ?",
                    (new_login, user.id),
                    |r| r.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if taken.is_some() {
                return err(&req.id, "conflict", "login already taken", None);
            }
        }
    }

    let new_full_name = full_name.unwrap_or_else(|| user.full_name.clone());
    let new_login = login.unwrap_or_else(|| user.login.clone());
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE users SET full_name = ?, login = ?, updated_at = ? WHERE id = ?",
        (&new_full_name, &new_login, &now, user.id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    match load_user(conn, user.id) {
        Ok(Some(updated)) => ok(&req.id, json!({ "user": user_json(&updated) })),
        Ok(None) => err(&req.id, "not_found", "user not found", None),
        Err(e) => e.response(&req.id),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }
    let user_id = match req.params.get("userId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    match load_user(conn, user_id) {
        Ok(Some(user)) => ok(&req.id, json!({ "user": user_json(&user) })),
        Ok(None) => err(&req.id, "not_found", "user not found", None),
        Err(e) => e.response(&req.id),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }

    let offset = match opt_i64_param(req, "offset") {
        Ok(v) => v.unwrap_or(0).max(0),
        Err(e) => return e.response(&req.id),
    };
    let limit = match opt_i64_param(req, "limit") {
        Ok(v) => v
            .unwrap_or(USERS_LIST_DEFAULT_LIMIT)
            .clamp(1, USERS_LIST_MAX_LIMIT),
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, login, full_name, is_active, created_at, updated_at
         FROM users ORDER BY id LIMIT ? OFFSET ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((limit, offset), |row| {
            Ok(CurrentUser {
                id: row.get(0)?,
                login: row.get(1)?,
                full_name: row.get(2)?,
                is_active: row.get::<_, i64>(3)? != 0,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(
            &req.id,
            json!({ "users": users.iter().map(user_json).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.me" => Some(handle_me(state, req)),
        "users.updateMe" => Some(handle_update_me(state, req)),
        "users.get" => Some(handle_get(state, req)),
        "users.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
