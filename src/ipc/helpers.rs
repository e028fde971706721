use rusqlite::Connection;
use serde_json::json;

use crate::auth::{self, CurrentUser};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Resolves the request's bearer token to a user. Every method except
/// health, workspace.select and auth.* goes through here.
pub fn require_user(conn: &Connection, req: &Request) -> Result<CurrentUser, HandlerErr> {
    let token = req
        .params
        .get("token")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HandlerErr::new("unauthorized", "missing token"))?;

    match auth::user_for_token(conn, token) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(HandlerErr::new("unauthorized", "invalid or expired token")),
        Err(e) => Err(HandlerErr::new("db_query_failed", e.to_string())),
    }
}

/// Required non-empty string param, trimmed.
pub fn str_param(req: &Request, key: &str) -> Result<String, HandlerErr> {
    let value = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    if value.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be empty", key),
        ));
    }
    Ok(value)
}

/// Optional string param. Distinguishes "absent" (None) from
/// "present" so partial updates can leave fields untouched.
pub fn opt_str_param(req: &Request, key: &str) -> Result<Option<String>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) => {
            let value = v.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                HandlerErr::with_details(
                    "bad_params",
                    format!("{} must be a string", key),
                    json!({ "field": key }),
                )
            })?;
            if value.is_empty() {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{} must not be empty", key),
                ));
            }
            Ok(Some(value))
        }
    }
}

pub fn i64_param(req: &Request, key: &str) -> Result<i64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn opt_i64_param(req: &Request, key: &str) -> Result<Option<i64>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            HandlerErr::with_details(
                "bad_params",
                format!("{} must be an integer", key),
                json!({ "field": key }),
            )
        }),
    }
}
