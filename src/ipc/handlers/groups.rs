use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::students::{student_json, student_total, StudentRow};
use crate::ipc::helpers::{
    i64_param, opt_i64_param, opt_str_param, require_db, require_user, str_param, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct GroupRow {
    id: i64,
    name: String,
    control_sum: i64,
}

fn load_group(conn: &Connection, group_id: i64) -> Result<Option<GroupRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, control_sum FROM groups WHERE id = ?",
        [group_id],
        |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                name: row.get(1)?,
                control_sum: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn load_group_students(conn: &Connection, group_id: i64) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, full_name, group_id, score_1, score_2, score_3
             FROM students WHERE group_id = ?
             ORDER BY full_name, id",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    stmt.query_map([group_id], |row| {
        Ok(StudentRow {
            id: row.get(0)?,
            full_name: row.get(1)?,
            group_id: row.get(2)?,
            scores: [row.get(3)?, row.get(4)?, row.get(5)?],
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// Admission counts are derived from current grades on every read,
/// never stored.
fn group_payload(
    conn: &Connection,
    group: &GroupRow,
    include_students: bool,
) -> Result<serde_json::Value, HandlerErr> {
    let students = load_group_students(conn, group.id)?;
    let excluded = students
        .iter()
        .filter(|s| !grades::is_admitted(student_total(s), group.control_sum))
        .count();

    let mut payload = json!({
        "id": group.id,
        "name": &group.name,
        "controlSum": group.control_sum,
        "studentsCount": students.len(),
        "excludedStudentsCount": excluded,
    });
    if include_students {
        payload["students"] = students
            .iter()
            .map(|s| student_json(s, group.control_sum))
            .collect();
    }
    Ok(payload)
}

fn name_taken(conn: &Connection, name: &str, exclude_id: Option<i64>) -> Result<bool, HandlerErr> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM groups WHERE name = ?", [name], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(match (existing, exclude_id) {
        (Some(found), Some(me)) => found != me,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare("SELECT id, name, control_sum FROM groups ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let groups = stmt
        .query_map([], |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                name: row.get(1)?,
                control_sum: row.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let groups = match groups {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut payloads = Vec::with_capacity(groups.len());
    for group in &groups {
        match group_payload(conn, group, false) {
            Ok(p) => payloads.push(p),
            Err(e) => return e.response(&req.id),
        }
    }
    ok(&req.id, json!({ "groups": payloads }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }
    let group_id = match i64_param(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let group = match load_group(conn, group_id) {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "group not found", None),
        Err(e) => return e.response(&req.id),
    };
    match group_payload(conn, &group, true) {
        Ok(p) => ok(&req.id, json!({ "group": p })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }

    let name = match str_param(req, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let control_sum = match i64_param(req, "controlSum") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if control_sum < 1 {
        return err(
            &req.id,
            "validation_failed",
            "control sum must be positive",
            Some(json!({ "controlSum": control_sum })),
        );
    }

    match name_taken(conn, &name, None) {
        Ok(true) => return err(&req.id, "conflict", "group name already exists", None),
        Ok(false) => {}
        Err(e) => return e.response(&req.id),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO groups(name, control_sum) VALUES(?, ?)",
        (&name, control_sum),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    let group = GroupRow {
        id: conn.last_insert_rowid(),
        name,
        control_sum,
    };
    match group_payload(conn, &group, false) {
        Ok(p) => ok(&req.id, json!({ "group": p })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }
    let group_id = match i64_param(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut group = match load_group(conn, group_id) {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "group not found", None),
        Err(e) => return e.response(&req.id),
    };

    let name = match opt_str_param(req, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let control_sum = match opt_i64_param(req, "controlSum") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if name.is_none() && control_sum.is_none() {
        return match group_payload(conn, &group, false) {
            Ok(p) => ok(&req.id, json!({ "group": p })),
            Err(e) => e.response(&req.id),
        };
    }

    if let Some(new_control_sum) = control_sum {
        if new_control_sum < 1 {
            return err(
                &req.id,
                "validation_failed",
                "control sum must be positive",
                Some(json!({ "controlSum": new_control_sum })),
            );
        }
        group.control_sum = new_control_sum;
    }
    if let Some(new_name) = name {
        match name_taken(conn, &new_name, Some(group.id)) {
            Ok(true) => return err(&req.id, "conflict", "group name already exists", None),
            Ok(false) => group.name = new_name,
            Err(e) => return e.response(&req.id),
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE groups SET name = ?, control_sum = ? WHERE id = ?",
        (&group.name, group.control_sum, group.id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    match group_payload(conn, &group, false) {
        Ok(p) => ok(&req.id, json!({ "group": p })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }
    let group_id = match i64_param(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Delete in dependency order: a group takes its students with it.
    if let Err(e) = tx.execute("DELETE FROM students WHERE group_id = ?", [group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM groups WHERE id = ?", [group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.list" => Some(handle_list(state, req)),
        "groups.get" => Some(handle_get(state, req)),
        "groups.create" => Some(handle_create(state, req)),
        "groups.update" => Some(handle_update(state, req)),
        "groups.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
