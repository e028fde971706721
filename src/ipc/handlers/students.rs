use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    i64_param, opt_i64_param, opt_str_param, require_db, require_user, str_param, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct StudentRow {
    pub id: i64,
    pub full_name: String,
    pub group_id: i64,
    pub scores: [Option<String>; 3],
}

pub fn student_total(row: &StudentRow) -> i64 {
    grades::total_score(row.scores.iter().map(|s| s.as_deref()))
}

pub fn student_json(row: &StudentRow, control_sum: i64) -> serde_json::Value {
    let total = student_total(row);
    json!({
        "id": row.id,
        "fullName": &row.full_name,
        "groupId": row.group_id,
        "score_1": &row.scores[0],
        "score_2": &row.scores[1],
        "score_3": &row.scores[2],
        "totalScore": total,
        "admitted": grades::is_admitted(total, control_sum),
    })
}

enum ScoreEdit {
    Keep,
    Clear,
    Set(grades::GradeSymbol),
}

impl ScoreEdit {
    fn apply(self, current: Option<String>) -> Option<String> {
        match self {
            Self::Keep => current,
            Self::Clear => None,
            Self::Set(sym) => Some(sym.as_str().to_string()),
        }
    }
}

/// Grade slot param. Absent means "leave as is", null or a blank
/// string clears the slot, anything else must parse strictly.
fn score_param(req: &Request, key: &str) -> Result<ScoreEdit, HandlerErr> {
    match req.params.get(key) {
        None => Ok(ScoreEdit::Keep),
        Some(serde_json::Value::Null) => Ok(ScoreEdit::Clear),
        Some(v) => {
            let raw = v.as_str().ok_or_else(|| {
                HandlerErr::with_details(
                    "bad_params",
                    format!("{} must be a string or null", key),
                    json!({ "field": key }),
                )
            })?;
            match grades::parse_grade_symbol(Some(raw)) {
                Ok(Some(sym)) => Ok(ScoreEdit::Set(sym)),
                Ok(None) => Ok(ScoreEdit::Clear),
                Err(e) => Err(HandlerErr::with_details(
                    "validation_failed",
                    e.to_string(),
                    json!({ "field": key, "value": e.raw }),
                )),
            }
        }
    }
}

fn group_control_sum(conn: &Connection, group_id: i64) -> Result<Option<i64>, HandlerErr> {
    conn.query_row(
        "SELECT control_sum FROM groups WHERE id = ?",
        [group_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn load_student(conn: &Connection, student_id: i64) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, full_name, group_id, score_1, score_2, score_3
         FROM students WHERE id = ?",
        [student_id],
        |row| {
            Ok(StudentRow {
                id: row.get(0)?,
                full_name: row.get(1)?,
                group_id: row.get(2)?,
                scores: [row.get(3)?, row.get(4)?, row.get(5)?],
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.full_name, s.group_id, s.score_1, s.score_2, s.score_3,
                g.name, g.control_sum
         FROM students s
         JOIN groups g ON g.id = s.group_id
         ORDER BY s.full_name, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let student = StudentRow {
                id: row.get(0)?,
                full_name: row.get(1)?,
                group_id: row.get(2)?,
                scores: [row.get(3)?, row.get(4)?, row.get(5)?],
            };
            let group_name: String = row.get(6)?;
            let control_sum: i64 = row.get(7)?;
            let mut payload = student_json(&student, control_sum);
            payload["groupName"] = json!(group_name);
            Ok(payload)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
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
    let student_id = match i64_param(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let student = match load_student(conn, student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return e.response(&req.id),
    };
    let control_sum = match group_control_sum(conn, student.group_id) {
        Ok(v) => v.unwrap_or(0),
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({ "student": student_json(&student, control_sum) }),
    )
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }

    let full_name = match str_param(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let group_id = match i64_param(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let control_sum = match group_control_sum(conn, group_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "group not found", None),
        Err(e) => return e.response(&req.id),
    };

    let mut scores: [Option<String>; 3] = [None, None, None];
    for (i, key) in ["score_1", "score_2", "score_3"].into_iter().enumerate() {
        match score_param(req, key) {
            Ok(edit) => scores[i] = edit.apply(None),
            Err(e) => return e.response(&req.id),
        }
    }

    if let Err(e) = conn.execute(
        "INSERT INTO students(full_name, group_id, score_1, score_2, score_3)
         VALUES(?, ?, ?, ?, ?)",
        (&full_name, group_id, &scores[0], &scores[1], &scores[2]),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    let student = StudentRow {
        id: conn.last_insert_rowid(),
        full_name,
        group_id,
        scores,
    };
    ok(
        &req.id,
        json!({ "student": student_json(&student, control_sum) }),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }
    let student_id = match i64_param(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut student = match load_student(conn, student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return e.response(&req.id),
    };

    let new_group_id = match opt_i64_param(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Some(new_group_id) = new_group_id {
        match group_control_sum(conn, new_group_id) {
            Ok(Some(_)) => student.group_id = new_group_id,
            Ok(None) => return err(&req.id, "bad_params", "group not found", None),
            Err(e) => return e.response(&req.id),
        }
    }

    let full_name = match opt_str_param(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Some(full_name) = full_name {
        student.full_name = full_name;
    }

    for (i, key) in ["score_1", "score_2", "score_3"].into_iter().enumerate() {
        match score_param(req, key) {
            Ok(edit) => student.scores[i] = edit.apply(student.scores[i].take()),
            Err(e) => return e.response(&req.id),
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE students
         SET full_name = ?, group_id = ?, score_1 = ?, score_2 = ?, score_3 = ?
         WHERE id = ?",
        (
            &student.full_name,
            student.group_id,
            &student.scores[0],
            &student.scores[1],
            &student.scores[2],
            student.id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    let control_sum = match group_control_sum(conn, student.group_id) {
        Ok(v) => v.unwrap_or(0),
        Err(e) => return e.response(&req.id),
    };
    ok(
        &req.id,
        json!({ "student": student_json(&student, control_sum) }),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, req) {
        return e.response(&req.id);
    }
    let student_id = match i64_param(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let deleted = match conn.execute("DELETE FROM students WHERE id = ?", [student_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.get" => Some(handle_get(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
