use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("missing_code")
}

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, i64) {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-reg",
        "auth.register",
        json!({ "login": "teacher", "password": "pw", "fullName": "Teacher" }),
    );
    let login = request_ok(
        stdin,
        reader,
        "setup-login",
        "auth.login",
        json!({ "login": "teacher", "password": "pw" }),
    );
    let token = login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();
    let group = request_ok(
        stdin,
        reader,
        "setup-group",
        "groups.create",
        json!({ "token": token, "name": "IS-21", "controlSum": 10 }),
    );
    let group_id = group
        .get("group")
        .and_then(|g| g.get("id"))
        .and_then(|v| v.as_i64())
        .expect("group id");
    (token, group_id)
}

#[test]
fn out_of_set_grade_symbols_are_rejected_on_write() {
    let workspace = temp_dir("gradebookd-validate-reject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (token, group_id) = setup(&mut stdin, &mut reader, &workspace);

    for (i, bad) in ["6", "A", "x"].into_iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "students.create",
            json!({
                "token": token,
                "fullName": "Ivanov Ivan",
                "groupId": group_id,
                "score_1": bad
            }),
        );
        assert_eq!(error_code(&resp), "validation_failed", "symbol {:?}", bad);
        assert_eq!(
            resp.get("error")
                .and_then(|e| e.get("details"))
                .and_then(|d| d.get("field"))
                .and_then(|v| v.as_str()),
            Some("score_1")
        );
    }

    // Nothing got stored.
    let students = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "students.list",
        json!({ "token": token }),
    );
    assert_eq!(
        students
            .get("students")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(0)
    );
}

#[test]
fn grade_symbols_are_trimmed_and_canonicalized() {
    let workspace = temp_dir("gradebookd-validate-trim");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (token, group_id) = setup(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({
            "token": token,
            "fullName": "Ivanov Ivan",
            "groupId": group_id,
            "score_1": " 5 ",
            "score_2": "  ",
        }),
    );
    let student = created.get("student").expect("student payload");
    assert_eq!(student.get("score_1"), Some(&json!("5")));
    assert_eq!(student.get("score_2"), Some(&json!(null)));
    assert_eq!(student.get("totalScore"), Some(&json!(5)));
}

#[test]
fn a_slot_can_be_cleared_back_to_null() {
    let workspace = temp_dir("gradebookd-validate-clear");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (token, group_id) = setup(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({
            "token": token,
            "fullName": "Ivanov Ivan",
            "groupId": group_id,
            "score_1": "5",
            "score_2": "4"
        }),
    );
    let student_id = created
        .get("student")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_i64())
        .expect("student id");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.update",
        json!({ "token": token, "studentId": student_id, "score_2": null }),
    );
    let student = updated.get("student").expect("student payload");
    assert_eq!(student.get("score_1"), Some(&json!("5")));
    assert_eq!(student.get("score_2"), Some(&json!(null)));
    assert_eq!(student.get("totalScore"), Some(&json!(5)));
}

#[test]
fn moving_to_an_unknown_group_is_rejected() {
    let workspace = temp_dir("gradebookd-validate-badgroup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (token, group_id) = setup(&mut stdin, &mut reader, &workspace);

    let create_bad = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "token": token, "fullName": "Ivanov Ivan", "groupId": 9999 }),
    );
    assert_eq!(error_code(&create_bad), "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "token": token, "fullName": "Ivanov Ivan", "groupId": group_id }),
    );
    let student_id = created
        .get("student")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_i64())
        .expect("student id");

    let move_bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.update",
        json!({ "token": token, "studentId": student_id, "groupId": 9999 }),
    );
    assert_eq!(error_code(&move_bad), "bad_params");
}

#[test]
fn unknown_student_ids_are_not_found() {
    let workspace = temp_dir("gradebookd-validate-notfound");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (token, _group_id) = setup(&mut stdin, &mut reader, &workspace);

    for (id, method) in [
        ("1", "students.get"),
        ("2", "students.update"),
        ("3", "students.delete"),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            method,
            json!({ "token": token, "studentId": 424242 }),
        );
        assert_eq!(error_code(&resp), "not_found", "method {}", method);
    }
}
