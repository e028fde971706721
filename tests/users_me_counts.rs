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
) -> String {
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
    login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

#[test]
fn me_reports_live_group_and_student_totals() {
    let workspace = temp_dir("gradebookd-users-counts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = setup(&mut stdin, &mut reader, &workspace);

    let me = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.me",
        json!({ "token": token }),
    );
    assert_eq!(
        me.get("user").and_then(|u| u.get("groupsCount")),
        Some(&json!(0))
    );
    assert_eq!(
        me.get("user").and_then(|u| u.get("studentsCount")),
        Some(&json!(0))
    );

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "groups.create",
        json!({ "token": token, "name": "IS-21", "controlSum": 10 }),
    );
    let group_id = group
        .get("group")
        .and_then(|g| g.get("id"))
        .and_then(|v| v.as_i64())
        .expect("group id");
    for (id, name) in [("3", "Ivanov Ivan"), ("4", "Petrov Petr")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "students.create",
            json!({ "token": token, "fullName": name, "groupId": group_id }),
        );
    }

    let me = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.me",
        json!({ "token": token }),
    );
    assert_eq!(
        me.get("user").and_then(|u| u.get("groupsCount")),
        Some(&json!(1))
    );
    assert_eq!(
        me.get("user").and_then(|u| u.get("studentsCount")),
        Some(&json!(2))
    );
}

#[test]
fn update_me_changes_profile_and_rejects_taken_logins() {
    let workspace = temp_dir("gradebookd-users-updateme");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = setup(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.register",
        json!({ "login": "other", "password": "pw", "fullName": "Other" }),
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.updateMe",
        json!({ "token": token, "fullName": "Petrova Anna" }),
    );
    assert_eq!(
        updated
            .get("user")
            .and_then(|u| u.get("fullName"))
            .and_then(|v| v.as_str()),
        Some("Petrova Anna")
    );

    let taken = request(
        &mut stdin,
        &mut reader,
        "3",
        "users.updateMe",
        json!({ "token": token, "login": "other" }),
    );
    assert_eq!(error_code(&taken), "conflict");

    // No fields at all is a no-op that echoes the current profile.
    let noop = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.updateMe",
        json!({ "token": token }),
    );
    assert_eq!(
        noop.get("user")
            .and_then(|u| u.get("fullName"))
            .and_then(|v| v.as_str()),
        Some("Petrova Anna")
    );
}

#[test]
fn users_list_pages_by_offset_and_limit() {
    let workspace = temp_dir("gradebookd-users-list");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = setup(&mut stdin, &mut reader, &workspace);

    for (id, login) in [("1", "anna"), ("2", "boris"), ("3", "vera")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "auth.register",
            json!({ "login": login, "password": "pw", "fullName": login }),
        );
    }

    let page = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.list",
        json!({ "token": token, "offset": 1, "limit": 2 }),
    );
    let users = page
        .get("users")
        .and_then(|v| v.as_array())
        .expect("users array");
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].get("login"), Some(&json!("anna")));
    assert_eq!(users[1].get("login"), Some(&json!("boris")));

    let rest = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.list",
        json!({ "token": token, "offset": 3, "limit": 10 }),
    );
    assert_eq!(
        rest.get("users").and_then(|v| v.as_array()).map(Vec::len),
        Some(1)
    );

    let by_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "users.get",
        json!({ "token": token, "userId": 1 }),
    );
    assert_eq!(
        by_id
            .get("user")
            .and_then(|u| u.get("login"))
            .and_then(|v| v.as_str()),
        Some("teacher")
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "7",
        "users.get",
        json!({ "token": token, "userId": 424242 }),
    );
    assert_eq!(error_code(&missing), "not_found");
}
