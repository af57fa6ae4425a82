use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_riskbookd");
        let mut child = Command::new(exe)
            .env_remove("RISKBOOK_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn riskbookd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    fn call(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn result(&mut self, method: &str, params: Value) -> Value {
        let resp = self.call(method, params);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
        resp["result"].clone()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn register_all(sc: &mut Sidecar, workspace: &std::path::Path) {
    sc.result("workspace.select", json!({ "path": workspace.to_string_lossy() }));
    for (user, role) in [("admin", "Admin"), ("t1", "Teacher"), ("t2", "Teacher")] {
        sc.result(
            "auth.register",
            json!({ "username": user, "password": "pw", "role": role }),
        );
    }
}

fn login(sc: &mut Sidecar, user: &str) {
    let r = sc.result("auth.login", json!({ "username": user, "password": "pw" }));
    assert_eq!(r["redirect"]["view"], json!("dashboard.get"));
}

#[test]
fn teachers_only_see_their_own_records() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    register_all(&mut sc, workspace.path());

    login(&mut sc, "t1");
    let created = sc.result(
        "records.create",
        json!({
            "name": "AS1",
            "activities": 80,
            "quizzes": 80,
            "performance_task": 80,
            "exam": 80,
            "attendance": 95,
            "section": "Section A",
            "subject": "math"
        }),
    );
    assert_eq!(created["redirect"]["view"], json!("records.list"));
    let record_id = created["recordId"].as_str().expect("recordId").to_string();

    let got = sc.result("records.get", json!({ "recordId": record_id }));
    assert_eq!(got["record"]["finalGrade"], json!(80.0));
    assert_eq!(got["record"]["writtenWorks"], json!(80.0));
    assert_eq!(got["record"]["risk"], json!("Low Risk"));
    assert_eq!(got["record"]["owner"], json!("t1"));
    assert_eq!(got["canEdit"], json!(true));

    let dash = sc.result("dashboard.get", json!({}));
    assert_eq!(dash["total"], json!(1));
    assert_eq!(dash["atRisk"], json!(0));

    login(&mut sc, "t2");
    let listed = sc.result("records.list", json!({}));
    assert_eq!(listed["total"], json!(0));
    assert_eq!(listed["records"], json!([]));
    assert_eq!(listed["sectionsList"], json!([]));

    let denied = sc.result("records.get", json!({ "recordId": record_id }));
    assert_eq!(denied["noticeCode"], json!("denied"));
    assert_eq!(denied["notice"], json!("You can only view records you added."));
    let denied = sc.result(
        "records.update",
        json!({ "recordId": record_id, "name": "hijack" }),
    );
    assert_eq!(denied["notice"], json!("You can only edit records you added."));
    let denied = sc.result("records.delete", json!({ "recordId": record_id }));
    assert_eq!(denied["notice"], json!("You can only delete records you added."));
    assert_ne!(denied["redirect"]["view"], json!("confirm.view"));

    let dash = sc.result("dashboard.get", json!({}));
    assert_eq!(dash["total"], json!(0));
}

#[test]
fn admin_reads_and_deletes_all_but_edits_only_own() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    register_all(&mut sc, workspace.path());

    login(&mut sc, "t1");
    let created = sc.result("records.create", json!({ "name": "AS1", "exam": "10" }));
    let record_id = created["recordId"].as_str().expect("recordId").to_string();

    login(&mut sc, "admin");
    let listed = sc.result("records.list", json!({}));
    assert_eq!(listed["total"], json!(1));
    let dash = sc.result("dashboard.get", json!({}));
    assert_eq!(dash["atRisk"], json!(1));
    assert_eq!(dash["role"], json!("Admin"));

    let got = sc.result("records.get", json!({ "recordId": record_id }));
    assert_eq!(got["canEdit"], json!(false));
    assert_eq!(got["canDelete"], json!(true));

    let edit = sc.result(
        "records.update",
        json!({ "recordId": record_id, "name": "renamed" }),
    );
    assert_eq!(edit["noticeCode"], json!("denied"));
    let got = sc.result("records.get", json!({ "recordId": record_id }));
    assert_eq!(got["record"]["name"], json!("AS1"));

    let delete = sc.result("records.delete", json!({ "recordId": record_id }));
    assert_eq!(delete["redirect"]["view"], json!("confirm.view"));
}

#[test]
fn filters_and_pagination_stay_in_scope() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    register_all(&mut sc, workspace.path());

    login(&mut sc, "t2");
    sc.result("records.create", json!({ "name": "Other", "section": "Section A" }));

    login(&mut sc, "t1");
    for i in 0..12 {
        let section = if i % 3 == 0 { "" } else { "Section A" };
        let score = if i < 4 { "100" } else { "0" };
        let name = format!("Student {i:02}");
        sc.result(
            "records.create",
            json!({
                "name": name,
                "performance_task": score,
                "exam": score,
                "section": section,
                "subject": "science"
            }),
        );
    }

    let page1 = sc.result("records.list", json!({}));
    assert_eq!(page1["total"], json!(12));
    assert_eq!(page1["pageCount"], json!(2));
    assert_eq!(page1["records"].as_array().expect("records").len(), 10);
    let page2 = sc.result("records.list", json!({ "page": 2 }));
    assert_eq!(page2["records"].as_array().expect("records").len(), 2);
    assert_eq!(page1["sectionsList"], json!(["Section A", "Unassigned"]));
    assert_eq!(page1["subjectsList"], json!(["science"]));

    let unassigned = sc.result("records.list", json!({ "section": "Unassigned" }));
    assert_eq!(unassigned["total"], json!(4));
    let section_a = sc.result("records.list", json!({ "section": "Section A" }));
    assert_eq!(section_a["total"], json!(8));
    let at_risk = sc.result("records.list", json!({ "risk": "High Risk" }));
    assert_eq!(at_risk["total"], json!(8));
    let query = sc.result("records.list", json!({ "q": "student 0" }));
    assert_eq!(query["total"], json!(10));
    let literal = sc.result("records.list", json!({ "q": "%" }));
    assert_eq!(literal["total"], json!(0));
}

#[test]
fn invalid_scores_are_rejected_inline() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    register_all(&mut sc, workspace.path());
    login(&mut sc, "t1");

    let bad = sc.call("records.create", json!({ "name": "AS1", "exam": "eighty" }));
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("validation_failed"));
    assert_eq!(bad["error"]["details"]["field"], json!("exam"));

    let listed = sc.result("records.list", json!({}));
    assert_eq!(listed["total"], json!(0));
}
