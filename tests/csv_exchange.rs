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

const UPLOAD: &str = "name,section,subject,activities,quizzes,performance_task,exam,attendance,notes
Alice,Section A,math,85,90,88,92,95,Good student
,Section A,math,1,1,1,1,1,
Bob,Section A,science,70,abc,60,55,80,Needs help
\"Cruz, Dana\",,science,60,70,50,40,90,\"said \"\"hi\"\"\"
";

fn signed_in(sc: &mut Sidecar, workspace: &std::path::Path) {
    sc.result("workspace.select", json!({ "path": workspace.to_string_lossy() }));
    for (user, role) in [("admin", "Admin"), ("t1", "Teacher")] {
        sc.result(
            "auth.register",
            json!({ "username": user, "password": "pw", "role": role }),
        );
    }
    sc.result("auth.login", json!({ "username": "t1", "password": "pw" }));
}

#[test]
fn preview_reports_bad_rows_and_save_imports_the_rest() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    signed_in(&mut sc, workspace.path());

    let preview = sc.result("exchange.previewCsv", json!({ "csv": UPLOAD }));
    assert_eq!(preview["validCount"], json!(2));
    assert_eq!(preview["errorCount"], json!(2));
    assert_eq!(preview["errors"][0]["row"], json!(2));
    assert_eq!(preview["errors"][0]["errors"], json!(["missing name"]));
    assert_eq!(preview["errors"][1]["row"], json!(3));
    assert_eq!(preview["errors"][1]["errors"], json!(["invalid numeric: quizzes"]));
    assert_eq!(preview["rows"][0]["risk"], json!("Low Risk"));
    assert_eq!(preview["rows"][1]["draft"]["name"], json!("Cruz, Dana"));
    let batch = preview["batchToken"].as_str().expect("batchToken").to_string();

    // Nothing is written until the import is confirmed.
    let first = sc.result("exchange.saveImport", json!({ "batchToken": batch }));
    assert_eq!(first["redirect"]["view"], json!("confirm.view"));
    assert_eq!(sc.result("records.list", json!({}))["total"], json!(0));

    let token = first["redirect"]["params"]["token"].clone();
    let view = sc.result("confirm.view", json!({ "token": token }));
    assert_eq!(view["message"], json!("Import 2 record(s)?"));
    assert_eq!(view["items"], json!(["Alice", "Cruz, Dana"]));

    let saved = sc.result("exchange.saveImport", view["action"]["params"].clone());
    assert_eq!(saved["imported"], json!(2));
    assert_eq!(saved["redirect"]["view"], json!("records.list"));

    let listed = sc.result("records.list", json!({}));
    assert_eq!(listed["total"], json!(2));
    let names: Vec<&str> = listed["records"]
        .as_array()
        .expect("records")
        .iter()
        .map(|r| r["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["Alice", "Cruz, Dana"]);

    let replay = sc.result("exchange.saveImport", view["action"]["params"].clone());
    assert_eq!(replay["noticeCode"], json!("confirmation_expired"));
    assert_eq!(sc.result("records.list", json!({}))["total"], json!(2));

    sc.result("auth.login", json!({ "username": "admin", "password": "pw" }));
    let audit = sc.result("audit.list", json!({}));
    let details: Vec<&str> = audit["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["detail"].as_str().expect("detail"))
        .collect();
    assert_eq!(details.len(), 2);
    assert!(details.contains(&"Imported record Alice via CSV"));
    assert!(details.contains(&"Imported record Cruz, Dana via CSV"));
}

#[test]
fn batches_belong_to_their_uploader() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    signed_in(&mut sc, workspace.path());

    let preview = sc.result("exchange.previewCsv", json!({ "csv": UPLOAD }));
    let batch = preview["batchToken"].clone();

    sc.result("auth.login", json!({ "username": "admin", "password": "pw" }));
    let stolen = sc.result("exchange.saveImport", json!({ "batchToken": batch }));
    assert_eq!(stolen["redirect"]["view"], json!("exchange.previewCsv"));
    assert_eq!(stolen["noticeCode"], json!("confirmation_expired"));
}

#[test]
fn export_writes_scoped_rows() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    signed_in(&mut sc, workspace.path());
    sc.result(
        "records.create",
        json!({
            "name": "AS1",
            "activities": "80",
            "quizzes": "80",
            "performance_task": "80",
            "exam": "80",
            "section": "Section A",
            "subject": "math",
            "notes": "quiet, focused"
        }),
    );

    let out = workspace.path().join("export.csv");
    let exported = sc.result(
        "exchange.exportCsv",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(exported["rowsExported"], json!(1));
    let text = std::fs::read_to_string(&out).expect("read export");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("name,section,subject,activities,quizzes,performance_task,exam,attendance,final_grade,risk,notes")
    );
    assert_eq!(
        lines.next(),
        Some("AS1,Section A,math,80,80,80,80,0,80.00,Low Risk,\"quiet, focused\"")
    );

    sc.result("auth.login", json!({ "username": "admin", "password": "pw" }));
    sc.result("records.create", json!({ "name": "Admin's own" }));
    let inline = sc.result("exchange.exportCsv", json!({}));
    assert_eq!(inline["rowsExported"], json!(2));
}

#[test]
fn multi_line_notes_survive_export_and_import() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    signed_in(&mut sc, workspace.path());
    let notes = "Missed week 3.\nParent meeting, \"urgent\".";
    sc.result(
        "records.create",
        json!({ "name": "AS1", "exam": "70", "section": "Section A", "notes": notes }),
    );

    let exported = sc.result("exchange.exportCsv", json!({}));
    assert_eq!(exported["rowsExported"], json!(1));
    let csv = exported["csv"].as_str().expect("csv").to_string();

    let preview = sc.result("exchange.previewCsv", json!({ "csv": csv }));
    assert_eq!(preview["errorCount"], json!(0));
    assert_eq!(preview["validCount"], json!(1));
    let draft = &preview["rows"][0]["draft"];
    assert_eq!(draft["name"], json!("AS1"));
    assert_eq!(draft["notes"], json!(notes));
    assert_eq!(draft["section"], json!("Section A"));
}
