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
    let exe = env!("CARGO_BIN_EXE_taskcountd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn taskcountd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
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

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("taskcount-router-smoke");
    let bundle_out = workspace.join("smoke-backup.taskcount.zip");
    let roster_csv = workspace.join("alunos.csv");
    std::fs::write(
        &roster_csv,
        "Nome do Aluno,RA,Dig. RA\nAna,123456789,X\n,1,2\nBia,abc,1\n",
    )
    .expect("write roster");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let early = request(&mut stdin, &mut reader, "2", "counter.list", json!({}));
    assert_eq!(error_code(&early), Some("no_workspace"));

    let selected = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["result"]["storeExists"], false);

    let roster = request(
        &mut stdin,
        &mut reader,
        "4",
        "roster.import",
        json!({ "path": roster_csv.to_string_lossy() }),
    );
    assert_eq!(roster["result"]["imported"], 1);
    assert_eq!(roster["result"]["rejected"].as_array().map(|r| r.len()), Some(2));

    let listed = request(&mut stdin, &mut reader, "5", "roster.list", json!({}));
    assert_eq!(
        listed["result"]["students"][0]["canonicalKey"],
        "23456789x-sp"
    );

    let empty_batch = request(&mut stdin, &mut reader, "6", "tasks.import", json!({ "paths": [] }));
    assert_eq!(empty_batch["ok"], true);
    assert!(workspace.join("contador_tarefas.csv").is_file());

    let bad_params = request(&mut stdin, &mut reader, "7", "tasks.import", json!({}));
    assert_eq!(error_code(&bad_params), Some("bad_params"));
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "tasks.importDirectory",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "9", "counter.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "10", "runs.list", json!({}));

    let settings = request(
        &mut stdin,
        &mut reader,
        "11",
        "settings.update",
        json!({ "outlierZ": 2.5, "topN": 2 }),
    );
    assert_eq!(settings["result"]["outlierZ"].as_f64(), Some(2.5));
    let settings = request(&mut stdin, &mut reader, "12", "settings.get", json!({}));
    assert_eq!(settings["result"]["topN"], 2);
    let rejected = request(
        &mut stdin,
        &mut reader,
        "13",
        "settings.update",
        json!({ "outlierZ": 0 }),
    );
    assert_eq!(error_code(&rejected), Some("bad_params"));

    let report = request(&mut stdin, &mut reader, "14", "report.build", json!({}));
    assert_eq!(report["result"]["options"]["topN"], 2);
    assert_eq!(report["result"]["rows"].as_array().map(|r| r.len()), Some(0));

    let exported = request(
        &mut stdin,
        &mut reader,
        "15",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(exported["ok"], true);
    let imported = request(
        &mut stdin,
        &mut reader,
        "16",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(imported["ok"], true);
    let listed = request(&mut stdin, &mut reader, "17", "roster.list", json!({}));
    assert_eq!(listed["result"]["students"].as_array().map(|s| s.len()), Some(1));

    writeln!(stdin, "{{\"id\":\"18\",\"method\":\"bogus.method\"}}").expect("write request");
    stdin.flush().expect("flush request");
    let unknown = read_response(&mut reader);
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let garbage = read_response(&mut reader);
    assert_eq!(error_code(&garbage), Some("bad_json"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
