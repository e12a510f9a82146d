//! HTTP end-to-end tests.
//!
//! These tests start a real hostgate server in-process on a random port,
//! backed by an in-memory lock store and fake `ansible` scripts, and talk
//! to it over HTTP with `ureq`.

use hostgate_core::{AutomationSection, Gateway};
use hostgate_schema::OwnerToken;
use hostgate_server::TestServer;
use hostgate_store::{LockManager, LockStore, MemoryStore};
use std::fs;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const REGISTER: &str = r#"{"id":"biz-goods","hostname":"prod-goods-ms-001","ip":"10.1.2.3"}"#;

struct Harness {
    server: TestServer,
    store: Arc<MemoryStore>,
    root: PathBuf,
    _dir: tempfile::TempDir,
}

fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn start(rename: &str, apply: &str, with_playbook: bool) -> Harness {
    start_with(rename, apply, with_playbook, AutomationSection::default().heartbeat)
}

fn start_with(
    rename: &str,
    apply: &str,
    with_playbook: bool,
    heartbeat: Option<Duration>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    fs::create_dir_all(root.join("playbooks")).unwrap();
    if with_playbook {
        fs::write(root.join("playbooks/default.yml"), "- hosts: all\n").unwrap();
    }
    let automation = AutomationSection {
        dir: root.join("playbooks"),
        log_dir: root.join("logs"),
        shell: PathBuf::from("/bin/bash"),
        shell_args: vec!["-c".to_owned()],
        ansible: script(&root, "ansible", rename),
        ansible_playbook: script(&root, "ansible-playbook", apply),
        heartbeat,
        ..AutomationSection::default()
    };
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::new(&automation, LockManager::new(store.clone()));
    Harness {
        server: TestServer::start(gateway),
        store,
        root,
        _dir: dir,
    }
}

fn start_ok() -> Harness {
    start("echo \"ansible $*\"", "echo \"playbook $*\"; echo PLAY RECAP", true)
}

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(30)))
        .build()
        .into()
}

fn post(h: &Harness, path: &str, body: &str) -> (u16, String) {
    let mut resp = agent()
        .post(&format!("{}{path}", h.server.url))
        .header("Content-Type", "application/json")
        .send(body)
        .unwrap();
    let status = resp.status().as_u16();
    let text = resp.body_mut().read_to_string().unwrap();
    (status, text)
}

fn last_line(body: &str) -> &str {
    body.lines().last().unwrap_or("")
}

#[test]
fn health_is_ok() {
    let h = start_ok();
    let mut resp = agent()
        .get(&format!("{}/health", h.server.url))
        .call()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.body_mut().read_to_string().unwrap(), "ok");
}

#[test]
fn register_streams_plain_text_progress() {
    let h = start_ok();
    let mut resp = agent()
        .post(&format!("{}/v1/host/register", h.server.url))
        .header("Content-Type", "application/json")
        .send(REGISTER)
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    assert_eq!(
        header("content-type").as_deref(),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(header("x-content-type-options").as_deref(), Some("nosniff"));

    let body = resp.body_mut().read_to_string().unwrap();
    assert!(body.contains("[INFO] trying to register: LOCK__prod-goods-ms-001"));
    assert!(body.contains("[OUT] ansible -u root 10.1.2.3"));
    assert!(body.contains("[OUT] PLAY RECAP"));
    assert!(last_line(&body).contains("[INFO] initialize host done. log="));
    assert_eq!(
        h.store.get("LOCK__prod-goods-ms-001", "id__ip").as_deref(),
        Some("biz-goods__10.1.2.3")
    );
}

#[test]
fn lines_arrive_before_the_command_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let gate = dir.path().join("gate");
    // The playbook only finishes once the client has seen its first line.
    let apply = format!(
        "echo waiting; i=0; while [ ! -f '{}' ] && [ $i -lt 200 ]; do sleep 0.1; i=$((i+1)); done; \
         [ -f '{}' ] && echo released",
        gate.display(),
        gate.display()
    );
    let h = start("true", &apply, true);
    let mut resp = agent()
        .post(&format!("{}/v1/host/register", h.server.url))
        .header("Content-Type", "application/json")
        .send(REGISTER)
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let mut reader = BufReader::new(resp.body_mut().as_reader());
    let mut seen = Vec::new();
    loop {
        let mut line = String::new();
        assert!(reader.read_line(&mut line).unwrap() > 0, "stream ended: {seen:#?}");
        let waiting = line.contains("[OUT] waiting");
        seen.push(line);
        if waiting {
            break;
        }
    }
    fs::write(&gate, "").unwrap();

    let mut rest = String::new();
    std::io::Read::read_to_string(&mut reader, &mut rest).unwrap();
    assert!(rest.contains("[OUT] released"), "{rest}");
    assert!(last_line(&rest).contains("initialize host done"));
}

#[test]
fn client_leaving_during_silent_playbook_stops_it() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");
    let apply = format!("echo started; sleep 3; touch '{}'", marker.display());
    let h = start_with("true", &apply, true, Some(Duration::from_millis(200)));
    {
        let mut resp = agent()
            .post(&format!("{}/v1/host/register", h.server.url))
            .header("Content-Type", "application/json")
            .send(REGISTER)
            .unwrap();
        let mut reader = BufReader::new(resp.body_mut().as_reader());
        let mut line = String::new();
        while !line.contains("[OUT] started") {
            line.clear();
            assert!(reader.read_line(&mut line).unwrap() > 0);
        }
    }

    std::thread::sleep(Duration::from_secs(5));
    assert!(!marker.exists(), "playbook ran to completion after the client left");
    assert_eq!(
        h.store.get("LOCK__prod-goods-ms-001", "id__ip").as_deref(),
        Some("biz-goods__10.1.2.3")
    );
}

#[test]
fn conflicting_owner_gets_409() {
    let h = start_ok();
    h.store
        .set_if_absent("LOCK__prod-goods-ms-001", "id__ip", "biz-goods__10.9.9.9")
        .unwrap();

    let (status, body) = post(&h, "/v1/host/register", REGISTER);

    assert_eq!(status, 409);
    assert_eq!(
        last_line(&body),
        "[CONFLICT] already registered by \"biz-goods__10.9.9.9\", incoming=\"biz-goods__10.1.2.3\""
    );
    assert!(!body.contains("run:"));
}

#[test]
fn malformed_json_gets_400() {
    let h = start_ok();
    let (status, body) = post(&h, "/v1/host/register", "{not json");
    assert_eq!(status, 400);
    assert!(body.starts_with("invalid json"), "{body}");
}

#[test]
fn missing_fields_get_400() {
    let h = start_ok();
    let (status, body) = post(&h, "/v1/host/register", r#"{"hostname":"prod-goods-ms-001"}"#);
    assert_eq!(status, 400);
    assert!(body.contains("missing id/ip"), "{body}");
    assert!(h.store.is_empty());
}

#[test]
fn missing_playbook_gets_404() {
    let h = start("true", "true", false);
    let (status, body) = post(&h, "/v1/host/register", REGISTER);
    assert_eq!(status, 404);
    assert!(last_line(&body).starts_with("[ERROR] playbook selection failed:"));
}

#[test]
fn failure_after_commit_is_reported_in_stream() {
    let h = start("echo 'UNREACHABLE!' >&2; exit 4", "true", true);
    let (status, body) = post(&h, "/v1/host/register", REGISTER);
    assert_eq!(status, 200);
    assert!(body.contains("[ERR] UNREACHABLE!"));
    assert_eq!(
        last_line(&body),
        "[ERROR] hostname step failed: command failed: exit status 4"
    );
}

#[test]
fn unregister_with_wrong_owner_gets_412() {
    let h = start_ok();
    post(&h, "/v1/host/register", REGISTER);

    let (status, body) = post(
        &h,
        "/v1/host/unregister",
        r#"{"hostname":"prod-goods-ms-001","id":"biz-goods","ip":"10.1.2.4"}"#,
    );

    assert_eq!(status, 412);
    assert_eq!(
        body,
        "mismatch: stored=\"biz-goods__10.1.2.3\" incoming=\"biz-goods__10.1.2.4\""
    );
    assert!(!h.store.is_empty());
}

#[test]
fn unregister_with_owner_returns_deleted_key() {
    let h = start_ok();
    post(&h, "/v1/host/register", REGISTER);

    let (status, body) = post(&h, "/v1/host/unregister", REGISTER);

    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["deleted"], "LOCK__prod-goods-ms-001");
    assert!(h.store.is_empty());
}

#[test]
fn unregister_of_free_hostname_gets_404() {
    let h = start_ok();
    let (status, _) = post(
        &h,
        "/v1/host/unregister",
        r#"{"hostname":"prod-goods-ms-001"}"#,
    );
    assert_eq!(status, 404);
}

#[test]
fn unregister_with_half_an_owner_gets_400() {
    let h = start_ok();
    let (status, _) = post(
        &h,
        "/v1/host/unregister",
        r#"{"hostname":"prod-goods-ms-001","id":"biz-goods"}"#,
    );
    assert_eq!(status, 400);
}

#[test]
fn wrong_method_and_unknown_path() {
    let h = start_ok();
    let resp = agent()
        .get(&format!("{}/v1/host/register", h.server.url))
        .call()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 405);

    let resp = agent()
        .get(&format!("{}/v1/host/nope", h.server.url))
        .call()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[test]
fn reregistering_after_unregister_succeeds_for_new_owner() {
    let h = start_ok();
    post(&h, "/v1/host/register", REGISTER);
    post(
        &h,
        "/v1/host/unregister",
        r#"{"hostname":"prod-goods-ms-001"}"#,
    );

    let moved = r#"{"id":"biz-goods","hostname":"prod-goods-ms-001","ip":"10.1.2.9"}"#;
    let (status, body) = post(&h, "/v1/host/register", moved);

    assert_eq!(status, 200, "{body}");
    assert!(last_line(&body).contains("initialize host done"));
    assert_eq!(
        h.store.get("LOCK__prod-goods-ms-001", "id__ip").as_deref(),
        Some(OwnerToken::new("biz-goods__10.1.2.9").as_str())
    );
    assert!(h.root.join("logs").is_dir());
}
