use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn alm_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("alm");
    path
}

struct Env {
    _tmp: TempDir,
    root: PathBuf,
    config: PathBuf,
    data: PathBuf,
}

fn setup_test_env() -> Env {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let config = root.join("config").join("alm.toml");
    let data = root.join("data");

    let response = r#"{
        "entities": [
            {"Fields": [
                {"Name": "id", "values": [{"value": "11"}]},
                {"Name": "name", "values": [{"value": "Payment, refund mismatch"}]},
                {"Name": "status", "values": [{"value": "Open"}]},
                {"Name": "priority", "values": [{"value": "P2-High"}]},
                {"Name": "owner", "values": [{"value": "dana"}]},
                {"Name": "creation-time", "values": [{"value": "2026-02-01"}]},
                {"Name": "description", "values": [{"value": "<div>Refund <i>amount</i> differs</div>"}]}
            ]},
            {"Fields": [
                {"Name": "id", "values": [{"value": "12"}]},
                {"Name": "name", "values": [{"value": "Crash on startup"}]},
                {"Name": "status", "values": [{"value": "Open"}]},
                {"Name": "priority", "values": [{"value": "P1-Critical"}]},
                {"Name": "creation-time", "values": [{"value": "2026-02-03"}]}
            ]},
            {"Fields": [
                {"Name": "id", "values": [{"value": "13"}]},
                {"Name": "name", "values": [{"value": "Old report layout"}]},
                {"Name": "status", "values": [{"value": "Closed"}]},
                {"Name": "priority", "values": [{"value": "P4-Low"}]},
                {"Name": "creation-time", "values": [{"value": "2026-01-01"}]},
                {"Name": "closing-date", "values": [{"value": "2026-01-15"}]}
            ]}
        ],
        "TotalResults": 3
    }"#;
    fs::write(root.join("defects.json"), response).unwrap();

    Env {
        _tmp: tmp,
        root,
        config,
        data,
    }
}

fn run_alm(env: &Env, args: &[&str]) -> (String, String, bool) {
    run_alm_with_stdin(env, args, None)
}

fn run_alm_with_stdin(env: &Env, args: &[&str], stdin: Option<&str>) -> (String, String, bool) {
    let binary = alm_binary();
    let mut child = Command::new(&binary)
        .arg("--config")
        .arg(&env.config)
        .arg("--data-dir")
        .arg(&env.data)
        .args(args)
        .env_remove("ALM_DATA_DIR")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to run alm binary at {:?}: {}", binary, e));

    {
        let mut pipe = child.stdin.take().unwrap();
        if let Some(input) = stdin {
            pipe.write_all(input.as_bytes()).unwrap();
        }
    }
    let output = child.wait_with_output().unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn sync_file(env: &Env) {
    let file = env.root.join("defects.json");
    let (stdout, stderr, success) =
        run_alm(env, &["sync-file", file.to_str().unwrap(), "--progress", "off"]);
    assert!(success, "sync-file failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("published: 3 defects"));
    assert!(stdout.trim_end().ends_with("ok"));
}

fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

#[test]
fn test_sync_file_publishes_generation() {
    let env = setup_test_env();
    sync_file(&env);

    assert!(exists(&env.data.join("defects.db")));
    assert!(exists(&env.data.join("defects.json")));
    assert!(env.data.join("sync_meta.json").exists());

    let (stdout, _, success) = run_alm(&env, &["history"]);
    assert!(success);
    assert!(stdout.lines().any(|l| l.starts_with("* ")));
    assert!(stdout.contains("last sync:"));
    assert!(stdout.contains("(3 defects)"));
}

#[test]
fn test_count_and_list() {
    let env = setup_test_env();
    sync_file(&env);

    let (stdout, _, success) = run_alm(&env, &["count", "--status", "open"]);
    assert!(success);
    assert_eq!(stdout.trim(), "2");

    let (stdout, _, success) = run_alm(&env, &["count", "--active"]);
    assert!(success);
    assert_eq!(stdout.trim(), "2");

    let (stdout, stderr, success) = run_alm(&env, &["list", "--json"]);
    assert!(success, "list failed: {}", stderr);
    let defects: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let ids: Vec<i64> = defects
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![12, 11, 13]);
    assert_eq!(defects[1]["description"], "Refund amount differs");

    let (stdout, _, success) = run_alm(&env, &["list", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("#12"));
    assert!(!stdout.contains("#11"));
    assert!(stdout.contains("Showing 1 of 3 defects"));
}

#[test]
fn test_show_and_search() {
    let env = setup_test_env();
    sync_file(&env);

    let (stdout, _, success) = run_alm(&env, &["show", "11", "--json"]);
    assert!(success);
    let defect: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(defect["owner"], "dana");

    let (_, stderr, success) = run_alm(&env, &["show", "999"]);
    assert!(!success);
    assert!(stderr.contains("not found"));

    let (stdout, _, success) = run_alm(&env, &["search", "refu", "--json"]);
    assert!(success);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["id"], 11);
}

#[test]
fn test_query_formats() {
    let env = setup_test_env();
    sync_file(&env);

    let (stdout, stderr, success) = run_alm(
        &env,
        &["query", "SELECT id, name FROM defects WHERE id = 11", "--format", "csv"],
    );
    assert!(success, "query failed: {}", stderr);
    assert_eq!(stdout, "id,name\n11,\"Payment, refund mismatch\"\n");

    let (stdout, _, success) = run_alm(
        &env,
        &["query", "SELECT id FROM defects ORDER BY id", "--format", "json"],
    );
    assert!(success);
    let rows: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows, serde_json::json!([{ "id": 11 }, { "id": 12 }, { "id": 13 }]));

    let (_, stderr, success) = run_alm(&env, &["query", "DELETE FROM defects"]);
    assert!(!success);
    assert!(stderr.contains("read-only") || stderr.contains("SELECT"));
}

#[test]
fn test_queries_before_first_sync() {
    let env = setup_test_env();

    let (stdout, _, success) = run_alm(&env, &["count"]);
    assert!(success);
    assert_eq!(stdout.trim(), "0");

    let (stdout, _, success) = run_alm(&env, &["stats"]);
    assert!(success);
    assert!(stdout.contains("No data"));
}

#[test]
fn test_sync_without_alm_section_fails() {
    let env = setup_test_env();
    let (_, stderr, success) = run_alm(&env, &["sync", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("import-curl"));
}

#[test]
fn test_config_import_curl() {
    let env = setup_test_env();
    let curl = "curl 'https://alm.example.com/qcbin/rest/domains/DEFAULT/projects/Rollout/defects?page-size=10' \
                -H 'Accept: application/json' -b 'QCSession=s1; LWSSO_COOKIE_KEY=k1'";

    let (_, stderr, success) = run_alm_with_stdin(&env, &["config", "import-curl"], Some(curl));
    assert!(success, "import-curl failed: {}", stderr);
    assert!(stderr.contains("2 cookies extracted"));

    let (stdout, _, success) = run_alm(&env, &["config", "show"]);
    assert!(success);
    assert!(stdout.contains("project = \"Rollout\""));
    assert!(stdout.contains("base_url = \"https://alm.example.com/qcbin\""));
    assert!(stdout.contains("QCSession = \"s1\""));
}
