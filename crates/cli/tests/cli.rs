use assert_cmd::Command;
use predicates::str::contains;
use std::path::Path;
use tempfile::TempDir;

fn daemon(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("codechat-daemon").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("CODECHAT_CONFIG")
        .env_remove("OPENAI_API_KEY")
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("HOME", home)
        .env("CODECHAT_CACHE_DIR", home.join("cache"))
        .env("CODECHAT_EMBEDDING_MODE", "stub");
    cmd
}

fn workspace(tmp: &TempDir) -> std::path::PathBuf {
    let root = tmp.path().join("ws");
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("src/lib.rs"),
        "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
    )
    .unwrap();
    std::fs::write(root.join("tool.py"), "def run():\n    return 1\n").unwrap();
    root
}

#[test]
fn index_command_prints_json_summary_and_persists() {
    let tmp = TempDir::new().unwrap();
    let root = workspace(&tmp);

    let output = daemon(tmp.path())
        .args(["--quiet", "index", "--json", "--root"])
        .arg(&root)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["tracked_files"], 2);
    assert_eq!(summary["indexed_files"], 2);
    assert!(summary["chunks"].as_u64().unwrap() >= 2);

    let records: Vec<_> = walk(&tmp.path().join("cache"))
        .into_iter()
        .filter(|path| path.ends_with("records.json"))
        .collect();
    assert_eq!(records.len(), 1);
}

#[test]
fn index_command_plain_summary() {
    let tmp = TempDir::new().unwrap();
    let root = workspace(&tmp);

    daemon(tmp.path())
        .args(["-q", "index", "--root"])
        .arg(&root)
        .assert()
        .success()
        .stdout(contains("2 file(s) tracked: 2 indexed"));
}

#[test]
fn missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let root = workspace(&tmp);

    daemon(tmp.path())
        .arg("--config")
        .arg(tmp.path().join("absent.toml"))
        .args(["index", "--root"])
        .arg(&root)
        .assert()
        .failure()
        .stderr(contains("Failed to read config file"));
}

#[test]
fn invalid_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let root = workspace(&tmp);
    let config = tmp.path().join("bad.toml");
    std::fs::write(&config, "[indexer]\nworkers = 0\n").unwrap();

    daemon(tmp.path())
        .env("CODECHAT_CONFIG", &config)
        .args(["index", "--root"])
        .arg(&root)
        .assert()
        .failure()
        .stderr(contains("indexer.workers"));
}

#[test]
fn verbose_and_quiet_conflict() {
    let tmp = TempDir::new().unwrap();
    daemon(tmp.path())
        .args(["-v", "-q", "index"])
        .assert()
        .failure()
        .stderr(contains("cannot be used with"));
}

fn walk(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(walk(&path));
        } else {
            found.push(path);
        }
    }
    found
}
