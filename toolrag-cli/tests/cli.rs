use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use uuid::Uuid;

const CATALOG: &str = r#"[
    {"name": "get_current_time", "server": "utility", "description": "returns current time"},
    {"name": "calculate", "server": "utility", "description": "evaluate arithmetic",
     "parameters": {"expression": "string"}},
    {"name": "list_all_students", "server": "academic", "description": "list students"}
]"#;

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("toolrag-cli-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("tools.json"), CATALOG).unwrap();
        let config = format!(
            "[catalog]\npath = {:?}\n\n[index]\npath = {:?}\n",
            root.join("tools.json"),
            root.join("index.json"),
        );
        std::fs::write(root.join("toolrag.toml"), config).unwrap();
        Self { root }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_toolrag"))
            .arg("--config")
            .arg(self.root.join("toolrag.toml"))
            .args(args)
            .env("RUST_LOG", "error")
            .output()
            .expect("spawn toolrag")
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

#[test]
fn index_builds_and_force_rebuilds() {
    let workspace = Workspace::new();

    let output = workspace.run(&["index"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("indexed 3 tools"));
    assert!(exists(&workspace.index_path()));

    std::fs::write(workspace.index_path(), "garbage").unwrap();
    let output = workspace.run(&["index", "--force"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("indexed 3 tools"));
}

#[test]
fn tools_lists_served_and_unserved_tools() {
    let workspace = Workspace::new();
    let output = workspace.run(&["tools"]);
    assert!(output.status.success(), "{output:?}");

    let text = stdout(&output);
    assert!(text.contains("get_current_time"));
    assert!(text.contains("calculate"));
    assert!(text
        .lines()
        .any(|line| line.starts_with('!') && line.contains("list_all_students")));
}

#[test]
fn retrieve_ranks_without_executing() {
    let workspace = Workspace::new();
    let output = workspace.run(&[
        "retrieve", "what", "is", "the", "current", "time", "--top-k", "2", "--threshold", "0",
    ]);
    assert!(output.status.success(), "{output:?}");

    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.len() <= 2, "{text}");
    assert!(lines[0].trim_start().starts_with("1."));
    assert!(lines[0].contains("get_current_time"));
    assert!(exists(&workspace.index_path()));
}

#[test]
fn retrieve_prints_json_candidates() {
    let workspace = Workspace::new();
    let output = workspace.run(&["retrieve", "evaluate arithmetic", "--threshold", "0", "--json"]);
    assert!(output.status.success(), "{output:?}");

    let ranks: Vec<u64> = stdout(&output)
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["score"].is_number());
            value["rank"].as_u64().unwrap()
        })
        .collect();
    assert!(!ranks.is_empty());
    assert_eq!(ranks, (1..=ranks.len() as u64).collect::<Vec<_>>());
}

#[test]
fn retrieve_rejects_zero_top_k() {
    let workspace = Workspace::new();
    let output = workspace.run(&["retrieve", "time", "--top-k", "0"]);
    assert!(!output.status.success());
}

#[test]
fn missing_config_file_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_toolrag"))
        .args(["--config", "/nonexistent/toolrag.toml", "tools"])
        .output()
        .expect("spawn toolrag");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load configuration"));
}
