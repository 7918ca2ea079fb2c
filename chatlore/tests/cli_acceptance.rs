use chatlore_core::ChatStore;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn scratch(&self) -> PathBuf {
        self.home.clone()
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../chatlore-core/tests/fixtures")
        .join(name)
}

fn run_cli(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("chatlore"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute chatlore: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "chatlore {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn import_canonical(env: &CliTestEnv) -> PathBuf {
    let store = env.scratch().join("night-crew.chatlore");
    let input = fixture("canonical.jsonl");
    let args = [
        "import",
        input.to_str().expect("fixture path"),
        "--out",
        store.to_str().expect("store path"),
    ];
    let output = run_cli(env, &args);
    assert_success(&args, &output);
    store
}

#[test]
fn import_writes_store_into_data_dir() {
    let env = CliTestEnv::new();
    let input = fixture("canonical.jsonl");

    let args = ["import", input.to_str().expect("fixture path")];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Imported as canonical_jsonl"),
        "expected import summary in stdout, got:\n{stdout}"
    );
    assert!(stdout.contains("11 messages, 3 members"));

    let store_path = env.xdg_data.join("chatlore/canonical.chatlore");
    assert!(
        store_path.exists(),
        "store file should exist at {}",
        store_path.display()
    );

    let store = ChatStore::open(&store_path).expect("failed to open store");
    assert_eq!(store.message_count().expect("count"), 11);
}

#[test]
fn import_honors_explicit_output_path() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);
    assert!(store_path.exists());

    let store = ChatStore::open(&store_path).expect("failed to open store");
    let meta = store.get_meta().expect("meta").expect("meta row");
    assert_eq!(meta.name, "Night Crew");
}

#[test]
fn merge_dry_run_previews_without_writing() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);
    let overlap = fixture("canonical-overlap.jsonl");

    let args = [
        "merge",
        store_path.to_str().expect("store path"),
        overlap.to_str().expect("fixture path"),
        "--dry-run",
    ];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Would add 3 message(s) (3 duplicate(s) skipped), 1 new member(s)"),
        "unexpected dry-run summary:\n{stdout}"
    );

    let store = ChatStore::open(&store_path).expect("failed to open store");
    assert_eq!(store.message_count().expect("count"), 11);
}

#[test]
fn merge_adds_new_messages() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);
    let overlap = fixture("canonical-overlap.jsonl");

    let args = [
        "merge",
        store_path.to_str().expect("store path"),
        overlap.to_str().expect("fixture path"),
    ];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Merged: 3 added, 3 duplicates skipped, 1 new member(s)"),
        "unexpected merge summary:\n{stdout}"
    );

    let store = ChatStore::open(&store_path).expect("failed to open store");
    assert_eq!(store.message_count().expect("count"), 14);
}

#[test]
fn analyze_renders_text_report() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);

    let args = ["analyze", store_path.to_str().expect("store path")];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("== Activity =="), "got:\n{stdout}");
    assert!(stdout.contains("Alice"), "got:\n{stdout}");
}

#[test]
fn analyze_emits_valid_json() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);

    let args = [
        "analyze",
        store_path.to_str().expect("store path"),
        "--report",
        "repeats",
        "--format",
        "json",
    ];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["total_chains"], 1);
    assert_eq!(parsed["longest_chain"]["content"], "666");
}

#[test]
fn analyze_lists_reports() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);

    let args = [
        "analyze",
        store_path.to_str().expect("store path"),
        "--list",
    ];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["activity", "repeats", "nocturnal", "meme-battles"] {
        assert!(stdout.contains(name), "missing report {name} in:\n{stdout}");
    }
}

#[test]
fn analyze_rejects_unknown_report() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);

    let args = [
        "analyze",
        store_path.to_str().expect("store path"),
        "--report",
        "horoscope",
    ];
    let output = run_cli(&env, &args);
    assert!(!output.status.success());
}

#[test]
fn export_writes_canonical_jsonl() {
    let env = CliTestEnv::new();
    let store_path = import_canonical(&env);
    let out = env.scratch().join("export.jsonl");

    let args = [
        "export",
        store_path.to_str().expect("store path"),
        "--out",
        out.to_str().expect("out path"),
    ];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let text = fs::read_to_string(&out).expect("exported file");
    let first = text.lines().next().expect("header line");
    assert!(first.contains("\"record\":\"header\""), "got: {first}");
    assert!(first.contains("Night Crew"));
}

#[test]
fn formats_lists_supported_formats() {
    let env = CliTestEnv::new();

    let args = ["formats"];
    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    for id in ["canonical_jsonl", "telegram", "whatsapp", "wechat_csv"] {
        assert!(stdout.contains(id), "missing format {id} in:\n{stdout}");
    }
}

#[test]
fn formats_diagnoses_unrecognized_file() {
    let env = CliTestEnv::new();
    let mystery = env.scratch().join("mystery.json");
    fs::write(&mystery, "{\"not\": \"a chat export\"}").expect("write file");

    let args = ["formats", mystery.to_str().expect("path")];
    let output = run_cli(&env, &args);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("matched no known format"),
        "got:\n{stdout}"
    );
}
