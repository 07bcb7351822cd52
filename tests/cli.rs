use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn arag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_arag"))
}

/// A temp dir with an offline config and a few documents.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    fs::write(
        root.join("mascot.md"),
        "# Mascots\n\nFerris the crab is the unofficial mascot of the Rust language.",
    )
    .unwrap();
    fs::write(
        root.join("deploy.txt"),
        "Deployments run on Kubernetes every Tuesday after the change review.",
    )
    .unwrap();
    fs::write(root.join("team.csv"), "name,role\nAda,lead\nLinus,reviewer\n").unwrap();
    fs::write(root.join("logo.png"), [0x89u8, b'P', b'N', b'G']).unwrap();

    let config_path = root.join("arag.toml");
    fs::write(
        &config_path,
        r#"[index]
dimension = 64

[retrieval]
top_k = 2

[embedding]
provider = "hashing"

[generation]
provider = "disabled"
"#,
    )
    .unwrap();

    (tmp, config_path)
}

fn run_arag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = arag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .current_dir(config_path.parent().unwrap())
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run arag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_formats_lists_every_supported_extension() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, ok) = run_arag(&config_path, &["formats"]);
    assert!(ok);
    for ext in [".pdf", ".pptx", ".docx", ".csv", ".txt", ".md"] {
        assert!(stdout.contains(ext), "missing {} in {}", ext, stdout);
    }
}

#[test]
fn test_config_prints_effective_settings() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, ok) = run_arag(&config_path, &["config"]);
    assert!(ok);
    assert!(stdout.contains("dimension = 64"));
    assert!(stdout.contains("top_k = 2"));
    assert!(stdout.contains("chunk_size = 500"));
}

#[test]
fn test_ask_answers_from_uploaded_documents() {
    let (tmp, config_path) = setup_test_env();
    let mascot = tmp.path().join("mascot.md");
    let deploy = tmp.path().join("deploy.txt");
    let (stdout, stderr, ok) = run_arag(
        &config_path,
        &[
            "ask",
            "-f",
            mascot.to_str().unwrap(),
            "-f",
            deploy.to_str().unwrap(),
            "What is the mascot of the Rust language?",
        ],
    );
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("Ferris"), "stdout: {}", stdout);
    assert!(stdout.contains("Sources:"));
    assert!(stderr.contains("Processed 2/2 documents"));
}

#[test]
fn test_ask_json_output() {
    let (tmp, config_path) = setup_test_env();
    let team = tmp.path().join("team.csv");
    let (stdout, stderr, ok) = run_arag(
        &config_path,
        &["ask", "--json", "-f", team.to_str().unwrap(), "Who is the lead?"],
    );
    assert!(ok, "stderr: {}", stderr);

    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(!answer["trace_id"].as_str().unwrap().is_empty());
    assert!(answer["answer"].as_str().unwrap().contains("Ada"));
    assert_eq!(answer["sources"][0]["filename"], "team.csv");
}

#[test]
fn test_ask_with_unsupported_file_only_fails() {
    let (tmp, config_path) = setup_test_env();
    let logo = tmp.path().join("logo.png");
    let (_, stderr, ok) = run_arag(&config_path, &["ask", "-f", logo.to_str().unwrap(), "What?"]);
    assert!(!ok);
    assert!(stderr.contains("UnsupportedFormat"), "stderr: {}", stderr);
    assert!(stderr.contains("no documents could be ingested"));
}

#[test]
fn test_invalid_config_is_rejected_at_startup() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[chunking]\nchunk_size = 100\noverlap = 100\n").unwrap();
    let (_, stderr, ok) = run_arag(&bad, &["config"]);
    assert!(!ok);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}
