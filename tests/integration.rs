use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn blogport_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("blogport");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // A small Hugo-style content directory
    let posts_dir = root.join("content").join("posts");
    fs::create_dir_all(posts_dir.join("img")).unwrap();
    fs::write(
        posts_dir.join("alpha.md"),
        "+++\ntitle = \"Alpha Post\"\ntags = [\"rust\", \"cli\"]\ndate = 2024-01-02\n+++\n\nAlpha body with ![logo](img/logo.png).\n",
    )
    .unwrap();
    fs::write(posts_dir.join("img").join("logo.png"), b"logo-bytes").unwrap();
    fs::write(
        posts_dir.join("beta.md"),
        "---\ntitle: Beta Post\nstatus: draft\n---\n\n# Beta\n\nSecond body.\n",
    )
    .unwrap();
    fs::write(posts_dir.join("notes.txt"), "not a post").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/blog.sqlite"

[blobs]
root = "{root}/data/blobs"

[tasks]
poll_interval_ms = 20

[server]
bind = "127.0.0.1:7340"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("blogport.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_blogport(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = blogport_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run blogport binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn content_dir(config_path: &Path) -> String {
    let root = config_path.parent().unwrap().parent().unwrap();
    root.join("content").join("posts").display().to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_blogport(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_blogport(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_blogport(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_directory() {
    let (_tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);

    let dir = content_dir(&config_path);
    let (stdout, stderr, success) = run_blogport(&config_path, &["import", &dir]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("alpha-post"), "stdout: {}", stdout);
    assert!(stdout.contains("beta-post"), "stdout: {}", stdout);
    assert!(stderr.contains("2 succeeded, 0 failed, 0 warnings"), "stderr: {}", stderr);
}

#[test]
fn test_import_twice_skips_existing_slugs() {
    let (_tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);
    let dir = content_dir(&config_path);

    run_blogport(&config_path, &["import", &dir]);
    let (stdout, stderr, success) = run_blogport(&config_path, &["import", &dir]);
    assert!(success, "second import failed: {}", stderr);
    assert!(stdout.trim().is_empty(), "stdout: {}", stdout);
    assert!(stderr.contains("0 succeeded, 0 failed, 2 warnings"), "stderr: {}", stderr);
    assert!(stderr.contains("already exists"));
}

#[test]
fn test_export_round_trip() {
    let (tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);
    run_blogport(&config_path, &["import", &content_dir(&config_path)]);

    let out = tmp.path().join("export.zip");
    let out_str = out.display().to_string();
    let (stdout, stderr, success) = run_blogport(&config_path, &["export", "--output", &out_str]);
    assert!(success, "export failed: stdout={}, stderr={}", stdout, stderr);
    assert!(out.exists());
    assert!(stderr.contains("2 succeeded"), "stderr: {}", stderr);

    // Importing the export into a second blog recreates both posts.
    let (_tmp2, other_config) = setup_test_env();
    run_blogport(&other_config, &["init"]);
    let (stdout, stderr, success) = run_blogport(&other_config, &["import", &out_str]);
    assert!(success, "re-import failed: {}", stderr);
    assert!(stderr.contains("(Native archive)"), "stderr: {}", stderr);
    assert!(stdout.contains("alpha-post"));
    assert!(stdout.contains("beta-post"));
}

#[test]
fn test_export_filter_by_status() {
    let (tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);
    run_blogport(&config_path, &["import", &content_dir(&config_path)]);

    let out = tmp.path().join("drafts.zip");
    let out_str = out.display().to_string();
    let (_, stderr, success) = run_blogport(
        &config_path,
        &["export", "--status", "draft", "--output", &out_str],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stderr.contains("1 succeeded"), "stderr: {}", stderr);
}

#[test]
fn test_export_unknown_status_errors() {
    let (tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);
    let out = tmp.path().join("x.zip").display().to_string();
    let (_, _, success) =
        run_blogport(&config_path, &["export", "--status", "archived", "--output", &out]);
    assert!(!success);
}

#[test]
fn test_import_rejects_broken_zip() {
    let (tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);
    let zip = tmp.path().join("broken.zip");
    fs::write(&zip, b"not a zip").unwrap();

    let (_, stderr, success) =
        run_blogport(&config_path, &["import", &zip.display().to_string()]);
    assert!(!success);
    assert!(stderr.contains("not a readable zip archive"), "stderr: {}", stderr);
}

#[test]
fn test_status_unknown_task() {
    let (_tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);
    let (_, _, success) = run_blogport(&config_path, &["status", "nope", "--kind", "import"]);
    assert!(!success);
}

#[test]
fn test_resume_with_nothing_pending() {
    let (_tmp, config_path) = setup_test_env();
    run_blogport(&config_path, &["init"]);
    let (stdout, stderr, success) = run_blogport(&config_path, &["resume"]);
    assert!(success, "resume failed: {}", stderr);
    assert!(stdout.contains("No unfinished tasks"));
}
