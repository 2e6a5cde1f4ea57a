use assert_cmd::Command;

fn relay_chat() -> Command {
    let mut cmd = Command::cargo_bin("relay-chat").unwrap();
    cmd.env_remove("RELAY_TOKEN").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_flags() {
    let out = relay_chat().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&out.get_output().stdout).to_string();
    assert!(stdout.contains("--url"));
    assert!(stdout.contains("--token"));
}

#[test]
fn missing_token_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = relay_chat()
        .arg("--token-file")
        .arg(dir.path().join("absent"))
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&out.get_output().stderr).to_string();
    assert!(stderr.contains("no token"));
}

#[test]
fn empty_token_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("token");
    std::fs::write(&file, "\n").unwrap();
    relay_chat()
        .arg("--token-file")
        .arg(&file)
        .assert()
        .failure();
}
