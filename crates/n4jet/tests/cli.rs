use assert_cmd::Command;

#[test]
fn help_prints_and_exits_cleanly() {
    let assert = Command::cargo_bin("n4jet").unwrap().arg("--help").assert();
    let output = assert.get_output().clone();
    assert.success();
    let help = String::from_utf8(output.stdout).unwrap();
    assert!(help.contains("--neo4j-uri"));
    assert!(help.contains("--batch-size"));
    assert!(help.contains("--output-directory"));
}

#[test]
fn invalid_configuration_exits_with_code_6() {
    Command::cargo_bin("n4jet")
        .unwrap()
        .args(["--batch-size", "0", "--neo4j-uri", "not a uri"])
        .env_remove("N4JET_NEO4J_URI")
        .env_remove("N4JET_BATCH_SIZE")
        .assert()
        .failure()
        .code(6);
}
