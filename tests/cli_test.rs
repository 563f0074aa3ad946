mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::collections::HashMap;
use std::process::Command;

fn balances(stdout: &[u8]) -> HashMap<String, u64> {
    let mut reader = csv::Reader::from_reader(stdout);
    reader
        .records()
        .map(|r| {
            let record = r.unwrap();
            (record[0].to_string(), record[1].parse().unwrap())
        })
        .collect()
}

#[test]
fn test_replay_end_to_end() {
    let events = common::events_file(&[
        "deposit, , alice, 100",
        "deposit, , carol, 50",
        "tip, tip:1, alice, 10, bob",
        "confirm, tip:1, alice",
        "confirm, tip:1, alice",
        "confirm, tip:1, alice",
        "send, send:1, carol, 20",
        "accept, send:1, bob",
        "accept, send:1, dave",
        "faucet, faucet:1, alice, 5, , 2",
        "claim, faucet:1, bob",
        "claim, faucet:1, dave",
        "claim, faucet:1, erin",
        "pay, pay:1, carol, 15, lnbc150n1",
        "confirm, pay:1, carol",
        "confirm, pay:1, carol",
    ]);
    let config = common::relaxed_config();

    let mut cmd = Command::new(cargo_bin!("txguard"));
    cmd.arg("--config").arg(config.path()).arg("replay").arg(events.path());

    let output = cmd
        .assert()
        .success()
        .stdout(predicate::str::starts_with("user,balance"))
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error processing event"));

    let balances = balances(&output.stdout);
    assert_eq!(balances["alice"], 80);
    assert_eq!(balances["carol"], 15);
    let receivers: u64 = ["bob", "dave", "erin"]
        .iter()
        .map(|u| balances.get(*u).copied().unwrap_or(0))
        .sum();
    assert_eq!(receivers, 10 + 20 + 10);
}

#[test]
fn test_replay_reports_malformed_rows() {
    let events = common::events_file(&[
        "deposit, , alice, 100",
        "refund, pay:1, alice, 10",
        "deposit, , bob, lots",
        "deposit, , bob, 7",
    ]);

    let mut cmd = Command::new(cargo_bin!("txguard"));
    cmd.arg("replay").arg(events.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("alice,100"))
        .stdout(predicate::str::contains("bob,7"))
        .stderr(predicate::str::contains("Error reading event"));
}

#[test]
fn test_replay_rejects_invalid_actions() {
    let events = common::events_file(&[
        "deposit, , alice, 10",
        "tip, tip:1, alice, 50, bob",
        "confirm, tip:1, alice",
        "confirm, tip:404, alice",
        "deposit, , bob, 0",
    ]);

    let mut cmd = Command::new(cargo_bin!("txguard"));
    cmd.arg("replay").arg(events.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("alice,10"))
        .stderr(predicate::str::contains("Insufficient funds"))
        .stderr(predicate::str::contains("Record not found: tip:404"))
        .stderr(predicate::str::contains("Amount must be positive"));
}

#[test]
fn test_replay_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("txguard"));
    cmd.arg("replay").arg("does/not/exist.csv");

    cmd.assert().failure();
}

#[test]
fn test_json_log_format() {
    let events = common::events_file(&["deposit, , alice, 5", "confirm, tip:9, alice"]);

    let mut cmd = Command::new(cargo_bin!("txguard"));
    cmd.arg("--log-format").arg("json").arg("replay").arg(events.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains(r#""level":"ERROR""#));
}
