mod common;

use assert_cmd::cargo_bin;
use std::collections::HashMap;
use std::process::Command;

#[test]
fn test_tap_storm_pays_each_tip_once() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join("storm.csv");
    let users = 8;
    common::generate_tap_storm(&events, users, 5).expect("Failed to generate CSV");

    // Expected balances follow from executing every tip exactly once
    let mut expected: HashMap<String, i64> =
        (0..users).map(|u| (format!("user{u}"), 1000)).collect();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(&events)
        .unwrap();
    let mut confirms = 0;
    for result in reader.records() {
        let record = result.unwrap();
        match &record[0] {
            "tip" => {
                let amount: i64 = record[3].parse().unwrap();
                *expected.get_mut(&record[2]).unwrap() -= amount;
                *expected.get_mut(&record[4]).unwrap() += amount;
            }
            "confirm" => confirms += 1,
            _ => {}
        }
    }
    assert_eq!(confirms, users * 5);

    let config = common::relaxed_config();
    let output = Command::new(cargo_bin!("txguard"))
        .arg("--config")
        .arg(config.path())
        .arg("replay")
        .arg(&events)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let mut reader = csv::Reader::from_reader(output.stdout.as_slice());
    let actual: HashMap<String, i64> = reader
        .records()
        .map(|r| {
            let record = r.unwrap();
            (record[0].to_string(), record[1].parse().unwrap())
        })
        .collect();
    assert_eq!(actual, expected);
}
