#![allow(dead_code)]

use rand::Rng;
use rand::seq::SliceRandom;
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub const HEADER: &str = "type, id, user, amount, target, shares";

/// Writes an events CSV with the standard header followed by `rows`.
pub fn events_file(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file
}

/// Config with rate limits wide enough that replays never wait on a refill.
pub fn relaxed_config() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "lock": {{ "timeout_ms": 10000, "poll_interval_ms": 20 }},
            "rate_limit": {{
                "global": {{ "capacity": 100000, "interval_ms": 1000 }},
                "per_scope": {{ "capacity": 100000, "interval_ms": 1000 }},
                "backoff_ms": 5
            }}
        }}"#
    )
    .unwrap();
    file
}

/// One deposit per user, one tip from each user to the next, then every tip
/// confirmed `taps` times in random order.
pub fn generate_tap_storm(path: &Path, users: usize, taps: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["type", "id", "user", "amount", "target", "shares"])?;

    let mut rng = rand::thread_rng();
    for u in 0..users {
        wtr.write_record(["deposit", "", &format!("user{u}"), "1000", "", ""])?;
    }

    let mut confirms = Vec::with_capacity(users * taps);
    for u in 0..users {
        let amount = rng.gen_range(1..=100u64).to_string();
        let to = format!("user{}", (u + 1) % users);
        wtr.write_record(["tip", &format!("tip:{u}"), &format!("user{u}"), &amount, &to, ""])?;
        for _ in 0..taps {
            confirms.push(u);
        }
    }

    confirms.shuffle(&mut rng);
    for u in confirms {
        wtr.write_record(["confirm", &format!("tip:{u}"), &format!("user{u}"), "", "", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
