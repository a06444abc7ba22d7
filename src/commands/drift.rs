//! The `drift-check` command: compare baselines against the live host.
//!
//! Drift is reported, not fatal: the command exits zero even when
//! divergences are found.

use anyhow::Result;
use slipway::{DriftDetector, DriftStatus, SshShell};

pub async fn run(host: &str, user: Option<&str>) -> Result<()> {
    let detector = DriftDetector::open_default().await?;
    let shell = SshShell::new();

    let drifts = detector.check(host, user, &shell).await?;

    if drifts.is_empty() {
        println!("No drift detected on {host}.");
        return Ok(());
    }

    println!("Drift detected on {host} ({} files):", drifts.len());
    for drift in drifts {
        match drift.status {
            DriftStatus::Modified => {
                println!(
                    "  modified  {}  expected {} got {}",
                    drift.file,
                    &drift.expected[..drift.expected.len().min(8)],
                    drift
                        .actual
                        .as_deref()
                        .map(|a| &a[..a.len().min(8)])
                        .unwrap_or("?"),
                );
            }
            DriftStatus::Deleted => {
                println!("  deleted   {}  expected {}", drift.file, &drift.expected[..drift.expected.len().min(8)]);
            }
        }
    }

    Ok(())
}
