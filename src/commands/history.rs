//! The `history` command: list recent deployment attempts.

use anyhow::Result;
use slipway::{DeployStatus, HistoryLog};

pub async fn run(host: Option<&str>, limit: usize) -> Result<()> {
    let history = HistoryLog::open_default().await?;
    let records = history.list(host, limit).await?;

    if records.is_empty() {
        println!("No deployment history.");
        return Ok(());
    }

    for record in records {
        let status = match record.status {
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed ",
        };
        let digest = &record.descriptor_hash[..record.descriptor_hash.len().min(8)];

        println!(
            "{}  {}  {}  {}/{}  {}",
            record.id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            status,
            record.host,
            record.service_name,
            digest,
        );
        if let Some(revision) = &record.source_revision {
            println!("    revision: {revision}");
        }
        if let Some(error) = &record.error {
            println!("    error: {error}");
        }
    }

    Ok(())
}
