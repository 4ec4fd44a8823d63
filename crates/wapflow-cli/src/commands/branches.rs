//! Branches command implementation.

use super::open_lakehouse;
use anyhow::Result;
use wapflow_core::lakehouse::Lakehouse;
use wapflow_core::Config;

/// Report lakehouse health, then list every branch with its head commit.
pub async fn run(config: Config) -> Result<()> {
    let lakehouse = open_lakehouse(&config)?;

    let health = lakehouse.health_check().await?;
    let status = if health.is_healthy { "[OK]" } else { "[FAIL]" };
    match &health.message {
        Some(message) => println!(
            "{} Lakehouse: {} ({} branches)",
            status, message, health.branch_count
        ),
        None => println!("{} Lakehouse: {} branches", status, health.branch_count),
    }
    println!();

    let branches = lakehouse.list_branches().await?;

    println!("{:<40} {:<38} {:<20} CREATED", "BRANCH", "HEAD", "FORKED FROM");
    for branch in &branches {
        let forked_from = branch
            .forked_from
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<38} {:<20} {}",
            branch.name.as_str(),
            branch.head,
            forked_from,
            branch.created_at.to_rfc3339()
        );
    }

    let staging = branches
        .iter()
        .filter(|b| b.name.as_str().starts_with(&config.lakehouse.branch_prefix))
        .count();
    if staging > 0 {
        println!(
            "\n{} staging branch(es) present. Run `wapflow sweep` to discard leaked ones.",
            staging
        );
    }

    Ok(())
}
