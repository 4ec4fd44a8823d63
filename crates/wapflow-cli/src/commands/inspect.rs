//! Inspect command implementation.

use super::open_lakehouse;
use anyhow::{Context, Result};
use wapflow_core::lakehouse::Lakehouse;
use wapflow_core::{BranchName, Config, TableName};

/// Print the row count and content fingerprint of a table.
pub async fn run(config: Config, table: &str, branch: Option<&str>) -> Result<()> {
    let table = TableName::new(table)?;
    let branch = match branch {
        Some(name) => BranchName::new(name)?,
        None => config.lakehouse.main_branch.clone(),
    };

    let lakehouse = open_lakehouse(&config)?;
    let rows = lakehouse
        .row_count(&branch, &table)
        .await
        .with_context(|| format!("Failed to read {} on {}", table, branch))?;
    let schema = lakehouse.table_schema(&branch, &table).await?;
    let fingerprint = lakehouse.fingerprint(&branch, &table)?;

    println!("Table:       {}", table);
    println!("Branch:      {}", branch);
    println!("Head:        {}", lakehouse.head(&branch).await?);
    println!("Columns:     {}", schema.join(", "));
    println!("Rows:        {}", rows);
    println!("Fingerprint: {:08x}", fingerprint);

    Ok(())
}
