//! Offline management of the invite allow-list.

use anyhow::{Context, Result};
use brbridge::allowlist::AllowListStore;
use bridge_types::ShortId;
use std::path::Path;

fn parse_id(id: &str) -> Result<ShortId> {
    id.trim()
        .parse()
        .with_context(|| format!("Invalid identity {:?}: expected 64 hex characters", id))
}

async fn open(data_dir: &Path) -> Result<AllowListStore> {
    AllowListStore::load(data_dir)
        .await
        .context("Failed to load allow-list")
}

/// Run `allow add`.
pub async fn add(data_dir: &Path, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    open(data_dir).await?.add(&id).await?;
    println!("Allowed {}", id);
    Ok(())
}

/// Run `allow remove`.
pub async fn remove(data_dir: &Path, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    open(data_dir).await?.remove(&id).await?;
    println!("Removed {}", id);
    Ok(())
}

/// Run `allow list`.
pub async fn list(data_dir: &Path) -> Result<()> {
    let entries = open(data_dir).await?.entries().await;
    if entries.is_empty() {
        println!("Allow-list is empty.");
        return Ok(());
    }
    for (id, added_at) in entries {
        println!("{}  (added {})", id, added_at);
    }
    Ok(())
}
