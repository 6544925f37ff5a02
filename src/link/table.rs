//! Persisted roblox username <-> Discord member table
//!
//! Written when a link is confirmed or removed, read by the leaderboard routine.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use poise::serenity_prelude::UserId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::link::{LinkError, LinkResult};

/// Lookup of confirmed links
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait UsernameLinkTable: Send + Sync {
    /// Member linked to the username, compared case-insensitively
    async fn resolve_identity(&self, username: &str) -> Option<UserId>;

    /// Remember a confirmed link, replacing any earlier one of the member
    async fn record_link(&self, identity: UserId, username: &str) -> LinkResult<()>;

    /// Forget the member's link, returning the username it pointed to
    async fn forget(&self, identity: UserId) -> LinkResult<Option<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkedUser {
    user_id: u64,
    roblox_username: String,
}

/// [`UsernameLinkTable`] kept in memory and saved as YAML after each change
#[derive(Debug)]
pub struct LinkedUsers {
    path: PathBuf,
    links: DashMap<UserId, String>,
}

impl LinkedUsers {
    /// Empty table saved to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            links: DashMap::new(),
        }
    }

    /// Load the table from `path`
    ///
    /// A missing file yields an empty table.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid links file
    pub async fn load(path: impl Into<PathBuf>) -> LinkResult<Self> {
        let table = Self::new(path);

        let content = match tokio::fs::read_to_string(&table.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No linked users file at {}, starting empty", table.path.display());
                return Ok(table);
            }
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<LinkedUser> = serde_yaml::from_str(&content).map_err(|e| {
            LinkError::Persistence(format!("{}: {e}", table.path.display()))
        })?;
        for entry in entries {
            if entry.user_id == 0 {
                warn!("Skipping linked user entry without a member id");
                continue;
            }
            table
                .links
                .insert(UserId::new(entry.user_id), entry.roblox_username);
        }
        info!("Loaded {} linked users", table.links.len());

        Ok(table)
    }

    /// Write the table to its file
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the file cannot be written
    pub async fn save(&self) -> LinkResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !Path::new(dir).exists() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let mut entries: Vec<LinkedUser> = self
            .links
            .iter()
            .map(|entry| LinkedUser {
                user_id: entry.key().get(),
                roblox_username: entry.value().clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.user_id);

        let yaml = serde_yaml::to_string(&entries)?;
        tokio::fs::write(&self.path, yaml).await?;
        Ok(())
    }

    #[must_use]
    pub fn username_for(&self, identity: UserId) -> Option<String> {
        self.links.get(&identity).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[async_trait::async_trait]
impl UsernameLinkTable for LinkedUsers {
    async fn resolve_identity(&self, username: &str) -> Option<UserId> {
        let wanted = username.to_lowercase();
        self.links
            .iter()
            .find(|entry| entry.value().to_lowercase() == wanted)
            .map(|entry| *entry.key())
    }

    async fn record_link(&self, identity: UserId, username: &str) -> LinkResult<()> {
        // A username belongs to one member at a time.
        let wanted = username.to_lowercase();
        self.links
            .retain(|owner, linked| *owner == identity || linked.to_lowercase() != wanted);
        self.links.insert(identity, username.to_string());
        self.save().await
    }

    async fn forget(&self, identity: UserId) -> LinkResult<Option<String>> {
        let removed = self.links.remove(&identity).map(|(_, username)| username);
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }
}
