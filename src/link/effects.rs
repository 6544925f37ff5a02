//! Discord side effects of link outcomes
//!
//! The reconciliation loop and the leaderboard routine only know the traits
//! below. The serenity implementations look roles up by name in the home guild.

use std::sync::Arc;

use chrono::Utc;
use poise::serenity_prelude::{
    ChannelId, EditMember, GetMessages, GuildId, Http, RoleId, UserId,
};
use tracing::{info, warn};

use crate::config::TierRoleNames;
use crate::link::{LinkError, LinkResult, RankTier};

/// Role and nickname changes for a member
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SideEffectApplier: Send + Sync {
    /// Whether the member holds the linked role
    async fn is_linked(&self, identity: UserId) -> LinkResult<bool>;

    async fn grant_linked(&self, identity: UserId) -> LinkResult<()>;

    async fn revoke_linked(&self, identity: UserId) -> LinkResult<()>;

    /// Set the member's nickname, `None` resets it
    async fn set_display_name(&self, identity: UserId, name: Option<String>) -> LinkResult<()>;

    /// Leaderboard tiers the member currently holds
    async fn held_tiers(&self, identity: UserId) -> LinkResult<Vec<RankTier>>;

    async fn grant_tier(&self, identity: UserId, tier: RankTier) -> LinkResult<()>;

    async fn revoke_tier(&self, identity: UserId, tier: RankTier) -> LinkResult<()>;
}

/// Best-effort delivery of a message to a channel
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: ChannelId, text: String) -> LinkResult<()>;

    /// Delete the channel's recent messages, returning how many were removed
    async fn clear(&self, channel: ChannelId) -> LinkResult<usize>;
}

/// Map a serenity error, keeping 403 responses apart so callers can swallow them
fn classify(error: poise::serenity_prelude::Error, what: &str) -> LinkError {
    if let poise::serenity_prelude::Error::Http(http_error) = &error {
        if http_error.status_code().map(|s| s.as_u16()) == Some(403) {
            return LinkError::PermissionDenied(what.to_string());
        }
    }
    LinkError::from(error)
}

/// [`SideEffectApplier`] acting on the bot's home guild
#[derive(Clone)]
pub struct DiscordEffects {
    http: Arc<Http>,
    guild_id: GuildId,
    linked_role_name: String,
    tier_role_names: TierRoleNames,
}

impl DiscordEffects {
    #[must_use]
    pub fn new(
        http: Arc<Http>,
        guild_id: GuildId,
        linked_role_name: impl Into<String>,
        tier_role_names: TierRoleNames,
    ) -> Self {
        Self {
            http,
            guild_id,
            linked_role_name: linked_role_name.into(),
            tier_role_names,
        }
    }

    fn tier_role_name(&self, tier: RankTier) -> &str {
        match tier {
            RankTier::Top10 => &self.tier_role_names.top_10,
            RankTier::Top25 => &self.tier_role_names.top_25,
            RankTier::Top50 => &self.tier_role_names.top_50,
            RankTier::Top75 => &self.tier_role_names.top_75,
            RankTier::Top100 => &self.tier_role_names.top_100,
        }
    }

    async fn role_id(&self, name: &str) -> LinkResult<RoleId> {
        let roles = self.guild_id.roles(&self.http).await?;
        roles
            .values()
            .find(|role| role.name == name)
            .map(|role| role.id)
            .ok_or_else(|| {
                LinkError::NotFound(format!("role '{name}' in guild {}", self.guild_id))
            })
    }

    async fn member_roles(&self, identity: UserId) -> LinkResult<Vec<RoleId>> {
        let member = self
            .http
            .get_member(self.guild_id, identity)
            .await
            .map_err(|e| LinkError::NotFound(format!("member {identity}: {e}")))?;
        Ok(member.roles)
    }

    async fn add_role(&self, identity: UserId, name: &str) -> LinkResult<()> {
        let role_id = self.role_id(name).await?;
        self.http
            .add_member_role(self.guild_id, identity, role_id, None)
            .await
            .map_err(|e| classify(e, &format!("add role '{name}'")))?;
        info!("Added role '{name}' to user {identity}");
        Ok(())
    }

    async fn remove_role(&self, identity: UserId, name: &str) -> LinkResult<()> {
        let role_id = self.role_id(name).await?;
        self.http
            .remove_member_role(self.guild_id, identity, role_id, None)
            .await
            .map_err(|e| classify(e, &format!("remove role '{name}'")))?;
        info!("Removed role '{name}' from user {identity}");
        Ok(())
    }
}

#[async_trait::async_trait]
impl SideEffectApplier for DiscordEffects {
    async fn is_linked(&self, identity: UserId) -> LinkResult<bool> {
        let role_id = self.role_id(&self.linked_role_name).await?;
        Ok(self.member_roles(identity).await?.contains(&role_id))
    }

    async fn grant_linked(&self, identity: UserId) -> LinkResult<()> {
        self.add_role(identity, &self.linked_role_name).await
    }

    async fn revoke_linked(&self, identity: UserId) -> LinkResult<()> {
        self.remove_role(identity, &self.linked_role_name).await
    }

    async fn set_display_name(&self, identity: UserId, name: Option<String>) -> LinkResult<()> {
        // An empty nickname resets it to the account name.
        let builder = EditMember::new().nickname(name.unwrap_or_default());
        self.guild_id
            .edit_member(&*self.http, identity, builder)
            .await
            .map_err(|e| classify(e, "edit nickname"))?;
        Ok(())
    }

    async fn held_tiers(&self, identity: UserId) -> LinkResult<Vec<RankTier>> {
        let roles = self.guild_id.roles(&self.http).await?;
        let member_roles = self.member_roles(identity).await?;
        Ok(RankTier::ALL
            .into_iter()
            .filter(|tier| {
                let name = self.tier_role_name(*tier);
                roles
                    .values()
                    .any(|role| role.name == name && member_roles.contains(&role.id))
            })
            .collect())
    }

    async fn grant_tier(&self, identity: UserId, tier: RankTier) -> LinkResult<()> {
        let name = self.tier_role_name(tier).to_string();
        self.add_role(identity, &name).await
    }

    async fn revoke_tier(&self, identity: UserId, tier: RankTier) -> LinkResult<()> {
        let name = self.tier_role_name(tier).to_string();
        self.remove_role(identity, &name).await
    }
}

/// [`Notifier`] posting plain channel messages
#[derive(Clone)]
pub struct ChannelNotifier {
    http: Arc<Http>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Messages per fetch, also the bulk delete limit
const CLEAR_BATCH: u8 = 100;

/// Bulk delete only accepts messages younger than two weeks
const BULK_DELETE_MAX_AGE_SECS: i64 = 14 * 24 * 60 * 60;

#[async_trait::async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, channel: ChannelId, text: String) -> LinkResult<()> {
        channel
            .say(&*self.http, text)
            .await
            .map_err(|e| classify(e, "send message"))?;
        Ok(())
    }

    async fn clear(&self, channel: ChannelId) -> LinkResult<usize> {
        let messages = channel
            .messages(&*self.http, GetMessages::new().limit(CLEAR_BATCH))
            .await
            .map_err(|e| classify(e, "read message history"))?;

        let cutoff = Utc::now().timestamp() - BULK_DELETE_MAX_AGE_SECS;
        let (recent, old): (Vec<_>, Vec<_>) = messages
            .iter()
            .partition(|message| message.timestamp.unix_timestamp() > cutoff);

        match recent.len() {
            0 => {}
            1 => channel
                .delete_message(&self.http, recent[0].id)
                .await
                .map_err(|e| classify(e, "delete message"))?,
            _ => channel
                .delete_messages(&self.http, recent.iter().map(|message| message.id))
                .await
                .map_err(|e| classify(e, "delete messages"))?,
        }
        for message in &old {
            if let Err(e) = channel.delete_message(&self.http, message.id).await {
                warn!("Failed to delete message {} in channel {channel}: {e}", message.id);
            }
        }

        info!("Cleared {} messages from channel {channel}", messages.len());
        Ok(messages.len())
    }
}
