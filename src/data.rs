use std::{ops::Deref, sync::Arc};

use poise::serenity_prelude::{self as serenity, ChannelId};
use serenity::prelude::TypeMapKey;

use crate::config::BotConfig;
use crate::link::{LinkService, LinkedUsers};

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_id", &self.guild_id)
            .field("links", &self.links)
            .field("linked_users", &self.linked_users.len())
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(
        config: BotConfig,
        guild_id: serenity::GuildId,
        links: LinkService,
        linked_users: Arc<LinkedUsers>,
    ) -> Self {
        Self(Arc::new(DataInner {
            config,
            guild_id,
            links,
            linked_users,
        }))
    }

    /// Channel the leaderboard is posted in, if configured
    #[must_use]
    pub fn top_players_channel(&self) -> Option<ChannelId> {
        self.config
            .top_players_channel
            .filter(|id| *id != 0)
            .map(ChannelId::new)
    }
}

/// State shared by commands and event handlers
pub struct DataInner {
    pub config: BotConfig,
    /// Guild the bot manages roles in
    pub guild_id: serenity::GuildId,
    pub links: LinkService,
    pub linked_users: Arc<LinkedUsers>,
}
