use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, Member, Ready, User,
};
use tracing::{info, warn};

use crate::{Data, EVENT_TARGET};

pub struct Handler;

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// A member who left can no longer confirm, so their request is dropped.
    async fn guild_member_removal(
        &self,
        ctx: Context,
        guild_id: GuildId,
        user: User,
        _member: Option<Member>,
    ) {
        let Some(data) = ctx.data.read().await.get::<Data>().cloned() else {
            warn!(target: EVENT_TARGET, "Bot data not registered, ignoring member removal");
            return;
        };
        if guild_id != data.guild_id {
            return;
        }

        info!(
            target: EVENT_TARGET,
            guild_id = %guild_id,
            user_id = %user.id,
            event = "member_removal",
            "Member left the guild"
        );
        data.links.forget_member(user.id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }
}
