use crate::link::LinkError;
use crate::link::messages::{
    SERVER_UNAVAILABLE, embed_message, link_cancelled, link_removed, link_started,
};
use crate::{Data, ERROR_TARGET, Error};
use poise::serenity_prelude::Permissions;
use poise::{Context, command};
use tracing::error;

/// Text shown to the member for a failed link operation
fn reply_for(err: &LinkError) -> String {
    if err.is_user_facing() {
        err.to_string()
    } else {
        SERVER_UNAVAILABLE.to_string()
    }
}

async fn reply_error(ctx: Context<'_, Data, Error>, err: LinkError) -> Result<(), Error> {
    if !err.is_user_facing() {
        let command = &ctx.command().qualified_name;
        error!(
            target: ERROR_TARGET,
            command = %command,
            user_id = %ctx.author().id,
            error = %err,
            "Link operation failed"
        );
        ctx.data().links.report(&format!("/{command}"), &err).await;
    }
    ctx.say(embed_message(&reply_for(&err))).await?;
    Ok(())
}

/// Link your discord account to a roblox username
#[command(slash_command, guild_only)]
pub async fn link(
    ctx: Context<'_, Data, Error>,
    #[description = "Your roblox username"] roblox_username: String,
) -> Result<(), Error> {
    let author = ctx.author();
    let display_name = author.display_name().to_string();

    // The server shows the account name in game, not the nickname
    match ctx
        .data()
        .links
        .initiate_link(author.id, &author.name, ctx.channel_id(), &roblox_username)
        .await
    {
        Ok(accepted) => {
            let message = link_started(
                &accepted.request.subject_username,
                &display_name,
                accepted.timeout,
            );
            ctx.say(embed_message(&message)).await?;
            Ok(())
        }
        Err(e) => reply_error(ctx, e).await,
    }
}

/// Cancel your pending linking request
#[command(slash_command, guild_only)]
pub async fn cancellink(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    match ctx.data().links.cancel_link(ctx.author().id).await {
        Ok(username) => {
            ctx.say(embed_message(&link_cancelled(&username))).await?;
            Ok(())
        }
        Err(e) => reply_error(ctx, e).await,
    }
}

/// Unlink your discord account from its roblox username
#[command(slash_command, guild_only)]
pub async fn removelink(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    match ctx.data().links.remove_link(ctx.author().id).await {
        Ok(()) => {
            ctx.say(embed_message(&link_removed())).await?;
            Ok(())
        }
        Err(e) => reply_error(ctx, e).await,
    }
}

fn is_admin(permissions: Option<Permissions>) -> bool {
    permissions.is_some_and(|p| p.administrator())
}

/// Show how long a roblox player has played
#[command(slash_command, guild_only)]
pub async fn playtime(
    ctx: Context<'_, Data, Error>,
    #[description = "The roblox username"] roblox_username: String,
) -> Result<(), Error> {
    let permissions = ctx
        .author_member()
        .await
        .and_then(|member| member.permissions);

    match ctx
        .data()
        .links
        .playtime(&roblox_username, is_admin(permissions))
        .await
    {
        Ok(message) => {
            ctx.say(embed_message(&message)).await?;
            Ok(())
        }
        Err(e) => reply_error(ctx, e).await,
    }
}

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![link(), cancellink(), removelink(), playtime()]
}
