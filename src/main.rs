use std::sync::Arc;
use std::time::Duration;

use catastrophia_bot::config::{BotConfig, CONFIG_FILE, Secrets};
use catastrophia_bot::link::{
    ChannelNotifier, DiscordEffects, ErrorReporter, HttpLinkClient, LinkService, LinkedUsers,
    Notifier, RequestStore,
};
use catastrophia_bot::{Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity, ChannelId, GatewayIntents, GuildId, UserId};
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = BotConfig::load(CONFIG_FILE).await?;
    let secrets = Secrets::from_env()?;
    let token = secrets.discord_token.clone();
    let guild_id = GuildId::new(secrets.guild_id);

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| Box::pin(logging::log_command_start(ctx)),
            post_command: |ctx| Box::pin(logging::log_command_end(ctx)),
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                let http = Arc::clone(&ctx.http);

                let remote = Arc::new(HttpLinkClient::new(
                    &secrets.api_url,
                    &secrets.api_key,
                    config.endpoints(),
                    Duration::from_secs(config.request_timeout_secs),
                )?);
                let effects = Arc::new(DiscordEffects::new(
                    Arc::clone(&http),
                    guild_id,
                    config.linked_role_name.clone(),
                    config.tier_role_names.clone(),
                ));
                let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier::new(http));
                let linked_users = Arc::new(LinkedUsers::load(&config.linked_users_file).await?);

                let mut links = LinkService::new(
                    RequestStore::new(config.link_settings()),
                    remote,
                    effects,
                    Arc::clone(&notifier),
                    linked_users.clone(),
                );
                if let Some(channel) = config.error_channel.filter(|id| *id != 0) {
                    let ping = config.error_ping_user.filter(|id| *id != 0).map(UserId::new);
                    links = links.with_reporter(ErrorReporter::new(
                        notifier,
                        ChannelId::new(channel),
                        ping,
                    ));
                }
                let data = Data::new(config, guild_id, links, linked_users);

                logging::log_console(format!("Registering commands in guild {guild_id}"));
                poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id)
                    .await?;

                // The event handler reads the data from the serenity type map
                ctx.data.write().await.insert::<Data>(data.clone());
                data.links.start(data.top_players_channel());

                Ok(data)
            })
        })
        .build();

    // Member removal events need the privileged member intent
    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    client.start().await?;

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        error!("Fatal error: {err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
