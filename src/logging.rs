use crate::{COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, LINK_TARGET};
use poise::{Context, FrameworkError};
use std::path::Path;
use std::time::Instant;
use tracing::{Level, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Targets,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Link outcome log file name
pub const LINK_LOG_FILE: &str = "links";
/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,serenity=error";

/// Initialize the logging system with console and file outputs
pub fn init() -> Result<(), Error> {
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let link_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, LINK_LOG_FILE);

    // Human-readable console output
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Commands and their errors, JSON
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(
            Targets::new()
                .with_target(COMMAND_TARGET, Level::INFO)
                .with_target(ERROR_TARGET, Level::INFO),
        );

    // Link outcomes only, JSON
    let link_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(link_file)
        .with_filter(Targets::new().with_target(LINK_TARGET, Level::INFO));

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(link_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

fn guild_label(ctx: Context<'_, Data, Error>) -> String {
    ctx.guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string())
}

/// Log the start of a command execution (pre-command hook)
pub async fn log_command_start(ctx: Context<'_, Data, Error>) {
    // Read back by the post-command hook
    ctx.set_invocation_data(Instant::now()).await;

    let command_name = ctx.command().qualified_name.clone();
    let user_id = ctx.author().id.get().to_string();

    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        format!("{:?}", ctx.invocation_string())
    };

    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_label(ctx),
        user_id = %user_id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub async fn log_command_end(ctx: Context<'_, Data, Error>) {
    let duration = ctx
        .invocation_data::<Instant>()
        .await
        .map(|start| start.elapsed());

    let command_name = ctx.command().qualified_name.clone();
    let user_id = ctx.author().id.get().to_string();

    let duration_ms = u64::try_from(duration.map_or(0, |d| d.as_millis())).unwrap_or_default();
    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_label(ctx),
        user_id = %user_id,
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(*ctx),
                user_id = %ctx.author().id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);

            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(*ctx),
                user_id = %ctx.author().id,
                error = %error_msg,
                "Command check failed"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = ?err,
                "Other framework error"
            );
        }
    }
}

pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_link_target_is_under_bot_name() {
        assert!(LINK_TARGET.starts_with(crate::BOT_NAME));
        assert!(COMMAND_TARGET.starts_with(crate::BOT_NAME));
    }
}
