//! Error types for the link system
//!
//! Conflict variants are shown to the member who ran the command, everything
//! else is logged and replaced with a generic reply.

use chrono::TimeDelta;
use thiserror::Error;

use super::messages::format_remaining;

/// Errors raised by the remote link API client
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport failure (connection refused, timeout, bad body)
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    /// The API answered with a non-success status
    #[error("Link API error ({status})")]
    Api { status: u16 },

    /// The client could not be built from the given settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        // The API URL is a secret and must not leak into logs or replies.
        Self::Http(error.without_url())
    }
}

/// Result type for remote API calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur during link operations
#[derive(Debug, Error)]
pub enum LinkError {
    /// The requester already owns an in-flight request
    #[error(
        "You have already issued a linking request. If you misspelled the roblox username, please wait {} seconds for the request to expire.",
        .remaining.num_seconds().max(0)
    )]
    AlreadyPending { remaining: TimeDelta },

    /// The requester already holds the linked role
    #[error("You are already linked to a roblox username.")]
    AlreadyLinked,

    /// The requester was denied recently and is still serving the ban
    #[error("You are banned from making linking requests for another {}.", format_remaining(.remaining))]
    Banned { remaining: TimeDelta },

    /// The username is on the confidential list
    #[error("The username {0} can not be linked.")]
    Disallowed(String),

    /// Another member already has a pending request for this username
    #[error("A linking request for the username {0} is already in progress.")]
    UsernameInUse(String),

    /// Playtime of a confidential username asked for by a non-admin
    #[error("The playtime of {0} is not public.")]
    PlaytimeHidden(String),

    /// Empty or whitespace-only username
    #[error("Please provide a roblox username.")]
    InvalidUsername,

    /// Cancel requested without a pending request
    #[error("You do not have a pending linking request.")]
    NotPending,

    /// Unlink requested by a member without the linked role
    #[error("You are not linked to any username.")]
    NotLinked,

    /// The remote API could not be reached or refused the call
    #[error("Link server unavailable: {0}")]
    Transport(#[from] RemoteError),

    /// The remote API reported a status code this bot does not know
    #[error("Unknown link status code: {0}")]
    UnknownStatus(i64),

    /// Discord refused the change for lack of permissions
    #[error("Missing permissions: {0}")]
    PermissionDenied(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(Box<poise::serenity_prelude::Error>),

    /// Role or member lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reading or writing the linked users file failed
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<poise::serenity_prelude::Error> for LinkError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<serde_yaml::Error> for LinkError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl LinkError {
    /// Whether the error text is meant for the member who ran the command
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPending { .. }
                | Self::AlreadyLinked
                | Self::Banned { .. }
                | Self::Disallowed(_)
                | Self::UsernameInUse(_)
                | Self::PlaytimeHidden(_)
                | Self::InvalidUsername
                | Self::NotPending
                | Self::NotLinked
        )
    }
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;
