//! Link request, remote record and ban record types

use chrono::{DateTime, TimeDelta, Utc};
use derive_more::Display;
use poise::serenity_prelude::{ChannelId, UserId};
use uuid::Uuid;

use super::{LinkError, LinkResult};

/// Status of a link request as reported by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LinkStatus {
    /// Waiting for the player to confirm in game
    #[display("pending")]
    Pending,
    /// Confirmed by the player
    #[display("confirmed")]
    Confirmed,
    /// Sent by the bot to retire a request; never a live status
    #[display("terminated")]
    Terminated,
    /// Rejected by the player
    #[display("denied")]
    Denied,
    /// The game account does not allow linking
    #[display("disallowed")]
    Disallowed,
}

impl LinkStatus {
    /// Wire code used by the API
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Confirmed => 1,
            Self::Terminated => 2,
            Self::Denied => 3,
            Self::Disallowed => 4,
        }
    }

    /// Whether this status ends the request with a side effect
    #[must_use]
    pub const fn is_terminal_outcome(self) -> bool {
        matches!(self, Self::Confirmed | Self::Denied | Self::Disallowed)
    }
}

impl TryFrom<i64> for LinkStatus {
    type Error = LinkError;

    fn try_from(code: i64) -> LinkResult<Self> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Confirmed),
            2 => Ok(Self::Terminated),
            3 => Ok(Self::Denied),
            4 => Ok(Self::Disallowed),
            other => Err(LinkError::UnknownStatus(other)),
        }
    }
}

/// A link request made from Discord and not yet resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    /// Identifies this request instance; a later request for the same username gets a new id
    pub id: Uuid,
    /// Roblox username as typed by the member
    pub subject_username: String,
    /// Member who asked for the link
    pub requester: UserId,
    /// Channel the command was used in, notifications go there
    pub origin_channel: ChannelId,
    pub created_at: DateTime<Utc>,
}

impl LinkRequest {
    #[must_use]
    pub fn new(
        subject_username: impl Into<String>,
        requester: UserId,
        origin_channel: ChannelId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_username: subject_username.into(),
            requester,
            origin_channel,
            created_at,
        }
    }

    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }

    /// Strictly older than the timeout
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        self.age(now) > timeout
    }

    /// Time left before the request expires, never negative
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>, timeout: TimeDelta) -> TimeDelta {
        (timeout - self.age(now)).max(TimeDelta::zero())
    }
}

/// A link request as the remote API sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLinkRecord {
    pub subject_username: String,
    /// Raw status code, see [`RemoteLinkRecord::status`]
    pub status_code: i64,
    pub requester_display_name: String,
}

impl RemoteLinkRecord {
    /// Decode the status code
    ///
    /// # Errors
    /// Returns [`LinkError::UnknownStatus`] for codes outside the known set
    pub fn status(&self) -> LinkResult<LinkStatus> {
        LinkStatus::try_from(self.status_code)
    }
}

/// A member temporarily barred from making link requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub banned: UserId,
    pub expires_at: DateTime<Utc>,
}

impl BanRecord {
    #[must_use]
    pub fn new(banned: UserId, duration: TimeDelta, now: DateTime<Utc>) -> Self {
        Self {
            banned,
            expires_at: now + duration,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
