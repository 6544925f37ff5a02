//! Failure reports for the staff error channel

use std::sync::Arc;

use poise::serenity_prelude::{ChannelId, Mentionable, UserId};
use tracing::warn;

use crate::ERROR_TARGET;
use crate::link::messages::embed_message;
use crate::link::{LinkError, Notifier};

/// Posts internal failures to a channel, optionally pinging a maintainer
#[derive(Clone)]
pub struct ErrorReporter {
    notifier: Arc<dyn Notifier>,
    channel: ChannelId,
    ping: Option<UserId>,
}

impl ErrorReporter {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, channel: ChannelId, ping: Option<UserId>) -> Self {
        Self {
            notifier,
            channel,
            ping,
        }
    }

    /// Report text for a failure during `context`
    #[must_use]
    pub fn format(&self, context: &str, error: &LinkError) -> String {
        let body = embed_message(&format!("{context}: {error}"));
        match self.ping {
            Some(user) => format!("{}\n{body}", user.mention()),
            None => body,
        }
    }

    /// Post a report; a failed post is only logged
    pub async fn report(&self, context: &str, error: &LinkError) {
        let text = self.format(context, error);
        if let Err(e) = self.notifier.send(self.channel, text).await {
            warn!(target: ERROR_TARGET, error = %e, "Failed to post error report");
        }
    }
}
