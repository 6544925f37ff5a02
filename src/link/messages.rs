//! Text sent back to members

use chrono::TimeDelta;
use poise::serenity_prelude::{Mentionable, UserId};

/// Generic reply when the link server could not be reached
pub const SERVER_UNAVAILABLE: &str =
    "The Catastrophia server is currently unavailable, please try again later.";

/// Wrap a message in a code block
#[must_use]
pub fn embed_message(message: &str) -> String {
    format!("```{message}```")
}

/// Prefix a wrapped message with a mention of the member
#[must_use]
pub fn mention_message(user: UserId, message: &str) -> String {
    format!("{}\n{}", user.mention(), embed_message(message))
}

/// Playtime in minutes as "H hours and M minutes"
#[must_use]
pub fn format_playtime(minutes: u64) -> String {
    format!("{} hours and {} minutes", minutes / 60, minutes % 60)
}

/// Remaining time rounded up to whole hours, or whole minutes below one hour
#[must_use]
pub fn format_remaining(remaining: &TimeDelta) -> String {
    const HOUR_MS: i64 = 3_600_000;
    const MINUTE_MS: i64 = 60_000;

    let millis = remaining.num_milliseconds().max(0);
    if millis >= HOUR_MS {
        format!("{} hours", div_ceil(millis, HOUR_MS))
    } else {
        format!("{} minutes", div_ceil(millis, MINUTE_MS))
    }
}

fn div_ceil(value: i64, divisor: i64) -> i64 {
    (value + divisor - 1) / divisor
}

pub fn link_started(username: &str, display_name: &str, timeout: TimeDelta) -> String {
    format!(
        "Sent a request to Catastrophia to link the username {username} to {display_name}. \
         Please confirm your request in a lobby. The request will expire after {} seconds.",
        timeout.num_seconds()
    )
}

pub fn link_expired(username: &str) -> String {
    format!("The request to link the username {username} to your account has expired.")
}

pub fn link_confirmed(username: &str) -> String {
    format!("Username linking to '{username}' was successful.")
}

pub fn link_denied(ban_duration: TimeDelta) -> String {
    format!(
        "Your linking request has been denied, you will not be able to initiate any linking request for {} hours.",
        ban_duration.num_hours()
    )
}

pub fn link_disallowed() -> String {
    "This roblox account does not allow username linking.".to_string()
}

pub fn link_cancelled(username: &str) -> String {
    format!("Your request to link the username {username} has been cancelled.")
}

/// Playtime answer, anything under an hour is not shown exactly
pub fn playtime_message(username: &str, minutes: u64) -> String {
    if minutes < 60 {
        format!("{username} has played less than 1 hour.")
    } else {
        format!("{username} has played {}.", format_playtime(minutes))
    }
}

pub fn link_removed() -> String {
    "Your discord account has been unlinked from the roblox username.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining_rounds_up() {
        assert_eq!(format_remaining(&TimeDelta::seconds(3600)), "1 hours");
        assert_eq!(format_remaining(&TimeDelta::seconds(3601)), "2 hours");
        assert_eq!(format_remaining(&TimeDelta::seconds(3599)), "60 minutes");
        assert_eq!(format_remaining(&TimeDelta::seconds(1)), "1 minutes");
        assert_eq!(format_remaining(&TimeDelta::seconds(-5)), "0 minutes");

        // Sub-second remainders still round up
        assert_eq!(format_remaining(&TimeDelta::milliseconds(3_600_500)), "2 hours");
        assert_eq!(format_remaining(&TimeDelta::milliseconds(500)), "1 minutes");
        assert_eq!(format_remaining(&TimeDelta::milliseconds(59_001)), "1 minutes");
    }

    #[test]
    fn test_format_playtime() {
        assert_eq!(format_playtime(0), "0 hours and 0 minutes");
        assert_eq!(format_playtime(125), "2 hours and 5 minutes");
    }

    #[test]
    fn test_playtime_hides_short_sessions() {
        assert_eq!(playtime_message("steve123", 59), "steve123 has played less than 1 hour.");
        assert_eq!(
            playtime_message("steve123", 60),
            "steve123 has played 1 hours and 0 minutes."
        );
    }

    #[test]
    fn test_mention_message() {
        let text = mention_message(UserId::new(42), "hello");
        assert_eq!(text, "<@42>\n```hello```");
    }

    #[test]
    fn test_denied_reports_hours() {
        assert!(link_denied(TimeDelta::seconds(86400)).contains("for 24 hours"));
    }
}
