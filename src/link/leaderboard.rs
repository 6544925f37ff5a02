//! Leaderboard tier roles
//!
//! Every period the playtime leaderboard is fetched and each linked player
//! gets exactly one tier role matching their rank.

use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use poise::serenity_prelude::{ChannelId, UserId};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::LINK_TARGET;
use crate::link::messages::{embed_message, format_playtime};
use crate::link::{
    ErrorReporter, LeaderboardEntry, LinkResult, Notifier, RemoteLinkClient, SideEffectApplier,
    UsernameLinkTable,
};

/// Lines per posted leaderboard message
const SECTION_SIZE: usize = 25;

/// Mutually exclusive leaderboard tiers, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RankTier {
    #[display("Top 10")]
    Top10,
    #[display("Top 25")]
    Top25,
    #[display("Top 50")]
    Top50,
    #[display("Top 75")]
    Top75,
    #[display("Top 100")]
    Top100,
}

impl RankTier {
    pub const ALL: [Self; 5] = [
        Self::Top10,
        Self::Top25,
        Self::Top50,
        Self::Top75,
        Self::Top100,
    ];

    /// Lowest rank that still earns the tier
    #[must_use]
    pub const fn threshold(self) -> usize {
        match self {
            Self::Top10 => 10,
            Self::Top25 => 25,
            Self::Top50 => 50,
            Self::Top75 => 75,
            Self::Top100 => 100,
        }
    }

    /// Tier for a 1-based rank, `None` past the last threshold
    #[must_use]
    pub fn from_rank(rank: usize) -> Option<Self> {
        if rank == 0 {
            return None;
        }
        Self::ALL.into_iter().find(|tier| rank <= tier.threshold())
    }
}

/// What one leaderboard pass changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeaderboardReport {
    pub assigned: Vec<(UserId, RankTier)>,
    /// Linked members ranked past every tier, left with none
    pub cleared: Vec<UserId>,
    /// Ranked usernames with no linked member
    pub unlinked: usize,
}

/// Periodic tier role assignment
pub struct LeaderboardRoles {
    remote: Arc<dyn RemoteLinkClient>,
    effects: Arc<dyn SideEffectApplier>,
    links: Arc<dyn UsernameLinkTable>,
    notifier: Arc<dyn Notifier>,
    channel: Option<ChannelId>,
    amount: u32,
    reporter: Option<ErrorReporter>,
}

impl LeaderboardRoles {
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteLinkClient>,
        effects: Arc<dyn SideEffectApplier>,
        links: Arc<dyn UsernameLinkTable>,
        notifier: Arc<dyn Notifier>,
        channel: Option<ChannelId>,
        amount: u32,
    ) -> Self {
        Self {
            remote,
            effects,
            links,
            notifier,
            channel,
            amount,
            reporter: None,
        }
    }

    /// Report failed updates to the error channel
    #[must_use]
    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Fetch the leaderboard, post it and update tier roles
    ///
    /// # Errors
    /// Returns a transport error when the leaderboard cannot be fetched; no roles change then
    pub async fn tick(&self) -> LinkResult<LeaderboardReport> {
        let entries = self.remote.leaderboard(self.amount).await?;

        if let Some(channel) = self.channel {
            self.post(channel, &entries).await;
        }

        let mut report = LeaderboardReport::default();
        for (index, entry) in entries.iter().enumerate() {
            let tier = RankTier::from_rank(index + 1);
            let Some(identity) = self.links.resolve_identity(&entry.username).await else {
                report.unlinked += 1;
                continue;
            };
            match self.assign(identity, tier).await {
                Ok(()) => match tier {
                    Some(tier) => report.assigned.push((identity, tier)),
                    None => report.cleared.push(identity),
                },
                Err(e) => warn!(
                    target: LINK_TARGET,
                    user_id = %identity,
                    rank = index + 1,
                    error = %e,
                    "Failed to update leaderboard tier"
                ),
            }
        }

        Ok(report)
    }

    /// Leave the member with exactly `tier` out of the tier roles, or none of them
    async fn assign(&self, identity: UserId, tier: Option<RankTier>) -> LinkResult<()> {
        let held = self.effects.held_tiers(identity).await?;
        for other in held.iter().copied().filter(|held_tier| Some(*held_tier) != tier) {
            self.effects.revoke_tier(identity, other).await?;
        }
        if let Some(tier) = tier.filter(|tier| !held.contains(tier)) {
            self.effects.grant_tier(identity, tier).await?;
        }
        Ok(())
    }

    /// Replace the channel's previous board with the new one
    async fn post(&self, channel: ChannelId, entries: &[LeaderboardEntry]) {
        if let Err(e) = self.notifier.clear(channel).await {
            warn!(target: LINK_TARGET, error = %e, "Failed to clear leaderboard channel");
        }

        for (section_index, section) in entries.chunks(SECTION_SIZE).enumerate() {
            let text = section
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    format!(
                        "{}: {} - {}",
                        section_index * SECTION_SIZE + i + 1,
                        entry.username,
                        format_playtime(entry.playtime)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");

            if let Err(e) = self.notifier.send(channel, embed_message(&text)).await {
                warn!(target: LINK_TARGET, error = %e, "Failed to post leaderboard section");
            }
        }
    }

    /// Run forever, one pass per `period`
    pub async fn run(self, period: Duration) {
        info!("Starting leaderboard task with {}s interval", period.as_secs());

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(report) => info!(
                    target: LINK_TARGET,
                    assigned = report.assigned.len(),
                    cleared = report.cleared.len(),
                    unlinked = report.unlinked,
                    "Leaderboard roles updated"
                ),
                Err(e) => {
                    warn!(target: LINK_TARGET, error = %e, "Leaderboard update skipped");
                    if let Some(reporter) = &self.reporter {
                        reporter.report("Leaderboard update", &e).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::effects::{MockNotifier, MockSideEffectApplier};
    use crate::link::remote::MockRemoteLinkClient;
    use crate::link::table::MockUsernameLinkTable;
    use crate::link::{LinkError, RemoteError};
    use mockall::Sequence;

    fn entries(count: usize) -> Vec<LeaderboardEntry> {
        (0..count)
            .map(|i| LeaderboardEntry {
                username: format!("player{}", i + 1),
                playtime: (1000 - i) as u64,
            })
            .collect()
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(RankTier::from_rank(0), None);
        assert_eq!(RankTier::from_rank(1), Some(RankTier::Top10));
        assert_eq!(RankTier::from_rank(10), Some(RankTier::Top10));
        assert_eq!(RankTier::from_rank(11), Some(RankTier::Top25));
        assert_eq!(RankTier::from_rank(25), Some(RankTier::Top25));
        assert_eq!(RankTier::from_rank(50), Some(RankTier::Top50));
        assert_eq!(RankTier::from_rank(75), Some(RankTier::Top75));
        assert_eq!(RankTier::from_rank(76), Some(RankTier::Top100));
        assert_eq!(RankTier::from_rank(100), Some(RankTier::Top100));
        assert_eq!(RankTier::from_rank(101), None);
        assert_eq!(RankTier::Top25.to_string(), "Top 25");
    }

    #[tokio::test]
    async fn test_revokes_other_tiers_before_granting() {
        let member = UserId::new(500);
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_leaderboard().returning(|_| Ok(entries(12)));

        let mut links = MockUsernameLinkTable::new();
        links
            .expect_resolve_identity()
            .returning(move |username| (username == "player11").then_some(member));

        let mut seq = Sequence::new();
        let mut effects = MockSideEffectApplier::new();
        effects
            .expect_held_tiers()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![RankTier::Top10, RankTier::Top50]));
        effects
            .expect_revoke_tier()
            .withf(|_, tier| *tier == RankTier::Top10)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        effects
            .expect_revoke_tier()
            .withf(|_, tier| *tier == RankTier::Top50)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        effects
            .expect_grant_tier()
            .withf(move |id, tier| *id == member && *tier == RankTier::Top25)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let roles = LeaderboardRoles::new(
            Arc::new(remote),
            Arc::new(effects),
            Arc::new(links),
            Arc::new(MockNotifier::new()),
            None,
            100,
        );

        let report = roles.tick().await.unwrap();
        assert_eq!(report.assigned, vec![(member, RankTier::Top25)]);
        assert_eq!(report.unlinked, 11);
    }

    #[tokio::test]
    async fn test_held_tier_is_kept_and_ranks_past_100_lose_tiers() {
        let kept = UserId::new(1);
        let outside = UserId::new(2);
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_leaderboard().returning(|_| Ok(entries(101)));

        let mut links = MockUsernameLinkTable::new();
        links.expect_resolve_identity().returning(move |username| match username {
            "player1" => Some(kept),
            "player101" => Some(outside),
            _ => None,
        });

        let mut effects = MockSideEffectApplier::new();
        effects
            .expect_held_tiers()
            .withf(move |id| *id == kept)
            .times(1)
            .returning(|_| Ok(vec![RankTier::Top10]));
        effects
            .expect_held_tiers()
            .withf(move |id| *id == outside)
            .times(1)
            .returning(|_| Ok(vec![RankTier::Top100]));
        effects
            .expect_revoke_tier()
            .withf(move |id, tier| *id == outside && *tier == RankTier::Top100)
            .times(1)
            .returning(|_, _| Ok(()));
        effects.expect_grant_tier().never();

        let roles = LeaderboardRoles::new(
            Arc::new(remote),
            Arc::new(effects),
            Arc::new(links),
            Arc::new(MockNotifier::new()),
            None,
            101,
        );

        let report = roles.tick().await.unwrap();
        assert_eq!(report.assigned, vec![(kept, RankTier::Top10)]);
        assert_eq!(report.cleared, vec![outside]);
        assert_eq!(report.unlinked, 99);
    }

    #[tokio::test]
    async fn test_posts_sections_of_25() {
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_leaderboard().returning(|_| Ok(entries(30)));

        let mut links = MockUsernameLinkTable::new();
        links.expect_resolve_identity().returning(|_| None);

        let mut seq = Sequence::new();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_clear()
            .withf(|channel| *channel == ChannelId::new(9))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(30));
        notifier
            .expect_send()
            .withf(|_, text| text.starts_with("```1: player1 - 16 hours and 40 minutes"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        notifier
            .expect_send()
            .withf(|_, text| text.starts_with("```26: player26"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let roles = LeaderboardRoles::new(
            Arc::new(remote),
            Arc::new(MockSideEffectApplier::new()),
            Arc::new(links),
            Arc::new(notifier),
            Some(ChannelId::new(9)),
            100,
        );

        roles.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_clear_still_posts() {
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_leaderboard().returning(|_| Ok(entries(3)));

        let mut links = MockUsernameLinkTable::new();
        links.expect_resolve_identity().returning(|_| None);

        let mut notifier = MockNotifier::new();
        notifier
            .expect_clear()
            .times(1)
            .returning(|_| Err(LinkError::PermissionDenied("read message history".into())));
        notifier.expect_send().times(1).returning(|_, _| Ok(()));

        let roles = LeaderboardRoles::new(
            Arc::new(remote),
            Arc::new(MockSideEffectApplier::new()),
            Arc::new(links),
            Arc::new(notifier),
            Some(ChannelId::new(9)),
            100,
        );

        assert_eq!(roles.tick().await.unwrap().unlinked, 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_changes_nothing() {
        let mut remote = MockRemoteLinkClient::new();
        remote
            .expect_leaderboard()
            .returning(|_| Err(RemoteError::Api { status: 502 }));

        let roles = LeaderboardRoles::new(
            Arc::new(remote),
            Arc::new(MockSideEffectApplier::new()),
            Arc::new(MockUsernameLinkTable::new()),
            Arc::new(MockNotifier::new()),
            Some(ChannelId::new(9)),
            100,
        );

        assert!(roles.tick().await.is_err());
    }
}
