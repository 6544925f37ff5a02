//! Link service
//!
//! Entry point for the chat commands and owner of the periodic tasks.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use poise::serenity_prelude::{ChannelId, UserId};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::LINK_TARGET;
use crate::config::LinkSettings;
use crate::link::messages::playtime_message;
use crate::link::{
    BanSweeper, ErrorReporter, LeaderboardRoles, LinkError, LinkRequest, LinkResult, Notifier,
    ReconciliationLoop, RemoteLinkClient, RequestStore, SideEffectApplier, UsernameLinkTable,
};

/// A request that was registered remotely and is now waiting for confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAccepted {
    pub request: LinkRequest,
    /// Time the member has to confirm in game
    pub timeout: TimeDelta,
}

/// Link operations shared by commands, event handlers and periodic tasks
#[derive(Clone)]
pub struct LinkService {
    store: RequestStore,
    remote: Arc<dyn RemoteLinkClient>,
    effects: Arc<dyn SideEffectApplier>,
    notifier: Arc<dyn Notifier>,
    links: Arc<dyn UsernameLinkTable>,
    reporter: Option<ErrorReporter>,
}

impl std::fmt::Debug for LinkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkService")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl LinkService {
    #[must_use]
    pub fn new(
        store: RequestStore,
        remote: Arc<dyn RemoteLinkClient>,
        effects: Arc<dyn SideEffectApplier>,
        notifier: Arc<dyn Notifier>,
        links: Arc<dyn UsernameLinkTable>,
    ) -> Self {
        Self {
            store,
            remote,
            effects,
            notifier,
            links,
            reporter: None,
        }
    }

    /// Send internal failures to the error channel
    #[must_use]
    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    #[must_use]
    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &LinkSettings {
        self.store.settings()
    }

    /// Start a link between the requester and a roblox username
    ///
    /// # Errors
    /// - `InvalidUsername` for a blank username
    /// - `AlreadyLinked` if the requester holds the linked role
    /// - any refusal of [`RequestStore::reserve`]
    /// - `Transport` if the server could not register the request
    pub async fn initiate_link(
        &self,
        requester: UserId,
        requester_name: &str,
        channel: ChannelId,
        username: &str,
    ) -> LinkResult<LinkAccepted> {
        let username = username.trim();
        if username.is_empty() {
            return Err(LinkError::InvalidUsername);
        }

        if self.effects.is_linked(requester).await? {
            return Err(LinkError::AlreadyLinked);
        }

        self.store.reserve(username, requester, Utc::now())?;

        if let Err(e) = self.remote.create(username, requester_name).await {
            self.store.release(username);
            return Err(e.into());
        }

        // Commit with the time the server accepted it, so the timeout is never cut short.
        let request = match self.store.commit(username, requester, channel, Utc::now()) {
            Ok(request) => request,
            Err(e) => {
                // Cancelled while the server call was in flight
                self.terminate(username).await;
                return Err(e);
            }
        };

        info!(
            target: LINK_TARGET,
            username = %username,
            user_id = %requester,
            request_id = %request.id,
            "Link request started"
        );

        Ok(LinkAccepted {
            request,
            timeout: self.settings().connection_timeout,
        })
    }

    /// Cancel the requester's pending request, returning its username
    ///
    /// # Errors
    /// `NotPending` if the requester has nothing pending
    pub async fn cancel_link(&self, requester: UserId) -> LinkResult<String> {
        let request = self
            .store
            .remove_for_requester(requester)
            .ok_or(LinkError::NotPending)?;
        self.terminate(&request.subject_username).await;

        info!(
            target: LINK_TARGET,
            username = %request.subject_username,
            user_id = %requester,
            outcome = "cancelled",
            "Link request cancelled"
        );
        Ok(request.subject_username)
    }

    /// Undo a confirmed link
    ///
    /// # Errors
    /// `NotLinked` if the requester does not hold the linked role, or the role change failure
    pub async fn remove_link(&self, requester: UserId) -> LinkResult<()> {
        if !self.effects.is_linked(requester).await? {
            return Err(LinkError::NotLinked);
        }

        self.effects.revoke_linked(requester).await?;

        match self.effects.set_display_name(requester, None).await {
            Ok(()) | Err(LinkError::PermissionDenied(_)) => {}
            Err(e) => warn!(target: LINK_TARGET, user_id = %requester, error = %e, "Failed to reset nickname"),
        }

        let username = self.links.forget(requester).await?;
        info!(
            target: LINK_TARGET,
            user_id = %requester,
            username = username.as_deref().unwrap_or("unknown"),
            "Link removed"
        );
        Ok(())
    }

    /// Drop whatever a departed member had in flight
    pub async fn forget_member(&self, member: UserId) {
        if let Some(request) = self.store.remove_for_requester(member) {
            self.terminate(&request.subject_username).await;
            info!(
                target: LINK_TARGET,
                username = %request.subject_username,
                user_id = %member,
                "Dropped link request of departed member"
            );
        }
    }

    /// Playtime of a roblox username, ready to show
    ///
    /// # Errors
    /// - `InvalidUsername` for a blank username
    /// - `PlaytimeHidden` for a confidential username unless `is_admin`
    /// - `Transport` if the server could not answer
    pub async fn playtime(&self, username: &str, is_admin: bool) -> LinkResult<String> {
        let username = username.trim().to_lowercase();
        if username.is_empty() {
            return Err(LinkError::InvalidUsername);
        }
        if !is_admin && self.settings().is_confidential(&username) {
            return Err(LinkError::PlaytimeHidden(username));
        }

        let minutes = self.remote.playtime(&username).await?;
        Ok(playtime_message(&username, minutes))
    }

    /// Post a failure to the error channel, if one is configured
    pub async fn report(&self, context: &str, error: &LinkError) {
        if let Some(reporter) = &self.reporter {
            reporter.report(context, error).await;
        }
    }

    async fn terminate(&self, username: &str) {
        if let Err(e) = self.remote.terminate(username).await {
            warn!(target: LINK_TARGET, username = %username, error = %e, "Failed to terminate server request");
        }
    }

    #[must_use]
    pub fn reconciler(&self) -> ReconciliationLoop {
        let reconciler = ReconciliationLoop::new(
            self.store.clone(),
            Arc::clone(&self.remote),
            Arc::clone(&self.effects),
            Arc::clone(&self.notifier),
            Arc::clone(&self.links),
        );
        match &self.reporter {
            Some(reporter) => reconciler.with_reporter(reporter.clone()),
            None => reconciler,
        }
    }

    #[must_use]
    pub fn sweeper(&self) -> BanSweeper {
        BanSweeper::new(self.store.clone())
    }

    #[must_use]
    pub fn leaderboard(&self, channel: Option<ChannelId>) -> LeaderboardRoles {
        let leaderboard = LeaderboardRoles::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.effects),
            Arc::clone(&self.links),
            Arc::clone(&self.notifier),
            channel,
            self.settings().leaderboard_size,
        );
        match &self.reporter {
            Some(reporter) => leaderboard.with_reporter(reporter.clone()),
            None => leaderboard,
        }
    }

    /// Spawn the reconciliation, ban sweep and leaderboard tasks
    pub fn start(&self, leaderboard_channel: Option<ChannelId>) -> Vec<JoinHandle<()>> {
        let settings = self.settings();
        vec![
            tokio::spawn(self.reconciler().run(settings.attempt_delay)),
            tokio::spawn(self.sweeper().run(settings.unban_check_delay)),
            tokio::spawn(
                self.leaderboard(leaderboard_channel)
                    .run(settings.leaderboard_delay),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RemoteError;
    use crate::link::effects::{MockNotifier, MockSideEffectApplier};
    use crate::link::remote::MockRemoteLinkClient;
    use crate::link::table::MockUsernameLinkTable;

    const ALICE: UserId = UserId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(5);

    fn settings() -> LinkSettings {
        let mut settings = LinkSettings::default();
        settings.connection_timeout = TimeDelta::seconds(300);
        settings.confidential_usernames.insert("admin_acct".to_string());
        settings
    }

    fn service(
        store: &RequestStore,
        remote: MockRemoteLinkClient,
        effects: MockSideEffectApplier,
        links: MockUsernameLinkTable,
    ) -> LinkService {
        LinkService::new(
            store.clone(),
            Arc::new(remote),
            Arc::new(effects),
            Arc::new(MockNotifier::new()),
            Arc::new(links),
        )
    }

    fn not_linked() -> MockSideEffectApplier {
        let mut effects = MockSideEffectApplier::new();
        effects.expect_is_linked().returning(|_| Ok(false));
        effects
    }

    #[tokio::test]
    async fn test_initiate_registers_remotely_then_commits() {
        let store = RequestStore::new(settings());
        let mut remote = MockRemoteLinkClient::new();
        remote
            .expect_create()
            .withf(|username: &str, name: &str| username == "steve123" && name == "alice")
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(&store, remote, not_linked(), MockUsernameLinkTable::new());
        let accepted = service
            .initiate_link(ALICE, "alice", CHANNEL, "  steve123 ")
            .await
            .unwrap();

        assert_eq!(accepted.request.subject_username, "steve123");
        assert_eq!(accepted.timeout, TimeDelta::seconds(300));
        assert_eq!(store.get("steve123").map(|r| r.requester), Some(ALICE));
    }

    #[tokio::test]
    async fn test_second_request_is_refused() {
        let store = RequestStore::new(settings());
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_create().times(1).returning(|_, _| Ok(()));

        let service = service(&store, remote, not_linked(), MockUsernameLinkTable::new());
        service
            .initiate_link(ALICE, "alice", CHANNEL, "steve123")
            .await
            .unwrap();

        let result = service
            .initiate_link(ALICE, "alice", CHANNEL, "other_name")
            .await;
        assert!(matches!(result, Err(LinkError::AlreadyPending { .. })));
    }

    #[tokio::test]
    async fn test_confidential_username_never_reaches_server() {
        let store = RequestStore::new(settings());
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_create().never();

        let service = service(&store, remote, not_linked(), MockUsernameLinkTable::new());
        let result = service
            .initiate_link(ALICE, "alice", CHANNEL, "Admin_Acct")
            .await;

        assert!(matches!(result, Err(LinkError::Disallowed(_))));
        assert_eq!(store.pending_count(), 0);
        assert!(store.bans().is_empty());
    }

    #[tokio::test]
    async fn test_linked_member_is_refused() {
        let store = RequestStore::new(settings());
        let mut effects = MockSideEffectApplier::new();
        effects.expect_is_linked().returning(|_| Ok(true));
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_create().never();

        let service = service(&store, remote, effects, MockUsernameLinkTable::new());
        let result = service.initiate_link(ALICE, "alice", CHANNEL, "steve123").await;
        assert!(matches!(result, Err(LinkError::AlreadyLinked)));
    }

    #[tokio::test]
    async fn test_blank_username_is_invalid() {
        let store = RequestStore::new(settings());
        let service = service(
            &store,
            MockRemoteLinkClient::new(),
            MockSideEffectApplier::new(),
            MockUsernameLinkTable::new(),
        );
        let result = service.initiate_link(ALICE, "alice", CHANNEL, "   ").await;
        assert!(matches!(result, Err(LinkError::InvalidUsername)));
    }

    #[tokio::test]
    async fn test_failed_registration_releases_username() {
        let store = RequestStore::new(settings());
        let mut remote = MockRemoteLinkClient::new();
        remote
            .expect_create()
            .times(1)
            .returning(|_, _| Err(RemoteError::Api { status: 500 }));

        let service = service(&store, remote, not_linked(), MockUsernameLinkTable::new());
        let result = service.initiate_link(ALICE, "alice", CHANNEL, "steve123").await;

        assert!(matches!(result, Err(LinkError::Transport(_))));
        assert!(!store.is_tracked("steve123"));
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_terminates_remotely() {
        let store = RequestStore::new(settings());
        store.try_create("steve123", ALICE, CHANNEL).unwrap();

        let mut remote = MockRemoteLinkClient::new();
        remote
            .expect_terminate()
            .withf(|username: &str| username == "steve123")
            .times(1)
            .returning(|_| Ok(()));

        let service = service(
            &store,
            remote,
            MockSideEffectApplier::new(),
            MockUsernameLinkTable::new(),
        );
        assert_eq!(service.cancel_link(ALICE).await.unwrap(), "steve123");
        assert!(matches!(
            service.cancel_link(ALICE).await,
            Err(LinkError::NotPending)
        ));
    }

    #[tokio::test]
    async fn test_remove_link_swallows_nickname_permission_error() {
        let store = RequestStore::new(settings());
        let mut effects = MockSideEffectApplier::new();
        effects.expect_is_linked().returning(|_| Ok(true));
        effects.expect_revoke_linked().times(1).returning(|_| Ok(()));
        effects
            .expect_set_display_name()
            .withf(|_, name| name.is_none())
            .times(1)
            .returning(|_, _| Err(LinkError::PermissionDenied("edit nickname".to_string())));
        let mut links = MockUsernameLinkTable::new();
        links
            .expect_forget()
            .withf(|id| *id == ALICE)
            .times(1)
            .returning(|_| Ok(Some("steve123".to_string())));

        let service = service(&store, MockRemoteLinkClient::new(), effects, links);
        service.remove_link(ALICE).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_link_requires_link() {
        let store = RequestStore::new(settings());
        let mut effects = MockSideEffectApplier::new();
        effects.expect_is_linked().returning(|_| Ok(false));
        effects.expect_revoke_linked().never();

        let service = service(
            &store,
            MockRemoteLinkClient::new(),
            effects,
            MockUsernameLinkTable::new(),
        );
        assert!(matches!(
            service.remove_link(ALICE).await,
            Err(LinkError::NotLinked)
        ));
    }

    #[tokio::test]
    async fn test_forget_member_is_silent_without_request() {
        let store = RequestStore::new(settings());
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_terminate().never();

        let service = service(
            &store,
            remote,
            MockSideEffectApplier::new(),
            MockUsernameLinkTable::new(),
        );
        service.forget_member(ALICE).await;
    }

    #[tokio::test]
    async fn test_playtime_formats_minutes() {
        let store = RequestStore::new(settings());
        let mut remote = MockRemoteLinkClient::new();
        remote
            .expect_playtime()
            .withf(|username: &str| username == "steve123")
            .times(1)
            .returning(|_| Ok(754));

        let service = service(
            &store,
            remote,
            MockSideEffectApplier::new(),
            MockUsernameLinkTable::new(),
        );
        assert_eq!(
            service.playtime(" Steve123 ", false).await.unwrap(),
            "steve123 has played 12 hours and 34 minutes."
        );
    }

    #[tokio::test]
    async fn test_confidential_playtime_is_admin_only() {
        let store = RequestStore::new(settings());
        let mut remote = MockRemoteLinkClient::new();
        remote.expect_playtime().times(1).returning(|_| Ok(30));

        let service = service(
            &store,
            remote,
            MockSideEffectApplier::new(),
            MockUsernameLinkTable::new(),
        );
        assert!(matches!(
            service.playtime("Admin_Acct", false).await,
            Err(LinkError::PlaytimeHidden(name)) if name == "admin_acct"
        ));
        assert_eq!(
            service.playtime("Admin_Acct", true).await.unwrap(),
            "admin_acct has played less than 1 hour."
        );
    }

    #[tokio::test]
    async fn test_report_reaches_error_channel() {
        let errors = ChannelId::new(900);
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(move |channel, text| *channel == errors && text.contains("/playtime"))
            .times(1)
            .returning(|_, _| Ok(()));

        let store = RequestStore::new(settings());
        let service = LinkService::new(
            store,
            Arc::new(MockRemoteLinkClient::new()),
            Arc::new(MockSideEffectApplier::new()),
            Arc::new(MockNotifier::new()),
            Arc::new(MockUsernameLinkTable::new()),
        )
        .with_reporter(ErrorReporter::new(Arc::new(notifier), errors, None));

        service
            .report("/playtime", &LinkError::Transport(RemoteError::Api { status: 503 }))
            .await;
    }

    #[tokio::test]
    async fn test_report_without_error_channel_is_silent() {
        let store = RequestStore::new(settings());
        let service = service(
            &store,
            MockRemoteLinkClient::new(),
            MockSideEffectApplier::new(),
            MockUsernameLinkTable::new(),
        );
        service
            .report("/link", &LinkError::Transport(RemoteError::Api { status: 503 }))
            .await;
    }
}
