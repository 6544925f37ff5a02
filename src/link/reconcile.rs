//! Link request reconciliation
//!
//! Each tick compares the requests this bot is waiting on with the records on
//! the Catastrophia server and acts on every finished one. A request is always
//! removed from the store before its outcome is applied, and outcomes are only
//! applied for requests this tick removed itself, so an outcome can never be
//! applied twice even if the server keeps reporting it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::LINK_TARGET;
use crate::config::LinkSettings;
use crate::link::messages::{
    link_confirmed, link_denied, link_disallowed, link_expired, mention_message,
};
use crate::link::{
    ErrorReporter, LinkError, LinkRequest, LinkResult, LinkStatus, Notifier, RemoteLinkClient,
    RemoteLinkRecord, RequestStore, SideEffectApplier, UsernameLinkTable,
};

/// Usernames handled by one tick, by outcome
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub expired: Vec<String>,
    pub confirmed: Vec<String>,
    pub denied: Vec<String>,
    pub disallowed: Vec<String>,
    /// Local requests the server no longer knows
    pub outdated: Vec<String>,
    /// Server records with no local request, terminated remotely
    pub orphaned: Vec<String>,
}

impl TickReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
            && self.confirmed.is_empty()
            && self.denied.is_empty()
            && self.disallowed.is_empty()
            && self.outdated.is_empty()
            && self.orphaned.is_empty()
    }
}

/// Periodic reconciliation of local link requests with the server
pub struct ReconciliationLoop {
    store: RequestStore,
    remote: Arc<dyn RemoteLinkClient>,
    effects: Arc<dyn SideEffectApplier>,
    notifier: Arc<dyn Notifier>,
    links: Arc<dyn UsernameLinkTable>,
    settings: LinkSettings,
    reporter: Option<ErrorReporter>,
}

impl ReconciliationLoop {
    #[must_use]
    pub fn new(
        store: RequestStore,
        remote: Arc<dyn RemoteLinkClient>,
        effects: Arc<dyn SideEffectApplier>,
        notifier: Arc<dyn Notifier>,
        links: Arc<dyn UsernameLinkTable>,
    ) -> Self {
        let settings = store.settings().clone();
        Self {
            store,
            remote,
            effects,
            notifier,
            links,
            settings,
            reporter: None,
        }
    }

    /// Report failed ticks to the error channel
    #[must_use]
    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Run one reconciliation pass as of `now`
    ///
    /// # Errors
    /// Returns a transport error when the server list cannot be fetched. Nothing
    /// in the store is touched in that case.
    pub async fn tick(&self, now: DateTime<Utc>) -> LinkResult<TickReport> {
        // Snapshot before fetching: anything committed later may not be on the list yet.
        let snapshot = self.store.snapshot_pending();
        let server = self.remote.list_all().await?;

        let mut report = TickReport::default();
        let mut handled: HashSet<String> = HashSet::new();

        // Expiry pass, independent of what the server said
        let mut live = Vec::with_capacity(snapshot.len());
        for (username, request) in snapshot {
            if !request.is_expired(now, self.settings.connection_timeout) {
                live.push((username, request));
                continue;
            }
            if let Some(request) = self.store.remove_instance(&username, request.id) {
                self.expire(&request).await;
                self.terminate(&username).await;
                handled.insert(username.clone());
                report.expired.push(username);
            }
        }

        // Diff pass
        for (username, request) in live {
            let status = match server.get(&username).map(RemoteLinkRecord::status) {
                None | Some(Ok(LinkStatus::Terminated)) => {
                    if self.store.remove_instance(&username, request.id).is_some() {
                        debug!(target: LINK_TARGET, username = %username, "Request no longer on server");
                        self.terminate(&username).await;
                        handled.insert(username.clone());
                        report.outdated.push(username);
                    }
                    continue;
                }
                Some(Ok(status)) if status.is_terminal_outcome() => status,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(target: LINK_TARGET, username = %username, error = %e, "Leaving request untouched");
                    continue;
                }
            };

            // Claim before acting; a cancel may have raced us.
            let Some(request) = self.store.remove_instance(&username, request.id) else {
                continue;
            };
            self.resolve(status, &request, now).await;
            self.terminate(&username).await;
            handled.insert(username.clone());

            match status {
                LinkStatus::Confirmed => report.confirmed.push(username),
                LinkStatus::Denied => report.denied.push(username),
                _ => report.disallowed.push(username),
            }
        }

        report.orphaned = self.terminate_orphans(&server, &handled).await;

        Ok(report)
    }

    async fn expire(&self, request: &LinkRequest) {
        info!(
            target: LINK_TARGET,
            username = %request.subject_username,
            user_id = %request.requester,
            outcome = "expired",
            "Link request expired"
        );
        self.notify(request, &link_expired(&request.subject_username))
            .await;
    }

    /// Apply the side effects of a terminal status
    async fn resolve(&self, status: LinkStatus, request: &LinkRequest, now: DateTime<Utc>) {
        let requester = request.requester;
        let username = request.subject_username.as_str();

        match status {
            LinkStatus::Confirmed => {
                if let Err(e) = self.effects.grant_linked(requester).await {
                    warn!(target: LINK_TARGET, user_id = %requester, error = %e, "Failed to grant linked role");
                }
                match self
                    .effects
                    .set_display_name(requester, Some(username.to_string()))
                    .await
                {
                    Ok(()) => {}
                    Err(LinkError::PermissionDenied(what)) => {
                        warn!(target: LINK_TARGET, user_id = %requester, "Missing permissions: {what}");
                    }
                    Err(e) => {
                        warn!(target: LINK_TARGET, user_id = %requester, error = %e, "Failed to set nickname");
                    }
                }
                if let Err(e) = self.links.record_link(requester, username).await {
                    warn!(target: LINK_TARGET, user_id = %requester, error = %e, "Failed to save link");
                }
                self.notify(request, &link_confirmed(username)).await;
            }
            LinkStatus::Denied => {
                let ban = self
                    .store
                    .ban(requester, self.settings.ban_duration, now);
                info!(
                    target: LINK_TARGET,
                    user_id = %requester,
                    expires_at = %ban.expires_at,
                    "Requester banned from linking"
                );
                self.notify(request, &link_denied(self.settings.ban_duration))
                    .await;
            }
            LinkStatus::Disallowed => {
                self.notify(request, &link_disallowed()).await;
            }
            LinkStatus::Pending | LinkStatus::Terminated => return,
        }

        info!(
            target: LINK_TARGET,
            username = %username,
            user_id = %requester,
            outcome = %status,
            "Link request resolved"
        );
    }

    /// Terminate server records nobody here is waiting on
    async fn terminate_orphans(
        &self,
        server: &HashMap<String, RemoteLinkRecord>,
        handled: &HashSet<String>,
    ) -> Vec<String> {
        let mut orphaned = Vec::new();
        for (username, record) in server {
            if handled.contains(username)
                || matches!(record.status(), Ok(LinkStatus::Terminated))
                || self.store.is_tracked(username)
            {
                continue;
            }
            debug!(target: LINK_TARGET, username = %username, "Terminating orphaned server request");
            self.terminate(username).await;
            orphaned.push(username.clone());
        }
        orphaned
    }

    async fn notify(&self, request: &LinkRequest, message: &str) {
        let text = mention_message(request.requester, message);
        if let Err(e) = self.notifier.send(request.origin_channel, text).await {
            warn!(
                target: LINK_TARGET,
                channel_id = %request.origin_channel,
                error = %e,
                "Failed to notify requester"
            );
        }
    }

    /// Fire-and-forget; a record that survives is terminated as an orphan next tick
    async fn terminate(&self, username: &str) {
        if let Err(e) = self.remote.terminate(username).await {
            warn!(target: LINK_TARGET, username = %username, error = %e, "Failed to terminate server request");
        }
    }

    /// Run forever, one tick per `period`
    ///
    /// Only the first failure of an outage is reported.
    pub async fn run(self, period: Duration) {
        info!("Starting link check task with {}s interval", period.as_secs());

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failing = false;

        loop {
            interval.tick().await;
            match self.tick(Utc::now()).await {
                Ok(report) => {
                    if failing {
                        info!(target: LINK_TARGET, "Link server reachable again");
                        failing = false;
                    }
                    if !report.is_empty() {
                        info!(
                            target: LINK_TARGET,
                            ?report,
                            pending = self.store.pending_count(),
                            "Link check finished"
                        );
                    }
                }
                Err(e) => {
                    warn!(target: LINK_TARGET, error = %e, "Link check skipped");
                    if !failing {
                        if let Some(reporter) = &self.reporter {
                            reporter.report("Link check", &e).await;
                        }
                    }
                    failing = true;
                }
            }
        }
    }
}
