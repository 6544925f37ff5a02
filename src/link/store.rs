//! Request store
//!
//! Holds in-flight link requests and link bans behind one lock. Nothing here
//! awaits, so the lock is never held across a network call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use poise::serenity_prelude::{ChannelId, UserId};
use tracing::debug;
use uuid::Uuid;

use crate::config::LinkSettings;
use crate::link::{BanRecord, LinkError, LinkRequest, LinkResult};

#[derive(Debug, Default)]
struct StoreInner {
    /// Committed requests keyed by username
    requests: HashMap<String, LinkRequest>,
    /// Usernames whose remote registration is in flight, with their requester
    reservations: HashMap<String, UserId>,
    bans: Vec<BanRecord>,
}

impl StoreInner {
    /// Checks every rule a new request has to pass
    fn admit(
        &self,
        username: &str,
        requester: UserId,
        settings: &LinkSettings,
        now: DateTime<Utc>,
    ) -> LinkResult<()> {
        if let Some(request) = self.requests.values().find(|r| r.requester == requester) {
            return Err(LinkError::AlreadyPending {
                remaining: request.remaining(now, settings.connection_timeout),
            });
        }
        if self.reservations.values().any(|owner| *owner == requester) {
            return Err(LinkError::AlreadyPending {
                remaining: settings.connection_timeout,
            });
        }
        if let Some(remaining) = self.ban_remaining(requester, now) {
            return Err(LinkError::Banned { remaining });
        }
        if settings.is_confidential(username) {
            return Err(LinkError::Disallowed(username.to_string()));
        }
        if self.requests.contains_key(username) || self.reservations.contains_key(username) {
            return Err(LinkError::UsernameInUse(username.to_string()));
        }
        Ok(())
    }

    fn ban_remaining(&self, identity: UserId, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.bans
            .iter()
            .filter(|ban| ban.banned == identity && !ban.is_expired(now))
            .map(|ban| ban.expires_at - now)
            .max()
    }
}

/// Store for link requests and link bans
#[derive(Clone)]
pub struct RequestStore {
    inner: Arc<Mutex<StoreInner>>,
    settings: Arc<LinkSettings>,
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new(LinkSettings::default())
    }
}

impl std::fmt::Debug for RequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("RequestStore")
            .field("requests", &inner.requests.len())
            .field("reservations", &inner.reservations.len())
            .field("bans", &inner.bans.len())
            .finish()
    }
}

impl RequestStore {
    /// Create an empty store
    #[must_use]
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            settings: Arc::new(settings),
        }
    }

    // No code path panics while holding the lock, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and insert a request in one step
    ///
    /// # Errors
    /// `AlreadyPending`, `Banned`, `Disallowed` or `UsernameInUse` when the request is refused
    pub fn try_create(
        &self,
        username: &str,
        requester: UserId,
        channel: ChannelId,
    ) -> LinkResult<LinkRequest> {
        self.try_create_at(username, requester, channel, Utc::now())
    }

    /// [`RequestStore::try_create`] with an explicit clock
    ///
    /// # Errors
    /// Same as [`RequestStore::try_create`]
    pub fn try_create_at(
        &self,
        username: &str,
        requester: UserId,
        channel: ChannelId,
        now: DateTime<Utc>,
    ) -> LinkResult<LinkRequest> {
        let mut inner = self.lock();
        inner.admit(username, requester, &self.settings, now)?;
        let request = LinkRequest::new(username, requester, channel, now);
        inner.requests.insert(username.to_string(), request.clone());
        Ok(request)
    }

    /// Validate a request and hold its username while it is registered remotely
    ///
    /// The reservation counts against the one-request-per-member rule but is
    /// not part of [`RequestStore::snapshot_pending`].
    ///
    /// # Errors
    /// Same as [`RequestStore::try_create`]
    pub fn reserve(&self, username: &str, requester: UserId, now: DateTime<Utc>) -> LinkResult<()> {
        let mut inner = self.lock();
        inner.admit(username, requester, &self.settings, now)?;
        inner.reservations.insert(username.to_string(), requester);
        Ok(())
    }

    /// Turn the requester's reservation into a pending request created at `now`
    ///
    /// # Errors
    /// `NotPending` if the reservation was released in the meantime or now belongs
    /// to another member
    pub fn commit(
        &self,
        username: &str,
        requester: UserId,
        channel: ChannelId,
        now: DateTime<Utc>,
    ) -> LinkResult<LinkRequest> {
        let mut inner = self.lock();
        if inner.reservations.get(username) != Some(&requester) {
            return Err(LinkError::NotPending);
        }
        inner.reservations.remove(username);
        let request = LinkRequest::new(username, requester, channel, now);
        inner.requests.insert(username.to_string(), request.clone());
        Ok(request)
    }

    /// Drop a reservation after a failed remote registration
    pub fn release(&self, username: &str) -> Option<UserId> {
        self.lock().reservations.remove(username)
    }

    /// Remove a request by username, no-op if absent
    pub fn remove(&self, username: &str) -> Option<LinkRequest> {
        self.lock().requests.remove(username)
    }

    /// Remove a request only if it is still the given instance
    pub fn remove_instance(&self, username: &str, id: Uuid) -> Option<LinkRequest> {
        let mut inner = self.lock();
        if inner.requests.get(username).is_some_and(|r| r.id == id) {
            inner.requests.remove(username)
        } else {
            None
        }
    }

    /// Remove whatever the member has in flight, committed or reserved
    pub fn remove_for_requester(&self, requester: UserId) -> Option<LinkRequest> {
        let mut inner = self.lock();
        inner.reservations.retain(|_, owner| *owner != requester);
        let username = inner
            .requests
            .iter()
            .find(|(_, request)| request.requester == requester)
            .map(|(username, _)| username.clone())?;
        inner.requests.remove(&username)
    }

    /// Whether the username is pending or reserved
    #[must_use]
    pub fn is_tracked(&self, username: &str) -> bool {
        let inner = self.lock();
        inner.requests.contains_key(username) || inner.reservations.contains_key(username)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, username: &str) -> Option<LinkRequest> {
        self.lock().requests.get(username).cloned()
    }

    /// Number of committed requests
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Point-in-time copy of the committed requests
    #[must_use]
    pub fn snapshot_pending(&self) -> Vec<(String, LinkRequest)> {
        self.lock()
            .requests
            .iter()
            .map(|(username, request)| (username.clone(), request.clone()))
            .collect()
    }

    /// Bar a member from making requests for `duration`
    ///
    /// Bans are not merged; each one expires on its own.
    pub fn ban(&self, identity: UserId, duration: TimeDelta, now: DateTime<Utc>) -> BanRecord {
        let record = BanRecord::new(identity, duration, now);
        self.lock().bans.push(record.clone());
        record
    }

    /// Longest remaining ban for a member, if any is active
    #[must_use]
    pub fn ban_remaining(&self, identity: UserId, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.lock().ban_remaining(identity, now)
    }

    /// Remove every ban with `expires_at <= now`, returning how many were removed
    pub fn sweep_expired_bans(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let before = inner.bans.len();
        inner.bans.retain(|ban| !ban.is_expired(now));
        let removed = before - inner.bans.len();
        if removed > 0 {
            debug!("Removed {removed} expired link bans");
        }
        removed
    }

    #[must_use]
    pub fn bans(&self) -> Vec<BanRecord> {
        self.lock().bans.clone()
    }

    #[must_use]
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }
}
