//! Catastrophia API client
//!
//! Link requests and the playtime leaderboard live on the game's API server.
//! The bot only sees them through the calls below.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::link::{LinkStatus, RemoteError, RemoteLinkRecord, RemoteResult};

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "api-key";

/// One entry of the playtime leaderboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub username: String,
    /// Playtime in minutes
    pub playtime: u64,
}

/// Calls against the remote link API
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteLinkClient: Send + Sync {
    /// Register a pending link request
    async fn create(&self, username: &str, requester_name: &str) -> RemoteResult<()>;

    /// Every request the server currently knows, keyed by username
    async fn list_all(&self) -> RemoteResult<HashMap<String, RemoteLinkRecord>>;

    /// Tell the server a request is finished and can be dropped
    async fn terminate(&self, username: &str) -> RemoteResult<()>;

    /// Top players by playtime, best first
    async fn leaderboard(&self, amount: u32) -> RemoteResult<Vec<LeaderboardEntry>>;

    /// Total playtime of one player in minutes
    async fn playtime(&self, username: &str) -> RemoteResult<u64>;
}

/// Endpoint paths relative to the API base URL
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub link: String,
    pub all_links: String,
    pub top_times: String,
    pub playtime: String,
}

#[derive(Debug, Deserialize)]
struct WireLinkRecord {
    status: i64,
    #[serde(default)]
    discord_name: Option<String>,
}

/// reqwest-backed [`RemoteLinkClient`]
#[derive(Debug, Clone)]
pub struct HttpLinkClient {
    http: reqwest::Client,
    base_url: String,
    endpoints: Endpoints,
}

impl HttpLinkClient {
    /// Build a client that sends the API key with every request
    ///
    /// # Errors
    /// Returns an error if the URL or key is empty or the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        api_key: &str,
        endpoints: Endpoints,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        if base_url.is_empty() {
            return Err(RemoteError::Config("API URL is empty".into()));
        }
        if api_key.is_empty() {
            return Err(RemoteError::Config("API key is empty".into()));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| RemoteError::Config("Invalid API key format".into()))?;
        headers.insert(API_KEY_HEADER, key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoints,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    fn check_status(resp: &reqwest::Response) -> RemoteResult<()> {
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn post_status(&self, params: &[(&str, &str)]) -> RemoteResult<()> {
        let resp = self
            .http
            .post(self.url(&self.endpoints.link))
            .query(params)
            .send()
            .await?;
        Self::check_status(&resp)
    }
}

#[async_trait::async_trait]
impl RemoteLinkClient for HttpLinkClient {
    async fn create(&self, username: &str, requester_name: &str) -> RemoteResult<()> {
        let status = LinkStatus::Pending.code().to_string();
        self.post_status(&[
            ("roblox_username", username),
            ("discord_name", requester_name),
            ("status", &status),
        ])
        .await
    }

    async fn list_all(&self) -> RemoteResult<HashMap<String, RemoteLinkRecord>> {
        let resp = self
            .http
            .get(self.url(&self.endpoints.all_links))
            .send()
            .await?;
        Self::check_status(&resp)?;
        let body: HashMap<String, WireLinkRecord> = resp.json().await?;
        debug!("Fetched {} remote link requests", body.len());

        Ok(body
            .into_iter()
            .map(|(username, wire)| {
                let record = RemoteLinkRecord {
                    subject_username: username.clone(),
                    status_code: wire.status,
                    requester_display_name: wire.discord_name.unwrap_or_default(),
                };
                (username, record)
            })
            .collect())
    }

    async fn terminate(&self, username: &str) -> RemoteResult<()> {
        let status = LinkStatus::Terminated.code().to_string();
        self.post_status(&[("roblox_username", username), ("status", &status)])
            .await
    }

    async fn leaderboard(&self, amount: u32) -> RemoteResult<Vec<LeaderboardEntry>> {
        let resp = self
            .http
            .get(self.url(&self.endpoints.top_times))
            .query(&[("amount", amount)])
            .send()
            .await?;
        Self::check_status(&resp)?;
        let body: HashMap<String, u64> = resp.json().await?;

        let mut entries: Vec<LeaderboardEntry> = body
            .into_iter()
            .map(|(username, playtime)| LeaderboardEntry { username, playtime })
            .collect();
        entries.sort_by(|a, b| {
            b.playtime
                .cmp(&a.playtime)
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(entries)
    }

    async fn playtime(&self, username: &str) -> RemoteResult<u64> {
        let resp = self
            .http
            .get(self.url(&self.endpoints.playtime))
            .query(&[("username", username)])
            .send()
            .await?;
        Self::check_status(&resp)?;
        Ok(resp.json().await?)
    }
}
