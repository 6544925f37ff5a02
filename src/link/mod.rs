//! Roblox username linking
//!
//! Members ask to link a roblox username from Discord. The request is registered
//! on the Catastrophia server and confirmed, denied or refused in game. The
//! periodic tasks here pick up those outcomes and apply them in the guild.

mod error;
pub mod messages;
mod record;
mod store;
pub mod remote;
pub mod effects;
pub mod table;
mod leaderboard;
mod reconcile;
mod report;
mod sweeper;
mod service;

pub use effects::{ChannelNotifier, DiscordEffects, Notifier, SideEffectApplier};
pub use error::{LinkError, LinkResult, RemoteError, RemoteResult};
pub use leaderboard::{LeaderboardReport, LeaderboardRoles, RankTier};
pub use reconcile::{ReconciliationLoop, TickReport};
pub use report::ErrorReporter;
pub use record::{BanRecord, LinkRequest, LinkStatus, RemoteLinkRecord};
pub use remote::{Endpoints, HttpLinkClient, LeaderboardEntry, RemoteLinkClient};
pub use service::{LinkAccepted, LinkService};
pub use store::RequestStore;
pub use sweeper::BanSweeper;
pub use table::{LinkedUsers, UsernameLinkTable};
