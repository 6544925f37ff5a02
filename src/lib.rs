pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod link;
pub mod logging;

pub const BOT_NAME: &str = "catastrophia_bot";
pub const COMMAND_TARGET: &str = "catastrophia_bot::command";
pub const ERROR_TARGET: &str = "catastrophia_bot::error";
pub const EVENT_TARGET: &str = "catastrophia_bot::handlers";
pub const LINK_TARGET: &str = "catastrophia_bot::link";
pub const CONSOLE_TARGET: &str = "catastrophia_bot";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
