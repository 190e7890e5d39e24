// Discord layer - commands and event handlers.

#[path = "automod/mod.rs"]
pub mod automod;

use crate::core::automod::{AutomodDispatcher, AutomodEnforcer};
use std::sync::Arc;

/// Shared state handed to every command and event.
pub struct Data {
    pub automod: Arc<AutomodEnforcer>,
    pub dispatcher: AutomodDispatcher,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
