// Core automod module - rule matching, enforcement, infractions and escalation.
// Ports live next to the services that use them.

pub mod actions;
pub mod automod_models;
pub mod automod_service;
pub mod dispatcher;
pub mod escalation_service;
pub mod infraction_service;
pub mod pattern_matcher;
pub mod rule_engine;
pub mod scoping;

#[cfg(test)]
pub mod test_support;

pub use actions::*;
pub use automod_models::*;
pub use automod_service::*;
pub use dispatcher::*;
pub use infraction_service::*;
pub use pattern_matcher::*;
pub use rule_engine::*;
