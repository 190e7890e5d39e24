// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "automod/mod.rs"]
pub mod automod;
