// Discord adapters for automod: event translation, platform calls, commands.

pub mod commands;
pub mod events;
pub mod serenity_platform;

pub use serenity_platform::SerenityPlatform;
