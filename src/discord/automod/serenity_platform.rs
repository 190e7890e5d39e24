// Serenity implementation of the automod platform ports.
//
// Every call is a single attempt. Errors are handed back to the core, which
// logs them and carries on with the next action.

use crate::core::automod::{
    ActionExecutor, AuditLogEntry, AutomodError, EmojiRef, EnforcementTarget, MemberDirectory,
    MessageRef, RenderedNotification,
};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

// Discord embed field values max out at 1024 characters.
const MAX_FIELD_CHARS: usize = 1_000;

fn platform_err(e: serenity::Error) -> AutomodError {
    AutomodError::PlatformError(e.to_string())
}

fn clip(value: &str) -> String {
    if value.is_empty() {
        return "-".to_string();
    }
    match value.char_indices().nth(MAX_FIELD_CHARS) {
        Some((idx, _)) => format!("{}…", &value[..idx]),
        None => value.to_string(),
    }
}

pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
    cache: Arc<serenity::Cache>,
    bot_user_id: u64,
}

impl SerenityPlatform {
    pub fn new(http: Arc<serenity::Http>, cache: Arc<serenity::Cache>, bot_user_id: u64) -> Self {
        Self {
            http,
            cache,
            bot_user_id,
        }
    }
}

#[async_trait]
impl ActionExecutor for SerenityPlatform {
    async fn delete_message(&self, message: &MessageRef) -> Result<(), AutomodError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&*self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(platform_err)
    }

    async fn timeout_member(
        &self,
        target: EnforcementTarget,
        duration: Duration,
        reason: &str,
    ) -> Result<(), AutomodError> {
        let until = serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + duration.as_secs() as i64,
        )
        .map_err(|e| AutomodError::PlatformError(format!("invalid timeout timestamp: {}", e)))?;

        serenity::GuildId::new(target.guild_id)
            .edit_member(
                &*self.http,
                serenity::UserId::new(target.user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map(|_| ())
            .map_err(platform_err)
    }

    async fn kick_member(&self, target: EnforcementTarget, reason: &str) -> Result<(), AutomodError> {
        serenity::GuildId::new(target.guild_id)
            .kick_with_reason(&*self.http, serenity::UserId::new(target.user_id), reason)
            .await
            .map_err(platform_err)
    }

    async fn ban_member(&self, target: EnforcementTarget, reason: &str) -> Result<(), AutomodError> {
        serenity::GuildId::new(target.guild_id)
            .ban_with_reason(&*self.http, serenity::UserId::new(target.user_id), 0, reason)
            .await
            .map_err(platform_err)
    }

    async fn remove_all_reactions_of_emoji(
        &self,
        message: &MessageRef,
        emoji: &EmojiRef,
    ) -> Result<(), AutomodError> {
        let reaction = match emoji.id {
            Some(id) => serenity::ReactionType::Custom {
                animated: emoji.animated,
                id: serenity::EmojiId::new(id),
                name: Some(emoji.name.clone()),
            },
            None => serenity::ReactionType::Unicode(emoji.name.clone()),
        };

        serenity::ChannelId::new(message.channel_id)
            .delete_reaction_emoji(
                &*self.http,
                serenity::MessageId::new(message.message_id),
                reaction,
            )
            .await
            .map_err(platform_err)
    }

    async fn send_direct_message(
        &self,
        user_id: u64,
        notification: &RenderedNotification,
    ) -> Result<(), AutomodError> {
        let channel = serenity::UserId::new(user_id)
            .create_dm_channel(&*self.http)
            .await
            .map_err(platform_err)?;

        let embed = serenity::CreateEmbed::new()
            .title(&notification.title)
            .description(&notification.body)
            .color(0xFFA500);

        channel
            .id
            .send_message(&*self.http, serenity::CreateMessage::new().embed(embed))
            .await
            .map(|_| ())
            .map_err(platform_err)
    }

    async fn send_audit_log(&self, entry: &AuditLogEntry) -> Result<(), AutomodError> {
        let Some(channel_id) = entry.channel_id else {
            tracing::debug!(guild_id = entry.guild_id, "No automod log channel configured");
            return Ok(());
        };

        let mut embed = serenity::CreateEmbed::new()
            .title(entry.category.to_string())
            .color(0xFF4500)
            .timestamp(serenity::Timestamp::now());
        for (name, value) in &entry.fields {
            embed = embed.field(name, clip(value), false);
        }

        serenity::ChannelId::new(channel_id)
            .send_message(&*self.http, serenity::CreateMessage::new().embed(embed))
            .await
            .map(|_| ())
            .map_err(platform_err)
    }
}

#[async_trait]
impl MemberDirectory for SerenityPlatform {
    fn bot_user_id(&self) -> Option<u64> {
        Some(self.bot_user_id)
    }

    async fn member_roles(&self, guild_id: u64, user_id: u64) -> Result<Option<Vec<u64>>, AutomodError> {
        let guild = serenity::GuildId::new(guild_id);
        let user = serenity::UserId::new(user_id);

        // Cache first; the guard must be dropped before any await.
        let cached: Option<Vec<u64>> = self
            .cache
            .guild(guild)
            .and_then(|g| g.members.get(&user).map(|m| m.roles.iter().map(|r| r.get()).collect()));
        if cached.is_some() {
            return Ok(cached);
        }

        let member = guild.member(&*self.http, user).await.map_err(platform_err)?;
        Ok(Some(member.roles.iter().map(|r| r.get()).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_limits_field_length() {
        assert_eq!(clip(""), "-");
        assert_eq!(clip("short"), "short");

        let long = "x".repeat(MAX_FIELD_CHARS + 50);
        let clipped = clip(&long);
        assert_eq!(clipped.chars().count(), MAX_FIELD_CHARS + 1);
        assert!(clipped.ends_with('…'));
    }
}
