// Read-only automod slash commands for moderators.
//
// Rules are managed through the seed file, so there is nothing to edit here:
// these commands only show what automod sees.

use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

// Embed descriptions cap at 4096 characters.
const MAX_DESCRIPTION_CHARS: usize = 4_000;

/// Inspect automod for this server.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES",
    subcommands("status", "points", "check")
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn push_line(out: &mut String, line: &str) -> bool {
    if out.len() + line.len() + 1 > MAX_DESCRIPTION_CHARS {
        out.push('…');
        return false;
    }
    out.push_str(line);
    out.push('\n');
    true
}

/// Show automod settings, escalation tiers and active rules.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let overview = ctx.data().automod.guild_overview(guild_id).await?;

    let config = overview.config.unwrap_or_default();
    let status = if config.automod_enabled {
        "✅ Enabled"
    } else {
        "❌ Disabled"
    };

    let immune = if config.immune_roles.is_empty() {
        "None".to_string()
    } else {
        config
            .immune_roles
            .iter()
            .map(|id| format!("<@&{}>", id))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut tiers: Vec<_> = config.escalation_tiers.iter().collect();
    tiers.sort_by_key(|t| t.threshold);
    let tiers = if tiers.is_empty() {
        "None".to_string()
    } else {
        tiers
            .iter()
            .map(|t| {
                let actions: Vec<String> = t.actions.iter().map(|a| a.to_string()).collect();
                format!("**{}** at {} pts → {}", t.display_name(), t.threshold, actions.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut rules = overview.rules;
    rules.sort_by(crate::core::automod::evaluation_order);
    let mut description = String::new();
    for rule in &rules {
        let actions: Vec<String> = rule.actions.iter().map(|a| a.to_string()).collect();
        let line = format!(
            "`#{}` **{}** (priority {}, {} pts) → {}",
            rule.id,
            rule.name,
            rule.priority,
            rule.warn_points,
            actions.join(", ")
        );
        if !push_line(&mut description, &line) {
            break;
        }
    }
    if description.is_empty() {
        description.push_str("No enabled rules.");
    }

    let log_channel = config
        .log_channel_id
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "Not set".to_string());

    let embed = serenity::CreateEmbed::default()
        .title("🛡️ Automod Status")
        .color(if config.automod_enabled {
            0x00FF00
        } else {
            0xFF0000
        })
        .description(description)
        .field("Status", status, true)
        .field("Log Channel", log_channel, true)
        .field("Immune Roles", immune, false)
        .field("Escalation Tiers", tiers, false)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "{} enabled rule(s)",
            rules.len()
        )));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show a member's active automod points and recent infractions.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn points(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let standing = ctx
        .data()
        .automod
        .user_standing(guild_id, user.id.get(), 10)
        .await?;

    let mut history = String::new();
    for infraction in &standing.recent {
        let line = format!(
            "<t:{}:R> `{}` +{} - {}",
            infraction.created_at.timestamp(),
            infraction.infraction_type.as_str(),
            infraction.points_assigned,
            infraction.rule_name.as_deref().unwrap_or(&infraction.reason)
        );
        if !push_line(&mut history, &line) {
            break;
        }
    }
    if history.is_empty() {
        history.push_str("No infractions on record.");
    }

    let embed = serenity::CreateEmbed::default()
        .title(format!("Automod record for {}", user.name))
        .thumbnail(user.face())
        .color(serenity::Color::BLURPLE)
        .field("Active Points", standing.active_points.to_string(), true)
        .description(history);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Check which rule (if any) would fire for some text in this channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn check(
    ctx: Context<'_>,
    #[description = "Text to test against the rules"] text: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let role_ids: Vec<u64> = ctx
        .author_member()
        .await
        .map(|m| m.roles.iter().map(|r| r.get()).collect())
        .unwrap_or_default();

    let result = ctx
        .data()
        .automod
        .dry_run(guild_id, ctx.channel_id().get(), &role_ids, &text)
        .await?;

    let reply = match result {
        Some(m) => {
            let actions: Vec<String> = m.rule.actions.iter().map(|a| a.to_string()).collect();
            format!(
                "Rule **{}** would fire on pattern `{}`.\nActions: {}",
                m.rule.name,
                m.matched_pattern.display_name(),
                actions.join(", ")
            )
        }
        None => "No rule would fire for that text here.".to_string(),
    };

    ctx.send(poise::CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_line_stops_at_limit() {
        let mut out = String::new();
        let line = "x".repeat(1_500);
        assert!(push_line(&mut out, &line));
        assert!(push_line(&mut out, &line));
        assert!(!push_line(&mut out, &line));
        assert!(out.ends_with('…'));
        assert!(out.len() <= MAX_DESCRIPTION_CHARS + '…'.len_utf8());
    }
}
