// JSON seed file for guild automod settings and rules.
//
// There is no admin surface for rules, so operators describe them in a file
// that is loaded at startup and upserted into the store. Example:
//
// {
//   "guilds": [{
//     "guild_id": 123,
//     "config": { "automod_enabled": true, "escalation_tiers": [...] },
//     "rules": [{
//       "id": 1, "name": "invites", "wildcard": "*discord.gg/*",
//       "actions": ["DELETE", "WARN"], "warn_points": 5
//     }]
//   }]
// }
//
// A rule gives either `wildcard` (comma-separated, see `compile_wildcard`)
// or explicit `patterns`, or both. Every rule is validated before anything
// is written.

use crate::core::automod::{
    compile_wildcard, AutomodAction, AutomodRule, GuildModerationConfig, MatchMode, Pattern,
    RuleTarget,
};
use crate::infra::automod::SqliteAutomodStore;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SeedDocument {
    #[serde(default)]
    guilds: Vec<SeedGuild>,
}

#[derive(Debug, Deserialize)]
struct SeedGuild {
    guild_id: u64,
    #[serde(default)]
    config: Option<GuildModerationConfig>,
    #[serde(default)]
    rules: Vec<SeedRule>,
}

fn default_targets() -> Vec<RuleTarget> {
    vec![RuleTarget::MessageContent]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SeedRule {
    id: u64,
    name: String,
    #[serde(default)]
    wildcard: Option<String>,
    #[serde(default)]
    patterns: Vec<Pattern>,
    #[serde(default)]
    match_mode: MatchMode,
    #[serde(default = "default_targets")]
    targets: Vec<RuleTarget>,
    actions: Vec<AutomodAction>,
    #[serde(default)]
    warn_points: u32,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    channel_include: Vec<u64>,
    #[serde(default)]
    channel_exclude: Vec<u64>,
    #[serde(default)]
    role_include: Vec<u64>,
    #[serde(default)]
    role_exclude: Vec<u64>,
    #[serde(default)]
    timeout_duration_ms: Option<u64>,
    /// Defaults to the epoch so re-seeding never changes tie-break order.
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// One guild's validated seed data.
#[derive(Debug, Clone)]
pub struct GuildSeed {
    pub guild_id: u64,
    pub config: Option<GuildModerationConfig>,
    pub rules: Vec<AutomodRule>,
}

impl SeedRule {
    fn into_rule(self, guild_id: u64) -> anyhow::Result<AutomodRule> {
        let mut patterns = Vec::new();
        if let Some(wildcard) = &self.wildcard {
            patterns.extend(
                compile_wildcard(wildcard)
                    .with_context(|| format!("rule {} ('{}'): bad wildcard", self.id, self.name))?,
            );
        }
        patterns.extend(self.patterns);

        let rule = AutomodRule {
            id: self.id,
            guild_id,
            name: self.name,
            patterns,
            match_mode: self.match_mode,
            targets: self.targets,
            actions: self.actions,
            warn_points: self.warn_points,
            priority: self.priority,
            enabled: self.enabled,
            channel_include: self.channel_include,
            channel_exclude: self.channel_exclude,
            role_include: self.role_include,
            role_exclude: self.role_exclude,
            timeout_duration_ms: self.timeout_duration_ms,
            created_at: self.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        };

        rule.validate()
            .with_context(|| format!("rule {} ('{}') is invalid", rule.id, rule.name))?;
        Ok(rule)
    }
}

/// Parse and validate seed JSON. Nothing is returned unless every rule is valid.
pub fn parse_seed(json: &str) -> anyhow::Result<Vec<GuildSeed>> {
    let document: SeedDocument = serde_json::from_str(json).context("malformed seed JSON")?;

    let mut seeds = Vec::with_capacity(document.guilds.len());
    for guild in document.guilds {
        let guild_id = guild.guild_id;
        let mut rules = Vec::with_capacity(guild.rules.len());
        for seed_rule in guild.rules {
            if rules.iter().any(|r: &AutomodRule| r.id == seed_rule.id) {
                bail!("guild {}: rule id {} appears twice", guild_id, seed_rule.id);
            }
            rules.push(
                seed_rule
                    .into_rule(guild_id)
                    .with_context(|| format!("guild {}", guild_id))?,
            );
        }
        seeds.push(GuildSeed {
            guild_id,
            config: guild.config,
            rules,
        });
    }
    Ok(seeds)
}

pub fn load_seed_file(path: &Path) -> anyhow::Result<Vec<GuildSeed>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("could not read seed file {}", path.display()))?;
    parse_seed(&json).with_context(|| format!("seed file {}", path.display()))
}

/// Upsert every seeded config and rule.
pub async fn apply_seed(store: &SqliteAutomodStore, seeds: &[GuildSeed]) -> anyhow::Result<()> {
    for seed in seeds {
        if let Some(config) = &seed.config {
            store.save_config(seed.guild_id, config).await?;
        }
        for rule in &seed.rules {
            store.upsert_rule(rule).await?;
        }
        tracing::info!(
            guild_id = seed.guild_id,
            rules = seed.rules.len(),
            config = seed.config.is_some(),
            "Applied automod seed"
        );
    }
    Ok(())
}
