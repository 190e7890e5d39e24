// In-memory implementation of the automod stores.
//
// Backs the unit tests and lets the bot run without a database. Same
// contract as the SQLite store: infractions are append-only and active
// points are the sum of `points_assigned`, optionally over a trailing window.

use crate::core::automod::{
    AutomodError, AutomodRule, ConfigStore, GuildModerationConfig, Infraction, InfractionStore,
    InfractionType, NewInfraction, RuleStore,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct InMemoryAutomodStore {
    configs: DashMap<u64, GuildModerationConfig>,
    /// guild_id -> rules, keyed by rule id
    rules: DashMap<u64, DashMap<u64, AutomodRule>>,
    /// (guild_id, user_id) -> infractions in insertion order
    infractions: DashMap<(u64, u64), Vec<Infraction>>,
    next_id: AtomicU64,
    points_window: Option<Duration>,
}

impl Default for InMemoryAutomodStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAutomodStore {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
            rules: DashMap::new(),
            infractions: DashMap::new(),
            next_id: AtomicU64::new(1),
            points_window: None,
        }
    }

    /// Only count points from infractions newer than `window`.
    pub fn with_points_window(mut self, window: Duration) -> Self {
        self.points_window = Some(window);
        self
    }

    pub fn save_config(&self, guild_id: u64, config: GuildModerationConfig) {
        self.configs.insert(guild_id, config);
    }

    /// Insert or replace a rule by `(guild_id, id)`.
    pub fn upsert_rule(&self, rule: AutomodRule) {
        self.rules
            .entry(rule.guild_id)
            .or_default()
            .insert(rule.id, rule);
    }
}

#[async_trait]
impl ConfigStore for InMemoryAutomodStore {
    async fn get_config(&self, guild_id: u64) -> Result<Option<GuildModerationConfig>, AutomodError> {
        Ok(self.configs.get(&guild_id).map(|c| c.clone()))
    }
}

#[async_trait]
impl RuleStore for InMemoryAutomodStore {
    async fn get_enabled_rules(&self, guild_id: u64) -> Result<Vec<AutomodRule>, AutomodError> {
        Ok(self
            .rules
            .get(&guild_id)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| r.enabled)
                    .map(|r| r.value().clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl InfractionStore for InMemoryAutomodStore {
    async fn record_infraction(&self, infraction: NewInfraction) -> Result<Infraction, AutomodError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = Infraction::from_new(id, infraction);
        self.infractions
            .entry((stored.guild_id, stored.user_id))
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn active_points(&self, guild_id: u64, user_id: u64) -> Result<u32, AutomodError> {
        let since = self.points_window.and_then(|w| Utc::now().checked_sub_signed(w));
        Ok(self
            .infractions
            .get(&(guild_id, user_id))
            .map(|rows| {
                rows.iter()
                    .filter(|i| since.map_or(true, |s| i.created_at >= s))
                    .map(|i| i.points_assigned)
                    .fold(0u32, u32::saturating_add)
            })
            .unwrap_or(0))
    }

    async fn escalation_recorded_at(
        &self,
        guild_id: u64,
        user_id: u64,
        points: u32,
    ) -> Result<bool, AutomodError> {
        Ok(self
            .infractions
            .get(&(guild_id, user_id))
            .map(|rows| {
                rows.iter().any(|i| {
                    i.infraction_type == InfractionType::Escalation
                        && i.escalation_points == Some(points)
                })
            })
            .unwrap_or(false))
    }

    async fn recent_infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<Infraction>, AutomodError> {
        Ok(self
            .infractions
            .get(&(guild_id, user_id))
            .map(|rows| rows.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
