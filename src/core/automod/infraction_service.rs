// Infraction ledger - the only writer of automod infractions.
//
// Rows are append-only. Persistence and the "active points" aggregation
// policy (windowing, decay) belong to the `InfractionStore` implementation.

use super::automod_models::{
    AutomodAction, AutomodRule, EscalationTier, Infraction, InfractionSource, InfractionType,
    NewInfraction, RuleMatch,
};
use super::automod_service::AutomodError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Matched content longer than this is cut before it is stored.
pub const MAX_MATCHED_CONTENT_CHARS: usize = 1_024;

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait InfractionStore: Send + Sync {
    /// Append an infraction and return it with its assigned id.
    async fn record_infraction(&self, infraction: NewInfraction) -> Result<Infraction, AutomodError>;

    /// Current active-point aggregate for a member.
    async fn active_points(&self, guild_id: u64, user_id: u64) -> Result<u32, AutomodError>;

    /// Whether an `ESCALATION` row exists for exactly `points`.
    async fn escalation_recorded_at(
        &self,
        guild_id: u64,
        user_id: u64,
        points: u32,
    ) -> Result<bool, AutomodError>;

    /// Most recent infractions first.
    async fn recent_infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<Infraction>, AutomodError>;
}

// ============================================================================
// SERVICE
// ============================================================================

/// Where a violation happened.
#[derive(Debug, Clone, Copy)]
pub struct ViolationContext {
    pub guild_id: u64,
    pub user_id: u64,
    pub infraction_type: InfractionType,
    pub channel_id: Option<u64>,
    pub message_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RecordedInfraction {
    pub infraction: Infraction,
    /// Total right after the write; `None` if it couldn't be read back.
    pub active_points: Option<u32>,
}

/// Points a match is worth: the rule's `warn_points` when it warns, else 0.
pub fn points_for(rule: &AutomodRule) -> u32 {
    if rule.has_action(AutomodAction::Warn) {
        rule.warn_points
    } else {
        0
    }
}

fn truncate_chars(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}

pub struct InfractionService {
    store: Arc<dyn InfractionStore>,
}

impl InfractionService {
    pub fn new(store: Arc<dyn InfractionStore>) -> Self {
        Self { store }
    }

    async fn append(&self, infraction: NewInfraction) -> Result<RecordedInfraction, AutomodError> {
        let (guild_id, user_id) = (infraction.guild_id, infraction.user_id);

        let infraction = self
            .store
            .record_infraction(infraction)
            .await
            .map_err(|e| AutomodError::LedgerWriteFailed(e.to_string()))?;
        // The row is already written, so a failed read-back only loses the total.
        let active_points = match self.store.active_points(guild_id, user_id).await {
            Ok(points) => Some(points),
            Err(e) => {
                tracing::warn!(
                    guild_id,
                    user_id,
                    infraction_id = infraction.id,
                    error = %e,
                    "Infraction recorded but active points unavailable"
                );
                None
            }
        };

        Ok(RecordedInfraction {
            infraction,
            active_points,
        })
    }

    /// Record the infraction for a rule match.
    pub async fn record_violation(
        &self,
        rule_match: &RuleMatch,
        ctx: ViolationContext,
    ) -> Result<RecordedInfraction, AutomodError> {
        let rule = &rule_match.rule;
        let recorded = self
            .append(NewInfraction {
                guild_id: ctx.guild_id,
                user_id: ctx.user_id,
                source: InfractionSource::Automod,
                infraction_type: ctx.infraction_type,
                reason: format!(
                    "Automod rule '{}' matched pattern '{}'",
                    rule.name,
                    rule_match.matched_pattern.display_name()
                ),
                rule_id: Some(rule.id),
                rule_name: Some(rule.name.clone()),
                matched_content: Some(truncate_chars(
                    &rule_match.matched_content,
                    MAX_MATCHED_CONTENT_CHARS,
                )),
                points_assigned: points_for(rule),
                channel_id: ctx.channel_id,
                message_id: ctx.message_id,
                escalation_points: None,
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            guild_id = ctx.guild_id,
            user_id = ctx.user_id,
            rule_id = rule.id,
            infraction_id = recorded.infraction.id,
            points = recorded.infraction.points_assigned,
            active_points = ?recorded.active_points,
            "Automod infraction recorded"
        );
        Ok(recorded)
    }

    /// Record the zero-point marker that stops a tier re-firing at `active_points`.
    pub async fn record_escalation(
        &self,
        guild_id: u64,
        user_id: u64,
        active_points: u32,
        tier: &EscalationTier,
    ) -> Result<RecordedInfraction, AutomodError> {
        self.append(NewInfraction {
            guild_id,
            user_id,
            source: InfractionSource::Automod,
            infraction_type: InfractionType::Escalation,
            reason: format!(
                "Escalation tier '{}' reached at {} points",
                tier.display_name(),
                active_points
            ),
            rule_id: None,
            rule_name: None,
            matched_content: None,
            points_assigned: 0,
            channel_id: None,
            message_id: None,
            escalation_points: Some(active_points),
            created_at: Utc::now(),
        })
        .await
    }

    pub async fn escalation_recorded_at(
        &self,
        guild_id: u64,
        user_id: u64,
        points: u32,
    ) -> Result<bool, AutomodError> {
        self.store
            .escalation_recorded_at(guild_id, user_id, points)
            .await
    }

    pub async fn active_points(&self, guild_id: u64, user_id: u64) -> Result<u32, AutomodError> {
        self.store.active_points(guild_id, user_id).await
    }

    pub async fn recent_infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<Infraction>, AutomodError> {
        self.store.recent_infractions(guild_id, user_id, limit).await
    }
}
