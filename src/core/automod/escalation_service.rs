// Escalation - fires harsher actions once a member's active points cross a
// configured tier.
//
// A tier fires at most once per point total: each escalation leaves a
// zero-point ESCALATION infraction carrying the total it fired at, and a
// later check at that same total is a no-op.

use super::actions::{
    clamp_timeout, run_audit_log, run_member_actions, run_notification, ActionExecutor,
    ActionReport, AuditCategory, AuditLogEntry, EnforcementTarget, NotificationContext,
    NotificationRenderer,
};
use super::automod_models::{AutomodAction, AutomodOptions, EscalationTier, GuildModerationConfig};
use super::infraction_service::InfractionService;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct EscalationOutcome {
    pub triggered: bool,
    pub tier_name: Option<String>,
    pub report: ActionReport,
}

/// The highest tier whose threshold is at or below `active_points`.
pub fn select_tier(tiers: &[EscalationTier], active_points: u32) -> Option<&EscalationTier> {
    let mut ascending: Vec<&EscalationTier> = tiers.iter().collect();
    ascending.sort_by_key(|t| t.threshold);
    ascending
        .into_iter()
        .take_while(|t| t.threshold <= active_points)
        .last()
}

pub struct EscalationService {
    infractions: Arc<InfractionService>,
    executor: Arc<dyn ActionExecutor>,
    renderer: Arc<dyn NotificationRenderer>,
    default_timeout: Duration,
}

impl EscalationService {
    pub fn new(
        infractions: Arc<InfractionService>,
        executor: Arc<dyn ActionExecutor>,
        renderer: Arc<dyn NotificationRenderer>,
        options: &AutomodOptions,
    ) -> Self {
        Self {
            infractions,
            executor,
            renderer,
            default_timeout: options.default_timeout,
        }
    }

    /// Compare `active_points` against the guild's tiers and run the selected
    /// tier's actions if it has not already fired at this exact total.
    pub async fn check_and_escalate(
        &self,
        target: EnforcementTarget,
        active_points: u32,
        config: &GuildModerationConfig,
    ) -> EscalationOutcome {
        let Some(tier) = select_tier(&config.escalation_tiers, active_points) else {
            return EscalationOutcome::default();
        };

        match self
            .infractions
            .escalation_recorded_at(target.guild_id, target.user_id, active_points)
            .await
        {
            Ok(true) => {
                tracing::debug!(
                    guild_id = target.guild_id,
                    user_id = target.user_id,
                    active_points,
                    "Escalation already recorded at this point total"
                );
                return EscalationOutcome::default();
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    guild_id = target.guild_id,
                    user_id = target.user_id,
                    error = %e,
                    "Could not read escalation history; skipping escalation"
                );
                return EscalationOutcome::default();
            }
        }

        let tier_name = tier.display_name();
        let reason = format!("Automod escalation: {} ({} points)", tier_name, active_points);
        tracing::info!(
            guild_id = target.guild_id,
            user_id = target.user_id,
            tier = %tier_name,
            threshold = tier.threshold,
            active_points,
            "Escalation tier triggered"
        );

        for skipped in tier
            .actions
            .iter()
            .filter(|a| matches!(a, AutomodAction::Delete | AutomodAction::RemoveReaction))
        {
            tracing::debug!(action = %skipped, "Escalation action has no target; skipped");
        }

        let mut report = ActionReport::default();
        let executor = self.executor.as_ref();
        let timeout = clamp_timeout(
            tier.timeout_duration_ms.map(Duration::from_millis),
            self.default_timeout,
        );

        run_member_actions(executor, target, &tier.actions, timeout, &reason, &mut report).await;

        let notice = NotificationContext {
            guild_id: target.guild_id,
            rule_name: tier_name.clone(),
            reason: reason.clone(),
            actions: tier.actions.clone(),
            active_points: Some(active_points),
        };
        run_notification(
            executor,
            self.renderer.as_ref(),
            target,
            &tier.actions,
            &notice,
            &mut report,
        )
        .await;

        let entry = AuditLogEntry {
            guild_id: target.guild_id,
            channel_id: config.log_channel_id,
            category: AuditCategory::Escalation,
            fields: vec![
                ("User".to_string(), format!("<@{}>", target.user_id)),
                ("Tier".to_string(), tier_name.clone()),
                ("Threshold".to_string(), tier.threshold.to_string()),
                ("Active Points".to_string(), active_points.to_string()),
            ],
        };
        run_audit_log(executor, target, &tier.actions, &entry, &mut report).await;

        if let Err(e) = self
            .infractions
            .record_escalation(target.guild_id, target.user_id, active_points, tier)
            .await
        {
            tracing::warn!(
                guild_id = target.guild_id,
                user_id = target.user_id,
                error = %e,
                "Failed to record escalation marker; tier may fire again at this total"
            );
        }

        EscalationOutcome {
            triggered: true,
            tier_name: Some(tier_name),
            report,
        }
    }
}
