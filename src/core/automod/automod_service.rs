// Automod enforcer - runs each inbound event through a linear pipeline:
//
// gates -> scoping -> rule evaluation -> actions -> infraction -> escalation
//
// Every stage is an early return. Nothing in here may take down the host:
// each public entry point logs and discards whatever goes wrong.
//
// NO Discord dependencies here - platform calls go through the ports in
// `actions.rs`.

use super::actions::{
    clamp_timeout, run_audit_log, run_member_actions, run_notification, ActionExecutor,
    ActionReport, AuditCategory, AuditLogEntry, EnforcementTarget, MemberDirectory,
    NotificationContext, NotificationRenderer,
};
use super::automod_models::{
    AutomodAction, AutomodEvent, AutomodOptions, AutomodRule, GuildModerationConfig,
    Infraction, InfractionType, MemberJoinEvent, MemberUpdateEvent, MessageEvent,
    ReactionEvent, RuleMatch,
};
use super::dispatcher::panic_message;
use super::escalation_service::{EscalationOutcome, EscalationService};
use super::infraction_service::{
    InfractionService, InfractionStore, RecordedInfraction, ViolationContext,
};
use super::rule_engine::{EventSubject, RuleEngine};
use super::scoping::{scope_rules, ScopeContext};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum AutomodError {
    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Ledger write failed: {0}")]
    LedgerWriteFailed(String),

    #[error("Platform call failed: {0}")]
    PlatformError(String),
}

// ============================================================================
// STORAGE TRAITS (PORTS)
// ============================================================================

/// Read access to per-guild moderation settings.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when the guild was never configured.
    async fn get_config(&self, guild_id: u64) -> Result<Option<GuildModerationConfig>, AutomodError>;
}

/// Read access to a guild's rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_enabled_rules(&self, guild_id: u64) -> Result<Vec<AutomodRule>, AutomodError>;
}

// ============================================================================
// ENFORCER
// ============================================================================

/// Everything the enforcer needs, injected once at startup.
pub struct AutomodDeps {
    pub config_store: Arc<dyn ConfigStore>,
    pub rule_store: Arc<dyn RuleStore>,
    pub ledger: Arc<dyn InfractionStore>,
    pub executor: Arc<dyn ActionExecutor>,
    pub directory: Arc<dyn MemberDirectory>,
    pub renderer: Arc<dyn NotificationRenderer>,
}

/// What survived the gates for one event.
struct GateContext {
    config: GuildModerationConfig,
    role_ids: Vec<u64>,
    rules: Vec<AutomodRule>,
}

/// What happened for one enforced event.
#[derive(Debug, Clone)]
pub struct EnforcementSummary {
    pub rule_id: u64,
    pub infraction: Option<RecordedInfraction>,
    pub escalation: EscalationOutcome,
    pub report: ActionReport,
}

/// A read-only snapshot for the status command.
#[derive(Debug, Clone)]
pub struct GuildOverview {
    pub config: Option<GuildModerationConfig>,
    pub rules: Vec<AutomodRule>,
}

#[derive(Debug, Clone)]
pub struct UserStanding {
    pub active_points: u32,
    pub recent: Vec<Infraction>,
}

pub struct AutomodEnforcer {
    config_store: Arc<dyn ConfigStore>,
    rule_store: Arc<dyn RuleStore>,
    executor: Arc<dyn ActionExecutor>,
    directory: Arc<dyn MemberDirectory>,
    renderer: Arc<dyn NotificationRenderer>,
    engine: RuleEngine,
    infractions: Arc<InfractionService>,
    escalation: EscalationService,
    options: AutomodOptions,
}

impl AutomodEnforcer {
    pub fn new(deps: AutomodDeps, options: AutomodOptions) -> Self {
        let infractions = Arc::new(InfractionService::new(deps.ledger));
        let escalation = EscalationService::new(
            Arc::clone(&infractions),
            Arc::clone(&deps.executor),
            Arc::clone(&deps.renderer),
            &options,
        );

        Self {
            config_store: deps.config_store,
            rule_store: deps.rule_store,
            executor: deps.executor,
            directory: deps.directory,
            renderer: deps.renderer,
            engine: RuleEngine::new(),
            infractions,
            escalation,
            options,
        }
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Route an event to its handler.
    pub async fn handle_event(&self, event: AutomodEvent) {
        match event {
            AutomodEvent::Message(e) => self.handle_message(&e).await,
            AutomodEvent::Reaction(e) => self.handle_reaction(&e).await,
            AutomodEvent::MemberJoin(e) => self.handle_member_join(&e).await,
            AutomodEvent::MemberUpdate(e) => self.handle_member_update(&e).await,
        }
    }

    pub async fn handle_message(&self, event: &MessageEvent) {
        let outcome = Self::guarded("message", event, self.process_message(event)).await;
        if let Some(summary) = outcome {
            Self::log_summary("message", event.guild_id, event.author_id, &summary);
        }
    }

    pub async fn handle_reaction(&self, event: &ReactionEvent) {
        let outcome = Self::guarded("reaction", event, self.process_reaction(event)).await;
        if let Some(summary) = outcome {
            Self::log_summary("reaction", event.message.guild_id, event.user_id, &summary);
        }
    }

    pub async fn handle_member_join(&self, event: &MemberJoinEvent) {
        let outcome = Self::guarded("member_join", event, self.process_member_join(event)).await;
        if let Some(summary) = outcome {
            Self::log_summary("member_join", event.guild_id, event.user_id, &summary);
        }
    }

    pub async fn handle_member_update(&self, event: &MemberUpdateEvent) {
        let outcome = Self::guarded("member_update", event, self.process_member_update(event)).await;
        if let Some(summary) = outcome {
            Self::log_summary("member_update", event.guild_id, event.user_id, &summary);
        }
    }

    /// Run one pipeline, turning a panic into a logged, dropped event.
    async fn guarded<E, F>(kind: &'static str, event: &E, pipeline: F) -> Option<EnforcementSummary>
    where
        E: Debug,
        F: Future<Output = Option<EnforcementSummary>>,
    {
        match AssertUnwindSafe(pipeline).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                tracing::error!(
                    kind,
                    event = ?event,
                    panic = %panic_message(panic.as_ref()),
                    "Automod pipeline panicked; event dropped"
                );
                None
            }
        }
    }

    fn log_summary(kind: &str, guild_id: u64, user_id: u64, summary: &EnforcementSummary) {
        if summary.report.is_clean() {
            tracing::info!(
                kind,
                guild_id,
                user_id,
                rule_id = summary.rule_id,
                actions = ?summary.report.succeeded,
                escalated = summary.escalation.triggered,
                "Automod enforcement complete"
            );
        } else {
            tracing::warn!(
                kind,
                guild_id,
                user_id,
                rule_id = summary.rule_id,
                succeeded = ?summary.report.succeeded,
                failed = ?summary.report.failed,
                escalated = summary.escalation.triggered,
                "Automod enforcement partially applied"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Gates
    // ------------------------------------------------------------------------

    /// Run the gates. Any failure closes the gate (no enforcement).
    async fn pass_gates(
        &self,
        guild_id: u64,
        user_id: u64,
        is_bot: bool,
        known_roles: Option<&[u64]>,
    ) -> Option<GateContext> {
        let config = match self.config_store.get_config(guild_id).await {
            Ok(Some(config)) if config.automod_enabled => config,
            Ok(_) => return None,
            Err(e) => {
                let e = AutomodError::ConfigUnavailable(e.to_string());
                tracing::warn!(guild_id, error = %e, "Treating automod as disabled");
                return None;
            }
        };

        if is_bot || self.directory.bot_user_id() == Some(user_id) {
            return None;
        }

        let role_ids = match known_roles {
            Some(roles) => roles.to_vec(),
            None => match self.directory.member_roles(guild_id, user_id).await {
                Ok(Some(roles)) => roles,
                Ok(None) => {
                    tracing::debug!(guild_id, user_id, "Member not resolvable; skipping automod");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(guild_id, user_id, error = %e, "Member lookup failed; skipping automod");
                    return None;
                }
            },
        };

        if role_ids.iter().any(|r| config.immune_roles.contains(r)) {
            return None;
        }

        let rules = match self.rule_store.get_enabled_rules(guild_id).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(guild_id, error = %e, "Could not load automod rules; skipping");
                return None;
            }
        };
        if rules.is_empty() {
            return None;
        }

        Some(GateContext {
            config,
            role_ids,
            rules,
        })
    }

    // ------------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------------

    async fn process_message(&self, event: &MessageEvent) -> Option<EnforcementSummary> {
        let gate = self
            .pass_gates(
                event.guild_id,
                event.author_id,
                event.author_is_bot,
                event.actor_role_ids.as_deref(),
            )
            .await?;

        let scoped = scope_rules(
            gate.rules,
            &ScopeContext {
                channel_id: Some(event.channel_id),
                role_ids: &gate.role_ids,
            },
        );
        let rule_match = self
            .engine
            .evaluate(EventSubject::MessageContent(&event.content), &scoped)?;

        let rule = &rule_match.rule;
        let target = EnforcementTarget {
            guild_id: event.guild_id,
            user_id: event.author_id,
        };
        let reason = format!("Automod: {}", rule.name);
        let mut report = ActionReport::default();

        if rule.has_action(AutomodAction::Delete) {
            let result = self.executor.delete_message(&event.message_ref()).await;
            report.record(AutomodAction::Delete, target, result);
        }

        let timeout = clamp_timeout(rule.timeout_duration(), self.options.default_timeout);
        run_member_actions(
            self.executor.as_ref(),
            target,
            &rule.actions,
            timeout,
            &reason,
            &mut report,
        )
        .await;

        let (infraction, escalation) = self
            .record_and_escalate(
                &rule_match,
                ViolationContext {
                    guild_id: event.guild_id,
                    user_id: event.author_id,
                    infraction_type: InfractionType::AutomodDelete,
                    channel_id: Some(event.channel_id),
                    message_id: Some(event.message_id),
                },
                &gate.config,
            )
            .await;

        let notice = NotificationContext {
            guild_id: event.guild_id,
            rule_name: rule.name.clone(),
            reason: format!(
                "Your message matched `{}`",
                rule_match.matched_pattern.display_name()
            ),
            actions: rule.actions.clone(),
            active_points: infraction.as_ref().and_then(|r| r.active_points),
        };
        run_notification(
            self.executor.as_ref(),
            self.renderer.as_ref(),
            target,
            &rule.actions,
            &notice,
            &mut report,
        )
        .await;

        let mut fields = vec![
            ("User".to_string(), format!("<@{}>", event.author_id)),
            ("Channel".to_string(), format!("<#{}>", event.channel_id)),
            ("Rule".to_string(), rule.name.clone()),
            (
                "Pattern".to_string(),
                rule_match.matched_pattern.display_name().to_string(),
            ),
            ("Content".to_string(), rule_match.matched_content.clone()),
        ];
        if let Some(recorded) = &infraction {
            fields.push((
                "Points".to_string(),
                format!(
                    "+{} (active: {})",
                    recorded.infraction.points_assigned,
                    recorded
                        .active_points
                        .map_or_else(|| "unknown".to_string(), |p| p.to_string())
                ),
            ));
        }
        let entry = AuditLogEntry {
            guild_id: event.guild_id,
            channel_id: gate.config.log_channel_id,
            category: AuditCategory::RuleMatched,
            fields,
        };
        run_audit_log(self.executor.as_ref(), target, &rule.actions, &entry, &mut report).await;

        Some(EnforcementSummary {
            rule_id: rule.id,
            infraction,
            escalation,
            report,
        })
    }

    async fn process_reaction(&self, event: &ReactionEvent) -> Option<EnforcementSummary> {
        let message = event.message;
        let gate = self
            .pass_gates(message.guild_id, event.user_id, event.user_is_bot, None)
            .await?;

        let mut scoped = scope_rules(
            gate.rules,
            &ScopeContext {
                channel_id: Some(message.channel_id),
                role_ids: &gate.role_ids,
            },
        );
        scoped.retain(|r| r.has_action(AutomodAction::RemoveReaction));

        let rule_match = self
            .engine
            .evaluate(EventSubject::Reaction(&event.emoji.name), &scoped)?;

        let target = EnforcementTarget {
            guild_id: message.guild_id,
            user_id: event.user_id,
        };
        let mut report = ActionReport::default();
        let result = self
            .executor
            .remove_all_reactions_of_emoji(&message, &event.emoji)
            .await;
        report.record(AutomodAction::RemoveReaction, target, result);

        let (infraction, escalation) = self
            .record_and_escalate(
                &rule_match,
                ViolationContext {
                    guild_id: message.guild_id,
                    user_id: event.user_id,
                    infraction_type: InfractionType::AutomodReaction,
                    channel_id: Some(message.channel_id),
                    message_id: Some(message.message_id),
                },
                &gate.config,
            )
            .await;

        Some(EnforcementSummary {
            rule_id: rule_match.rule.id,
            infraction,
            escalation,
            report,
        })
    }

    async fn process_member_join(&self, event: &MemberJoinEvent) -> Option<EnforcementSummary> {
        self.process_member_names(
            event.guild_id,
            event.user_id,
            event.user_is_bot,
            EventSubject::Member {
                username: Some(&event.username),
                nickname: None,
            },
        )
        .await
    }

    async fn process_member_update(&self, event: &MemberUpdateEvent) -> Option<EnforcementSummary> {
        let new_nickname = event.new_nickname.as_deref()?;
        let Some(old_nickname) = &event.old_nickname else {
            // Role-only updates look identical without the old state; don't re-record.
            tracing::debug!(
                guild_id = event.guild_id,
                user_id = event.user_id,
                "Skipping nickname check, previous member state unknown"
            );
            return None;
        };
        if old_nickname.as_deref() == Some(new_nickname) {
            return None;
        }

        self.process_member_names(
            event.guild_id,
            event.user_id,
            event.user_is_bot,
            EventSubject::Member {
                username: None,
                nickname: Some(new_nickname),
            },
        )
        .await
    }

    /// Join and nickname events: no message actions, straight to recording.
    async fn process_member_names(
        &self,
        guild_id: u64,
        user_id: u64,
        is_bot: bool,
        subject: EventSubject<'_>,
    ) -> Option<EnforcementSummary> {
        let gate = self.pass_gates(guild_id, user_id, is_bot, None).await?;

        let scoped = scope_rules(
            gate.rules,
            &ScopeContext {
                channel_id: None,
                role_ids: &gate.role_ids,
            },
        );
        let rule_match = self.engine.evaluate(subject, &scoped)?;

        let (infraction, escalation) = self
            .record_and_escalate(
                &rule_match,
                ViolationContext {
                    guild_id,
                    user_id,
                    infraction_type: InfractionType::AutomodUsername,
                    channel_id: None,
                    message_id: None,
                },
                &gate.config,
            )
            .await;

        Some(EnforcementSummary {
            rule_id: rule_match.rule.id,
            infraction,
            escalation,
            report: ActionReport::default(),
        })
    }

    /// Record the infraction and, when it carried points, check escalation.
    ///
    /// Zero-point infractions never re-check tiers, even if the member is
    /// already above one.
    async fn record_and_escalate(
        &self,
        rule_match: &RuleMatch,
        ctx: ViolationContext,
        config: &GuildModerationConfig,
    ) -> (Option<RecordedInfraction>, EscalationOutcome) {
        let recorded = match self.infractions.record_violation(rule_match, ctx).await {
            Ok(recorded) => recorded,
            Err(e) => {
                tracing::error!(
                    guild_id = ctx.guild_id,
                    user_id = ctx.user_id,
                    rule_id = rule_match.rule.id,
                    error = %e,
                    "Failed to record automod infraction; skipping escalation"
                );
                return (None, EscalationOutcome::default());
            }
        };

        if recorded.infraction.points_assigned == 0 || config.escalation_tiers.is_empty() {
            return (Some(recorded), EscalationOutcome::default());
        }
        let Some(active_points) = recorded.active_points else {
            tracing::warn!(
                guild_id = ctx.guild_id,
                user_id = ctx.user_id,
                infraction_id = recorded.infraction.id,
                "Active points unknown; skipping escalation"
            );
            return (Some(recorded), EscalationOutcome::default());
        };

        let escalation = self
            .escalation
            .check_and_escalate(
                EnforcementTarget {
                    guild_id: ctx.guild_id,
                    user_id: ctx.user_id,
                },
                active_points,
                config,
            )
            .await;

        (Some(recorded), escalation)
    }

    // ------------------------------------------------------------------------
    // Read-only helpers for commands
    // ------------------------------------------------------------------------

    pub async fn guild_overview(&self, guild_id: u64) -> Result<GuildOverview, AutomodError> {
        let config = self.config_store.get_config(guild_id).await?;
        let rules = self.rule_store.get_enabled_rules(guild_id).await?;
        Ok(GuildOverview { config, rules })
    }

    pub async fn user_standing(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: usize,
    ) -> Result<UserStanding, AutomodError> {
        let active_points = self.infractions.active_points(guild_id, user_id).await?;
        let recent = self
            .infractions
            .recent_infractions(guild_id, user_id, limit)
            .await?;
        Ok(UserStanding {
            active_points,
            recent,
        })
    }

    /// Which rule would fire for `text` in `channel_id`, without acting on it.
    pub async fn dry_run(
        &self,
        guild_id: u64,
        channel_id: u64,
        role_ids: &[u64],
        text: &str,
    ) -> Result<Option<RuleMatch>, AutomodError> {
        let rules = self.rule_store.get_enabled_rules(guild_id).await?;
        let scoped = scope_rules(
            rules,
            &ScopeContext {
                channel_id: Some(channel_id),
                role_ids,
            },
        );
        Ok(self.engine.evaluate(EventSubject::MessageContent(text), &scoped))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::automod::automod_models::{EmojiRef, EscalationTier, MessageRef, RuleTarget};
    use crate::core::automod::test_support::{
        enforcer_with, rule, ExecutedCall, FailingStore, Harness, WriteOnlyLedger, GUILD, USER,
    };

    fn message(content: &str) -> MessageEvent {
        MessageEvent {
            author_id: USER,
            author_is_bot: false,
            guild_id: GUILD,
            channel_id: 10,
            message_id: 500,
            content: content.to_string(),
            actor_role_ids: Some(vec![]),
        }
    }

    fn spam_rule() -> AutomodRule {
        let mut r = rule(1, "spam", &["spam"]);
        r.actions = vec![AutomodAction::Delete, AutomodAction::Warn];
        r.warn_points = 5;
        r
    }

    #[tokio::test]
    async fn test_spam_message_is_deleted_and_recorded() {
        let h = Harness::new();
        h.enable(GuildModerationConfig {
            automod_enabled: true,
            ..Default::default()
        });
        h.add_rule(spam_rule());

        let before = h.store.active_points(GUILD, USER).await.unwrap();
        let summary = h.enforcer.process_message(&message("this is spam")).await.unwrap();
        let after = h.store.active_points(GUILD, USER).await.unwrap();

        assert!(h
            .executor
            .calls()
            .contains(&ExecutedCall::Delete { message_id: 500 }));
        let recorded = summary.infraction.unwrap();
        assert_eq!(recorded.infraction.points_assigned, 5);
        assert_eq!(
            recorded.infraction.infraction_type,
            InfractionType::AutomodDelete
        );
        assert_eq!(after - before, 5);
        assert_eq!(h.infraction_count().await, 1);
    }

    #[tokio::test]
    async fn test_message_actions_follow_fixed_order() {
        let h = Harness::enabled();
        let mut r = rule(1, "everything", &["bad"]);
        r.actions = vec![
            AutomodAction::Log,
            AutomodAction::Dm,
            AutomodAction::Ban,
            AutomodAction::Kick,
            AutomodAction::Timeout,
            AutomodAction::Delete,
        ];
        h.add_rule(r);

        h.enforcer.handle_message(&message("bad")).await;

        let kinds: Vec<&str> = h.executor.calls().iter().map(ExecutedCall::kind).collect();
        assert_eq!(kinds, vec!["delete", "timeout", "kick", "ban", "dm", "audit"]);
    }

    #[tokio::test]
    async fn test_action_failure_does_not_block_recording() {
        let h = Harness::enabled();
        h.executor.fail_on(AutomodAction::Delete);
        h.add_rule(spam_rule());

        let summary = h.enforcer.process_message(&message("spam")).await.unwrap();
        assert_eq!(summary.report.failed.len(), 1);
        assert!(summary.infraction.is_some());
        assert_eq!(h.infraction_count().await, 1);
        // The DM still went out after the failed delete.
        assert!(h
            .executor
            .calls()
            .iter()
            .any(|c| matches!(c, ExecutedCall::DirectMessage { .. })));
    }

    #[tokio::test]
    async fn test_timeout_uses_rule_duration_capped_at_platform_max() {
        let h = Harness::enabled();
        let mut r = rule(1, "mute", &["x"]);
        r.actions = vec![AutomodAction::Timeout];
        r.timeout_duration_ms = Some(90 * 24 * 60 * 60 * 1000);
        h.add_rule(r);

        h.enforcer.handle_message(&message("x")).await;
        assert!(h.executor.calls().contains(&ExecutedCall::Timeout {
            user_id: USER,
            duration: crate::core::automod::actions::MAX_TIMEOUT,
        }));
    }

    #[tokio::test]
    async fn test_gates_block_bots_immune_roles_and_disabled_guilds() {
        let h = Harness::new();
        h.add_rule(spam_rule());

        // No config at all -> fail closed.
        assert!(h.enforcer.process_message(&message("spam")).await.is_none());

        h.enable(GuildModerationConfig {
            automod_enabled: false,
            ..Default::default()
        });
        assert!(h.enforcer.process_message(&message("spam")).await.is_none());

        h.enable(GuildModerationConfig {
            automod_enabled: true,
            immune_roles: vec![77],
            ..Default::default()
        });
        let mut bot = message("spam");
        bot.author_is_bot = true;
        assert!(h.enforcer.process_message(&bot).await.is_none());

        let mut immune = message("spam");
        immune.actor_role_ids = Some(vec![77]);
        assert!(h.enforcer.process_message(&immune).await.is_none());

        let mut own = message("spam");
        own.author_id = h.directory.bot_id;
        assert!(h.enforcer.process_message(&own).await.is_none());

        assert!(h.executor.calls().is_empty());
        assert_eq!(h.infraction_count().await, 0);
    }

    #[tokio::test]
    async fn test_config_store_error_fails_closed() {
        let h = Harness::enabled();
        h.add_rule(spam_rule());
        let enforcer = enforcer_with(&h, Arc::new(FailingStore), h.store.clone());

        assert!(enforcer.process_message(&message("spam")).await.is_none());
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_member_is_skipped() {
        let h = Harness::enabled();
        h.add_rule(spam_rule());

        let mut unknown = message("spam");
        unknown.actor_role_ids = None;
        assert!(h.enforcer.process_message(&unknown).await.is_none());

        h.directory.set_roles(USER, vec![3]);
        assert!(h.enforcer.process_message(&unknown).await.is_some());
    }

    #[tokio::test]
    async fn test_channel_scoping_applies_to_messages() {
        let h = Harness::enabled();
        let mut r = spam_rule();
        r.channel_include = vec![999];
        h.add_rule(r);

        assert!(h.enforcer.process_message(&message("spam")).await.is_none());
    }

    #[tokio::test]
    async fn test_role_exclude_vetoes_role_include() {
        let h = Harness::enabled();
        let mut r = spam_rule();
        r.role_include = vec![1];
        r.role_exclude = vec![2];
        h.add_rule(r);

        let mut both = message("spam");
        both.actor_role_ids = Some(vec![1, 2]);
        assert!(h.enforcer.process_message(&both).await.is_none());

        let mut included = message("spam");
        included.actor_role_ids = Some(vec![1]);
        assert!(h.enforcer.process_message(&included).await.is_some());
    }

    #[tokio::test]
    async fn test_reaction_strips_every_instance_of_emoji() {
        let h = Harness::enabled();
        let mut r = rule(1, "no-eggplant", &["^🍆$"]);
        r.actions = vec![AutomodAction::RemoveReaction];
        h.add_rule(r);
        h.directory.set_roles(USER, vec![]);

        let event = ReactionEvent {
            emoji: EmojiRef::unicode("🍆"),
            message: MessageRef {
                guild_id: GUILD,
                channel_id: 10,
                message_id: 42,
            },
            user_id: USER,
            user_is_bot: false,
        };
        let summary = h.enforcer.process_reaction(&event).await.unwrap();

        assert_eq!(
            h.executor.calls(),
            vec![ExecutedCall::RemoveEmoji {
                message_id: 42,
                emoji: "🍆".to_string()
            }]
        );
        assert_eq!(
            summary.infraction.unwrap().infraction.infraction_type,
            InfractionType::AutomodReaction
        );
    }

    #[tokio::test]
    async fn test_reaction_ignores_rules_without_remove_reaction() {
        let h = Harness::enabled();
        let mut r = rule(1, "emoji", &["🍆"]);
        r.actions = vec![AutomodAction::Delete];
        h.add_rule(r);
        h.directory.set_roles(USER, vec![]);

        let event = ReactionEvent {
            emoji: EmojiRef::unicode("🍆"),
            message: MessageRef {
                guild_id: GUILD,
                channel_id: 10,
                message_id: 42,
            },
            user_id: USER,
            user_is_bot: false,
        };
        assert!(h.enforcer.process_reaction(&event).await.is_none());
    }

    #[tokio::test]
    async fn test_member_join_records_username_infraction_without_actions() {
        let h = Harness::enabled();
        let mut r = rule(1, "impersonation", &["(?i)^discord staff"]);
        r.targets = vec![RuleTarget::Username];
        r.actions = vec![AutomodAction::Kick, AutomodAction::Warn];
        r.warn_points = 3;
        h.add_rule(r);
        h.directory.set_roles(USER, vec![]);

        let summary = h
            .enforcer
            .process_member_join(&MemberJoinEvent {
                guild_id: GUILD,
                user_id: USER,
                username: "Discord Staff".to_string(),
                user_is_bot: false,
            })
            .await
            .unwrap();

        assert!(h.executor.calls().is_empty());
        let recorded = summary.infraction.unwrap();
        assert_eq!(
            recorded.infraction.infraction_type,
            InfractionType::AutomodUsername
        );
        assert_eq!(recorded.infraction.points_assigned, 3);
    }

    #[tokio::test]
    async fn test_nickname_update_only_checks_changed_nickname() {
        let h = Harness::enabled();
        let mut r = rule(1, "nick", &["admin"]);
        r.targets = vec![RuleTarget::Nickname];
        h.add_rule(r);
        h.directory.set_roles(USER, vec![]);

        let mut update = MemberUpdateEvent {
            guild_id: GUILD,
            user_id: USER,
            old_nickname: Some(Some("admin".to_string())),
            new_nickname: Some("admin".to_string()),
            user_is_bot: false,
        };
        assert!(h.enforcer.process_member_update(&update).await.is_none());

        update.new_nickname = None;
        assert!(h.enforcer.process_member_update(&update).await.is_none());

        update.new_nickname = Some("the admin".to_string());
        assert!(h.enforcer.process_member_update(&update).await.is_some());

        update.old_nickname = Some(None);
        assert!(h.enforcer.process_member_update(&update).await.is_some());
    }

    #[tokio::test]
    async fn test_nickname_update_without_previous_state_is_skipped() {
        let h = Harness::enabled();
        let mut r = rule(1, "nick", &["admin"]);
        r.targets = vec![RuleTarget::Nickname];
        r.actions = vec![AutomodAction::Warn];
        r.warn_points = 5;
        h.add_rule(r);
        h.directory.set_roles(USER, vec![]);

        let update = MemberUpdateEvent {
            guild_id: GUILD,
            user_id: USER,
            old_nickname: None,
            new_nickname: Some("admin".to_string()),
            user_is_bot: false,
        };
        assert!(h.enforcer.process_member_update(&update).await.is_none());
        assert!(h.enforcer.process_member_update(&update).await.is_none());
        assert_eq!(h.infraction_count().await, 0);
    }

    #[tokio::test]
    async fn test_escalation_fires_once_points_cross_tier() {
        let h = Harness::new();
        h.enable(GuildModerationConfig {
            automod_enabled: true,
            escalation_tiers: vec![EscalationTier {
                name: Some("mute".into()),
                threshold: 10,
                actions: vec![AutomodAction::Timeout],
                timeout_duration_ms: Some(60_000),
            }],
            ..Default::default()
        });
        h.add_rule(spam_rule());

        let first = h.enforcer.process_message(&message("spam")).await.unwrap();
        assert!(!first.escalation.triggered);

        let second = h.enforcer.process_message(&message("spam")).await.unwrap();
        assert!(second.escalation.triggered);
        assert!(h.executor.calls().contains(&ExecutedCall::Timeout {
            user_id: USER,
            duration: std::time::Duration::from_secs(60),
        }));
    }

    #[tokio::test]
    async fn test_zero_point_infractions_skip_escalation() {
        let h = Harness::new();
        h.enable(GuildModerationConfig {
            automod_enabled: true,
            escalation_tiers: vec![EscalationTier {
                name: None,
                threshold: 0,
                actions: vec![AutomodAction::Ban],
                timeout_duration_ms: None,
            }],
            ..Default::default()
        });
        let mut r = rule(1, "log-only", &["x"]);
        r.actions = vec![AutomodAction::Log];
        h.add_rule(r);

        let summary = h.enforcer.process_message(&message("x")).await.unwrap();
        assert!(summary.infraction.is_some());
        assert!(!summary.escalation.triggered);
        assert!(!h
            .executor
            .calls()
            .iter()
            .any(|c| matches!(c, ExecutedCall::Ban { .. })));
    }

    #[tokio::test]
    async fn test_ledger_failure_skips_escalation_but_still_notifies() {
        let h = Harness::enabled();
        let enforcer = enforcer_with(&h, h.store.clone(), Arc::new(FailingStore));
        h.add_rule(spam_rule());

        let summary = enforcer.process_message(&message("spam")).await.unwrap();
        assert!(summary.infraction.is_none());
        assert!(!summary.escalation.triggered);
        assert!(h
            .executor
            .calls()
            .iter()
            .any(|c| matches!(c, ExecutedCall::DirectMessage { body } if body.contains("unknown"))));
    }

    #[tokio::test]
    async fn test_unreadable_points_keep_infraction_but_skip_escalation() {
        let h = Harness::new();
        h.enable(GuildModerationConfig {
            automod_enabled: true,
            escalation_tiers: vec![EscalationTier {
                name: None,
                threshold: 5,
                actions: vec![AutomodAction::Ban],
                timeout_duration_ms: None,
            }],
            ..Default::default()
        });
        h.add_rule(spam_rule());
        let enforcer = enforcer_with(&h, h.store.clone(), Arc::new(WriteOnlyLedger(h.store.clone())));

        let summary = enforcer.process_message(&message("spam")).await.unwrap();
        let recorded = summary.infraction.unwrap();
        assert_eq!(recorded.infraction.points_assigned, 5);
        assert_eq!(recorded.active_points, None);
        assert!(!summary.escalation.triggered);
        assert_eq!(h.infraction_count().await, 1);

        let calls = h.executor.calls();
        assert!(!calls.iter().any(|c| matches!(c, ExecutedCall::Ban { .. })));
        assert!(calls
            .iter()
            .any(|c| matches!(c, ExecutedCall::DirectMessage { body } if body.contains("unknown"))));
    }

    struct PanickingConfigStore;

    #[async_trait]
    impl ConfigStore for PanickingConfigStore {
        async fn get_config(&self, _guild_id: u64) -> Result<Option<GuildModerationConfig>, AutomodError> {
            panic!("config backend exploded");
        }
    }

    #[tokio::test]
    async fn test_entry_points_contain_pipeline_panics() {
        let h = Harness::enabled();
        h.add_rule(spam_rule());
        let enforcer = enforcer_with(&h, Arc::new(PanickingConfigStore), h.store.clone());

        enforcer.handle_message(&message("spam")).await;
        enforcer
            .handle_event(AutomodEvent::Message(message("spam")))
            .await;

        assert!(h.executor.calls().is_empty());
        assert_eq!(h.infraction_count().await, 0);
    }

    #[tokio::test]
    async fn test_dry_run_reports_match_without_acting() {
        let h = Harness::enabled();
        h.add_rule(spam_rule());

        let m = h.enforcer.dry_run(GUILD, 10, &[], "spam").await.unwrap();
        assert_eq!(m.unwrap().rule.id, 1);
        assert!(h.executor.calls().is_empty());
        assert_eq!(h.infraction_count().await, 0);
    }
}
