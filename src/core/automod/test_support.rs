// Shared fixtures for automod unit tests: a rule builder, a recording
// executor, a static member directory and stores that fail on purpose.

use super::actions::{
    ActionExecutor, AuditLogEntry, EnforcementTarget, MemberDirectory, RenderedNotification,
    TemplateRenderer,
};
use super::automod_models::{
    AutomodAction, AutomodOptions, AutomodRule, EmojiRef, GuildModerationConfig, Infraction,
    MessageRef, NewInfraction, Pattern, RuleTarget,
};
use super::automod_service::{AutomodDeps, AutomodEnforcer, AutomodError, ConfigStore};
use super::infraction_service::InfractionStore;
use crate::infra::automod::InMemoryAutomodStore;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GUILD: u64 = 1;
pub const USER: u64 = 2;
pub const BOT: u64 = 999;

/// A minimal enabled rule: message content, `DELETE`, no points.
pub fn rule(id: u64, name: &str, patterns: &[&str]) -> AutomodRule {
    AutomodRule {
        id,
        guild_id: GUILD,
        name: name.to_string(),
        patterns: patterns.iter().map(|p| Pattern::new(*p)).collect(),
        match_mode: Default::default(),
        targets: vec![RuleTarget::MessageContent],
        actions: vec![AutomodAction::Delete],
        warn_points: 0,
        priority: 0,
        enabled: true,
        channel_include: vec![],
        channel_exclude: vec![],
        role_include: vec![],
        role_exclude: vec![],
        timeout_duration_ms: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

// ============================================================================
// RECORDING EXECUTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutedCall {
    Delete { message_id: u64 },
    Timeout { user_id: u64, duration: Duration },
    Kick { user_id: u64 },
    Ban { user_id: u64 },
    RemoveEmoji { message_id: u64, emoji: String },
    DirectMessage { body: String },
    AuditLog { fields: Vec<(String, String)> },
}

impl ExecutedCall {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutedCall::Delete { .. } => "delete",
            ExecutedCall::Timeout { .. } => "timeout",
            ExecutedCall::Kick { .. } => "kick",
            ExecutedCall::Ban { .. } => "ban",
            ExecutedCall::RemoveEmoji { .. } => "remove_reaction",
            ExecutedCall::DirectMessage { .. } => "dm",
            ExecutedCall::AuditLog { .. } => "audit",
        }
    }
}

/// Records every call in order. Calls for actions in `fail_on` are recorded
/// and then fail.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ExecutedCall>>,
    failing: DashSet<AutomodAction>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, action: AutomodAction) {
        self.failing.insert(action);
    }

    pub fn calls(&self) -> Vec<ExecutedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, action: AutomodAction, call: ExecutedCall) -> Result<(), AutomodError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(&action) {
            Err(AutomodError::PlatformError(format!("{} refused", action)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn delete_message(&self, message: &MessageRef) -> Result<(), AutomodError> {
        self.push(
            AutomodAction::Delete,
            ExecutedCall::Delete {
                message_id: message.message_id,
            },
        )
    }

    async fn timeout_member(
        &self,
        target: EnforcementTarget,
        duration: Duration,
        _reason: &str,
    ) -> Result<(), AutomodError> {
        self.push(
            AutomodAction::Timeout,
            ExecutedCall::Timeout {
                user_id: target.user_id,
                duration,
            },
        )
    }

    async fn kick_member(&self, target: EnforcementTarget, _reason: &str) -> Result<(), AutomodError> {
        self.push(
            AutomodAction::Kick,
            ExecutedCall::Kick {
                user_id: target.user_id,
            },
        )
    }

    async fn ban_member(&self, target: EnforcementTarget, _reason: &str) -> Result<(), AutomodError> {
        self.push(
            AutomodAction::Ban,
            ExecutedCall::Ban {
                user_id: target.user_id,
            },
        )
    }

    async fn remove_all_reactions_of_emoji(
        &self,
        message: &MessageRef,
        emoji: &EmojiRef,
    ) -> Result<(), AutomodError> {
        self.push(
            AutomodAction::RemoveReaction,
            ExecutedCall::RemoveEmoji {
                message_id: message.message_id,
                emoji: emoji.name.clone(),
            },
        )
    }

    async fn send_direct_message(
        &self,
        _user_id: u64,
        notification: &RenderedNotification,
    ) -> Result<(), AutomodError> {
        // DM and WARN share the delivery path; either one failing fails it.
        let action = if self.failing.contains(&AutomodAction::Warn) {
            AutomodAction::Warn
        } else {
            AutomodAction::Dm
        };
        self.push(
            action,
            ExecutedCall::DirectMessage {
                body: notification.body.clone(),
            },
        )
    }

    async fn send_audit_log(&self, entry: &AuditLogEntry) -> Result<(), AutomodError> {
        self.push(
            AutomodAction::Log,
            ExecutedCall::AuditLog {
                fields: entry.fields.clone(),
            },
        )
    }
}

// ============================================================================
// DIRECTORY & FAILING STORE
// ============================================================================

/// Member roles keyed by user id; unknown users are unresolvable.
pub struct StaticDirectory {
    pub bot_id: u64,
    roles: DashMap<u64, Vec<u64>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self {
            bot_id: BOT,
            roles: DashMap::new(),
        }
    }

    pub fn set_roles(&self, user_id: u64, roles: Vec<u64>) {
        self.roles.insert(user_id, roles);
    }
}

#[async_trait]
impl MemberDirectory for StaticDirectory {
    fn bot_user_id(&self) -> Option<u64> {
        Some(self.bot_id)
    }

    async fn member_roles(&self, _guild_id: u64, user_id: u64) -> Result<Option<Vec<u64>>, AutomodError> {
        Ok(self.roles.get(&user_id).map(|r| r.clone()))
    }
}

/// Every read and write errors.
pub struct FailingStore;

#[async_trait]
impl ConfigStore for FailingStore {
    async fn get_config(&self, _guild_id: u64) -> Result<Option<GuildModerationConfig>, AutomodError> {
        Err(AutomodError::StorageError("database is locked".into()))
    }
}

#[async_trait]
impl InfractionStore for FailingStore {
    async fn record_infraction(&self, _infraction: NewInfraction) -> Result<Infraction, AutomodError> {
        Err(AutomodError::StorageError("disk full".into()))
    }

    async fn active_points(&self, _guild_id: u64, _user_id: u64) -> Result<u32, AutomodError> {
        Err(AutomodError::StorageError("disk full".into()))
    }

    async fn escalation_recorded_at(
        &self,
        _guild_id: u64,
        _user_id: u64,
        _points: u32,
    ) -> Result<bool, AutomodError> {
        Err(AutomodError::StorageError("disk full".into()))
    }

    async fn recent_infractions(
        &self,
        _guild_id: u64,
        _user_id: u64,
        _limit: usize,
    ) -> Result<Vec<Infraction>, AutomodError> {
        Err(AutomodError::StorageError("disk full".into()))
    }
}

/// Writes go to the wrapped store; point totals can't be read back.
pub struct WriteOnlyLedger(pub Arc<InMemoryAutomodStore>);

#[async_trait]
impl InfractionStore for WriteOnlyLedger {
    async fn record_infraction(&self, infraction: NewInfraction) -> Result<Infraction, AutomodError> {
        self.0.record_infraction(infraction).await
    }

    async fn active_points(&self, _guild_id: u64, _user_id: u64) -> Result<u32, AutomodError> {
        Err(AutomodError::StorageError("read timed out".into()))
    }

    async fn escalation_recorded_at(
        &self,
        guild_id: u64,
        user_id: u64,
        points: u32,
    ) -> Result<bool, AutomodError> {
        self.0.escalation_recorded_at(guild_id, user_id, points).await
    }

    async fn recent_infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<Infraction>, AutomodError> {
        self.0.recent_infractions(guild_id, user_id, limit).await
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// An enforcer wired to in-memory collaborators the test can inspect.
pub struct Harness {
    pub store: Arc<InMemoryAutomodStore>,
    pub executor: Arc<RecordingExecutor>,
    pub directory: Arc<StaticDirectory>,
    pub enforcer: AutomodEnforcer,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryAutomodStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        let directory = Arc::new(StaticDirectory::new());
        let enforcer = build(store.clone(), store.clone(), executor.clone(), directory.clone());
        Self {
            store,
            executor,
            directory,
            enforcer,
        }
    }

    /// A harness whose guild has automod switched on with no tiers.
    pub fn enabled() -> Self {
        let h = Self::new();
        h.enable(GuildModerationConfig {
            automod_enabled: true,
            ..Default::default()
        });
        h
    }

    pub fn enable(&self, config: GuildModerationConfig) {
        self.store.save_config(GUILD, config);
    }

    pub fn add_rule(&self, rule: AutomodRule) {
        self.store.upsert_rule(rule);
    }

    pub async fn infraction_count(&self) -> usize {
        self.store
            .recent_infractions(GUILD, USER, usize::MAX)
            .await
            .unwrap()
            .len()
    }
}

/// A second enforcer sharing the harness executor and directory but with
/// different stores.
pub fn enforcer_with(
    h: &Harness,
    config_store: Arc<dyn ConfigStore>,
    ledger: Arc<dyn InfractionStore>,
) -> AutomodEnforcer {
    let deps = AutomodDeps {
        config_store,
        rule_store: h.store.clone(),
        ledger,
        executor: h.executor.clone(),
        directory: h.directory.clone(),
        renderer: Arc::new(TemplateRenderer::new(AutomodOptions::default().dm_template)),
    };
    AutomodEnforcer::new(deps, AutomodOptions::default())
}

fn build(
    store: Arc<InMemoryAutomodStore>,
    ledger: Arc<dyn InfractionStore>,
    executor: Arc<RecordingExecutor>,
    directory: Arc<StaticDirectory>,
) -> AutomodEnforcer {
    let options = AutomodOptions::default();
    let deps = AutomodDeps {
        config_store: store.clone(),
        rule_store: store,
        ledger,
        executor,
        directory,
        renderer: Arc::new(TemplateRenderer::new(options.dm_template.clone())),
    };
    AutomodEnforcer::new(deps, options)
}
