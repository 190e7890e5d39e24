// Enforcement primitives - the outward calls automod makes, plus the helpers
// that run them fault-tolerantly.
//
// Every platform call is a single attempt. A failure is logged, recorded in
// the `ActionReport`, and the caller moves on to the next step.

use super::automod_models::{AutomodAction, EmojiRef, MessageRef};
use super::automod_service::AutomodError;
use async_trait::async_trait;
use std::time::Duration;

/// Discord refuses timeouts longer than 28 days.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(28 * 24 * 60 * 60);

/// min(requested ?? default, platform max)
pub fn clamp_timeout(requested: Option<Duration>, default: Duration) -> Duration {
    requested.unwrap_or(default).min(MAX_TIMEOUT)
}

/// The member an enforcement step is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementTarget {
    pub guild_id: u64,
    pub user_id: u64,
}

// ============================================================================
// NOTIFICATIONS & AUDIT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    RuleMatched,
    Escalation,
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditCategory::RuleMatched => write!(f, "Automod Rule Matched"),
            AuditCategory::Escalation => write!(f, "Automod Escalation"),
        }
    }
}

/// A structured audit event handed to the audit sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    pub guild_id: u64,
    /// Destination channel from the guild config; the sink skips entries without one.
    pub channel_id: Option<u64>,
    pub category: AuditCategory,
    pub fields: Vec<(String, String)>,
}

/// What a notification is about.
#[derive(Debug, Clone)]
pub struct NotificationContext {
    pub guild_id: u64,
    pub rule_name: String,
    pub reason: String,
    pub actions: Vec<AutomodAction>,
    /// `None` when the ledger write failed.
    pub active_points: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
}

pub trait NotificationRenderer: Send + Sync {
    fn render(&self, ctx: &NotificationContext) -> RenderedNotification;
}

/// Substitutes `{guild}`, `{rule}`, `{reason}`, `{actions}` and `{points}`.
pub struct TemplateRenderer {
    template: String,
}

impl TemplateRenderer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl NotificationRenderer for TemplateRenderer {
    fn render(&self, ctx: &NotificationContext) -> RenderedNotification {
        let actions = if ctx.actions.is_empty() {
            "none".to_string()
        } else {
            ctx.actions
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let points = ctx
            .active_points
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let body = self
            .template
            .replace("{guild}", &format!("server {}", ctx.guild_id))
            .replace("{rule}", &ctx.rule_name)
            .replace("{reason}", &ctx.reason)
            .replace("{actions}", &actions)
            .replace("{points}", &points);

        RenderedNotification {
            title: "Automod Notice".to_string(),
            body,
        }
    }
}

// ============================================================================
// PORTS
// ============================================================================

/// Platform primitives automod drives. Implemented by the Discord layer.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn delete_message(&self, message: &MessageRef) -> Result<(), AutomodError>;

    async fn timeout_member(
        &self,
        target: EnforcementTarget,
        duration: Duration,
        reason: &str,
    ) -> Result<(), AutomodError>;

    async fn kick_member(&self, target: EnforcementTarget, reason: &str) -> Result<(), AutomodError>;

    /// Ban without purging any message history.
    async fn ban_member(&self, target: EnforcementTarget, reason: &str) -> Result<(), AutomodError>;

    /// Strip every user's reaction with `emoji` from the message.
    async fn remove_all_reactions_of_emoji(
        &self,
        message: &MessageRef,
        emoji: &EmojiRef,
    ) -> Result<(), AutomodError>;

    async fn send_direct_message(
        &self,
        user_id: u64,
        notification: &RenderedNotification,
    ) -> Result<(), AutomodError>;

    async fn send_audit_log(&self, entry: &AuditLogEntry) -> Result<(), AutomodError>;
}

/// Member lookups the gates need.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// The bot's own user id, if known yet.
    fn bot_user_id(&self) -> Option<u64>;

    /// Current role ids of a member. `Ok(None)` means the member can't be resolved.
    async fn member_roles(&self, guild_id: u64, user_id: u64) -> Result<Option<Vec<u64>>, AutomodError>;
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Per-action results for one event, logged once by the top-level handler.
#[derive(Debug, Default, Clone)]
pub struct ActionReport {
    pub succeeded: Vec<AutomodAction>,
    pub failed: Vec<(AutomodAction, String)>,
}

impl ActionReport {
    pub fn record(&mut self, action: AutomodAction, target: EnforcementTarget, result: Result<(), AutomodError>) {
        match result {
            Ok(()) => self.succeeded.push(action),
            Err(e) => {
                tracing::warn!(
                    guild_id = target.guild_id,
                    user_id = target.user_id,
                    action = %action,
                    error = %e,
                    "Automod action failed; continuing"
                );
                self.failed.push((action, e.to_string()));
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `TIMEOUT`, `KICK` and `BAN` (in that order) for whichever of them
/// `actions` contains.
pub async fn run_member_actions(
    executor: &dyn ActionExecutor,
    target: EnforcementTarget,
    actions: &[AutomodAction],
    timeout: Duration,
    reason: &str,
    report: &mut ActionReport,
) {
    if actions.contains(&AutomodAction::Timeout) {
        let result = executor.timeout_member(target, timeout, reason).await;
        report.record(AutomodAction::Timeout, target, result);
    }
    if actions.contains(&AutomodAction::Kick) {
        let result = executor.kick_member(target, reason).await;
        report.record(AutomodAction::Kick, target, result);
    }
    if actions.contains(&AutomodAction::Ban) {
        let result = executor.ban_member(target, reason).await;
        report.record(AutomodAction::Ban, target, result);
    }
}

/// Render and deliver a single notification if `actions` asks for `DM` or `WARN`.
pub async fn run_notification(
    executor: &dyn ActionExecutor,
    renderer: &dyn NotificationRenderer,
    target: EnforcementTarget,
    actions: &[AutomodAction],
    ctx: &NotificationContext,
    report: &mut ActionReport,
) {
    let action = if actions.contains(&AutomodAction::Dm) {
        AutomodAction::Dm
    } else if actions.contains(&AutomodAction::Warn) {
        AutomodAction::Warn
    } else {
        return;
    };

    let rendered = renderer.render(ctx);
    let result = executor.send_direct_message(target.user_id, &rendered).await;
    report.record(action, target, result);
}

/// Emit an audit entry if `actions` contains `LOG`.
pub async fn run_audit_log(
    executor: &dyn ActionExecutor,
    target: EnforcementTarget,
    actions: &[AutomodAction],
    entry: &AuditLogEntry,
    report: &mut ActionReport,
) {
    if !actions.contains(&AutomodAction::Log) {
        return;
    }
    let result = executor.send_audit_log(entry).await;
    report.record(AutomodAction::Log, target, result);
}
