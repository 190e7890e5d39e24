// Automod domain models - rules, patterns, infractions, escalation tiers and
// the inbound events the enforcer consumes.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts gateway events into these before dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::pattern_matcher;

/// Upper bounds enforced when a rule is authored.
pub const MAX_PATTERNS_PER_RULE: usize = 25;
pub const MAX_ACTIONS_PER_RULE: usize = 8;
pub const MAX_SCOPE_IDS: usize = 100;

// ============================================================================
// RULES
// ============================================================================

/// A single regex (possibly compiled from wildcard syntax) with optional flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub regex: String,
    /// Explicit flag whitelist (`i`, `m`, `s`, `x`). Nothing is implied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    /// Human-readable name shown in logs and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Pattern {
    pub fn new(regex: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            flags: None,
            label: None,
        }
    }

    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = Some(flags.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.regex)
    }
}

/// How a rule's patterns combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// OR - any single pattern is enough.
    #[default]
    Any,
    /// AND - every pattern must match.
    All,
}

/// Which piece of an event a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    MessageContent,
    Username,
    Nickname,
}

/// An atomic enforcement operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomodAction {
    Delete,
    Timeout,
    Kick,
    Ban,
    Warn,
    Dm,
    Log,
    RemoveReaction,
}

impl std::fmt::Display for AutomodAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutomodAction::Delete => write!(f, "Delete"),
            AutomodAction::Timeout => write!(f, "Timeout"),
            AutomodAction::Kick => write!(f, "Kick"),
            AutomodAction::Ban => write!(f, "Ban"),
            AutomodAction::Warn => write!(f, "Warn"),
            AutomodAction::Dm => write!(f, "DM"),
            AutomodAction::Log => write!(f, "Log"),
            AutomodAction::RemoveReaction => write!(f, "Remove Reaction"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A named pattern + action + scope configuration evaluated against events.
///
/// Rules are owned by the admin surface; the automod core only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomodRule {
    pub id: u64,
    pub guild_id: u64,
    pub name: String,
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub match_mode: MatchMode,
    pub targets: Vec<RuleTarget>,
    pub actions: Vec<AutomodAction>,
    #[serde(default)]
    pub warn_points: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub channel_include: Vec<u64>,
    #[serde(default)]
    pub channel_exclude: Vec<u64>,
    #[serde(default)]
    pub role_include: Vec<u64>,
    #[serde(default)]
    pub role_exclude: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_duration_ms: Option<u64>,
    /// Secondary ordering key for rules with equal priority.
    pub created_at: DateTime<Utc>,
}

impl AutomodRule {
    pub fn has_action(&self, action: AutomodAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn has_target(&self, target: RuleTarget) -> bool {
        self.targets.contains(&target)
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_duration_ms.map(Duration::from_millis)
    }

    /// Authoring-time validation. Enforcement never calls this; a rule that
    /// reaches the store has already passed.
    pub fn validate(&self) -> Result<(), InvalidRuleError> {
        if self.patterns.is_empty() {
            return Err(InvalidRuleError::NoPatterns);
        }
        if self.patterns.len() > MAX_PATTERNS_PER_RULE {
            return Err(InvalidRuleError::TooMany {
                field: "patterns",
                limit: MAX_PATTERNS_PER_RULE,
            });
        }
        if self.actions.is_empty() {
            return Err(InvalidRuleError::NoActions);
        }
        let mut distinct = self.actions.clone();
        distinct.sort_by_key(|a| *a as u8);
        distinct.dedup();
        if distinct.len() != self.actions.len() {
            return Err(InvalidRuleError::DuplicateAction);
        }
        if self.actions.len() > MAX_ACTIONS_PER_RULE {
            return Err(InvalidRuleError::TooMany {
                field: "actions",
                limit: MAX_ACTIONS_PER_RULE,
            });
        }
        if self.targets.is_empty() {
            return Err(InvalidRuleError::NoTargets);
        }
        for (field, ids) in [
            ("channel_include", &self.channel_include),
            ("channel_exclude", &self.channel_exclude),
            ("role_include", &self.role_include),
            ("role_exclude", &self.role_exclude),
        ] {
            if ids.len() > MAX_SCOPE_IDS {
                return Err(InvalidRuleError::TooMany {
                    field,
                    limit: MAX_SCOPE_IDS,
                });
            }
        }
        for pattern in &self.patterns {
            let check = pattern_matcher::validate_regex(&pattern.regex, pattern.flags.as_deref());
            if !check.valid {
                return Err(InvalidRuleError::InvalidPattern {
                    pattern: pattern.display_name().to_string(),
                    reason: check.error.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum InvalidRuleError {
    #[error("Rule must have at least one pattern")]
    NoPatterns,

    #[error("Rule must have at least one action")]
    NoActions,

    #[error("Rule lists the same action more than once")]
    DuplicateAction,

    #[error("Rule must have at least one target")]
    NoTargets,

    #[error("Too many {field} (limit {limit})")]
    TooMany { field: &'static str, limit: usize },

    #[error("Pattern `{pattern}` is invalid: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// The result of a rule matching an event. One per event at most.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule: AutomodRule,
    /// The event text that matched (message content, username, nickname or emoji).
    pub matched_content: String,
    pub matched_pattern: Pattern,
    /// `None` for reaction matches, which are not target-driven.
    pub target: Option<RuleTarget>,
}

// ============================================================================
// INFRACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfractionSource {
    Automod,
}

impl InfractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfractionSource::Automod => "AUTOMOD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfractionType {
    AutomodDelete,
    AutomodReaction,
    AutomodUsername,
    Escalation,
}

impl InfractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfractionType::AutomodDelete => "AUTOMOD_DELETE",
            InfractionType::AutomodReaction => "AUTOMOD_REACTION",
            InfractionType::AutomodUsername => "AUTOMOD_USERNAME",
            InfractionType::Escalation => "ESCALATION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AUTOMOD_DELETE" => Some(InfractionType::AutomodDelete),
            "AUTOMOD_REACTION" => Some(InfractionType::AutomodReaction),
            "AUTOMOD_USERNAME" => Some(InfractionType::AutomodUsername),
            "ESCALATION" => Some(InfractionType::Escalation),
            _ => None,
        }
    }
}

/// Fields of an infraction before the ledger assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInfraction {
    pub guild_id: u64,
    pub user_id: u64,
    pub source: InfractionSource,
    pub infraction_type: InfractionType,
    pub reason: String,
    pub rule_id: Option<u64>,
    pub rule_name: Option<String>,
    pub matched_content: Option<String>,
    pub points_assigned: u32,
    pub channel_id: Option<u64>,
    pub message_id: Option<u64>,
    /// Active-point total an escalation fired at. Only set on `Escalation` rows.
    pub escalation_points: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// An immutable record of a violation. Never updated or deleted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infraction {
    pub id: u64,
    pub guild_id: u64,
    pub user_id: u64,
    pub source: InfractionSource,
    pub infraction_type: InfractionType,
    pub reason: String,
    pub rule_id: Option<u64>,
    pub rule_name: Option<String>,
    pub matched_content: Option<String>,
    pub points_assigned: u32,
    pub channel_id: Option<u64>,
    pub message_id: Option<u64>,
    pub escalation_points: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Infraction {
    pub fn from_new(id: u64, new: NewInfraction) -> Self {
        Self {
            id,
            guild_id: new.guild_id,
            user_id: new.user_id,
            source: new.source,
            infraction_type: new.infraction_type,
            reason: new.reason,
            rule_id: new.rule_id,
            rule_name: new.rule_name,
            matched_content: new.matched_content,
            points_assigned: new.points_assigned,
            channel_id: new.channel_id,
            message_id: new.message_id,
            escalation_points: new.escalation_points,
            created_at: new.created_at,
        }
    }
}

// ============================================================================
// GUILD CONFIG
// ============================================================================

/// A point threshold mapped to an additional action set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub threshold: u32,
    pub actions: Vec<AutomodAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_duration_ms: Option<u64>,
}

impl EscalationTier {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} points", self.threshold))
    }
}

/// Per-guild moderation settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuildModerationConfig {
    pub automod_enabled: bool,
    #[serde(default)]
    pub immune_roles: Vec<u64>,
    #[serde(default)]
    pub escalation_tiers: Vec<EscalationTier>,
    /// Channel the audit sink posts `LOG` entries to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_channel_id: Option<u64>,
}

/// Process-wide enforcement options, read once at startup.
#[derive(Debug, Clone)]
pub struct AutomodOptions {
    /// Used for `TIMEOUT` when neither the rule nor the tier sets a duration.
    pub default_timeout: Duration,
    /// Notification template for `DM`/`WARN`. See `TemplateRenderer`.
    pub dm_template: String,
}

pub const DEFAULT_DM_TEMPLATE: &str =
    "Your activity in {guild} triggered the automod rule **{rule}**.\nReason: {reason}\nActions taken: {actions}\nActive points: {points}";

impl Default for AutomodOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300), // 5 minute timeout
            dm_template: DEFAULT_DM_TEMPLATE.to_string(),
        }
    }
}

// ============================================================================
// INBOUND EVENTS
// ============================================================================

/// Points at a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
}

/// Emoji used in a reaction. Unicode emoji have no id; `name` holds the glyph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiRef {
    pub id: Option<u64>,
    pub name: String,
    pub animated: bool,
}

impl EmojiRef {
    pub fn unicode(glyph: impl Into<String>) -> Self {
        Self {
            id: None,
            name: glyph.into(),
            animated: false,
        }
    }

    pub fn custom(id: u64, name: impl Into<String>, animated: bool) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            animated,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub author_id: u64,
    pub author_is_bot: bool,
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub content: String,
    /// `None` when the gateway payload carried no member data.
    pub actor_role_ids: Option<Vec<u64>>,
}

impl MessageEvent {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub emoji: EmojiRef,
    pub message: MessageRef,
    pub user_id: u64,
    pub user_is_bot: bool,
}

#[derive(Debug, Clone)]
pub struct MemberJoinEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub username: String,
    pub user_is_bot: bool,
}

#[derive(Debug, Clone)]
pub struct MemberUpdateEvent {
    pub guild_id: u64,
    pub user_id: u64,
    /// The nickname before the update. The outer `None` means the previous
    /// member state was not cached, so a change can't be established.
    pub old_nickname: Option<Option<String>>,
    pub new_nickname: Option<String>,
    pub user_is_bot: bool,
}

/// Everything the dispatcher can route to the enforcer.
#[derive(Debug, Clone)]
pub enum AutomodEvent {
    Message(MessageEvent),
    Reaction(ReactionEvent),
    MemberJoin(MemberJoinEvent),
    MemberUpdate(MemberUpdateEvent),
}

impl AutomodEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            AutomodEvent::Message(e) => e.guild_id,
            AutomodEvent::Reaction(e) => e.message.guild_id,
            AutomodEvent::MemberJoin(e) => e.guild_id,
            AutomodEvent::MemberUpdate(e) => e.guild_id,
        }
    }

    pub fn user_id(&self) -> u64 {
        match self {
            AutomodEvent::Message(e) => e.author_id,
            AutomodEvent::Reaction(e) => e.user_id,
            AutomodEvent::MemberJoin(e) => e.user_id,
            AutomodEvent::MemberUpdate(e) => e.user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AutomodEvent::Message(_) => "message",
            AutomodEvent::Reaction(_) => "reaction",
            AutomodEvent::MemberJoin(_) => "member_join",
            AutomodEvent::MemberUpdate(_) => "member_update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::automod::test_support::rule;

    #[test]
    fn test_validate_accepts_well_formed_rule() {
        let r = rule(1, "spam", &["spam"]);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_patterns_and_actions() {
        let mut r = rule(1, "empty", &[]);
        assert!(matches!(r.validate(), Err(InvalidRuleError::NoPatterns)));

        r.patterns = vec![Pattern::new("x")];
        r.actions.clear();
        assert!(matches!(r.validate(), Err(InvalidRuleError::NoActions)));
    }

    #[test]
    fn test_validate_rejects_bad_regex_and_oversized_scope() {
        let mut r = rule(1, "bad", &["(unclosed"]);
        assert!(matches!(
            r.validate(),
            Err(InvalidRuleError::InvalidPattern { ref pattern, .. }) if pattern == "(unclosed"
        ));

        r.patterns = vec![Pattern::new("ok").with_flags("g")];
        match r.validate() {
            Err(InvalidRuleError::InvalidPattern { reason, .. }) => assert!(reason.contains('g')),
            other => panic!("expected InvalidPattern, got {:?}", other),
        }

        r.patterns = vec![Pattern::new("ok")];
        r.role_exclude = (0..=MAX_SCOPE_IDS as u64).collect();
        assert!(matches!(
            r.validate(),
            Err(InvalidRuleError::TooMany {
                field: "role_exclude",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_actions() {
        let mut r = rule(1, "dup", &["x"]);
        r.actions = vec![AutomodAction::Delete, AutomodAction::Delete];
        assert!(matches!(r.validate(), Err(InvalidRuleError::DuplicateAction)));
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let json = r#"{
            "id": 7,
            "guild_id": 1,
            "name": "links",
            "patterns": [{"regex": "discord\\.gg/\\w+", "flags": "i"}],
            "targets": ["message_content"],
            "actions": ["DELETE", "WARN"],
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let r: AutomodRule = serde_json::from_str(json).unwrap();
        assert!(r.enabled);
        assert_eq!(r.match_mode, MatchMode::Any);
        assert_eq!(r.warn_points, 0);
        assert!(r.has_action(AutomodAction::Warn));
        assert_eq!(r.patterns[0].flags.as_deref(), Some("i"));
    }

    #[test]
    fn test_tier_display_name_falls_back_to_threshold() {
        let tier = EscalationTier {
            name: None,
            threshold: 10,
            actions: vec![AutomodAction::Timeout],
            timeout_duration_ms: None,
        };
        assert_eq!(tier.display_name(), "10 points");
    }
}
