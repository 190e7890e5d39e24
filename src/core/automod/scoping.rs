// Channel/role scoping applied to each rule before the engine sees it.

use super::automod_models::AutomodRule;

/// Where an event happened and who caused it.
#[derive(Debug, Clone, Copy)]
pub struct ScopeContext<'a> {
    /// `None` for member events, which skip channel scoping.
    pub channel_id: Option<u64>,
    pub role_ids: &'a [u64],
}

/// Whether `rule` applies to an event in `ctx`.
///
/// Include lists restrict (a non-empty channel include needs the channel to be
/// listed, a non-empty role include needs any overlap). Exclude lists veto and
/// always beat include.
pub fn rule_in_scope(rule: &AutomodRule, ctx: &ScopeContext<'_>) -> bool {
    if let Some(channel_id) = ctx.channel_id {
        if rule.channel_exclude.contains(&channel_id) {
            return false;
        }
        if !rule.channel_include.is_empty() && !rule.channel_include.contains(&channel_id) {
            return false;
        }
    }

    if ctx.role_ids.iter().any(|r| rule.role_exclude.contains(r)) {
        return false;
    }
    if !rule.role_include.is_empty() && !ctx.role_ids.iter().any(|r| rule.role_include.contains(r)) {
        return false;
    }

    true
}

pub fn scope_rules(rules: Vec<AutomodRule>, ctx: &ScopeContext<'_>) -> Vec<AutomodRule> {
    rules.into_iter().filter(|r| rule_in_scope(r, ctx)).collect()
}
