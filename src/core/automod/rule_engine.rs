// Rule evaluation - picks the single rule that fires for an event.
//
// Candidate rules arrive already scoped (channel/role filtering happens in
// the enforcer). The engine only orders them and runs the pattern tests.

use super::automod_models::{AutomodRule, RuleMatch, RuleTarget};
use super::pattern_matcher::PatternMatcher;
use std::cmp::Ordering;

/// The text an entry point offers for matching.
#[derive(Debug, Clone, Copy)]
pub enum EventSubject<'a> {
    /// A message; checked by rules targeting `MessageContent`.
    MessageContent(&'a str),
    /// A reaction emoji name; checked by every candidate rule.
    Reaction(&'a str),
    /// A member's names; checked by rules targeting `Username` / `Nickname`.
    Member {
        username: Option<&'a str>,
        nickname: Option<&'a str>,
    },
}

impl<'a> EventSubject<'a> {
    /// The (target, text) pairs a rule should test, in target order.
    fn texts_for(&self, rule: &AutomodRule) -> Vec<(Option<RuleTarget>, &'a str)> {
        match *self {
            EventSubject::MessageContent(content) => {
                if rule.has_target(RuleTarget::MessageContent) {
                    vec![(Some(RuleTarget::MessageContent), content)]
                } else {
                    Vec::new()
                }
            }
            EventSubject::Reaction(emoji) => vec![(None, emoji)],
            EventSubject::Member { username, nickname } => {
                let mut texts = Vec::new();
                if let Some(name) = username.filter(|_| rule.has_target(RuleTarget::Username)) {
                    texts.push((Some(RuleTarget::Username), name));
                }
                if let Some(nick) = nickname.filter(|_| rule.has_target(RuleTarget::Nickname)) {
                    texts.push((Some(RuleTarget::Nickname), nick));
                }
                texts
            }
        }
    }
}

/// Evaluation order: priority descending, then oldest rule first, then lowest id.
///
/// Storage iteration order is never consulted, so equal-priority rules always
/// resolve the same way.
pub fn evaluation_order(a: &AutomodRule, b: &AutomodRule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct RuleEngine {
    matcher: PatternMatcher,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            matcher: PatternMatcher::new(),
        }
    }

    /// Find the first rule, in evaluation order, that matches `subject`.
    ///
    /// A rule matches when any of its configured targets matches under the
    /// rule's match mode. First match wins; rules never stack.
    pub fn evaluate(&self, subject: EventSubject<'_>, candidates: &[AutomodRule]) -> Option<RuleMatch> {
        let mut ordered: Vec<&AutomodRule> = candidates.iter().filter(|r| r.enabled).collect();
        ordered.sort_by(|a, b| evaluation_order(a, b));

        for rule in ordered {
            for (target, text) in subject.texts_for(rule) {
                let test = self
                    .matcher
                    .test_patterns(&rule.patterns, text, rule.match_mode);

                if let (true, Some(pattern)) = (test.matched, test.matched_pattern) {
                    tracing::debug!(
                        rule_id = rule.id,
                        rule_name = %rule.name,
                        pattern = %pattern.display_name(),
                        "Automod rule matched"
                    );
                    return Some(RuleMatch {
                        rule: rule.clone(),
                        matched_content: text.to_string(),
                        matched_pattern: pattern,
                        target,
                    });
                }
            }
        }

        None
    }
}
