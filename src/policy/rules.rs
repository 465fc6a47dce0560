//! Parsing policy-room state events into rules, and glob matching.

use crate::db::{PolicyKind, PolicyRule, RuleState};
use crate::ids;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recommendations that mean "ban".
pub const BAN_RECOMMENDATIONS: &[&str] = &["m.ban", "org.matrix.mjolnir.ban"];

/// A state event observed in a subscribed policy room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvent {
    pub room_id: String,
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub state_key: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub origin_server_ts: i64,
    /// The event was redacted after the fact.
    #[serde(default)]
    pub redacted: bool,
}

/// Map a policy event type onto the rule kind it describes.
pub fn kind_of(event_type: &str) -> Option<PolicyKind> {
    let suffix = event_type
        .strip_prefix("m.policy.rule.")
        .or_else(|| event_type.strip_prefix("m.room.rule."))
        .or_else(|| event_type.strip_prefix("org.matrix.mjolnir.rule."))?;
    match suffix {
        "user" => Some(PolicyKind::User),
        "server" => Some(PolicyKind::Server),
        "room" => Some(PolicyKind::Room),
        _ => None,
    }
}

/// Build the rule an event describes. `None` if it is not a policy event.
///
/// Redacted events and events with empty content revoke the rule under the
/// same state key.
pub fn parse(event: &PolicyEvent) -> Option<PolicyRule> {
    let kind = kind_of(&event.event_type)?;
    let field = |name: &str| {
        event
            .content
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let entity = field("entity");
    let recommendation = field("recommendation");
    let revoked = event.redacted || entity.is_none() || recommendation.is_none();

    Some(PolicyRule {
        policy_room: event.room_id.clone(),
        kind,
        rule_id: event.state_key.clone(),
        entity: entity.unwrap_or_default(),
        recommendation: recommendation.unwrap_or_default(),
        reason: field("reason"),
        state: if revoked {
            RuleState::Revoked
        } else {
            RuleState::Active
        },
        event_id: event.event_id.clone(),
        origin_ts: event.origin_server_ts,
    })
}

/// Whether a rule asks for a ban.
pub fn is_ban(rule: &PolicyRule) -> bool {
    BAN_RECOMMENDATIONS.contains(&rule.recommendation.as_str())
}

/// An active ban rule with its entity glob compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: PolicyRule,
    pattern: glob::Pattern,
}

impl CompiledRule {
    pub fn compile(rule: PolicyRule) -> Result<Self, glob::PatternError> {
        let pattern = glob::Pattern::new(&rule.entity)?;
        Ok(Self { rule, pattern })
    }

    /// Whether this rule matches `user` (user and server rules) or `room`
    /// (room rules).
    pub fn matches(&self, user: &str, room: &str) -> bool {
        match self.rule.kind {
            PolicyKind::User => self.pattern.matches(user),
            PolicyKind::Server => ids::server_name(user).is_some_and(|s| self.pattern.matches(s)),
            PolicyKind::Room => self.pattern.matches(room),
        }
    }

    /// Only user and server rules can ban a user.
    pub fn bans_users(&self) -> bool {
        matches!(self.rule.kind, PolicyKind::User | PolicyKind::Server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, content: Value) -> PolicyEvent {
        PolicyEvent {
            room_id: "!policies:example.org".into(),
            event_id: "$1".into(),
            event_type: event_type.into(),
            state_key: "rule:1".into(),
            content,
            origin_server_ts: 10,
            redacted: false,
        }
    }

    #[test]
    fn kinds_from_all_prefixes() {
        assert_eq!(kind_of("m.policy.rule.user"), Some(PolicyKind::User));
        assert_eq!(kind_of("m.room.rule.server"), Some(PolicyKind::Server));
        assert_eq!(kind_of("org.matrix.mjolnir.rule.room"), Some(PolicyKind::Room));
        assert_eq!(kind_of("m.room.message"), None);
        assert_eq!(kind_of("m.policy.rule.alias"), None);
    }

    #[test]
    fn empty_content_revokes() {
        let rule = parse(&event("m.policy.rule.user", json!({}))).unwrap();
        assert_eq!(rule.state, RuleState::Revoked);

        let rule = parse(&event(
            "m.policy.rule.user",
            json!({"entity": "@spammer:example.org", "recommendation": "m.ban", "reason": "spam"}),
        ))
        .unwrap();
        assert_eq!(rule.state, RuleState::Active);
        assert_eq!(rule.reason.as_deref(), Some("spam"));
        assert!(is_ban(&rule));
    }

    #[test]
    fn server_globs_match_user_servers() {
        let rule = parse(&event(
            "m.policy.rule.server",
            json!({"entity": "*.evil.example", "recommendation": "m.ban"}),
        ))
        .unwrap();
        let compiled = CompiledRule::compile(rule).unwrap();
        assert!(compiled.matches("@bot:spam.evil.example", "!r:example.org"));
        assert!(!compiled.matches("@alice:example.org", "!r:example.org"));
        assert!(compiled.bans_users());
    }

    #[test]
    fn user_globs() {
        let rule = parse(&event(
            "m.policy.rule.user",
            json!({"entity": "@spam*:example.org", "recommendation": "m.ban"}),
        ))
        .unwrap();
        let compiled = CompiledRule::compile(rule).unwrap();
        assert!(compiled.matches("@spammer:example.org", "!r:example.org"));
        assert!(!compiled.matches("@alice:example.org", "!r:example.org"));
    }
}
