use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::alerts::Severity;
use crate::error::GatekeepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Log,
    Block,
    Throttle,
    Alert,
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleAction::Log => "log",
            RuleAction::Block => "block",
            RuleAction::Throttle => "throttle",
            RuleAction::Alert => "alert",
        }
    }
}

/// Structured request signals a predicate rule can inspect.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    /// User agent, free text and header values joined by spaces
    pub content: String,
    pub consecutive_failures: u32,
    pub interval_ms: Option<i64>,
    pub rate_limit_violations: u32,
    /// Hour of day in the engine's configured time zone
    pub local_hour: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    ConsecutiveFailuresAtLeast { count: u32 },
    IntervalBelowMs { millis: i64 },
    ViolationsAtLeast { count: u32 },
    /// `[start, end)`; wraps past midnight when `start > end`
    LocalHourBetween { start: u32, end: u32 },
}

impl Predicate {
    pub fn evaluate(&self, signals: &RequestSignals) -> bool {
        match *self {
            Predicate::ConsecutiveFailuresAtLeast { count } => signals.consecutive_failures >= count,
            Predicate::IntervalBelowMs { millis } => {
                signals.interval_ms.is_some_and(|interval| interval >= 0 && interval < millis)
            }
            Predicate::ViolationsAtLeast { count } => signals.rate_limit_violations >= count,
            Predicate::LocalHourBetween { start, end } => {
                let hour = signals.local_hour;
                if start <= end {
                    hour >= start && hour < end
                } else {
                    hour >= start || hour < end
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Content(Regex),
    Predicate(Predicate),
}

/// A matcher plus the severity and mitigation it triggers.
///
/// `threshold` is carried for reporting; every single match fires.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub matcher: Matcher,
    pub severity: Severity,
    pub action: RuleAction,
    pub threshold: u32,
}

impl Rule {
    pub fn matches(&self, signals: &RequestSignals) -> bool {
        match &self.matcher {
            Matcher::Content(pattern) => pattern.is_match(&signals.content),
            Matcher::Predicate(predicate) => predicate.evaluate(signals),
        }
    }

    pub fn from_spec(spec: RuleSpec) -> Result<Self, GatekeepError> {
        let matcher = match spec.matcher {
            MatcherSpec::Content { pattern } => Matcher::Content(
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| GatekeepError::InvalidPattern {
                        rule_id: spec.id.clone(),
                        source,
                    })?,
            ),
            MatcherSpec::Predicate { predicate } => {
                if let Predicate::LocalHourBetween { start, end } = predicate
                    && (start > 23 || end > 24)
                {
                    return Err(GatekeepError::invalid_config(
                        format!("rules.{}.predicate", spec.id),
                        "hours must fall within 0..=24",
                    ));
                }
                Matcher::Predicate(predicate)
            }
        };
        Ok(Rule {
            id: spec.id,
            name: spec.name,
            description: spec.description,
            matcher,
            severity: spec.severity,
            action: spec.action,
            threshold: spec.threshold,
        })
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            severity: self.severity,
            action: self.action,
            threshold: self.threshold,
            matcher: match &self.matcher {
                Matcher::Content(pattern) => MatcherSpec::Content {
                    pattern: pattern.as_str().to_string(),
                },
                Matcher::Predicate(predicate) => MatcherSpec::Predicate {
                    predicate: predicate.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatcherSpec {
    Content { pattern: String },
    Predicate { predicate: Predicate },
}

/// Serializable rule definition, as stored in a rules file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub matcher: MatcherSpec,
    pub severity: Severity,
    pub action: RuleAction,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

fn default_threshold() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RuleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub action: RuleAction,
    pub threshold: u32,
    pub matcher: MatcherSpec,
}

pub fn compile_rules(specs: Vec<RuleSpec>) -> Result<Vec<Rule>, GatekeepError> {
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(specs.len());
    for spec in specs {
        if !seen.insert(spec.id.clone()) {
            return Err(GatekeepError::DuplicateRule(spec.id));
        }
        rules.push(Rule::from_spec(spec)?);
    }
    Ok(rules)
}

/// Load rules from a JSON array of [`RuleSpec`]s.
pub fn load_rules_file(path: &str) -> Result<Vec<Rule>, GatekeepError> {
    let raw = std::fs::read_to_string(path).map_err(|source| GatekeepError::RulesIo {
        path: path.to_string(),
        source,
    })?;
    let specs: Vec<RuleSpec> =
        serde_json::from_str(&raw).map_err(|source| GatekeepError::RulesParse {
            path: path.to_string(),
            source,
        })?;
    compile_rules(specs)
}

fn content_rule(
    id: &str,
    name: &str,
    description: &str,
    pattern: &str,
    severity: Severity,
    action: RuleAction,
) -> RuleSpec {
    RuleSpec {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        matcher: MatcherSpec::Content {
            pattern: pattern.to_string(),
        },
        severity,
        action,
        threshold: 1,
    }
}

fn predicate_rule(
    id: &str,
    name: &str,
    description: &str,
    predicate: Predicate,
    severity: Severity,
    action: RuleAction,
    threshold: u32,
) -> RuleSpec {
    RuleSpec {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        matcher: MatcherSpec::Predicate { predicate },
        severity,
        action,
        threshold,
    }
}

pub fn default_rule_specs() -> Vec<RuleSpec> {
    vec![
        content_rule(
            "sql_injection",
            "SQL injection",
            "SQL control sequences in user-supplied content",
            r"(\bunion\s+(all\s+)?select\b|\bdrop\s+(table|database)\b|;\s*(drop|delete|update|insert|truncate|shutdown)\b|'\s*or\s+'?\w+'?\s*=\s*'?\w+|\bexec(\s|\()+xp_)",
            Severity::Critical,
            RuleAction::Block,
        ),
        content_rule(
            "xss_attempt",
            "Cross-site scripting",
            "Script injection markup in user-supplied content",
            r"(<\s*script\b|javascript\s*:|\bon(error|load|click|mouseover)\s*=|<\s*iframe\b)",
            Severity::High,
            RuleAction::Block,
        ),
        content_rule(
            "path_traversal",
            "Path traversal",
            "Directory traversal sequences",
            r"(\.\./|\.\.\\|%2e%2e%2f)",
            Severity::High,
            RuleAction::Block,
        ),
        content_rule(
            "bot_user_agent",
            "Automated client",
            "User agent or content identifies an automated client",
            r"(bot|crawler|spider|scraper|curl|wget|automated)",
            Severity::Medium,
            RuleAction::Log,
        ),
        predicate_rule(
            "brute_force",
            "Brute force",
            "Repeated consecutive failures from one subject",
            Predicate::ConsecutiveFailuresAtLeast { count: 5 },
            Severity::High,
            RuleAction::Throttle,
            5,
        ),
        predicate_rule(
            "rapid_requests",
            "Rapid requests",
            "Requests arriving faster than a human can act",
            Predicate::IntervalBelowMs { millis: 100 },
            Severity::Medium,
            RuleAction::Throttle,
            1,
        ),
        predicate_rule(
            "rate_limit_abuse",
            "Rate limit abuse",
            "Subject keeps hitting its admission quota",
            Predicate::ViolationsAtLeast { count: 3 },
            Severity::High,
            RuleAction::Alert,
            3,
        ),
        predicate_rule(
            "unusual_hours",
            "Unusual hours",
            "Activity during the local early-morning lull",
            Predicate::LocalHourBetween { start: 2, end: 5 },
            Severity::Low,
            RuleAction::Log,
            1,
        ),
    ]
}

pub fn default_rules() -> Vec<Rule> {
    compile_rules(default_rule_specs()).expect("built-in rule set should compile")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str) -> Rule {
        default_rules()
            .into_iter()
            .find(|rule| rule.id == id)
            .expect("built-in rule should exist")
    }

    fn content(text: &str) -> RequestSignals {
        RequestSignals {
            content: text.to_string(),
            local_hour: 12,
            ..RequestSignals::default()
        }
    }

    #[test]
    fn sql_injection_pattern_catches_classic_payload() {
        let sql = rule("sql_injection");
        assert!(sql.matches(&content("' OR 1=1; DROP TABLE users;--")));
        assert!(sql.matches(&content("1 UNION ALL SELECT password FROM users")));
        assert!(!sql.matches(&content("Which table should I drop my bag on?")));
        assert!(!sql.matches(&content("I select the second answer")));
    }

    #[test]
    fn xss_and_traversal_patterns_match() {
        assert!(rule("xss_attempt").matches(&content("<SCRIPT>alert(1)</script>")));
        assert!(rule("xss_attempt").matches(&content("<img src=x onerror=alert(1)>")));
        assert!(!rule("xss_attempt").matches(&content("a script for the school play")));
        assert!(rule("path_traversal").matches(&content("../../etc/passwd")));
    }

    #[test]
    fn bot_pattern_is_case_insensitive() {
        let bot = rule("bot_user_agent");
        assert!(bot.matches(&content("Mozilla/5.0 (compatible; Googlebot/2.1)")));
        assert!(bot.matches(&content("CURL/8.4.0")));
        assert!(!bot.matches(&content("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0")));
    }

    #[test]
    fn predicates_read_structured_signals() {
        let signals = RequestSignals {
            consecutive_failures: 5,
            interval_ms: Some(40),
            rate_limit_violations: 2,
            local_hour: 3,
            ..RequestSignals::default()
        };
        assert!(rule("brute_force").matches(&signals));
        assert!(rule("rapid_requests").matches(&signals));
        assert!(!rule("rate_limit_abuse").matches(&signals));
        assert!(rule("unusual_hours").matches(&signals));

        let calm = RequestSignals {
            interval_ms: None,
            local_hour: 5,
            ..RequestSignals::default()
        };
        assert!(!rule("rapid_requests").matches(&calm));
        assert!(!rule("unusual_hours").matches(&calm));
    }

    #[test]
    fn hour_window_wraps_past_midnight() {
        let night = Predicate::LocalHourBetween { start: 22, end: 4 };
        let at = |hour| RequestSignals {
            local_hour: hour,
            ..RequestSignals::default()
        };
        assert!(night.evaluate(&at(23)));
        assert!(night.evaluate(&at(0)));
        assert!(night.evaluate(&at(3)));
        assert!(!night.evaluate(&at(4)));
        assert!(!night.evaluate(&at(12)));
    }

    #[test]
    fn rule_specs_parse_from_json() {
        let raw = r#"[
            {
                "id": "coupon_abuse",
                "name": "Coupon abuse",
                "matcher": { "content": { "pattern": "free\\s+gems" } },
                "severity": "medium",
                "action": "alert"
            },
            {
                "id": "night_owl",
                "name": "Night owl",
                "matcher": { "predicate": { "predicate": { "kind": "local_hour_between", "start": 1, "end": 3 } } },
                "severity": "low",
                "action": "log",
                "threshold": 2
            }
        ]"#;
        let specs: Vec<RuleSpec> = serde_json::from_str(raw).unwrap();
        let rules = compile_rules(specs).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].threshold, 1);
        assert_eq!(rules[1].threshold, 2);
        assert!(rules[0].matches(&content("get FREE   gems now")));
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let broken = content_rule("broken", "Broken", "", "(unclosed", Severity::Low, RuleAction::Log);
        assert!(matches!(
            Rule::from_spec(broken),
            Err(GatekeepError::InvalidPattern { .. })
        ));

        let dup = vec![
            content_rule("same", "A", "", "a", Severity::Low, RuleAction::Log),
            content_rule("same", "B", "", "b", Severity::Low, RuleAction::Log),
        ];
        assert!(matches!(compile_rules(dup), Err(GatekeepError::DuplicateRule(_))));

        let bad_hour = predicate_rule(
            "bad_hour",
            "Bad hour",
            "",
            Predicate::LocalHourBetween { start: 25, end: 3 },
            Severity::Low,
            RuleAction::Log,
            1,
        );
        assert!(Rule::from_spec(bad_hour).is_err());
    }
}
