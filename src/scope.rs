//! Scope Matcher
//!
//! Ordered host/path rules deciding what traffic is in scope. Rules are
//! compiled into an immutable snapshot; configuration reloads swap the
//! snapshot atomically so in-flight evaluations never see a half-updated
//! list. Evaluation is first-match-wins; with no matching rule the
//! configured default applies, and that default is explicit configuration,
//! never an assumption.

use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("invalid {kind:?} pattern {pattern:?}: {reason}")]
    InvalidPattern {
        kind: PatternKind,
        pattern: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Glob-style: `*` matches any run of characters, `?` a single one.
    Wildcard,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetField {
    Host,
    Path,
    /// Rule matches when either field matches.
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Include,
    Exclude,
}

/// One user-configured scope rule, in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRule {
    pub kind: PatternKind,
    pub target: TargetField,
    pub pattern: String,
    pub action: RuleAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// The scope rule list plus the explicit no-match default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub rules: Vec<ScopeRule>,
    /// Verdict when no rule matches. Defaults to out-of-scope.
    #[serde(default)]
    pub default_in_scope: bool,
}

struct CompiledRule {
    target: TargetField,
    action: RuleAction,
    matcher: Regex,
}

/// An immutable, compiled scope snapshot.
pub struct ScopeSet {
    rules: Vec<CompiledRule>,
    default_in_scope: bool,
}

impl ScopeSet {
    /// Compile a configuration. Any invalid pattern rejects the whole
    /// snapshot; the previously active one stays authoritative.
    pub fn compile(config: &ScopeConfig) -> Result<Self, ScopeError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in config.rules.iter().filter(|r| r.enabled) {
            let pattern = match rule.kind {
                PatternKind::Wildcard => wildcard_to_regex(&rule.pattern),
                PatternKind::Regex => rule.pattern.clone(),
            };
            let matcher = Regex::new(&pattern).map_err(|e| ScopeError::InvalidPattern {
                kind: rule.kind,
                pattern: rule.pattern.clone(),
                reason: e.to_string(),
            })?;
            rules.push(CompiledRule {
                target: rule.target,
                action: rule.action,
                matcher,
            });
        }
        Ok(Self {
            rules,
            default_in_scope: config.default_in_scope,
        })
    }

    /// First matching rule decides; otherwise the configured default.
    pub fn matches(&self, host: &str, path: &str) -> bool {
        match self.first_match(host, path) {
            Some(action) => action == RuleAction::Include,
            None => self.default_in_scope,
        }
    }

    /// True only when the first matching rule is an explicit Exclude. The
    /// no-match default plays no part here: this drives decisions like
    /// tunnel interception, where unlisted hosts are still intercepted and
    /// only an exclusion opts them out.
    pub fn excludes(&self, host: &str, path: &str) -> bool {
        self.first_match(host, path) == Some(RuleAction::Exclude)
    }

    fn first_match(&self, host: &str, path: &str) -> Option<RuleAction> {
        for rule in &self.rules {
            let hit = match rule.target {
                TargetField::Host => rule.matcher.is_match(host),
                TargetField::Path => rule.matcher.is_match(path),
                TargetField::Both => rule.matcher.is_match(host) || rule.matcher.is_match(path),
            };
            if hit {
                return Some(rule.action);
            }
        }
        None
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Shared, atomically swappable scope snapshot.
pub struct ScopeHandle {
    current: ArcSwap<ScopeSet>,
}

impl ScopeHandle {
    pub fn new(scope: ScopeSet) -> Self {
        Self {
            current: ArcSwap::from_pointee(scope),
        }
    }

    /// Compile and install a new snapshot; on error the old one remains.
    pub fn reload(&self, config: &ScopeConfig) -> Result<(), ScopeError> {
        let compiled = ScopeSet::compile(config)?;
        info!(rules = compiled.rule_count(), "scope snapshot replaced");
        self.current.store(Arc::new(compiled));
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<ScopeSet> {
        self.current.load_full()
    }
}

/// Anchored regex equivalent of a glob pattern.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: PatternKind, target: TargetField, pattern: &str, action: RuleAction) -> ScopeRule {
        ScopeRule {
            kind,
            target,
            pattern: pattern.to_string(),
            action,
            enabled: true,
        }
    }

    #[test]
    fn test_exclude_then_include_wildcards() {
        let config = ScopeConfig {
            rules: vec![
                rule(
                    PatternKind::Wildcard,
                    TargetField::Host,
                    "*.internal.test",
                    RuleAction::Exclude,
                ),
                rule(PatternKind::Wildcard, TargetField::Host, "*", RuleAction::Include),
            ],
            default_in_scope: false,
        };
        let scope = ScopeSet::compile(&config).unwrap();
        assert!(!scope.matches("api.internal.test", "/"));
        assert!(scope.matches("example.com", "/"));
    }

    #[test]
    fn test_excludes_only_on_explicit_exclude_match() {
        let config = ScopeConfig {
            rules: vec![
                rule(
                    PatternKind::Wildcard,
                    TargetField::Host,
                    "*.pinned.test",
                    RuleAction::Exclude,
                ),
                rule(PatternKind::Wildcard, TargetField::Host, "*.example.com", RuleAction::Include),
            ],
            default_in_scope: false,
        };
        let scope = ScopeSet::compile(&config).unwrap();
        assert!(scope.excludes("bank.pinned.test", "/"));
        assert!(!scope.excludes("app.example.com", "/"));
        // Unlisted hosts are out of scope but not excluded.
        assert!(!scope.matches("other.test", "/"));
        assert!(!scope.excludes("other.test", "/"));
    }

    #[test]
    fn test_first_match_wins_over_later_rules() {
        let config = ScopeConfig {
            rules: vec![
                rule(
                    PatternKind::Wildcard,
                    TargetField::Host,
                    "app.example.com",
                    RuleAction::Include,
                ),
                rule(
                    PatternKind::Wildcard,
                    TargetField::Host,
                    "*.example.com",
                    RuleAction::Exclude,
                ),
            ],
            default_in_scope: false,
        };
        let scope = ScopeSet::compile(&config).unwrap();
        assert!(scope.matches("app.example.com", "/"));
        assert!(!scope.matches("cdn.example.com", "/"));
    }

    #[test]
    fn test_no_match_uses_explicit_default() {
        let out_by_default = ScopeSet::compile(&ScopeConfig::default()).unwrap();
        assert!(!out_by_default.matches("anything.test", "/"));

        let in_by_default = ScopeSet::compile(&ScopeConfig {
            rules: vec![],
            default_in_scope: true,
        })
        .unwrap();
        assert!(in_by_default.matches("anything.test", "/"));
    }

    #[test]
    fn test_regex_path_rule() {
        let config = ScopeConfig {
            rules: vec![rule(
                PatternKind::Regex,
                TargetField::Path,
                r"^/api/v\d+/",
                RuleAction::Include,
            )],
            default_in_scope: false,
        };
        let scope = ScopeSet::compile(&config).unwrap();
        assert!(scope.matches("example.com", "/api/v2/users"));
        assert!(!scope.matches("example.com", "/static/app.js"));
    }

    #[test]
    fn test_invalid_pattern_rejects_whole_snapshot() {
        let config = ScopeConfig {
            rules: vec![rule(
                PatternKind::Regex,
                TargetField::Host,
                "(unclosed",
                RuleAction::Include,
            )],
            default_in_scope: false,
        };
        assert!(matches!(
            ScopeSet::compile(&config),
            Err(ScopeError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_reload_keeps_old_snapshot_on_error() {
        let good = ScopeConfig {
            rules: vec![rule(
                PatternKind::Wildcard,
                TargetField::Host,
                "*",
                RuleAction::Include,
            )],
            default_in_scope: false,
        };
        let handle = ScopeHandle::new(ScopeSet::compile(&good).unwrap());
        assert!(handle.snapshot().matches("example.com", "/"));

        let bad = ScopeConfig {
            rules: vec![rule(
                PatternKind::Regex,
                TargetField::Host,
                "(unclosed",
                RuleAction::Include,
            )],
            default_in_scope: false,
        };
        assert!(handle.reload(&bad).is_err());
        // Old snapshot still in force.
        assert!(handle.snapshot().matches("example.com", "/"));
    }

    #[test]
    fn test_disabled_rules_skipped() {
        let mut excluded = rule(
            PatternKind::Wildcard,
            TargetField::Host,
            "*",
            RuleAction::Exclude,
        );
        excluded.enabled = false;
        let config = ScopeConfig {
            rules: vec![excluded],
            default_in_scope: true,
        };
        let scope = ScopeSet::compile(&config).unwrap();
        assert!(scope.matches("example.com", "/"));
        assert_eq!(scope.rule_count(), 0);
    }

    #[test]
    fn test_wildcard_escapes_regex_metacharacters() {
        let config = ScopeConfig {
            rules: vec![rule(
                PatternKind::Wildcard,
                TargetField::Host,
                "api.example.com",
                RuleAction::Include,
            )],
            default_in_scope: false,
        };
        let scope = ScopeSet::compile(&config).unwrap();
        assert!(scope.matches("api.example.com", "/"));
        // The dot must not match arbitrary characters.
        assert!(!scope.matches("apiXexampleXcom", "/"));
    }
}
