//! Team permission policies: the autonomy contract an agent runs under.
//!
//! A policy is authored as TOML and compiled into a [`PermissionPolicy`]
//! before any session starts. Evaluation is pure: the same policy and the
//! same action always produce the same [`Decision`].

use std::fmt;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::core::action::{ActionDescriptor, ActionKind};

/// Risk classification controlling what happens to unmatched actions.
///
/// `Restricted` and `Standard` default-deny; `Elevated` default-allows
/// anything not explicitly denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskTier {
    Restricted,
    Standard,
    Elevated,
}

impl RiskTier {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "restricted" => Some(RiskTier::Restricted),
            "standard" => Some(RiskTier::Standard),
            "elevated" => Some(RiskTier::Elevated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Restricted => "restricted",
            RiskTier::Standard => "standard",
            RiskTier::Elevated => "elevated",
        }
    }
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// Resolution of one action: the verdict plus the reason behind it.
///
/// Denials always name the rule or default that produced them; the agent
/// sees this text verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            reason: reason.into(),
        }
    }

    pub fn is_deny(&self) -> bool {
        self.verdict == Verdict::Deny
    }
}

/// Pattern matcher for action payloads.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    /// Anchored token prefix: `git` matches `git status` and `git`, but
    /// never `gitk` or `status git`.
    Prefix(String),
    /// Glob over the whole payload. `*` crosses `/`, so `rm -rf *`
    /// matches `rm -rf /tmp`.
    Glob(Pattern),
    /// The whole payload, byte for byte.
    Exact(String),
}

impl RuleMatcher {
    pub fn matches(&self, payload: &str) -> bool {
        match self {
            RuleMatcher::Prefix(prefix) => prefix_matches(prefix, payload),
            RuleMatcher::Glob(pattern) => pattern.matches(payload),
            RuleMatcher::Exact(exact) => payload == exact,
        }
    }

    /// The pattern as authored, for decision reasons.
    pub fn pattern(&self) -> &str {
        match self {
            RuleMatcher::Prefix(prefix) => prefix,
            RuleMatcher::Glob(pattern) => pattern.as_str(),
            RuleMatcher::Exact(exact) => exact,
        }
    }
}

fn prefix_matches(prefix: &str, payload: &str) -> bool {
    let Some(rest) = payload.strip_prefix(prefix) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    // A prefix not ending on a separator must stop at a token boundary.
    if prefix.ends_with([' ', '\t', '/']) {
        return true;
    }
    rest.starts_with([' ', '\t', '/'])
}

/// One allow or deny entry in a policy.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub matcher: RuleMatcher,
    /// Kinds this rule applies to. Empty means every kind.
    pub kinds: Vec<ActionKind>,
}

impl PolicyRule {
    fn applies_to(&self, action: &ActionDescriptor) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&action.kind))
            && self.matcher.matches(&action.payload)
    }
}

/// Compiled permission policy for one team.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    pub team_id: String,
    pub risk_tier: RiskTier,
    /// Checked after `deny_rules`; first match wins.
    pub allow_rules: Vec<PolicyRule>,
    /// Checked first; any match denies regardless of allow rules.
    pub deny_rules: Vec<PolicyRule>,
    /// Glob the session's active branch must match.
    pub allowed_branch: Pattern,
    /// Denials tolerated before the session aborts. Always at least 1.
    pub denial_threshold: u32,
}

impl PermissionPolicy {
    /// Resolve one action against this policy.
    ///
    /// Deny rules take precedence over allow rules; within each list the
    /// first matching rule wins. Unmatched actions fall to the tier
    /// default.
    pub fn evaluate(&self, action: &ActionDescriptor) -> Decision {
        for rule in &self.deny_rules {
            if rule.applies_to(action) {
                return Decision::deny(format!("denied by pattern '{}'", rule.matcher.pattern()));
            }
        }
        for rule in &self.allow_rules {
            if rule.applies_to(action) {
                return Decision::allow(format!("allowed by pattern '{}'", rule.matcher.pattern()));
            }
        }
        match self.risk_tier {
            RiskTier::Elevated => Decision::allow("allowed by default under the elevated tier"),
            RiskTier::Restricted | RiskTier::Standard => {
                Decision::deny("no allow rule matched (default deny)")
            }
        }
    }

    /// Compile a policy from its TOML source.
    pub fn from_toml_str(raw: &str) -> Result<Self, PolicyLoadError> {
        let doc: PolicyDoc =
            toml::from_str(raw).map_err(|e| PolicyLoadError::Malformed(e.to_string()))?;

        let risk_tier = RiskTier::parse(&doc.risk_tier)
            .ok_or_else(|| PolicyLoadError::UnknownRiskTier(doc.risk_tier.clone()))?;

        if doc.team_id.trim().is_empty() {
            return Err(PolicyLoadError::Invalid("team_id must not be empty".to_string()));
        }
        if doc.denial_threshold == 0 {
            return Err(PolicyLoadError::Invalid(
                "denial_threshold must be greater than zero".to_string(),
            ));
        }
        if doc.allowed_branch.trim().is_empty() {
            return Err(PolicyLoadError::Invalid(
                "allowed_branch must not be empty".to_string(),
            ));
        }
        let allowed_branch = Pattern::new(&doc.allowed_branch).map_err(|e| {
            PolicyLoadError::Invalid(format!(
                "invalid branch pattern '{}': {e}",
                doc.allowed_branch
            ))
        })?;

        if doc.allow.is_empty() && doc.deny.is_empty() {
            return Err(PolicyLoadError::NoRules);
        }
        let allow_rules = compile_rules(&doc.allow)?;
        let deny_rules = compile_rules(&doc.deny)?;

        Ok(Self {
            team_id: doc.team_id,
            risk_tier,
            allow_rules,
            deny_rules,
            allowed_branch,
            denial_threshold: doc.denial_threshold,
        })
    }
}

fn compile_rules(docs: &[RuleDoc]) -> Result<Vec<PolicyRule>, PolicyLoadError> {
    docs.iter().map(compile_rule).collect()
}

fn compile_rule(doc: &RuleDoc) -> Result<PolicyRule, PolicyLoadError> {
    if doc.pattern.is_empty() {
        return Err(PolicyLoadError::Invalid(
            "rule pattern must not be empty".to_string(),
        ));
    }
    let matcher = match doc.matcher.as_str() {
        "prefix" => RuleMatcher::Prefix(doc.pattern.clone()),
        "exact" => RuleMatcher::Exact(doc.pattern.clone()),
        "glob" => RuleMatcher::Glob(Pattern::new(&doc.pattern).map_err(|e| {
            PolicyLoadError::Invalid(format!("invalid glob pattern '{}': {e}", doc.pattern))
        })?),
        other => {
            return Err(PolicyLoadError::Invalid(format!(
                "unknown matcher '{other}' (expected prefix, glob, or exact)"
            )));
        }
    };
    Ok(PolicyRule {
        matcher,
        kinds: doc.kinds.clone(),
    })
}

/// Raw policy document as authored.
///
/// Unknown keys are load errors; a typo must not silently weaken a
/// contract.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyDoc {
    team_id: String,
    risk_tier: String,
    allowed_branch: String,
    denial_threshold: u32,
    #[serde(default)]
    allow: Vec<RuleDoc>,
    #[serde(default)]
    deny: Vec<RuleDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDoc {
    matcher: String,
    pattern: String,
    #[serde(default)]
    kinds: Vec<ActionKind>,
}

/// Why a policy source failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyLoadError {
    /// The source is not valid TOML or has the wrong shape.
    Malformed(String),
    /// `risk_tier` names no known tier.
    UnknownRiskTier(String),
    /// Both the allow and deny lists are empty.
    NoRules,
    /// A field failed validation (empty team id, zero threshold, bad
    /// pattern, unknown matcher).
    Invalid(String),
}

impl fmt::Display for PolicyLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyLoadError::Malformed(detail) => write!(f, "malformed policy: {detail}"),
            PolicyLoadError::UnknownRiskTier(tier) => {
                write!(
                    f,
                    "unknown risk tier '{tier}' (expected restricted, standard, or elevated)"
                )
            }
            PolicyLoadError::NoRules => {
                write!(f, "policy declares no allow or deny rules")
            }
            PolicyLoadError::Invalid(detail) => write!(f, "invalid policy: {detail}"),
        }
    }
}

impl std::error::Error for PolicyLoadError {}
