//! Structured moderation verdicts and evaluator-output parsing.
//!
//! The evaluator replies with a strict JSON object:
//! `{"shouldRespond": bool, "response": "...", "reason": "...",
//! "category": "..."}`. Anything malformed or empty parses to a
//! no-intervention verdict (fail-open); a bad evaluator reply must never
//! block delivery of the triggering message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::policy::PolicyEntry;

/// Category of an intervention, used for motion eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerdictCategory {
    /// Insulting or abusive language.
    Insult,
    /// Drifting away from the debate topic.
    OffTopic,
    /// A factual or unverifiable claim. The only contestable category.
    Factual,
    /// Anything else.
    #[default]
    Other,
}

impl VerdictCategory {
    /// Whether a motion may be raised against a verdict of this category.
    pub fn is_contestable(self) -> bool {
        matches!(self, Self::Factual)
    }

    /// Best-effort mapping from a free-form category string.
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_ascii_lowercase();
        match lower.as_str() {
            "insult" | "insults" | "abuse" => Self::Insult,
            "off_topic" | "off-topic" | "offtopic" | "topic_drift" => Self::OffTopic,
            "factual" | "fact" | "misinformation" | "unverifiable_claim" => Self::Factual,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for VerdictCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insult => write!(f, "insult"),
            Self::OffTopic => write!(f, "off_topic"),
            Self::Factual => write!(f, "factual"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One policy's outcome for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Name of the policy entry that produced this verdict.
    pub policy_name: String,
    /// Whether the moderator should inject a message.
    pub should_intervene: bool,
    /// Moderator text to display when intervening.
    pub rendered_text: String,
    /// Short reason behind the decision.
    pub reason_text: String,
    /// Category, for motion eligibility.
    pub category: VerdictCategory,
    /// When this verdict was produced.
    pub produced_at: DateTime<Utc>,
}

impl Verdict {
    /// The silent verdict: nothing to moderate.
    pub fn no_intervention(policy: &PolicyEntry) -> Self {
        Self {
            policy_name: policy.name.clone(),
            should_intervene: false,
            rendered_text: String::new(),
            reason_text: String::new(),
            category: VerdictCategory::Other,
            produced_at: Utc::now(),
        }
    }

    /// Display body for the injected moderator message.
    pub fn display_body(&self) -> String {
        if self.rendered_text.trim().is_empty() {
            format!("Point assigned: {}", self.reason_text)
        } else {
            self.rendered_text.clone()
        }
    }
}

/// Wire shape of the evaluator's reply.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(alias = "shouldRespond", alias = "should_respond", default)]
    should_respond: bool,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Strip a markdown code fence if the evaluator wrapped its JSON in one.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Parse raw evaluator output into a verdict for `policy`.
///
/// Fail-open: malformed or empty output yields a no-intervention verdict.
pub fn parse_raw_verdict(policy: &PolicyEntry, raw: &str) -> Verdict {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Verdict::no_intervention(policy);
    }

    let parsed: RawVerdict = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            debug!(policy = %policy.name, "unparseable evaluator output: {}", e);
            return Verdict::no_intervention(policy);
        }
    };

    if !parsed.should_respond {
        return Verdict::no_intervention(policy);
    }

    let category = parsed
        .category
        .as_deref()
        .map(VerdictCategory::from_label)
        .unwrap_or_else(|| infer_category(&policy.name));

    Verdict {
        policy_name: policy.name.clone(),
        should_intervene: true,
        rendered_text: parsed.response.unwrap_or_default(),
        reason_text: parsed.reason.unwrap_or_default(),
        category,
        produced_at: Utc::now(),
    }
}

/// Fall back to the policy name when the evaluator omits a category.
fn infer_category(policy_name: &str) -> VerdictCategory {
    let lower = policy_name.to_ascii_lowercase();
    if lower.contains("insult") {
        VerdictCategory::Insult
    } else if lower.contains("topic") {
        VerdictCategory::OffTopic
    } else if lower.contains("fact") {
        VerdictCategory::Factual
    } else {
        VerdictCategory::Other
    }
}
