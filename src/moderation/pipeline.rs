//! The moderation pipeline: one message, every configured policy.
//!
//! Each accepted user message is run past all active policy prompts. Per
//! policy, the evaluator sees the policy prompt, the recent message window,
//! the current message, the speaker, and the speaker's running violation
//! count. Verdicts come back in policy declaration order; evaluator
//! failures degrade to no intervention and never block the message itself.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::evaluator::TextEvaluator;
use super::verdict::{parse_raw_verdict, Verdict};
use crate::message::Message;
use crate::policy::DebatePolicy;

/// Shared reference to a pipeline.
pub type SharedPipeline = Arc<ModerationPipeline>;

/// Outcome of adjudicating one motion clarification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionRuling {
    /// Clarification accepted: retract the point.
    Valid,
    /// Clarification rejected: the point stands, one more is added.
    Invalid,
    /// Evaluator unavailable: close without the extra point.
    Unavailable,
}

/// Runs messages past the configured policies via the external evaluator.
pub struct ModerationPipeline {
    evaluator: Arc<dyn TextEvaluator>,
}

impl ModerationPipeline {
    pub fn new(evaluator: Arc<dyn TextEvaluator>) -> Self {
        Self { evaluator }
    }

    pub fn shared(self) -> SharedPipeline {
        Arc::new(self)
    }

    /// Evaluate `message` against every active policy entry.
    ///
    /// Calls run concurrently but the returned verdicts follow policy
    /// declaration order. This never errors: per-policy failures are
    /// logged and yield a silent verdict.
    pub async fn evaluate(
        &self,
        policy: &DebatePolicy,
        window: &[Message],
        message: &Message,
        speaker_violations: u32,
    ) -> Vec<Verdict> {
        let context = format_context_prompt(window, message, speaker_violations);

        let calls = policy.active_entries().map(|entry| {
            let context = context.clone();
            async move {
                match self.evaluator.evaluate(&entry.prompt_text, &context).await {
                    Ok(raw) => parse_raw_verdict(entry, &raw),
                    Err(e) => {
                        warn!(policy = %entry.name, "evaluator call failed, failing open: {}", e);
                        Verdict::no_intervention(entry)
                    }
                }
            }
        });

        let verdicts = join_all(calls).await;
        debug!(
            message_id = %message.id,
            policies = verdicts.len(),
            interventions = verdicts.iter().filter(|v| v.should_intervene).count(),
            "moderation pass complete"
        );
        verdicts
    }

    /// Re-evaluate a contested verdict against the speaker's clarification.
    pub async fn adjudicate_motion(
        &self,
        verdict: &Verdict,
        clarification: &str,
        window: &[Message],
    ) -> MotionRuling {
        let policy_prompt = format_adjudication_policy();
        let context = format_adjudication_context(verdict, clarification, window);

        let raw = match self.evaluator.evaluate(&policy_prompt, &context).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(policy = %verdict.policy_name, "motion adjudication failed: {}", e);
                return MotionRuling::Unavailable;
            }
        };

        parse_ruling(&raw)
    }
}

/// Build the per-message context prompt handed to the evaluator.
pub fn format_context_prompt(window: &[Message], message: &Message, violations: u32) -> String {
    let mut out = String::new();

    if !window.is_empty() {
        out.push_str("## Recent conversation\n\n");
        for m in window {
            out.push_str(&format!("[{}] {}: {}\n", m.kind, m.author, m.body));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "## Current message\n\nSpeaker: {} (violation points so far: {})\nMessage: {}\n\n",
        message.author, violations, message.body
    ));

    out.push_str(
        "Respond with JSON in this exact shape:\n\
         {\"shouldRespond\": true/false, \"response\": \"moderator text if intervening\", \
         \"reason\": \"short reason\", \"category\": \"insult|off_topic|factual|other\"}\n\
         If the message does not clearly violate the policy, shouldRespond must be false.",
    );

    out
}

fn format_adjudication_policy() -> String {
    "You adjudicate a motion: a debate participant contests a moderation point \
     assigned for a factual claim. Decide whether their clarification corrects \
     the error. Respond with JSON in this exact shape: \
     {\"valid\": true/false, \"reason\": \"short reason\"}"
        .to_string()
}

fn format_adjudication_context(verdict: &Verdict, clarification: &str, window: &[Message]) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "## Contested verdict\n\nPolicy: {}\nModerator text: {}\nReason: {}\n\n",
        verdict.policy_name, verdict.rendered_text, verdict.reason_text
    ));

    out.push_str(&format!("## Clarification\n\n{}\n\n", clarification));

    if !window.is_empty() {
        out.push_str("## Recent conversation\n\n");
        for m in window {
            out.push_str(&format!("{}: {}\n", m.author, m.body));
        }
    }

    out
}

/// Parse an adjudication reply; anything malformed closes without penalty.
fn parse_ruling(raw: &str) -> MotionRuling {
    #[derive(serde::Deserialize)]
    struct RawRuling {
        valid: bool,
    }

    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let body = body.strip_suffix("```").unwrap_or(body).trim();

    match serde_json::from_str::<RawRuling>(body) {
        Ok(r) if r.valid => MotionRuling::Valid,
        Ok(_) => MotionRuling::Invalid,
        Err(e) => {
            warn!("unparseable adjudication reply: {}", e);
            MotionRuling::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvaluatorError, EvaluatorResult};
    use crate::message::{Message, MessageId};
    use crate::policy::PolicyEntry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Evaluator that answers per policy prompt from a script.
    struct ScriptedEvaluator {
        replies: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedEvaluator {
        fn new(replies: Vec<(&str, &str)>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextEvaluator for ScriptedEvaluator {
        async fn evaluate(&self, policy_prompt: &str, _context: &str) -> EvaluatorResult<String> {
            self.calls.lock().unwrap().push(policy_prompt.to_string());
            match self.replies.get(policy_prompt) {
                Some(reply) => Ok(reply.clone()),
                None => Err(EvaluatorError::RequestFailed("no script entry".to_string())),
            }
        }
    }

    fn two_policy() -> DebatePolicy {
        DebatePolicy::with_entries(vec![
            PolicyEntry::new("Insults", "insult-prompt"),
            PolicyEntry::new("FactCheck", "fact-prompt"),
        ])
    }

    fn msg(body: &str) -> Message {
        Message::user(MessageId(1), "bob", body)
    }

    #[tokio::test]
    async fn test_verdicts_follow_declaration_order() {
        let evaluator = ScriptedEvaluator::new(vec![
            (
                "insult-prompt",
                r#"{"shouldRespond": true, "response": "Language.", "reason": "insult", "category": "insult"}"#,
            ),
            (
                "fact-prompt",
                r#"{"shouldRespond": true, "response": "Wrong claim.", "reason": "false", "category": "factual"}"#,
            ),
        ]);
        let pipeline = ModerationPipeline::new(Arc::new(evaluator));

        let verdicts = pipeline.evaluate(&two_policy(), &[], &msg("you fool"), 0).await;
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].policy_name, "Insults");
        assert_eq!(verdicts[1].policy_name, "FactCheck");
        assert!(verdicts.iter().all(|v| v.should_intervene));
    }

    #[tokio::test]
    async fn test_failed_policy_fails_open_without_blocking_others() {
        let evaluator = ScriptedEvaluator::new(vec![(
            "fact-prompt",
            r#"{"shouldRespond": true, "response": "Wrong.", "reason": "false", "category": "factual"}"#,
        )]);
        let pipeline = ModerationPipeline::new(Arc::new(evaluator));

        let verdicts = pipeline.evaluate(&two_policy(), &[], &msg("hmm"), 0).await;
        assert_eq!(verdicts.len(), 2);
        assert!(!verdicts[0].should_intervene); // call failed, fail-open
        assert!(verdicts[1].should_intervene);
    }

    #[tokio::test]
    async fn test_empty_policy_entries_are_skipped() {
        let evaluator = ScriptedEvaluator::new(vec![]);
        let pipeline = ModerationPipeline::new(Arc::new(evaluator));
        let policy = DebatePolicy::with_entries(vec![PolicyEntry::new("Empty", "  ")]);

        let verdicts = pipeline.evaluate(&policy, &[], &msg("hi"), 0).await;
        assert!(verdicts.is_empty());
    }

    #[tokio::test]
    async fn test_context_prompt_carries_window_and_violations() {
        let window = vec![
            Message::user(MessageId(1), "alice", "first point"),
            Message::user(MessageId(2), "bob", "counter point"),
        ];
        let message = Message::user(MessageId(3), "bob", "new claim");
        let context = format_context_prompt(&window, &message, 2);

        assert!(context.contains("first point"));
        assert!(context.contains("counter point"));
        assert!(context.contains("new claim"));
        assert!(context.contains("violation points so far: 2"));
        assert!(context.contains("shouldRespond"));
    }

    #[tokio::test]
    async fn test_adjudication_rulings() {
        let policy = PolicyEntry::new("FactCheck", "fact-prompt");
        let mut verdict = Verdict::no_intervention(&policy);
        verdict.should_intervene = true;

        struct FixedEvaluator(String);
        #[async_trait]
        impl TextEvaluator for FixedEvaluator {
            async fn evaluate(&self, _p: &str, _c: &str) -> EvaluatorResult<String> {
                Ok(self.0.clone())
            }
        }

        let pipeline =
            ModerationPipeline::new(Arc::new(FixedEvaluator(r#"{"valid": true}"#.to_string())));
        assert_eq!(
            pipeline.adjudicate_motion(&verdict, "I meant 2019", &[]).await,
            MotionRuling::Valid
        );

        let pipeline =
            ModerationPipeline::new(Arc::new(FixedEvaluator(r#"{"valid": false}"#.to_string())));
        assert_eq!(
            pipeline.adjudicate_motion(&verdict, "still wrong", &[]).await,
            MotionRuling::Invalid
        );

        let pipeline =
            ModerationPipeline::new(Arc::new(FixedEvaluator("garbage".to_string())));
        assert_eq!(
            pipeline.adjudicate_motion(&verdict, "??", &[]).await,
            MotionRuling::Unavailable
        );
    }
}
