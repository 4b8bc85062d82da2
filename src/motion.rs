//! Motion workflow: a bounded appeal over a single verdict.
//!
//! Only the sanctioned speaker may contest, only factual-claim verdicts
//! qualify, and a verdict is contested at most once. A rejected
//! clarification permits exactly one further attempt; the second rejection
//! closes the motion permanently. At most one motion is pending per room,
//! and a pending motion blocks normal turn advancement until it resolves
//! or its response window expires.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ValidationError, ValidationResult};
use crate::message::MessageId;
use crate::moderation::VerdictCategory;

/// Total clarification attempts allowed per contested verdict.
pub const MAX_MOTION_ATTEMPTS: u32 = 2;

/// State of one motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionOutcome {
    /// Opened, awaiting clarification or adjudication.
    Pending,
    /// Clarification accepted; the point was retracted.
    Valid,
    /// Closed with the point retained.
    Invalid,
    /// The targeted verdict was never contestable.
    NotApplicable,
}

impl std::fmt::Display for MotionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Valid => write!(f, "valid"),
            Self::Invalid => write!(f, "invalid"),
            Self::NotApplicable => write!(f, "not_applicable"),
        }
    }
}

/// One appeal against one verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionRecord {
    /// Id of the moderator message carrying the contested verdict.
    pub verdict_ref: MessageId,
    /// The sanctioned speaker who raised the motion.
    pub requester: String,
    /// Latest clarification text submitted.
    pub clarification: Option<String>,
    pub outcome: MotionOutcome,
    /// Clarification attempts consumed so far.
    pub attempts_used: u32,
    pub opened_at: DateTime<Utc>,
}

impl MotionRecord {
    fn open(verdict_ref: MessageId, requester: &str) -> Self {
        Self {
            verdict_ref,
            requester: requester.to_string(),
            clarification: None,
            outcome: MotionOutcome::Pending,
            attempts_used: 0,
            opened_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.outcome == MotionOutcome::Pending
    }
}

/// Per-room motion bookkeeping.
#[derive(Debug, Default)]
pub struct MotionWorkflow {
    records: HashMap<MessageId, MotionRecord>,
    pending: Option<MessageId>,
}

impl MotionWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The verdict currently under appeal, if any.
    pub fn pending_ref(&self) -> Option<MessageId> {
        self.pending
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn get(&self, verdict_ref: MessageId) -> Option<&MotionRecord> {
        self.records.get(&verdict_ref)
    }

    /// Open a motion against a verdict.
    pub fn request(
        &mut self,
        verdict_ref: MessageId,
        requester: &str,
        category: VerdictCategory,
        sanctioned: &str,
    ) -> ValidationResult<&MotionRecord> {
        if !category.is_contestable() || requester != sanctioned {
            return Err(ValidationError::NotApplicable);
        }
        if self.records.contains_key(&verdict_ref) {
            return Err(ValidationError::AlreadyUsed);
        }
        if self.pending.is_some() {
            return Err(ValidationError::MotionPending);
        }

        debug!(verdict = %verdict_ref, requester, "motion opened");
        self.pending = Some(verdict_ref);
        Ok(self
            .records
            .entry(verdict_ref)
            .or_insert_with(|| MotionRecord::open(verdict_ref, requester)))
    }

    /// Record a clarification submission ahead of adjudication.
    pub fn begin_clarification(
        &mut self,
        verdict_ref: MessageId,
        requester: &str,
        text: &str,
    ) -> ValidationResult<()> {
        let record = self
            .records
            .get_mut(&verdict_ref)
            .ok_or(ValidationError::NotApplicable)?;
        if record.requester != requester {
            return Err(ValidationError::NotApplicable);
        }
        if !record.is_open() || record.attempts_used >= MAX_MOTION_ATTEMPTS {
            return Err(ValidationError::AlreadyUsed);
        }
        record.clarification = Some(text.to_string());
        Ok(())
    }

    /// Clarification accepted: the motion closes as `Valid`.
    pub fn resolve_valid(&mut self, verdict_ref: MessageId) -> ValidationResult<()> {
        let record = self
            .records
            .get_mut(&verdict_ref)
            .filter(|r| r.is_open())
            .ok_or(ValidationError::NotApplicable)?;
        record.attempts_used += 1;
        record.outcome = MotionOutcome::Valid;
        self.pending = None;
        Ok(())
    }

    /// Clarification rejected. Returns whether one further attempt remains;
    /// the second rejection closes the motion permanently.
    pub fn resolve_invalid(&mut self, verdict_ref: MessageId) -> ValidationResult<bool> {
        let record = self
            .records
            .get_mut(&verdict_ref)
            .filter(|r| r.is_open())
            .ok_or(ValidationError::NotApplicable)?;
        record.attempts_used += 1;
        if record.attempts_used >= MAX_MOTION_ATTEMPTS {
            record.outcome = MotionOutcome::Invalid;
            self.pending = None;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    /// Response window elapsed without resolution: close as `Invalid`
    /// without consuming an attempt. Returns whether the motion was open.
    pub fn expire(&mut self, verdict_ref: MessageId) -> bool {
        match self.records.get_mut(&verdict_ref) {
            Some(record) if record.is_open() => {
                debug!(verdict = %verdict_ref, "motion window expired");
                record.outcome = MotionOutcome::Invalid;
                if self.pending == Some(verdict_ref) {
                    self.pending = None;
                }
                true
            }
            _ => false,
        }
    }
}
