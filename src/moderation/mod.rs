//! Moderation: verdicts, the evaluator seam, and the per-message pipeline.

pub mod evaluator;
pub mod openai;
pub mod pipeline;
pub mod verdict;

pub use evaluator::{BoundedEvaluator, TextEvaluator, DEFAULT_EVALUATOR_TIMEOUT};
pub use openai::OpenAiEvaluator;
pub use pipeline::{ModerationPipeline, MotionRuling, SharedPipeline};
pub use verdict::{parse_raw_verdict, Verdict, VerdictCategory};
