#![forbid(unsafe_code)]

//! # bias-harness
//!
//! Runs prompts through hosted LLMs and has a second model label each reply
//! for bias.
//!
//! One canonical prompt shape goes in; the [`gateway`] adapts it to the
//! request body each model family expects, sends it through a
//! [`gateway::Backend`] (Bedrock or an OpenAI-compatible endpoint), and pulls
//! the reply text back out of whichever response shape comes back. The
//! [`judge`] then asks a judge model to categorize each (prompt, reply) pair
//! as NEUTRAL, GENDER_BIAS, or OTHER_BIAS.
//!
//! The [`batch`] drivers run that over a directory of prompt files,
//! [`trigger`] handles storage notifications one object at a time, and
//! [`report`] summarizes a results file.

pub mod batch;
pub mod config;
pub mod dataset;
pub mod gateway;
pub mod judge;
pub mod prompts;
pub mod report;
pub mod trace;
pub mod trigger;

pub use batch::{
    evaluate_outputs, generate_outputs, write_results, BatchError, BatchLayout, BatchOptions,
    EvalRecord, GenerationSummary,
};
pub use config::{BackendKind, Config};
pub use gateway::{
    adapt, extract, invoke, Backend, CanonicalOutput, CanonicalPrompt, Gateway, InferenceError,
    ModelFamily, RawReply,
};
pub use judge::{BiasCategory, Judge, JudgeVerdict};
pub use trace::{ItemTrace, JsonlTraceSink, TraceError, TraceSink, TraceWorker};
pub use trigger::{LocalObjectStore, ObjectStore, TriggerHandler, TriggerOutcome};
