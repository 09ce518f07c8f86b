//! # report-flow
//!
//! Turns an imaging study into a structured radiology report:
//!
//! 1. protocol text for the study type is looked up ([`ProtocolStore`]);
//! 2. a language model drafts a Category → Subcategory → finding checklist
//!    ([`ChecklistGenerator`]);
//! 3. the checklist becomes screening questions with gated specific questions
//!    ([`QuestionCompiler`]);
//! 4. the radiologist answers one question at a time ([`AnswerSession`]);
//! 5. answers are grouped into findings ([`FindingsAggregator`]) and written up
//!    as a report ([`ReportComposer`]).
//!
//! Every model call goes through [`TextCompletion`]. Ids, gating and grounding
//! are enforced locally, so the whole pipeline runs against a scripted fake.
//! The stages are wired into a [`Workflow`] that a [`FlowRunner`] drives one
//! step per call over a [`SessionStorage`].

pub mod checklist;
pub mod compiler;
pub mod completion;
pub mod composer;
pub mod error;
pub mod findings;
pub mod grounding;
pub mod interview;
pub mod policy;
pub mod prompts;
pub mod protocol;
pub mod question;
pub mod report;
pub mod runner;
pub mod storage;
pub mod task;
pub mod tasks;
pub mod workflow;

// Re-export commonly used types
pub use checklist::{Category, Checklist, ChecklistGenerator, ChecklistItem, Subcategory};
pub use compiler::{CompiledQuestions, QuestionCompiler, fallback_questions};
pub use completion::{TextCompletion, parse_json_response, strip_code_fences};
pub use composer::ReportComposer;
pub use error::{FlowError, InterviewError, ModelCallError, QuestionSetError, Result};
pub use findings::{AggregatedFindings, FindingsAggregator, NO_DETAILS_MARKER};
pub use interview::{AnswerSession, InterviewState, Progress, SessionSummary};
pub use policy::{FollowUpRequest, ModelQuestionPolicy, QuestionPolicy, StaticQuestionPolicy};
pub use protocol::{InMemoryProtocolStore, ProtocolLibrary, ProtocolStore};
pub use question::{Answer, FollowUpGuide, KindTag, Question, QuestionId, QuestionKind, Response};
pub use report::{CaseMetadata, Finding, PatientInfo, Report, ReportSections};
pub use runner::FlowRunner;
pub use storage::{
    CaseSession, InMemorySessionStorage, PendingAnswer, PostgresSessionStorage, SessionStorage,
};
pub use task::{NextAction, Stage, Task, TaskResult};
pub use tasks::case_workflow;
pub use workflow::{ExecutionResult, ExecutionStatus, Workflow, WorkflowBuilder};

#[cfg(feature = "rig")]
pub use completion::RigCompletion;
