use thiserror::Error;

use crate::question::QuestionId;

/// Failure of a single language-model call.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ModelCallError(pub String);

impl ModelCallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// First structural invariant a question set violates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionSetError {
    #[error("question set is empty")]
    Empty,

    #[error("duplicate question id {0}")]
    DuplicateId(QuestionId),

    #[error("{question} depends on {depends_on}, which is not in the set")]
    DanglingDependency {
        question: QuestionId,
        depends_on: QuestionId,
    },

    #[error("{question} depends on {depends_on}, which is not a screening question")]
    NotScreening {
        question: QuestionId,
        depends_on: QuestionId,
    },

    #[error("{question} and its screening question {depends_on} belong to different subcategories")]
    SubcategoryMismatch {
        question: QuestionId,
        depends_on: QuestionId,
    },

    #[error("subcategory {category} > {subcategory} has more than one screening question")]
    DuplicateScreening {
        category: String,
        subcategory: String,
    },

    #[error("screening question {0} gates no specific questions")]
    EmptyScreening(QuestionId),
}

/// Errors raised by the answer session state machine.
#[derive(Debug, Clone, Error)]
pub enum InterviewError {
    #[error("all questions have been answered")]
    Completed,

    #[error("unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("invalid question set: {0}")]
    Invalid(#[from] QuestionSetError),
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no protocol data found for study type '{study_type}'")]
    NoProtocolData { study_type: String },

    #[error("checklist generation failed: {0}")]
    ChecklistGeneration(String),

    #[error("question compilation failed: {0}")]
    QuestionCompilation(String),

    #[error("model call failed: {0}")]
    ModelCall(#[from] ModelCallError),

    #[error("interview error: {0}")]
    Interview(#[from] InterviewError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FlowError {
    /// Fatal pipeline errors halt the workflow; everything else is absorbed
    /// at the call site that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::NoProtocolData { .. } | FlowError::ChecklistGeneration(_)
        )
    }
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        FlowError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
