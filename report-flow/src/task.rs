use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{error::Result, storage::CaseSession};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    GenerateChecklist,
    CompileQuestions,
    Interview,
    ComposeReport,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::GenerateChecklist => Some(Stage::CompileQuestions),
            Stage::CompileQuestions => Some(Stage::Interview),
            Stage::Interview => Some(Stage::ComposeReport),
            Stage::ComposeReport => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::GenerateChecklist => "generate_checklist",
            Stage::CompileQuestions => "compile_questions",
            Stage::Interview => "interview",
            Stage::ComposeReport => "compose_report",
        };
        f.write_str(name)
    }
}

/// Result of a task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Response to send to the user
    pub response: Option<String>,
    /// Next action to take
    pub next_action: NextAction,
    pub status_message: Option<String>,
}

impl TaskResult {
    pub fn new(response: Option<String>, next_action: NextAction) -> Self {
        Self {
            response,
            next_action,
            status_message: None,
        }
    }

    pub fn new_with_status(
        response: Option<String>,
        next_action: NextAction,
        status_message: impl Into<String>,
    ) -> Self {
        Self {
            response,
            next_action,
            status_message: Some(status_message.into()),
        }
    }
}

/// Defines what should happen after a task completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Move to the next stage and run it in the same step
    ContinueAndExecute,
    /// Stay on this stage until the next input arrives
    WaitForInput,
    /// The case is finished
    End,
}

/// One pipeline stage operating on a case session.
#[async_trait]
pub trait Task: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self, session: &mut CaseSession) -> Result<TaskResult>;
}
