use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::{FlowError, Result},
    storage::CaseSession,
    task::{NextAction, Stage, Task},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    WaitingForInput,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
}

/// The four case stages wired in order.
pub struct Workflow {
    tasks: HashMap<Stage, Arc<dyn Task>>,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }

    /// Runs the session's current stage. Stages answering
    /// `ContinueAndExecute` hand over to the next stage within the same call.
    pub async fn execute_session(&self, session: &mut CaseSession) -> Result<ExecutionResult> {
        let stage = session.current_stage;
        let task = self
            .tasks
            .get(&stage)
            .ok_or_else(|| FlowError::TaskNotFound(stage.to_string()))?;

        debug!(session_id = %session.id, stage = %stage, "Executing stage");
        let result = task.run(session).await?;
        session.status_message = result.status_message.clone();

        match result.next_action {
            NextAction::ContinueAndExecute => match stage.next() {
                Some(next) => {
                    info!(session_id = %session.id, from = %stage, to = %next, "Advancing stage");
                    session.current_stage = next;
                    Box::pin(self.execute_session(session)).await
                }
                None => Ok(ExecutionResult {
                    response: result.response,
                    status: ExecutionStatus::Completed,
                }),
            },
            NextAction::WaitForInput => Ok(ExecutionResult {
                response: result.response,
                status: ExecutionStatus::WaitingForInput,
            }),
            NextAction::End => Ok(ExecutionResult {
                response: result.response,
                status: ExecutionStatus::Completed,
            }),
        }
    }
}

#[derive(Default)]
pub struct WorkflowBuilder {
    tasks: HashMap<Stage, Arc<dyn Task>>,
}

impl WorkflowBuilder {
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.insert(task.stage(), task);
        self
    }

    pub fn build(self) -> Workflow {
        Workflow { tasks: self.tasks }
    }
}
