use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::error::{InterviewError, Result};
use crate::policy::QuestionPolicy;
use crate::storage::CaseSession;
use crate::task::{NextAction, Stage, Task, TaskResult};

/// Consumes the pending answer, if any, then presents the next question and
/// waits. Hands over to report composition once nothing is left to ask.
pub struct InterviewTask {
    policy: Arc<dyn QuestionPolicy>,
}

impl InterviewTask {
    pub fn new(policy: Arc<dyn QuestionPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Task for InterviewTask {
    fn stage(&self) -> Stage {
        Stage::Interview
    }

    async fn run(&self, session: &mut CaseSession) -> Result<TaskResult> {
        if let Some(pending) = session.pending_answer.take() {
            let current = session
                .interview
                .current()
                .cloned()
                .ok_or(InterviewError::Completed)?;
            let items = session.subcategory_items(&current.category, &current.subcategory);
            info!(
                session_id = %session.id,
                question_id = %current.id,
                response = ?pending.response,
                "Recording answer"
            );
            session
                .interview
                .submit(pending.response, pending.details, self.policy.as_ref(), &items)
                .await?;
        }

        let Some(question) = session.interview.present(self.policy.as_ref()).await else {
            let summary = session.interview.summary();
            return Ok(TaskResult::new_with_status(
                None,
                NextAction::ContinueAndExecute,
                format!(
                    "Interview completed: {} answers, {} positive findings",
                    summary.answered, summary.positive_findings
                ),
            ));
        };

        let progress = session.interview.progress();
        Ok(TaskResult::new_with_status(
            Some(question.prompt_text),
            NextAction::WaitForInput,
            format!("Question {} of {}", progress.position, progress.visible_total),
        ))
    }
}
