use async_trait::async_trait;
use tracing::info;

use crate::compiler::QuestionCompiler;
use crate::error::{FlowError, Result};
use crate::interview::AnswerSession;
use crate::storage::CaseSession;
use crate::task::{NextAction, Stage, Task, TaskResult};

pub struct CompileQuestionsTask {
    compiler: QuestionCompiler,
}

impl CompileQuestionsTask {
    pub fn new(compiler: QuestionCompiler) -> Self {
        Self { compiler }
    }
}

#[async_trait]
impl Task for CompileQuestionsTask {
    fn stage(&self) -> Stage {
        Stage::CompileQuestions
    }

    async fn run(&self, session: &mut CaseSession) -> Result<TaskResult> {
        info!(session_id = %session.id, "running task: {}", self.stage());

        let checklist = session.checklist.as_ref().ok_or_else(|| {
            FlowError::InvalidInput(format!("case {} has no checklist", session.id))
        })?;
        let compiled = self
            .compiler
            .compile(checklist, &session.case.study_type)
            .await;

        session.interview = AnswerSession::new(compiled.questions.clone())?;
        let status = if compiled.used_fallback {
            format!(
                "Question compilation failed; using {} generic questions",
                compiled.questions.len()
            )
        } else {
            format!("Compiled {} questions", compiled.questions.len())
        };
        session.compiled = Some(compiled);

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            status,
        ))
    }
}
