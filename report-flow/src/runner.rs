//! FlowRunner – loads a case session, executes exactly one workflow step and
//! persists the updated session back to storage.
//!
//! Every public call is a load → execute → save round trip, so an HTTP handler
//! or terminal loop only ever deals in session ids. A step that fails is not
//! saved: the stored session stays where it was and the call can be repeated.

use std::sync::Arc;
use tracing::info;

use crate::{
    error::{FlowError, InterviewError, Result},
    question::Response,
    report::CaseMetadata,
    storage::{CaseSession, PendingAnswer, SessionStorage},
    task::Stage,
    workflow::{ExecutionResult, Workflow},
};

#[derive(Clone)]
pub struct FlowRunner {
    workflow: Arc<Workflow>,
    storage: Arc<dyn SessionStorage>,
}

impl FlowRunner {
    pub fn new(workflow: Arc<Workflow>, storage: Arc<dyn SessionStorage>) -> Self {
        Self { workflow, storage }
    }

    /// Creates the case session and runs it up to the first question.
    pub async fn start(&self, case: CaseMetadata) -> Result<(CaseSession, ExecutionResult)> {
        case.validate()?;
        if self.storage.get(&case.case_id).await?.is_some() {
            return Err(FlowError::InvalidInput(format!(
                "case {} already exists",
                case.case_id
            )));
        }
        info!(case_id = %case.case_id, study_type = %case.study_type, "Starting case");

        let mut session = CaseSession::new(case);
        let result = self.workflow.execute_session(&mut session).await?;
        self.storage.save(session.clone()).await?;
        Ok((session, result))
    }

    pub async fn run(&self, session_id: &str) -> Result<ExecutionResult> {
        let mut session = self.load(session_id).await?;
        let result = self.workflow.execute_session(&mut session).await?;
        self.storage.save(session).await?;
        Ok(result)
    }

    /// Answers the current question and runs on to the next one (or to the
    /// report once the interview is over).
    pub async fn submit_answer(
        &self,
        session_id: &str,
        response: Response,
        details: impl Into<String>,
    ) -> Result<ExecutionResult> {
        let mut session = self.load(session_id).await?;
        if session.current_stage != Stage::Interview || session.interview.is_completed() {
            return Err(InterviewError::Completed.into());
        }
        session.pending_answer = Some(PendingAnswer {
            response,
            details: details.into(),
        });

        let result = self.workflow.execute_session(&mut session).await?;
        self.storage.save(session).await?;
        Ok(result)
    }

    /// Restarts the interview from the compiled questions.
    pub async fn reset(&self, session_id: &str) -> Result<ExecutionResult> {
        let mut session = self.load(session_id).await?;
        session.restart_interview()?;
        info!(session_id, "Interview reset");

        let result = self.workflow.execute_session(&mut session).await?;
        self.storage.save(session).await?;
        Ok(result)
    }

    pub async fn load(&self, session_id: &str) -> Result<CaseSession> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }
}
