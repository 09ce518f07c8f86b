use async_trait::async_trait;
use tracing::info;

use crate::composer::ReportComposer;
use crate::error::Result;
use crate::findings::FindingsAggregator;
use crate::report::Report;
use crate::storage::CaseSession;
use crate::task::{NextAction, Stage, Task, TaskResult};

pub struct ComposeReportTask {
    composer: ReportComposer,
}

impl ComposeReportTask {
    pub fn new(composer: ReportComposer) -> Self {
        Self { composer }
    }
}

#[async_trait]
impl Task for ComposeReportTask {
    fn stage(&self) -> Stage {
        Stage::ComposeReport
    }

    async fn run(&self, session: &mut CaseSession) -> Result<TaskResult> {
        // A finished case is returned as-is; regeneration happens after a restart.
        if let Some(report) = &session.report {
            return Ok(TaskResult::new(Some(report.to_markdown()), NextAction::End));
        }
        info!(session_id = %session.id, "running task: {}", self.stage());

        let answers = session.interview.answers();
        let findings = FindingsAggregator::aggregate(answers);
        let sections = self
            .composer
            .compose(&session.case, &findings, &session.protocol_excerpt)
            .await;
        let report = Report::new(&session.case, sections, answers);
        let markdown = report.to_markdown();
        session.report = Some(report);

        Ok(TaskResult::new_with_status(
            Some(markdown),
            NextAction::End,
            "Report generated",
        ))
    }
}
