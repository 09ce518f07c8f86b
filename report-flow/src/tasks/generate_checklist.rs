use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::checklist::ChecklistGenerator;
use crate::error::Result;
use crate::protocol::{ProtocolStore, protocol_excerpt};
use crate::storage::CaseSession;
use crate::task::{NextAction, Stage, Task, TaskResult};

/// Looks up protocol text and asks the model for the case checklist. Both
/// failure kinds are fatal and leave the session on this stage for a retry.
pub struct GenerateChecklistTask {
    protocols: Arc<dyn ProtocolStore>,
    generator: ChecklistGenerator,
}

impl GenerateChecklistTask {
    pub fn new(protocols: Arc<dyn ProtocolStore>, generator: ChecklistGenerator) -> Self {
        Self {
            protocols,
            generator,
        }
    }
}

#[async_trait]
impl Task for GenerateChecklistTask {
    fn stage(&self) -> Stage {
        Stage::GenerateChecklist
    }

    async fn run(&self, session: &mut CaseSession) -> Result<TaskResult> {
        info!(
            session_id = %session.id,
            study_type = %session.case.study_type,
            "running task: {}",
            self.stage()
        );
        session.case.validate()?;

        let chunks = self.protocols.lookup(&session.case.study_type).await?;
        let checklist = self.generator.generate(&session.case, &chunks).await?;
        let item_count = checklist.items().count();

        session.protocol_excerpt = protocol_excerpt(&chunks);
        session.checklist = Some(checklist);

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            format!("Checklist generated with {item_count} items"),
        ))
    }
}
