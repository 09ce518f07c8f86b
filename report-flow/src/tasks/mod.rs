// Case pipeline stages
pub mod compile_questions;
pub mod compose_report;
pub mod generate_checklist;
pub mod interview;

pub use compile_questions::CompileQuestionsTask;
pub use compose_report::ComposeReportTask;
pub use generate_checklist::GenerateChecklistTask;
pub use interview::InterviewTask;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::checklist::ChecklistGenerator;
use crate::compiler::QuestionCompiler;
use crate::completion::TextCompletion;
use crate::composer::ReportComposer;
use crate::policy::QuestionPolicy;
use crate::protocol::ProtocolStore;
use crate::workflow::Workflow;

/// Wires the four stages over one model, protocol store and question policy.
pub fn case_workflow(
    model: Arc<dyn TextCompletion>,
    protocols: Arc<dyn ProtocolStore>,
    policy: Arc<dyn QuestionPolicy>,
    techniques: BTreeMap<String, String>,
) -> Workflow {
    Workflow::builder()
        .add_task(Arc::new(GenerateChecklistTask::new(
            protocols,
            ChecklistGenerator::new(model.clone()),
        )))
        .add_task(Arc::new(CompileQuestionsTask::new(QuestionCompiler::new(
            model.clone(),
        ))))
        .add_task(Arc::new(InterviewTask::new(policy)))
        .add_task(Arc::new(ComposeReportTask::new(
            ReportComposer::new(model).with_techniques(techniques),
        )))
        .build()
}
