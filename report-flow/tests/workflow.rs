use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use report_flow::{
    CaseMetadata, ExecutionStatus, FlowError, FlowRunner, InMemoryProtocolStore,
    InMemorySessionStorage, InterviewError, ModelCallError, ModelQuestionPolicy, QuestionId,
    Response, Stage, TextCompletion, case_workflow, prompts,
};

const CHECKLIST: &str = r#"```json
{"checklist": [
  {"category": "Initial Assessment", "subcategories": [{"name": "Workflow", "items": ["Scroll through all images"]}]},
  {"category": "Lungs", "subcategories": [{"name": "Parenchyma", "items": ["nodules", "effusion", "Compare to prior"]}]},
  {"category": "Pleura", "subcategories": [{"name": "Effusion", "items": ["pneumothorax"]}]}
]}
```"#;

const PHRASED: &str = r#"[
  {"id": "specific_1_0", "question": "Are there any pulmonary nodules?"},
  {"id": "specific_1_1", "question": "Is there a pleural effusion?"},
  {"id": "specific_2_0", "question": "Is there a pneumothorax?"}
]"#;

/// Answers by system prompt so the test does not depend on call order.
#[derive(Default)]
struct FakeModel {
    calls: Mutex<Vec<&'static str>>,
}

impl FakeModel {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextCompletion for FakeModel {
    async fn invoke(
        &self,
        system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<String, ModelCallError> {
        let (name, reply) = match system_prompt {
            p if p == prompts::CHECKLIST_SYSTEM_PROMPT => ("checklist", Ok(CHECKLIST)),
            p if p == prompts::QUESTION_PHRASING_SYSTEM_PROMPT => ("phrasing", Ok(PHRASED)),
            p if p == prompts::REFINEMENT_SYSTEM_PROMPT => {
                ("refinement", Err("refinement offline"))
            }
            p if p == prompts::FOLLOW_UP_SYSTEM_PROMPT => ("follow_up", Ok("[]")),
            p if p == prompts::OBSERVATIONS_SYSTEM_PROMPT => (
                "observations",
                Ok("LUNGS:\nA mild effusion is noted. Rest of the parenchyma appears normal.\n\nPLEURA:\nNo pneumothorax."),
            ),
            p if p == prompts::IMPRESSION_SYSTEM_PROMPT => ("impression", Ok("Mild effusion.")),
            _ => ("unknown", Err("unexpected prompt")),
        };
        self.calls.lock().unwrap().push(name);
        reply.map(str::to_string).map_err(ModelCallError::new)
    }
}

fn runner(model: Arc<FakeModel>) -> FlowRunner {
    let protocols = InMemoryProtocolStore::new();
    protocols.insert(
        "ct_chest",
        vec![
            "Lungs: nodules, consolidation, effusion.".to_string(),
            "Pleura: pneumothorax.".to_string(),
        ],
    );
    let policy = Arc::new(ModelQuestionPolicy::new(model.clone()));
    let workflow = case_workflow(model, Arc::new(protocols), policy, BTreeMap::new());
    FlowRunner::new(Arc::new(workflow), Arc::new(InMemorySessionStorage::new()))
}

fn case(id: &str) -> CaseMetadata {
    CaseMetadata::new("65", "Male", "Shortness of breath", "ct_chest").with_case_id(id)
}

#[tokio::test]
async fn complete_case_produces_grounded_report() {
    let model = Arc::new(FakeModel::default());
    let runner = runner(model.clone());

    let (session, first) = runner.start(case("case_a")).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::WaitingForInput);
    assert_eq!(
        first.response.as_deref(),
        Some("Are there any abnormalities in the Parenchyma?")
    );
    assert_eq!(session.current_stage, Stage::Interview);

    let next = runner.submit_answer("case_a", Response::Yes, "").await.unwrap();
    assert_eq!(next.response.as_deref(), Some("Are there any pulmonary nodules?"));

    let next = runner.submit_answer("case_a", Response::No, "").await.unwrap();
    // Refinement fails and the original text is kept.
    assert_eq!(next.response.as_deref(), Some("Is there a pleural effusion?"));

    let next = runner
        .submit_answer("case_a", Response::Yes, "mild effusion")
        .await
        .unwrap();
    assert_eq!(
        next.response.as_deref(),
        Some("Are there any abnormalities in the Effusion?")
    );

    let done = runner.submit_answer("case_a", Response::No, "").await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(done.response.unwrap().contains("## Impression\nMild effusion."));

    let session = runner.load("case_a").await.unwrap();
    let report = session.report.expect("report stored");
    assert_eq!(report.case_id, "case_a");
    assert_eq!(report.report.history, "Shortness of breath");
    assert_eq!(
        report.report.technique,
        "Volume scan of chest was done without IV contrast."
    );
    assert!(report.report.observations.contains("Rest of the parenchyma appears normal"));
    let items: Vec<&str> = report.findings.iter().map(|f| f.item.as_str()).collect();
    assert_eq!(items, vec!["screening_0", "specific_1_1"]);
    assert_eq!(session.interview.answers().len(), 4);
    assert!(
        session
            .interview
            .answers()
            .iter()
            .any(|a| a.question_id == QuestionId::Screening(1))
    );

    let calls = model.calls();
    assert_eq!(&calls[..2], &["checklist", "phrasing"]);
    assert!(calls.contains(&"follow_up"));
    assert_eq!(&calls[calls.len() - 2..], &["observations", "impression"]);

    let err = runner
        .submit_answer("case_a", Response::Yes, "")
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Interview(InterviewError::Completed)));
}

#[tokio::test]
async fn missing_protocol_halts_before_any_question() {
    let model = Arc::new(FakeModel::default());
    let runner = runner(model.clone());
    let case =
        CaseMetadata::new("40", "Female", "Back pain", "mri_lumbar_spine").with_case_id("case_b");

    let err = runner.start(case).await.unwrap_err();

    assert!(err.is_fatal());
    assert!(err.to_string().contains("mri_lumbar_spine"));
    assert!(model.calls().is_empty());
    assert!(matches!(
        runner.load("case_b").await,
        Err(FlowError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn reset_restarts_the_interview_from_compiled_questions() {
    let model = Arc::new(FakeModel::default());
    let runner = runner(model);

    runner.start(case("case_c")).await.unwrap();
    runner.submit_answer("case_c", Response::Yes, "").await.unwrap();
    runner.submit_answer("case_c", Response::Yes, "6 mm nodule").await.unwrap();

    let restarted = runner.reset("case_c").await.unwrap();

    assert_eq!(
        restarted.response.as_deref(),
        Some("Are there any abnormalities in the Parenchyma?")
    );
    let session = runner.load("case_c").await.unwrap();
    assert!(session.interview.answers().is_empty());
    assert_eq!(session.interview.questions().len(), 5);
    assert_eq!(session.interview.progress().visible_total, 2);
}

#[tokio::test]
async fn blank_metadata_and_unknown_sessions_are_rejected() {
    let runner = runner(Arc::new(FakeModel::default()));

    let blank = CaseMetadata::new("", "Male", "Cough", "ct_chest");
    assert!(matches!(
        runner.start(blank).await,
        Err(FlowError::InvalidInput(_))
    ));
    assert!(matches!(
        runner.submit_answer("nope", Response::No, "").await,
        Err(FlowError::SessionNotFound(_))
    ));
}
