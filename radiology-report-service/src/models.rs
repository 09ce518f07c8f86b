use report_flow::{
    CaseMetadata, CaseSession, Progress, Question, QuestionKind, SessionSummary, Stage,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct StartCaseRequest {
    #[serde(default)]
    pub case_id: Option<String>,
    pub age: String,
    #[serde(default)]
    pub gender: String,
    pub clinical_history: String,
    pub study_type: String,
}

impl StartCaseRequest {
    /// Case metadata for this request. Without a client id the timestamp id
    /// gets a short random suffix so concurrent starts cannot collide.
    pub fn into_case(self) -> CaseMetadata {
        let case = CaseMetadata::new(self.age, self.gender, self.clinical_history, self.study_type);
        match self.case_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => case.with_case_id(id.trim()),
            None => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                let id = format!("{}_{}", case.case_id, &suffix[..8]);
                case.with_case_id(id)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub response: String,
    #[serde(default)]
    pub details: String,
}

/// The question the radiologist should answer next.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub category: String,
    pub subcategory: String,
    pub question: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Descriptor prompt for a positive specific finding.
    pub follow_up: Option<String>,
    pub is_dynamic: bool,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        let (kind, follow_up) = match &question.kind {
            QuestionKind::Screening => ("screening", None),
            QuestionKind::Specific { follow_up, .. } => ("specific", Some(follow_up.render())),
        };
        Self {
            id: question.id.to_string(),
            category: question.category.clone(),
            subcategory: question.subcategory.clone(),
            question: question.prompt_text.clone(),
            kind: kind.to_string(),
            follow_up,
            is_dynamic: question.is_dynamic,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseResponse {
    pub case_id: String,
    pub status: String,
    pub stage: Stage,
    pub status_message: Option<String>,
    pub study_type: String,
    pub current_question: Option<QuestionView>,
    pub progress: Progress,
    pub summary: SessionSummary,
    pub used_fallback_questions: bool,
    pub report_ready: bool,
    /// Text produced by the step that was just executed, if any.
    pub response: Option<String>,
}

impl CaseResponse {
    pub fn from_session(session: &CaseSession, response: Option<String>) -> Self {
        let current_question = match session.current_stage {
            Stage::Interview => session.interview.current().map(QuestionView::from),
            _ => None,
        };
        let status = if session.report.is_some() {
            "completed"
        } else if current_question.is_some() {
            "waiting_for_input"
        } else {
            "active"
        };

        Self {
            case_id: session.id.clone(),
            status: status.to_string(),
            stage: session.current_stage,
            status_message: session.status_message.clone(),
            study_type: session.case.study_type.clone(),
            current_question,
            progress: session.interview.progress(),
            summary: session.interview.summary(),
            used_fallback_questions: session
                .compiled
                .as_ref()
                .is_some_and(|c| c.used_fallback),
            report_ready: session.report.is_some(),
            response,
        }
    }
}
