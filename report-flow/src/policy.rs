//! Optional quality layers on top of the gating core: question refinement and
//! dynamic follow-ups. The session enforces ids, scoping and language rules on
//! whatever a policy returns.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::completion::{TextCompletion, parse_json_response};
use crate::error::ModelCallError;
use crate::prompts;
use crate::question::{Answer, Question};

/// Everything a follow-up generator may look at.
#[derive(Debug, Clone, Copy)]
pub struct FollowUpRequest<'a> {
    pub answered: &'a Answer,
    /// Checklist items of the answered question's subcategory only.
    pub subcategory_items: &'a [String],
    pub prior_positive: &'a [Answer],
}

#[async_trait]
pub trait QuestionPolicy: Send + Sync {
    /// Rewrites a question given the positive findings recorded so far.
    async fn refine(
        &self,
        question: &Question,
        prior_positive: &[Answer],
    ) -> Result<String, ModelCallError>;

    /// Proposes extra yes/no questions after a positive specific answer.
    async fn follow_ups(&self, request: FollowUpRequest<'_>) -> Result<Vec<String>, ModelCallError>;
}

/// Asks nothing extra and never rewrites.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticQuestionPolicy;

#[async_trait]
impl QuestionPolicy for StaticQuestionPolicy {
    async fn refine(
        &self,
        question: &Question,
        _prior_positive: &[Answer],
    ) -> Result<String, ModelCallError> {
        Ok(question.prompt_text.clone())
    }

    async fn follow_ups(
        &self,
        _request: FollowUpRequest<'_>,
    ) -> Result<Vec<String>, ModelCallError> {
        Ok(Vec::new())
    }
}

/// Model-backed policy. Each layer can be switched off independently.
pub struct ModelQuestionPolicy {
    model: Arc<dyn TextCompletion>,
    refine_questions: bool,
    dynamic_follow_ups: bool,
}

impl ModelQuestionPolicy {
    pub fn new(model: Arc<dyn TextCompletion>) -> Self {
        Self {
            model,
            refine_questions: true,
            dynamic_follow_ups: true,
        }
    }

    pub fn with_refinement(mut self, enabled: bool) -> Self {
        self.refine_questions = enabled;
        self
    }

    pub fn with_follow_ups(mut self, enabled: bool) -> Self {
        self.dynamic_follow_ups = enabled;
        self
    }
}

fn describe_positives(answers: &[Answer]) -> String {
    answers
        .iter()
        .map(|a| {
            let details = if a.details.trim().is_empty() {
                "no details"
            } else {
                a.details.trim()
            };
            format!("- {} > {}: {} ({})", a.category, a.subcategory, a.question_text, details)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl QuestionPolicy for ModelQuestionPolicy {
    async fn refine(
        &self,
        question: &Question,
        prior_positive: &[Answer],
    ) -> Result<String, ModelCallError> {
        if !self.refine_questions || prior_positive.is_empty() {
            return Ok(question.prompt_text.clone());
        }
        let previous_findings = describe_positives(prior_positive);
        let user_prompt = prompts::render(
            prompts::REFINEMENT_USER_PROMPT,
            &[
                ("previous_findings", previous_findings.as_str()),
                ("current_question", question.prompt_text.as_str()),
            ],
        );
        let raw = self
            .model
            .invoke(prompts::REFINEMENT_SYSTEM_PROMPT, &user_prompt)
            .await?;
        let refined = raw.trim().trim_matches('"').trim().to_string();
        debug!(question_id = %question.id, refined = %refined, "Question refined");
        Ok(refined)
    }

    async fn follow_ups(
        &self,
        request: FollowUpRequest<'_>,
    ) -> Result<Vec<String>, ModelCallError> {
        if !self.dynamic_follow_ups || request.subcategory_items.is_empty() {
            return Ok(Vec::new());
        }
        let items = request
            .subcategory_items
            .iter()
            .map(|item| format!("- {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        let previous_findings = describe_positives(request.prior_positive);
        let answered = request.answered;
        let user_prompt = prompts::render(
            prompts::FOLLOW_UP_USER_PROMPT,
            &[
                ("category", answered.category.as_str()),
                ("subcategory", answered.subcategory.as_str()),
                ("items", items.as_str()),
                ("question", answered.question_text.as_str()),
                ("details", answered.details.as_str()),
                ("previous_findings", previous_findings.as_str()),
            ],
        );
        let raw = self
            .model
            .invoke(prompts::FOLLOW_UP_SYSTEM_PROMPT, &user_prompt)
            .await?;
        parse_json_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedCompletion;
    use crate::question::{KindTag, QuestionId, Response};

    fn positive() -> Answer {
        Answer {
            question_id: QuestionId::Specific { category: 0, item: 0 },
            question_text: "Are there any pulmonary nodules?".into(),
            category: "Lungs".into(),
            subcategory: "Parenchyma".into(),
            response: Response::Yes,
            details: "6 mm nodule right upper lobe".into(),
            kind: KindTag::Specific,
        }
    }

    #[tokio::test]
    async fn refinement_is_skipped_without_prior_positives() {
        let model = Arc::new(ScriptedCompletion::new());
        let policy = ModelQuestionPolicy::new(model.clone());
        let question = Question::screening(0, "Lungs", "Parenchyma");

        let text = policy.refine(&question, &[]).await.unwrap();
        assert_eq!(text, question.prompt_text);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn refinement_sends_prior_findings_and_trims_quotes() {
        let model =
            Arc::new(ScriptedCompletion::new().reply("\"Are there any additional nodules?\"\n"));
        let policy = ModelQuestionPolicy::new(model.clone());
        let question = Question::screening(0, "Lungs", "Parenchyma");

        let text = policy.refine(&question, &[positive()]).await.unwrap();
        assert_eq!(text, "Are there any additional nodules?");
        assert!(model.user_prompt(0).contains("6 mm nodule right upper lobe"));
    }

    #[tokio::test]
    async fn follow_ups_are_scoped_to_subcategory_items() {
        let model =
            Arc::new(ScriptedCompletion::new().reply(r#"["Is there a spiculated margin?"]"#));
        let policy = ModelQuestionPolicy::new(model.clone());
        let answered = positive();
        let items = vec!["nodules".to_string(), "masses".to_string()];

        let questions = policy
            .follow_ups(FollowUpRequest {
                answered: &answered,
                subcategory_items: &items,
                prior_positive: std::slice::from_ref(&answered),
            })
            .await
            .unwrap();

        assert_eq!(questions, vec!["Is there a spiculated margin?".to_string()]);
        let prompt = model.user_prompt(0);
        assert!(prompt.contains("- nodules\n- masses"));
        assert!(prompt.contains("Lungs > Parenchyma"));
    }

    #[tokio::test]
    async fn disabled_layers_make_no_model_calls() {
        let model = Arc::new(ScriptedCompletion::new());
        let policy = ModelQuestionPolicy::new(model.clone())
            .with_refinement(false)
            .with_follow_ups(false);
        let answered = positive();
        let items = vec!["nodules".to_string()];

        let question = Question::screening(0, "Lungs", "Parenchyma");
        assert_eq!(
            policy.refine(&question, &[answered.clone()]).await.unwrap(),
            question.prompt_text
        );
        let request = FollowUpRequest {
            answered: &answered,
            subcategory_items: &items,
            prior_positive: &[],
        };
        assert!(policy.follow_ups(request).await.unwrap().is_empty());
        assert!(StaticQuestionPolicy.follow_ups(request).await.unwrap().is_empty());
        assert_eq!(model.calls(), 0);
    }
}
