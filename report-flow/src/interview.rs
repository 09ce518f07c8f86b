use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::InterviewError;
use crate::grounding::has_comparative_language;
use crate::policy::{FollowUpRequest, QuestionPolicy};
use crate::question::{Answer, Question, QuestionId, Response, validate_question_set};

/// Most follow-ups inserted after a single positive answer.
pub const MAX_FOLLOW_UPS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InterviewState {
    AwaitingQuestion { index: usize },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// One-based position of the current question, or `visible_total` once done.
    pub position: usize,
    pub visible_total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub answered: usize,
    pub positive_findings: usize,
    pub progress: Progress,
}

/// Dependency-gated traversal of one case's questions.
///
/// The visible list is derived from `ordered_questions` and
/// `screening_responses` on every call; only the index into it is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSession {
    ordered_questions: Vec<Question>,
    current_index: usize,
    answers: Vec<Answer>,
    screening_responses: BTreeMap<QuestionId, Response>,
    #[serde(default)]
    refined: HashSet<QuestionId>,
}

impl AnswerSession {
    pub fn new(questions: Vec<Question>) -> Result<Self, InterviewError> {
        validate_question_set(&questions)?;
        Ok(Self {
            ordered_questions: questions,
            ..Self::default()
        })
    }

    /// Screening questions in generation order, each followed by its
    /// dependents when it was answered Yes.
    pub fn visible_questions(&self) -> Vec<&Question> {
        let mut visible = Vec::new();
        for screening in self.ordered_questions.iter().filter(|q| q.is_screening()) {
            visible.push(screening);
            if self.screening_responses.get(&screening.id) == Some(&Response::Yes) {
                visible.extend(
                    self.ordered_questions
                        .iter()
                        .filter(|q| q.depends_on() == Some(screening.id)),
                );
            }
        }
        visible
    }

    pub fn state(&self) -> InterviewState {
        if self.current_index < self.visible_questions().len() {
            InterviewState::AwaitingQuestion {
                index: self.current_index,
            }
        } else {
            InterviewState::Completed
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state() == InterviewState::Completed
    }

    pub fn current(&self) -> Option<&Question> {
        self.visible_questions().get(self.current_index).copied()
    }

    pub fn questions(&self) -> &[Question] {
        &self.ordered_questions
    }

    /// Answers in presentation order.
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn positive_answers(&self) -> Vec<Answer> {
        self.answers.iter().filter(|a| a.is_positive()).cloned().collect()
    }

    pub fn screening_response(&self, id: QuestionId) -> Option<Response> {
        self.screening_responses.get(&id).copied()
    }

    pub fn progress(&self) -> Progress {
        let visible_total = self.visible_questions().len();
        Progress {
            position: (self.current_index + 1).min(visible_total),
            visible_total,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            answered: self.answers.len(),
            positive_findings: self.answers.iter().filter(|a| a.is_positive()).count(),
            progress: self.progress(),
        }
    }

    /// Records the answer to the current question and advances.
    pub fn record(
        &mut self,
        response: Response,
        details: impl Into<String>,
    ) -> Result<Answer, InterviewError> {
        let question = self.current().cloned().ok_or(InterviewError::Completed)?;
        let details = details.into();
        let answer = Answer {
            question_id: question.id,
            question_text: question.prompt_text.clone(),
            category: question.category.clone(),
            subcategory: question.subcategory.clone(),
            response,
            details: details.trim().to_string(),
            kind: question.tag(),
        };
        self.answers.push(answer.clone());
        if question.is_screening() {
            self.screening_responses.insert(question.id, response);
        }
        self.current_index += 1;
        debug!(
            question_id = %question.id,
            response = ?response,
            next_index = self.current_index,
            "Answer recorded"
        );
        Ok(answer)
    }

    /// Inserts follow-up questions directly after `after`, gated by the same
    /// screening question and numbered after the highest item of its category.
    /// Comparative texts and texts already asked in the subcategory are dropped.
    pub fn insert_follow_ups(
        &mut self,
        after: QuestionId,
        texts: Vec<String>,
    ) -> Result<Vec<QuestionId>, InterviewError> {
        let position = self
            .ordered_questions
            .iter()
            .position(|q| q.id == after)
            .ok_or(InterviewError::UnknownQuestion(after))?;
        let anchor = self.ordered_questions[position].clone();
        let (Some(screening_id), Some(guide), QuestionId::Specific { category, .. }) =
            (anchor.depends_on(), anchor.follow_up().cloned(), anchor.id)
        else {
            return Ok(Vec::new());
        };
        let Some(screening) = self
            .ordered_questions
            .iter()
            .find(|q| q.id == screening_id)
            .cloned()
        else {
            return Err(InterviewError::UnknownQuestion(screening_id));
        };

        let mut seen: HashSet<String> = self
            .ordered_questions
            .iter()
            .filter(|q| q.category == anchor.category && q.subcategory == anchor.subcategory)
            .map(|q| normalise_text(&q.prompt_text))
            .collect();
        let mut next_item = self
            .ordered_questions
            .iter()
            .filter_map(|q| match q.id {
                QuestionId::Specific { category: c, item } if c == category => Some(item),
                _ => None,
            })
            .max()
            .map_or(0, |max| max + 1);

        let mut inserted = Vec::new();
        for text in texts {
            let text = text.trim();
            if inserted.len() == MAX_FOLLOW_UPS {
                break;
            }
            if text.is_empty() || has_comparative_language(text) {
                warn!(after = %after, text, "Dropping follow-up question");
                continue;
            }
            if !seen.insert(normalise_text(text)) {
                continue;
            }
            let id = QuestionId::Specific {
                category,
                item: next_item,
            };
            next_item += 1;
            let mut question = Question::specific(id, &screening, text, guide.clone());
            question.is_dynamic = true;
            self.ordered_questions
                .insert(position + 1 + inserted.len(), question);
            inserted.push(id);
        }
        if !inserted.is_empty() {
            info!(after = %after, inserted = ?inserted, "Inserted follow-up questions");
        }
        Ok(inserted)
    }

    /// Replaces the text of a question; id, dependency and guide are kept.
    pub fn refine_question(&mut self, id: QuestionId, text: &str) -> Result<(), InterviewError> {
        let question = self
            .ordered_questions
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or(InterviewError::UnknownQuestion(id))?;
        *question = question.refined(text);
        Ok(())
    }

    /// Current question, refined against prior positive findings the first
    /// time it is shown. A failed or unusable rewrite keeps the original text.
    pub async fn present(&mut self, policy: &dyn QuestionPolicy) -> Option<Question> {
        let question = self.current()?.clone();
        if question.is_screening() || self.refined.contains(&question.id) {
            return Some(question);
        }
        self.refined.insert(question.id);

        let prior_positive = self.positive_answers();
        if prior_positive.is_empty() {
            return Some(question);
        }
        match policy.refine(&question, &prior_positive).await {
            Ok(text) if text.trim().is_empty() || text.trim() == question.prompt_text => {}
            Ok(text) if has_comparative_language(&text) => {
                warn!(question_id = %question.id, "Discarding comparative refinement");
            }
            Ok(text) => {
                let text = text.trim();
                if self.refine_question(question.id, text).is_ok() {
                    debug!(question_id = %question.id, "Question text refined");
                }
            }
            Err(e) => {
                warn!(question_id = %question.id, "Question refinement failed: {}", e);
            }
        }
        self.current().cloned()
    }

    /// Records an answer, adds follow-ups for positive specific answers and
    /// returns the next question, if any.
    pub async fn submit(
        &mut self,
        response: Response,
        details: impl Into<String>,
        policy: &dyn QuestionPolicy,
        subcategory_items: &[String],
    ) -> Result<Option<Question>, InterviewError> {
        let answer = self.record(response, details)?;
        if answer.is_positive() && !answer.question_id.is_screening() {
            let prior_positive = self.positive_answers();
            let request = FollowUpRequest {
                answered: &answer,
                subcategory_items,
                prior_positive: &prior_positive,
            };
            match policy.follow_ups(request).await {
                Ok(texts) => {
                    self.insert_follow_ups(answer.question_id, texts)?;
                }
                Err(e) => {
                    warn!(question_id = %answer.question_id, "Follow-up generation failed: {}", e);
                }
            }
        }
        if self.is_completed() {
            info!(answered = self.answers.len(), "Interview completed");
        }
        Ok(self.current().cloned())
    }

    /// Discards every question, answer and screening response.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn normalise_text(text: &str) -> String {
    text.trim()
        .trim_end_matches('?')
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
