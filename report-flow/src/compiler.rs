use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::checklist::{Category, Checklist};
use crate::completion::{TextCompletion, parse_json_response};
use crate::error::{FlowError, Result};
use crate::grounding::{
    has_comparative_language, is_procedural_category, is_procedural_item,
    remove_comparative_language,
};
use crate::prompts;
use crate::question::{FollowUpGuide, Question, QuestionId, QuestionKind, validate_question_set};

/// Result of compilation; `used_fallback` is set when the generic question set
/// replaced the compiled one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuestions {
    pub questions: Vec<Question>,
    pub used_fallback: bool,
}

#[derive(Debug, Serialize)]
struct PhrasingRequest<'a> {
    id: String,
    category: &'a str,
    subcategory: &'a str,
    finding: &'a str,
}

#[derive(Debug, Deserialize)]
struct PhrasedQuestion {
    id: String,
    question: String,
    /// Kept loose: a malformed guide only costs the guide, not the question.
    #[serde(default)]
    follow_up: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PhrasedFollowUp {
    location: String,
    size_extent: String,
    morphology: String,
    characteristics: String,
    associated_findings: String,
}

impl PhrasedFollowUp {
    fn into_guide(self) -> Option<FollowUpGuide> {
        let complete = [
            &self.location,
            &self.size_extent,
            &self.morphology,
            &self.characteristics,
            &self.associated_findings,
        ]
        .iter()
        .all(|field| !field.trim().is_empty());
        complete.then(|| FollowUpGuide {
            location: self.location,
            size_extent: self.size_extent,
            morphology: self.morphology,
            characteristics: self.characteristics,
            associated_findings: self.associated_findings,
        })
    }
}

/// Skeleton entry: the deterministic question plus the finding it came from.
struct Draft<'a> {
    question: Question,
    finding: Option<&'a str>,
}

/// Turns a checklist into gated questions. Ids, dependencies and guide
/// categories are assigned locally; the model only supplies wording.
pub struct QuestionCompiler {
    model: Arc<dyn TextCompletion>,
}

impl QuestionCompiler {
    pub fn new(model: Arc<dyn TextCompletion>) -> Self {
        Self { model }
    }

    pub async fn compile(&self, checklist: &Checklist, study_type: &str) -> CompiledQuestions {
        match self.try_compile(checklist, study_type).await {
            Ok(questions) => {
                info!(
                    study_type,
                    questions = questions.len(),
                    screening = questions.iter().filter(|q| q.is_screening()).count(),
                    "Questions compiled"
                );
                CompiledQuestions {
                    questions,
                    used_fallback: false,
                }
            }
            Err(e) => {
                warn!(study_type, "Using fallback questions: {}", e);
                CompiledQuestions {
                    questions: fallback_questions(study_type),
                    used_fallback: true,
                }
            }
        }
    }

    async fn try_compile(&self, checklist: &Checklist, study_type: &str) -> Result<Vec<Question>> {
        let drafts = build_skeleton(checklist, study_type);
        if drafts.is_empty() {
            return Err(FlowError::QuestionCompilation(
                "checklist has no clinical findings".to_string(),
            ));
        }

        let requests: Vec<PhrasingRequest<'_>> = drafts
            .iter()
            .filter_map(|draft| {
                draft.finding.map(|finding| PhrasingRequest {
                    id: draft.question.id.to_string(),
                    category: &draft.question.category,
                    subcategory: &draft.question.subcategory,
                    finding,
                })
            })
            .collect();
        let items_json = serde_json::to_string_pretty(&requests)
            .map_err(|e| FlowError::QuestionCompilation(e.to_string()))?;
        let user_prompt = prompts::render(
            prompts::QUESTION_PHRASING_USER_PROMPT,
            &[("study_type", study_type), ("items_json", items_json.as_str())],
        );

        let raw = self
            .model
            .invoke(prompts::QUESTION_PHRASING_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| FlowError::QuestionCompilation(e.to_string()))?;
        let phrased: Vec<PhrasedQuestion> = parse_json_response(&raw)
            .map_err(|e| FlowError::QuestionCompilation(e.to_string()))?;
        if phrased.is_empty() {
            return Err(FlowError::QuestionCompilation(
                "model returned no phrased questions".to_string(),
            ));
        }

        let mut by_id: HashMap<String, PhrasedQuestion> = phrased
            .into_iter()
            .map(|p| (p.id.trim().to_string(), p))
            .collect();
        let questions: Vec<Question> = drafts
            .into_iter()
            .map(|draft| match by_id.remove(&draft.question.id.to_string()) {
                Some(phrased) => apply_phrasing(draft.question, phrased),
                None => {
                    if draft.finding.is_some() {
                        debug!(id = %draft.question.id, "No phrasing returned; keeping local text");
                    }
                    draft.question
                }
            })
            .collect();

        validate_question_set(&questions)
            .map_err(|e| FlowError::QuestionCompilation(e.to_string()))?;
        Ok(questions)
    }
}

fn apply_phrasing(mut question: Question, phrased: PhrasedQuestion) -> Question {
    let text = phrased.question.trim();
    if !text.is_empty() && !has_comparative_language(text) {
        question.prompt_text = text.to_string();
    } else if !text.is_empty() {
        warn!(id = %question.id, "Discarding comparative phrasing: {}", text);
    }
    if let (Some(guide), QuestionKind::Specific { follow_up, .. }) = (
        phrased
            .follow_up
            .and_then(|value| serde_json::from_value::<PhrasedFollowUp>(value).ok())
            .and_then(PhrasedFollowUp::into_guide),
        &mut question.kind,
    ) {
        *follow_up = guide;
    }
    question
}

/// Walks categories then subcategories top to bottom. Procedural categories
/// and items are dropped; subcategories left without items get no screening
/// question. Repeated subcategory names share one screening question.
fn build_skeleton<'a>(checklist: &'a Checklist, study_type: &str) -> Vec<Draft<'a>> {
    let mut drafts = Vec::new();
    let mut screening_counter = 0;

    for (category_index, category) in checklist.checklist.iter().enumerate() {
        if is_procedural_category(&category.category) {
            debug!(category = %category.category, "Skipping procedural category");
            continue;
        }
        let mut item_index = 0;
        for (name, findings) in merged_subcategories(category) {
            if findings.is_empty() {
                continue;
            }

            let screening = Question::screening(screening_counter, &category.category, name);
            screening_counter += 1;

            let specifics: Vec<Draft<'a>> = findings
                .into_iter()
                .map(|finding| {
                    let id = QuestionId::Specific {
                        category: category_index,
                        item: item_index,
                    };
                    item_index += 1;
                    Draft {
                        question: Question::specific(
                            id,
                            &screening,
                            default_question_text(finding),
                            default_follow_up(finding, study_type),
                        ),
                        finding: Some(finding),
                    }
                })
                .collect();

            drafts.push(Draft {
                question: screening,
                finding: None,
            });
            drafts.extend(specifics);
        }
    }
    drafts
}

/// Clinical findings per subcategory name, in first-appearance order. A name
/// listed more than once in a category is folded into its first occurrence.
fn merged_subcategories(category: &Category) -> Vec<(&str, Vec<&str>)> {
    let mut merged: Vec<(&str, Vec<&str>)> = Vec::new();
    for subcategory in &category.subcategories {
        let findings = subcategory
            .items
            .iter()
            .map(|item| item.trim())
            .filter(|item| !is_procedural_item(item))
            .filter(|item| !remove_comparative_language(item).is_empty());
        match merged
            .iter_mut()
            .find(|(name, _)| *name == subcategory.name.as_str())
        {
            Some((_, existing)) => {
                debug!(
                    category = %category.category,
                    subcategory = %subcategory.name,
                    "Merging repeated subcategory"
                );
                existing.extend(findings);
            }
            None => merged.push((subcategory.name.as_str(), findings.collect())),
        }
    }
    merged
}

pub fn default_question_text(finding: &str) -> String {
    let cleaned = remove_comparative_language(finding);
    let cleaned = cleaned.trim_end_matches(['.', '?']);
    let mut chars = cleaned.chars();
    let lowered = match chars.next() {
        Some(first) if chars.clone().next().is_some_and(|c| c.is_lowercase()) => {
            first.to_lowercase().chain(chars).collect::<String>()
        }
        Some(first) => std::iter::once(first).chain(chars).collect(),
        None => String::new(),
    };
    format!("Is there evidence of {lowered}?")
}

enum Modality {
    Ct,
    Mri,
    Other,
}

impl Modality {
    fn of(study_type: &str) -> Self {
        let lowered = study_type.to_ascii_lowercase();
        if lowered.starts_with("ct") {
            Modality::Ct
        } else if lowered.starts_with("mr") {
            Modality::Mri
        } else {
            Modality::Other
        }
    }
}

/// Descriptor prompts for one finding; all five categories are always filled.
pub fn default_follow_up(finding: &str, study_type: &str) -> FollowUpGuide {
    let characteristics = match Modality::of(study_type) {
        Modality::Ct => "CT attenuation (HU), density, calcification, fat, air, enhancement",
        Modality::Mri => "MRI signal on T1/T2/FLAIR/DWI, enhancement pattern",
        Modality::Other => "imaging characteristics, enhancement",
    };
    FollowUpGuide {
        location: format!("anatomical location, side, level or segment of the {finding}"),
        size_extent: "measurements in mm/cm, number, focal/multifocal/diffuse extent".to_string(),
        morphology: "shape, margins, pattern".to_string(),
        characteristics: characteristics.to_string(),
        associated_findings: "mass effect, displacement, inflammation, complications".to_string(),
    }
}

/// Generic set used whenever compilation fails.
pub fn fallback_questions(study_type: &str) -> Vec<Question> {
    let mut screening = Question::screening(0, "General Assessment", "Overall Evaluation");
    screening.prompt_text = "Are there any overall abnormalities visible on the study?".to_string();

    let specifics = [
        ("Are there any masses or tumors present?", "masses or tumors"),
        ("Are there any fractures or bone abnormalities?", "fractures"),
        ("Are there any fluid collections?", "fluid collections"),
        ("Are there any soft tissue abnormalities?", "soft tissue abnormality"),
    ]
    .into_iter()
    .enumerate()
    .map(|(item, (text, finding))| {
        Question::specific(
            QuestionId::Specific { category: 0, item },
            &screening,
            text,
            default_follow_up(finding, study_type),
        )
    })
    .collect::<Vec<_>>();

    std::iter::once(screening).chain(specifics).collect()
}
