use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::QuestionSetError;

/// Identifier of a question: `screening_<n>` or `specific_<category>_<item>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuestionId {
    Screening(usize),
    Specific { category: usize, item: usize },
}

impl QuestionId {
    pub fn is_screening(&self) -> bool {
        matches!(self, QuestionId::Screening(_))
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Screening(n) => write!(f, "screening_{n}"),
            QuestionId::Specific { category, item } => write!(f, "specific_{category}_{item}"),
        }
    }
}

impl FromStr for QuestionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid question id '{s}'");
        if let Some(rest) = s.strip_prefix("screening_") {
            return rest.parse().map(QuestionId::Screening).map_err(|_| invalid());
        }
        let rest = s.strip_prefix("specific_").ok_or_else(invalid)?;
        let (category, item) = rest.split_once('_').ok_or_else(invalid)?;
        Ok(QuestionId::Specific {
            category: category.parse().map_err(|_| invalid())?,
            item: item.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for QuestionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuestionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Descriptor prompts shown with a specific question when the finding is
/// positive. All five descriptor categories are always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpGuide {
    pub location: String,
    pub size_extent: String,
    pub morphology: String,
    pub characteristics: String,
    pub associated_findings: String,
}

impl FollowUpGuide {
    /// Single dictation instruction, in the order the descriptors are asked.
    pub fn render(&self) -> String {
        format!(
            "If present, describe: location ({}); size/extent ({}); morphology ({}); characteristics ({}); associated findings ({}).",
            self.location,
            self.size_extent,
            self.morphology,
            self.characteristics,
            self.associated_findings
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Screening,
    Specific {
        depends_on: QuestionId,
        follow_up: FollowUpGuide,
    },
}

/// Tag of a [`QuestionKind`] without its payload, carried on answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindTag {
    Screening,
    Specific,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub category: String,
    pub subcategory: String,
    #[serde(rename = "question")]
    pub prompt_text: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    #[serde(default)]
    pub is_dynamic: bool,
    /// Text before context refinement, kept so the rewrite can be audited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

impl Question {
    pub fn screening(n: usize, category: &str, subcategory: &str) -> Self {
        Self {
            id: QuestionId::Screening(n),
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            prompt_text: format!("Are there any abnormalities in the {subcategory}?"),
            kind: QuestionKind::Screening,
            is_dynamic: false,
            original_text: None,
        }
    }

    pub fn specific(
        id: QuestionId,
        screening: &Question,
        prompt_text: impl Into<String>,
        follow_up: FollowUpGuide,
    ) -> Self {
        Self {
            id,
            category: screening.category.clone(),
            subcategory: screening.subcategory.clone(),
            prompt_text: prompt_text.into(),
            kind: QuestionKind::Specific {
                depends_on: screening.id,
                follow_up,
            },
            is_dynamic: false,
            original_text: None,
        }
    }

    pub fn tag(&self) -> KindTag {
        match self.kind {
            QuestionKind::Screening => KindTag::Screening,
            QuestionKind::Specific { .. } => KindTag::Specific,
        }
    }

    pub fn is_screening(&self) -> bool {
        matches!(self.kind, QuestionKind::Screening)
    }

    pub fn depends_on(&self) -> Option<QuestionId> {
        match &self.kind {
            QuestionKind::Screening => None,
            QuestionKind::Specific { depends_on, .. } => Some(*depends_on),
        }
    }

    pub fn follow_up(&self) -> Option<&FollowUpGuide> {
        match &self.kind {
            QuestionKind::Screening => None,
            QuestionKind::Specific { follow_up, .. } => Some(follow_up),
        }
    }

    /// Copy with rewritten text; id, dependency and guide are untouched.
    pub fn refined(&self, text: impl Into<String>) -> Self {
        Self {
            prompt_text: text.into(),
            original_text: Some(
                self.original_text
                    .clone()
                    .unwrap_or_else(|| self.prompt_text.clone()),
            ),
            ..self.clone()
        }
    }

    fn same_subcategory(&self, other: &Question) -> bool {
        self.category == other.category && self.subcategory == other.subcategory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Yes,
    No,
}

impl FromStr for Response {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" => Ok(Response::Yes),
            "no" | "n" => Ok(Response::No),
            other => Err(format!("expected Yes or No, got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub question_text: String,
    pub category: String,
    pub subcategory: String,
    pub response: Response,
    #[serde(default)]
    pub details: String,
    pub kind: KindTag,
}

impl Answer {
    pub fn is_positive(&self) -> bool {
        self.response == Response::Yes
    }
}

/// Checks the structural invariants every compiled or fallback set must hold.
pub fn validate_question_set(questions: &[Question]) -> Result<(), QuestionSetError> {
    if questions.is_empty() {
        return Err(QuestionSetError::Empty);
    }

    let mut by_id: HashMap<QuestionId, &Question> = HashMap::new();
    for question in questions {
        if by_id.insert(question.id, question).is_some() {
            return Err(QuestionSetError::DuplicateId(question.id));
        }
    }

    let mut screened: HashSet<(&str, &str)> = HashSet::new();
    let mut gated: HashSet<QuestionId> = HashSet::new();
    for question in questions {
        match question.depends_on() {
            None => {
                if !screened.insert((question.category.as_str(), question.subcategory.as_str())) {
                    return Err(QuestionSetError::DuplicateScreening {
                        category: question.category.clone(),
                        subcategory: question.subcategory.clone(),
                    });
                }
            }
            Some(depends_on) => {
                let parent = by_id.get(&depends_on).ok_or(
                    QuestionSetError::DanglingDependency {
                        question: question.id,
                        depends_on,
                    },
                )?;
                if !parent.is_screening() {
                    return Err(QuestionSetError::NotScreening {
                        question: question.id,
                        depends_on,
                    });
                }
                if !parent.same_subcategory(question) {
                    return Err(QuestionSetError::SubcategoryMismatch {
                        question: question.id,
                        depends_on,
                    });
                }
                gated.insert(depends_on);
            }
        }
    }

    match questions
        .iter()
        .find(|q| q.is_screening() && !gated.contains(&q.id))
    {
        Some(orphan) => Err(QuestionSetError::EmptyScreening(orphan.id)),
        None => Ok(()),
    }
}
