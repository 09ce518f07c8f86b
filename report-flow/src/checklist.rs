use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::completion::{TextCompletion, parse_json_response};
use crate::error::{FlowError, Result};
use crate::prompts;
use crate::report::CaseMetadata;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    pub name: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub category: String,
    pub subcategories: Vec<Subcategory>,
}

/// Category → Subcategory → finding items, as generated for one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    pub checklist: Vec<Category>,
}

/// One finding of a checklist with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistItem<'a> {
    pub category: &'a str,
    pub subcategory: &'a str,
    pub finding: &'a str,
}

impl Checklist {
    pub fn items(&self) -> impl Iterator<Item = ChecklistItem<'_>> {
        self.checklist.iter().flat_map(|category| {
            category.subcategories.iter().flat_map(move |sub| {
                sub.items.iter().map(move |finding| ChecklistItem {
                    category: &category.category,
                    subcategory: &sub.name,
                    finding,
                })
            })
        })
    }

    /// Items of one subcategory, used to scope dynamic follow-ups.
    pub fn subcategory_items(&self, category: &str, subcategory: &str) -> Vec<String> {
        self.checklist
            .iter()
            .filter(|c| c.category == category)
            .flat_map(|c| c.subcategories.iter())
            .filter(|s| s.name == subcategory)
            .flat_map(|s| s.items.iter().cloned())
            .collect()
    }

    fn ensure_not_empty(&self) -> Result<()> {
        let has_item = self
            .items()
            .any(|item| !item.finding.trim().is_empty());
        if self.checklist.is_empty() || !has_item {
            return Err(FlowError::ChecklistGeneration(
                "model returned a checklist without any finding items".to_string(),
            ));
        }
        Ok(())
    }
}

/// Asks the model for a checklist built from protocol text and case metadata.
/// Never retries and never invents a checklist on failure.
pub struct ChecklistGenerator {
    model: Arc<dyn TextCompletion>,
}

impl ChecklistGenerator {
    pub fn new(model: Arc<dyn TextCompletion>) -> Self {
        Self { model }
    }

    pub async fn generate(
        &self,
        case: &CaseMetadata,
        protocol_chunks: &[String],
    ) -> Result<Checklist> {
        if protocol_chunks.iter().all(|chunk| chunk.trim().is_empty()) {
            return Err(FlowError::NoProtocolData {
                study_type: case.study_type.clone(),
            });
        }

        let study_content = protocol_chunks.join("\n\n");
        let user_prompt = prompts::render(
            prompts::CHECKLIST_USER_PROMPT,
            &[
                ("age", case.age.as_str()),
                ("gender", case.gender.as_str()),
                ("clinical_history", case.clinical_history.as_str()),
                ("study_type", case.study_type.as_str()),
                ("study_content", study_content.as_str()),
            ],
        );

        let raw = self
            .model
            .invoke(prompts::CHECKLIST_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| {
                error!(study_type = %case.study_type, "Checklist model call failed: {}", e);
                FlowError::ChecklistGeneration(e.to_string())
            })?;

        let checklist: Checklist = parse_json_response(&raw).map_err(|e| {
            error!(study_type = %case.study_type, "Checklist response rejected: {}", e);
            FlowError::ChecklistGeneration(e.to_string())
        })?;
        checklist.ensure_not_empty()?;

        info!(
            study_type = %case.study_type,
            categories = checklist.checklist.len(),
            items = checklist.items().count(),
            "Checklist generated"
        );
        Ok(checklist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedCompletion;

    fn case() -> CaseMetadata {
        CaseMetadata::new("65", "Male", "Chest pain and shortness of breath", "ct_chest")
    }

    const CHECKLIST_JSON: &str = r#"```json
{"checklist": [
  {"category": "Lungs", "subcategories": [{"name": "Parenchyma", "items": ["nodules", "effusion"]}]},
  {"category": "Pleura", "subcategories": [{"name": "Effusion", "items": ["pneumothorax"]}]}
]}
```"#;

    #[tokio::test]
    async fn generates_checklist_from_fenced_json() {
        let model = Arc::new(ScriptedCompletion::new().reply(CHECKLIST_JSON));
        let generator = ChecklistGenerator::new(model.clone());

        let checklist = generator
            .generate(&case(), &["Lungs: nodules".to_string(), "Pleura".to_string()])
            .await
            .unwrap();

        assert_eq!(checklist.checklist.len(), 2);
        assert_eq!(checklist.items().count(), 3);
        assert_eq!(
            checklist.subcategory_items("Lungs", "Parenchyma"),
            vec!["nodules".to_string(), "effusion".to_string()]
        );
        let prompt = model.user_prompt(0);
        assert!(prompt.contains("Lungs: nodules\n\nPleura"));
        assert!(prompt.contains("Chest pain"));
    }

    #[tokio::test]
    async fn missing_protocol_is_fatal_without_model_call() {
        let model = Arc::new(ScriptedCompletion::new().reply(CHECKLIST_JSON));
        let generator = ChecklistGenerator::new(model.clone());

        let err = generator.generate(&case(), &[]).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::NoProtocolData { ref study_type } if study_type == "ct_chest"
        ));
        assert!(err.is_fatal());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_or_empty_output_is_a_generation_error() {
        let model = Arc::new(
            ScriptedCompletion::new()
                .reply("Here is your checklist: lungs, pleura")
                .reply(r#"{"checklist": []}"#)
                .reply(r#"{"checklist": [{"category": "Lungs", "subcategories": [{"name": "Parenchyma", "items": []}]}]}"#)
                .fail("rate limited"),
        );
        let generator = ChecklistGenerator::new(model);
        let chunks = vec!["Lungs".to_string()];

        for _ in 0..4 {
            let err = generator.generate(&case(), &chunks).await.unwrap_err();
            assert!(matches!(err, FlowError::ChecklistGeneration(_)), "{err}");
        }
    }
}
