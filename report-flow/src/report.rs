use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FlowError, Result};
use crate::question::Answer;

/// Patient and study information a case starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    pub case_id: String,
    pub age: String,
    pub gender: String,
    pub clinical_history: String,
    pub study_type: String,
}

impl CaseMetadata {
    pub fn new(
        age: impl Into<String>,
        gender: impl Into<String>,
        clinical_history: impl Into<String>,
        study_type: impl Into<String>,
    ) -> Self {
        Self {
            case_id: default_case_id(),
            age: age.into(),
            gender: gender.into(),
            clinical_history: clinical_history.into(),
            study_type: study_type.into(),
        }
    }

    pub fn with_case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = case_id.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("case_id", &self.case_id),
            ("age", &self.age),
            ("clinical_history", &self.clinical_history),
            ("study_type", &self.study_type),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(FlowError::InvalidInput(format!("{field} must not be empty"))),
            None => Ok(()),
        }
    }
}

/// `case_YYYYmmdd_HHMMSS` for the current local time.
pub fn default_case_id() -> String {
    format!("case_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

const TECHNIQUE_TEMPLATES: &[(&str, &str)] = &[
    ("ct_chest", "Volume scan of chest was done without IV contrast."),
    ("ct_head", "Axial CT images of the head were obtained without IV contrast."),
    ("ct_lumbar_spine", "Axial and sagittal CT images of the lumbar spine were obtained."),
    ("ct_cervical_spine", "Axial and sagittal CT images of the cervical spine were obtained."),
    ("ct_thoracic_spine", "Axial and sagittal CT images of the thoracic spine were obtained."),
    ("ct_soft_tissue_neck", "Axial CT images of the neck soft tissues were obtained."),
    ("ct_temporal_bone", "High-resolution CT images of the temporal bones were obtained."),
];

/// Technique sentence for a study type. Overrides win over the built-in
/// table; unknown studies get a generic sentence.
pub fn technique_for(study_type: &str, overrides: &BTreeMap<String, String>) -> String {
    if let Some(sentence) = overrides.get(study_type) {
        return sentence.clone();
    }
    TECHNIQUE_TEMPLATES
        .iter()
        .find(|(study, _)| *study == study_type)
        .map(|(_, sentence)| sentence.to_string())
        .unwrap_or_else(|| format!("CT images of {study_type} were obtained."))
}

const REGION_HEADERS: &[(&[&str], &str)] = &[
    (&["lung", "airway"], "LUNGS"),
    (&["pleura"], "PLEURA"),
    (&["heart", "pericard", "cardiac"], "HEART"),
    (&["vessel", "vascula", "aort"], "VASCULATURE"),
    (&["mediastin", "lymph"], "MEDIASTINUM"),
    (&["abdom"], "UPPER ABDOMEN"),
    (&["bone", "osseous", "skelet"], "SKELETAL PROCESS"),
    (&["spine", "spinal", "vertebra"], "SPINE"),
    (&["soft tissue"], "SOFT TISSUES"),
    (&["neck"], "NECK"),
    (&["head", "brain"], "HEAD"),
];

/// Report section header for a checklist category.
pub fn anatomical_region(category: &str) -> &'static str {
    let lowered = category.to_lowercase();
    REGION_HEADERS
        .iter()
        .find(|(markers, _)| markers.iter().any(|m| lowered.contains(m)))
        .map(|(_, header)| *header)
        .unwrap_or("SOFT TISSUES")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub age: String,
    pub gender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSections {
    pub history: String,
    pub technique: String,
    pub observations: String,
    pub impression: String,
}

/// A positive answer as exported with the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub question: String,
    pub category: String,
    pub subcategory: String,
    /// Id of the question the finding answers.
    pub item: String,
    pub details: String,
}

impl From<&Answer> for Finding {
    fn from(answer: &Answer) -> Self {
        Self {
            question: answer.question_text.clone(),
            category: answer.category.clone(),
            subcategory: answer.subcategory.clone(),
            item: answer.question_id.to_string(),
            details: answer.details.clone(),
        }
    }
}

/// Persisted report form. Field names and nesting are an external contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub case_id: String,
    pub date: String,
    pub patient_info: PatientInfo,
    pub study_type: String,
    pub report: ReportSections,
    pub findings: Vec<Finding>,
}

impl Report {
    pub fn new(case: &CaseMetadata, sections: ReportSections, answers: &[Answer]) -> Self {
        Self {
            case_id: case.case_id.clone(),
            date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            patient_info: PatientInfo {
                age: case.age.clone(),
                gender: case.gender.clone(),
            },
            study_type: case.study_type.clone(),
            report: sections,
            findings: answers
                .iter()
                .filter(|a| a.is_positive())
                .map(Finding::from)
                .collect(),
        }
    }

    pub fn to_markdown(&self) -> String {
        format!(
            "# RADIOLOGY REPORT\n\n\
             **Case ID:** {}\n\
             **Date:** {}\n\
             **Patient:** {} year old {}\n\
             **Study:** {}\n\n\
             ## History\n{}\n\n\
             ## Technique\n{}\n\n\
             ## Observations\n{}\n\n\
             ## Impression\n{}\n",
            self.case_id,
            self.date,
            self.patient_info.age,
            self.patient_info.gender,
            self.study_type,
            self.report.history,
            self.report.technique,
            self.report.observations,
            self.report.impression,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{KindTag, QuestionId, Response};

    fn answer(id: QuestionId, response: Response, details: &str) -> Answer {
        Answer {
            question_id: id,
            question_text: "Is there a pleural effusion?".into(),
            category: "Pleura".into(),
            subcategory: "Effusion".into(),
            response,
            details: details.into(),
            kind: KindTag::Specific,
        }
    }

    #[test]
    fn case_metadata_defaults_case_id_and_rejects_blank_fields() {
        let case = CaseMetadata::new("65", "Male", "Cough", "ct_chest");
        assert!(case.case_id.starts_with("case_"));
        assert_eq!(case.case_id.len(), "case_20240101_120000".len());
        assert!(case.validate().is_ok());

        let blank = CaseMetadata::new("65", "Male", "  ", "ct_chest");
        assert!(matches!(
            blank.validate(),
            Err(FlowError::InvalidInput(msg)) if msg.contains("clinical_history")
        ));
        assert_eq!(
            CaseMetadata::new("65", "", "Cough", "ct_chest").with_case_id("c1").case_id,
            "c1"
        );
    }

    #[test]
    fn technique_lookup_prefers_overrides_then_table_then_generic() {
        let mut overrides = BTreeMap::new();
        overrides.insert("ct_head".to_string(), "Custom head technique.".to_string());

        assert_eq!(
            technique_for("ct_chest", &overrides),
            "Volume scan of chest was done without IV contrast."
        );
        assert_eq!(technique_for("ct_head", &overrides), "Custom head technique.");
        assert_eq!(
            technique_for("ct_abdomen", &overrides),
            "CT images of ct_abdomen were obtained."
        );
    }

    #[test]
    fn categories_map_to_report_headers() {
        assert_eq!(anatomical_region("Lungs"), "LUNGS");
        assert_eq!(anatomical_region("Airways"), "LUNGS");
        assert_eq!(anatomical_region("Pleura"), "PLEURA");
        assert_eq!(anatomical_region("Lymph Nodes"), "MEDIASTINUM");
        assert_eq!(anatomical_region("Bones"), "SKELETAL PROCESS");
        assert_eq!(anatomical_region("Upper Abdomen"), "UPPER ABDOMEN");
        assert_eq!(anatomical_region("Thyroid"), "SOFT TISSUES");
    }

    #[test]
    fn persisted_form_keeps_field_names_and_only_positive_findings() {
        let case = CaseMetadata::new("65", "Male", "Cough", "ct_chest").with_case_id("case_1");
        let sections = ReportSections {
            history: "Cough".into(),
            technique: technique_for("ct_chest", &BTreeMap::new()),
            observations: "PLEURA:\nMild effusion.".into(),
            impression: "Mild pleural effusion.".into(),
        };
        let answers = vec![
            answer(
                QuestionId::Specific { category: 1, item: 0 },
                Response::Yes,
                "mild effusion",
            ),
            answer(QuestionId::Specific { category: 1, item: 1 }, Response::No, ""),
        ];

        let report = Report::new(&case, sections, &answers);
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["case_id"], "case_1");
        assert_eq!(value["patient_info"]["age"], "65");
        assert_eq!(value["report"]["impression"], "Mild pleural effusion.");
        assert_eq!(value["findings"].as_array().unwrap().len(), 1);
        assert_eq!(value["findings"][0]["item"], "specific_1_0");
        assert_eq!(value["findings"][0]["details"], "mild effusion");
        assert!(value["findings"][0].get("answer").is_none());
        assert_eq!(report.date.len(), "2024-01-01 12:00:00".len());

        let text = report.to_markdown();
        assert!(text.starts_with("# RADIOLOGY REPORT"));
        assert!(text.contains("**Patient:** 65 year old Male"));
        assert!(text.contains("## Impression\nMild pleural effusion."));
    }
}
