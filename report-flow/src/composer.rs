use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::completion::{TextCompletion, strip_code_fences};
use crate::findings::{AggregatedFindings, NO_DETAILS_MARKER, PositiveFinding};
use crate::grounding::{banned_phrases, unsupported_measurements};
use crate::prompts;
use crate::report::{CaseMetadata, ReportSections, anatomical_region, technique_for};

pub const OBSERVATIONS_ERROR: &str = "Error generating observations section.";
pub const IMPRESSION_ERROR: &str = "Error generating impression section.";
pub const NO_SIGNIFICANT_ABNORMALITIES: &str =
    "No significant abnormalities identified on the current study.";

#[derive(Debug, Serialize)]
struct SectionHeader<'a> {
    subcategory: &'a str,
    category: &'a str,
    header: &'static str,
}

/// Writes the four report sections. Model failures become error markers and
/// ungrounded model text is replaced by a rendering of the answers alone, so
/// composing never fails.
pub struct ReportComposer {
    model: Arc<dyn TextCompletion>,
    techniques: BTreeMap<String, String>,
}

impl ReportComposer {
    pub fn new(model: Arc<dyn TextCompletion>) -> Self {
        Self {
            model,
            techniques: BTreeMap::new(),
        }
    }

    /// Technique sentences that take precedence over the built-in table.
    pub fn with_techniques(mut self, techniques: BTreeMap<String, String>) -> Self {
        self.techniques = techniques;
        self
    }

    pub async fn compose(
        &self,
        case: &CaseMetadata,
        findings: &AggregatedFindings,
        protocol_excerpt: &str,
    ) -> ReportSections {
        let observations = self.observations(case, findings, protocol_excerpt).await;
        let impression = self.impression(case, findings).await;
        info!(
            case_id = %case.case_id,
            positives = findings.positive_count(),
            "Report sections composed"
        );
        ReportSections {
            history: case.clinical_history.clone(),
            technique: technique_for(&case.study_type, &self.techniques),
            observations,
            impression,
        }
    }

    async fn observations(
        &self,
        case: &CaseMetadata,
        findings: &AggregatedFindings,
        protocol_excerpt: &str,
    ) -> String {
        let headers = section_headers(findings);
        let user_prompt = prompts::render(
            prompts::OBSERVATIONS_USER_PROMPT,
            &[
                ("study_type", case.study_type.as_str()),
                ("clinical_history", case.clinical_history.as_str()),
                ("headers_json", to_pretty_json(&headers).as_str()),
                ("positive_json", to_pretty_json(&findings.positive).as_str()),
                ("negative_json", to_pretty_json(&findings.negative).as_str()),
                ("protocol_excerpt", protocol_excerpt),
            ],
        );

        let raw = match self
            .model
            .invoke(prompts::OBSERVATIONS_SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(case_id = %case.case_id, "Observations generation failed: {}", e);
                return OBSERVATIONS_ERROR.to_string();
            }
        };

        let text = strip_code_fences(&raw);
        let unsupported = unsupported_measurements(text, findings.positive_details());
        if !unsupported.is_empty() {
            warn!(
                case_id = %case.case_id,
                measurements = ?unsupported,
                "Observations contain measurements absent from the findings; using local rendering"
            );
            return render_observations(findings);
        }
        text.to_string()
    }

    async fn impression(&self, case: &CaseMetadata, findings: &AggregatedFindings) -> String {
        if !findings.has_positive() {
            return NO_SIGNIFICANT_ABNORMALITIES.to_string();
        }

        let findings_text = findings
            .positive
            .iter()
            .flat_map(|group| {
                group.findings.iter().map(move |f| {
                    format!("- {} ({}): {}", group.subcategory, f.question, f.details)
                })
            })
            .collect::<Vec<_>>()
            .join("\n");
        let user_prompt = prompts::render(
            prompts::IMPRESSION_USER_PROMPT,
            &[
                ("study_type", case.study_type.as_str()),
                ("clinical_history", case.clinical_history.as_str()),
                ("age", case.age.as_str()),
                ("gender", case.gender.as_str()),
                ("findings_text", findings_text.as_str()),
            ],
        );

        let raw = match self
            .model
            .invoke(prompts::IMPRESSION_SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(case_id = %case.case_id, "Impression generation failed: {}", e);
                return IMPRESSION_ERROR.to_string();
            }
        };

        let text = strip_code_fences(&raw)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let unsupported = unsupported_measurements(&text, findings.positive_details());
        let banned = banned_phrases(&text);
        if !unsupported.is_empty() || !banned.is_empty() {
            warn!(
                case_id = %case.case_id,
                measurements = ?unsupported,
                phrases = ?banned,
                "Impression failed grounding checks; using local rendering"
            );
            return render_impression(findings);
        }
        text
    }
}

fn section_headers(findings: &AggregatedFindings) -> Vec<SectionHeader<'_>> {
    let mut headers: Vec<SectionHeader<'_>> = Vec::new();
    let groups = findings
        .positive
        .iter()
        .map(|g| (g.subcategory.as_str(), g.category.as_str()))
        .chain(
            findings
                .negative
                .iter()
                .map(|g| (g.subcategory.as_str(), g.category.as_str())),
        );
    for (subcategory, category) in groups {
        if headers.iter().all(|h| h.subcategory != subcategory) {
            headers.push(SectionHeader {
                subcategory,
                category,
                header: anatomical_region(category),
            });
        }
    }
    headers
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

fn sentence(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    let mut out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    if !out.ends_with(['.', '!', '?']) {
        out.push('.');
    }
    out
}

fn finding_sentence(finding: &PositiveFinding) -> String {
    if finding.details == NO_DETAILS_MARKER {
        format!(
            "Finding present for \"{}\" (no additional details provided).",
            finding.question.trim().trim_end_matches('?')
        )
    } else {
        sentence(&finding.details)
    }
}

/// Observations built only from the recorded answers.
pub fn render_observations(findings: &AggregatedFindings) -> String {
    let mut regions: Vec<(&'static str, Vec<String>)> = Vec::new();
    for header in section_headers(findings) {
        let subcategory = header.subcategory.to_lowercase();
        let text = match findings
            .positive
            .iter()
            .find(|g| g.subcategory == header.subcategory)
        {
            Some(group) => {
                let mut parts: Vec<String> = group.findings.iter().map(finding_sentence).collect();
                parts.push(format!("Rest of the {subcategory} appears normal."));
                parts.join(" ")
            }
            None => format!("No abnormality is seen in the {subcategory}."),
        };
        match regions.iter_mut().find(|(name, _)| *name == header.header) {
            Some((_, lines)) => lines.push(text),
            None => regions.push((header.header, vec![text])),
        }
    }

    if regions.is_empty() {
        return "The visualized structures appear normal.".to_string();
    }
    regions
        .into_iter()
        .map(|(header, lines)| format!("{header}:\n{}", lines.join(" ")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One line per positive finding, built only from the recorded answers.
pub fn render_impression(findings: &AggregatedFindings) -> String {
    if !findings.has_positive() {
        return NO_SIGNIFICANT_ABNORMALITIES.to_string();
    }
    findings
        .positive
        .iter()
        .flat_map(|g| g.findings.iter().map(finding_sentence))
        .collect::<Vec<_>>()
        .join("\n")
}
