use serde::Serialize;

use crate::question::Answer;

/// Stands in for the details of a positive answer dictated without any.
pub const NO_DETAILS_MARKER: &str = "Present (no additional details provided)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositiveFinding {
    pub question: String,
    pub details: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegativeFinding {
    pub question_text: String,
}

/// Findings of one subcategory, in answer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindingGroup<T> {
    pub subcategory: String,
    pub category: String,
    pub findings: Vec<T>,
}

/// Answers split into positive and negative findings, grouped by subcategory
/// in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedFindings {
    pub positive: Vec<FindingGroup<PositiveFinding>>,
    pub negative: Vec<FindingGroup<NegativeFinding>>,
}

impl AggregatedFindings {
    pub fn has_positive(&self) -> bool {
        !self.positive.is_empty()
    }

    pub fn positive_count(&self) -> usize {
        self.positive.iter().map(|g| g.findings.len()).sum()
    }

    /// Details strings of every positive finding; the only text a report
    /// section may take measurements from.
    pub fn positive_details(&self) -> impl Iterator<Item = &str> {
        self.positive
            .iter()
            .flat_map(|g| g.findings.iter().map(|f| f.details.as_str()))
    }

    pub fn negatives_for(&self, subcategory: &str) -> Option<&FindingGroup<NegativeFinding>> {
        self.negative.iter().find(|g| g.subcategory == subcategory)
    }
}

pub struct FindingsAggregator;

impl FindingsAggregator {
    pub fn aggregate(answers: &[Answer]) -> AggregatedFindings {
        let mut aggregated = AggregatedFindings::default();
        for answer in answers {
            if answer.is_positive() {
                let details = answer.details.trim();
                let finding = PositiveFinding {
                    question: answer.question_text.clone(),
                    details: if details.is_empty() {
                        NO_DETAILS_MARKER.to_string()
                    } else {
                        details.to_string()
                    },
                    category: answer.category.clone(),
                };
                group_for(&mut aggregated.positive, answer).push(finding);
            } else {
                let finding = NegativeFinding {
                    question_text: answer.question_text.clone(),
                };
                group_for(&mut aggregated.negative, answer).push(finding);
            }
        }
        aggregated
    }
}

fn group_for<'a, T>(groups: &'a mut Vec<FindingGroup<T>>, answer: &Answer) -> &'a mut Vec<T> {
    let index = match groups.iter().position(|g| g.subcategory == answer.subcategory) {
        Some(index) => index,
        None => {
            groups.push(FindingGroup {
                subcategory: answer.subcategory.clone(),
                category: answer.category.clone(),
                findings: Vec::new(),
            });
            groups.len() - 1
        }
    };
    &mut groups[index].findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{KindTag, QuestionId, Response};

    fn answer(sub: &str, item: usize, response: Response, details: &str) -> Answer {
        Answer {
            question_id: QuestionId::Specific { category: 0, item },
            question_text: format!("Question {item}?"),
            category: "Lungs".into(),
            subcategory: sub.into(),
            response,
            details: details.into(),
            kind: KindTag::Specific,
        }
    }

    #[test]
    fn every_positive_lands_in_exactly_one_bucket_with_details() {
        let answers = vec![
            answer("Parenchyma", 0, Response::Yes, "mild effusion"),
            answer("Airways", 1, Response::No, ""),
            answer("Parenchyma", 2, Response::Yes, "   "),
            answer("Airways", 3, Response::Yes, "bronchiectasis"),
            answer("Parenchyma", 4, Response::No, ""),
        ];

        let aggregated = FindingsAggregator::aggregate(&answers);

        assert_eq!(aggregated.positive_count(), 3);
        assert_eq!(aggregated.positive[0].subcategory, "Parenchyma");
        assert_eq!(aggregated.positive[1].subcategory, "Airways");
        assert_eq!(aggregated.positive[0].findings[1].details, NO_DETAILS_MARKER);
        assert!(aggregated.positive_details().all(|d| !d.is_empty()));

        assert_eq!(aggregated.negative[0].subcategory, "Airways");
        assert_eq!(
            aggregated.negatives_for("Parenchyma").unwrap().findings,
            vec![NegativeFinding { question_text: "Question 4?".into() }]
        );
    }

    #[test]
    fn no_answers_aggregate_to_nothing() {
        let aggregated = FindingsAggregator::aggregate(&[]);
        assert!(!aggregated.has_positive());
        assert!(aggregated.negative.is_empty());
    }
}
