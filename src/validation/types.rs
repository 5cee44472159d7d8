// Validation types: one actual-result shape per validation kind

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::harness::types::PhaseStatus;

/// The fixed set of named validators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationType {
    Authentication,
    DataLoading,
    ButtonFunctionality,
    FormSubmission,
    Navigation,
    CrudOperations,
}

impl ValidationType {
    pub const ALL: [ValidationType; 6] = [
        ValidationType::Authentication,
        ValidationType::DataLoading,
        ValidationType::ButtonFunctionality,
        ValidationType::FormSubmission,
        ValidationType::Navigation,
        ValidationType::CrudOperations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationType::Authentication => "authentication",
            ValidationType::DataLoading => "data-loading",
            ValidationType::ButtonFunctionality => "button-functionality",
            ValidationType::FormSubmission => "form-submission",
            ValidationType::Navigation => "navigation",
            ValidationType::CrudOperations => "crud-operations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthActual {
    pub login_form_present: bool,
    pub submitted: bool,
    pub left_login_path: bool,
    pub protected_marker_visible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLoadingActual {
    pub data_elements: u32,
    pub empty_state: bool,
    pub loading_cleared: bool,
    pub data_requests: usize,
    /// Rows/cards found, or an empty state standing in for them
    pub has_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonProbe {
    pub index: usize,
    pub label: String,
    pub url_changed: bool,
    pub dialog_opened: bool,
    /// Relative screenshot size change, 0.0 when unknown
    pub screenshot_delta: f64,
    pub responded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonActual {
    pub sampled: usize,
    pub responded: usize,
    /// Labels of controls with no observable effect
    pub inert: Vec<String>,
    /// Controls were sampled and none of them responded
    pub inert_only: bool,
    pub controls: Vec<ButtonProbe>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormActual {
    pub form_present: bool,
    pub opened_via_create: bool,
    pub submitted: bool,
    pub feedback_shown: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationActual {
    pub links_found: usize,
    pub clicked: Option<String>,
    pub url_changed: bool,
    pub landed_url: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrudActual {
    pub create: u32,
    pub edit: u32,
    pub delete: u32,
    pub view: u32,
    pub any_present: bool,
}

/// Actual result of one validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActualResult {
    Authentication(AuthActual),
    DataLoading(DataLoadingActual),
    ButtonFunctionality(ButtonActual),
    FormSubmission(FormActual),
    Navigation(NavigationActual),
    CrudOperations(CrudActual),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub phase_name: String,
    pub validation_type: ValidationType,
    pub expected: Option<serde_json::Value>,
    pub actual: serde_json::Value,
    pub status: PhaseStatus,
    pub message: String,
    pub evidence: BTreeMap<String, serde_json::Value>,
}

/// Keys of `expected` whose value differs in `actual`.
///
/// `expected` is a partial object: absent keys are unconstrained. A
/// non-object expectation must equal `actual` as a whole.
pub fn compare_subset(expected: &serde_json::Value, actual: &serde_json::Value) -> Vec<String> {
    let Some(wanted) = expected.as_object() else {
        if expected == actual {
            return Vec::new();
        }
        return vec![format!("expected {}, got {}", expected, actual)];
    };

    wanted
        .iter()
        .filter_map(|(key, value)| match actual.get(key) {
            Some(found) if found == value => None,
            Some(found) => Some(format!("{}: expected {}, got {}", key, value, found)),
            None => Some(format!("{}: expected {}, missing", key, value)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_type_names() {
        for t in ValidationType::ALL {
            assert_eq!(ValidationType::parse(t.as_str()), Some(t));
            assert_eq!(serde_json::to_value(t).unwrap(), json!(t.as_str()));
        }
        assert_eq!(ValidationType::parse("visual"), None);
    }

    #[test]
    fn test_compare_subset_ignores_absent_keys() {
        let actual = json!({ "dataElements": 10, "emptyState": false, "hasData": true });
        assert!(compare_subset(&json!({ "hasData": true }), &actual).is_empty());
        assert!(compare_subset(&json!({}), &actual).is_empty());
    }

    #[test]
    fn test_compare_subset_reports_mismatch_and_missing() {
        let actual = json!({ "hasData": false });
        let mismatches = compare_subset(&json!({ "hasData": true, "dataRequests": 1 }), &actual);
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches.iter().any(|m| m.starts_with("hasData")));
        assert!(mismatches.iter().any(|m| m.contains("missing")));
    }

    #[test]
    fn test_actual_serializes_without_tag() {
        let actual = ActualResult::CrudOperations(CrudActual {
            create: 1,
            any_present: true,
            ..Default::default()
        });
        let value = serde_json::to_value(&actual).unwrap();
        assert_eq!(value["create"], 1);
        assert_eq!(value["anyPresent"], true);
    }
}
