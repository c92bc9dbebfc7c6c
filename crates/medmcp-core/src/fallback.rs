//! Canned payloads substituted when the model cannot be used.

use serde_json::{json, Value};

use crate::operation::Operation;
use crate::parser::MANUAL_REVIEW_NOTE;

/// Confidence of a canned payload. Below every parsed-fallback confidence so
/// a timed-out answer never outranks a garbled one.
pub const CANNED_CONFIDENCE: f64 = 0.3;

/// Why the model's answer was not used.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradeCause {
    Timeout,
    Disconnected,
    CallFailed(String),
    /// A reply arrived but only the raw-text wrapper could be built from it.
    Unparsed(&'static str),
}

impl DegradeCause {
    pub fn reason(&self) -> String {
        match self {
            Self::Timeout => "AI call timed out".to_string(),
            Self::Disconnected => "AI provider disconnected".to_string(),
            Self::CallFailed(msg) => msg.clone(),
            Self::Unparsed(why) => (*why).to_string(),
        }
    }
}

pub fn canned_payload(operation: Operation, cause: &DegradeCause) -> Value {
    let mut payload = match operation {
        Operation::CreateSession => json!({
            "assessment": "Automated assessment unavailable. Review the patient history and vitals manually.",
            "risk_factors": [],
        }),
        Operation::AddSymptoms => json!({
            "possible_conditions": [],
            "recommended_tests": ["Complete physical examination", "Basic vital signs re-check"],
            "red_flags": [],
        }),
        Operation::SetDiagnosis => json!({
            "is_consistent": Value::Null,
            "supporting_findings": [],
            "alternative_diagnoses": [],
        }),
        Operation::GeneratePrescription => json!({
            "medications": [],
            "non_drug_advice": ["Prescribe according to local formulary after clinical review"],
        }),
        Operation::CheckInteractions => json!({
            "interactions": [],
        }),
        Operation::ClinicalGuidelines => json!({
            "guidelines": ["Consult current national guidance for this condition"],
        }),
    };

    if let Some(obj) = payload.as_object_mut() {
        obj.insert("reasoning".into(), json!(cause.reason()));
        obj.insert("confidence".into(), json!(CANNED_CONFIDENCE));
        obj.insert("recommendations".into(), json!([MANUAL_REVIEW_NOTE]));
        obj.insert("fallback".into(), json!(true));
    }
    payload
}
