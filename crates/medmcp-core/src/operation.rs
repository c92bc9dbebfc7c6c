use medmcp_schema::{BusMessage, Recommendation, RecommendationKind, SessionId};

/// AI-backed orchestrator operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSession,
    AddSymptoms,
    SetDiagnosis,
    GeneratePrescription,
    CheckInteractions,
    ClinicalGuidelines,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSession => "create_session",
            Self::AddSymptoms => "add_symptoms",
            Self::SetDiagnosis => "set_diagnosis",
            Self::GeneratePrescription => "generate_prescription",
            Self::CheckInteractions => "check_drug_interactions",
            Self::ClinicalGuidelines => "clinical_guidelines",
        }
    }

    pub fn kind(&self) -> RecommendationKind {
        match self {
            Self::CreateSession => RecommendationKind::InitialAssessment,
            Self::AddSymptoms => RecommendationKind::SymptomAnalysis,
            Self::SetDiagnosis => RecommendationKind::DiagnosisValidation,
            Self::GeneratePrescription => RecommendationKind::Prescription,
            Self::CheckInteractions => RecommendationKind::DrugInteraction,
            Self::ClinicalGuidelines => RecommendationKind::ClinicalGuideline,
        }
    }

    /// Top-level key a usable model reply must carry.
    pub fn expected_key(&self) -> Option<&'static str> {
        match self {
            Self::CreateSession => None,
            Self::AddSymptoms => Some("possible_conditions"),
            Self::SetDiagnosis => None,
            Self::GeneratePrescription => Some("medications"),
            Self::CheckInteractions => Some("interactions"),
            Self::ClinicalGuidelines => Some("guidelines"),
        }
    }

    /// Confidence assumed when a parsed reply does not state one.
    pub fn default_confidence(&self) -> f64 {
        match self {
            Self::GeneratePrescription => 0.75,
            _ => 0.7,
        }
    }

    /// Notification published once the recommendation is stored.
    /// `CreateSession` is announced separately with the patient name.
    pub fn event(&self, session_id: SessionId, recommendation: Recommendation) -> Option<BusMessage> {
        let msg = match self {
            Self::CreateSession => return None,
            Self::AddSymptoms => BusMessage::SymptomsAnalyzed {
                session_id,
                recommendation,
            },
            Self::SetDiagnosis => BusMessage::DiagnosisValidated {
                session_id,
                recommendation,
            },
            Self::GeneratePrescription => BusMessage::PrescriptionGenerated {
                session_id,
                recommendation,
            },
            Self::CheckInteractions => BusMessage::InteractionsChecked {
                session_id,
                recommendation,
            },
            Self::ClinicalGuidelines => BusMessage::GuidelinesProvided {
                session_id,
                recommendation,
            },
        };
        Some(msg)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
