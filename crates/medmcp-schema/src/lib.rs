use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// AI provider a session was opened against.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    #[default]
    Gemini,
    Claude,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Claude => "claude",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    #[serde(default)]
    pub blood_pressure: String,
    #[serde(default)]
    pub heart_rate: Option<u32>,
    /// Degrees Celsius
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Percent SpO2
    #[serde(default)]
    pub oxygen_saturation: Option<f32>,
}

/// Read-only snapshot of the patient, copied in when a session opens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub medical_history: Vec<String>,
    #[serde(default)]
    pub current_medications: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub vitals: Option<Vitals>,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    InitialAssessment,
    SymptomAnalysis,
    DiagnosisValidation,
    Prescription,
    DrugInteraction,
    ClinicalGuideline,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialAssessment => "initial_assessment",
            Self::SymptomAnalysis => "symptom_analysis",
            Self::DiagnosisValidation => "diagnosis_validation",
            Self::Prescription => "prescription",
            Self::DrugInteraction => "drug_interaction",
            Self::ClinicalGuideline => "clinical_guideline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub kind: RecommendationKind,
    pub content: serde_json::Value,
    /// Always on the 0.0..=1.0 scale.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub provider: ProviderTag,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Content came from a fallback path rather than a parsed model reply.
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub patient: PatientContext,
    pub symptoms: Vec<String>,
    pub diagnosis: Option<String>,
    pub recommendations: Vec<Recommendation>,
    pub is_active: bool,
    pub provider: ProviderTag,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(patient: PatientContext, provider: ProviderTag) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            patient,
            symptoms: Vec::new(),
            diagnosis: None,
            recommendations: Vec::new(),
            is_active: true,
            provider,
            confidence: 0.0,
            created_at: now,
            last_accessed: now,
            closed_at: None,
        }
    }

    /// Appends a recommendation and recomputes the running confidence.
    pub fn push_recommendation(&mut self, recommendation: Recommendation) {
        self.recommendations.push(recommendation);
        self.confidence = mean_confidence(&self.recommendations);
    }

    pub fn has_diagnosis(&self) -> bool {
        self.diagnosis
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn summary(&self) -> SessionSummary {
        let end = self.closed_at.unwrap_or_else(Utc::now);
        SessionSummary {
            session_id: self.id,
            patient_name: self.patient.name.clone(),
            is_active: self.is_active,
            symptom_count: self.symptoms.len(),
            diagnosis: self.diagnosis.clone(),
            recommendation_count: self.recommendations.len(),
            confidence: self.confidence,
            duration_seconds: (end - self.created_at).num_seconds().max(0),
        }
    }
}

pub fn mean_confidence(recommendations: &[Recommendation]) -> f64 {
    if recommendations.is_empty() {
        return 0.0;
    }
    let total: f64 = recommendations.iter().map(|r| r.confidence).sum();
    total / recommendations.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub patient_name: String,
    pub is_active: bool,
    pub symptom_count: usize,
    pub diagnosis: Option<String>,
    pub recommendation_count: usize,
    pub confidence: f64,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    SessionCreated {
        session_id: SessionId,
        patient_name: String,
        provider: ProviderTag,
        at: DateTime<Utc>,
    },
    SymptomsAnalyzed {
        session_id: SessionId,
        recommendation: Recommendation,
    },
    DiagnosisValidated {
        session_id: SessionId,
        recommendation: Recommendation,
    },
    PrescriptionGenerated {
        session_id: SessionId,
        recommendation: Recommendation,
    },
    InteractionsChecked {
        session_id: SessionId,
        recommendation: Recommendation,
    },
    GuidelinesProvided {
        session_id: SessionId,
        recommendation: Recommendation,
    },
    SessionClosed {
        summary: SessionSummary,
    },
    AiDegraded {
        session_id: SessionId,
        operation: String,
        reason: String,
    },
}

impl BusMessage {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::SymptomsAnalyzed { session_id, .. }
            | Self::DiagnosisValidated { session_id, .. }
            | Self::PrescriptionGenerated { session_id, .. }
            | Self::InteractionsChecked { session_id, .. }
            | Self::GuidelinesProvided { session_id, .. }
            | Self::AiDegraded { session_id, .. } => *session_id,
            Self::SessionClosed { summary } => summary.session_id,
        }
    }
}
