use std::fmt::Write as _;

use medmcp_provider::LlmMessage;
use medmcp_schema::{PatientContext, Session, Vitals};

const CLINICAL_GUIDELINES: &str = "\
Clinical guidelines:
- Prefer first-line, guideline-recommended therapies and the lowest effective dose.
- Always check documented allergies and cross-reactivity before suggesting a drug.
- Flag interactions with the patient's current medications.
- Escalate red-flag findings (chest pain, SpO2 below 92%, altered consciousness) for urgent review.
- You support a licensed clinician; never present output as a final diagnosis.";

const JSON_ONLY: &str = "Respond with a single JSON object and no other text.";

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none reported".to_string()
    } else {
        items.join(", ")
    }
}

fn vitals_line(vitals: &Vitals) -> String {
    let mut parts = Vec::new();
    if !vitals.blood_pressure.trim().is_empty() {
        parts.push(format!("BP {}", vitals.blood_pressure.trim()));
    }
    if let Some(hr) = vitals.heart_rate {
        parts.push(format!("HR {hr} bpm"));
    }
    if let Some(temp) = vitals.temperature {
        parts.push(format!("temp {temp:.1} C"));
    }
    if let Some(spo2) = vitals.oxygen_saturation {
        parts.push(format!("SpO2 {spo2:.0}%"));
    }
    if parts.is_empty() {
        "not recorded".to_string()
    } else {
        parts.join(", ")
    }
}

/// Patient block shared by every prompt.
pub fn patient_summary(patient: &PatientContext) -> String {
    let mut out = String::new();
    let name = if patient.name.trim().is_empty() {
        "unnamed patient"
    } else {
        patient.name.trim()
    };
    let gender = if patient.gender.trim().is_empty() {
        "unspecified"
    } else {
        patient.gender.trim()
    };
    let _ = writeln!(out, "Patient: {name} (age {}, gender {gender})", patient.age);
    let _ = writeln!(out, "Medical history: {}", list_or_none(&patient.medical_history));
    let _ = writeln!(
        out,
        "Current medications: {}",
        list_or_none(&patient.current_medications)
    );
    let _ = writeln!(out, "Allergies: {}", list_or_none(&patient.allergies));
    let vitals = patient
        .vitals
        .as_ref()
        .map(vitals_line)
        .unwrap_or_else(|| "not recorded".to_string());
    let _ = write!(out, "Vitals: {vitals}");
    out
}

pub fn system_prompt(patient: &PatientContext) -> String {
    format!(
        "You are a clinical decision-support assistant working alongside a physician.\n\n{}\n\n{CLINICAL_GUIDELINES}",
        patient_summary(patient)
    )
}

fn conversation(session: &Session, user: String) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(system_prompt(&session.patient)),
        LlmMessage::user(user),
    ]
}

pub fn initial_assessment(patient: &PatientContext) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(system_prompt(patient)),
        LlmMessage::user(format!(
            "Give an initial assessment of this patient before any symptoms are recorded. \
             Note risk factors from the history, medications and vitals.\n{JSON_ONLY} \
             Use keys: \"assessment\" (string), \"risk_factors\" (array of strings), \
             \"recommendations\" (array of strings), \"confidence\" (0.0-1.0)."
        )),
    ]
}

pub fn symptom_analysis(session: &Session) -> Vec<LlmMessage> {
    let user = format!(
        "Reported symptoms: {}.\n\
         Provide a differential diagnosis ranked by likelihood, with the tests that would \
         discriminate between them.\n{JSON_ONLY} Use keys: \"possible_conditions\" (array of \
         objects with \"name\", \"likelihood\", \"rationale\"), \"recommended_tests\" (array of \
         strings), \"red_flags\" (array of strings), \"reasoning\" (string), \"confidence\" (0.0-1.0).",
        list_or_none(&session.symptoms)
    );
    conversation(session, user)
}

pub fn diagnosis_validation(session: &Session, diagnosis: &str) -> Vec<LlmMessage> {
    let user = format!(
        "Proposed diagnosis: {diagnosis}\nReported symptoms: {}.\n\
         Assess whether the diagnosis is consistent with the presentation and list \
         alternatives worth excluding.\n{JSON_ONLY} Use keys: \"is_consistent\" (boolean), \
         \"supporting_findings\" (array of strings), \"alternative_diagnoses\" (array of strings), \
         \"reasoning\" (string), \"confidence\" (0.0-1.0).",
        list_or_none(&session.symptoms)
    );
    conversation(session, user)
}

pub fn prescription(session: &Session) -> Vec<LlmMessage> {
    let patient = &session.patient;
    let user = format!(
        "Diagnosis: {}\nSymptoms: {}\nCurrent medications: {}\nAllergies: {}\nAge: {}, gender: {}\n\
         Suggest a prescription. Avoid anything the patient is allergic to.\n{JSON_ONLY} Use keys: \
         \"medications\" (array of objects with \"name\", \"dosage\", \"frequency\", \"duration\", \
         \"instructions\"), \"non_drug_advice\" (array of strings), \"reasoning\" (string), \
         \"confidence\" (0.0-1.0).",
        session.diagnosis.as_deref().unwrap_or_default(),
        list_or_none(&session.symptoms),
        list_or_none(&patient.current_medications),
        list_or_none(&patient.allergies),
        patient.age,
        if patient.gender.trim().is_empty() {
            "unspecified"
        } else {
            patient.gender.trim()
        },
    );
    conversation(session, user)
}

pub fn drug_interactions(session: &Session, medications: &[String]) -> Vec<LlmMessage> {
    let user = format!(
        "Check for interactions between these medications: {}.\n\
         Also consider the patient's current medications and allergies.\n{JSON_ONLY} Use keys: \
         \"interactions\" (array of objects with \"drugs\", \"severity\", \"description\"), \
         \"reasoning\" (string), \"confidence\" (0.0-1.0).",
        list_or_none(medications)
    );
    conversation(session, user)
}

pub fn clinical_guidelines(session: &Session, condition: &str) -> Vec<LlmMessage> {
    let user = format!(
        "Summarise current clinical guidelines for managing: {condition}.\n\
         Tailor them to this patient.\n{JSON_ONLY} Use keys: \"guidelines\" (array of strings), \
         \"first_line_treatment\" (string), \"follow_up\" (string), \"reasoning\" (string), \
         \"confidence\" (0.0-1.0)."
    );
    conversation(session, user)
}

#[cfg(test)]
mod tests {
    use medmcp_provider::Role;
    use medmcp_schema::ProviderTag;

    use super::*;

    fn patient() -> PatientContext {
        PatientContext {
            id: "p1".into(),
            name: "Ada Lovelace".into(),
            age: 40,
            gender: "female".into(),
            medical_history: vec!["asthma".into()],
            current_medications: vec!["albuterol".into()],
            allergies: vec!["penicillin".into()],
            vitals: Some(Vitals {
                blood_pressure: "120/80".into(),
                heart_rate: Some(72),
                temperature: Some(38.2),
                oxygen_saturation: Some(97.0),
            }),
        }
    }

    #[test]
    fn system_prompt_embeds_patient_and_guidelines() {
        let prompt = system_prompt(&patient());
        assert!(prompt.contains("Ada Lovelace"));
        assert!(prompt.contains("Allergies: penicillin"));
        assert!(prompt.contains("BP 120/80, HR 72 bpm, temp 38.2 C, SpO2 97%"));
        assert!(prompt.contains("Clinical guidelines:"));
    }

    #[test]
    fn missing_fields_render_placeholders() {
        let summary = patient_summary(&PatientContext::default());
        assert!(summary.contains("unnamed patient"));
        assert!(summary.contains("Allergies: none reported"));
        assert!(summary.contains("Vitals: not recorded"));
    }

    #[test]
    fn symptom_prompt_lists_all_symptoms() {
        let mut session = Session::new(patient(), ProviderTag::Gemini);
        session.symptoms = vec!["fever".into(), "cough".into()];
        let messages = symptom_analysis(&session);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].text.contains("fever, cough"));
        assert!(messages[1].text.contains("possible_conditions"));
    }

    #[test]
    fn prescription_prompt_includes_diagnosis_and_allergies() {
        let mut session = Session::new(patient(), ProviderTag::Gemini);
        session.diagnosis = Some("bronchitis".into());
        let messages = prescription(&session);
        let user = &messages[1].text;
        assert!(user.contains("Diagnosis: bronchitis"));
        assert!(user.contains("Allergies: penicillin"));
        assert!(user.contains("\"medications\""));
    }
}
