//! Local post-processing of prescriptions: cost estimates, allergy warnings
//! and known interaction pairs. Matching is case-insensitive substring.

use medmcp_schema::PatientContext;
use serde_json::{json, Value};

pub const DEFAULT_COST_USD: f64 = 25.0;

const COSTS: &[(&str, f64)] = &[
    ("amoxicillin", 12.5),
    ("azithromycin", 24.0),
    ("ibuprofen", 8.0),
    ("acetaminophen", 6.5),
    ("lisinopril", 10.0),
    ("metformin", 9.0),
    ("albuterol", 38.0),
    ("prednisone", 7.5),
    ("omeprazole", 14.0),
    ("cetirizine", 9.5),
];

/// Allergy keyword → drug-name fragments that may cross-react.
const ALLERGY_KEYWORDS: &[(&str, &[&str])] = &[
    ("penicillin", &["penicillin", "cillin"]),
    ("sulfa", &["sulfa", "sulfamethoxazole"]),
    ("nsaid", &["ibuprofen", "naproxen", "diclofenac", "aspirin"]),
    ("aspirin", &["aspirin", "salicylate"]),
    ("cephalosporin", &["cef", "ceph"]),
    ("codeine", &["codeine", "morphine", "tramadol"]),
    ("opioid", &["codeine", "morphine", "oxycodone", "tramadol"]),
];

const INTERACTIONS: &[(&str, &str, &str)] = &[
    ("warfarin", "aspirin", "increased bleeding risk"),
    ("warfarin", "ibuprofen", "increased bleeding risk"),
    ("lisinopril", "potassium", "risk of hyperkalemia"),
    ("lisinopril", "spironolactone", "risk of hyperkalemia"),
    ("metformin", "contrast", "risk of lactic acidosis"),
    ("sertraline", "tramadol", "risk of serotonin syndrome"),
    ("simvastatin", "clarithromycin", "risk of myopathy"),
];

pub fn estimated_cost(drug: &str) -> f64 {
    let name = drug.trim().to_lowercase();
    COSTS
        .iter()
        .find(|(key, _)| *key == name)
        .or_else(|| COSTS.iter().find(|(key, _)| name.contains(key)))
        .map(|(_, cost)| *cost)
        .unwrap_or(DEFAULT_COST_USD)
}

pub fn allergy_warnings(drug: &str, allergies: &[String]) -> Vec<String> {
    let name = drug.to_lowercase();
    let mut warnings = Vec::new();
    for allergy in allergies {
        let allergy_lc = allergy.trim().to_lowercase();
        if allergy_lc.is_empty() {
            continue;
        }
        let fragments = ALLERGY_KEYWORDS
            .iter()
            .find(|(keyword, _)| allergy_lc.contains(keyword))
            .map(|(_, fragments)| *fragments);
        let hit = match fragments {
            Some(fragments) => fragments.iter().any(|f| name.contains(f)),
            None => name.contains(&allergy_lc),
        };
        if hit {
            warnings.push(format!(
                "Allergy warning: patient is allergic to {}; {} may cross-react",
                allergy.trim(),
                drug.trim()
            ));
        }
    }
    warnings
}

/// Known interactions between `drug` and any of `others`.
pub fn interaction_warnings<'a, I>(drug: &str, others: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let name = drug.to_lowercase();
    let mut warnings = Vec::new();
    for other in others {
        let other_lc = other.to_lowercase();
        if other_lc == name {
            continue;
        }
        for (a, b, effect) in INTERACTIONS {
            let matched = (name.contains(a) && other_lc.contains(b))
                || (name.contains(b) && other_lc.contains(a));
            if matched {
                let warning = format!("{} + {}: {effect}", drug.trim(), other.trim());
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
        }
    }
    warnings
}

/// Pairwise interactions within `medications`, each pair reported once.
pub fn pairwise_interactions(medications: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    for (i, drug) in medications.iter().enumerate() {
        let later = medications[i + 1..].iter().map(String::as_str);
        warnings.extend(interaction_warnings(drug, later));
    }
    warnings
}

fn medication_name(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("name")
            .or_else(|| obj.get("drug"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Annotates every entry of `content["medications"]` in place and returns
/// the warnings raised across all of them.
pub fn enhance_prescription(content: &mut Value, patient: &PatientContext) -> Vec<String> {
    let Some(medications) = content.get_mut("medications").and_then(Value::as_array_mut) else {
        return Vec::new();
    };

    let names: Vec<String> = medications.iter().filter_map(medication_name).collect();
    let mut all_warnings = Vec::new();

    for entry in medications.iter_mut() {
        let Some(name) = medication_name(entry) else {
            continue;
        };
        if entry.is_string() {
            *entry = json!({ "name": name });
        }

        let allergies = allergy_warnings(&name, &patient.allergies);
        let others = patient
            .current_medications
            .iter()
            .chain(names.iter())
            .map(String::as_str);
        let interactions = interaction_warnings(&name, others);

        if let Some(obj) = entry.as_object_mut() {
            obj.insert("estimated_cost".into(), json!(estimated_cost(&name)));
            obj.insert("cost_currency".into(), json!("USD"));
            obj.insert("allergy_warnings".into(), json!(allergies));
            obj.insert("interactions".into(), json!(interactions));
        }

        all_warnings.extend(allergies);
        for warning in interactions {
            if !all_warnings.contains(&warning) {
                all_warnings.push(warning);
            }
        }
    }

    all_warnings
}
