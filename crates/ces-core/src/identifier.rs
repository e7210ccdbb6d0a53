use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A `(system, value)` pair naming a patient in the decision service's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl PatientIdentifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            value: Some(value.into()),
        }
    }

    /// Trim a FHIR `Identifier` down to its `system` and `value`.
    pub fn from_fhir(identifier: &Value) -> Self {
        let field = |name: &str| {
            identifier
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            system: field("system"),
            value: field("value"),
        }
    }
}

/// Ordered identifiers of one patient, derived from one backend lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PatientIdentifierSet(Vec<PatientIdentifier>);

impl PatientIdentifierSet {
    pub fn new(identifiers: Vec<PatientIdentifier>) -> Self {
        Self(identifiers)
    }

    /// Build from a Patient resource body; a missing `identifier` array
    /// yields an empty set.
    pub fn from_patient(patient: &Value) -> Self {
        let identifiers = patient
            .get("identifier")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(PatientIdentifier::from_fhir).collect())
            .unwrap_or_default();
        Self(identifiers)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatientIdentifier> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_patient_trims_to_system_and_value() {
        let patient = json!({
            "resourceType": "Patient",
            "id": "1",
            "identifier": [
                {
                    "use": "official",
                    "type": { "text": "MRN" },
                    "system": "urn:official:id",
                    "value": "10001"
                }
            ]
        });
        let set = PatientIdentifierSet::from_patient(&patient);
        assert_eq!(
            set,
            PatientIdentifierSet::new(vec![PatientIdentifier::new("urn:official:id", "10001")])
        );
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            json!([{ "system": "urn:official:id", "value": "10001" }])
        );
    }

    #[test]
    fn test_from_patient_without_identifiers() {
        let set = PatientIdentifierSet::from_patient(&json!({ "resourceType": "Patient" }));
        assert!(set.is_empty());
    }

    #[test]
    fn test_partial_identifier_keeps_present_fields() {
        let id = PatientIdentifier::from_fhir(&json!({ "value": "42" }));
        assert_eq!(id.system, None);
        assert_eq!(serde_json::to_value(&id).unwrap(), json!({ "value": "42" }));
    }
}
