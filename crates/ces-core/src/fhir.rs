//! FHIR response model.
//!
//! A backend response is either a single resource or a `Bundle`. Only the
//! fields the consent pipeline reads are typed; everything else is carried
//! through untouched in the resource's JSON object or the `extra` maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

pub const BUNDLE_RESOURCE_TYPE: &str = "Bundle";

/// A single FHIR resource kept as its JSON object.
///
/// Construction guarantees a non-empty string `resourceType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Resource {
    body: Map<String, Value>,
}

impl Resource {
    pub fn resource_type(&self) -> &str {
        self.body
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Mutable access for in-place redaction.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.body
    }

    /// `meta.security` labels, empty when absent.
    pub fn security_labels(&self) -> &[Value] {
        self.body
            .get("meta")
            .and_then(|meta| meta.get("security"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

impl TryFrom<Map<String, Value>> for Resource {
    type Error = CoreError;

    fn try_from(body: Map<String, Value>) -> Result<Self> {
        match body.get("resourceType") {
            Some(Value::String(rt)) if !rt.is_empty() => Ok(Self { body }),
            Some(_) => Err(CoreError::not_a_resource("resourceType must be a non-empty string")),
            None => Err(CoreError::not_a_resource("missing resourceType")),
        }
    }
}

impl TryFrom<Value> for Resource {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::try_from(map),
            other => Err(CoreError::not_a_resource(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<Resource> for Map<String, Value> {
    fn from(resource: Resource) -> Self {
        resource.body
    }
}

/// One slot of a `Bundle.entry` array. The resource is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    /// `fullUrl`, `search`, `request`, `response`, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BundleEntry {
    pub fn resource_type(&self) -> Option<&str> {
        self.resource.as_ref().map(Resource::resource_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
    /// `id`, `type`, `link`, `meta`, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Bundle {
    pub fn new(entry: Vec<BundleEntry>) -> Self {
        Self {
            resource_type: BUNDLE_RESOURCE_TYPE.to_string(),
            total: None,
            entry,
            extra: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entry.len()
    }
}

/// Parsed body of a successful backend response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClinicalResponse {
    Resource(Resource),
    Bundle(Bundle),
}

impl ClinicalResponse {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let resource = Resource::try_from(value)?;
        if resource.resource_type() == BUNDLE_RESOURCE_TYPE {
            let bundle: Bundle = serde_json::from_value(resource.into_value())
                .map_err(|e| CoreError::invalid_bundle(e.to_string()))?;
            Ok(Self::Bundle(bundle))
        } else {
            Ok(Self::Resource(resource))
        }
    }

    pub fn resource_type(&self) -> &str {
        match self {
            Self::Resource(resource) => resource.resource_type(),
            Self::Bundle(_) => BUNDLE_RESOURCE_TYPE,
        }
    }

    pub fn is_bundle(&self) -> bool {
        matches!(self, Self::Bundle(_))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Short description used in shape-mismatch errors and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Resource(resource) => resource.resource_type().to_string(),
            Self::Bundle(bundle) => format!("Bundle with {} entries", bundle.len()),
        }
    }
}

impl From<Resource> for ClinicalResponse {
    fn from(resource: Resource) -> Self {
        Self::Resource(resource)
    }
}

impl From<Bundle> for ClinicalResponse {
    fn from(bundle: Bundle) -> Self {
        Self::Bundle(bundle)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(id: &str, patient: &str) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "subject": { "reference": patient }
        })
    }

    #[test]
    fn test_parse_single_resource() {
        let parsed = ClinicalResponse::from_value(observation("o1", "Patient/1")).unwrap();
        assert!(!parsed.is_bundle());
        assert_eq!(parsed.resource_type(), "Observation");
        match parsed {
            ClinicalResponse::Resource(r) => assert_eq!(r.id(), Some("o1")),
            ClinicalResponse::Bundle(_) => panic!("expected resource"),
        }
    }

    #[test]
    fn test_parse_bundle_keeps_auxiliary_fields() {
        let body = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 2,
            "link": [{ "relation": "self", "url": "http://x/Observation" }],
            "entry": [
                { "fullUrl": "http://x/Observation/o1", "resource": observation("o1", "Patient/1") },
                { "fullUrl": "http://x/Observation/o2", "resource": observation("o2", "Patient/2") }
            ]
        });
        let parsed = ClinicalResponse::from_value(body).unwrap();
        let ClinicalResponse::Bundle(bundle) = parsed else {
            panic!("expected bundle");
        };
        assert_eq!(bundle.total, Some(2));
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.extra["type"], "searchset");
        assert_eq!(bundle.entry[0].extra["fullUrl"], "http://x/Observation/o1");
        assert_eq!(bundle.entry[1].resource_type(), Some("Observation"));
    }

    #[test]
    fn test_bundle_serialization_round_trips_shape() {
        let body = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [{ "resource": observation("o1", "Patient/1") }]
        });
        let parsed = ClinicalResponse::from_value(body.clone()).unwrap();
        assert_eq!(parsed.to_value().unwrap(), body);
    }

    #[test]
    fn test_empty_bundle_omits_entry() {
        let bundle = Bundle::new(Vec::new());
        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value, json!({ "resourceType": "Bundle" }));
    }

    #[test]
    fn test_entry_without_resource() {
        let body = json!({
            "resourceType": "Bundle",
            "entry": [{ "fullUrl": "urn:uuid:1" }]
        });
        let ClinicalResponse::Bundle(bundle) = ClinicalResponse::from_value(body).unwrap() else {
            panic!("expected bundle");
        };
        assert_eq!(bundle.entry[0].resource_type(), None);
    }

    #[test]
    fn test_rejects_non_resources() {
        let err = ClinicalResponse::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, CoreError::NotAResource(_)));

        let err = ClinicalResponse::from_value(json!({ "id": "x" })).unwrap_err();
        assert!(matches!(err, CoreError::NotAResource(_)));

        let err = ClinicalResponse::from_slice(b"<html/>").unwrap_err();
        assert!(matches!(err, CoreError::JsonError(_)));
    }

    #[test]
    fn test_rejects_malformed_bundle() {
        let body = json!({ "resourceType": "Bundle", "entry": "nope" });
        let err = ClinicalResponse::from_value(body).unwrap_err();
        assert!(matches!(err, CoreError::InvalidBundle { .. }));
    }

    #[test]
    fn test_security_labels() {
        let resource = Resource::try_from(json!({
            "resourceType": "Observation",
            "meta": { "security": [{ "system": "s", "code": "R" }] }
        }))
        .unwrap();
        assert_eq!(resource.security_labels().len(), 1);

        let bare = Resource::try_from(json!({ "resourceType": "Observation" })).unwrap();
        assert!(bare.security_labels().is_empty());
    }
}
