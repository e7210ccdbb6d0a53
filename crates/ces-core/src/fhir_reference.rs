//! FHIR reference parsing and patient reference extraction.
//!
//! The consent pipeline needs to know which patient a resource concerns and
//! how to address that patient on the backend server. References are parsed
//! into a canonical `Type/id[/_history/v]` form so that two spellings of the
//! same target (relative, or absolute under the backend base) compare equal.
//!
//! # Reference Formats
//!
//! - Relative: `Patient/123`
//! - Versioned: `Patient/123/_history/1`
//! - Absolute URL under the backend base: `http://backend/fhir/Patient/123`
//! - Contained (`#id`), URN (`urn:uuid:..`) and foreign absolute URLs cannot
//!   be looked up on the backend.
//!
//! # Example
//!
//! ```
//! use ces_core::fhir_reference::parse_reference;
//!
//! let r = parse_reference("Patient/123/_history/2", None).unwrap();
//! assert_eq!(r.resource_type, "Patient");
//! assert_eq!(r.id, "123");
//! assert_eq!(r.version, Some("2".to_string()));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::fhir::Resource;

pub const PATIENT_RESOURCE_TYPE: &str = "Patient";

/// Fields that denote the patient a resource concerns, in priority order.
pub const PATIENT_REFERENCE_FIELDS: [&str; 2] = ["patient", "subject"];

/// A successfully parsed, locally resolvable FHIR reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    pub resource_type: String,
    pub id: String,
    /// Version from a `_history` suffix
    pub version: Option<String>,
}

impl FhirReference {
    /// `Type/id`
    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// `Type/id/_history/version`, or `Type/id` when unversioned.
    pub fn to_versioned(&self) -> String {
        match &self.version {
            Some(v) => format!("{}/{}/_history/{}", self.resource_type, self.id, v),
            None => self.to_relative(),
        }
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_versioned())
    }
}

/// A reference that cannot be looked up on the backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvableReference {
    Contained(String),
    Urn(String),
    /// Absolute URL outside the backend base
    External(String),
    Invalid(String),
}

impl fmt::Display for UnresolvableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contained(id) => write!(f, "contained reference: #{id}"),
            Self::Urn(urn) => write!(f, "URN reference: {urn}"),
            Self::External(url) => write!(f, "external reference: {url}"),
            Self::Invalid(reason) => write!(f, "invalid reference: {reason}"),
        }
    }
}

impl std::error::Error for UnresolvableReference {}

/// Parse a FHIR reference string into its components.
///
/// `base_url` is the backend server base; absolute URLs under it are treated
/// as local references, every other absolute URL is external.
pub fn parse_reference(
    reference: &str,
    base_url: Option<&str>,
) -> Result<FhirReference, UnresolvableReference> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(UnresolvableReference::Invalid("empty reference".to_string()));
    }

    if let Some(contained_id) = reference.strip_prefix('#') {
        return Err(UnresolvableReference::Contained(contained_id.to_string()));
    }

    if reference.starts_with("urn:") {
        return Err(UnresolvableReference::Urn(reference.to_string()));
    }

    let path = if reference.contains("://") {
        let Some(base) = base_url else {
            return Err(UnresolvableReference::External(reference.to_string()));
        };
        let normalized_base = base.trim_end_matches('/');
        match reference.strip_prefix(normalized_base) {
            Some(suffix) if suffix.is_empty() || suffix.starts_with('/') => {
                suffix.trim_start_matches('/')
            }
            _ => return Err(UnresolvableReference::External(reference.to_string())),
        }
    } else {
        reference
    };

    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 2 {
        return Err(UnresolvableReference::Invalid(format!(
            "reference must contain at least Type/id: {reference}"
        )));
    }

    let resource_type = parts[0];
    let id = parts[1];

    if !resource_type
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
    {
        return Err(UnresolvableReference::Invalid(format!(
            "resource type must start with uppercase letter: {resource_type}"
        )));
    }

    if id.is_empty() {
        return Err(UnresolvableReference::Invalid(
            "resource id cannot be empty".to_string(),
        ));
    }

    let version = if parts.len() >= 4 && parts[2] == "_history" && !parts[3].is_empty() {
        Some(parts[3].to_string())
    } else {
        None
    };

    Ok(FhirReference {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        version,
    })
}

/// The patient a resource concerns, as addressed on the backend server.
///
/// Equality and hashing use the canonical target only, so `Patient/1` and
/// `http://backend/fhir/Patient/1` are the same key while the raw spelling
/// is kept for logging.
#[derive(Debug, Clone)]
pub struct PatientReference {
    raw: String,
    target: FhirReference,
}

impl PatientReference {
    pub fn parse(raw: &str, base_url: Option<&str>) -> Result<Self, UnresolvableReference> {
        let target = parse_reference(raw, base_url)?;
        Ok(Self {
            raw: raw.to_string(),
            target,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn target(&self) -> &FhirReference {
        &self.target
    }

    /// Canonical serialization used as the deduplication key.
    pub fn canonical(&self) -> String {
        self.target.to_versioned()
    }

    /// Pull the patient reference out of a resource.
    ///
    /// Looks at `patient.reference`, then `subject.reference`. Returns `None`
    /// when neither is present, the target is not a `Patient`, or the
    /// reference cannot be looked up on the backend; callers must read `None`
    /// as "subject unknown".
    pub fn extract(resource: &Resource, base_url: Option<&str>) -> Option<Self> {
        let raw = PATIENT_REFERENCE_FIELDS.iter().find_map(|field| {
            resource
                .get(field)
                .and_then(|value| value.get("reference"))
                .and_then(Value::as_str)
                .filter(|reference| !reference.is_empty())
        })?;

        match Self::parse(raw, base_url) {
            Ok(reference) if reference.target.resource_type == PATIENT_RESOURCE_TYPE => {
                Some(reference)
            }
            Ok(reference) => {
                tracing::warn!(
                    resource_type = %resource.resource_type(),
                    reference = %raw,
                    target_type = %reference.target.resource_type,
                    "Subject is not a Patient; treating subject as unknown"
                );
                None
            }
            Err(reason) => {
                tracing::debug!(
                    resource_type = %resource.resource_type(),
                    reference = %raw,
                    %reason,
                    "Patient reference cannot be resolved on the backend"
                );
                None
            }
        }
    }
}

impl PartialEq for PatientReference {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl Eq for PatientReference {}

impl Hash for PatientReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
    }
}

impl fmt::Display for PatientReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)
    }
}
