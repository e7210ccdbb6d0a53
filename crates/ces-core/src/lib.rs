pub mod consent;
pub mod error;
pub mod fhir;
pub mod fhir_reference;
pub mod identifier;

pub use consent::{ConsentDecision, ContextAttributes, Decision, DecisionRequest, Obligation};
pub use error::{CoreError, ErrorCategory, Result};
pub use fhir::{Bundle, BundleEntry, ClinicalResponse, Resource};
pub use fhir_reference::{FhirReference, PatientReference, UnresolvableReference, parse_reference};
pub use identifier::{PatientIdentifier, PatientIdentifierSet};
