//! Consent enforcement pipeline.
//!
//! [`ConsentEnforcer`] drives one backend response through classification,
//! labeling, identity resolution, consent decisions and redaction. The
//! collaborators it talks to sit behind the traits re-exported here.

pub mod classifier;
pub mod decision;
pub mod error;
pub mod identity;
pub mod labeling;
pub mod orchestrator;
pub mod redaction;

pub use classifier::UnprotectedResourceTypes;
pub use decision::{CdsDecisionService, ConsentDecisionService, DecisionClient, DecisionError};
pub use error::{DenyReason, EnforcementError};
pub use identity::{FhirPatientLookup, IdentityResolver, LookupError, PatientLookup};
pub use labeling::{Labeler, LabelingError, PassthroughLabeler, SlsLabeler};
pub use orchestrator::{
    ConsentEnforcer, ConsentEnforcerBuilder, EnforcementOutcome, InboundRequest,
};
pub use redaction::{RedactionOutcome, Redactor, SecurityLabelRedactor};
