//! Obligation-driven redaction of permitted resources.

use ces_core::{Obligation, Resource};
use serde_json::Value;

pub const ACT_CODE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";
pub const REDACT_CODE: &str = "REDACT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionOutcome {
    /// Release the resource, possibly with fields masked.
    Retained,
    /// Withhold the whole resource.
    Suppressed,
}

/// Applies decision obligations to a permitted resource. May mutate the
/// resource in place.
pub trait Redactor: Send + Sync {
    fn apply(&self, obligations: &[Obligation], resource: &mut Resource) -> RedactionOutcome;
}

/// Suppresses resources carrying a security label named by a `REDACT`
/// obligation. Other obligations are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityLabelRedactor;

impl SecurityLabelRedactor {
    fn is_redact(obligation: &Obligation) -> bool {
        let id = &obligation["id"];
        id["system"].as_str() == Some(ACT_CODE_SYSTEM) && id["code"].as_str() == Some(REDACT_CODE)
    }

    fn same_coding(a: &Value, b: &Value) -> bool {
        let code = a["code"].as_str();
        code.is_some() && code == b["code"].as_str() && a["system"].as_str() == b["system"].as_str()
    }
}

impl Redactor for SecurityLabelRedactor {
    fn apply(&self, obligations: &[Obligation], resource: &mut Resource) -> RedactionOutcome {
        let labels = resource.security_labels();
        let matched = obligations
            .iter()
            .filter(|obligation| Self::is_redact(obligation))
            .filter_map(|obligation| obligation["parameters"]["codes"].as_array())
            .flatten()
            .any(|code| labels.iter().any(|label| Self::same_coding(code, label)));

        if matched {
            tracing::debug!(
                resource_type = %resource.resource_type(),
                id = resource.id().unwrap_or_default(),
                "Resource suppressed by REDACT obligation"
            );
            RedactionOutcome::Suppressed
        } else {
            RedactionOutcome::Retained
        }
    }
}
