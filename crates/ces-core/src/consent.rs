//! Consent decision request and response types.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::identifier::PatientIdentifierSet;

/// Policy-defined obligation attached to a decision. Opaque to the pipeline;
/// only a `Redactor` interprets it.
pub type Obligation = Value;

/// Who is asking and why, derived from the inbound credential.
///
/// Only built through [`ContextAttributes::new`], so the actor is never blank.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAttributes {
    actor: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose_of_use: Option<Value>,
}

impl ContextAttributes {
    /// Returns `None` when the actor is missing or blank.
    pub fn new(actor: Value, purpose_of_use: Option<Value>) -> Option<Self> {
        if is_blank(&actor) {
            return None;
        }
        Some(Self {
            actor: vec![actor],
            purpose_of_use: purpose_of_use.filter(|pou| !pou.is_null()),
        })
    }

    /// Never empty.
    pub fn actor(&self) -> &[Value] {
        &self.actor
    }

    pub fn purpose_of_use(&self) -> Option<&Value> {
        self.purpose_of_use.as_ref()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

/// One question for the decision service: may this context see this patient?
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub context: Arc<ContextAttributes>,
    pub patient_id: PatientIdentifierSet,
}

impl DecisionRequest {
    pub fn new(context: Arc<ContextAttributes>, patient_id: PatientIdentifierSet) -> Self {
        Self {
            context,
            patient_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Permit,
    Deny,
}

impl Decision {
    pub const PERMIT_CODE: &'static str = "CONSENT_PERMIT";
    pub const DENY_CODE: &'static str = "CONSENT_DENY";

    /// Anything other than an explicit permit is a denial.
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some(Self::PERMIT_CODE) => Self::Permit,
            _ => Self::Deny,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Permit => Self::PERMIT_CODE,
            Self::Deny => Self::DENY_CODE,
        }
    }

    pub fn is_permit(&self) -> bool {
        matches!(self, Self::Permit)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsentDecision {
    pub decision: Decision,
    pub obligations: Vec<Obligation>,
}

impl ConsentDecision {
    pub fn permit() -> Self {
        Self {
            decision: Decision::Permit,
            obligations: Vec::new(),
        }
    }

    pub fn deny() -> Self {
        Self {
            decision: Decision::Deny,
            obligations: Vec::new(),
        }
    }

    pub fn with_obligations(mut self, obligations: Vec<Obligation>) -> Self {
        self.obligations = obligations;
        self
    }

    pub fn is_permit(&self) -> bool {
        self.decision.is_permit()
    }
}
