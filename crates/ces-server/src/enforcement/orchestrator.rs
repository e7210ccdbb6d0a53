//! Consent enforcement for one backend response.
//!
//! ```text
//! classify ─┬─ unprotected ─────────────────────────────────────▶ Passthrough
//!           └─ protected ─▶ context ─▶ label ─▶ extract references
//!                 ─▶ resolve identities ─▶ decide ─▶ redact + filter ─▶ Enforced
//! ```
//!
//! Any failure along the protected path ends in an [`EnforcementError`];
//! nothing partially enforced is ever returned.

use std::sync::Arc;

use ces_auth::CredentialVerifier;
use ces_core::{
    Bundle, BundleEntry, ClinicalResponse, ConsentDecision, ContextAttributes, CoreError,
    DecisionRequest, PatientIdentifierSet, PatientReference, Resource,
};

use super::classifier::UnprotectedResourceTypes;
use super::decision::{ConsentDecisionService, DecisionClient};
use super::error::{DenyReason, EnforcementError};
use super::identity::{IdentityResolver, PatientLookup};
use super::labeling::{Labeler, PassthroughLabeler};
use super::redaction::{RedactionOutcome, Redactor, SecurityLabelRedactor};

/// The parts of the inbound request enforcement depends on.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub path: &'a str,
    /// Raw `Authorization` header value.
    pub authorization: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnforcementOutcome {
    /// Nothing to enforce; the caller should send the original bytes.
    Passthrough(ClinicalResponse),
    Enforced(ClinicalResponse),
}

/// Per-position state while a bundle moves through the pipeline.
#[derive(Debug)]
struct EntrySlot {
    entry: BundleEntry,
    reference: Option<PatientReference>,
    identifiers: Option<PatientIdentifierSet>,
    decision: Option<ConsentDecision>,
    keep: bool,
}

impl EntrySlot {
    fn new(entry: BundleEntry, backend_base: Option<&str>) -> Self {
        let reference = entry
            .resource
            .as_ref()
            .and_then(|resource| PatientReference::extract(resource, backend_base));
        Self {
            entry,
            reference,
            identifiers: None,
            decision: None,
            keep: false,
        }
    }
}

pub struct ConsentEnforcer {
    unprotected: UnprotectedResourceTypes,
    backend_base: Option<String>,
    credentials: Arc<dyn CredentialVerifier>,
    labeler: Arc<dyn Labeler>,
    identities: IdentityResolver,
    decisions: DecisionClient,
    redactor: Arc<dyn Redactor>,
}

impl ConsentEnforcer {
    pub fn builder(
        credentials: Arc<dyn CredentialVerifier>,
        lookup: Arc<dyn PatientLookup>,
        decisions: Arc<dyn ConsentDecisionService>,
    ) -> ConsentEnforcerBuilder {
        ConsentEnforcerBuilder::new(credentials, lookup, decisions)
    }

    pub fn is_protected(&self, response: &ClinicalResponse) -> bool {
        self.unprotected.is_protected(response)
    }

    pub async fn enforce(
        &self,
        request: &InboundRequest<'_>,
        response: ClinicalResponse,
    ) -> Result<EnforcementOutcome, EnforcementError> {
        if !self.is_protected(&response) {
            tracing::debug!(
                path = request.path,
                resource_type = response.resource_type(),
                "Response does not require consent enforcement"
            );
            return Ok(EnforcementOutcome::Passthrough(response));
        }

        let context = match self.credentials.verify(request.authorization) {
            Ok(context) => Arc::new(context),
            Err(err) => {
                tracing::warn!(path = request.path, reason = err.reason(), "Credential rejected");
                return Err(err.into());
            }
        };

        let result = match response {
            ClinicalResponse::Resource(resource) => self
                .enforce_resource(context, resource)
                .await
                .map(ClinicalResponse::Resource),
            ClinicalResponse::Bundle(bundle) => self
                .enforce_bundle(context, bundle)
                .await
                .map(ClinicalResponse::Bundle),
        };

        match result {
            Ok(enforced) => Ok(EnforcementOutcome::Enforced(enforced)),
            Err(EnforcementError::ConsentDeny(reason)) => {
                tracing::warn!(path = request.path, %reason, "Consent denied access");
                Err(EnforcementError::ConsentDeny(reason))
            }
            Err(err) => {
                tracing::error!(
                    path = request.path,
                    kind = err.kind(),
                    error = %err,
                    "Consent enforcement failed"
                );
                Err(err)
            }
        }
    }

    async fn enforce_resource(
        &self,
        context: Arc<ContextAttributes>,
        resource: Resource,
    ) -> Result<Resource, EnforcementError> {
        let mut labeled = match self.label(resource.into()).await? {
            ClinicalResponse::Resource(labeled) => labeled,
            other => {
                return Err(shape_error(CoreError::shape_mismatch(
                    "a single resource",
                    other.describe(),
                )));
            }
        };

        let reference = PatientReference::extract(&labeled, self.backend_base.as_deref())
            .ok_or_else(|| EnforcementError::deny(DenyReason::UnidentifiableSubject))?;
        tracing::debug!(reference = %reference, "Patient reference extracted");

        let identifiers = self
            .identities
            .resolve_one(&reference)
            .await
            .map_err(|e| EnforcementError::deny(DenyReason::ResolutionFailed(e.to_string())))?;

        let decision = self
            .decisions
            .decide_one(&DecisionRequest::new(context, identifiers))
            .await
            .map_err(|e| EnforcementError::deny(DenyReason::DecisionFailed(e.to_string())))?;
        tracing::info!(
            resource_type = %labeled.resource_type(),
            decision = %decision.decision,
            "Consent decision"
        );

        if !decision.is_permit() {
            return Err(EnforcementError::deny(DenyReason::Denied));
        }
        match self.redactor.apply(&decision.obligations, &mut labeled) {
            RedactionOutcome::Retained => Ok(labeled),
            RedactionOutcome::Suppressed => Err(EnforcementError::deny(DenyReason::Suppressed)),
        }
    }

    async fn enforce_bundle(
        &self,
        context: Arc<ContextAttributes>,
        bundle: Bundle,
    ) -> Result<Bundle, EnforcementError> {
        let expected = bundle.len();
        let mut labeled = match self.label(bundle.into()).await? {
            ClinicalResponse::Bundle(labeled) if labeled.len() == expected => labeled,
            other => {
                return Err(shape_error(CoreError::shape_mismatch(
                    format!("Bundle with {expected} entries"),
                    other.describe(),
                )));
            }
        };
        // The count no longer describes what will be released.
        labeled.total = None;

        let base = self.backend_base.as_deref();
        let mut slots: Vec<EntrySlot> = std::mem::take(&mut labeled.entry)
            .into_iter()
            .map(|entry| EntrySlot::new(entry, base))
            .collect();

        let references: Vec<&PatientReference> = slots
            .iter()
            .filter_map(|slot| slot.reference.as_ref())
            .collect();
        tracing::debug!(
            entries = slots.len(),
            with_reference = references.len(),
            "Patient references extracted"
        );
        let identifiers = self
            .identities
            .resolve_many(&references)
            .await
            .map_err(|e| EnforcementError::deny(DenyReason::ResolutionFailed(e.to_string())))?;
        fill_slots(
            &mut slots,
            identifiers,
            |slot| slot.reference.is_some(),
            |slot, identifiers| slot.identifiers = Some(identifiers),
        )
        .map_err(|e| EnforcementError::deny(DenyReason::ResolutionFailed(e)))?;

        let requests: Vec<DecisionRequest> = slots
            .iter()
            .filter_map(|slot| slot.identifiers.clone())
            .map(|identifiers| DecisionRequest::new(context.clone(), identifiers))
            .collect();
        let decisions = self
            .decisions
            .decide_many(&requests)
            .await
            .map_err(|e| EnforcementError::deny(DenyReason::DecisionFailed(e.to_string())))?;
        fill_slots(
            &mut slots,
            decisions,
            |slot| slot.identifiers.is_some(),
            |slot, decision| slot.decision = Some(decision),
        )
        .map_err(|e| EnforcementError::deny(DenyReason::DecisionFailed(e)))?;

        for slot in &mut slots {
            self.reconcile(slot);
        }

        let before = slots.len();
        labeled.entry = slots
            .into_iter()
            .filter(|slot| slot.keep)
            .map(|slot| slot.entry)
            .collect();
        tracing::info!(
            entries = before,
            released = labeled.entry.len(),
            "Bundle consent enforced"
        );
        Ok(labeled)
    }

    /// Keep a slot iff it was permitted and redaction did not suppress it.
    fn reconcile(&self, slot: &mut EntrySlot) {
        slot.keep = match (&slot.decision, slot.entry.resource.as_mut()) {
            (Some(decision), Some(resource)) if decision.is_permit() => {
                self.redactor.apply(&decision.obligations, resource) == RedactionOutcome::Retained
            }
            _ => false,
        };
    }

    async fn label(&self, response: ClinicalResponse) -> Result<ClinicalResponse, EnforcementError> {
        self.labeler
            .label(response)
            .await
            .map_err(|e| EnforcementError::internal(format!("labeling failed: {e}")))
    }
}

/// Hand one result to each selected slot, in slot order.
///
/// A batch that does not line up with the selection is rejected rather than
/// shifted onto the wrong entries.
fn fill_slots<T>(
    slots: &mut [EntrySlot],
    values: Vec<T>,
    selected: impl Fn(&EntrySlot) -> bool,
    mut assign: impl FnMut(&mut EntrySlot, T),
) -> Result<(), String> {
    let expected = slots.iter().filter(|slot| selected(slot)).count();
    if values.len() != expected {
        return Err(format!(
            "batch returned {} results for {expected} entries",
            values.len()
        ));
    }
    for (slot, value) in slots.iter_mut().filter(|slot| selected(slot)).zip(values) {
        assign(slot, value);
    }
    Ok(())
}

fn shape_error(err: CoreError) -> EnforcementError {
    EnforcementError::internal(format!("labeling service response rejected: {err}"))
}

impl std::fmt::Debug for ConsentEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentEnforcer")
            .field("unprotected", &self.unprotected)
            .field("backend_base", &self.backend_base)
            .finish_non_exhaustive()
    }
}

pub struct ConsentEnforcerBuilder {
    unprotected: UnprotectedResourceTypes,
    backend_base: Option<String>,
    credentials: Arc<dyn CredentialVerifier>,
    labeler: Arc<dyn Labeler>,
    lookup: Arc<dyn PatientLookup>,
    decisions: Arc<dyn ConsentDecisionService>,
    redactor: Arc<dyn Redactor>,
}

impl ConsentEnforcerBuilder {
    pub fn new(
        credentials: Arc<dyn CredentialVerifier>,
        lookup: Arc<dyn PatientLookup>,
        decisions: Arc<dyn ConsentDecisionService>,
    ) -> Self {
        Self {
            unprotected: UnprotectedResourceTypes::default(),
            backend_base: None,
            credentials,
            labeler: Arc::new(PassthroughLabeler),
            lookup,
            decisions,
            redactor: Arc::new(SecurityLabelRedactor),
        }
    }

    pub fn with_unprotected_types(mut self, types: UnprotectedResourceTypes) -> Self {
        self.unprotected = types;
        self
    }

    /// Absolute references under this base are treated as local.
    pub fn with_backend_base(mut self, base: impl Into<String>) -> Self {
        self.backend_base = Some(base.into());
        self
    }

    pub fn with_labeler(mut self, labeler: Arc<dyn Labeler>) -> Self {
        self.labeler = labeler;
        self
    }

    pub fn with_redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn build(self) -> ConsentEnforcer {
        ConsentEnforcer {
            unprotected: self.unprotected,
            backend_base: self.backend_base,
            credentials: self.credentials,
            labeler: self.labeler,
            identities: IdentityResolver::new(self.lookup),
            decisions: DecisionClient::new(self.decisions),
            redactor: self.redactor,
        }
    }
}
