//! Patient identity resolution.
//!
//! Turns a [`PatientReference`] into the identifiers the decision service
//! understands. Batch resolution looks each distinct reference up once and
//! projects the results back onto the caller's positions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ces_core::{PatientIdentifierSet, PatientReference};
use futures_util::future::try_join_all;
use indexmap::IndexSet;
use reqwest::header::ACCEPT;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Lookup of {reference} timed out")]
    Timeout { reference: String },

    #[error("Lookup of {reference} failed: {message}")]
    Transport { reference: String, message: String },

    #[error("Lookup of {reference} returned status {status}")]
    Status { reference: String, status: u16 },

    #[error("Lookup of {reference} returned an unreadable body: {message}")]
    Body { reference: String, message: String },
}

impl LookupError {
    fn from_reqwest(reference: &PatientReference, err: reqwest::Error) -> Self {
        let reference = reference.canonical();
        if err.is_timeout() {
            Self::Timeout { reference }
        } else {
            Self::Transport {
                reference,
                message: err.to_string(),
            }
        }
    }
}

/// Source of patient identifiers for one reference.
#[async_trait]
pub trait PatientLookup: Send + Sync {
    async fn lookup(&self, reference: &PatientReference)
    -> Result<PatientIdentifierSet, LookupError>;
}

/// Reads the referenced Patient from the backend FHIR server.
#[derive(Debug, Clone)]
pub struct FhirPatientLookup {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl FhirPatientLookup {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            timeout,
        }
    }

    fn url_for(&self, reference: &PatientReference) -> String {
        format!("{}/{}", self.base_url, reference.canonical())
    }
}

#[async_trait]
impl PatientLookup for FhirPatientLookup {
    async fn lookup(
        &self,
        reference: &PatientReference,
    ) -> Result<PatientIdentifierSet, LookupError> {
        let url = self.url_for(reference);
        tracing::debug!(%url, "Looking up patient identifiers");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LookupError::from_reqwest(reference, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status {
                reference: reference.canonical(),
                status: status.as_u16(),
            });
        }

        let patient: Value = response.json().await.map_err(|e| LookupError::Body {
            reference: reference.canonical(),
            message: e.to_string(),
        })?;
        Ok(PatientIdentifierSet::from_patient(&patient))
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    lookup: Arc<dyn PatientLookup>,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn PatientLookup>) -> Self {
        Self { lookup }
    }

    pub async fn resolve_one(
        &self,
        reference: &PatientReference,
    ) -> Result<PatientIdentifierSet, LookupError> {
        self.lookup.lookup(reference).await
    }

    /// One identifier set per input position, in input order.
    ///
    /// Each distinct reference is looked up exactly once and the lookups run
    /// concurrently. Any failed lookup fails the whole batch.
    pub async fn resolve_many(
        &self,
        references: &[&PatientReference],
    ) -> Result<Vec<PatientIdentifierSet>, LookupError> {
        let mut distinct: IndexSet<&PatientReference> = IndexSet::with_capacity(references.len());
        let positions: Vec<usize> = references
            .iter()
            .map(|reference| distinct.insert_full(*reference).0)
            .collect();

        let resolved = try_join_all(distinct.iter().map(|reference| self.resolve_one(reference)))
            .await?;

        tracing::debug!(
            positions = references.len(),
            distinct = distinct.len(),
            "Resolved patient identities"
        );

        Ok(positions
            .into_iter()
            .map(|index| resolved[index].clone())
            .collect())
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ces_core::PatientIdentifier;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Answers `urn:test` / `<id>` and records every reference it was asked for.
    #[derive(Default)]
    struct RecordingLookup {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingLookup {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PatientLookup for RecordingLookup {
        async fn lookup(
            &self,
            reference: &PatientReference,
        ) -> Result<PatientIdentifierSet, LookupError> {
            let id = reference.target().id.clone();
            self.calls.lock().unwrap().push(reference.canonical());
            // Later ids answer sooner so completion order differs from input order.
            let delay = 30u64.saturating_sub(id.parse::<u64>().unwrap_or(0) * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.fail_on.as_deref() == Some(id.as_str()) {
                return Err(LookupError::Status {
                    reference: reference.canonical(),
                    status: 500,
                });
            }
            Ok(PatientIdentifierSet::new(vec![PatientIdentifier::new("urn:test", id)]))
        }
    }

    fn reference(raw: &str) -> PatientReference {
        PatientReference::parse(raw, Some("http://fhir.local/fhir")).unwrap()
    }

    fn value_of(set: &PatientIdentifierSet) -> String {
        set.iter().next().and_then(|id| id.value.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_many_dedups_and_keeps_positions() {
        let lookup = Arc::new(RecordingLookup::default());
        let resolver = IdentityResolver::new(lookup.clone());

        let refs = [
            reference("Patient/1"),
            reference("Patient/2"),
            reference("http://fhir.local/fhir/Patient/1"),
            reference("Patient/3"),
            reference("Patient/2"),
        ];
        let borrowed: Vec<&PatientReference> = refs.iter().collect();
        let resolved = resolver.resolve_many(&borrowed).await.unwrap();

        let values: Vec<String> = resolved.iter().map(value_of).collect();
        assert_eq!(values, ["1", "2", "1", "3", "2"]);
        assert_eq!(resolved[0], resolved[2]);

        let mut calls = lookup.calls();
        calls.sort();
        assert_eq!(calls, ["Patient/1", "Patient/2", "Patient/3"]);
    }

    #[tokio::test]
    async fn test_resolve_many_empty() {
        let lookup = Arc::new(RecordingLookup::default());
        let resolver = IdentityResolver::new(lookup.clone());
        assert!(resolver.resolve_many(&[]).await.unwrap().is_empty());
        assert!(lookup.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_many_fails_whole_batch() {
        let lookup = Arc::new(RecordingLookup {
            fail_on: Some("2".into()),
            ..Default::default()
        });
        let resolver = IdentityResolver::new(lookup);
        let refs = [reference("Patient/1"), reference("Patient/2")];
        let borrowed: Vec<&PatientReference> = refs.iter().collect();

        let err = resolver.resolve_many(&borrowed).await.unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_fhir_lookup_reads_identifiers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fhir/Patient/42"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resourceType": "Patient",
                "id": "42",
                "identifier": [
                    { "system": "urn:official:id", "value": "10001", "use": "official" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/fhir", server.uri());
        let lookup = FhirPatientLookup::new(reqwest::Client::new(), &base, Duration::from_secs(5));
        let reference = PatientReference::parse("Patient/42", Some(&base)).unwrap();

        let set = lookup.lookup(&reference).await.unwrap();
        assert_eq!(
            set,
            PatientIdentifierSet::new(vec![PatientIdentifier::new("urn:official:id", "10001")])
        );
    }

    #[tokio::test]
    async fn test_fhir_lookup_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Patient/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let lookup =
            FhirPatientLookup::new(reqwest::Client::new(), server.uri(), Duration::from_secs(5));
        let reference = PatientReference::parse("Patient/missing", None).unwrap();

        let err = lookup.lookup(&reference).await.unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fhir_lookup_unreadable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Patient/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<Patient/>"))
            .mount(&server)
            .await;

        let lookup =
            FhirPatientLookup::new(reqwest::Client::new(), server.uri(), Duration::from_secs(5));
        let reference = PatientReference::parse("Patient/1", None).unwrap();

        let err = lookup.lookup(&reference).await.unwrap_err();
        assert!(matches!(err, LookupError::Body { .. }));
    }
}
