//! Consent decision client.
//!
//! The decision service speaks CDS Hooks: one POST per decision request,
//! answered with a card whose extension carries the decision and any
//! obligations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ces_core::{ConsentDecision, Decision, DecisionRequest, Obligation, PatientIdentifierSet};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("Decision service timed out")]
    Timeout,

    #[error("Decision service unreachable: {0}")]
    Transport(String),

    #[error("Decision service returned status {0}")]
    Status(u16),

    #[error("Decision service returned an unreadable body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for DecisionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Answers one [`DecisionRequest`].
#[async_trait]
pub trait ConsentDecisionService: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<ConsentDecision, DecisionError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CdsHookRequest<'a> {
    hook: &'a str,
    hook_instance: String,
    context: CdsHookContext<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CdsHookContext<'a> {
    patient_id: &'a PatientIdentifierSet,
    scope: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose_of_use: Option<&'a Value>,
    actor: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct CdsHookResponse {
    #[serde(default)]
    cards: Vec<CdsCard>,
}

#[derive(Debug, Deserialize)]
struct CdsCard {
    #[serde(default)]
    extension: Option<CdsDecisionExtension>,
}

#[derive(Debug, Deserialize)]
struct CdsDecisionExtension {
    #[serde(default)]
    decision: Option<String>,
    #[serde(default)]
    obligations: Vec<Obligation>,
}

impl From<CdsHookResponse> for ConsentDecision {
    /// Only the first card counts; no card at all is a denial.
    fn from(response: CdsHookResponse) -> Self {
        let Some(extension) = response.cards.into_iter().next().and_then(|c| c.extension) else {
            return ConsentDecision::deny();
        };
        ConsentDecision {
            decision: Decision::from_code(extension.decision.as_deref()),
            obligations: extension.obligations,
        }
    }
}

/// [`ConsentDecisionService`] over a CDS Hooks endpoint.
#[derive(Debug, Clone)]
pub struct CdsDecisionService {
    client: reqwest::Client,
    hook_url: String,
    hook: String,
    scope: String,
    timeout: Duration,
}

impl CdsDecisionService {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        hook: impl Into<String>,
        scope: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let hook = hook.into();
        let hook_url = format!("{}/cds-services/{}", endpoint.trim_end_matches('/'), hook);
        Self {
            client,
            hook_url,
            hook,
            scope: scope.into(),
            timeout,
        }
    }

    pub fn hook_url(&self) -> &str {
        &self.hook_url
    }
}

#[async_trait]
impl ConsentDecisionService for CdsDecisionService {
    async fn decide(&self, request: &DecisionRequest) -> Result<ConsentDecision, DecisionError> {
        let body = CdsHookRequest {
            hook: &self.hook,
            hook_instance: Uuid::new_v4().to_string(),
            context: CdsHookContext {
                patient_id: &request.patient_id,
                scope: &self.scope,
                purpose_of_use: request.context.purpose_of_use(),
                actor: request.context.actor(),
            },
        };

        let response = self
            .client
            .post(&self.hook_url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DecisionError::Status(status.as_u16()));
        }

        let parsed: CdsHookResponse = response.json().await?;
        let decision = ConsentDecision::from(parsed);
        tracing::debug!(
            hook_instance = %body.hook_instance,
            decision = %decision.decision,
            obligations = decision.obligations.len(),
            "Consent decision received"
        );
        Ok(decision)
    }
}

#[derive(Clone)]
pub struct DecisionClient {
    service: Arc<dyn ConsentDecisionService>,
}

impl DecisionClient {
    pub fn new(service: Arc<dyn ConsentDecisionService>) -> Self {
        Self { service }
    }

    pub async fn decide_one(
        &self,
        request: &DecisionRequest,
    ) -> Result<ConsentDecision, DecisionError> {
        self.service.decide(request).await
    }

    /// One decision per request, in request order. Requests are sent
    /// concurrently and any failure fails the batch.
    pub async fn decide_many(
        &self,
        requests: &[DecisionRequest],
    ) -> Result<Vec<ConsentDecision>, DecisionError> {
        try_join_all(requests.iter().map(|request| self.decide_one(request))).await
    }
}

impl std::fmt::Debug for DecisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionClient").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ces_core::{ContextAttributes, PatientIdentifier};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(value: &str) -> DecisionRequest {
        let context = ContextAttributes::new(json!("org-1"), Some(json!("TREAT"))).unwrap();
        DecisionRequest::new(
            Arc::new(context),
            PatientIdentifierSet::new(vec![PatientIdentifier::new("urn:test", value)]),
        )
    }

    /// Permits even identifier values, slower for smaller values.
    struct ParityService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConsentDecisionService for ParityService {
        async fn decide(
            &self,
            request: &DecisionRequest,
        ) -> Result<ConsentDecision, DecisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let value: u64 = request
                .patient_id
                .iter()
                .next()
                .and_then(|id| id.value.as_deref())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(value * 10))).await;
            if value == 99 {
                return Err(DecisionError::Status(503));
            }
            Ok(if value % 2 == 0 {
                ConsentDecision::permit()
            } else {
                ConsentDecision::deny()
            })
        }
    }

    #[tokio::test]
    async fn test_decide_many_preserves_order() {
        let service = Arc::new(ParityService {
            calls: AtomicUsize::new(0),
        });
        let client = DecisionClient::new(service.clone());
        let requests: Vec<_> = ["1", "2", "3", "4"].into_iter().map(request).collect();

        let decisions = client.decide_many(&requests).await.unwrap();
        let permits: Vec<bool> = decisions.iter().map(ConsentDecision::is_permit).collect();
        assert_eq!(permits, [false, true, false, true]);
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_decide_many_fails_whole_batch() {
        let client = DecisionClient::new(Arc::new(ParityService {
            calls: AtomicUsize::new(0),
        }));
        let requests = vec![request("2"), request("99")];
        assert!(matches!(
            client.decide_many(&requests).await,
            Err(DecisionError::Status(503))
        ));
    }

    #[test]
    fn test_card_parsing() {
        let parse = |value: serde_json::Value| {
            ConsentDecision::from(serde_json::from_value::<CdsHookResponse>(value).unwrap())
        };

        let permit = parse(json!({
            "cards": [{
                "summary": "CONSENT_PERMIT",
                "extension": {
                    "decision": "CONSENT_PERMIT",
                    "obligations": [{ "id": { "code": "REDACT" } }]
                }
            }]
        }));
        assert!(permit.is_permit());
        assert_eq!(permit.obligations.len(), 1);

        assert!(!parse(json!({ "cards": [{ "extension": { "decision": "NO_CONSENT" } }] })).is_permit());
        assert!(!parse(json!({ "cards": [] })).is_permit());
        assert!(!parse(json!({})).is_permit());
    }

    #[tokio::test]
    async fn test_cds_service_posts_hook_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cds-services/patient-consent-consult"))
            .and(body_partial_json(json!({
                "hook": "patient-consent-consult",
                "context": {
                    "patientId": [{ "system": "urn:test", "value": "7" }],
                    "scope": "patient-privacy",
                    "purposeOfUse": "TREAT",
                    "actor": ["org-1"]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cards": [{ "extension": { "decision": "CONSENT_PERMIT", "obligations": [] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = CdsDecisionService::new(
            reqwest::Client::new(),
            &server.uri(),
            "patient-consent-consult",
            "patient-privacy",
            Duration::from_secs(5),
        );
        let decision = service.decide(&request("7")).await.unwrap();
        assert!(decision.is_permit());
    }

    #[tokio::test]
    async fn test_cds_service_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let service = CdsDecisionService::new(
            reqwest::Client::new(),
            &format!("{}/", server.uri()),
            "patient-consent-consult",
            "patient-privacy",
            Duration::from_secs(5),
        );
        assert_eq!(
            service.hook_url(),
            format!("{}/cds-services/patient-consent-consult", server.uri())
        );
        assert!(matches!(
            service.decide(&request("7")).await,
            Err(DecisionError::Status(500))
        ));
    }
}
