//! In-memory fakes for the ports in [`crate::ports`], used by integration
//! tests. Not compiled into release builds.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::model::ServiceRegistration;
use crate::ports::{
    ProxyClient, ProxyRequest, ProxyResponse, ServiceRepository, SessionRecord, SessionStore, TokenIssuer,
    TokenValidationResult, TokenValidator,
};

/// An in-memory [`ServiceRepository`] backed by a `Mutex<HashMap>`.
#[derive(Default)]
pub struct InMemoryServiceRepository {
    services: Mutex<HashMap<String, ServiceRegistration>>,
}

#[async_trait]
impl ServiceRepository for InMemoryServiceRepository {
    async fn get(&self, service_id: &str) -> Result<Option<ServiceRegistration>> {
        Ok(self.services.lock().unwrap().get(service_id).cloned())
    }

    async fn put_cas(&self, reg: ServiceRegistration, expected_current_version: Option<u64>) -> Result<bool> {
        let mut services = self.services.lock().unwrap();
        match (services.get(&reg.service_id), expected_current_version) {
            (None, None) => {
                services.insert(reg.service_id.clone(), reg);
                Ok(true)
            }
            (Some(existing), Some(expected)) if existing.version == expected => {
                services.insert(reg.service_id.clone(), reg);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, service_id: &str) -> Result<bool> {
        Ok(self.services.lock().unwrap().remove(service_id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.services.lock().unwrap().keys().cloned().collect())
    }
}

/// A [`ProxyClient`] that always returns a fixed, configurable response,
/// recording every request it was asked to make.
pub struct FakeProxyClient {
    response: ProxyResponse,
    pub calls: Mutex<Vec<ProxyRequest>>,
}

impl FakeProxyClient {
    /// Construct a fake that always returns `response`.
    pub fn new(response: ProxyResponse) -> Self {
        Self { response, calls: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ProxyClient for FakeProxyClient {
    async fn call(&self, request: ProxyRequest) -> Result<ProxyResponse> {
        self.calls.lock().unwrap().push(request);
        Ok(self.response.clone())
    }
}

/// A [`TokenValidator`] that accepts a single configured token string.
pub struct FakeTokenValidator {
    pub valid_token: String,
    pub subject: String,
}

#[async_trait]
impl TokenValidator for FakeTokenValidator {
    async fn validate(&self, token: &str) -> Result<TokenValidationResult> {
        if token == self.valid_token {
            Ok(TokenValidationResult::Valid { subject: self.subject.clone(), claims: HashMap::new() })
        } else {
            Ok(TokenValidationResult::Invalid { reason: "unrecognized token".to_string() })
        }
    }
}

/// A [`TokenIssuer`] that mints deterministic, inspectable forward tokens.
#[derive(Default)]
pub struct FakeTokenIssuer {
    pub fail: bool,
}

#[async_trait]
impl TokenIssuer for FakeTokenIssuer {
    async fn issue_forward_token(&self, subject: &str, _claims: &HashMap<String, String>) -> Result<String> {
        if self.fail {
            Err(GatewayError::internal("fake issuer configured to fail"))
        } else {
            Ok(format!("fwd:{subject}"))
        }
    }

    async fn issue_session_token(&self, session_id: &str, subject: &str) -> Result<String> {
        Ok(format!("sess:{session_id}:{subject}"))
    }
}

/// A [`SessionStore`] backed by a fixed map of cookie value to record.
#[derive(Default)]
pub struct FakeSessionStore {
    pub sessions: HashMap<String, SessionRecord>,
}

#[async_trait]
impl SessionStore for FakeSessionStore {
    async fn lookup(&self, cookie_value: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(cookie_value).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Visibility;

    fn sample_registration(service_id: &str, version: u64) -> ServiceRegistration {
        ServiceRegistration {
            service_id: service_id.to_string(),
            display_name: service_id.to_string(),
            base_url: "http://backend".to_string(),
            endpoints: vec![],
            default_visibility: Visibility::Public,
            default_auth_required: false,
            access_config: None,
            rate_limit_config: None,
            sampling_config: None,
            permission_policy: None,
            version,
        }
    }

    #[tokio::test]
    async fn put_cas_rejects_mismatched_version() {
        let repo = InMemoryServiceRepository::default();
        assert!(repo.put_cas(sample_registration("svc", 1), None).await.unwrap());
        assert!(!repo.put_cas(sample_registration("svc", 3), Some(5)).await.unwrap());
        assert!(repo.put_cas(sample_registration("svc", 2), Some(1)).await.unwrap());
    }

    #[tokio::test]
    async fn fake_proxy_client_records_calls() {
        let client = FakeProxyClient::new(ProxyResponse { status_code: 200, headers: HashMap::new(), body: vec![] });
        let _ = client
            .call(ProxyRequest { url: "http://x".into(), method: "GET".into(), headers: HashMap::new(), body: vec![] })
            .await
            .unwrap();
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }
}
