//! Route authentication (spec.md §4.3).
//!
//! The core never verifies a token or session itself; it only sequences
//! the decision and talks to the out-of-scope collaborators in
//! [`crate::ports`]. Grounded on the teacher's [`ports`](crate::ports)-style
//! dependency injection, generalized from load-balancer backends to auth
//! collaborators.

use std::collections::HashMap;

use tracing::instrument;

use crate::model::RouteAuthResult;
use crate::ports::{InboundRequest, SessionStore, TokenIssuer, TokenValidator, TokenValidationResult};

const SESSION_COOKIE_NAME: &str = "aussie_session";
const BEARER_PREFIX: &str = "Bearer ";

/// Authenticate a single request against a route that requires auth.
/// Callers must already have established `auth_required` is `true` for
/// this endpoint; this function does not consult the route config.
#[instrument(skip(request, token_validator, token_issuer, session_store))]
pub async fn authenticate(
    request: &InboundRequest,
    token_validator: &dyn TokenValidator,
    token_issuer: &dyn TokenIssuer,
    session_store: &dyn SessionStore,
) -> RouteAuthResult {
    let bearer = extract_bearer(request);
    let cookie = extract_session_cookie(request);

    match (bearer, cookie) {
        (Some(_), Some(_)) => RouteAuthResult::BadRequest {
            reason: "both bearer token and session cookie present".to_string(),
        },
        (None, None) => RouteAuthResult::Unauthorized { reason: "no credentials presented".to_string() },
        (None, Some(cookie_value)) => authenticate_via_session(&cookie_value, token_issuer, session_store).await,
        (Some(token), None) => authenticate_via_bearer(&token, token_validator, token_issuer).await,
    }
}

async fn authenticate_via_session(
    cookie_value: &str,
    token_issuer: &dyn TokenIssuer,
    session_store: &dyn SessionStore,
) -> RouteAuthResult {
    let record = match session_store.lookup(cookie_value).await {
        Ok(Some(record)) if record.active => record,
        Ok(Some(_)) => return RouteAuthResult::Unauthorized { reason: "session expired".to_string() },
        Ok(None) => return RouteAuthResult::Unauthorized { reason: "unknown session".to_string() },
        Err(_) => return RouteAuthResult::Unauthorized { reason: "session lookup failed".to_string() },
    };

    match token_issuer.issue_session_token(&record.session_id, &record.subject).await {
        Ok(token) => {
            RouteAuthResult::Authenticated { token, auth_session_id: Some(record.session_id) }
        }
        Err(_) => RouteAuthResult::Unauthorized { reason: "unable to issue forward token for session".to_string() },
    }
}

async fn authenticate_via_bearer(
    token: &str,
    token_validator: &dyn TokenValidator,
    token_issuer: &dyn TokenIssuer,
) -> RouteAuthResult {
    let validation = match token_validator.validate(token).await {
        Ok(result) => result,
        Err(_) => return RouteAuthResult::Unauthorized { reason: "token validation failed".to_string() },
    };

    let (subject, claims) = match validation {
        TokenValidationResult::Valid { subject, claims } => (subject, claims),
        TokenValidationResult::Invalid { reason } => return RouteAuthResult::Unauthorized { reason },
    };

    match token_issuer.issue_forward_token(&subject, &claims).await {
        Ok(forward_token) => RouteAuthResult::Authenticated { token: forward_token, auth_session_id: None },
        // Degrade rather than fail closed: forward the original, already-
        // validated bearer token when claims expansion is unavailable.
        Err(_) => RouteAuthResult::Authenticated { token: token.to_string(), auth_session_id: None },
    }
}

fn extract_bearer(request: &InboundRequest) -> Option<String> {
    let header = request.header("authorization")?;
    if let Some(rest) = header.strip_prefix(BEARER_PREFIX) {
        if !rest.is_empty() {
            return Some(rest.to_string());
        }
    }
    None
}

fn extract_session_cookie(request: &InboundRequest) -> Option<String> {
    let header = request.header("cookie")?;
    for part in header.split(';') {
        let part = part.trim();
        if let Some((name, value)) = part.split_once('=') {
            if name == SESSION_COOKIE_NAME {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::ports::SessionRecord;
    use async_trait::async_trait;

    fn request_with_headers(pairs: &[(&str, &str)]) -> InboundRequest {
        let mut headers = HashMap::new();
        for (k, v) in pairs {
            headers.insert(k.to_string(), v.to_string());
        }
        InboundRequest { method: "GET".into(), path: "/x".into(), query: None, headers, content_length: None }
    }

    struct FakeValidator(Result<TokenValidationResult>);
    #[async_trait]
    impl TokenValidator for FakeValidator {
        async fn validate(&self, _token: &str) -> Result<TokenValidationResult> {
            self.0.clone()
        }
    }

    struct FakeIssuer {
        fail_forward: bool,
    }
    #[async_trait]
    impl TokenIssuer for FakeIssuer {
        async fn issue_forward_token(&self, subject: &str, _claims: &HashMap<String, String>) -> Result<String> {
            if self.fail_forward {
                Err(crate::error::GatewayError::internal("issuer down"))
            } else {
                Ok(format!("forward:{subject}"))
            }
        }
        async fn issue_session_token(&self, session_id: &str, subject: &str) -> Result<String> {
            Ok(format!("session:{session_id}:{subject}"))
        }
    }

    struct FakeSessionStore(Option<SessionRecord>);
    #[async_trait]
    impl SessionStore for FakeSessionStore {
        async fn lookup(&self, _cookie_value: &str) -> Result<Option<SessionRecord>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn no_credentials_is_unauthorized() {
        let req = request_with_headers(&[]);
        let result = authenticate(
            &req,
            &FakeValidator(Ok(TokenValidationResult::Invalid { reason: "n/a".into() })),
            &FakeIssuer { fail_forward: false },
            &FakeSessionStore(None),
        )
        .await;
        assert!(matches!(result, RouteAuthResult::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn both_bearer_and_cookie_is_bad_request() {
        let req = request_with_headers(&[("Authorization", "Bearer abc"), ("Cookie", "aussie_session=xyz")]);
        let result = authenticate(
            &req,
            &FakeValidator(Ok(TokenValidationResult::Invalid { reason: "n/a".into() })),
            &FakeIssuer { fail_forward: false },
            &FakeSessionStore(None),
        )
        .await;
        assert!(matches!(result, RouteAuthResult::BadRequest { .. }));
    }

    #[tokio::test]
    async fn valid_bearer_issues_forward_token() {
        let req = request_with_headers(&[("Authorization", "Bearer abc")]);
        let result = authenticate(
            &req,
            &FakeValidator(Ok(TokenValidationResult::Valid { subject: "u1".into(), claims: HashMap::new() })),
            &FakeIssuer { fail_forward: false },
            &FakeSessionStore(None),
        )
        .await;
        match result {
            RouteAuthResult::Authenticated { token, auth_session_id } => {
                assert_eq!(token, "forward:u1");
                assert!(auth_session_id.is_none());
            }
            other => panic!("expected authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forward_token_issuance_failure_degrades_to_original_bearer() {
        let req = request_with_headers(&[("Authorization", "Bearer raw-token")]);
        let result = authenticate(
            &req,
            &FakeValidator(Ok(TokenValidationResult::Valid { subject: "u1".into(), claims: HashMap::new() })),
            &FakeIssuer { fail_forward: true },
            &FakeSessionStore(None),
        )
        .await;
        match result {
            RouteAuthResult::Authenticated { token, .. } => assert_eq!(token, "raw-token"),
            other => panic!("expected degraded authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_session_cookie_issues_session_token() {
        let req = request_with_headers(&[("Cookie", "other=1; aussie_session=sess-1")]);
        let result = authenticate(
            &req,
            &FakeValidator(Ok(TokenValidationResult::Invalid { reason: "n/a".into() })),
            &FakeIssuer { fail_forward: false },
            &FakeSessionStore(Some(SessionRecord { session_id: "sess-1".into(), subject: "u2".into(), active: true })),
        )
        .await;
        match result {
            RouteAuthResult::Authenticated { token, auth_session_id } => {
                assert_eq!(token, "session:sess-1:u2");
                assert_eq!(auth_session_id, Some("sess-1".to_string()));
            }
            other => panic!("expected authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inactive_session_is_unauthorized() {
        let req = request_with_headers(&[("Cookie", "aussie_session=sess-1")]);
        let result = authenticate(
            &req,
            &FakeValidator(Ok(TokenValidationResult::Invalid { reason: "n/a".into() })),
            &FakeIssuer { fail_forward: false },
            &FakeSessionStore(Some(SessionRecord { session_id: "sess-1".into(), subject: "u2".into(), active: false })),
        )
        .await;
        assert!(matches!(result, RouteAuthResult::Unauthorized { .. }));
    }

    #[test]
    fn bearer_prefix_match_is_case_sensitive() {
        let req = request_with_headers(&[("Authorization", "bearer abc")]);
        assert_eq!(extract_bearer(&req), None);
    }
}
