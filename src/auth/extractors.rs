use std::{convert::Infallible, net::SocketAddr};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::{jwt::TokenError, services::AuthService};
use crate::{
    error::{ApiError, AuthError, UNAUTHORIZED},
    state::AppState,
    store::StoreError,
};

/// The caller resolved by [`require_auth`], available to protected handlers.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

/// Why the gate turned a request away. Only logged; clients see one 401.
#[derive(Debug, Error)]
pub enum GateRejection {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("invalid auth scheme")]
    BadScheme,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("token subject {0} does not exist")]
    UnknownUser(Uuid),
    #[error("identity lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl From<GateRejection> for AuthError {
    fn from(r: GateRejection) -> Self {
        match r {
            GateRejection::Store(e) => e.into(),
            _ => AuthError::Auth(UNAUTHORIZED),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, GateRejection> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(GateRejection::MissingHeader)?;
    auth.strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(GateRejection::BadScheme)
}

/// Extract, verify, resolve.
pub async fn authenticate(
    auth: &AuthService,
    headers: &HeaderMap,
) -> Result<Identity, GateRejection> {
    let token = bearer_token(headers)?;
    let claims = auth.keys().verify(token)?;
    let user = auth
        .find_user(claims.sub)
        .await?
        .ok_or(GateRejection::UnknownUser(claims.sub))?;
    Ok(Identity {
        id: user.id,
        email: user.email,
    })
}

/// Middleware guarding protected routes.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let outcome = authenticate(&state.auth, req.headers()).await;
    match outcome {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(rejection) => {
            warn!(reason = %rejection, "request rejected by auth gate");
            state.reject(rejection.into()).into_response()
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Identity>().cloned().ok_or_else(|| {
            warn!("Identity missing from request extensions");
            ApiError::new(AuthError::Auth(UNAUTHORIZED), false)
        })
    }
}

/// Client address and user agent, recorded with each signin.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(Self {
            ip: forwarded.or(peer),
            user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::http::{HeaderValue, Request as HttpRequest};
    use time::OffsetDateTime;

    use super::*;
    use crate::{
        auth::{jwt::TOKEN_TTL, password::PasswordHasher, services::tests::test_keys},
        store::{CredentialStore, MemoryStore, NewUser},
    };

    async fn service_with_user() -> (AuthService, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .insert_user(NewUser {
                id: Uuid::new_v4(),
                email: "a@x.com".into(),
                password_hash: "unused".into(),
                name: "A".into(),
                phone: None,
            })
            .await
            .unwrap();
        let svc = AuthService::new(
            store,
            test_keys(),
            PasswordHasher::fast(),
            Duration::from_secs(1),
        );
        (svc, user.id)
    }

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    #[tokio::test]
    async fn resolves_valid_bearer_token() {
        let (svc, id) = service_with_user().await;
        let token = svc.keys().issue(id, "a@x.com").unwrap();
        let who = authenticate(&svc, &headers(&format!("Bearer {token}")))
            .await
            .expect("resolved");
        assert_eq!(who.id, id);
        assert_eq!(who.email, "a@x.com");
    }

    #[tokio::test]
    async fn rejection_reasons_are_distinct_internally() {
        let (svc, id) = service_with_user().await;
        let token = svc.keys().issue(id, "a@x.com").unwrap();
        let expired = svc
            .keys()
            .issue_at(id, "a@x.com", OffsetDateTime::now_utc() - TOKEN_TTL - TOKEN_TTL)
            .unwrap();
        let stranger = svc.keys().issue(Uuid::new_v4(), "b@x.com").unwrap();

        assert!(matches!(
            authenticate(&svc, &HeaderMap::new()).await,
            Err(GateRejection::MissingHeader)
        ));
        assert!(matches!(
            authenticate(&svc, &headers(&token)).await,
            Err(GateRejection::BadScheme)
        ));
        assert!(matches!(
            authenticate(&svc, &headers(&format!("Bearer {expired}"))).await,
            Err(GateRejection::Token(TokenError::Invalid("expired")))
        ));
        assert!(matches!(
            authenticate(&svc, &headers(&format!("Bearer {stranger}"))).await,
            Err(GateRejection::UnknownUser(_))
        ));
    }

    #[test]
    fn all_token_rejections_map_to_one_auth_error() {
        let mapped: Vec<String> = [
            GateRejection::MissingHeader,
            GateRejection::BadScheme,
            GateRejection::Token(TokenError::Invalid("expired")),
            GateRejection::UnknownUser(Uuid::nil()),
        ]
        .into_iter()
        .map(|r| AuthError::from(r).to_string())
        .collect();
        assert!(mapped.iter().all(|m| m == UNAUTHORIZED));
    }

    #[test]
    fn lookup_failure_is_a_server_error() {
        let err = AuthError::from(GateRejection::Store(StoreError::Timeout));
        assert!(matches!(err, AuthError::Persistence { .. }));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn client_meta_prefers_forwarded_for() {
        let req = HttpRequest::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header(header::USER_AGENT, "curl/8.0")
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let meta = ClientMeta::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(meta.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn client_meta_falls_back_to_peer_address() {
        let mut req = HttpRequest::builder().body(()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        let (mut parts, _) = req.into_parts();
        let meta = ClientMeta::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(meta.ip.as_deref(), Some("127.0.0.1"));
        assert!(meta.user_agent.is_none());
    }
}
