use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, MessageResponse, ProfileResponse, SigninRequest, SignupRequest,
            UpdateProfileRequest,
        },
        extractors::{require_auth, ClientMeta, Identity},
    },
    error::{ApiError, AuthError},
    state::AppState,
};

/// Routes relative to `/api/auth`.
pub fn auth_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(get_profile).put(update_profile))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .merge(protected)
}

/// Unwraps a JSON body, reporting decode failures as validation errors.
fn body<T>(state: &AppState, payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(v)| v).map_err(|e| {
        state.reject(AuthError::Validation(format!(
            "Invalid request body: {}",
            e.body_text()
        )))
    })
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let req = body(&state, payload)?;
    let out = state
        .auth
        .signup(req)
        .await
        .map_err(|e| state.reject(e))?
        .into_value();
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully".into(),
            user: out.user,
            token: out.token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn signin(
    State(state): State<AppState>,
    client: ClientMeta,
    payload: Result<Json<SigninRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let req = body(&state, payload)?;
    let out = state
        .auth
        .signin(req, client)
        .await
        .map_err(|e| state.reject(e))?
        .into_value();
    Ok(Json(AuthResponse {
        message: "Signed in successfully".into(),
        user: out.user,
        token: out.token,
    }))
}

#[instrument(skip(state), fields(user_id = %identity.id, email = %identity.email))]
pub async fn logout(State(state): State<AppState>, identity: Identity) -> Json<MessageResponse> {
    state.auth.logout(&identity).await.into_value();
    Json(MessageResponse::new("Logged out successfully"))
}

#[instrument(skip(state), fields(user_id = %identity.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ProfileResponse>, ApiError> {
    let out = state
        .auth
        .get_profile(&identity)
        .await
        .map_err(|e| state.reject(e))?
        .into_value();
    Ok(Json(ProfileResponse { user: out }))
}

#[instrument(skip(state, payload), fields(user_id = %identity.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let req = body(&state, payload)?;
    state
        .auth
        .update_profile(&identity, req)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(MessageResponse::new("Profile updated successfully")))
}
