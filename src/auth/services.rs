use std::{future::Future, sync::Arc, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    dto::{ProfileView, PublicUser, SigninRequest, SignupRequest, UpdateProfileRequest},
    extractors::{ClientMeta, Identity},
    jwt::JwtKeys,
    password::PasswordHasher,
};
use crate::{
    error::{AuthError, INVALID_CREDENTIALS},
    store::{CredentialStore, NewSession, NewUser, ProfilePatch, StoreError, User, UserPatch},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed value, or `None` when absent or blank.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Result of an operation whose primary write succeeded while a secondary
/// write may have failed.
#[derive(Debug)]
pub struct BestEffort<T> {
    pub value: T,
    pub warning: Option<String>,
}

impl<T> BestEffort<T> {
    fn clean(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    fn degraded(value: T, warning: String) -> Self {
        Self {
            value,
            warning: Some(warning),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }

    /// Hands back the value, noting a lost side write on the current span.
    pub fn into_value(self) -> T {
        if self.is_degraded() {
            debug!(warning = ?self.warning, "completed without side write");
        }
        self.value
    }
}

/// A user together with a freshly issued token.
#[derive(Debug)]
pub struct Issued {
    pub user: PublicUser,
    pub token: String,
}

impl Issued {
    fn new(user: &User, token: String) -> Self {
        Self {
            user: PublicUser {
                id: user.id,
                email: user.email.clone(),
                name: user.name.clone(),
            },
            token,
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    keys: JwtKeys,
    hasher: PasswordHasher,
    store_timeout: Duration,
    /// Verified against when the email is unknown, so signin always pays for one hash check.
    decoy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        keys: JwtKeys,
        hasher: PasswordHasher,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            hasher,
            store_timeout,
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    /// Runs a store call under the configured timeout.
    pub(crate) async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.bounded(self.store.find_user_by_id(id)).await
    }

    pub async fn signup(&self, req: SignupRequest) -> Result<BestEffort<Issued>, AuthError> {
        let (Some(email), Some(password), Some(name)) = (
            non_empty(req.email),
            req.password.filter(|p| !p.is_empty()),
            non_empty(req.name),
        ) else {
            return Err(AuthError::Validation(
                "Email, password and name are required".into(),
            ));
        };
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AuthError::Validation("Invalid email".into()));
        }

        // Fast path only; the unique index decides under concurrency.
        if self
            .bounded(self.store.find_user_by_email(&email))
            .await?
            .is_some()
        {
            warn!(email = %email, "email already registered");
            return Err(email_taken());
        }

        let password_hash = self.hasher.hash(&password).await?;
        let new_user = NewUser {
            id: Uuid::new_v4(),
            email,
            password_hash,
            name,
            phone: non_empty(req.phone),
        };
        let user = match self.bounded(self.store.insert_user(new_user)).await {
            Ok(u) => u,
            Err(StoreError::UniqueViolation(constraint)) => {
                warn!(%constraint, "signup lost insert race");
                return Err(email_taken());
            }
            Err(e) => return Err(e.into()),
        };

        let warning = match self.bounded(self.store.insert_profile(user.id, None)).await {
            Ok(_) => None,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "profile creation failed");
                Some(format!("profile not created: {e}"))
            }
        };

        let token = self
            .keys
            .issue(user.id, &user.email)
            .map_err(|e| AuthError::persistence("Server error", e))?;

        info!(user_id = %user.id, "user registered");
        let issued = Issued::new(&user, token);
        Ok(match warning {
            Some(w) => BestEffort::degraded(issued, w),
            None => BestEffort::clean(issued),
        })
    }

    pub async fn signin(
        &self,
        req: SigninRequest,
        client: ClientMeta,
    ) -> Result<BestEffort<Issued>, AuthError> {
        let (Some(email), Some(password)) =
            (non_empty(req.email), req.password.filter(|p| !p.is_empty()))
        else {
            return Err(AuthError::Validation("Email and password are required".into()));
        };

        let Some(user) = self.bounded(self.store.find_user_by_email(&email)).await? else {
            warn!(email = %email, "signin unknown email");
            self.verify_decoy(&password).await?;
            return Err(AuthError::Auth(INVALID_CREDENTIALS));
        };

        if !self.hasher.verify(&password, &user.password_hash).await? {
            warn!(user_id = %user.id, "signin invalid password");
            return Err(AuthError::Auth(INVALID_CREDENTIALS));
        }

        let token = self
            .keys
            .issue(user.id, &user.email)
            .map_err(|e| AuthError::persistence("Server error", e))?;

        let session = NewSession {
            user_id: user.id,
            ip_address: client.ip,
            user_agent: client.user_agent,
        };
        let warning = match self.bounded(self.store.insert_session(session)).await {
            Ok(_) => None,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "session record failed");
                Some(format!("session not recorded: {e}"))
            }
        };

        info!(user_id = %user.id, "user signed in");
        let issued = Issued::new(&user, token);
        Ok(match warning {
            Some(w) => BestEffort::degraded(issued, w),
            None => BestEffort::clean(issued),
        })
    }

    async fn verify_decoy(&self, password: &str) -> Result<(), AuthError> {
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| self.hasher.hash("decoy-password-never-matches"))
            .await?;
        self.hasher.verify(password, decoy).await?;
        Ok(())
    }

    pub async fn get_profile(
        &self,
        identity: &Identity,
    ) -> Result<BestEffort<ProfileView>, AuthError> {
        let Some(user) = self.find_user(identity.id).await? else {
            return Err(AuthError::NotFound("User not found".into()));
        };

        let (avatar, warning) = match self
            .bounded(self.store.find_profile_by_user(user.id))
            .await
        {
            Ok(profile) => (profile.and_then(|p| p.avatar), None),
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "profile lookup failed");
                (None, Some(format!("avatar unavailable: {e}")))
            }
        };

        let view = ProfileView {
            id: user.id,
            email: user.email,
            name: user.name,
            phone: user.phone,
            created_at: user.created_at,
            avatar,
        };
        Ok(match warning {
            Some(w) => BestEffort::degraded(view, w),
            None => BestEffort::clean(view),
        })
    }

    /// Writes only the tables that have a supplied field. The user row is
    /// written before the profile row and is not undone if the latter fails.
    /// A profile row lost at signup is created here.
    pub async fn update_profile(
        &self,
        identity: &Identity,
        req: UpdateProfileRequest,
    ) -> Result<(), AuthError> {
        let user_patch = UserPatch {
            name: non_empty(req.name),
            phone: non_empty(req.phone),
        };
        let profile_patch = ProfilePatch {
            avatar: non_empty(req.avatar),
        };

        let (user_fields, avatar) = (!user_patch.is_empty(), !profile_patch.is_empty());
        if user_fields {
            self.bounded(self.store.update_user(identity.id, &user_patch))
                .await
                .map_err(|e| AuthError::persistence("Failed to update profile", e))?;
        }
        if avatar {
            self.bounded(self.store.upsert_profile(identity.id, &profile_patch))
                .await
                .map_err(|e| AuthError::persistence("Failed to update avatar", e))?;
        }

        info!(user_id = %identity.id, user_fields, avatar, "profile updated");
        Ok(())
    }

    /// Drops the user's session records. The bearer token itself stays
    /// valid until it expires.
    pub async fn logout(&self, identity: &Identity) -> BestEffort<()> {
        match self
            .bounded(self.store.delete_sessions_by_user(identity.id))
            .await
        {
            Ok(removed) => {
                info!(user_id = %identity.id, removed, "user logged out");
                BestEffort::clean(())
            }
            Err(e) => {
                warn!(user_id = %identity.id, error = %e, "session cleanup failed");
                BestEffort::degraded((), format!("sessions not cleared: {e}"))
            }
        }
    }
}

fn email_taken() -> AuthError {
    AuthError::Conflict("Email already registered".into())
}
