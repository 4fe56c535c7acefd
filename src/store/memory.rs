use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CredentialStore, NewSession, NewUser, Profile, ProfilePatch, Session, StoreError, User,
    UserPatch,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, Profile>, // keyed by owning user id
    sessions: Vec<Session>,
}

/// Process-local store with the same uniqueness rules as the SQL schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn session_count(&self, user_id: Uuid) -> usize {
        let t = self.tables.read().await;
        t.sessions.iter().filter(|s| s.user_id == user_id).count()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation("users_email_key".into()));
        }
        if t.users.contains_key(&user.id) {
            return Err(StoreError::UniqueViolation("users_pkey".into()));
        }
        let row = User {
            id: user.id,
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            phone: user.phone,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if let Some(user) = t.users.get_mut(&id) {
            if let Some(name) = &patch.name {
                user.name = name.clone();
            }
            if let Some(phone) = &patch.phone {
                user.phone = Some(phone.clone());
            }
        }
        Ok(())
    }

    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }

    async fn insert_profile(
        &self,
        user_id: Uuid,
        avatar: Option<String>,
    ) -> Result<Profile, StoreError> {
        let mut t = self.tables.write().await;
        if t.profiles.contains_key(&user_id) {
            return Err(StoreError::UniqueViolation("profiles_user_id_key".into()));
        }
        let row = Profile {
            id: Uuid::new_v4(),
            user_id,
            avatar,
            created_at: OffsetDateTime::now_utc(),
        };
        t.profiles.insert(user_id, row.clone());
        Ok(row)
    }

    async fn upsert_profile(
        &self,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let profile = t.profiles.entry(user_id).or_insert_with(|| Profile {
            id: Uuid::new_v4(),
            user_id,
            avatar: None,
            created_at: OffsetDateTime::now_utc(),
        });
        if let Some(avatar) = &patch.avatar {
            profile.avatar = Some(avatar.clone());
        }
        Ok(())
    }

    async fn insert_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let row = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            last_activity: OffsetDateTime::now_utc(),
        };
        self.tables.write().await.sessions.push(row.clone());
        Ok(row)
    }

    async fn delete_sessions_by_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        let before = t.sessions.len();
        t.sessions.retain(|s| s.user_id != user_id);
        Ok((before - t.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: "hash".into(),
            name: "Ann".into(),
            phone: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_unique_violation() {
        let store = MemoryStore::new();
        store.insert_user(new_user("a@x.com")).await.expect("first insert");
        let err = store.insert_user(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn email_lookup_is_case_sensitive() {
        let store = MemoryStore::new();
        store.insert_user(new_user("a@x.com")).await.expect("insert");
        assert!(store.find_user_by_email("A@x.com").await.unwrap().is_none());
        assert!(store.find_user_by_email("a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn patch_only_touches_given_columns() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@x.com")).await.expect("insert");
        let patch = UserPatch {
            name: None,
            phone: Some("555".into()),
        };
        store.update_user(user.id, &patch).await.expect("update");
        let after = store.find_user_by_id(user.id).await.unwrap().expect("user");
        assert_eq!(after.name, "Ann");
        assert_eq!(after.phone.as_deref(), Some("555"));
    }

    #[tokio::test]
    async fn one_profile_per_user() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.insert_profile(id, None).await.expect("first profile");
        let err = store.insert_profile(id, None).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn avatar_upsert_creates_then_updates_the_single_row() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let patch = |a: &str| ProfilePatch {
            avatar: Some(a.into()),
        };
        store.upsert_profile(id, &patch("one.png")).await.expect("create");
        let first = store.find_profile_by_user(id).await.unwrap().expect("row");
        assert_eq!(first.avatar.as_deref(), Some("one.png"));

        store.upsert_profile(id, &patch("two.png")).await.expect("update");
        let second = store.find_profile_by_user(id).await.unwrap().expect("row");
        assert_eq!(second.id, first.id);
        assert_eq!(second.avatar.as_deref(), Some("two.png"));

        store
            .upsert_profile(id, &ProfilePatch { avatar: None })
            .await
            .expect("empty patch");
        let third = store.find_profile_by_user(id).await.unwrap().expect("row");
        assert_eq!(third.avatar.as_deref(), Some("two.png"));
    }

    #[tokio::test]
    async fn deleting_sessions_is_scoped_to_owner() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for owner in [a, a, b] {
            store
                .insert_session(NewSession {
                    user_id: owner,
                    ip_address: None,
                    user_agent: None,
                })
                .await
                .expect("session");
        }
        assert_eq!(store.delete_sessions_by_user(a).await.unwrap(), 2);
        assert_eq!(store.session_count(a).await, 0);
        assert_eq!(store.session_count(b).await, 1);
    }
}
