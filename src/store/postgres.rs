use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::{
    CredentialStore, NewSession, NewUser, Profile, ProfilePatch, Session, StoreError, User,
    UserPatch,
};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, phone, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, phone, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, name, phone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, password_hash, name, phone, created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.phone)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   phone = COALESCE($3, phone)
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.phone)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            SELECT id, user_id, avatar, created_at
            FROM profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(profile)
    }

    async fn insert_profile(
        &self,
        user_id: Uuid,
        avatar: Option<String>,
    ) -> Result<Profile, StoreError> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (id, user_id, avatar)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, avatar, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(avatar)
        .fetch_one(&self.db)
        .await?;
        Ok(profile)
    }

    async fn upsert_profile(
        &self,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, user_id, avatar)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET avatar = COALESCE(EXCLUDED.avatar, profiles.avatar)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&patch.avatar)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, ip_address, user_agent, last_activity)
            VALUES ($1, $2, $3, $4, now())
            RETURNING id, user_id, ip_address, user_agent, last_activity
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session.user_id)
        .bind(session.ip_address)
        .bind(session.user_agent)
        .fetch_one(&self.db)
        .await?;
        Ok(session)
    }

    async fn delete_sessions_by_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let res = sqlx::query(r#"DELETE FROM sessions WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }
}
