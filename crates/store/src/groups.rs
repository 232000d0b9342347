//! Recipient users and groups.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::Member;
use herald_notifier::{GroupMembership, MembershipError};

/// Repository for `users`, `recipient_groups` and their membership.
pub struct GroupRepository;

impl GroupRepository {
    /// Create a recipient and return its ID.
    pub async fn create_user(
        pool: &PgPool,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, phone, email) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(phone)
            .bind(email)
            .execute(pool)
            .await?;

        tracing::debug!(user_id = %id, "Recipient created");
        Ok(id)
    }

    /// Create an empty group and return its ID.
    pub async fn create_group(pool: &PgPool, title: &str) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO recipient_groups (id, title) VALUES ($1, $2)")
            .bind(id)
            .bind(title)
            .execute(pool)
            .await?;

        tracing::info!(group_id = %id, title, "Recipient group created");
        Ok(id)
    }

    /// Append a user to a group. Adding an existing member is a no-op.
    pub async fn add_member(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO recipient_group_members (group_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (group_id, user_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Members of a group in insertion order, or `None` for an unknown group.
    pub async fn members(pool: &PgPool, group_id: Uuid) -> Result<Option<Vec<Member>>, AppError> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM recipient_groups WHERE id = $1")
            .bind(group_id)
            .fetch_optional(pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let members: Vec<Member> = sqlx::query_as(
            r#"
            SELECT u.id AS user_id, u.phone, u.email
            FROM recipient_group_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.group_id = $1
            ORDER BY m.position ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(Some(members))
    }

    /// A single recipient by ID.
    pub async fn user(pool: &PgPool, user_id: Uuid) -> Result<Option<Member>, AppError> {
        let member: Option<Member> =
            sqlx::query_as("SELECT id AS user_id, phone, email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;

        Ok(member)
    }
}

/// `GroupMembership` backed by the Postgres recipient tables.
#[derive(Clone)]
pub struct PgGroupMembership {
    pool: PgPool,
}

impl PgGroupMembership {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupMembership for PgGroupMembership {
    async fn members(&self, group: Uuid) -> Result<Vec<Member>, MembershipError> {
        GroupRepository::members(&self.pool, group)
            .await
            .map_err(|e| MembershipError::Backend(e.to_string()))?
            .ok_or(MembershipError::GroupNotFound(group))
    }

    async fn user(&self, user_id: Uuid) -> Result<Option<Member>, MembershipError> {
        GroupRepository::user(&self.pool, user_id)
            .await
            .map_err(|e| MembershipError::Backend(e.to_string()))
    }
}
