//! Persisted user records: ban state and cached per-mode ratings.

use std::collections::HashMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use parking_lot::Mutex;
use thiserror::Error;

use crate::db::pool::DbPool;
use crate::db::schema::users;
use crate::models::user::UserRecord;

diesel::define_sql_function!(fn lower(x: diesel::sql_types::Text) -> diesel::sql_types::Text);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for StoreError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Read/write contract of the user store.
///
/// Backed by Postgres in production and an in-memory map in tests.
/// Name lookups are case-insensitive.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn get_by_id(&self, uid: i64) -> Result<Option<UserRecord>, StoreError>;
    async fn upsert(&self, user: &UserRecord) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgUserStore {
    pool: DbPool,
}

impl PgUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user = diesel_async::RunQueryDsl::get_result(
            users::table
                .filter(lower(users::username).eq(username.to_lowercase()))
                .select(UserRecord::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn get_by_id(&self, uid: i64) -> Result<Option<UserRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user = diesel_async::RunQueryDsl::get_result(
            users::table.find(uid).select(UserRecord::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn upsert(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let query = diesel::insert_into(users::table)
            .values(user)
            .on_conflict(users::uid)
            .do_update()
            .set(user);
        diesel_async::RunQueryDsl::execute(query, &mut conn).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / local runs without Postgres)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserStore {
    data: Mutex<HashMap<i64, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .data
            .lock()
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn get_by_id(&self, uid: i64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.data.lock().get(&uid).cloned())
    }

    async fn upsert(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.data.lock().insert(user.uid, user.clone());
        Ok(())
    }
}
