// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use crate::model::{
    CloudResourceUid, Pool, PoolAndResourceStates, PoolId, RequestHandoutId, Resource,
    ResourceId, ResourceState,
};

use super::{
    BufferStore, POOL_COLUMNS, PendingResourceInsert, PoolCountRow, PoolRow, RESOURCE_COLUMNS,
    ResourceRow, StoreResult, config_to_json, ensure_creating, fold_pool_counts, limit_to_db,
    size_to_db, uid_to_json,
};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct PgPendingInsert {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PendingResourceInsert for PgPendingInsert {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl BufferStore for PostgresStore {
    async fn create_pools(&self, pools: &[Pool]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for pool in pools {
            sqlx::query(
                r#"
                INSERT INTO pool (id, resource_type, resource_config, size, status, creation, expiration)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(pool.id.as_str())
            .bind(pool.resource_type.as_str())
            .bind(config_to_json(&pool.resource_config)?)
            .bind(size_to_db(pool.size)?)
            .bind(pool.status.as_str())
            .bind(pool.creation)
            .bind(pool.expiration)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_pool(&self, pool_id: &PoolId) -> StoreResult<Option<Pool>> {
        let row: Option<PoolRow> =
            sqlx::query_as(&format!("SELECT {} FROM pool WHERE id = $1", POOL_COLUMNS))
                .bind(pool_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Pool::try_from).transpose()
    }

    async fn list_pools(&self) -> StoreResult<Vec<Pool>> {
        let rows: Vec<PoolRow> =
            sqlx::query_as(&format!("SELECT {} FROM pool ORDER BY id", POOL_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Pool::try_from).collect()
    }

    async fn list_pools_with_resource_counts(&self) -> StoreResult<Vec<PoolAndResourceStates>> {
        // One statement, so every count comes from the same snapshot.
        let rows: Vec<PoolCountRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.resource_type, p.resource_config, p.size, p.status, p.creation, p.expiration,
                   r.state AS state, COUNT(r.id) AS resource_count
            FROM pool p
            LEFT JOIN resource r ON r.pool_id = p.id
            GROUP BY p.id, r.state
            ORDER BY p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        fold_pool_counts(rows)
    }

    async fn update_pool_size(&self, pool_id: &PoolId, size: u32) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE pool SET size = $2 WHERE id = $1")
            .bind(pool_id.as_str())
            .bind(size_to_db(size)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn deactivate_pool(&self, pool_id: &PoolId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE pool SET status = 'DEACTIVATED', expiration = $2 WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(pool_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn begin_create_resource(
        &self,
        resource: &Resource,
    ) -> StoreResult<Option<Box<dyn PendingResourceInsert>>> {
        ensure_creating(resource)?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO resource (id, pool_id, state, creation)
            SELECT $1, p.id, 'CREATING', $3
            FROM pool p
            WHERE p.id = $2 AND p.status = 'ACTIVE'
            "#,
        )
        .bind(resource.id.to_string())
        .bind(resource.pool_id.as_str())
        .bind(resource.creation)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        Ok(Some(Box::new(PgPendingInsert { tx })))
    }

    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        let row: Option<ResourceRow> =
            sqlx::query_as(&format!("SELECT {} FROM resource WHERE id = $1", RESOURCE_COLUMNS))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn get_resource_by_handout_id(
        &self,
        pool_id: &PoolId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<Option<Resource>> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM resource WHERE pool_id = $1 AND request_handout_id = $2",
            RESOURCE_COLUMNS
        ))
        .bind(pool_id.as_str())
        .bind(request_handout_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn list_resources(
        &self,
        pool_id: &PoolId,
        state: ResourceState,
        limit: u32,
    ) -> StoreResult<Vec<Resource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM resource WHERE pool_id = $1 AND state = $2 LIMIT $3",
            RESOURCE_COLUMNS
        ))
        .bind(pool_id.as_str())
        .bind(state.as_str())
        .bind(limit_to_db(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Resource::try_from).collect()
    }

    async fn claim_ready_resource(
        &self,
        pool_id: &PoolId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<Option<Resource>> {
        // SKIP LOCKED keeps concurrent claimers off each other's rows.
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            r#"
            UPDATE resource
            SET state = 'HANDED_OUT', request_handout_id = $2, handout_time = $3
            WHERE id = (
                SELECT id FROM resource
                WHERE pool_id = $1 AND state = 'READY'
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND state = 'READY'
            RETURNING {}
            "#,
            RESOURCE_COLUMNS
        ))
        .bind(pool_id.as_str())
        .bind(request_handout_id.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn mark_resource_ready(
        &self,
        id: &ResourceId,
        cloud_resource_uid: &CloudResourceUid,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE resource SET state = 'READY', cloud_resource_uid = $2 WHERE id = $1 AND state = 'CREATING'",
        )
        .bind(id.to_string())
        .bind(uid_to_json(cloud_resource_uid)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_resource_handed_out(
        &self,
        id: &ResourceId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resource SET state = 'HANDED_OUT', request_handout_id = $2, handout_time = $3
            WHERE id = $1 AND state = 'READY'
            "#,
        )
        .bind(id.to_string())
        .bind(request_handout_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_resource_deleting(&self, id: &ResourceId, flight_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE resource SET state = 'DELETING', deleting_flight_id = $2 WHERE id = $1 AND state = 'READY'",
        )
        .bind(id.to_string())
        .bind(flight_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revert_resource_to_ready(&self, id: &ResourceId, flight_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resource SET state = 'READY', deleting_flight_id = NULL
            WHERE id = $1 AND state = 'DELETING' AND deleting_flight_id = $2
            "#,
        )
        .bind(id.to_string())
        .bind(flight_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_resource_deleted(&self, id: &ResourceId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE resource SET state = 'DELETED', deletion = $2 WHERE id = $1 AND state = 'DELETING'",
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn deleting_flight_id(&self, id: &ResourceId) -> StoreResult<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT deleting_flight_id FROM resource WHERE id = $1 AND state = 'DELETING'",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(flight_id,)| flight_id))
    }

    async fn delete_resource(&self, id: &ResourceId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM resource WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
