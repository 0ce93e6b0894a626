// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource handout.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{PoolId, PoolStatus, RequestHandoutId, Resource};
use crate::store::{BufferStore, StoreError};

/// Handout failures.
///
/// `PoolNotFound` maps to not-found; `PoolDeactivated` and
/// `NoResourceAvailable` map to no-content. Only `Store` is a system failure.
#[derive(Debug, Error)]
pub enum HandoutError {
    #[error("Pool not found: {0}")]
    PoolNotFound(PoolId),

    #[error("Pool {0} is deactivated")]
    PoolDeactivated(PoolId),

    #[error("No READY resource available in pool {0}")]
    NoResourceAvailable(PoolId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandoutError {
    /// True for the ordinary "nothing to hand out" outcomes.
    pub fn is_no_content(&self) -> bool {
        matches!(self, Self::PoolDeactivated(_) | Self::NoResourceAvailable(_))
    }
}

#[derive(Clone)]
pub struct HandoutService {
    store: Arc<dyn BufferStore>,
}

impl HandoutService {
    pub fn new(store: Arc<dyn BufferStore>) -> Self {
        Self { store }
    }

    /// Hand out one READY resource of `pool_id` under `request_handout_id`.
    ///
    /// Repeating a request with the same key returns the resource handed out
    /// the first time, without claiming another one.
    pub async fn handout_resource(
        &self,
        pool_id: &PoolId,
        request_handout_id: &RequestHandoutId,
    ) -> Result<Resource, HandoutError> {
        let pool = self
            .store
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| HandoutError::PoolNotFound(pool_id.clone()))?;

        if let Some(existing) = self
            .store
            .get_resource_by_handout_id(pool_id, request_handout_id)
            .await?
        {
            debug!(
                pool_id = %pool_id,
                request_handout_id = %request_handout_id,
                resource_id = %existing.id,
                "Returning previous handout"
            );
            return Ok(existing);
        }

        if pool.status != PoolStatus::Active {
            return Err(HandoutError::PoolDeactivated(pool_id.clone()));
        }

        match self
            .store
            .claim_ready_resource(pool_id, request_handout_id)
            .await
        {
            Ok(Some(resource)) => {
                info!(
                    pool_id = %pool_id,
                    request_handout_id = %request_handout_id,
                    resource_id = %resource.id,
                    "Handed out resource"
                );
                Ok(resource)
            }
            Ok(None) => Err(HandoutError::NoResourceAvailable(pool_id.clone())),
            // A concurrent request with the same key won the unique index.
            Err(e) if e.is_constraint_violation() => self
                .store
                .get_resource_by_handout_id(pool_id, request_handout_id)
                .await?
                .ok_or(HandoutError::Store(e)),
            Err(e) => Err(e.into()),
        }
    }
}
