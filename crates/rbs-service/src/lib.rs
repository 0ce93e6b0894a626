// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource Buffer Service
//!
//! Keeps pools of pre-provisioned cloud resources at their target size so
//! clients can claim one instantly instead of waiting for provisioning.
//!
//! # Architecture
//!
//! ```text
//!   static pool configs ──► PoolService ──┐
//!                                         ▼
//!   HandoutService ◄──────────────► BufferStore (pool, resource)
//!                                         ▲
//!   FlightScheduler ─► FlightManager ─────┤
//!     (periodic)            │             │
//!                           ▼             │
//!                     FlightEngine ──► flight steps ──► CloudClient
//!                     (rbs-flight)
//! ```
//!
//! Every resource moves through `CREATING -> READY -> HANDED_OUT` or
//! `READY -> DELETING -> DELETED`. Creation and deletion run as durable
//! flights; the scheduler only ever submits flights and re-observes the
//! store on its next cycle.

pub mod cloud;
pub mod config;
pub mod error;
pub mod flight_manager;
pub mod flights;
pub mod handout;
pub mod migrations;
pub mod model;
pub mod pool_service;
pub mod runtime;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
pub use flight_manager::FlightManager;
pub use handout::{HandoutError, HandoutService};
pub use pool_service::PoolService;
pub use runtime::BufferRuntime;
pub use scheduler::{FlightScheduler, FlightSchedulerConfig};
