// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Key/value scratch map carried between the steps of a flight.
//!
//! Values are stored as JSON so the whole map can be persisted after every
//! step and restored verbatim when a flight resumes.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{FlightError, Result};

/// String-keyed map of JSON values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightMap {
    entries: Map<String, Value>,
}

impl FlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.entries
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Builder form of [`FlightMap::put`].
    pub fn with<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Result<Self> {
        self.put(key, value)?;
        Ok(self)
    }

    /// Decode the value under `key`, or `None` when absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.entries.get(key) {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Decode the value under `key`, failing when absent.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| FlightError::MissingKey(key.to_string()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The map as a JSON object, for persistence.
    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.clone())
    }

    /// Rebuild a map from its persisted JSON form.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            Value::Null => Ok(Self::default()),
            other => Err(FlightError::InvalidRecord(format!(
                "flight map must be a JSON object, got {}",
                other
            ))),
        }
    }
}
