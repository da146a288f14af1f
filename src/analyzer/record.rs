// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The trace record shape (§4.10). The concrete schema is an external
//! collaborator's concern, so this is a thin `serde_json::Value` newtype
//! rather than a fixed struct.

use crate::error::{CrateError, Result};

/// One parsed line of a newline-delimited JSON trace file.
#[derive(Debug, Clone)]
pub struct TraceRecord(pub serde_json::Value);

impl TraceRecord {
    pub fn parse_line(line: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| CrateError::InvalidArgument(format!("malformed trace record: {e}")))?;
        Ok(Self(value))
    }

    /// The grouping field's value, stringified for hashing. Missing or
    /// non-scalar fields fall back to an empty string, grouping them
    /// together rather than erroring.
    pub fn field_as_str(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
