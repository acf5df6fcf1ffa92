/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Planner error types

use thiserror::Error;

/// Planner error
///
/// "No usable index" and similar dead ends are not errors: they travel as
/// `None` or as an infinite cost. Only conditions the search cannot route
/// around end up here.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The logical shape has no physical realization under current constraints
    #[error("not supported: {0}")]
    NotSupported(String),
    /// An internal invariant was violated
    #[error("unexpected planner state: {0}")]
    Unexpected(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PlanError {
    pub fn not_supported(message: impl Into<String>) -> Self {
        PlanError::NotSupported(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        PlanError::Unexpected(message.into())
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, PlanError::NotSupported(_))
    }
}

/// Result type for planner operations
pub type PlanResult<T> = Result<T, PlanError>;
