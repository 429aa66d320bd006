// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP API types and validation for the Sidequest server.
//!
//! Every response carries `{success, timestamp}`; failures add
//! `{error: {code, message, details?}}`. Handlers live in the server
//! crate; this crate is pure types plus request validation.

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::{validate_job_id, verify_migration_key};
