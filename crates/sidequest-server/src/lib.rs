// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP control surface for the Sidequest orchestrator.
//!
//! Handlers are thin glue: they validate input, route through the worker
//! registry or the job store, and wrap results in the response envelope.
//! All orchestration logic lives in the runtime crates.

pub mod api;
pub mod api_response;
pub mod app;
pub mod routes;

pub use api::{create_router, AppState};
pub use app::build_app_state;
