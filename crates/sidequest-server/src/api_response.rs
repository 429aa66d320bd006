// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Response helpers mapping the error taxonomy to HTTP status codes.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};

use sidequest_api::ErrorResponse;

pub fn error_response(
	status: StatusCode,
	code: impl Into<String>,
	message: impl Into<String>,
) -> Response {
	(status, Json(ErrorResponse::new(code, message))).into_response()
}

/// 400 Bad Request.
pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Response {
	error_response(StatusCode::BAD_REQUEST, code, message)
}

/// 401 Unauthorized.
pub fn unauthorized(message: impl Into<String>) -> Response {
	error_response(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// 404 Not Found.
pub fn not_found(message: impl Into<String>) -> Response {
	error_response(StatusCode::NOT_FOUND, "not_found", message)
}

/// 409 Conflict.
pub fn conflict(message: impl Into<String>) -> Response {
	error_response(StatusCode::CONFLICT, "conflict", message)
}

/// 500 Internal Server Error.
pub fn internal_error(message: impl Into<String>) -> Response {
	error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}
