// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request validation shared by API handlers.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static JOB_ID_REGEX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").unwrap());

/// Validate a job ID: alphanumeric, hyphen, underscore; at most 100 chars.
pub fn validate_job_id(id: &str) -> bool {
	JOB_ID_REGEX.is_match(id)
}

/// Compare the presented migration key against the configured one.
///
/// Both sides are hashed first so the comparison does not leak the key
/// length or early-mismatch position.
pub fn verify_migration_key(presented: &str, expected: &str) -> bool {
	let presented = Sha256::digest(presented.as_bytes());
	let expected = Sha256::digest(expected.as_bytes());
	presented == expected
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn accepts_typical_job_ids() {
		assert!(validate_job_id("repomix-1700000000000"));
		assert!(validate_job_id("scan-17-retry3"));
		assert!(validate_job_id("under_scored_ID-42"));
	}

	#[test]
	fn rejects_bad_job_ids() {
		assert!(!validate_job_id(""));
		assert!(!validate_job_id("has space"));
		assert!(!validate_job_id("path/../traversal"));
		assert!(!validate_job_id("semi;colon"));
		assert!(!validate_job_id(&"x".repeat(101)));
	}

	#[test]
	fn boundary_length_is_accepted() {
		assert!(validate_job_id(&"x".repeat(100)));
	}

	#[test]
	fn migration_key_matches_exactly() {
		assert!(verify_migration_key("s3cret", "s3cret"));
		assert!(!verify_migration_key("s3cret", "S3cret"));
		assert!(!verify_migration_key("", "s3cret"));
		assert!(!verify_migration_key("s3cret-but-longer", "s3cret"));
	}

	proptest! {
		// Valid IDs survive a round trip through validation; anything with
		// characters outside the class is rejected.
		#[test]
		fn prop_job_id_character_class(id in "[A-Za-z0-9_-]{1,100}") {
			prop_assert!(validate_job_id(&id));
		}

		#[test]
		fn prop_job_id_rejects_other_chars(id in "[^A-Za-z0-9_-]{1,20}") {
			prop_assert!(!validate_job_id(&id));
		}
	}
}
