//! # fieldsync testkit
//!
//! Testing utilities for fieldsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: in-memory stores, a manual clock and sample payloads
//! - **Faults**: a remote store wrapper that fails or stalls on demand
//! - **Generators**: proptest strategies for records and payloads
//!
//! ## Test Fixtures
//!
//! ```rust
//! use fieldsync_core::EntityKind;
//! use fieldsync_testkit::TestFixture;
//!
//! # async fn example() {
//! let fixture = TestFixture::new();
//! fixture.seed_dirty(EntityKind::Contact, 3).await.unwrap();
//! let metrics = fixture.engine().full_sync().await.unwrap();
//! assert_eq!(metrics.push.total_pushed(), 3);
//! # }
//! ```
//!
//! ## Fault Injection
//!
//! ```rust
//! use std::sync::Arc;
//! use fieldsync_store::RemoteError;
//! use fieldsync_testkit::{FlakyRemote, TestFixture};
//!
//! let fixture = TestFixture::new();
//! let flaky = Arc::new(FlakyRemote::new(fixture.remote.clone()));
//! flaky.fail_table("budgets", RemoteError::from_status(503, "unavailable"));
//! let engine = fixture.engine_with_remote(flaky.clone());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fieldsync_testkit::generators::RecordParams;
//!
//! proptest! {
//!     #[test]
//!     fn pending_records_are_never_clean(params: RecordParams) {
//!         let record = params.to_record();
//!         prop_assert_eq!(record.is_pending(), !matches!(record.marker, SyncMarker::Clean));
//!     }
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::FlakyRemote;
pub use fixtures::{contact, project, sample_payload, staged_file, TestFixture, TEST_EPOCH, TEST_OWNER};
pub use generators::{edit_payload, RecordParams};
