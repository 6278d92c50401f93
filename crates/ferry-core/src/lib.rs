//! # Ferry Core Library
//!
//! `ferry-core` keeps a long-running upload alive across three independently
//! scheduled contexts that can each die at any time:
//!
//! - a **controller** that starts uploads and renders their status,
//! - an **uploader** that streams the file to the backend,
//! - a **supervisor** that outlives both and can resume the upload.
//!
//! The contexts share no memory. They talk over an unordered broadcast
//! [`bus`] and agree on facts through a small [`store`] of durable keys.
//!
//! ## Modules
//!
//! - [`bus`] - Fan-out publish/subscribe channel between contexts
//! - [`config`] - Configuration management
//! - [`controller`] - User-facing driver that reflects bus traffic into a view
//! - [`error`] - Error type shared by all components
//! - [`mod@file`] - File payloads and size formatting
//! - [`notify`] - Notification sink used when no controller is around
//! - [`protocol`] - Messages exchanged over the bus
//! - [`scheduler`] - Recovery trigger registration
//! - [`store`] - Durable key/value store and the typed transfer wrapper
//! - [`supervisor`] - Liveness probe and resume logic
//! - [`transport`] - Upload transport (multipart POST)
//! - [`uploader`] - Upload worker state machine
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use ferry_core::bus::Bus;
//! use ferry_core::controller::Controller;
//! use ferry_core::file::FilePayload;
//! use ferry_core::store::TransferStore;
//! use ferry_core::transport::HttpTransport;
//! use ferry_core::uploader::Uploader;
//!
//! let bus = Bus::default();
//! let store = TransferStore::in_memory();
//! let transport = Arc::new(HttpTransport::new(ferry_core::DEFAULT_ENDPOINT));
//! let controller = Controller::new(bus.clone(), Uploader::new(store, transport).factory());
//! controller.start_upload(FilePayload::from_path("video.mp4".as_ref()).await?)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod file;
pub mod notify;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod uploader;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default backend endpoint accepting the multipart upload.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3003/api/upload/file";

/// Tag under which the recovery trigger is registered.
pub const RETRY_TAG: &str = "retryUpload";

/// Durable store key holding the pending transfer payload.
pub const PENDING_TRANSFER_KEY: &str = "fileToUpload";

/// Durable store key holding the liveness flag.
pub const LIVENESS_KEY: &str = "heartBeat";

/// Default liveness grace window (2 seconds)
pub const DEFAULT_HEARTBEAT_GRACE_MS: u64 = 2_000;

/// Default delay before the liveness flag is defensively reset after a resume command
pub const DEFAULT_LIVENESS_RESET_MS: u64 = 2_100;

/// Default backoff between recovery trigger registration attempts (10 seconds)
pub const DEFAULT_REGISTRATION_RETRY_MS: u64 = 10_000;

/// Default time an uploader waits before resuming a transfer persisted by another uploader
pub const DEFAULT_ADOPT_DELAY_MS: u64 = 1_000;

/// Default chunk size used when streaming the request body (64 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default bus buffer capacity per subscriber
pub const DEFAULT_BUS_CAPACITY: usize = 1024;
