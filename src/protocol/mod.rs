//! # Protocol Layer
//!
//! Message catalog and authentication for PostgreSQL protocol 3.0.
//!
//! ## Components
//! - **Frontend / Backend**: typed client and server messages
//! - **Fields**: the tag-keyed field map of `ErrorResponse` / `NoticeResponse`
//! - **Auth / SCRAM**: cleartext, MD5 and SCRAM-SHA-256 authentication
//! - **Dispatcher**: off-read-path delivery of notices and notifications
//!
//! Nothing in this layer performs I/O; the session moves the bytes.

pub mod auth;
pub mod backend;
pub mod dispatcher;
pub mod fields;
pub mod frontend;
pub mod scram;
