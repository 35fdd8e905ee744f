//! # Core Protocol Components
//!
//! Low-level framing for the PostgreSQL v3 wire protocol.
//!
//! ## Components
//! - **Wire**: primitive appenders/parsers (big-endian ints, C-strings, length-prefixed bytes)
//! - **Codec**: Tokio codec for framing over byte streams, with row skip mode
//!
//! ## Wire Format
//! ```text
//! [Tag(1)] [Length(4)] [Body(Length - 4)]
//! ```
//!
//! ## Safety Limits
//! - Maximum frame size is configurable (default 1 GiB)
//! - Length validation before allocation

pub mod codec;
pub mod wire;
