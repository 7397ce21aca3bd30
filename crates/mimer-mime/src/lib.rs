//! # mimer-mime
//!
//! MIME encoding primitives for composing email messages.
//!
//! ## Features
//!
//! - **Boundaries**: Cryptographically random multipart boundaries
//! - **Header encoding**: Line-break stripping and RFC 2047 Q-encoded words
//! - **Transfer encodings**: Quoted-Printable and streaming, line-folded Base64
//! - **Content types**: Ordered parameters and extension-based lookup
//! - **Headers**: Ordered header fields with `\r\n` serialization
//!
//! ## Quick Start
//!
//! ### Boundaries
//!
//! ```ignore
//! use mimer_mime::{Boundary, ContentType};
//!
//! let boundary = Boundary::generate()?;
//! let ct = ContentType::multipart_mixed(boundary.as_str());
//! println!("Content-Type: {ct}");
//! ```
//!
//! ### Header Values
//!
//! ```ignore
//! use mimer_mime::encoding::encode_header_value;
//!
//! // Line breaks are stripped, non-ASCII text becomes an encoded word
//! assert_eq!(encode_header_value("Héllo"), "=?UTF-8?Q?H=C3=A9llo?=");
//! ```
//!
//! ### Streaming Base64
//!
//! ```ignore
//! use mimer_mime::encoding::Base64LineWriter;
//! use std::io;
//!
//! let mut writer = Base64LineWriter::new(Vec::new());
//! io::copy(&mut std::fs::File::open("logo.png")?, &mut writer)?;
//! let folded = writer.finish()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod boundary;
mod content_type;
mod error;
mod header;

pub mod encoding;

pub use boundary::{BOUNDARY_ENTROPY_BYTES, BOUNDARY_LEN, Boundary};
pub use content_type::{APPLICATION_OCTET_STREAM, ContentType, quote_escape};
pub use error::{Error, Result};
pub use header::Headers;

/// Value of the `Mime-Version` header written by this crate.
pub const MIME_VERSION: &str = "1.0";
