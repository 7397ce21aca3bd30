//! # mimer
//!
//! Injection-safe composition of MIME multipart email messages.
//!
//! ## Features
//!
//! - **Header safety**: Line breaks never reach the wire from caller input
//! - **Non-ASCII text**: Subjects and display names become RFC 2047 encoded words
//! - **Bodies**: Plain-text and HTML alternatives, Quoted-Printable or Base64
//! - **Attachments**: Regular and inline, streamed from any [`std::io::Read`]
//! - **Structure**: `multipart/mixed` envelope closed on every exit path
//!
//! ## Quick Start
//!
//! ```ignore
//! use mimer::{Encoder, Message};
//! use std::fs::File;
//!
//! let message = Message::builder()
//!     .from("vit@example.com")
//!     .from_name("Vitold S.")
//!     .to(["support@example.com"])
//!     .subject("Привет")
//!     .text_body("Hello")
//!     .html_body("<p>Hello</p>")
//!     .attach_inline("logo.png", File::open("logo.png")?)
//!     .build();
//!
//! let mut out = Vec::new();
//! let written = Encoder::new().encode(message, &mut out)?;
//! ```
//!
//! ## Envelope Recipients
//!
//! Bcc recipients are omitted from the headers by default. The transport
//! envelope must still include them:
//!
//! ```ignore
//! let rcpt_to = message.envelope_recipients();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod encoder;
mod error;
mod message;

pub mod writer;

pub use config::{BodyEncoding, EncoderOptions, EncoderOptionsBuilder};
pub use encoder::{Assembler, EncodeState, Encoder, encode};
pub use error::{Error, Result, Stage};
pub use message::{Attachment, BodyKind, BodyPart, Message, MessageBuilder, RFC1123Z};

pub use mimer_mime;
