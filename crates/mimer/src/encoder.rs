//! Message assembly.
//!
//! Encoding is a single pass through a fixed sequence of states:
//!
//! ```text
//! Start ─→ HeadersWritten ─→ MixedOpened ─→ AlternativeWritten
//!                                                  │
//!            Done ←─ MixedClosed ←─ AttachmentsWritten(0..n)
//! ```
//!
//! Both boundaries are generated before anything is written, so an entropy
//! failure leaves the sink untouched. Once the `multipart/mixed` envelope is
//! open, its close delimiter is written on every exit path, including
//! failures; the call still reports the failure.

use crate::config::EncoderOptions;
use crate::error::{Error, Result, Stage};
use crate::message::{Attachment, Message};
use crate::writer::{write_attachment, write_body, write_headers};
use mimer_mime::{Boundary, ContentType};
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::io::{self, Write};
use tracing::{debug, trace, warn};

/// Position of an [`Assembler`] in the encoding sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    /// Nothing written yet.
    Start,
    /// Top-level headers written.
    HeadersWritten,
    /// `multipart/mixed` content type and first delimiter written.
    MixedOpened,
    /// `multipart/alternative` body section written.
    AlternativeWritten,
    /// The given number of attachments written.
    AttachmentsWritten(usize),
    /// Close delimiter of the envelope written.
    MixedClosed,
    /// Sink flushed; encoding succeeded.
    Done,
}

impl EncodeState {
    /// Returns true while the envelope is open and still needs its close
    /// delimiter.
    #[must_use]
    pub const fn is_envelope_open(self) -> bool {
        matches!(
            self,
            Self::MixedOpened | Self::AlternativeWritten | Self::AttachmentsWritten(_)
        )
    }
}

impl fmt::Display for EncodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::HeadersWritten => f.write_str("headers written"),
            Self::MixedOpened => f.write_str("mixed opened"),
            Self::AlternativeWritten => f.write_str("alternative written"),
            Self::AttachmentsWritten(n) => write!(f, "{n} attachments written"),
            Self::MixedClosed => f.write_str("mixed closed"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Writer adapter that counts the bytes passed through it.
#[derive(Debug)]
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Drives one message through the encoding states into a sink.
///
/// Most callers should use [`Encoder`], which generates the boundaries and
/// runs an assembler to completion.
#[derive(Debug)]
pub struct Assembler<W: Write> {
    sink: CountingWriter<W>,
    state: EncodeState,
    close_attempted: bool,
    mixed: Boundary,
    alternative: Boundary,
    options: EncoderOptions,
}

impl<W: Write> Assembler<W> {
    /// Creates an assembler in the [`EncodeState::Start`] state.
    pub const fn new(
        sink: W,
        mixed: Boundary,
        alternative: Boundary,
        options: EncoderOptions,
    ) -> Self {
        Self {
            sink: CountingWriter {
                inner: sink,
                count: 0,
            },
            state: EncodeState::Start,
            close_attempted: false,
            mixed,
            alternative,
            options,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> EncodeState {
        self.state
    }

    /// Returns the number of bytes written to the sink so far.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.sink.count
    }

    /// Returns the `multipart/mixed` boundary.
    #[must_use]
    pub const fn mixed_boundary(&self) -> &Boundary {
        &self.mixed
    }

    /// Returns the `multipart/alternative` boundary.
    #[must_use]
    pub const fn alternative_boundary(&self) -> &Boundary {
        &self.alternative
    }

    /// Writes `message` to the sink, consuming it.
    ///
    /// On failure after the envelope was opened, the close delimiter is
    /// still attempted before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] naming the stage that failed.
    pub fn assemble(&mut self, message: Message) -> Result<()> {
        let result = self.run(message);

        if let Err(err) = &result {
            if self.state.is_envelope_open() && !self.close_attempted {
                warn!(state = %self.state, error = %err, "Encoding failed, closing envelope");
                if let Err(close_err) = self.close_mixed() {
                    warn!(error = %close_err, "Failed to close envelope");
                }
            }
        }

        result
    }

    /// Returns the sink.
    pub fn into_inner(self) -> W {
        self.sink.inner
    }

    fn run(&mut self, message: Message) -> Result<()> {
        write_headers(&mut self.sink, &message).map_err(|e| Error::io(Stage::Headers, e))?;
        self.transition(EncodeState::HeadersWritten);

        self.open_mixed()?;
        self.transition(EncodeState::MixedOpened);

        let (plain, html, attachments) = message.into_parts();

        self.sink
            .write_all(self.mixed.delimiter().as_bytes())
            .map_err(|e| Error::io(Stage::Envelope, e))?;
        write_body(
            &mut self.sink,
            plain.as_ref(),
            html.as_ref(),
            &self.alternative,
            self.options.body_encoding,
        )
        .map_err(|e| Error::io(Stage::Body, e))?;
        self.transition(EncodeState::AlternativeWritten);

        for (index, attachment) in attachments.into_iter().enumerate() {
            let stage = Stage::Attachment {
                index,
                filename: attachment.filename().to_string(),
            };
            let read = self
                .write_attachment_part(attachment)
                .map_err(|e| Error::io(stage, e))?;
            trace!(index, read, "Attachment encoded");
            self.transition(EncodeState::AttachmentsWritten(index + 1));
        }

        self.close_mixed()?;

        self.sink
            .flush()
            .map_err(|e| Error::io(Stage::Envelope, e))?;
        self.transition(EncodeState::Done);
        Ok(())
    }

    fn write_attachment_part(&mut self, attachment: Attachment) -> io::Result<u64> {
        self.sink.write_all(self.mixed.delimiter().as_bytes())?;
        write_attachment(&mut self.sink, attachment)
    }

    fn open_mixed(&mut self) -> Result<()> {
        write!(
            self.sink,
            "Content-Type: {}\r\n\r\n",
            ContentType::multipart_mixed(self.mixed.as_str())
        )
        .map_err(|e| Error::io(Stage::Envelope, e))
    }

    /// Writes the close delimiter. Only ever attempted once: a retry after a
    /// partial write would corrupt the tail of the message.
    fn close_mixed(&mut self) -> Result<()> {
        self.close_attempted = true;
        self.sink
            .write_all(self.mixed.close_delimiter().as_bytes())
            .map_err(|e| Error::io(Stage::Envelope, e))?;
        self.transition(EncodeState::MixedClosed);
        Ok(())
    }

    fn transition(&mut self, next: EncodeState) {
        debug!(from = %self.state, to = %next, bytes = self.sink.count, "Encoder state");
        self.state = next;
    }
}

/// Encodes messages into MIME multipart byte streams.
///
/// # Example
///
/// ```ignore
/// use mimer::{Encoder, Message};
///
/// let message = Message::builder()
///     .from("sender@example.com")
///     .to(["recipient@example.com"])
///     .subject("Hello")
///     .text_body("Hi there")
///     .build();
///
/// let mut out = Vec::new();
/// let written = Encoder::new().encode(message, &mut out)?;
/// ```
#[derive(Debug)]
pub struct Encoder<R = OsRng> {
    rng: R,
    options: EncoderOptions,
}

impl Encoder<OsRng> {
    /// Creates an encoder with default options, drawing boundaries from the
    /// operating system's random source.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_options(EncoderOptions::new())
    }

    /// Creates an encoder with the given options.
    #[must_use]
    pub const fn with_options(options: EncoderOptions) -> Self {
        Self { rng: OsRng, options }
    }
}

impl Default for Encoder<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> Encoder<R> {
    /// Creates an encoder drawing boundaries from `rng`.
    ///
    /// `rng` must be cryptographically secure outside of tests.
    pub const fn with_rng(rng: R, options: EncoderOptions) -> Self {
        Self { rng, options }
    }

    /// Returns the encoder options.
    #[must_use]
    pub const fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Encodes `message` into `sink` and returns the number of bytes written.
    ///
    /// The message is consumed: attachment sources are read here, once.
    /// On failure the sink holds a partial message that must be discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Entropy`] if a boundary cannot be generated (nothing
    /// is written), or [`Error::Io`] if the sink or an attachment source
    /// fails.
    pub fn encode<W: Write>(&mut self, message: Message, sink: W) -> Result<u64> {
        debug!(%message, attachments = message.attachments().len(), "Encoding message");

        let mixed = Boundary::generate_with(&mut self.rng).map_err(Error::Entropy)?;
        let alternative = Boundary::generate_with(&mut self.rng).map_err(Error::Entropy)?;

        let mut assembler = Assembler::new(sink, mixed, alternative, self.options);
        assembler.assemble(message)?;

        Ok(assembler.bytes_written())
    }
}

/// Encodes `message` into `sink` with default options.
///
/// # Errors
///
/// See [`Encoder::encode`].
pub fn encode<W: Write>(message: Message, sink: W) -> Result<u64> {
    Encoder::new().encode(message, sink)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rand::rngs::mock::StepRng;
    use std::io::{Cursor, Read};

    /// Byte source that fails on first read.
    struct BrokenSource;

    impl Read for BrokenSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("source gone"))
        }
    }

    /// Sink that fails once `limit` bytes have been accepted.
    struct LimitedSink {
        data: Vec<u8>,
        limit: usize,
    }

    impl Write for LimitedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit.saturating_sub(self.data.len());
            if room == 0 {
                return Err(io::Error::other("sink full"));
            }
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn boundaries() -> (Boundary, Boundary) {
        let mut rng = StepRng::new(1, 1);
        (
            Boundary::generate_with(&mut rng).unwrap(),
            Boundary::generate_with(&mut rng).unwrap(),
        )
    }

    fn message() -> crate::MessageBuilder {
        Message::builder()
            .from("vit@example.com")
            .to(["support@example.com"])
            .subject("Test")
            .date(DateTime::parse_from_rfc2822("Tue, 15 Nov 1994 08:12:31 +0200").unwrap())
    }

    #[test]
    fn test_state_sequence_success() {
        let (mixed, alternative) = boundaries();
        let mut assembler = Assembler::new(Vec::new(), mixed, alternative, EncoderOptions::new());
        assert_eq!(assembler.state(), EncodeState::Start);

        let msg = message()
            .attach("a.txt", Cursor::new(b"a".to_vec()))
            .attach("b.txt", Cursor::new(b"b".to_vec()))
            .build();
        assembler.assemble(msg).unwrap();

        assert_eq!(assembler.state(), EncodeState::Done);
        let written = assembler.bytes_written();
        let out = assembler.into_inner();
        assert_eq!(written, out.len() as u64);
    }

    #[test]
    fn test_full_output() {
        let (mixed, alternative) = boundaries();
        let (m, a) = (mixed.to_string(), alternative.to_string());
        let mut assembler = Assembler::new(Vec::new(), mixed, alternative, EncoderOptions::new());

        let msg = message()
            .text_body("Hello")
            .attach_inline("logo.png", Cursor::new(b"PNG".to_vec()))
            .build();
        assembler.assemble(msg).unwrap();

        let out = String::from_utf8(assembler.into_inner()).unwrap();
        let expected = format!(
            concat!(
                "From: vit@example.com\r\n",
                "Mime-Version: 1.0\r\n",
                "Date: Tue, 15 Nov 1994 08:12:31 +0200\r\n",
                "Subject: Test\r\n",
                "To: support@example.com\r\n",
                "Content-Type: multipart/mixed; boundary=\"{m}\"\r\n",
                "\r\n",
                "--{m}\r\n",
                "Content-Type: multipart/alternative; boundary=\"{a}\"\r\n",
                "\r\n",
                "--{a}\r\n",
                "Content-Type: text/plain; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: quoted-printable\r\n",
                "\r\n",
                "Hello\r\n",
                "--{a}--\r\n",
                "--{m}\r\n",
                "Content-Type: image/png\r\n",
                "Content-Transfer-Encoding: base64\r\n",
                "Content-Disposition: inline; filename=\"logo.png\"\r\n",
                "Content-ID: <logo.png>\r\n",
                "\r\n",
                "UE5H\r\n",
                "\r\n",
                "--{m}--\r\n",
            ),
            m = m,
            a = a
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn test_attachment_failure_closes_envelope() {
        let (mixed, alternative) = boundaries();
        let close = mixed.close_delimiter();
        let mut assembler = Assembler::new(Vec::new(), mixed, alternative, EncoderOptions::new());

        let msg = message()
            .attach("ok.txt", Cursor::new(b"fine".to_vec()))
            .attach("broken.bin", BrokenSource)
            .build();
        let err = assembler.assemble(msg).unwrap_err();

        assert_eq!(
            err.stage(),
            Some(&Stage::Attachment {
                index: 1,
                filename: "broken.bin".into()
            })
        );
        assert!(err.to_string().contains("source gone"));
        assert_eq!(assembler.state(), EncodeState::MixedClosed);

        let out = String::from_utf8(assembler.into_inner()).unwrap();
        assert!(out.ends_with(&close));
    }

    #[test]
    fn test_header_failure_leaves_envelope_unopened() {
        let (mixed, alternative) = boundaries();
        let sink = LimitedSink {
            data: Vec::new(),
            limit: 10,
        };
        let mut assembler = Assembler::new(sink, mixed, alternative, EncoderOptions::new());

        let err = assembler.assemble(message().build()).unwrap_err();

        assert_eq!(err.stage(), Some(&Stage::Headers));
        assert_eq!(assembler.state(), EncodeState::Start);
        assert_eq!(assembler.bytes_written(), 10);
    }

    #[test]
    fn test_sink_failure_in_body() {
        let (mixed, alternative) = boundaries();
        let mut probe = Assembler::new(
            Vec::new(),
            mixed.clone(),
            alternative.clone(),
            EncoderOptions::new(),
        );
        probe.assemble(message().build()).unwrap();
        // Offset where the first body part will start.
        let close = alternative.close_delimiter();
        let body_start = probe
            .into_inner()
            .windows(close.len())
            .position(|w| w == close.as_bytes())
            .unwrap();

        let sink = LimitedSink {
            data: Vec::new(),
            limit: body_start + 10,
        };
        let mut assembler = Assembler::new(sink, mixed, alternative, EncoderOptions::new());
        let err = assembler.assemble(message().text_body("x".repeat(500)).build()).unwrap_err();

        assert_eq!(err.stage(), Some(&Stage::Body));
        // The sink is full, so the close delimiter cannot be written either.
        assert_eq!(assembler.state(), EncodeState::MixedOpened);
    }

    #[test]
    fn test_close_failure_not_retried() {
        /// Sink that fails once `fail_at` bytes are in, then recovers.
        struct HiccupSink {
            data: Vec<u8>,
            fail_at: usize,
            failed: bool,
        }

        impl Write for HiccupSink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if !self.failed && self.data.len() + buf.len() > self.fail_at {
                    let room = self.fail_at - self.data.len();
                    if room == 0 {
                        self.failed = true;
                        return Err(io::Error::other("transient"));
                    }
                    self.data.extend_from_slice(&buf[..room]);
                    return Ok(room);
                }
                self.data.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let (mixed, alternative) = boundaries();
        let close = mixed.close_delimiter();

        let mut reference = Assembler::new(
            Vec::new(),
            mixed.clone(),
            alternative.clone(),
            EncoderOptions::new(),
        );
        reference.assemble(message().build()).unwrap();
        let full = reference.into_inner();

        // Fail five bytes into the close delimiter.
        let fail_at = full.len() - close.len() + 5;
        let sink = HiccupSink {
            data: Vec::new(),
            fail_at,
            failed: false,
        };
        let mut assembler = Assembler::new(sink, mixed, alternative, EncoderOptions::new());
        let err = assembler.assemble(message().build()).unwrap_err();

        assert_eq!(err.stage(), Some(&Stage::Envelope));
        assert_ne!(assembler.state(), EncodeState::Done);

        let out = assembler.into_inner();
        assert!(out.failed);
        assert_eq!(out.data, full[..fail_at]);
    }

    #[test]
    fn test_encoder_entropy_failure_writes_nothing() {
        struct DeadRng;

        impl RngCore for DeadRng {
            fn next_u32(&mut self) -> u32 {
                0
            }

            fn next_u64(&mut self) -> u64 {
                0
            }

            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(0);
            }

            fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
                Err(rand::Error::new(io::Error::other("no entropy")))
            }
        }

        let mut out = Vec::new();
        let err = Encoder::with_rng(DeadRng, EncoderOptions::new())
            .encode(message().build(), &mut out)
            .unwrap_err();

        assert!(err.is_entropy());
        assert!(err.stage().is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn test_encoder_returns_byte_count() {
        let mut out = Vec::new();
        let written = Encoder::new().encode(message().build(), &mut out).unwrap();
        assert_eq!(written, out.len() as u64);
    }

    #[test]
    fn test_encoder_boundaries_differ() {
        let mut encoder = Encoder::with_rng(StepRng::new(7, 3), EncoderOptions::new());
        let mut out = Vec::new();
        encoder.encode(message().build(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let mixed = text
            .split("multipart/mixed; boundary=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap();
        let alternative = text
            .split("multipart/alternative; boundary=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap();
        assert_ne!(mixed, alternative);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EncodeState::AttachmentsWritten(3).to_string(), "3 attachments written");
        assert!(EncodeState::AlternativeWritten.is_envelope_open());
        assert!(!EncodeState::MixedClosed.is_envelope_open());
    }
}
