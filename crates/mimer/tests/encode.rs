//! Integration tests for message encoding.
//!
//! These tests encode complete messages into in-memory sinks and inspect
//! the resulting byte streams.

use std::collections::HashSet;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::DateTime;
use mimer::mimer_mime::encoding::{decode_base64, decode_quoted_printable, decode_rfc2047};
use mimer::{BodyEncoding, Encoder, EncoderOptions, Message, MessageBuilder, Stage, encode};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn builder() -> MessageBuilder {
    Message::builder()
        .from("vit@example.com")
        .to(["support@example.com"])
        .subject("Test")
        .date(DateTime::parse_from_rfc2822("Tue, 15 Nov 1994 08:12:31 +0200").unwrap())
}

fn encode_to_string(message: Message) -> String {
    let mut out = Vec::new();
    encode(message, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

/// Returns the boundary parameter of the first `mime_type` content type.
fn boundary_of<'a>(text: &'a str, mime_type: &str) -> &'a str {
    let marker = format!("{mime_type}; boundary=\"");
    let start = text.find(&marker).unwrap() + marker.len();
    let len = text[start..].find('"').unwrap();
    &text[start..start + len]
}

fn header_lines<'a>(text: &'a str, name: &str) -> Vec<&'a str> {
    let prefix = format!("{name}: ");
    text.split("\r\n").filter(|line| line.starts_with(&prefix)).collect()
}

/// Byte source that yields some data, then fails.
struct FlakySource {
    remaining: usize,
}

impl Read for FlakySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
        }
        let n = self.remaining.min(buf.len());
        buf[..n].fill(b'z');
        self.remaining -= n;
        Ok(n)
    }
}

/// Byte source that counts how often it is read.
struct CountingSource {
    inner: Cursor<Vec<u8>>,
    reads: Arc<AtomicUsize>,
}

impl Read for CountingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(buf)
    }
}

/// Sink that rejects every write.
struct ClosedSink;

impl Write for ClosedSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_end_to_end_minimal_message() {
    init_tracing();

    let message = builder().from_name("Vitold S.").build();
    let text = encode_to_string(message);

    let from = header_lines(&text, "From");
    assert_eq!(from, vec!["From: \"Vitold S.\" <vit@example.com>"]);
    assert_eq!(header_lines(&text, "To"), vec!["To: support@example.com"]);
    assert_eq!(header_lines(&text, "Subject"), vec!["Subject: Test"]);
    assert_eq!(header_lines(&text, "Mime-Version"), vec!["Mime-Version: 1.0"]);

    let mixed = boundary_of(&text, "multipart/mixed");
    let alternative = boundary_of(&text, "multipart/alternative");

    // One body part, no attachments.
    assert_eq!(text.matches(&format!("--{mixed}\r\n")).count(), 1);
    assert!(text.ends_with(&format!("--{mixed}--\r\n")));

    // Empty alternative section: opened and immediately closed.
    assert!(text.contains(&format!(
        "boundary=\"{alternative}\"\r\n\r\n--{alternative}--\r\n"
    )));
    assert!(!text.contains(&format!("--{alternative}\r\n")));
    assert!(!text.contains("Content-Disposition"));
}

#[test]
fn test_boundaries_are_hex_and_unique() {
    let mut seen = HashSet::new();

    for _ in 0..10_000 {
        let text = encode_to_string(builder().build());
        let mixed = boundary_of(&text, "multipart/mixed").to_string();
        let alternative = boundary_of(&text, "multipart/alternative").to_string();

        for boundary in [&mixed, &alternative] {
            assert_eq!(boundary.len(), 60);
            assert!(
                boundary
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            );
        }
        assert_ne!(mixed, alternative);
        assert!(seen.insert(mixed));
        assert!(seen.insert(alternative));
    }
}

#[test]
fn test_header_injection_in_address() {
    let message = builder()
        .to(["a@b.com\r\nBcc: evil@x.com"])
        .cc(["c@d.com\nX-Injected: yes"])
        .reply_to("r@e.com\r\nSubject: spoofed")
        .build();
    let text = encode_to_string(message);

    assert_eq!(header_lines(&text, "To"), vec!["To: a@b.com"]);
    assert_eq!(header_lines(&text, "CC"), vec!["CC: c@d.com"]);
    assert_eq!(header_lines(&text, "Reply-To"), vec!["Reply-To: r@e.com"]);
    assert_eq!(header_lines(&text, "Subject"), vec!["Subject: Test"]);
    assert!(!text.contains("evil@x.com"));
    assert!(!text.contains("X-Injected"));
    assert!(
        !text
            .split("\r\n")
            .any(|line| line.to_ascii_lowercase().starts_with("bcc:"))
    );
}

#[test]
fn test_header_injection_in_subject_and_name() {
    let message = builder()
        .from_name("Mallory\r\nBcc: evil@x.com")
        .subject("Hi\r\nBcc: evil@x.com")
        .build();
    let text = encode_to_string(message);

    assert_eq!(header_lines(&text, "From").len(), 1);
    assert_eq!(header_lines(&text, "Subject").len(), 1);
    assert!(
        !text
            .split("\r\n")
            .any(|line| line.to_ascii_lowercase().starts_with("bcc:"))
    );
}

#[test]
fn test_empty_addresses_dropped() {
    let message = builder()
        .to(["  ", "a@example.com", "\r\n", "", "b@example.com"])
        .build();
    assert_eq!(message.to(), ["a@example.com", "b@example.com"]);

    let text = encode_to_string(message);
    assert_eq!(
        header_lines(&text, "To"),
        vec!["To: a@example.com", "To: b@example.com"]
    );
}

#[test]
fn test_bcc_hidden_by_default() {
    let message = builder().bcc(["hidden1@example.com", "hidden2@example.com"]).build();
    assert_eq!(
        message.envelope_recipients(),
        vec!["support@example.com", "hidden1@example.com", "hidden2@example.com"]
    );

    let text = encode_to_string(message);
    assert!(!text.contains("BCC:"));
    assert!(!text.contains("hidden1@example.com"));
}

#[test]
fn test_bcc_written_when_enabled() {
    let message = builder()
        .cc(["copy@example.com"])
        .bcc(["first@example.com", "second@example.com"])
        .write_bcc_header(true)
        .build();
    let text = encode_to_string(message);

    assert_eq!(
        header_lines(&text, "BCC"),
        vec!["BCC: first@example.com", "BCC: second@example.com"]
    );
    let cc = text.find("CC: copy@example.com").unwrap();
    let bcc = text.find("BCC: first@example.com").unwrap();
    assert!(cc < bcc);
}

#[test]
fn test_non_ascii_subject_round_trip() {
    for subject in ["Café crème", "Привет, мир", "日本語の件名", "Grüße aus Köln"] {
        let text = encode_to_string(builder().subject(subject).build());
        let lines = header_lines(&text, "Subject");
        assert_eq!(lines.len(), 1);

        let value = lines[0].trim_start_matches("Subject: ");
        assert!(value.starts_with("=?UTF-8?Q?"));
        assert!(value.is_ascii());
        assert_eq!(decode_rfc2047(value).unwrap(), subject);
    }
}

#[test]
fn test_non_ascii_display_name() {
    let text = encode_to_string(builder().from_name("Émile Zola").build());
    let from = header_lines(&text, "From");
    assert_eq!(from.len(), 1);

    let value = from[0].trim_start_matches("From: ");
    let (name, addr) = value.rsplit_once(' ').unwrap();
    assert_eq!(addr, "<vit@example.com>");
    assert_eq!(decode_rfc2047(name).unwrap(), "Émile Zola");
}

#[test]
fn test_large_attachment_folding() {
    let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let message = builder().attach("big.bin", Cursor::new(data.clone())).build();
    let text = encode_to_string(message);

    let marker = "Content-Disposition: attachment; filename=\"big.bin\"\r\n\r\n";
    let start = text.find(marker).unwrap() + marker.len();
    let body = &text[start..text[start..].find("\r\n\r\n").unwrap() + start];

    let lines: Vec<&str> = body.split("\r\n").collect();
    let (last, full) = lines.split_last().unwrap();
    assert!(full.iter().all(|line| line.len() == 76));
    assert!(!last.is_empty() && last.len() <= 76);

    assert_eq!(decode_base64(body).unwrap(), data);
}

#[test]
fn test_plain_and_html_bodies() {
    let plain = "Line one\r\nLine two with trailing space \r\nÜber";
    let html = "<p>Hello, <b>world</b></p>";
    let message = builder().text_body(plain).html_body(html).build();
    let text = encode_to_string(message);

    let alternative = boundary_of(&text, "multipart/alternative");
    let delimiter = format!("--{alternative}\r\n");
    let parts: Vec<&str> = text.split(&delimiter).skip(1).collect();
    assert_eq!(parts.len(), 2);

    let (plain_headers, plain_body) = parts[0].split_once("\r\n\r\n").unwrap();
    assert!(plain_headers.contains("Content-Type: text/plain; charset=UTF-8"));
    assert!(plain_headers.contains("Content-Transfer-Encoding: quoted-printable"));
    let plain_body = plain_body.strip_suffix("\r\n").unwrap();
    assert_eq!(decode_quoted_printable(plain_body).unwrap(), plain);

    let (html_headers, html_body) = parts[1].split_once("\r\n\r\n").unwrap();
    assert!(html_headers.contains("Content-Type: text/html; charset=UTF-8"));
    assert!(html_body.contains(&format!("\r\n--{alternative}--\r\n")));
    let html_body = html_body.split("\r\n--").next().unwrap();
    assert_eq!(decode_quoted_printable(html_body).unwrap(), html);
}

#[test]
fn test_base64_body_option() {
    let options = EncoderOptions::builder()
        .body_encoding(BodyEncoding::Base64)
        .build();
    let message = builder().text_body("Grüße").build();

    let mut out = Vec::new();
    Encoder::with_options(options)
        .encode(message, &mut out)
        .unwrap();
    let text = String::from_utf8(out).unwrap();

    let marker = "Content-Transfer-Encoding: base64\r\n\r\n";
    let start = text.find(marker).unwrap() + marker.len();
    let line = text[start..].split("\r\n").next().unwrap();
    assert_eq!(decode_base64(line).unwrap(), "Grüße".as_bytes());
}

#[test]
fn test_attachments_in_order() {
    let message = builder()
        .text_body("See attached")
        .attach("first.txt", Cursor::new(b"one".to_vec()))
        .attach_inline("second.png", Cursor::new(b"two".to_vec()))
        .build();
    let text = encode_to_string(message);

    let mixed = boundary_of(&text, "multipart/mixed");
    assert_eq!(text.matches(&format!("--{mixed}\r\n")).count(), 3);

    let first = text.find("filename=\"first.txt\"").unwrap();
    let second = text.find("inline; filename=\"second.png\"").unwrap();
    assert!(first < second);
    assert!(text.contains("Content-ID: <second.png>"));
    assert!(text.ends_with(&format!("--{mixed}--\r\n")));
}

#[test]
fn test_failing_attachment_source_closes_envelope() {
    init_tracing();

    let message = builder()
        .attach("ok.txt", Cursor::new(b"fine".to_vec()))
        .attach("flaky.bin", FlakySource { remaining: 100 })
        .build();

    let mut out = Vec::new();
    let err = encode(message, &mut out).unwrap_err();

    assert_eq!(
        err.stage(),
        Some(&Stage::Attachment {
            index: 1,
            filename: "flaky.bin".into()
        })
    );
    assert!(err.to_string().contains("attachment #1 (flaky.bin)"));

    let text = String::from_utf8(out).unwrap();
    let mixed = boundary_of(&text, "multipart/mixed");
    assert!(text.ends_with(&format!("--{mixed}--\r\n")));
}

#[test]
fn test_failing_sink() {
    let err = encode(builder().build(), ClosedSink).unwrap_err();
    assert_eq!(err.stage(), Some(&Stage::Headers));
    assert!(!err.is_entropy());

    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "sink closed");
}

#[test]
fn test_write_to_matches_encode() {
    let mut out = Vec::new();
    let written = builder().text_body("Hi").build().write_to(&mut out).unwrap();
    assert_eq!(written, out.len() as u64);
    assert!(String::from_utf8(out).unwrap().contains("\r\nHi\r\n"));
}

#[test]
fn test_attachment_read_only_during_encode() {
    let reads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: Cursor::new(b"lazy bytes".to_vec()),
        reads: Arc::clone(&reads),
    };

    let message = builder().attach("lazy.txt", source).build();
    assert_eq!(reads.load(Ordering::SeqCst), 0);

    let mut out = Vec::new();
    encode(message, &mut out).unwrap();
    assert!(reads.load(Ordering::SeqCst) > 0);

    let text = String::from_utf8(out).unwrap();
    let marker = "filename=\"lazy.txt\"\r\n\r\n";
    let start = text.find(marker).unwrap() + marker.len();
    let line = text[start..].split("\r\n").next().unwrap();
    assert_eq!(decode_base64(line).unwrap(), b"lazy bytes");
}

#[test]
fn test_cleared_attachment_never_read() {
    let reads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: Cursor::new(b"unused".to_vec()),
        reads: Arc::clone(&reads),
    };

    let message = builder().attach("gone.txt", source).clear_attachments().build();
    encode_to_string(message);
    assert_eq!(reads.load(Ordering::SeqCst), 0);
}
