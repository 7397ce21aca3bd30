//! Serializers for the individual sections of a message.
//!
//! Each writer emits one section with `\r\n` line endings and leaves the
//! sink positioned where the next delimiter belongs. Every single part ends
//! with a line break that serves as the `\r\n` of the following delimiter;
//! a nested multipart section ends with its own close-delimiter line.

use crate::config::BodyEncoding;
use crate::message::{Attachment, BodyPart, Message, RFC1123Z};
use mimer_mime::encoding::{
    Base64LineWriter, encode_header_value, encode_quoted_printable, encode_rfc2231, needs_encoding,
    strip_line_breaks,
};
use mimer_mime::{Boundary, ContentType, Headers, MIME_VERSION, quote_escape};
use std::io::{self, Write};
use tracing::trace;

/// Characters that force a display name into a quoted string (RFC 5322
/// `specials`).
const SPECIALS: &str = "()<>[]:;@\\,.\"";

/// Builds the top-level message headers in their fixed order.
#[must_use]
pub fn message_headers(message: &Message) -> Headers {
    let mut headers = Headers::new();

    headers.add("From", from_value(message));
    headers.add("Mime-Version", MIME_VERSION);
    headers.add("Date", message.date().format(RFC1123Z).to_string());

    if let Some(reply_to) = message.reply_to() {
        headers.add("Reply-To", reply_to);
    }

    headers.add("Subject", encode_header_value(message.subject()));

    for to in message.to() {
        headers.add("To", to);
    }

    for cc in message.cc() {
        headers.add("CC", cc);
    }

    if message.writes_bcc_header() {
        for bcc in message.bcc() {
            headers.add("BCC", bcc);
        }
    }

    headers
}

/// Formats the `From` value: `name <addr>` if a name is set, else `addr`.
fn from_value(message: &Message) -> String {
    match message.from_name() {
        Some(name) => format!("{} <{}>", display_name(name), message.from()),
        None => message.from().to_string(),
    }
}

/// Encodes a display name as an RFC 5322 phrase.
///
/// Non-ASCII names become encoded words; names with specials become quoted
/// strings.
fn display_name(name: &str) -> String {
    let encoded = encode_header_value(name);
    if encoded != name || !name.contains(|c| SPECIALS.contains(c)) {
        encoded
    } else {
        format!("\"{}\"", quote_escape(name))
    }
}

/// Writes the top-level message headers.
///
/// The header block is assembled in memory and written with a single call.
///
/// # Errors
///
/// Returns an error if the sink fails.
pub fn write_headers<W: Write + ?Sized>(sink: &mut W, message: &Message) -> io::Result<()> {
    let headers = message_headers(message);
    let mut block = Vec::with_capacity(256);
    headers.write_to(&mut block)?;
    trace!(fields = headers.len(), "Writing message headers");
    sink.write_all(&block)
}

/// Writes the `multipart/alternative` section holding the body parts.
///
/// The plain part comes first, then the HTML part. With neither part the
/// section holds no sub-parts, only its close delimiter.
///
/// # Errors
///
/// Returns an error if the sink fails.
pub fn write_body<W: Write + ?Sized>(
    sink: &mut W,
    plain: Option<&BodyPart>,
    html: Option<&BodyPart>,
    boundary: &Boundary,
    encoding: BodyEncoding,
) -> io::Result<()> {
    write!(
        sink,
        "Content-Type: {}\r\n\r\n",
        ContentType::multipart_alternative(boundary.as_str())
    )?;

    for part in [plain, html].into_iter().flatten() {
        sink.write_all(boundary.delimiter().as_bytes())?;
        write_body_part(sink, part, encoding)?;
    }

    sink.write_all(boundary.close_delimiter().as_bytes())
}

fn write_body_part<W: Write + ?Sized>(
    sink: &mut W,
    part: &BodyPart,
    encoding: BodyEncoding,
) -> io::Result<()> {
    trace!(kind = ?part.kind(), %encoding, len = part.text().len(), "Writing body part");

    let mut headers = Headers::new();
    headers.add("Content-Type", part.content_type().to_string());
    headers.add("Content-Transfer-Encoding", encoding.as_str());
    headers.write_to(sink)?;
    sink.write_all(b"\r\n")?;

    match encoding {
        BodyEncoding::QuotedPrintable => {
            sink.write_all(encode_quoted_printable(part.text()).as_bytes())?;
        }
        BodyEncoding::Base64 => {
            let mut writer = Base64LineWriter::new(&mut *sink);
            writer.write_all(part.text().as_bytes())?;
            writer.finish()?;
        }
    }

    sink.write_all(b"\r\n")
}

/// Builds the part headers of an attachment.
#[must_use]
pub fn attachment_headers(attachment: &Attachment) -> Headers {
    let name = strip_line_breaks(attachment.filename());
    let filename = quote_escape(&encode_header_value(&name));
    let kind = if attachment.is_inline() {
        "inline"
    } else {
        "attachment"
    };

    // Names that needed encoding also get the RFC 2231 form.
    let disposition = if needs_encoding(&name) {
        format!(
            "{kind}; filename=\"{filename}\"; filename*={}",
            encode_rfc2231(&name)
        )
    } else {
        format!("{kind}; filename=\"{filename}\"")
    };

    let mut headers = Headers::new();
    headers.add("Content-Type", attachment.content_type().to_string());
    headers.add("Content-Transfer-Encoding", "base64");
    headers.add("Content-Disposition", disposition);
    if attachment.is_inline() {
        headers.add("Content-ID", format!("<{}>", content_id(attachment.filename())));
    }
    headers
}

/// Content-ID token: the name without control characters or angle brackets.
fn content_id(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>'))
        .collect()
}

/// Writes one attachment part, streaming its source through a Base64
/// encoder. Consumes the attachment; its source is read exactly once.
///
/// Returns the number of source bytes read.
///
/// # Errors
///
/// Returns an error if the source cannot be read or the sink fails.
pub fn write_attachment<W: Write + ?Sized>(
    sink: &mut W,
    attachment: Attachment,
) -> io::Result<u64> {
    attachment_headers(&attachment).write_to(sink)?;
    sink.write_all(b"\r\n")?;

    let mut source = attachment.into_source();
    let mut writer = Base64LineWriter::new(&mut *sink);
    let read = io::copy(&mut source, &mut writer)?;
    writer.finish()?;

    sink.write_all(b"\r\n")?;
    Ok(read)
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
    use mimer_mime::encoding::{decode_base64, decode_quoted_printable, decode_rfc2047};
    use rand::rngs::mock::StepRng;
    use std::io::Cursor;

    fn fixed_builder() -> crate::MessageBuilder {
        Message::builder()
            .date(DateTime::parse_from_rfc2822("Tue, 15 Nov 1994 08:12:31 +0200").unwrap())
    }

    fn boundary() -> Boundary {
        Boundary::generate_with(&mut StepRng::new(0, 0)).unwrap()
    }

    #[test]
    fn test_headers_order() {
        let message = fixed_builder()
            .from("sender@example.com")
            .from_name("Sender")
            .reply_to("reply@example.com")
            .subject("Hello")
            .to(["a@example.com", "b@example.com"])
            .cc(["c@example.com"])
            .bcc(["d@example.com"])
            .write_bcc_header(true)
            .build();

        let mut out = Vec::new();
        write_headers(&mut out, &message).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            concat!(
                "From: Sender <sender@example.com>\r\n",
                "Mime-Version: 1.0\r\n",
                "Date: Tue, 15 Nov 1994 08:12:31 +0200\r\n",
                "Reply-To: reply@example.com\r\n",
                "Subject: Hello\r\n",
                "To: a@example.com\r\n",
                "To: b@example.com\r\n",
                "CC: c@example.com\r\n",
                "BCC: d@example.com\r\n",
            )
        );
    }

    #[test]
    fn test_headers_minimal() {
        let message = fixed_builder().from("sender@example.com").build();
        let headers = message_headers(&message);

        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some(""));
        assert!(headers.get("Reply-To").is_none());
        assert!(headers.get("To").is_none());
    }

    #[test]
    fn test_bcc_hidden_by_default() {
        let message = fixed_builder().bcc(["hidden@example.com"]).build();
        let headers = message_headers(&message);
        assert!(headers.get("BCC").is_none());
        assert!(!headers.to_string().contains("hidden@example.com"));
    }

    #[test]
    fn test_display_name_forms() {
        assert_eq!(display_name("Sender"), "Sender");
        assert_eq!(display_name("Vitold S."), "\"Vitold S.\"");
        assert_eq!(display_name("Doe, \"JD\""), "\"Doe, \\\"JD\\\"\"");
        let encoded = display_name("Каи");
        assert!(encoded.starts_with("=?UTF-8?Q?"));
        assert_eq!(decode_rfc2047(&encoded).unwrap(), "Каи");
    }

    #[test]
    fn test_subject_encoded() {
        let message = fixed_builder().subject("Café").build();
        let headers = message_headers(&message);
        let subject = headers.get("Subject").unwrap();
        assert_ne!(subject, "Café");
        assert_eq!(decode_rfc2047(subject).unwrap(), "Café");
    }

    #[test]
    fn test_body_empty() {
        let boundary = boundary();
        let mut out = Vec::new();
        write_body(&mut out, None, None, &boundary, BodyEncoding::QuotedPrintable).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!(
                "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n--{boundary}--\r\n"
            )
        );
    }

    #[test]
    fn test_body_plain_and_html() {
        let boundary = boundary();
        let plain = BodyPart::plain("Grüße\r\n");
        let html = BodyPart::html("<p>Grüße</p>");
        let mut out = Vec::new();
        write_body(
            &mut out,
            Some(&plain),
            Some(&html),
            &boundary,
            BodyEncoding::QuotedPrintable,
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        let expected = format!(
            concat!(
                "Content-Type: multipart/alternative; boundary=\"{b}\"\r\n",
                "\r\n",
                "--{b}\r\n",
                "Content-Type: text/plain; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: quoted-printable\r\n",
                "\r\n",
                "Gr=C3=BC=C3=9Fe\r\n",
                "\r\n",
                "--{b}\r\n",
                "Content-Type: text/html; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: quoted-printable\r\n",
                "\r\n",
                "<p>Gr=C3=BC=C3=9Fe</p>\r\n",
                "--{b}--\r\n",
            ),
            b = boundary
        );
        assert_eq!(text, expected);
        assert_eq!(decode_quoted_printable("Gr=C3=BC=C3=9Fe\r\n").unwrap(), plain.text());
    }

    #[test]
    fn test_body_base64() {
        let boundary = boundary();
        let html = BodyPart::html("<p>Привет, мир!</p>");
        let mut out = Vec::new();
        write_body(&mut out, None, Some(&html), &boundary, BodyEncoding::Base64).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Transfer-Encoding: base64\r\n"));
        let body = text
            .split("\r\n\r\n")
            .nth(2)
            .unwrap()
            .split("--")
            .next()
            .unwrap();
        assert_eq!(decode_base64(body).unwrap(), html.text().as_bytes());
    }

    #[test]
    fn test_attachment_headers_regular() {
        let attachment = Attachment::new("report.pdf", Cursor::new(Vec::new()));
        assert_eq!(
            attachment_headers(&attachment).to_string(),
            concat!(
                "Content-Type: application/pdf\r\n",
                "Content-Transfer-Encoding: base64\r\n",
                "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
            )
        );
    }

    #[test]
    fn test_attachment_headers_inline() {
        let attachment = Attachment::inline("logo.png", Cursor::new(Vec::new()));
        let headers = attachment_headers(&attachment);
        assert_eq!(headers.get("Content-Type"), Some("image/png"));
        assert_eq!(
            headers.get("Content-Disposition"),
            Some("inline; filename=\"logo.png\"")
        );
        assert_eq!(headers.get("Content-ID"), Some("<logo.png>"));
    }

    #[test]
    fn test_attachment_name_injection() {
        let attachment = Attachment::inline(
            "evil\r\nBcc: x@y.com\".png",
            Cursor::new(Vec::new()),
        );
        let text = attachment_headers(&attachment).to_string();
        assert_eq!(text.matches("\r\n").count(), 4);
        assert!(text.contains("filename=\"evilBcc: x@y.com\\\".png\""));
        assert!(text.contains("Content-ID: <evilBcc: x@y.com\".png>"));
    }

    #[test]
    fn test_attachment_content_id_drops_controls() {
        let attachment = Attachment::inline("lo\u{0}go\u{1b}<x>.png", Cursor::new(Vec::new()));
        let headers = attachment_headers(&attachment);

        assert_eq!(headers.get("Content-ID"), Some("<logox.png>"));
        assert!(!headers.to_string().contains(['\u{0}', '\u{1b}']));
    }

    #[test]
    fn test_attachment_non_ascii_filename() {
        let attachment = Attachment::new("résumé.pdf", Cursor::new(Vec::new()));
        let headers = attachment_headers(&attachment);
        let disposition = headers.get("Content-Disposition").unwrap();

        assert!(disposition.is_ascii());
        assert!(disposition.starts_with("attachment; filename=\"=?UTF-8?Q?"));
        assert!(disposition.ends_with("; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"));

        let quoted = disposition
            .split("filename=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        assert_eq!(decode_rfc2047(quoted).unwrap(), "résumé.pdf");
    }

    #[test]
    fn test_attachment_unknown_extension() {
        let attachment = Attachment::new("blob", Cursor::new(Vec::new()));
        assert_eq!(
            attachment_headers(&attachment).get("Content-Type"),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn test_write_attachment_streams_base64() {
        let data: Vec<u8> = (0..200u8).collect();
        let attachment = Attachment::new("data.bin", Cursor::new(data.clone()));
        let mut out = Vec::new();
        let read = write_attachment(&mut out, attachment).unwrap();
        assert_eq!(read, 200);

        let text = String::from_utf8(out).unwrap();
        let (_, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(body.ends_with("\r\n\r\n"));
        for line in body.lines().filter(|l| !l.is_empty()).rev().skip(1) {
            assert_eq!(line.len(), 76);
        }
        assert_eq!(decode_base64(body).unwrap(), data);
    }
}
