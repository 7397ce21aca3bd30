//! Message model and builder.
//!
//! A [`MessageBuilder`] collects and sanitizes the user-supplied fields and
//! produces an immutable [`Message`]. The message is then handed by value to
//! an [`Encoder`](crate::Encoder), so it is encoded at most once and cannot
//! change while it is being written.

use crate::Result;
use crate::encoder::Encoder;
use chrono::{DateTime, FixedOffset, Local};
use mimer_mime::ContentType;
use mimer_mime::encoding::{strip_line_breaks, truncate_at_line_break};
use std::fmt;
use std::io::{Read, Write};
use tracing::debug;

/// Date format of the `Date` header (RFC 1123 with numeric zone).
pub const RFC1123Z: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Kind of body content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// `text/plain`
    Plain,
    /// `text/html`
    Html,
}

/// One representation of the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    kind: BodyKind,
    text: String,
}

impl BodyPart {
    /// Creates a plain-text body part.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Plain,
            text: text.into(),
        }
    }

    /// Creates an HTML body part.
    #[must_use]
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Html,
            text: text.into(),
        }
    }

    /// Returns the kind of content.
    #[must_use]
    pub const fn kind(&self) -> BodyKind {
        self.kind
    }

    /// Returns the body text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the content type, always with a UTF-8 charset.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        match self.kind {
            BodyKind::Plain => ContentType::text_plain(),
            BodyKind::Html => ContentType::text_html(),
        }
    }
}

/// A file attached to a message.
///
/// The byte source is not read until the message is encoded, and is then
/// read exactly once. Encoding consumes the attachment.
pub struct Attachment {
    filename: String,
    source: Box<dyn Read + Send>,
    inline: bool,
    content_type: Option<ContentType>,
}

impl Attachment {
    /// Creates a regular attachment offered for download.
    pub fn new(filename: impl Into<String>, source: impl Read + Send + 'static) -> Self {
        Self {
            filename: filename.into(),
            source: Box::new(source),
            inline: false,
            content_type: None,
        }
    }

    /// Creates an inline attachment.
    ///
    /// Inline attachments are rendered within the message body and can be
    /// referenced from HTML by their name, e.g. `<img src="cid:logo.png">`.
    /// Names must be unique within a message.
    pub fn inline(filename: impl Into<String>, source: impl Read + Send + 'static) -> Self {
        Self {
            inline: true,
            ..Self::new(filename, source)
        }
    }

    /// Overrides the content type guessed from the file name.
    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Returns the file name as registered.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Returns true for inline attachments.
    #[must_use]
    pub const fn is_inline(&self) -> bool {
        self.inline
    }

    /// Returns the content type: the explicit one if set, otherwise a guess
    /// from the file extension.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
            .clone()
            .unwrap_or_else(|| ContentType::from_filename(&self.filename))
    }

    pub(crate) fn into_source(self) -> Box<dyn Read + Send> {
        self.source
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("inline", &self.inline)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// A fully populated email message, ready to be encoded.
///
/// Build one with [`Message::builder`].
#[derive(Debug)]
pub struct Message {
    from: String,
    from_name: Option<String>,
    reply_to: Option<String>,
    subject: String,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    write_bcc_header: bool,
    date: DateTime<FixedOffset>,
    plain: Option<BodyPart>,
    html: Option<BodyPart>,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Creates a message builder. The creation timestamp is taken now.
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Returns the sender address.
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Returns the sender display name.
    #[must_use]
    pub fn from_name(&self) -> Option<&str> {
        self.from_name.as_deref()
    }

    /// Returns the Reply-To address.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Returns the subject, with line breaks already removed.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the To addresses in insertion order.
    #[must_use]
    pub fn to(&self) -> &[String] {
        &self.to
    }

    /// Returns the Cc addresses in insertion order.
    #[must_use]
    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    /// Returns the Bcc addresses in insertion order.
    #[must_use]
    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }

    /// Returns true if Bcc addresses are written as `BCC:` headers.
    #[must_use]
    pub const fn writes_bcc_header(&self) -> bool {
        self.write_bcc_header
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn date(&self) -> &DateTime<FixedOffset> {
        &self.date
    }

    /// Returns the plain-text body part.
    #[must_use]
    pub const fn plain(&self) -> Option<&BodyPart> {
        self.plain.as_ref()
    }

    /// Returns the HTML body part.
    #[must_use]
    pub const fn html(&self) -> Option<&BodyPart> {
        self.html.as_ref()
    }

    /// Returns the attachments in registration order.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Returns every recipient (To, Cc, then Bcc) for the delivery envelope.
    ///
    /// Bcc addresses are always included, whether or not they are written
    /// as headers.
    #[must_use]
    pub fn envelope_recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
            .collect()
    }

    /// Encodes the message with default options, returning the number of
    /// bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if a boundary cannot be generated or if the sink or
    /// an attachment source fails.
    pub fn write_to<W: Write>(self, sink: W) -> Result<u64> {
        Encoder::new().encode(self, sink)
    }

    pub(crate) fn into_parts(self) -> (Option<BodyPart>, Option<BodyPart>, Vec<Attachment>) {
        (self.plain, self.html, self.attachments)
    }
}

/// Redacted description for logs; never includes addresses or content.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message {{ date: {:?} }}", self.date.format(RFC1123Z).to_string())
    }
}

/// Builder for [`Message`].
///
/// Every setter replaces the previous value; list setters replace the whole
/// list. Addresses are cut at their first line break and trimmed, and
/// addresses left empty are dropped. Subject and display name have their
/// line breaks removed.
#[derive(Debug)]
pub struct MessageBuilder {
    from: String,
    from_name: Option<String>,
    reply_to: Option<String>,
    subject: String,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    write_bcc_header: bool,
    date: DateTime<FixedOffset>,
    plain: Option<BodyPart>,
    html: Option<BodyPart>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    /// Creates an empty builder dated now, in local time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            from: String::new(),
            from_name: None,
            reply_to: None,
            subject: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            write_bcc_header: false,
            date: Local::now().fixed_offset(),
            plain: None,
            html: None,
            attachments: Vec::new(),
        }
    }

    /// Sets the sender address.
    #[must_use]
    pub fn from(mut self, addr: impl AsRef<str>) -> Self {
        self.from = sanitize_address(addr.as_ref());
        self
    }

    /// Sets the sender display name.
    ///
    /// Non-ASCII names are Q-encoded when written.
    #[must_use]
    pub fn from_name(mut self, name: impl AsRef<str>) -> Self {
        let name = strip_line_breaks(name.as_ref());
        self.from_name = (!name.is_empty()).then_some(name);
        self
    }

    /// Sets the Reply-To address.
    #[must_use]
    pub fn reply_to(mut self, addr: impl AsRef<str>) -> Self {
        let addr = sanitize_address(addr.as_ref());
        self.reply_to = (!addr.is_empty()).then_some(addr);
        self
    }

    /// Sets the subject line.
    ///
    /// Non-ASCII subjects are Q-encoded when written.
    #[must_use]
    pub fn subject(mut self, subject: impl AsRef<str>) -> Self {
        self.subject = strip_line_breaks(subject.as_ref());
        self
    }

    /// Sets the To recipients, visible to all recipients.
    #[must_use]
    pub fn to<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.to = sanitize_addresses("To", addrs);
        self
    }

    /// Sets the Cc recipients, visible to all recipients.
    #[must_use]
    pub fn cc<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cc = sanitize_addresses("Cc", addrs);
        self
    }

    /// Sets the Bcc recipients.
    #[must_use]
    pub fn bcc<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.bcc = sanitize_addresses("Bcc", addrs);
        self
    }

    /// Writes Bcc addresses as `BCC:` headers when true. Defaults to false.
    ///
    /// Email APIs that take a raw MIME message usually need this. SMTP
    /// relays may forward the header to every recipient, so leave it off
    /// when delivering over SMTP.
    #[must_use]
    pub const fn write_bcc_header(mut self, write: bool) -> Self {
        self.write_bcc_header = write;
        self
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub const fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = date;
        self
    }

    /// Sets the plain-text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.plain = Some(BodyPart::plain(text));
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html = Some(BodyPart::html(html));
        self
    }

    /// Adds a regular attachment. `source` is not read until encoding.
    #[must_use]
    pub fn attach(self, filename: impl Into<String>, source: impl Read + Send + 'static) -> Self {
        self.attachment(Attachment::new(filename, source))
    }

    /// Adds an inline attachment. `source` is not read until encoding.
    ///
    /// Reference it from the HTML body with `cid:<filename>`.
    #[must_use]
    pub fn attach_inline(
        self,
        filename: impl Into<String>,
        source: impl Read + Send + 'static,
    ) -> Self {
        self.attachment(Attachment::inline(filename, source))
    }

    /// Adds a prepared attachment.
    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Removes all attachments added so far.
    #[must_use]
    pub fn clear_attachments(mut self) -> Self {
        self.attachments.clear();
        self
    }

    /// Builds the message.
    #[must_use]
    pub fn build(self) -> Message {
        Message {
            from: self.from,
            from_name: self.from_name,
            reply_to: self.reply_to,
            subject: self.subject,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            write_bcc_header: self.write_bcc_header,
            date: self.date,
            plain: self.plain,
            html: self.html,
            attachments: self.attachments,
        }
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the text before the first line break, without control characters
/// or surrounding whitespace.
fn sanitize_address(raw: &str) -> String {
    truncate_at_line_break(raw)
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

fn sanitize_addresses<I, S>(field: &str, addrs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    addrs
        .into_iter()
        .filter_map(|addr| {
            let clean = sanitize_address(addr.as_ref());
            if clean.is_empty() {
                debug!(field, "Dropping empty address");
                None
            } else {
                Some(clean)
            }
        })
        .collect()
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
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_setters_replace() {
        let message = Message::builder()
            .to(["one@example.com", "two@example.com"])
            .to(["three@example.com"])
            .subject("First")
            .subject("Second")
            .build();

        assert_eq!(message.to(), ["three@example.com"]);
        assert_eq!(message.subject(), "Second");
    }

    #[test]
    fn test_address_injection_is_cut() {
        let message = Message::builder()
            .to(["a@b.com\r\nBcc: evil@x.com"])
            .from("me@example.com\nX-Evil: 1")
            .reply_to("reply@example.com\r\n")
            .build();

        assert_eq!(message.to(), ["a@b.com"]);
        assert_eq!(message.from(), "me@example.com");
        assert_eq!(message.reply_to(), Some("reply@example.com"));
    }

    #[test]
    fn test_empty_addresses_dropped() {
        let message = Message::builder()
            .cc(["", "   ", "\r\nsomeone@example.com", "ok@example.com"])
            .build();

        assert_eq!(message.cc(), ["ok@example.com"]);
    }

    #[test]
    fn test_subject_and_name_line_breaks_removed() {
        let message = Message::builder()
            .subject("Hello\r\nBcc: evil@x.com")
            .from_name("Vitold\n S.")
            .build();

        assert_eq!(message.subject(), "HelloBcc: evil@x.com");
        assert_eq!(message.from_name(), Some("Vitold S."));
    }

    #[test]
    fn test_empty_reply_to_is_unset() {
        let message = Message::builder().reply_to("\r\n").build();
        assert!(message.reply_to().is_none());
    }

    #[test]
    fn test_envelope_recipients_include_bcc() {
        let message = Message::builder()
            .to(["to@example.com"])
            .cc(["cc@example.com"])
            .bcc(["bcc@example.com"])
            .build();

        assert!(!message.writes_bcc_header());
        assert_eq!(
            message.envelope_recipients(),
            ["to@example.com", "cc@example.com", "bcc@example.com"]
        );
    }

    #[test]
    fn test_attachments() {
        let message = Message::builder()
            .attach("report.pdf", Cursor::new(vec![1, 2, 3]))
            .attach_inline("logo.png", Cursor::new(vec![4]))
            .build();

        let attachments = message.attachments();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename(), "report.pdf");
        assert!(!attachments[0].is_inline());
        assert_eq!(attachments[0].content_type().essence(), "application/pdf");
        assert!(attachments[1].is_inline());
    }

    #[test]
    fn test_clear_attachments() {
        let message = Message::builder()
            .attach("a.txt", Cursor::new(Vec::new()))
            .clear_attachments()
            .attach("b.txt", Cursor::new(Vec::new()))
            .build();

        assert_eq!(message.attachments().len(), 1);
        assert_eq!(message.attachments()[0].filename(), "b.txt");
    }

    #[test]
    fn test_explicit_content_type() {
        let attachment = Attachment::new("data", Cursor::new(Vec::new()))
            .with_content_type(ContentType::new("text", "csv"));
        assert_eq!(attachment.content_type().essence(), "text/csv");
    }

    #[test]
    fn test_body_parts() {
        let message = Message::builder()
            .text_body("plain")
            .html_body("<p>html</p>")
            .build();

        assert_eq!(message.plain().unwrap().kind(), BodyKind::Plain);
        assert_eq!(message.html().unwrap().text(), "<p>html</p>");
        assert_eq!(
            message.html().unwrap().content_type().to_string(),
            "text/html; charset=UTF-8"
        );
    }

    #[test]
    fn test_display_is_redacted() {
        let date = DateTime::parse_from_rfc2822("Tue, 15 Nov 1994 08:12:31 +0200").unwrap();
        let message = Message::builder()
            .from("secret@example.com")
            .subject("Private")
            .date(date)
            .build();

        let shown = message.to_string();
        assert_eq!(shown, "Message { date: \"Tue, 15 Nov 1994 08:12:31 +0200\" }");
        assert!(!shown.contains("secret"));
    }

    proptest! {
        #[test]
        fn prop_addresses_are_clean(addrs in prop::collection::vec(".*", 0..8)) {
            let message = Message::builder().to(&addrs).build();

            prop_assert!(message.to().len() <= addrs.len());
            for addr in message.to() {
                prop_assert!(!addr.is_empty());
                prop_assert!(!addr.chars().any(char::is_control));
                prop_assert_eq!(addr.trim(), addr.as_str());
            }
        }

        #[test]
        fn prop_address_cut_at_line_break(
            addr in "\\PC*",
            tail in ".*",
            sep in prop::sample::select(vec!["\r\n", "\n", "\r"]),
        ) {
            let message = Message::builder()
                .cc([format!("{addr}{sep}{tail}")])
                .build();

            let expected: Vec<&str> = Some(addr.trim())
                .filter(|a| !a.is_empty())
                .into_iter()
                .collect();
            prop_assert_eq!(message.cc(), expected.as_slice());
        }
    }
}
