//! MIME encoding and decoding utilities.
//!
//! Supports header sanitizing, RFC 2047 Q-encoded words, Quoted-Printable
//! and Base64 (including a streaming, line-folding Base64 writer). The
//! decoders exist to verify that encoded output round-trips.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Maximum line length for Quoted-Printable and Base64 bodies (RFC 2045).
pub const MAX_LINE_LENGTH: usize = 76;

/// Maximum length of a single RFC 2047 encoded word.
const MAX_ENCODED_WORD_LENGTH: usize = 75;

const Q_WORD_PREFIX: &str = "=?UTF-8?Q?";
const Q_WORD_SUFFIX: &str = "?=";

/// Input bytes that encode to exactly one Base64 line.
const BASE64_LINE_INPUT: usize = MAX_LINE_LENGTH / 4 * 3;

/// Removes every carriage return and line feed from `raw`.
#[must_use]
pub fn strip_line_breaks(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// Returns the part of `raw` before its first carriage return or line feed.
#[must_use]
pub fn truncate_at_line_break(raw: &str) -> &str {
    raw.find(['\r', '\n']).map_or(raw, |pos| &raw[..pos])
}

/// Returns true if `text` cannot appear verbatim in a header field.
///
/// Non-ASCII bytes and control characters other than horizontal tab need
/// an encoded word.
#[must_use]
pub fn needs_encoding(text: &str) -> bool {
    text.bytes()
        .any(|b| !b.is_ascii() || (b.is_ascii_control() && b != b'\t'))
}

/// Makes a user-supplied value safe for a header field.
///
/// Line breaks are stripped first, then the remainder is Q-encoded if it
/// contains anything other than printable ASCII.
#[must_use]
pub fn encode_header_value(raw: &str) -> String {
    let stripped = strip_line_breaks(raw);
    if needs_encoding(&stripped) {
        encode_q(&stripped)
    } else {
        stripped
    }
}

/// Encodes text as one or more RFC 2047 Q-encoded words with UTF-8 charset.
///
/// Only letters, digits and `!*+-/` are left literal, which keeps the result
/// valid in both `text` and `phrase` header positions. Words never split a
/// character and are joined by a single space.
#[must_use]
pub fn encode_q(text: &str) -> String {
    let max_payload = MAX_ENCODED_WORD_LENGTH - Q_WORD_PREFIX.len() - Q_WORD_SUFFIX.len();

    let mut words: Vec<String> = Vec::new();
    let mut payload = String::new();
    let mut piece = String::new();
    let mut utf8 = [0u8; 4];

    for ch in text.chars() {
        piece.clear();
        for byte in ch.encode_utf8(&mut utf8).bytes() {
            match byte {
                b' ' => piece.push('_'),
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                    piece.push(char::from(byte));
                }
                _ => {
                    let _ = write!(piece, "={byte:02X}");
                }
            }
        }

        if !payload.is_empty() && payload.len() + piece.len() > max_payload {
            words.push(std::mem::take(&mut payload));
        }
        payload.push_str(&piece);
    }
    words.push(payload);

    words
        .iter()
        .map(|word| format!("{Q_WORD_PREFIX}{word}{Q_WORD_SUFFIX}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes a header value made of RFC 2047 encoded words.
///
/// Values that do not start with an encoded word are returned unchanged.
/// Whitespace between adjacent encoded words is dropped, as RFC 2047
/// section 6.2 requires.
///
/// # Errors
///
/// Returns an error if a word is malformed or the decoded bytes are not
/// valid UTF-8.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    if !text.starts_with("=?") {
        return Ok(text.to_string());
    }

    let mut decoded = Vec::new();
    for word in text.split_ascii_whitespace() {
        decoded.extend(decode_encoded_word(word)?);
    }

    String::from_utf8(decoded).map_err(Into::into)
}

fn decode_encoded_word(word: &str) -> Result<Vec<u8>> {
    let inner = word
        .strip_prefix("=?")
        .and_then(|w| w.strip_suffix("?="))
        .ok_or_else(|| Error::InvalidEncoding(format!("Not an encoded word: {word}")))?;

    let parts: Vec<&str> = inner.split('?').collect();
    if parts.len() != 3 {
        return Err(Error::InvalidEncoding(
            "Invalid RFC 2047 format".to_string(),
        ));
    }

    let encoding = parts[1].to_uppercase();
    let encoded_text = parts[2];

    match encoding.as_str() {
        "B" => decode_base64(encoded_text),
        "Q" => {
            let with_spaces = encoded_text.replace('_', " ");
            decode_quoted_printable_bytes(&with_spaces)
        }
        _ => Err(Error::InvalidEncoding(format!(
            "Unknown encoding: {encoding}"
        ))),
    }
}

/// Encodes a MIME parameter value in RFC 2231 extended form with UTF-8
/// charset, e.g. `UTF-8''%C3%A9t%C3%A9.pdf`.
///
/// Used with the `name*=` parameter syntax. Every byte outside the RFC 2231
/// `attribute-char` set is percent-encoded, control characters included.
#[must_use]
pub fn encode_rfc2231(value: &str) -> String {
    let mut result = String::with_capacity(value.len() * 3 + 7);
    result.push_str("UTF-8''");
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z'
            | b'A'..=b'Z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => result.push(char::from(byte)),
            _ => {
                let _ = write!(result, "%{byte:02X}");
            }
        }
    }
    result
}

/// Encodes data as Base64 without line folding.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data. Line breaks and other whitespace are ignored.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Encodes text using Quoted-Printable encoding (RFC 2045 section 6.7).
///
/// `\r\n` pairs become hard line breaks; lone `\r` and `\n` are escaped so
/// decoding reproduces the input byte for byte. Whitespace before a line
/// break or at the end of the text is escaped. Lines never exceed
/// [`MAX_LINE_LENGTH`] characters including the soft-break `=`.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut result = String::with_capacity(bytes.len() + bytes.len() / 8);
    let mut line_length = 0;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];

        if byte == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            result.push_str("\r\n");
            line_length = 0;
            i += 2;
            continue;
        }

        let literal = match byte {
            b'!'..=b'<' | b'>'..=b'~' => true,
            b' ' | b'\t' => !matches!(bytes.get(i + 1), None | Some(b'\r' | b'\n')),
            _ => false,
        };
        let width = if literal { 1 } else { 3 };

        // Soft line break; the trailing '=' takes the last column.
        if line_length + width > MAX_LINE_LENGTH - 1 {
            result.push_str("=\r\n");
            line_length = 0;
        }

        if literal {
            result.push(char::from(byte));
        } else {
            let _ = write!(result, "={byte:02X}");
        }
        line_length += width;
        i += 1;
    }

    result
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences or does
/// not decode to UTF-8.
pub fn decode_quoted_printable(text: &str) -> Result<String> {
    String::from_utf8(decode_quoted_printable_bytes(text)?).map_err(Into::into)
}

fn decode_quoted_printable_bytes(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        // Soft line break
        if bytes.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }
        if bytes.get(i + 1..i + 3) == Some(b"\r\n".as_slice()) {
            i += 3;
            continue;
        }

        let hex = bytes
            .get(i + 1..i + 3)
            .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
        let hex = std::str::from_utf8(hex)
            .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
        let byte = u8::from_str_radix(hex, 16)
            .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
        result.push(byte);
        i += 3;
    }

    Ok(result)
}

/// Streaming Base64 encoder that folds its output into lines.
///
/// Input is consumed incrementally: at most one line's worth of input
/// (57 bytes) is held between writes. Every emitted line is exactly
/// [`MAX_LINE_LENGTH`] characters followed by `\r\n`, except the final line
/// written by [`finish`](Self::finish), which may be shorter.
#[derive(Debug)]
pub struct Base64LineWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
    line: [u8; MAX_LINE_LENGTH + 2],
}

impl<W: Write> Base64LineWriter<W> {
    /// Wraps `inner`, which receives the folded Base64 text.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(BASE64_LINE_INPUT),
            line: [0; MAX_LINE_LENGTH + 2],
        }
    }

    /// Encodes any buffered input as the final (possibly padded) line and
    /// returns the inner writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the inner writer fails.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.write_line(&pending)?;
        }
        Ok(self.inner)
    }

    fn write_line(&mut self, chunk: &[u8]) -> io::Result<()> {
        let len = STANDARD
            .encode_slice(chunk, &mut self.line)
            .map_err(io::Error::other)?;
        self.line[len..len + 2].copy_from_slice(b"\r\n");
        self.inner.write_all(&self.line[..len + 2])
    }
}

impl<W: Write> Write for Base64LineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut input = buf;

        if !self.pending.is_empty() {
            let take = (BASE64_LINE_INPUT - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];

            if self.pending.len() == BASE64_LINE_INPUT {
                let mut line = std::mem::take(&mut self.pending);
                self.write_line(&line)?;
                line.clear();
                self.pending = line;
            }
        }

        while input.len() >= BASE64_LINE_INPUT {
            let (line, rest) = input.split_at(BASE64_LINE_INPUT);
            self.write_line(line)?;
            input = rest;
        }

        self.pending.extend_from_slice(input);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
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

    #[test]
    fn test_strip_line_breaks() {
        assert_eq!(strip_line_breaks("Hello\r\nWorld"), "HelloWorld");
        assert_eq!(strip_line_breaks("a\rb\nc"), "abc");
        assert_eq!(strip_line_breaks("plain"), "plain");
    }

    #[test]
    fn test_truncate_at_line_break() {
        assert_eq!(
            truncate_at_line_break("a@b.com\r\nBcc: evil@x.com"),
            "a@b.com"
        );
        assert_eq!(truncate_at_line_break("a@b.com\n"), "a@b.com");
        assert_eq!(truncate_at_line_break("\r\nx"), "");
        assert_eq!(truncate_at_line_break("a@b.com"), "a@b.com");
    }

    #[test]
    fn test_header_value_ascii_passthrough() {
        assert_eq!(encode_header_value("Test"), "Test");
        assert_eq!(encode_header_value("Hello? = World_"), "Hello? = World_");
        assert_eq!(encode_header_value(""), "");
    }

    #[test]
    fn test_header_value_injection() {
        let encoded = encode_header_value("Hi\r\nBcc: evil@x.com");
        assert_eq!(encoded, "HiBcc: evil@x.com");
    }

    #[test]
    fn test_header_value_non_ascii() {
        let encoded = encode_header_value("Héllo");
        assert_eq!(encoded, "=?UTF-8?Q?H=C3=A9llo?=");
        assert_eq!(decode_rfc2047(&encoded).unwrap(), "Héllo");
    }

    #[test]
    fn test_header_value_control_chars_encoded() {
        let encoded = encode_header_value("a\u{0}b");
        assert!(encoded.starts_with("=?UTF-8?Q?"));
        assert!(!encoded.contains('\0'));
    }

    #[test]
    fn test_rfc2231_encoding() {
        assert_eq!(encode_rfc2231("report.pdf"), "UTF-8''report.pdf");
        assert_eq!(encode_rfc2231("été.pdf"), "UTF-8''%C3%A9t%C3%A9.pdf");
        assert_eq!(encode_rfc2231("a b\"c\u{0}"), "UTF-8''a%20b%22c%00");
    }

    #[test]
    fn test_q_encoding_spaces_and_specials() {
        assert_eq!(encode_q("a b"), "=?UTF-8?Q?a_b?=");
        assert_eq!(encode_q("a_b"), "=?UTF-8?Q?a=5Fb?=");
        assert_eq!(encode_q("a?="), "=?UTF-8?Q?a=3F=3D?=");
    }

    #[test]
    fn test_q_encoding_splits_long_text() {
        let text = "Ünïcödé ".repeat(20);
        let encoded = encode_q(&text);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        for word in &words {
            assert!(word.len() <= MAX_ENCODED_WORD_LENGTH, "word too long: {word}");
            assert!(word.starts_with(Q_WORD_PREFIX));
            assert!(word.ends_with(Q_WORD_SUFFIX));
        }
        assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
    }

    #[test]
    fn test_rfc2047_decode() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo?=").unwrap(), "Héllo");
        assert!(decode_rfc2047("=?utf-8?X?abc?=").is_err());
    }

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_quoted_printable_encode() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");
        assert_eq!(encode_quoted_printable("a=b"), "a=3Db");
        assert_eq!(encode_quoted_printable("Héllo"), "H=C3=A9llo");
    }

    #[test]
    fn test_quoted_printable_line_breaks() {
        assert_eq!(encode_quoted_printable("one\r\ntwo"), "one\r\ntwo");
        assert_eq!(encode_quoted_printable("one\ntwo"), "one=0Atwo");
        assert_eq!(encode_quoted_printable("trailing \r\nx"), "trailing=20\r\nx");
        assert_eq!(encode_quoted_printable("end\t"), "end=09");
    }

    #[test]
    fn test_quoted_printable_soft_breaks() {
        let text = "x".repeat(200);
        let encoded = encode_quoted_printable(&text);
        for line in encoded.split("\r\n") {
            assert!(line.len() <= MAX_LINE_LENGTH);
        }
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), text);
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable("H=C3=A9llo").unwrap(), "Héllo");
        assert_eq!(decode_quoted_printable("Hello=\r\nWorld").unwrap(), "HelloWorld");
        assert_eq!(decode_quoted_printable("Hello=\nWorld").unwrap(), "HelloWorld");
        assert!(decode_quoted_printable("bad=Z").is_err());
    }

    #[test]
    fn test_base64_line_writer_folds() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut writer = Base64LineWriter::new(Vec::new());
        for chunk in data.chunks(7) {
            writer.write_all(chunk).unwrap();
        }
        let out = String::from_utf8(writer.finish().unwrap()).unwrap();

        let lines: Vec<&str> = out.strip_suffix("\r\n").unwrap().split("\r\n").collect();
        let (last, full) = lines.split_last().unwrap();
        assert!(full.iter().all(|line| line.len() == MAX_LINE_LENGTH));
        assert!(last.len() <= MAX_LINE_LENGTH);
        assert_eq!(decode_base64(&out).unwrap(), data);
    }

    #[test]
    fn test_base64_line_writer_exact_line() {
        let mut writer = Base64LineWriter::new(Vec::new());
        writer.write_all(&[0u8; BASE64_LINE_INPUT]).unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(out.len(), MAX_LINE_LENGTH + 2);
        assert!(out.ends_with(b"\r\n"));
    }

    #[test]
    fn test_base64_line_writer_empty() {
        let writer = Base64LineWriter::new(Vec::new());
        assert!(writer.finish().unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_header_value_has_no_line_breaks(raw in ".*") {
            let encoded = encode_header_value(&raw);
            prop_assert!(!encoded.contains('\r'));
            prop_assert!(!encoded.contains('\n'));
            prop_assert!(encoded.is_ascii());
        }

        #[test]
        fn prop_q_encoding_round_trip(text in "\\PC+") {
            let encoded = encode_q(&text);
            prop_assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
        }

        #[test]
        fn prop_quoted_printable_round_trip(text in "(\\PC|\r\n|\n|\r| |\t)*") {
            let encoded = encode_quoted_printable(&text);
            for line in encoded.split("\r\n") {
                prop_assert!(line.len() <= MAX_LINE_LENGTH);
                prop_assert!(!line.ends_with(' ') && !line.ends_with('\t'));
            }
            prop_assert_eq!(decode_quoted_printable(&encoded).unwrap(), text);
        }

        #[test]
        fn prop_base64_line_writer_round_trip(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..200,
        ) {
            let mut writer = Base64LineWriter::new(Vec::new());
            for piece in data.chunks(chunk) {
                writer.write_all(piece).unwrap();
            }
            let out = String::from_utf8(writer.finish().unwrap()).unwrap();
            let lines: Vec<&str> = out.split_terminator("\r\n").collect();
            if let Some((_, full)) = lines.split_last() {
                prop_assert!(full.iter().all(|line| line.len() == MAX_LINE_LENGTH));
            }
            prop_assert_eq!(decode_base64(&out).unwrap(), data);
        }
    }
}
