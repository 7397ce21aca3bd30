//! MIME header handling.

use crate::encoding::strip_line_breaks;
use std::fmt;
use std::io::{self, Write};

/// Ordered collection of header fields.
///
/// Fields are written in insertion order with `\r\n` line endings. Values
/// never contain line breaks: they are stripped on insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header field.
    pub fn add(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        let value = strip_line_breaks(value.as_ref());
        self.fields.push((name.into(), value));
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|pos| self.fields[pos].1.as_str())
    }

    /// Returns an iterator over all headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of header fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no header fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Writes all fields to `writer`, one `Name: value\r\n` line each.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        for (name, value) in &self.fields {
            write!(writer, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
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

    #[test]
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.is_empty());
        assert_eq!(headers.to_string(), "");
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
    }

    #[test]
    fn test_headers_keep_order() {
        let mut headers = Headers::new();
        headers.add("From", "sender@example.com");
        headers.add("To", "a@example.com");
        headers.add("Subject", "Hi");
        headers.add("To", "b@example.com");

        assert_eq!(
            headers.to_string(),
            concat!(
                "From: sender@example.com\r\n",
                "To: a@example.com\r\n",
                "Subject: Hi\r\n",
                "To: b@example.com\r\n",
            )
        );
    }

    #[test]
    fn test_headers_strip_line_breaks() {
        let mut headers = Headers::new();
        headers.add("Subject", "Hi\r\nBcc: evil@x.com");
        assert_eq!(headers.to_string(), "Subject: HiBcc: evil@x.com\r\n");
    }

    #[test]
    fn test_headers_write_to() {
        let mut headers = Headers::new();
        headers.add("Mime-Version", "1.0");
        let mut out = Vec::new();
        headers.write_to(&mut out).unwrap();
        assert_eq!(out, b"Mime-Version: 1.0\r\n");
    }

    #[test]
    fn test_headers_iter_len() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("Subject", "Hi");
        headers.add("To", "bob@example.com");

        assert_eq!(headers.len(), 3);
        assert_eq!(
            headers.iter().filter(|(n, _)| *n == "To").map(|(_, v)| v).collect::<Vec<_>>(),
            vec!["alice@example.com", "bob@example.com"]
        );
        assert_eq!(headers.get("to"), Some("alice@example.com"));
    }
}
