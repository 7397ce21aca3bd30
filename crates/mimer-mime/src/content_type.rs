//! MIME content type handling.

use std::fmt;

/// Content type used when nothing more specific is known.
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

/// A content type parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Parameter {
    key: String,
    value: String,
    quoted: bool,
}

/// MIME content type with parameters.
///
/// Parameters keep their insertion order so the rendered header is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    parameters: Vec<Parameter>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// Creates a `text/plain; charset=UTF-8` content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "UTF-8")
    }

    /// Creates a `text/html; charset=UTF-8` content type.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "UTF-8")
    }

    /// Creates a multipart/mixed content type with boundary.
    #[must_use]
    pub fn multipart_mixed(boundary: impl Into<String>) -> Self {
        Self::new("multipart", "mixed").with_quoted_parameter("boundary", boundary)
    }

    /// Creates a multipart/alternative content type with boundary.
    #[must_use]
    pub fn multipart_alternative(boundary: impl Into<String>) -> Self {
        Self::new("multipart", "alternative").with_quoted_parameter("boundary", boundary)
    }

    /// Creates the generic binary content type.
    #[must_use]
    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    /// Guesses a content type from a file name's extension.
    ///
    /// Unknown or missing extensions map to `application/octet-stream`.
    #[must_use]
    pub fn from_filename(filename: &str) -> Self {
        let essence = filename
            .rsplit_once('.')
            .map_or(APPLICATION_OCTET_STREAM, |(_, ext)| {
                mime_from_extension(&ext.to_ascii_lowercase())
            });

        essence
            .split_once('/')
            .map_or_else(Self::octet_stream, |(main, sub)| Self::new(main, sub))
    }

    /// Adds a parameter, quoting the value only when it contains specials.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(key.into(), value.into(), false);
        self
    }

    /// Adds a parameter whose value is always rendered as a quoted string.
    #[must_use]
    pub fn with_quoted_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.set_parameter(key.into(), value.into(), true);
        self
    }

    fn set_parameter(&mut self, key: String, value: String, quoted: bool) {
        let key = key.to_lowercase();
        self.parameters.retain(|p| p.key != key);
        self.parameters.push(Parameter { key, value, quoted });
    }

    /// Returns a parameter value by name.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.key.eq_ignore_ascii_case(key))
            .map(|p| p.value.as_str())
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }

    /// Returns `type/subtype` without parameters.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        for Parameter { key, value, quoted } in &self.parameters {
            let needs_quotes =
                value.is_empty() || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c));
            if *quoted || needs_quotes {
                write!(f, "; {key}=\"{}\"", quote_escape(value))?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
    }
}

/// Escapes `"` and `\` for use inside an RFC 5322 quoted string.
#[must_use]
pub fn quote_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn mime_from_extension(ext: &str) -> &'static str {
    match ext {
        "txt" | "text" | "log" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "ics" => "text/calendar",
        "md" => "text/markdown",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "eml" => "message/rfc822",
        _ => APPLICATION_OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_new() {
        let ct = ContentType::new("text", "plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert_eq!(ct.to_string(), "text/plain");
    }

    #[test]
    fn test_text_plain() {
        let ct = ContentType::text_plain();
        assert_eq!(ct.charset(), Some("UTF-8"));
        assert!(ct.is_text());
        assert_eq!(ct.to_string(), "text/plain; charset=UTF-8");
    }

    #[test]
    fn test_text_html() {
        assert_eq!(ContentType::text_html().to_string(), "text/html; charset=UTF-8");
    }

    #[test]
    fn test_multipart_boundary_is_quoted() {
        let ct = ContentType::multipart_mixed("boundary123");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("boundary123"));
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"boundary123\"");

        let ct = ContentType::multipart_alternative("abc");
        assert_eq!(ct.to_string(), "multipart/alternative; boundary=\"abc\"");
    }

    #[test]
    fn test_parameter_order_and_replacement() {
        let ct = ContentType::new("text", "plain")
            .with_parameter("charset", "iso-8859-1")
            .with_parameter("format", "flowed")
            .with_parameter("Charset", "UTF-8");

        assert_eq!(ct.charset(), Some("UTF-8"));
        assert_eq!(ct.to_string(), "text/plain; format=flowed; charset=UTF-8");
    }

    #[test]
    fn test_parameter_quoting() {
        let ct = ContentType::octet_stream().with_parameter("name", "my \"file\".bin");
        assert_eq!(
            ct.to_string(),
            "application/octet-stream; name=\"my \\\"file\\\".bin\""
        );
    }

    #[test]
    fn test_from_filename() {
        assert_eq!(ContentType::from_filename("report.pdf").essence(), "application/pdf");
        assert_eq!(ContentType::from_filename("LOGO.PNG").essence(), "image/png");
        assert_eq!(ContentType::from_filename("archive.tar.gz").essence(), "application/gzip");
        assert_eq!(ContentType::from_filename("README").essence(), APPLICATION_OCTET_STREAM);
        assert_eq!(ContentType::from_filename("data.xyz").essence(), APPLICATION_OCTET_STREAM);
    }
}
