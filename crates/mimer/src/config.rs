//! Encoder configuration types.

use std::fmt;

/// Transfer encoding used for the plain-text and HTML body parts.
///
/// Both encodings reproduce the body text byte for byte when decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BodyEncoding {
    /// Quoted-Printable. Mostly-ASCII text stays readable on the wire.
    #[default]
    QuotedPrintable,
    /// Base64, folded to 76-character lines.
    Base64,
}

impl BodyEncoding {
    /// Returns the `Content-Transfer-Encoding` header value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QuotedPrintable => "quoted-printable",
            Self::Base64 => "base64",
        }
    }
}

impl fmt::Display for BodyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EncoderOptions {
    /// Transfer encoding for body parts.
    pub body_encoding: BodyEncoding,
}

impl EncoderOptions {
    /// Creates the default configuration (quoted-printable bodies).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            body_encoding: BodyEncoding::QuotedPrintable,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub const fn builder() -> EncoderOptionsBuilder {
        EncoderOptionsBuilder::new()
    }
}

/// Builder for encoder configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderOptionsBuilder {
    body_encoding: BodyEncoding,
}

impl EncoderOptionsBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            body_encoding: BodyEncoding::QuotedPrintable,
        }
    }

    /// Sets the body transfer encoding.
    #[must_use]
    pub const fn body_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.body_encoding = encoding;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub const fn build(self) -> EncoderOptions {
        EncoderOptions {
            body_encoding: self.body_encoding,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = EncoderOptions::default();
        assert_eq!(options, EncoderOptions::new());
        assert_eq!(options.body_encoding, BodyEncoding::QuotedPrintable);
    }

    #[test]
    fn test_builder() {
        let options = EncoderOptions::builder()
            .body_encoding(BodyEncoding::Base64)
            .build();
        assert_eq!(options.body_encoding, BodyEncoding::Base64);
    }

    #[test]
    fn test_body_encoding_header_value() {
        assert_eq!(BodyEncoding::QuotedPrintable.to_string(), "quoted-printable");
        assert_eq!(BodyEncoding::Base64.as_str(), "base64");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_options_from_json() {
        let options: EncoderOptions =
            serde_json::from_str(r#"{"body_encoding":"base64"}"#).unwrap();
        assert_eq!(options.body_encoding, BodyEncoding::Base64);

        let options: EncoderOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, EncoderOptions::new());
    }
}
