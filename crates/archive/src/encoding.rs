//! Upload transport encodings.
//!
//! Some publishing clients send the collection tarball as-is, older ones
//! base64-encode it inside the multipart body. [`UploadFormat::Auto`] sniffs
//! the gzip magic bytes to tell the two apart.

use crate::Compression;
use crate::construct::GZIP_MAGIC;
use crate::error::{Error, ErrorKind, Result};
use crate::peekable::PeekableReader;
use base64::engine::{GeneralPurpose, general_purpose};
use base64::read::DecoderReader;
use serde::Deserialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
use std::str::FromStr;

static BASE64: GeneralPurpose = general_purpose::STANDARD;

/// How an uploaded archive is encoded on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadFormat {
    /// Look for the gzip header; anything else is treated as base64.
    #[default]
    Auto,
    /// The upload is the archive itself.
    Raw,
    /// The upload is the base64-encoded archive.
    Base64,
}

impl FromStr for UploadFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "raw" => Ok(Self::Raw),
            "base64" => Ok(Self::Base64),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}
impl Display for UploadFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Raw => "raw",
            Self::Base64 => "base64",
        })
    }
}

impl UploadFormat {
    /// Wrap `reader` so that it yields the decoded archive bytes.
    ///
    /// Returns the concrete format that was applied ([`Auto`](Self::Auto) is
    /// resolved to either [`Raw`](Self::Raw) or [`Base64`](Self::Base64)).
    ///
    /// ```
    /// use std::io::Read;
    /// use depot_archive::UploadFormat;
    ///
    /// let (format, mut reader) = UploadFormat::Auto.decode(&b"aGVsbG8=\n"[..]).unwrap();
    /// let mut out = String::new();
    /// reader.read_to_string(&mut out).unwrap();
    /// assert_eq!(format, UploadFormat::Base64);
    /// assert_eq!(out, "hello");
    /// ```
    pub fn decode<'a, R: Read + 'a>(self, reader: R) -> Result<(UploadFormat, Box<dyn Read + 'a>)> {
        match self {
            Self::Raw => Ok((Self::Raw, Box::new(reader))),
            Self::Base64 => Ok((Self::Base64, base64_reader(reader))),
            Self::Auto => {
                let mut peekable = PeekableReader::new(reader);
                let head = peekable.peek(GZIP_MAGIC.len())?;
                match Compression::from_magic_bytes(head) {
                    Compression::Gzip => Ok((Self::Raw, Box::new(peekable.into_reader()))),
                    Compression::None => {
                        tracing::debug!("Upload is not gzip; assuming base64 transport encoding");
                        Ok((Self::Base64, base64_reader(peekable.into_reader())))
                    },
                }
            },
        }
    }
}

fn base64_reader<'a, R: Read + 'a>(reader: R) -> Box<dyn Read + 'a> {
    Box::new(DecoderReader::new(SkipWhitespace { inner: reader }, &BASE64))
}

/// Drops ASCII whitespace (line wrapping) from a base64 stream.
struct SkipWhitespace<R> {
    inner: R,
}
impl<R: Read> Read for SkipWhitespace<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let read = self.inner.read(buf)?;
            if read == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..read {
                if !buf[i].is_ascii_whitespace() {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn decode_all(format: UploadFormat, input: &[u8]) -> (UploadFormat, Vec<u8>) {
        let (resolved, mut reader) = format.decode(input).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        (resolved, out)
    }

    #[rstest]
    #[case("auto", UploadFormat::Auto)]
    #[case("RAW", UploadFormat::Raw)]
    #[case("base64", UploadFormat::Base64)]
    fn test_from_str(#[case] input: &str, #[case] expected: UploadFormat) {
        assert_eq!(input.parse::<UploadFormat>().unwrap(), expected);
    }

    #[test]
    fn test_auto_detects_gzip() {
        let gzip = [0x1F, 0x8B, 0x08, 0x00, 0x01];
        assert_eq!(decode_all(UploadFormat::Auto, &gzip), (UploadFormat::Raw, gzip.to_vec()));
    }

    #[test]
    fn test_auto_falls_back_to_base64() {
        // base64 of [0x1F, 0x8B, 0x08], wrapped across lines.
        let (format, out) = decode_all(UploadFormat::Auto, b"H4sI\r\n");
        assert_eq!(format, UploadFormat::Base64);
        assert_eq!(out, vec![0x1F, 0x8B, 0x08]);
    }

    #[test]
    fn test_raw_is_untouched() {
        assert_eq!(decode_all(UploadFormat::Raw, b"H4sI"), (UploadFormat::Raw, b"H4sI".to_vec()));
    }

    #[test]
    fn test_invalid_base64_fails_on_read() {
        let (_, mut reader) = UploadFormat::Base64.decode(&b"!!!not base64!!!"[..]).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}
