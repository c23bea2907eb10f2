use crate::Compression;
use crate::error::{Error, ErrorKind};
use flate2::read::GzDecoder;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
use std::{path::Path, str::FromStr};

pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gz" | "gzip" | "tgz" => Ok(Compression::Gzip),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}
impl From<&[u8]> for Compression {
    fn from(value: &[u8]) -> Self {
        Compression::from_magic_bytes(value)
    }
}
impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl Compression {
    /// Detect compression from a file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "gz" | "tgz" => Compression::Gzip,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// Detect compression format from magic bytes.
    ///
    /// Returns `None` variant if no magic bytes match or if the input
    /// is too short to detect any format.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.starts_with(&GZIP_MAGIC) {
            return Compression::Gzip;
        }
        Compression::None
    }

    /// Short name for display and configuration.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
        }
    }

    /// Wrap a reader with the appropriate decompression layer.
    ///
    /// ```
    /// use std::io::Read;
    /// use depot_archive::Compression;
    ///
    /// let mut reader = Compression::None.wrap_reader(&b"plain"[..]);
    /// let mut out = String::new();
    /// reader.read_to_string(&mut out).unwrap();
    /// assert_eq!(out, "plain");
    /// ```
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
        }
    }
}
