//! Response body decompression for the one-shot forwarding path.
//!
//! Stateless: a buffer plus a `Content-Encoding` token in, plain bytes out.
//! Callers treat every failure as non-fatal and relay the original bytes.
use std::{fmt, io::Read, str::FromStr};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use thiserror::Error;

const BROTLI_BUFFER_SIZE: usize = 4096;

/// Encodings the gateway advertises upstream and knows how to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    /// `Accept-Encoding` value sent with every forwarded request.
    pub const ACCEPT_ENCODING: &'static str = "gzip, deflate, br";

    /// Recognise a `Content-Encoding` token (case-insensitive).
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "br" => Some(Self::Brotli),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentEncoding {
    type Err = DecompressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| DecompressError::Unsupported(s.to_string()))
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecompressError {
    #[error("Unsupported content encoding: {0}")]
    Unsupported(String),

    #[error("Failed to decode {encoding} body: {source}")]
    Corrupt {
        encoding: ContentEncoding,
        #[source]
        source: std::io::Error,
    },
}

/// Decompress `buffer` according to the `Content-Encoding` token `encoding`.
///
/// Unknown encodings are not an error: the input is returned unchanged, as
/// is an empty input for any encoding.
pub fn decompress(buffer: &[u8], encoding: &str) -> Result<Vec<u8>, DecompressError> {
    let Some(encoding) = ContentEncoding::parse(encoding) else {
        tracing::debug!(encoding, "Unsupported encoding, passing body through");
        return Ok(buffer.to_vec());
    };
    decompress_with(buffer, encoding)
}

/// Decompress `buffer` with a known encoding.
pub fn decompress_with(
    buffer: &[u8],
    encoding: ContentEncoding,
) -> Result<Vec<u8>, DecompressError> {
    if buffer.is_empty() {
        return Ok(Vec::new());
    }

    let result = match encoding {
        ContentEncoding::Gzip => read_all(GzDecoder::new(buffer)),
        // HTTP "deflate" is nominally zlib-wrapped, but plenty of servers send raw DEFLATE.
        ContentEncoding::Deflate => {
            read_all(ZlibDecoder::new(buffer)).or_else(|_| read_all(DeflateDecoder::new(buffer)))
        }
        ContentEncoding::Brotli => read_all(brotli::Decompressor::new(buffer, BROTLI_BUFFER_SIZE)),
    };

    result.map_err(|source| DecompressError::Corrupt { encoding, source })
}

fn read_all(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{
        Compression,
        write::{DeflateEncoder, GzEncoder, ZlibEncoder},
    };

    use super::*;

    const PAYLOAD: &[u8] = br#"{"url":"wss://api.sgroup.qq.com/websocket"}"#;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_parse_encoding_tokens() {
        assert_eq!(ContentEncoding::parse("GZIP"), Some(ContentEncoding::Gzip));
        assert_eq!(
            ContentEncoding::parse(" x-gzip "),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            ContentEncoding::parse("deflate"),
            Some(ContentEncoding::Deflate)
        );
        assert_eq!(ContentEncoding::parse("br"), Some(ContentEncoding::Brotli));
        assert_eq!(ContentEncoding::parse("zstd"), None);
        assert!("identity".parse::<ContentEncoding>().is_err());
    }

    #[test]
    fn test_gzip_empty_body_is_empty() {
        let out = decompress(&[], "gzip").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_gzip_round_trip() {
        assert_eq!(decompress(&gzip(PAYLOAD), "gzip").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_deflate_accepts_zlib_and_raw_streams() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(PAYLOAD).unwrap();
        let zlib = zlib.finish().unwrap();
        assert_eq!(decompress(&zlib, "deflate").unwrap(), PAYLOAD);

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(PAYLOAD).unwrap();
        let raw = raw.finish().unwrap();
        assert_eq!(decompress(&raw, "deflate").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_brotli_body() {
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(PAYLOAD).unwrap();
        }
        assert_eq!(decompress(&compressed, "br").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_unknown_encoding_passes_through() {
        assert_eq!(decompress(PAYLOAD, "compress").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let err = decompress(b"definitely not gzip", "gzip").unwrap_err();
        assert!(matches!(
            err,
            DecompressError::Corrupt {
                encoding: ContentEncoding::Gzip,
                ..
            }
        ));
    }
}
