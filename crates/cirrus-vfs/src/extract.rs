//! Best-effort metadata extraction from streamed file content.
//!
//! An extractor is fed the same bytes as the content hash. When it fails it
//! is dropped and the file is stored without metadata.

use std::io::{self, Write};

use cirrus_types::Metadata;
use serde_json::json;

/// Bytes needed to read the dimensions of the supported formats.
const HEADER_LEN: usize = 24;

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// A streaming metadata extractor.
pub trait MetaExtractor: Write + Send {
    /// Metadata gathered from everything written so far, if any.
    fn finish(self: Box<Self>) -> Option<Metadata>;
}

/// Pick an extractor for a MIME type, if one is supported.
pub fn extractor_for(mime: &str) -> Option<Box<dyn MetaExtractor>> {
    let format = match mime {
        "image/png" => ImageFormat::Png,
        "image/gif" => ImageFormat::Gif,
        _ => return None,
    };
    Some(Box::new(ImageExtractor {
        format,
        header: Vec::with_capacity(HEADER_LEN),
        dimensions: None,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImageFormat {
    Png,
    Gif,
}

/// Reads width and height from an image header.
struct ImageExtractor {
    format: ImageFormat,
    header: Vec<u8>,
    dimensions: Option<(u32, u32)>,
}

impl ImageExtractor {
    fn parse(&self) -> io::Result<(u32, u32)> {
        let h = &self.header;
        match self.format {
            ImageFormat::Png => {
                if &h[..8] != PNG_SIGNATURE || &h[12..16] != b"IHDR" {
                    return Err(malformed("png"));
                }
                let width = u32::from_be_bytes([h[16], h[17], h[18], h[19]]);
                let height = u32::from_be_bytes([h[20], h[21], h[22], h[23]]);
                Ok((width, height))
            }
            ImageFormat::Gif => {
                if &h[..6] != b"GIF87a" && &h[..6] != b"GIF89a" {
                    return Err(malformed("gif"));
                }
                let width = u16::from_le_bytes([h[6], h[7]]) as u32;
                let height = u16::from_le_bytes([h[8], h[9]]) as u32;
                Ok((width, height))
            }
        }
    }
}

fn malformed(format: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed {format} header"))
}

impl Write for ImageExtractor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.dimensions.is_none() {
            let wanted = HEADER_LEN - self.header.len();
            self.header.extend_from_slice(&buf[..wanted.min(buf.len())]);
            if self.header.len() == HEADER_LEN {
                self.dimensions = Some(self.parse()?);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MetaExtractor for ImageExtractor {
    fn finish(self: Box<Self>) -> Option<Metadata> {
        let (width, height) = self.dimensions?;
        let mut meta = Metadata::new();
        meta.insert("width".into(), json!(width));
        meta.insert("height".into(), json!(height));
        Some(meta)
    }
}
