//! Content type detection by file name and by content sniffing.

use std::io::{self, Cursor, Read};

/// Fallback type for content that could not be identified.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Number of leading bytes inspected when sniffing.
pub const SNIFF_LEN: usize = 512;

/// MIME type guessed from a file name's extension.
pub fn mime_by_name(name: &str) -> Option<String> {
    mime_guess::from_path(name).first_raw().map(str::to_string)
}

/// MIME type for a bare extension, with or without the leading dot.
pub fn mime_by_extension(ext: &str) -> Option<String> {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        return None;
    }
    mime_guess::from_ext(ext).first_raw().map(str::to_string)
}

/// Sniff the content type from the head of `src`.
///
/// The inspected bytes are not lost: the returned reader yields the full
/// original stream.
pub fn mime_from_reader<R: Read>(mut src: R) -> io::Result<(Option<String>, io::Chain<Cursor<Vec<u8>>, R>)> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut src).take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    let mime = infer::get(&head).map(|kind| kind.mime_type().to_string());
    Ok((mime, Cursor::new(head).chain(src)))
}

/// Top-level media type of a MIME string (`image/png` → `image`).
pub fn class_of(mime: &str) -> &str {
    mime.split('/').next().unwrap_or("application")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEAD: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    #[test]
    fn extension_lookup() {
        assert_eq!(mime_by_extension(".json").as_deref(), Some("application/json"));
        assert_eq!(mime_by_extension("png").as_deref(), Some("image/png"));
        assert_eq!(mime_by_extension(""), None);
        assert_eq!(mime_by_name("index.html").as_deref(), Some("text/html"));
    }

    #[test]
    fn sniffing_preserves_stream() {
        let mut data = PNG_HEAD.to_vec();
        data.extend(std::iter::repeat(7u8).take(2000));
        let (mime, mut reader) = mime_from_reader(Cursor::new(data.clone())).unwrap();
        assert_eq!(mime.as_deref(), Some("image/png"));
        let mut back = Vec::new();
        reader.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn sniffing_unknown_content() {
        let (mime, _) = mime_from_reader(Cursor::new(b"just some words".to_vec())).unwrap();
        assert!(mime.is_none());
    }

    #[test]
    fn class_is_top_level_type() {
        assert_eq!(class_of("image/png"), "image");
        assert_eq!(class_of("text/plain"), "text");
    }
}
