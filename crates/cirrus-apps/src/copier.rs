//! The staged-install contract shared by every storage variant.

use std::fmt;
use std::io::{self, Read, Write};

use cirrus_types::magic;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::error::{InstallError, InstallResult};

/// Length of the random part of a staging name.
pub const STAGING_RANDOM_LEN: usize = 20;

/// Prefix of every staging namespace.
pub const STAGING_PREFIX: &str = "tmp-";

/// A file of a bundle, named relative to the bundle root (`img/icon.png`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Where a copier is in its lifecycle.
///
/// `Unstarted → Started → {Committed | Aborted}`, or `Unstarted → Exists`
/// when the requested version is already installed. `Started → Exists` when
/// another job commits the same version first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopierState {
    Unstarted,
    Started,
    Committed,
    Aborted,
    Exists,
}

impl fmt::Display for CopierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Started => "started",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
            Self::Exists => "exists",
        };
        f.write_str(s)
    }
}

/// Copies a bundle into storage through a staging namespace, then promotes
/// it under `<slug>/<version>` in one commit.
pub trait Copier: Send {
    fn state(&self) -> CopierState;

    /// Begin installing `slug` at `version`.
    ///
    /// Returns `true`, without touching storage, when that version is
    /// already installed.
    fn start(&mut self, slug: &str, version: &str) -> InstallResult<bool>;

    /// Compress `src` into the staging namespace under `file.name`.
    fn copy(&mut self, file: &FileInfo, src: &mut dyn Read) -> InstallResult<()>;

    /// Promote everything staged. On failure, nothing is left under the
    /// final name and the staging namespace is discarded.
    ///
    /// If another job completed the same version first, the staged files are
    /// discarded and the state becomes [`CopierState::Exists`].
    fn commit(&mut self) -> InstallResult<()>;

    /// Discard the staging namespace. Idempotent.
    fn abort(&mut self) -> InstallResult<()>;

    /// Read back and decompress a file of an installed bundle.
    fn read_file(&self, slug: &str, version: &str, name: &str) -> InstallResult<Vec<u8>>;
}

/// Result of [`install`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    Installed { files: usize },
}

/// Run a whole install: start, copy every file, commit.
///
/// The first failing file aborts the install.
pub fn install<I, R>(
    copier: &mut dyn Copier,
    slug: &str,
    version: &str,
    files: I,
) -> InstallResult<InstallOutcome>
where
    I: IntoIterator<Item = InstallResult<(FileInfo, R)>>,
    R: Read,
{
    if copier.start(slug, version)? {
        info!(slug, version, "already installed");
        return Ok(InstallOutcome::AlreadyInstalled);
    }
    let mut count = 0usize;
    for entry in files {
        let copied = entry.and_then(|(info, mut src)| copier.copy(&info, &mut src));
        if let Err(err) = copied {
            if let Err(e) = copier.abort() {
                warn!(slug, version, error = %e, "abort after failed copy");
            }
            return Err(err);
        }
        count += 1;
    }
    copier.commit()?;
    if copier.state() == CopierState::Exists {
        info!(slug, version, "installed concurrently by another job");
        return Ok(InstallOutcome::AlreadyInstalled);
    }
    info!(slug, version, files = count, "installed");
    Ok(InstallOutcome::Installed { files: count })
}

/// Slug and version are single visible path components.
pub(crate) fn validate_target(slug: &str, version: &str) -> InstallResult<()> {
    for part in [slug, version] {
        if part.is_empty() || part.starts_with('.') || part.contains('/') {
            return Err(InstallError::InvalidTarget(format!("{slug}/{version}")));
        }
    }
    Ok(())
}

/// Check a bundle-relative file name and return it normalized.
pub(crate) fn validate_file_name(name: &str) -> InstallResult<String> {
    let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if name.starts_with('/') || parts.is_empty() || parts.iter().any(|p| *p == "..") {
        return Err(InstallError::InvalidFileName(name.to_string()));
    }
    Ok(parts.join("/"))
}

pub(crate) fn staging_name() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STAGING_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{STAGING_PREFIX}{random}")
}

/// Content type by extension, then by sniffing, then the generic binary type.
/// Returns the type, the gzipped content, and the uncompressed length.
pub(crate) fn gzip_with_type(name: &str, src: &mut dyn Read) -> InstallResult<(String, Vec<u8>, u64)> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    let (mime, copied) = match magic::mime_by_name(name) {
        Some(mime) => (mime, io::copy(src, &mut encoder)?),
        None => {
            let (sniffed, mut stream) = magic::mime_from_reader(src)?;
            let copied = io::copy(&mut stream, &mut encoder)?;
            (sniffed.unwrap_or_else(|| magic::OCTET_STREAM.to_string()), copied)
        }
    };
    Ok((mime, encoder.finish()?, copied))
}

/// Stream `src` through a gzip encoder into `dst`; returns `dst` and the
/// uncompressed length.
pub(crate) fn gzip_into<W: Write>(src: &mut dyn Read, dst: W) -> InstallResult<(W, u64)> {
    let mut encoder = GzEncoder::new(dst, Compression::best());
    let copied = io::copy(src, &mut encoder)?;
    Ok((encoder.finish()?, copied))
}

pub(crate) fn gunzip(name: &str, data: &[u8]) -> InstallResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| InstallError::Corrupt {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use cirrus_backend::InMemoryBackend;

    use super::*;
    use crate::fs::FsCopier;

    #[test]
    fn file_names_are_normalized() {
        assert_eq!(validate_file_name("img/./icon.png").unwrap(), "img/icon.png");
        assert_eq!(validate_file_name("a//b").unwrap(), "a/b");
        assert!(validate_file_name("../escape").is_err());
        assert!(validate_file_name("a/../../b").is_err());
        assert!(validate_file_name("/abs").is_err());
        assert!(validate_file_name("").is_err());
    }

    #[test]
    fn targets_are_single_components() {
        assert!(validate_target("weather", "1.0.0").is_ok());
        assert!(validate_target("", "1.0.0").is_err());
        assert!(validate_target("weather", "..").is_err());
        assert!(validate_target("a/b", "1").is_err());
        assert!(validate_target(".locks", "1").is_err());
    }

    #[test]
    fn staging_names_are_unique() {
        let a = staging_name();
        assert!(a.starts_with(STAGING_PREFIX));
        assert_eq!(a.len(), STAGING_PREFIX.len() + STAGING_RANDOM_LEN);
        assert_ne!(a, staging_name());
    }

    #[test]
    fn content_type_falls_back_to_sniffing_then_binary() {
        let (mime, gz, len) =
            gzip_with_type("manifest.json", &mut Cursor::new(b"{}".to_vec())).unwrap();
        assert_eq!(mime, "application/json");
        assert_eq!(len, 2);
        assert_eq!(gunzip("manifest.json", &gz).unwrap(), b"{}");

        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
        let (mime, _, _) = gzip_with_type("icon", &mut Cursor::new(png.to_vec())).unwrap();
        assert_eq!(mime, "image/png");

        let (mime, _, _) = gzip_with_type("blob", &mut Cursor::new(vec![0u8; 4])).unwrap();
        assert_eq!(mime, magic::OCTET_STREAM);
    }

    #[test]
    fn gunzip_rejects_garbage() {
        assert!(matches!(
            gunzip("x", b"not gzip"),
            Err(InstallError::Corrupt { .. })
        ));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"))
        }
    }

    #[test]
    fn install_runs_the_whole_protocol() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut copier = FsCopier::new(backend.clone());
        let files = vec![
            Ok((FileInfo::new("manifest.json", 2), Cursor::new(b"{}".to_vec()))),
            Ok((FileInfo::new("index.html", 5), Cursor::new(b"<p/>\n".to_vec()))),
        ];
        let outcome = install(&mut copier, "notes", "2.1.0", files).unwrap();
        assert_eq!(outcome, InstallOutcome::Installed { files: 2 });
        assert_eq!(copier.read_file("notes", "2.1.0", "index.html").unwrap(), b"<p/>\n");

        let mut again = FsCopier::new(backend);
        let nothing: Vec<InstallResult<(FileInfo, Cursor<Vec<u8>>)>> = Vec::new();
        let outcome = install(&mut again, "notes", "2.1.0", nothing).unwrap();
        assert_eq!(outcome, InstallOutcome::AlreadyInstalled);
    }

    #[test]
    fn install_aborts_on_failing_file() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut copier = FsCopier::new(backend.clone());
        let files: Vec<InstallResult<(FileInfo, Box<dyn Read>)>> = vec![
            Ok((FileInfo::new("ok.txt", 2), Box::new(Cursor::new(b"ok".to_vec())))),
            Ok((FileInfo::new("bad.txt", 9), Box::new(FailingReader))),
        ];
        let err = install(&mut copier, "notes", "1.0.0", files).unwrap_err();
        assert!(matches!(err, InstallError::Io(_)));
        assert_eq!(copier.state(), CopierState::Aborted);
        assert_eq!(backend.paths(), vec!["/", "/notes"]);
    }
}
