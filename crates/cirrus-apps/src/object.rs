//! Bundle installation into an object store container.
//!
//! Files are staged as gzipped objects under `tmp-<random>/`, then moved one
//! by one under `<slug>/<version>/`. The zero-byte object `<slug>/<version>`
//! is written last and is the only proof that an install is complete.
//!
//! Moves are individually durable but the commit as a whole is not atomic.
//! Promotion therefore runs under a per-version lock object,
//! `.locks/<slug>/<version>`, created with `if_none_match`. A crash
//! mid-commit leaves promoted objects without a marker; the next installer
//! that takes the lock removes them. A lock older than the copier's lock TTL
//! belongs to a crashed installer and is broken.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cirrus_backend::{Headers, ObjectStoreClient, ObjectStoreError, PutOptions};
use tracing::{debug, info, warn};

use crate::copier::{
    gunzip, gzip_with_type, staging_name, validate_file_name, validate_target, Copier, CopierState,
    FileInfo,
};
use crate::error::{InstallError, InstallResult};

/// Header naming the encoding of the stored bytes.
pub const CONTENT_ENCODING_HEADER: &str = "content-encoding";

/// Header holding the uncompressed length, in decimal.
pub const ORIGINAL_LENGTH_HEADER: &str = "original-content-length";

/// Header of a lock object: acquisition time in Unix milliseconds.
pub const LOCK_ACQUIRED_HEADER: &str = "lock-acquired-ms";

/// Namespace of the per-version lock objects.
pub const LOCK_PREFIX: &str = ".locks/";

/// Age after which a lock is considered abandoned.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10 * 60);

pub struct ObjectStoreCopier {
    client: Arc<dyn ObjectStoreClient>,
    container: String,
    app_obj: String,
    tmp_obj: String,
    state: CopierState,
    lock_ttl: Duration,
}

impl ObjectStoreCopier {
    pub fn new(client: Arc<dyn ObjectStoreClient>, container: impl Into<String>) -> Self {
        Self {
            client,
            container: container.into(),
            app_obj: String::new(),
            tmp_obj: String::new(),
            state: CopierState::Unstarted,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Override how long a lock may be held before others break it.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Staging prefix of the current install (`tmp-<random>/`), empty before start.
    pub fn staging_prefix(&self) -> &str {
        &self.tmp_obj
    }

    fn require_started(&self, op: &'static str) -> InstallResult<()> {
        if self.state != CopierState::Started {
            return Err(InstallError::NotStarted { op });
        }
        Ok(())
    }

    fn lock_name(&self) -> String {
        format!("{LOCK_PREFIX}{}", self.app_obj)
    }

    fn marker_exists(&self) -> InstallResult<bool> {
        match self.client.head_object(&self.container, &self.app_obj) {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::ObjectNotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the version lock. Returns `false` while a live installer holds it.
    fn acquire_lock(&self) -> InstallResult<bool> {
        let lock = self.lock_name();
        for _ in 0..2 {
            let mut headers = Headers::new();
            headers.insert(
                LOCK_ACQUIRED_HEADER.into(),
                Utc::now().timestamp_millis().to_string(),
            );
            let options = PutOptions {
                content_type: None,
                headers,
                if_none_match: true,
            };
            match self.client.put_object(&self.container, &lock, Vec::new(), &options) {
                Ok(()) => return Ok(true),
                Err(ObjectStoreError::PreconditionFailed { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            if !self.lock_is_stale(&lock)? {
                return Ok(false);
            }
            warn!(container = %self.container, lock = %lock, "breaking abandoned install lock");
            match self.client.delete_object(&self.container, &lock) {
                Ok(()) | Err(ObjectStoreError::ObjectNotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    fn lock_is_stale(&self, lock: &str) -> InstallResult<bool> {
        let info = match self.client.head_object(&self.container, lock) {
            Ok(info) => info,
            Err(ObjectStoreError::ObjectNotFound { .. }) => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let acquired = info
            .headers
            .get(LOCK_ACQUIRED_HEADER)
            .and_then(|v| v.parse::<i64>().ok());
        let Some(acquired) = acquired else {
            return Ok(true);
        };
        let age = Utc::now().timestamp_millis().saturating_sub(acquired);
        let ttl = i64::try_from(self.lock_ttl.as_millis()).unwrap_or(i64::MAX);
        Ok(age >= ttl)
    }

    fn release_lock(&self) {
        let lock = self.lock_name();
        match self.client.delete_object(&self.container, &lock) {
            Ok(()) | Err(ObjectStoreError::ObjectNotFound { .. }) => {}
            Err(e) => warn!(lock = %lock, error = %e, "failed to release install lock"),
        }
    }

    /// Remove objects promoted by an interrupted commit of this version.
    /// Callers hold the version lock.
    fn reclaim_stale(&self) -> InstallResult<()> {
        let stale = self
            .client
            .list_names(&self.container, &format!("{}/", self.app_obj))?;
        if !stale.is_empty() {
            warn!(
                container = %self.container,
                app = %self.app_obj,
                count = stale.len(),
                "removing objects of an unfinished install"
            );
            self.client.bulk_delete(&self.container, &stale)?;
        }
        Ok(())
    }

    /// Move every staged object under the final name, then write the marker.
    /// Callers hold the version lock.
    fn promote(&mut self) -> InstallResult<()> {
        if self.marker_exists()? {
            if let Err(e) = self.abort() {
                warn!(staging = %self.tmp_obj, error = %e, "discarding staged files");
            }
            self.state = CopierState::Exists;
            info!(app = %self.app_obj, "version committed by another job");
            return Ok(());
        }
        let staged = self.client.list_names(&self.container, &self.tmp_obj)?;
        let total = staged.len();
        if let Err(e) = self.reclaim_stale() {
            return Err(self.fail_commit(&[], total, e.to_string()));
        }
        let mut promoted = Vec::with_capacity(total);
        for src in &staged {
            let dst = format!("{}/{}", self.app_obj, &src[self.tmp_obj.len()..]);
            if let Err(e) = self.client.move_object(&self.container, src, &dst) {
                return Err(self.fail_commit(&promoted, total, e.to_string()));
            }
            promoted.push(dst);
        }
        let marker = PutOptions::default();
        if let Err(e) = self
            .client
            .put_object(&self.container, &self.app_obj, Vec::new(), &marker)
        {
            return Err(self.fail_commit(&promoted, total, e.to_string()));
        }
        self.state = CopierState::Committed;
        info!(container = %self.container, app = %self.app_obj, files = total, "install committed");
        Ok(())
    }

    /// Undo a partial promotion, discard staging, and report the failure.
    fn fail_commit(&mut self, promoted: &[String], total: usize, reason: String) -> InstallError {
        if !promoted.is_empty() {
            if let Err(e) = self.client.bulk_delete(&self.container, promoted) {
                warn!(app = %self.app_obj, error = %e, "failed to remove promoted objects");
            }
        }
        if let Err(e) = self.abort() {
            warn!(staging = %self.tmp_obj, error = %e, "abort after failed commit");
        }
        InstallError::CommitFailed {
            promoted: promoted.len(),
            total,
            reason,
        }
    }
}

impl std::fmt::Debug for ObjectStoreCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreCopier")
            .field("container", &self.container)
            .field("app", &self.app_obj)
            .field("state", &self.state)
            .finish()
    }
}

impl Copier for ObjectStoreCopier {
    fn state(&self) -> CopierState {
        self.state
    }

    fn start(&mut self, slug: &str, version: &str) -> InstallResult<bool> {
        validate_target(slug, version)?;
        self.app_obj = format!("{slug}/{version}");
        match self.client.head_object(&self.container, &self.app_obj) {
            Ok(_) => {
                self.state = CopierState::Exists;
                return Ok(true);
            }
            Err(ObjectStoreError::ObjectNotFound { .. }) => {}
            Err(ObjectStoreError::ContainerNotFound(_)) => {
                debug!(container = %self.container, "creating container");
                self.client.create_container(&self.container)?;
            }
            Err(e) => return Err(e.into()),
        }
        if self.acquire_lock()? {
            let reclaimed = self.reclaim_stale();
            self.release_lock();
            reclaimed?;
        } else {
            debug!(app = %self.app_obj, "version locked by another installer, nothing reclaimed");
        }
        self.tmp_obj = format!("{}/", staging_name());
        self.state = CopierState::Started;
        debug!(app = %self.app_obj, staging = %self.tmp_obj, "install started");
        Ok(false)
    }

    fn copy(&mut self, file: &FileInfo, src: &mut dyn Read) -> InstallResult<()> {
        self.require_started("copy")?;
        let name = validate_file_name(&file.name)?;
        let (content_type, data, length) = gzip_with_type(&name, src)?;
        let mut headers = Headers::new();
        headers.insert(CONTENT_ENCODING_HEADER.into(), "gzip".into());
        headers.insert(ORIGINAL_LENGTH_HEADER.into(), length.to_string());
        let options = PutOptions {
            content_type: Some(content_type),
            headers,
            if_none_match: false,
        };
        let obj = format!("{}{name}", self.tmp_obj);
        debug!(object = %obj, length, stored = data.len(), "staged");
        self.client.put_object(&self.container, &obj, data, &options)?;
        Ok(())
    }

    fn commit(&mut self) -> InstallResult<()> {
        self.require_started("commit")?;
        if !self.acquire_lock()? {
            if let Err(e) = self.abort() {
                warn!(staging = %self.tmp_obj, error = %e, "abort after lost commit lock");
            }
            return Err(InstallError::InProgress {
                app: self.app_obj.clone(),
            });
        }
        let promoted = self.promote();
        self.release_lock();
        promoted
    }

    fn abort(&mut self) -> InstallResult<()> {
        if self.tmp_obj.is_empty() {
            return Ok(());
        }
        let staged = self.client.list_names(&self.container, &self.tmp_obj)?;
        if !staged.is_empty() {
            self.client.bulk_delete(&self.container, &staged)?;
        }
        if self.state == CopierState::Started {
            self.state = CopierState::Aborted;
        }
        debug!(staging = %self.tmp_obj, removed = staged.len(), "install aborted");
        Ok(())
    }

    fn read_file(&self, slug: &str, version: &str, name: &str) -> InstallResult<Vec<u8>> {
        validate_target(slug, version)?;
        let name = validate_file_name(name)?;
        let not_installed = || InstallError::NotInstalled {
            slug: slug.to_string(),
            version: version.to_string(),
        };
        match self.client.head_object(&self.container, &format!("{slug}/{version}")) {
            Ok(_) => {}
            Err(ObjectStoreError::ObjectNotFound { .. } | ObjectStoreError::ContainerNotFound(_)) => {
                return Err(not_installed())
            }
            Err(e) => return Err(e.into()),
        }
        let (info, data) = self
            .client
            .get_object(&self.container, &format!("{slug}/{version}/{name}"))?;
        let content = match info.headers.get(CONTENT_ENCODING_HEADER).map(String::as_str) {
            Some("gzip") => gunzip(&name, &data)?,
            _ => data,
        };
        if let Some(expected) = info.headers.get(ORIGINAL_LENGTH_HEADER) {
            if expected.parse::<u64>().ok() != Some(content.len() as u64) {
                return Err(InstallError::Corrupt {
                    name,
                    reason: format!("expected {expected} bytes, got {}", content.len()),
                });
            }
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use cirrus_backend::{InMemoryObjectStore, ObjectInfo, ObjectStoreResult};

    use super::*;

    const APPS: &str = "apps";

    fn store() -> Arc<InMemoryObjectStore> {
        Arc::new(InMemoryObjectStore::new())
    }

    fn copy(copier: &mut dyn Copier, name: &str, data: &[u8]) {
        copier
            .copy(&FileInfo::new(name, data.len() as u64), &mut Cursor::new(data.to_vec()))
            .unwrap();
    }

    fn icon() -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend((0..492u32).map(|i| (i % 13) as u8));
        data
    }

    #[test]
    fn weather_install_scenario() {
        let store = store();
        let manifest = b"{\"v\":\"1\"}\n".to_vec();
        assert_eq!(manifest.len(), 10);
        let icon = icon();
        assert_eq!(icon.len(), 500);

        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        assert!(!copier.start("weather", "1.0.0").unwrap());
        copy(&mut copier, "manifest.json", &manifest);
        copy(&mut copier, "icon.png", &icon);
        copier.commit().unwrap();
        assert_eq!(copier.state(), CopierState::Committed);

        let mut again = ObjectStoreCopier::new(store.clone(), APPS);
        assert!(again.start("weather", "1.0.0").unwrap());
        assert_eq!(again.state(), CopierState::Exists);

        assert_eq!(again.read_file("weather", "1.0.0", "manifest.json").unwrap(), manifest);
        assert_eq!(again.read_file("weather", "1.0.0", "icon.png").unwrap(), icon);
        assert_eq!(store.head_object(APPS, "weather/1.0.0").unwrap().size, 0);
    }

    #[test]
    fn staged_objects_carry_encoding_headers() {
        let store = store();
        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        copier.start("weather", "1.0.0").unwrap();
        copy(&mut copier, "manifest.json", b"{}");
        copy(&mut copier, "img/icon", &icon());

        let staged = format!("{}manifest.json", copier.staging_prefix());
        let info = store.head_object(APPS, &staged).unwrap();
        assert_eq!(info.content_type, "application/json");
        assert_eq!(info.headers[CONTENT_ENCODING_HEADER], "gzip");
        assert_eq!(info.headers[ORIGINAL_LENGTH_HEADER], "2");

        let sniffed = format!("{}img/icon", copier.staging_prefix());
        assert_eq!(store.head_object(APPS, &sniffed).unwrap().content_type, "image/png");
    }

    #[test]
    fn repeated_start_leaves_storage_unchanged() {
        let store = store();
        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        copier.start("weather", "1.0.0").unwrap();
        copy(&mut copier, "a.txt", b"a");
        copier.commit().unwrap();
        let before = store.list_names(APPS, "").unwrap();

        for _ in 0..2 {
            let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
            assert!(copier.start("weather", "1.0.0").unwrap());
            assert_eq!(store.list_names(APPS, "").unwrap(), before);
        }
    }

    #[test]
    fn abort_removes_all_staged_objects() {
        let store = store();
        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        copier.start("weather", "1.0.0").unwrap();
        copy(&mut copier, "a.txt", b"a");
        copy(&mut copier, "dir/b.txt", b"b");
        let prefix = copier.staging_prefix().to_string();

        copier.abort().unwrap();
        assert_eq!(copier.state(), CopierState::Aborted);
        assert!(store.list_names(APPS, &prefix).unwrap().is_empty());
        copier.abort().unwrap();
        assert!(store.is_empty(APPS));
    }

    #[test]
    fn copy_and_commit_before_start_are_precondition_errors() {
        let mut copier = ObjectStoreCopier::new(store(), APPS);
        let err = copier
            .copy(&FileInfo::new("a", 1), &mut Cursor::new(vec![1]))
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(copier.commit().unwrap_err().is_precondition());
        copier.abort().unwrap();
    }

    #[test]
    fn copy_after_commit_is_rejected() {
        let mut copier = ObjectStoreCopier::new(store(), APPS);
        copier.start("weather", "1.0.0").unwrap();
        copier.commit().unwrap();
        let err = copier
            .copy(&FileInfo::new("late", 1), &mut Cursor::new(vec![1]))
            .unwrap_err();
        assert!(matches!(err, InstallError::NotStarted { op: "copy" }));
    }

    #[test]
    fn interrupted_promotion_is_reclaimed_on_next_start() {
        let store = store();
        store.create_container(APPS).unwrap();
        store
            .put_object(APPS, "weather/1.0.0/stale.js", vec![1, 2], &PutOptions::default())
            .unwrap();
        store
            .put_object(APPS, "weather/1.0.1/other.js", vec![3], &PutOptions::default())
            .unwrap();

        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        assert!(!copier.start("weather", "1.0.0").unwrap());
        assert!(store.head_object(APPS, "weather/1.0.0/stale.js").is_err());
        assert!(store.head_object(APPS, "weather/1.0.1/other.js").is_ok());
    }

    #[test]
    fn reading_an_uncommitted_version_fails() {
        let store = store();
        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        copier.start("weather", "2.0.0").unwrap();
        copy(&mut copier, "a.txt", b"a");
        assert!(matches!(
            copier.read_file("weather", "2.0.0", "a.txt"),
            Err(InstallError::NotInstalled { .. })
        ));
    }

    /// Delegates to an in-memory store but fails the nth move.
    struct FlakyMoves {
        inner: InMemoryObjectStore,
        moves: AtomicUsize,
        fail_at: usize,
    }

    impl ObjectStoreClient for FlakyMoves {
        fn container_exists(&self, c: &str) -> ObjectStoreResult<bool> {
            self.inner.container_exists(c)
        }
        fn create_container(&self, c: &str) -> ObjectStoreResult<()> {
            self.inner.create_container(c)
        }
        fn head_object(&self, c: &str, n: &str) -> ObjectStoreResult<ObjectInfo> {
            self.inner.head_object(c, n)
        }
        fn get_object(&self, c: &str, n: &str) -> ObjectStoreResult<(ObjectInfo, Vec<u8>)> {
            self.inner.get_object(c, n)
        }
        fn put_object(&self, c: &str, n: &str, d: Vec<u8>, o: &PutOptions) -> ObjectStoreResult<()> {
            self.inner.put_object(c, n, d, o)
        }
        fn set_object_headers(&self, c: &str, n: &str, h: Headers) -> ObjectStoreResult<()> {
            self.inner.set_object_headers(c, n, h)
        }
        fn move_object(&self, c: &str, from: &str, to: &str) -> ObjectStoreResult<()> {
            if self.moves.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(ObjectStoreError::Transport("connection reset".into()));
            }
            self.inner.move_object(c, from, to)
        }
        fn delete_object(&self, c: &str, n: &str) -> ObjectStoreResult<()> {
            self.inner.delete_object(c, n)
        }
        fn bulk_delete(&self, c: &str, names: &[String]) -> ObjectStoreResult<usize> {
            self.inner.bulk_delete(c, names)
        }
        fn list_names(&self, c: &str, prefix: &str) -> ObjectStoreResult<Vec<String>> {
            self.inner.list_names(c, prefix)
        }
    }

    #[test]
    fn failed_move_leaves_nothing_under_final_name() {
        let flaky = Arc::new(FlakyMoves {
            inner: InMemoryObjectStore::new(),
            moves: AtomicUsize::new(0),
            fail_at: 2,
        });
        let mut copier = ObjectStoreCopier::new(flaky.clone(), APPS);
        copier.start("weather", "1.0.0").unwrap();
        for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
            copy(&mut copier, name, name.as_bytes());
        }

        let err = copier.commit().unwrap_err();
        assert!(matches!(
            err,
            InstallError::CommitFailed {
                promoted: 2,
                total: 4,
                ..
            }
        ));
        assert_eq!(copier.state(), CopierState::Aborted);
        assert!(flaky.list_names(APPS, "weather/").unwrap().is_empty());
        assert!(flaky.inner.is_empty(APPS));

        let mut retry = ObjectStoreCopier::new(flaky.clone(), APPS);
        assert!(!retry.start("weather", "1.0.0").unwrap());
    }

    /// Delegates to an in-memory store and runs a callback on the first move.
    struct OnFirstMove {
        inner: Arc<InMemoryObjectStore>,
        hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl OnFirstMove {
        fn new(inner: Arc<InMemoryObjectStore>, hook: impl FnOnce() + Send + 'static) -> Self {
            Self {
                inner,
                hook: Mutex::new(Some(Box::new(hook))),
            }
        }
    }

    impl ObjectStoreClient for OnFirstMove {
        fn container_exists(&self, c: &str) -> ObjectStoreResult<bool> {
            self.inner.container_exists(c)
        }
        fn create_container(&self, c: &str) -> ObjectStoreResult<()> {
            self.inner.create_container(c)
        }
        fn head_object(&self, c: &str, n: &str) -> ObjectStoreResult<ObjectInfo> {
            self.inner.head_object(c, n)
        }
        fn get_object(&self, c: &str, n: &str) -> ObjectStoreResult<(ObjectInfo, Vec<u8>)> {
            self.inner.get_object(c, n)
        }
        fn put_object(&self, c: &str, n: &str, d: Vec<u8>, o: &PutOptions) -> ObjectStoreResult<()> {
            self.inner.put_object(c, n, d, o)
        }
        fn set_object_headers(&self, c: &str, n: &str, h: Headers) -> ObjectStoreResult<()> {
            self.inner.set_object_headers(c, n, h)
        }
        fn move_object(&self, c: &str, from: &str, to: &str) -> ObjectStoreResult<()> {
            let hook = self.hook.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.move_object(c, from, to)
        }
        fn delete_object(&self, c: &str, n: &str) -> ObjectStoreResult<()> {
            self.inner.delete_object(c, n)
        }
        fn bulk_delete(&self, c: &str, names: &[String]) -> ObjectStoreResult<usize> {
            self.inner.bulk_delete(c, names)
        }
        fn list_names(&self, c: &str, prefix: &str) -> ObjectStoreResult<Vec<String>> {
            self.inner.list_names(c, prefix)
        }
    }

    #[test]
    fn start_during_promotion_keeps_promoted_objects() {
        let inner = store();
        let late: Arc<Mutex<Option<ObjectStoreCopier>>> = Arc::default();
        let hook = {
            let inner = inner.clone();
            let late = late.clone();
            move || {
                let mut second = ObjectStoreCopier::new(inner, APPS);
                assert!(!second.start("weather", "1.0.0").unwrap());
                *late.lock().unwrap() = Some(second);
            }
        };
        let client = Arc::new(OnFirstMove::new(inner.clone(), hook));

        let mut first = ObjectStoreCopier::new(client, APPS);
        first.start("weather", "1.0.0").unwrap();
        copy(&mut first, "a.txt", b"alpha");
        copy(&mut first, "b.txt", b"beta");
        first.commit().unwrap();
        assert_eq!(first.state(), CopierState::Committed);
        assert_eq!(first.read_file("weather", "1.0.0", "a.txt").unwrap(), b"alpha");
        assert_eq!(first.read_file("weather", "1.0.0", "b.txt").unwrap(), b"beta");

        let mut second = late.lock().unwrap().take().unwrap();
        copy(&mut second, "a.txt", b"other");
        second.commit().unwrap();
        assert_eq!(second.state(), CopierState::Exists);
        assert!(inner.list_names(APPS, second.staging_prefix()).unwrap().is_empty());
        assert_eq!(second.read_file("weather", "1.0.0", "a.txt").unwrap(), b"alpha");
        assert!(inner.list_names(APPS, LOCK_PREFIX).unwrap().is_empty());
    }

    #[test]
    fn commit_during_promotion_reports_in_progress() {
        let inner = store();
        let mut second = ObjectStoreCopier::new(inner.clone(), APPS);
        second.start("weather", "1.0.0").unwrap();
        copy(&mut second, "a.txt", b"other");
        let staging = second.staging_prefix().to_string();

        let outcome: Arc<Mutex<Option<InstallResult<()>>>> = Arc::default();
        let hook = {
            let outcome = outcome.clone();
            move || {
                let result = second.commit();
                assert_eq!(second.state(), CopierState::Aborted);
                *outcome.lock().unwrap() = Some(result);
            }
        };
        let client = Arc::new(OnFirstMove::new(inner.clone(), hook));

        let mut first = ObjectStoreCopier::new(client, APPS);
        first.start("weather", "1.0.0").unwrap();
        copy(&mut first, "a.txt", b"alpha");
        first.commit().unwrap();

        let result = outcome.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(InstallError::InProgress { ref app }) if app == "weather/1.0.0"));
        assert!(inner.list_names(APPS, &staging).unwrap().is_empty());
        assert_eq!(first.read_file("weather", "1.0.0", "a.txt").unwrap(), b"alpha");
    }

    fn plant_lock(store: &InMemoryObjectStore, acquired_ms: i64) {
        store.create_container(APPS).unwrap();
        let mut headers = Headers::new();
        headers.insert(LOCK_ACQUIRED_HEADER.into(), acquired_ms.to_string());
        let options = PutOptions {
            content_type: None,
            headers,
            if_none_match: true,
        };
        store
            .put_object(APPS, ".locks/weather/1.0.0", Vec::new(), &options)
            .unwrap();
        store
            .put_object(APPS, "weather/1.0.0/stale.js", vec![1], &PutOptions::default())
            .unwrap();
    }

    #[test]
    fn abandoned_lock_is_broken_and_stale_objects_reclaimed() {
        let store = store();
        plant_lock(&store, 0);

        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        assert!(!copier.start("weather", "1.0.0").unwrap());
        assert!(store.head_object(APPS, "weather/1.0.0/stale.js").is_err());
        assert!(store.head_object(APPS, ".locks/weather/1.0.0").is_err());
    }

    #[test]
    fn live_lock_blocks_reclaim_and_commit() {
        let store = store();
        plant_lock(&store, Utc::now().timestamp_millis());

        let mut copier = ObjectStoreCopier::new(store.clone(), APPS);
        assert!(!copier.start("weather", "1.0.0").unwrap());
        assert!(store.head_object(APPS, "weather/1.0.0/stale.js").is_ok());
        copy(&mut copier, "a.txt", b"a");
        assert!(matches!(copier.commit(), Err(InstallError::InProgress { .. })));
        assert!(store.head_object(APPS, "weather/1.0.0").is_err());

        let mut impatient =
            ObjectStoreCopier::new(store.clone(), APPS).with_lock_ttl(Duration::ZERO);
        impatient.start("weather", "1.0.0").unwrap();
        assert!(store.head_object(APPS, "weather/1.0.0/stale.js").is_err());
        copy(&mut impatient, "a.txt", b"a");
        impatient.commit().unwrap();
        assert_eq!(impatient.read_file("weather", "1.0.0", "a.txt").unwrap(), b"a");
    }
}
