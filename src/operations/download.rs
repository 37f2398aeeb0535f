//! HTTP downloads with a URL-keyed local cache.
//!
//! A cached copy is only reused when the server publishes a `<url>.sha256`
//! sidecar that matches it. Any verification failure falls back to a single
//! fresh download.
//!
//! Bodies are streamed into a temporary file next to their destination and
//! renamed into place once complete, so readers never observe a partial
//! file. Cache refreshes are serialized per URL.

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const CHECKSUM_SUFFIX: &str = ".sha256";

pub struct Downloader {
    client: reqwest::Client,
    cache_dir: Option<PathBuf>,
    /// One lock per cache entry
    entries: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl Downloader {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// GET `url` and decode the JSON body
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::download_failed(url, e))?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::download_failed(url, e))
    }

    /// Stream `url` into `target`, returning the SHA-256 of the body
    pub async fn download_to(&self, url: &str, target: &Path) -> Result<String> {
        let (staged, actual) = self.stage(url, target).await?;
        persist(staged, target)?;
        Ok(actual)
    }

    /// Stream `url` into a temporary file beside `target`.
    ///
    /// The file is removed when the returned handle is dropped unpersisted.
    async fn stage(&self, url: &str, target: &Path) -> Result<(NamedTempFile, String)> {
        debug!("Downloading {} to {}", url, target.display());
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::download_failed(url, e))?;

        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::create_dir_all(parent).await?;
        let staged = NamedTempFile::new_in(parent)?;
        let mut file = tokio::fs::File::from_std(staged.as_file().try_clone()?);
        let mut hasher = Sha256::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::download_failed(url, e))?
        {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok((staged, hex(&hasher.finalize())))
    }

    fn entry_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(entries.entry(path.to_path_buf()).or_default())
    }

    /// Where `url` is cached, if caching is enabled
    pub fn cache_path(&self, url: &str) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let key = hex(&Sha256::digest(url.as_bytes()));
        Some(dir.join(&key[..32]).join(file_name(url)))
    }

    /// Return a verified cached copy of `url`, downloading when needed
    pub async fn fetch_cached(&self, url: &str) -> Result<PathBuf> {
        let path = self
            .cache_path(url)
            .ok_or_else(|| Error::download_failed(url, "download cache is disabled"))?;
        let lock = self.entry_lock(&path);
        let _entry = lock.lock().await;

        let mut expected = None;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            expected = self.remote_checksum(url).await;
            match (&expected, hash_file(&path).await) {
                (Some(expected), Ok(actual)) if *expected == actual => {
                    debug!("Cache hit for {}", url);
                    return Ok(path);
                }
                (Some(expected), Ok(actual)) => {
                    warn!("Cache expected {} but was actually {}", expected, actual);
                }
                (None, _) => debug!("No checksum published for {}, refreshing", url),
                (_, Err(e)) => warn!("Cached file {} is not readable: {}", path.display(), e),
            }
        }

        info!("Downloading new version and caching to {}", path.display());
        let (staged, actual) = self.stage(url, &path).await?;

        if expected.is_none() {
            expected = self.remote_checksum(url).await;
        }
        if let Some(expected) = expected {
            if expected != actual {
                return Err(Error::download_failed(
                    url,
                    format!("checksum mismatch: expected {}, got {}", expected, actual),
                ));
            }
        }
        persist(staged, &path)?;
        Ok(path)
    }

    async fn remote_checksum(&self, url: &str) -> Option<String> {
        let checksum_url = format!("{}{}", url, CHECKSUM_SUFFIX);
        let response = self
            .client
            .get(&checksum_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .ok()?;
        let body = response.text().await.ok()?;
        let digest = body.split_whitespace().next()?.to_ascii_lowercase();
        (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())).then_some(digest)
    }
}

/// Last path segment of `url`, without query or fragment
pub fn file_name(url: &str) -> String {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => url,
    };
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// Atomically move a staged download over `target`
fn persist(staged: NamedTempFile, target: &Path) -> Result<()> {
    // temp files are created owner-only
    staged
        .as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    staged.persist(target).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone)]
    struct Fixture {
        body: Arc<Mutex<Vec<u8>>>,
        checksum: Arc<Mutex<Option<String>>>,
        downloads: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new(body: &[u8], publish_checksum: bool) -> Self {
            let checksum = publish_checksum.then(|| hex(&Sha256::digest(body)));
            Self {
                body: Arc::new(Mutex::new(body.to_vec())),
                checksum: Arc::new(Mutex::new(checksum)),
                downloads: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn router(&self) -> Router {
            Router::new()
                .route(
                    "/files/server.jar",
                    get(|State(f): State<Fixture>| async move {
                        f.downloads.fetch_add(1, Ordering::SeqCst);
                        let body = f.body.lock().unwrap().clone();
                        body
                    }),
                )
                .route(
                    "/files/server.jar.sha256",
                    get(|State(f): State<Fixture>| async move {
                        let checksum = f.checksum.lock().unwrap().clone();
                        match checksum {
                            Some(sum) => Ok(format!("{}  server.jar\n", sum)),
                            None => Err(StatusCode::NOT_FOUND),
                        }
                    }),
                )
                .with_state(self.clone())
        }

        fn downloads(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_cache_hit_when_checksum_matches() {
        let fixture = Fixture::new(b"jar bytes", true);
        let base = test_server::serve(fixture.router()).await;
        let cache = TempDir::new().unwrap();
        let downloader = Downloader::new(Some(cache.path().to_path_buf()));
        let url = format!("{}/files/server.jar", base);

        let first = downloader.fetch_cached(&url).await.unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), b"jar bytes");
        assert_eq!(first.file_name().unwrap(), "server.jar");

        let second = downloader.fetch_cached(&url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fixture.downloads(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_redownloaded() {
        let fixture = Fixture::new(b"jar bytes", true);
        let base = test_server::serve(fixture.router()).await;
        let cache = TempDir::new().unwrap();
        let downloader = Downloader::new(Some(cache.path().to_path_buf()));
        let url = format!("{}/files/server.jar", base);

        let path = downloader.fetch_cached(&url).await.unwrap();
        std::fs::write(&path, b"tampered").unwrap();

        downloader.fetch_cached(&url).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"jar bytes");
        assert_eq!(fixture.downloads(), 2);
    }

    #[tokio::test]
    async fn test_missing_checksum_forces_download() {
        let fixture = Fixture::new(b"jar bytes", false);
        let base = test_server::serve(fixture.router()).await;
        let cache = TempDir::new().unwrap();
        let downloader = Downloader::new(Some(cache.path().to_path_buf()));
        let url = format!("{}/files/server.jar", base);

        downloader.fetch_cached(&url).await.unwrap();
        downloader.fetch_cached(&url).await.unwrap();
        assert_eq!(fixture.downloads(), 2);
    }

    #[tokio::test]
    async fn test_mismatched_download_fails_once() {
        let fixture = Fixture::new(b"jar bytes", true);
        *fixture.checksum.lock().unwrap() = Some("0".repeat(64));
        let base = test_server::serve(fixture.router()).await;
        let cache = TempDir::new().unwrap();
        let downloader = Downloader::new(Some(cache.path().to_path_buf()));
        let url = format!("{}/files/server.jar", base);

        let result = downloader.fetch_cached(&url).await;
        assert!(matches!(result, Err(Error::DownloadFailed { .. })));
        assert_eq!(fixture.downloads(), 1);
        assert!(!downloader.cache_path(&url).unwrap().exists());
    }

    #[tokio::test]
    async fn test_concurrent_fetches_never_see_partial_file() {
        use axum::body::{Body, Bytes};
        use futures::StreamExt;
        use std::convert::Infallible;
        use std::time::Duration;

        let requests = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/files/slow.jar",
                get(|State(requests): State<Arc<AtomicUsize>>| async move {
                    let fill = if requests.fetch_add(1, Ordering::SeqCst) == 0 {
                        b'a'
                    } else {
                        b'b'
                    };
                    let chunks = futures::stream::iter(0..10).then(move |_| async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Infallible>(Bytes::from(vec![fill; 100]))
                    });
                    Body::from_stream(chunks)
                }),
            )
            .with_state(Arc::clone(&requests));
        let base = test_server::serve(router).await;
        let cache = TempDir::new().unwrap();
        let downloader = Arc::new(Downloader::new(Some(cache.path().to_path_buf())));
        let url = format!("{}/files/slow.jar", base);

        let fetch = |delay: u64| {
            let downloader = Arc::clone(&downloader);
            let url = url.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let path = downloader.fetch_cached(&url).await.unwrap();
                tokio::fs::read(path).await.unwrap()
            })
        };
        let first = fetch(0);
        let second = fetch(200);

        for body in [first.await.unwrap(), second.await.unwrap()] {
            assert_eq!(body.len(), 1000);
            assert!(body.iter().all(|b| *b == body[0]));
        }
        assert_eq!(requests.load(Ordering::SeqCst), 2);

        let leftovers = std::fs::read_dir(downloader.cache_path(&url).unwrap().parent().unwrap())
            .unwrap()
            .count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_http_error_is_download_failure() {
        let base = test_server::serve(Router::new()).await;
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(None);
        let result = downloader
            .download_to(&format!("{}/nothing", base), &dir.path().join("x"))
            .await;
        assert!(matches!(result, Err(Error::DownloadFailed { .. })));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("https://x.io/a/server.jar?sig=1"), "server.jar");
        assert_eq!(file_name("https://x.io/"), "download");
    }
}
