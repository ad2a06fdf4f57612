//! Remote-source loader with a 24h on-disk cache and a sandboxed evaluation
//! surface (spec §4.1). Used by `pixel::PixelConverter`'s build phase to
//! extract each dialect's `stringId -> numericId` mapping from a dialect
//! author's hosted Lua source.

pub mod fetch;
pub mod isolate;

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use tokio::sync::{watch, Mutex};

pub use fetch::{FetchError, Fetcher, ReqwestFetcher};
pub use isolate::{Isolate, ScriptValue};

const CACHE_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug)]
pub enum LoaderError {
    FetchFailed { source: String },
    CacheCorrupt { path: String },
    IsolateCrashed { reason: String },
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderError::FetchFailed { source } => {
                write!(f, "exhausted primary and fallback sources for {source}")
            }
            LoaderError::CacheCorrupt { path } => write!(f, "cache corrupt: {path}"),
            LoaderError::IsolateCrashed { reason } => write!(f, "isolate crashed: {reason}"),
        }
    }
}

impl std::error::Error for LoaderError {}

pub struct LoaderConfig {
    pub primary_url: String,
    pub fallback_url: Option<String>,
    pub cache_dir: PathBuf,
    pub cache_key: String,
    pub allow_cache: bool,
    pub allow_insecure: bool,
}

/// Loads and caches one remote source, exposing a `ready` signal and an
/// `execute` call that evaluates an expression in the loaded source's scope.
pub struct ScriptLoader {
    isolate: Mutex<Option<Isolate>>,
    ready_rx: watch::Receiver<bool>,
}

impl ScriptLoader {
    /// Starts loading in the background; await `ready()` before calling
    /// `execute`. `fetcher` is injected so tests never touch the network.
    pub async fn start(config: LoaderConfig, fetcher: impl Fetcher + 'static) -> Result<Self, LoaderError> {
        let (ready_tx, ready_rx) = watch::channel(false);

        let source = load_source(&config, &fetcher).await?;
        let isolate = Isolate::new(&source).map_err(|e| LoaderError::IsolateCrashed {
            reason: e.to_string(),
        })?;
        let _ = ready_tx.send(true);

        Ok(Self {
            isolate: Mutex::new(Some(isolate)),
            ready_rx,
        })
    }

    /// Resolves once the loader has a usable isolate (or never, if startup
    /// failed before construction — callers only hold a `ScriptLoader` after
    /// a successful `start`, so this is really "resolves immediately").
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Evaluates `expression` in the loaded source's scope. A throw or
    /// runtime error inside the sandbox becomes a `ScriptValue::Text`, never
    /// an `Err` — only a missing isolate (post-`terminate`) is an error.
    pub async fn execute(&self, expression: &str) -> Result<ScriptValue, LoaderError> {
        let guard = self.isolate.lock().await;
        match guard.as_ref() {
            Some(isolate) => Ok(isolate.execute(expression)),
            None => Err(LoaderError::IsolateCrashed {
                reason: "isolate already terminated".to_string(),
            }),
        }
    }

    pub async fn terminate(&self) {
        let mut guard = self.isolate.lock().await;
        if let Some(isolate) = guard.take() {
            isolate.terminate();
        }
    }
}

async fn load_source(config: &LoaderConfig, fetcher: &impl Fetcher) -> Result<String, LoaderError> {
    if config.allow_cache {
        match read_cache(&config.cache_dir, &config.cache_key) {
            Ok(Some(source)) => return Ok(source),
            Ok(None) => {}
            Err(_) => {
                warn!("cache corrupt for {}, deleting and re-fetching", config.cache_key);
                let _ = std::fs::remove_file(cache_path(&config.cache_dir, &config.cache_key));
            }
        }
    }

    let source = fetch_with_fallback(config, fetcher).await?;

    if config.allow_cache {
        if let Err(err) = write_cache(&config.cache_dir, &config.cache_key, &source) {
            warn!("failed to write script cache for {}: {err}", config.cache_key);
        }
    }

    Ok(source)
}

async fn fetch_with_fallback(config: &LoaderConfig, fetcher: &impl Fetcher) -> Result<String, LoaderError> {
    match fetcher.fetch(&config.primary_url).await {
        Ok(source) => return Ok(source),
        Err(FetchError::InsecureTransport) if config.allow_insecure => {
            if let Some(downgraded) = config.primary_url.strip_prefix("https://") {
                let plain = format!("http://{downgraded}");
                if let Ok(source) = fetcher.fetch(&plain).await {
                    return Ok(source);
                }
            }
        }
        Err(_) => {}
    }

    if let Some(fallback_url) = &config.fallback_url {
        if let Ok(source) = fetcher.fetch(fallback_url).await {
            return Ok(source);
        }
    }

    Err(LoaderError::FetchFailed {
        source: config.primary_url.clone(),
    })
}

/// Ok(Some(source)) = fresh hit. Ok(None) = miss (no file, or stale). Err =
/// the file exists but its timestamp line didn't parse — caller deletes it.
fn read_cache(dir: &Path, key: &str) -> Result<Option<String>, ()> {
    let path = cache_path(dir, key);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return Ok(None),
    };
    let mut lines = contents.splitn(2, '\n');
    let timestamp_line = lines.next().ok_or(())?;
    let source = lines.next().unwrap_or("").to_string();
    let timestamp: u64 = timestamp_line.trim().parse().map_err(|_| ())?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if now.saturating_sub(timestamp) < CACHE_TTL_SECS {
        Ok(Some(source))
    } else {
        Ok(None)
    }
}

fn write_cache(dir: &Path, key: &str, source: &str) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let minified: String = source.split_whitespace().collect::<Vec<_>>().join(" ");
    std::fs::write(cache_path(dir, key), format!("{now}\n{minified}"))
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubFetcher {
        calls: Arc<AtomicUsize>,
        response: Result<String, FetchError>,
    }

    impl Fetcher for StubFetcher {
        fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    #[tokio::test]
    async fn loads_and_executes_expression() {
        let dir = std::env::temp_dir().join(format!("pixsim-test-{}", uuid::Uuid::new_v4()));
        let fetcher = StubFetcher {
            calls: Arc::new(AtomicUsize::new(0)),
            response: Ok("table = { a = 1, b = 2 }".to_string()),
        };
        let config = LoaderConfig {
            primary_url: "https://example.invalid/dialect.lua".to_string(),
            fallback_url: None,
            cache_dir: dir.clone(),
            cache_key: "rps".to_string(),
            allow_cache: true,
            allow_insecure: false,
        };
        let loader = ScriptLoader::start(config, fetcher).await.unwrap();
        loader.ready().await;
        match loader.execute("table").await.unwrap() {
            ScriptValue::Table(t) => assert_eq!(t.get("a"), Some(&1.0)),
            other => panic!("unexpected {other:?}"),
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn falls_back_when_primary_fails() {
        struct FallbackFetcher;
        impl Fetcher for FallbackFetcher {
            fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
                let url = url.to_string();
                Box::pin(async move {
                    if url.contains("fallback") {
                        Ok("x = 1".to_string())
                    } else {
                        Err(FetchError::Http("boom".to_string()))
                    }
                })
            }
        }

        let dir = std::env::temp_dir().join(format!("pixsim-test-{}", uuid::Uuid::new_v4()));
        let config = LoaderConfig {
            primary_url: "https://primary.invalid/dialect.lua".to_string(),
            fallback_url: Some("https://fallback.invalid/dialect.lua".to_string()),
            cache_dir: dir.clone(),
            cache_key: "bps".to_string(),
            allow_cache: false,
            allow_insecure: false,
        };
        let loader = ScriptLoader::start(config, FallbackFetcher).await.unwrap();
        assert_eq!(loader.execute("x").await.unwrap(), ScriptValue::Number(1.0));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn exhausted_sources_is_fetch_failed() {
        struct AlwaysFails;
        impl Fetcher for AlwaysFails {
            fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
                Box::pin(async move { Err(FetchError::Http("down".to_string())) })
            }
        }
        let dir = std::env::temp_dir().join(format!("pixsim-test-{}", uuid::Uuid::new_v4()));
        let config = LoaderConfig {
            primary_url: "https://primary.invalid/dialect.lua".to_string(),
            fallback_url: None,
            cache_dir: dir.clone(),
            cache_key: "psp".to_string(),
            allow_cache: false,
            allow_insecure: false,
        };
        assert!(matches!(
            ScriptLoader::start(config, AlwaysFails).await,
            Err(LoaderError::FetchFailed { .. })
        ));
    }
}
