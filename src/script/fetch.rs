use futures::future::BoxFuture;

#[derive(Debug, Clone)]
pub enum FetchError {
    Http(String),
    InsecureTransport,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http(msg) => write!(f, "http error: {msg}"),
            FetchError::InsecureTransport => write!(f, "transport security failure"),
        }
    }
}

/// Fetches one remote text file. Boxed so `ScriptLoader` can swap in a fake
/// fetcher under test without touching the network (the real implementation
/// is the only place network I/O happens, per spec §4.1's isolation contract
/// on `execute` — the *fetch* itself is allowed to hit the network, only the
/// loaded source's evaluation must not).
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for ReqwestFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() && url.starts_with("https://") {
                        FetchError::InsecureTransport
                    } else {
                        FetchError::Http(e.to_string())
                    }
                })?;
            resp.text().await.map_err(|e| FetchError::Http(e.to_string()))
        })
    }
}
