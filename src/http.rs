//! Plain-function handlers backing the read-only routes named in spec §6:
//! status, map listing/lookup, and compiled controller scripts. The HTTP
//! wrapper itself (an actual framework, CORS, rate-limit middleware) is an
//! explicit Non-goal, so these are ordinary async functions a thin adapter
//! layer would call from whatever router the deployment wires up — the same
//! "logic lives outside the transport" split `net::connection::Connection`
//! uses for the websocket side.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::asm;
use crate::map::{EncodedMap, MapError};
use crate::net::broker::Broker;
use crate::wire::GameMode;

#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    NotFound(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(reason) => write!(f, "400: {reason}"),
            HttpError::NotFound(reason) => write!(f, "404: {reason}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<MapError> for HttpError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::NotFound { .. } => HttpError::NotFound(err.to_string()),
            MapError::Malformed { .. } => HttpError::BadRequest(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub active: bool,
    pub starting: bool,
    pub crashed: bool,
    pub time: u64,
}

/// `GET /pixsim-api/status`.
pub fn status(broker: &Broker) -> StatusBody {
    let snapshot = broker.status();
    StatusBody {
        active: snapshot.active,
        starting: snapshot.starting,
        crashed: snapshot.crashed,
        time: snapshot.time_ms,
    }
}

/// `GET /pixsim-api/maps/list/<gameMode>`.
pub fn list_maps(broker: &Broker, game_mode: &str) -> Result<Vec<String>, HttpError> {
    let mode = parse_game_mode(game_mode)?;
    let ids = broker.map_catalog.list(mode);
    if ids.is_empty() {
        return Err(HttpError::NotFound(format!("no maps for {game_mode}")));
    }
    Ok(ids)
}

/// `GET /pixsim-api/maps/<gameMode>/<id>?format=<dialect>`.
pub fn get_map(broker: &Broker, game_mode: &str, id: &str, format: Option<&str>) -> Result<EncodedMap, HttpError> {
    let mode = parse_game_mode(game_mode)?;
    let format = format.ok_or_else(|| HttpError::BadRequest("missing format".to_string()))?;
    if format.is_empty() {
        return Err(HttpError::BadRequest("missing format".to_string()));
    }
    Ok(broker.map_catalog.get(mode, id, &format.into())?)
}

/// `GET /pixsim-api/controllers/<path>?format=<dialect>`. Reads the
/// PixSimAssembly source at `controllers_root/<path>` and compiles it for
/// the requested dialect, `400` on a missing/invalid query and `404` if the
/// source file or the dialect doesn't exist.
pub async fn get_controller(broker: Arc<Broker>, path: &str, format: Option<&str>) -> Result<String, HttpError> {
    let format = format.ok_or_else(|| HttpError::BadRequest("missing format".to_string()))?;
    if format.is_empty() || path.is_empty() || path.contains("..") {
        return Err(HttpError::BadRequest("invalid path or format".to_string()));
    }
    let dialect = crate::dialect::DialectId::from(format);
    if !broker.pixel_converter.formats().contains(&dialect) {
        return Err(HttpError::NotFound(format!("unknown dialect: {format}")));
    }

    let full_path = Path::new(&broker.config.controllers_root).join(path);
    let source = tokio::fs::read_to_string(&full_path)
        .await
        .map_err(|_| HttpError::NotFound(format!("no such controller: {path}")))?;

    let dialects = [dialect.clone()];
    let compiled = asm::compile(&source, &dialects, broker.pixel_converter.lookup())
        .map_err(|err| HttpError::BadRequest(err.to_string()))?;
    compiled
        .get(&dialect)
        .cloned()
        .ok_or_else(|| HttpError::NotFound(format!("unknown dialect: {format}")))
}

fn parse_game_mode(raw: &str) -> Result<GameMode, HttpError> {
    match raw {
        "pixelcrash" => Ok(GameMode::Pixelcrash),
        "resourcerace" => Ok(GameMode::Resourcerace),
        other => Err(HttpError::BadRequest(format!("unknown game mode: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::map::MapCatalog;
    use crate::pixel::{LookupTable, PixelConverter};
    use crate::script::{FetchError, Fetcher};

    struct NeverFetcher;
    impl Fetcher for NeverFetcher {
        fn fetch<'a>(&'a self, _url: &'a str) -> futures::future::BoxFuture<'a, Result<String, FetchError>> {
            Box::pin(async { Err(FetchError::Http("no network in tests".to_string())) })
        }
    }

    async fn test_broker() -> Arc<Broker> {
        let lookup = LookupTable::parse("standard,rps\n1,one\n").unwrap();
        let converter = PixelConverter::build(lookup, &[], "/tmp/pixsim-http-test-cache", || Box::new(NeverFetcher)).await;
        let catalog = MapCatalog::scan(Path::new("/tmp/pixsim-http-test-maps-missing"), converter.lookup(), &[]);
        Broker::new(RelayConfig::default(), converter, catalog)
    }

    #[tokio::test]
    async fn status_reports_inactive_before_run() {
        let broker = test_broker().await;
        let body = status(&broker);
        assert!(!body.active);
        assert!(!body.crashed);
    }

    #[tokio::test]
    async fn list_maps_404s_when_catalog_is_empty() {
        let broker = test_broker().await;
        let err = list_maps(&broker, "pixelcrash").unwrap_err();
        assert!(matches!(err, HttpError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_map_400s_on_unknown_game_mode() {
        let broker = test_broker().await;
        let err = get_map(&broker, "not-a-mode", "foo", Some("rps")).unwrap_err();
        assert!(matches!(err, HttpError::BadRequest(_)));
    }

    #[tokio::test]
    async fn get_controller_404s_on_missing_file() {
        let broker = test_broker().await;
        let err = get_controller(broker, "nope.pasm", Some("rps")).await.unwrap_err();
        assert!(matches!(err, HttpError::NotFound(_)));
    }
}
