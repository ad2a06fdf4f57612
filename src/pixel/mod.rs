//! Canonical <-> dialect pixel ID translation (spec §4.2). Build phase
//! combines the authoritative CSV lookup table with each dialect's hosted
//! extractor script (via `script::ScriptLoader`) to produce constant-time
//! translation tables; runtime operations never allocate except `convertGrid`,
//! which allocates exactly one output buffer.

pub mod lookup;

use std::collections::HashMap;

use log::warn;

use crate::config::DialectConfig;
use crate::dialect::{DialectId, UNKNOWN_PIXEL};
use crate::script::{Fetcher, LoaderConfig, LoaderError, ScriptLoader, ScriptValue};

pub use lookup::{LookupParseError, LookupTable};

/// `from[n]` maps this dialect's numeric pixel ID `n` to the canonical ID.
/// `to[c]` maps a canonical ID `c` to this dialect's numeric ID. Both default
/// to `UNKNOWN_PIXEL` for unmapped entries.
struct DialectTable {
    from: [u8; 256],
    to: [u8; 256],
}

impl DialectTable {
    fn empty() -> Self {
        Self {
            from: [UNKNOWN_PIXEL; 256],
            to: [UNKNOWN_PIXEL; 256],
        }
    }
}

pub struct PixelConverter {
    lookup: LookupTable,
    tables: HashMap<DialectId, DialectTable>,
}

impl PixelConverter {
    /// Runs the build phase: for each configured dialect, starts its
    /// `ScriptLoader`, awaits readiness, evaluates the extractor expression,
    /// and intersects the result with `lookup` to populate that dialect's
    /// translation tables. A dialect whose loader fails open question §9:
    /// its table stays empty rather than aborting the whole build — every
    /// translation for it yields `UNKNOWN_PIXEL` and it is surfaced by the
    /// map catalog, not by crashing the converter.
    pub async fn build(
        lookup: LookupTable,
        dialects: &[DialectConfig],
        cache_dir: &str,
        fetcher_factory: impl Fn() -> Box<dyn Fetcher>,
    ) -> Self {
        let mut tables = HashMap::new();

        for dialect_cfg in dialects {
            let dialect = DialectId::from(dialect_cfg.id.as_str());
            let table = build_dialect_table(&lookup, dialect_cfg, cache_dir, fetcher_factory()).await;
            match table {
                Ok(table) => {
                    tables.insert(dialect, table);
                }
                Err(err) => {
                    warn!("dialect {} extractor unavailable, table stays empty: {err}", dialect_cfg.id);
                    tables.insert(dialect, DialectTable::empty());
                }
            }
        }

        Self { lookup, tables }
    }

    pub fn lookup(&self) -> &LookupTable {
        &self.lookup
    }

    pub fn convert_single(&self, n: u8, from: &DialectId, to: &DialectId) -> u8 {
        if from == to {
            return n;
        }
        let (Some(from_table), Some(to_table)) = (self.tables.get(from), self.tables.get(to)) else {
            return UNKNOWN_PIXEL;
        };
        let canonical = from_table.from[n as usize];
        if canonical == UNKNOWN_PIXEL {
            return UNKNOWN_PIXEL;
        }
        to_table.to[canonical as usize]
    }

    /// Walks the packed grid format (spec §6): a stream of frames, each a
    /// header byte followed by up to 8 cells. Bit `k` (MSB first) set means
    /// the cell is a lone pixel-ID byte; clear means pixel-ID byte plus one
    /// unrelated byte. Only pixel-ID bytes are translated; everything else,
    /// including a trailing partial frame, is copied unchanged.
    pub fn convert_grid(&self, grid: &[u8], from: &DialectId, to: &DialectId) -> Vec<u8> {
        if from == to {
            return grid.to_vec();
        }
        let mut out = Vec::with_capacity(grid.len());
        let mut pos = 0;
        while pos < grid.len() {
            let header = grid[pos];
            out.push(header);
            pos += 1;
            for bit in 0..8u8 {
                if pos >= grid.len() {
                    break;
                }
                let mask = 0x80u8 >> bit;
                let pixel = self.convert_single(grid[pos], from, to);
                out.push(pixel);
                pos += 1;
                if mask & header == 0 {
                    if pos >= grid.len() {
                        break;
                    }
                    out.push(grid[pos]);
                    pos += 1;
                }
            }
        }
        out
    }

    pub fn convert_str(&self, id: &str, from: &DialectId, to: &DialectId) -> String {
        if from == to {
            return id.to_string();
        }
        let Some(canonical) = self.lookup.canonical_for_string(from, id) else {
            return "null".to_string();
        };
        match self.lookup.string_id(canonical, to) {
            Some(s) => s.to_string(),
            None => "null".to_string(),
        }
    }

    pub fn formats(&self) -> Vec<DialectId> {
        self.tables.keys().filter(|d| !d.is_standard()).cloned().collect()
    }
}

async fn build_dialect_table(
    lookup: &LookupTable,
    dialect_cfg: &DialectConfig,
    cache_dir: &str,
    fetcher: Box<dyn Fetcher>,
) -> Result<DialectTable, LoaderError> {
    let config = LoaderConfig {
        primary_url: dialect_cfg.lookup_script_url.clone(),
        fallback_url: dialect_cfg.lookup_script_fallback_url.clone(),
        cache_dir: cache_dir.into(),
        cache_key: dialect_cfg.id.clone(),
        allow_cache: true,
        allow_insecure: dialect_cfg.allow_insecure,
    };
    let loader = ScriptLoader::start(config, BoxedFetcher(fetcher)).await?;
    loader.ready().await;
    let extracted = loader.execute(&dialect_cfg.extractor_expr).await?;
    loader.terminate().await;

    let mapping: HashMap<String, f64> = match extracted {
        ScriptValue::Table(t) => t,
        _ => HashMap::new(),
    };

    let dialect = DialectId::from(dialect_cfg.id.as_str());
    let mut table = DialectTable::empty();
    for row in &lookup.rows {
        let Some(string_id) = row.columns.get(dialect.as_str()) else {
            continue;
        };
        let Some(&numeric) = mapping.get(string_id) else {
            continue;
        };
        let numeric = numeric as u8;
        table.from[numeric as usize] = row.canonical;
        table.to[row.canonical as usize] = numeric;
    }
    Ok(table)
}

struct BoxedFetcher(Box<dyn Fetcher>);

impl Fetcher for BoxedFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> futures::future::BoxFuture<'a, Result<String, crate::script::FetchError>> {
        self.0.fetch(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;

    struct StubFetcher(&'static str);
    impl Fetcher for StubFetcher {
        fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<String, crate::script::FetchError>> {
            let body = self.0.to_string();
            Box::pin(async move { Ok(body) })
        }
    }

    fn lookup() -> LookupTable {
        LookupTable::parse("id,rps,bps,standard\n1,stone,stn,stone\n2,sand,snd,sand\n").unwrap()
    }

    fn dialect_cfg(id: &str) -> DialectConfig {
        DialectConfig {
            id: id.to_string(),
            lookup_script_url: "https://example.invalid/x.lua".to_string(),
            lookup_script_fallback_url: None,
            extractor_expr: "map".to_string(),
            allow_insecure: false,
        }
    }

    async fn build_with_rps_table() -> PixelConverter {
        let cfgs = vec![dialect_cfg("rps")];
        let dir = std::env::temp_dir().join(format!("pixsim-pixel-test-{}", uuid::Uuid::new_v4()));
        let dir_str = dir.to_str().unwrap().to_string();
        let converter = PixelConverter::build(lookup(), &cfgs, &dir_str, || {
            Box::new(StubFetcher("map = { stone = 1, sand = 2 }")) as Box<dyn Fetcher>
        })
        .await;
        let _ = std::fs::remove_dir_all(dir);
        converter
    }

    #[tokio::test]
    async fn converts_single_pixel_round_trip() {
        let converter = build_with_rps_table().await;
        let rps = DialectId::from("rps");
        let bps = DialectId::from("bps");
        // bps has no table entry at all -> every translation is UNKNOWN_PIXEL.
        assert_eq!(converter.convert_single(1, &rps, &bps), UNKNOWN_PIXEL);
        assert_eq!(converter.convert_single(1, &rps, &rps), 1);
    }

    #[tokio::test]
    async fn unknown_dialect_yields_sentinel() {
        let converter = build_with_rps_table().await;
        let rps = DialectId::from("rps");
        let ghost = DialectId::from("ghost");
        assert_eq!(converter.convert_single(1, &rps, &ghost), UNKNOWN_PIXEL);
    }

    #[test]
    fn convert_grid_preserves_flag_bytes_and_length() {
        let lookup = lookup();
        let mut rps_table = DialectTable::empty();
        rps_table.from[1] = 1;
        rps_table.to[1] = 1;
        let mut bps_table = DialectTable::empty();
        bps_table.from[9] = 1;
        bps_table.to[1] = 9;
        let mut tables = HashMap::new();
        tables.insert(DialectId::from("rps"), rps_table);
        tables.insert(DialectId::from("bps"), bps_table);
        let converter = PixelConverter { lookup, tables };

        // header 0b1000_0000: bit0 set (lone byte), bits1-7 clear but no data follows.
        let grid = vec![0b1000_0000, 1];
        let out = converter.convert_grid(&grid, &DialectId::from("rps"), &DialectId::from("bps"));
        assert_eq!(out.len(), grid.len());
        assert_eq!(out[0], grid[0]);
        assert_eq!(out[1], 9);
    }
}
