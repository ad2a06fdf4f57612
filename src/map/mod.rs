//! Map file parsing and per-dialect re-encoding (spec §4.3). A map file on
//! disk is a flat `key=value` record; `encoding` holds the dialect-specific
//! run codecs, this module does lookup-table-driven canonicalization and
//! catalog bookkeeping.

pub mod encoding;

use std::collections::HashMap;
use std::path::Path;

use log::warn;

use crate::dialect::DialectId;
use crate::pixel::LookupTable;
use crate::wire::GameMode;
use encoding::RawRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub value: u8,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct CanonicalForm {
    pub data: Vec<Run>,
    pub placeable: [Vec<Run>; 2],
    pub team: Vec<Run>,
}

#[derive(Debug, Clone, Default)]
pub struct EncodedMap {
    pub data: String,
    pub placeable_data: [String; 2],
    pub team_data: String,
    pub rotation_data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MapRecord {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub canonical: CanonicalForm,
    pub per_dialect: HashMap<DialectId, EncodedMap>,
    pub scripts: HashMap<String, String>,
}

#[derive(Debug)]
pub enum MapError {
    NotFound { game_mode: String, id: String },
    Malformed { reason: String },
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::NotFound { game_mode, id } => write!(f, "map {id} not found for {game_mode}"),
            MapError::Malformed { reason } => write!(f, "malformed map file: {reason}"),
        }
    }
}

impl std::error::Error for MapError {}

pub struct MapCatalog {
    maps: HashMap<GameMode, HashMap<String, MapRecord>>,
}

impl MapCatalog {
    /// Scans `root/<gameMode>/*.map`, parsing each file's source dialect into
    /// canonical form and re-encoding into every other configured dialect.
    /// A malformed file is logged and skipped rather than aborting startup.
    pub fn scan(root: &Path, lookup: &LookupTable, dialects: &[DialectId]) -> Self {
        let mut maps: HashMap<GameMode, HashMap<String, MapRecord>> = HashMap::new();

        for mode in [GameMode::Pixelcrash, GameMode::Resourcerace] {
            let dir = root.join(mode_dir_name(mode));
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut records = HashMap::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("map") {
                    continue;
                }
                let id = path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
                match std::fs::read_to_string(&path).map_err(|e| MapError::Malformed { reason: e.to_string() })
                    .and_then(|source| parse_map_file(&id, &source, lookup, dialects))
                {
                    Ok(record) => {
                        records.insert(id, record);
                    }
                    Err(err) => warn!("skipping map {}: {err}", path.display()),
                }
            }
            maps.insert(mode, records);
        }

        Self { maps }
    }

    pub fn list(&self, game_mode: GameMode) -> Vec<String> {
        self.maps
            .get(&game_mode)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has(&self, game_mode: GameMode, id: &str) -> bool {
        self.maps.get(&game_mode).map(|m| m.contains_key(id)).unwrap_or(false)
    }

    pub fn get(&self, game_mode: GameMode, id: &str, format: &DialectId) -> Result<EncodedMap, MapError> {
        let record = self
            .maps
            .get(&game_mode)
            .and_then(|m| m.get(id))
            .ok_or_else(|| MapError::NotFound {
                game_mode: format!("{game_mode:?}"),
                id: id.to_string(),
            })?;
        record
            .per_dialect
            .get(format)
            .cloned()
            .ok_or_else(|| MapError::NotFound {
                game_mode: format!("{game_mode:?}"),
                id: format!("{id} ({format})"),
            })
    }
}

fn mode_dir_name(mode: GameMode) -> &'static str {
    match mode {
        GameMode::Pixelcrash => "pixelcrash",
        GameMode::Resourcerace => "resourcerace",
    }
}

fn parse_record_fields(source: &str) -> HashMap<String, String> {
    source
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn parse_map_file(
    id: &str,
    source: &str,
    lookup: &LookupTable,
    dialects: &[DialectId],
) -> Result<MapRecord, MapError> {
    let fields = parse_record_fields(source);
    let format = fields.get("format").ok_or_else(|| MapError::Malformed {
        reason: "missing format field".to_string(),
    })?;
    let source_dialect = DialectId::from(format.as_str());

    let width: u32 = fields
        .get("width")
        .ok_or_else(|| MapError::Malformed { reason: "missing width".to_string() })?
        .parse()
        .map_err(|_| MapError::Malformed { reason: "bad width".to_string() })?;
    let height: u32 = fields
        .get("height")
        .ok_or_else(|| MapError::Malformed { reason: "missing height".to_string() })?
        .parse()
        .map_err(|_| MapError::Malformed { reason: "bad height".to_string() })?;

    let canonical = match format.as_str() {
        "rps" => parse_rps(&fields, lookup, &source_dialect)?,
        "bps" => parse_bps(&fields, lookup, &source_dialect, width * height)?,
        "psp" => parse_psp(&fields, lookup, &source_dialect)?,
        other => {
            return Err(MapError::Malformed {
                reason: format!("unknown map dialect: {other}"),
            })
        }
    };

    let mut per_dialect = HashMap::new();
    for dialect in dialects {
        let encoded = encode_for_dialect(&canonical, lookup, dialect);
        per_dialect.insert(dialect.clone(), encoded);
    }

    let scripts = fields
        .get("scripts")
        .map(|raw| {
            raw.split(',')
                .filter_map(|pair| pair.split_once(':'))
                .map(|(event, path)| (event.to_string(), path.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Ok(MapRecord {
        id: id.to_string(),
        width,
        height,
        canonical,
        per_dialect,
        scripts,
    })
}

fn canonicalize_runs(raw: &[RawRun], lookup: &LookupTable, dialect: &DialectId) -> Vec<Run> {
    raw.iter()
        .map(|run| Run {
            value: lookup.canonical_for_string(dialect, &run.value).unwrap_or(crate::dialect::UNKNOWN_PIXEL),
            count: run.count,
        })
        .collect()
}

fn raw_value_runs(raw: &[RawRun]) -> Vec<Run> {
    raw.iter()
        .map(|run| Run {
            value: run.value.parse().unwrap_or(0),
            count: run.count,
        })
        .collect()
}

fn parse_rps(
    fields: &HashMap<String, String>,
    lookup: &LookupTable,
    dialect: &DialectId,
) -> Result<CanonicalForm, MapError> {
    let data = encoding::parse_id_count_runs(fields.get("data").map(String::as_str).unwrap_or(""), 16)?;
    let placeable0 = encoding::parse_alternating_bool_runs(
        fields.get("placeableData0").map(String::as_str).unwrap_or(""),
        16,
    )?;
    let placeable1 = encoding::parse_alternating_bool_runs(
        fields.get("placeableData1").map(String::as_str).unwrap_or(""),
        16,
    )?;
    let team = encoding::parse_id_count_runs(fields.get("teamData").map(String::as_str).unwrap_or(""), 16)?;

    Ok(CanonicalForm {
        data: canonicalize_runs(&data, lookup, dialect),
        placeable: [raw_value_runs(&placeable0), raw_value_runs(&placeable1)],
        team: raw_value_runs(&team),
    })
}

fn parse_bps(
    fields: &HashMap<String, String>,
    lookup: &LookupTable,
    dialect: &DialectId,
    total_cells: u32,
) -> Result<CanonicalForm, MapError> {
    let pixel_runs = encoding::parse_id_count_runs(fields.get("data").map(String::as_str).unwrap_or(""), 36)?;
    let rotation_runs =
        encoding::parse_id_count_runs(fields.get("rotationData").map(String::as_str).unwrap_or(""), 36)?;

    let pixel_flat = encoding::expand(&pixel_runs);
    let rotation_flat = encoding::expand(&rotation_runs);
    if pixel_flat.len() as u32 != total_cells || rotation_flat.len() != pixel_flat.len() {
        return Err(MapError::Malformed {
            reason: "bps data/rotationData length mismatch with width*height".to_string(),
        });
    }

    let mut canonical_cells = Vec::with_capacity(pixel_flat.len());
    for (pixel, rotation) in pixel_flat.iter().zip(rotation_flat.iter()) {
        let concat = format!("{pixel}{rotation}");
        canonical_cells.push(lookup.canonical_for_string(dialect, &concat).unwrap_or(crate::dialect::UNKNOWN_PIXEL));
    }
    let data = encoding::compress(&canonical_cells)
        .into_iter()
        .map(|(value, count)| Run { value, count })
        .collect();

    let placeable0 = encoding::parse_id_count_runs(fields.get("placeableData0").map(String::as_str).unwrap_or(""), 36)?;
    let placeable1 = encoding::parse_id_count_runs(fields.get("placeableData1").map(String::as_str).unwrap_or(""), 36)?;
    let team = encoding::parse_id_count_runs(fields.get("teamData").map(String::as_str).unwrap_or(""), 36)?;

    Ok(CanonicalForm {
        data,
        placeable: [raw_value_runs(&placeable0), raw_value_runs(&placeable1)],
        team: raw_value_runs(&team),
    })
}

fn parse_psp(
    fields: &HashMap<String, String>,
    lookup: &LookupTable,
    dialect: &DialectId,
) -> Result<CanonicalForm, MapError> {
    let data = encoding::parse_psp_runs(fields.get("data").map(String::as_str).unwrap_or(""))?;
    Ok(CanonicalForm {
        data: canonicalize_runs(&data, lookup, dialect),
        placeable: [Vec::new(), Vec::new()],
        team: Vec::new(),
    })
}

fn encode_for_dialect(canonical: &CanonicalForm, lookup: &LookupTable, dialect: &DialectId) -> EncodedMap {
    let data_pairs: Vec<(String, u32)> = canonical
        .data
        .iter()
        .map(|run| (dialect_string(lookup, dialect, run.value), run.count))
        .collect();

    match dialect.as_str() {
        "bps" => EncodedMap {
            data: encoding::format_id_count_runs(&data_pairs, 36),
            placeable_data: [
                format_value_runs_id(&canonical.placeable[0], 36),
                format_value_runs_id(&canonical.placeable[1], 36),
            ],
            team_data: format_value_runs_id(&canonical.team, 36),
            rotation_data: None,
        },
        "psp" => EncodedMap {
            data: encoding::format_psp_runs(&data_pairs),
            placeable_data: [String::new(), String::new()],
            team_data: String::new(),
            rotation_data: None,
        },
        _ => EncodedMap {
            data: encoding::format_id_count_runs(&data_pairs, 16),
            placeable_data: [
                encoding::format_alternating_bool_runs(&canonical.placeable[0].iter().map(|r| r.count).collect::<Vec<_>>(), 16),
                encoding::format_alternating_bool_runs(&canonical.placeable[1].iter().map(|r| r.count).collect::<Vec<_>>(), 16),
            ],
            team_data: format_value_runs_id(&canonical.team, 16),
            rotation_data: None,
        },
    }
}

fn dialect_string(lookup: &LookupTable, dialect: &DialectId, canonical: u8) -> String {
    lookup
        .string_id(canonical, dialect)
        .map(|s| s.to_string())
        .unwrap_or_else(|| canonical.to_string())
}

fn format_value_runs_id(runs: &[Run], radix: u32) -> String {
    let pairs: Vec<(String, u32)> = runs.iter().map(|r| (r.value.to_string(), r.count)).collect();
    encoding::format_id_count_runs(&pairs, radix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> LookupTable {
        LookupTable::parse(
            "id,rps,bps,standard\n\
             1,stone,10,stone\n\
             2,sand,21,sand\n",
        )
        .unwrap()
    }

    #[test]
    fn reencodes_bps_map_to_rps() {
        let mut fields = HashMap::new();
        fields.insert("format".to_string(), "bps".to_string());
        fields.insert("width".to_string(), "21".to_string());
        fields.insert("height".to_string(), "1".to_string());
        fields.insert("data".to_string(), "1-a:2-b".to_string());
        fields.insert("rotationData".to_string(), "0-a:1-b".to_string());

        let canonical = parse_bps(&fields, &lookup(), &DialectId::from("bps"), 21).unwrap();
        assert_eq!(canonical.data, vec![Run { value: 1, count: 10 }, Run { value: 2, count: 11 }]);

        let rps = encode_for_dialect(&canonical, &lookup(), &DialectId::from("rps"));
        assert_eq!(rps.data, "stone-a:sand-b");
    }
}
