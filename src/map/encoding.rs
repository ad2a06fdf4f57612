//! Per-dialect run-length codecs for map files (spec §4.3). Each dialect
//! packs `data`/`placeableData`/`teamData`/`rotationData` differently; these
//! functions only handle the textual run encoding — canonical-id lookup
//! happens one level up in `map::MapCatalog`.

use super::MapError;

/// One raw, not-yet-canonicalized run: a dialect-local value (a pixel string
/// id, a 0/1 placeable flag, or a team index) repeated `count` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRun {
    pub value: String,
    pub count: u32,
}

/// `id-count:id-count:…`, count in the given radix. Used by rps `data`/
/// `teamData` (radix 16) and bps `data`/`rotationData`/placeable/team
/// streams (radix 36).
pub fn parse_id_count_runs(s: &str, radix: u32) -> Result<Vec<RawRun>, MapError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(':')
        .map(|segment| {
            let (id, count) = segment
                .rsplit_once('-')
                .ok_or_else(|| MapError::Malformed {
                    reason: format!("bad run segment: {segment}"),
                })?;
            let count = u32::from_str_radix(count, radix).map_err(|_| MapError::Malformed {
                reason: format!("bad run count: {count}"),
            })?;
            Ok(RawRun {
                value: id.to_string(),
                count,
            })
        })
        .collect()
}

pub fn format_id_count_runs(runs: &[(String, u32)], radix: u32) -> String {
    runs.iter()
        .map(|(id, count)| format!("{id}-{}", to_radix(*count, radix)))
        .collect::<Vec<_>>()
        .join(":")
}

/// rps placeable runs: just a colon-separated list of base-16 counts,
/// implicitly alternating boolean value starting at `0`.
pub fn parse_alternating_bool_runs(s: &str, radix: u32) -> Result<Vec<RawRun>, MapError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let mut value = 0u8;
    let mut runs = Vec::new();
    for segment in s.split(':') {
        let count = u32::from_str_radix(segment, radix).map_err(|_| MapError::Malformed {
            reason: format!("bad placeable run count: {segment}"),
        })?;
        runs.push(RawRun {
            value: value.to_string(),
            count,
        });
        value = 1 - value;
    }
    Ok(runs)
}

pub fn format_alternating_bool_runs(counts: &[u32], radix: u32) -> String {
    counts
        .iter()
        .map(|c| to_radix(*c, radix))
        .collect::<Vec<_>>()
        .join(":")
}

/// `id~count|id~count|…`, count base-36. A pixel id may carry a `` `suffix ``
/// which is discarded (spec §4.3, psp dialect).
pub fn parse_psp_runs(s: &str) -> Result<Vec<RawRun>, MapError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split('|')
        .map(|segment| {
            let (id, count) = segment.split_once('~').ok_or_else(|| MapError::Malformed {
                reason: format!("bad psp record: {segment}"),
            })?;
            let id = id.split('`').next().unwrap_or(id);
            let count = u32::from_str_radix(count, 36).map_err(|_| MapError::Malformed {
                reason: format!("bad psp count: {count}"),
            })?;
            Ok(RawRun {
                value: id.to_string(),
                count,
            })
        })
        .collect()
}

pub fn format_psp_runs(runs: &[(String, u32)]) -> String {
    runs.iter()
        .map(|(id, count)| format!("{id}~{}", to_radix(*count, 36)))
        .collect::<Vec<_>>()
        .join("|")
}

/// Expands a run list into its flat per-cell sequence, length `total`.
pub fn expand(runs: &[RawRun]) -> Vec<String> {
    let mut out = Vec::new();
    for run in runs {
        for _ in 0..run.count {
            out.push(run.value.clone());
        }
    }
    out
}

/// Run-length encodes a flat per-cell sequence back into runs.
pub fn compress(cells: &[u8]) -> Vec<(u8, u32)> {
    let mut out: Vec<(u8, u32)> = Vec::new();
    for &cell in cells {
        match out.last_mut() {
            Some((value, count)) if *value == cell => *count += 1,
            _ => out.push((cell, 1)),
        }
    }
    out
}

fn to_radix(mut value: u32, radix: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % radix) as usize]);
        value /= radix;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_count_runs() {
        let runs = parse_id_count_runs("1-a:2-b", 16).unwrap();
        assert_eq!(runs, vec![
            RawRun { value: "1".to_string(), count: 10 },
            RawRun { value: "2".to_string(), count: 11 },
        ]);
    }

    #[test]
    fn expands_and_compresses_round_trip() {
        let runs = vec![
            RawRun { value: "5".to_string(), count: 3 },
            RawRun { value: "9".to_string(), count: 2 },
        ];
        let flat: Vec<u8> = expand(&runs).iter().map(|s| s.parse().unwrap()).collect();
        assert_eq!(flat, vec![5, 5, 5, 9, 9]);
        assert_eq!(compress(&flat), vec![(5, 3), (9, 2)]);
    }

    #[test]
    fn parses_psp_and_strips_backtick_suffix() {
        let runs = parse_psp_runs("3`rot1~a|4~b").unwrap();
        assert_eq!(runs[0].value, "3");
        assert_eq!(runs[0].count, 10);
        assert_eq!(runs[1].value, "4");
        assert_eq!(runs[1].count, 11);
    }
}
