use std::collections::HashMap;

use crate::dialect::DialectId;

/// One row of the authoritative lookup table: a canonical numeric ID plus its
/// human-readable string ID in every configured column (spec §6, "Lookup
/// table file").
#[derive(Debug, Clone)]
pub struct LookupRow {
    pub canonical: u8,
    /// column name -> string id, including the "standard" column.
    pub columns: HashMap<String, String>,
}

#[derive(Debug)]
pub struct LookupTable {
    pub rows: Vec<LookupRow>,
}

impl LookupTable {
    pub fn parse(csv: &str) -> Result<Self, LookupParseError> {
        let mut lines = csv.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or(LookupParseError::Empty)?;
        let columns: Vec<&str> = header.split(',').map(|c| c.trim()).collect();
        if columns.is_empty() {
            return Err(LookupParseError::Empty);
        }

        let mut rows = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != columns.len() {
                return Err(LookupParseError::FieldCountMismatch { line: line_no + 2 });
            }
            let canonical: u8 = fields[0]
                .trim()
                .parse()
                .map_err(|_| LookupParseError::BadCanonicalId { line: line_no + 2 })?;

            let mut cols = HashMap::new();
            for (name, value) in columns.iter().skip(1).zip(fields.iter().skip(1)) {
                cols.insert(name.to_string(), value.trim().to_string());
            }
            rows.push(LookupRow { canonical, columns: cols });
        }

        Ok(LookupTable { rows })
    }

    /// The string id for `canonical` in the given dialect column (or
    /// "standard"), if present.
    pub fn string_id(&self, canonical: u8, dialect: &DialectId) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.canonical == canonical)
            .and_then(|r| r.columns.get(dialect.as_str()))
            .map(|s| s.as_str())
    }

    /// The canonical id whose column for `dialect` equals `string_id`, if any.
    pub fn canonical_for_string(&self, dialect: &DialectId, string_id: &str) -> Option<u8> {
        self.rows
            .iter()
            .find(|r| r.columns.get(dialect.as_str()).map(|s| s.as_str()) == Some(string_id))
            .map(|r| r.canonical)
    }
}

#[derive(Debug)]
pub enum LookupParseError {
    Empty,
    FieldCountMismatch { line: usize },
    BadCanonicalId { line: usize },
}

impl std::fmt::Display for LookupParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupParseError::Empty => write!(f, "lookup table is empty"),
            LookupParseError::FieldCountMismatch { line } => {
                write!(f, "line {line}: field count does not match header")
            }
            LookupParseError::BadCanonicalId { line } => {
                write!(f, "line {line}: canonical id is not a valid byte")
            }
        }
    }
}

impl std::error::Error for LookupParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_rows() {
        let csv = "id,rps,bps,standard\n1,stone,stone,stone\n2,sand,snd,sand\n";
        let table = LookupTable::parse(csv).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(
            table.string_id(1, &DialectId::from("rps")),
            Some("stone")
        );
        assert_eq!(
            table.canonical_for_string(&DialectId::from("bps"), "snd"),
            Some(2)
        );
    }

    #[test]
    fn rejects_mismatched_field_count() {
        let csv = "id,rps,standard\n1,stone\n";
        assert!(matches!(
            LookupTable::parse(csv),
            Err(LookupParseError::FieldCountMismatch { line: 2 })
        ));
    }
}
