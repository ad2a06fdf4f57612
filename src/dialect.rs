use std::fmt;

/// Short opaque tag identifying a client dialect ("rps", "bps", "psp", ...),
/// plus the reserved "standard" column in the lookup table. The set of
/// configured dialects is fixed at startup (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DialectId(pub String);

impl DialectId {
    pub const STANDARD: &'static str = "standard";

    pub fn standard() -> Self {
        DialectId(Self::STANDARD.to_string())
    }

    pub fn is_standard(&self) -> bool {
        self.0 == Self::STANDARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DialectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DialectId {
    fn from(s: &str) -> Self {
        DialectId(s.to_string())
    }
}

impl From<String> for DialectId {
    fn from(s: String) -> Self {
        DialectId(s)
    }
}

/// Canonical pixel ID sentinel: "unknown/unmapped" (spec §3).
pub const UNKNOWN_PIXEL: u8 = 255;
