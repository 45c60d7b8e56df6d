//! Typed match metadata for assembled composite records.
//!
//! The assembler records how each internal record fared against the
//! external reference set: a status, the cascade level that produced
//! the match, and the strength that level implies. Levels weaken down
//! the cascade, so confidence is derived from the rule rather than
//! chosen per record.

use serde::{Deserialize, Serialize};

/// How an internal record fared in the identifier match cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Matched,
    /// Several reference rows share the matching identifier; the
    /// record assembles without enrichment rather than guessing.
    Ambiguous,
    Unmatched,
}

impl MatchStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "MATCHED",
            Self::Ambiguous => "AMBIGUOUS",
            Self::Unmatched => "UNMATCHED",
        }
    }
}

/// Strength label recorded with a match. Absence (an unmatched
/// record) is `Option::None`, not a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

impl MatchConfidence {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// The cascade level that produced a match, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    LoanId,
    Cusip,
    Isin,
    TickerType,
}

impl MatchRule {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoanId => "loan_id",
            Self::Cusip => "cusip",
            Self::Isin => "isin",
            Self::TickerType => "ticker_type",
        }
    }

    /// Strength implied by the level. A private loan id is an exact
    /// shared identifier; every public-identifier level below it is
    /// weaker.
    #[must_use]
    pub const fn confidence(self) -> MatchConfidence {
        match self {
            Self::LoanId => MatchConfidence::High,
            Self::Cusip | Self::Isin => MatchConfidence::Medium,
            Self::TickerType => MatchConfidence::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_weakens_down_the_cascade() {
        assert_eq!(MatchRule::LoanId.confidence(), MatchConfidence::High);
        assert_eq!(MatchRule::Cusip.confidence(), MatchConfidence::Medium);
        assert_eq!(MatchRule::Isin.confidence(), MatchConfidence::Medium);
        assert_eq!(MatchRule::TickerType.confidence(), MatchConfidence::Low);
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&MatchStatus::Ambiguous).unwrap();
        assert_eq!(json, "\"AMBIGUOUS\"");
    }
}
