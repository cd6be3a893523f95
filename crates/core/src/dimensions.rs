//! Typed dimension-combination model.
//!
//! The durable store keeps every dimension slot populated (empty-string
//! sentinel for "not part of this grouping"), so a read for a given
//! combination must translate into explicit per-slot predicates. Supported
//! combinations form a closed enum; anything else is rejected at parse time
//! instead of silently over-filtering.

use serde::{Deserialize, Serialize};

use crate::Error;

/// A categorical grouping/filter axis of the analytics data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Date,
    Query,
    Page,
    Country,
    Device,
}

impl Dimension {
    /// Wire name as sent to the upstream API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Date => "date",
            Dimension::Query => "query",
            Dimension::Page => "page",
            Dimension::Country => "country",
            Dimension::Device => "device",
        }
    }
}

impl std::str::FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(Dimension::Date),
            "query" => Ok(Dimension::Query),
            "page" => Ok(Dimension::Page),
            "country" => Ok(Dimension::Country),
            "device" => Ok(Dimension::Device),
            other => Err(Error::InvalidInput(format!("unknown dimension: {other}"))),
        }
    }
}

/// Predicate for one dimension slot of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRule {
    /// Slot must hold the empty sentinel (dimension not in the grouping).
    Empty,
    /// Slot must hold a real value (dimension is in the grouping).
    NonEmpty,
}

/// Closed set of supported dimension combinations.
///
/// The date range of a read is always an implicit filter, so `Date` never
/// appears alone; combinations are named by the slots they group on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionSet {
    /// Daily per-page rows.
    DatePage,
    /// Query x page totals (no date breakdown), folded in memory from
    /// stored rows so date-stamped fragments merge.
    QueryPage,
    /// Daily per-query rows.
    DateQuery,
    /// Daily query x page rows.
    DateQueryPage,
    /// Per-page totals, aggregated in memory from (date, page) rows.
    Page,
}

impl DimensionSet {
    /// Map a requested dimension list onto a supported combination.
    ///
    /// Order-insensitive. Fails loudly for combinations without a typed
    /// predicate mapping.
    pub fn from_dimensions(dims: &[Dimension]) -> Result<Self, Error> {
        let has = |d: Dimension| dims.contains(&d);

        if dims.is_empty() {
            return Err(Error::UnsupportedDimensions("empty dimension list".to_string()));
        }
        if has(Dimension::Country) || has(Dimension::Device) {
            let names: Vec<&str> = dims.iter().map(Dimension::as_str).collect();
            return Err(Error::UnsupportedDimensions(names.join("+")));
        }

        match (has(Dimension::Date), has(Dimension::Query), has(Dimension::Page)) {
            (true, false, true) => Ok(DimensionSet::DatePage),
            (false, true, true) => Ok(DimensionSet::QueryPage),
            (true, true, false) => Ok(DimensionSet::DateQuery),
            (true, true, true) => Ok(DimensionSet::DateQueryPage),
            (false, false, true) => Ok(DimensionSet::Page),
            _ => {
                let names: Vec<&str> = dims.iter().map(Dimension::as_str).collect();
                Err(Error::UnsupportedDimensions(names.join("+")))
            }
        }
    }

    /// Per-slot predicates in fixed (query, page, country, device) order.
    ///
    /// Country and device are never part of a supported grouping, so their
    /// slots always require the empty sentinel.
    pub fn slot_rules(&self) -> [(Dimension, SlotRule); 4] {
        let (query, page) = match self {
            DimensionSet::DatePage => (SlotRule::Empty, SlotRule::NonEmpty),
            DimensionSet::QueryPage => (SlotRule::NonEmpty, SlotRule::NonEmpty),
            DimensionSet::DateQuery => (SlotRule::NonEmpty, SlotRule::Empty),
            DimensionSet::DateQueryPage => (SlotRule::NonEmpty, SlotRule::NonEmpty),
            DimensionSet::Page => (SlotRule::Empty, SlotRule::NonEmpty),
        };
        [
            (Dimension::Query, query),
            (Dimension::Page, page),
            (Dimension::Country, SlotRule::Empty),
            (Dimension::Device, SlotRule::Empty),
        ]
    }

    /// Dimensions to request upstream when this combination must be fetched.
    ///
    /// `Page` fetches (date, page) so the reader's per-page aggregation has
    /// finer-grained rows to fold.
    pub fn fetch_dimensions(&self) -> &'static [Dimension] {
        match self {
            DimensionSet::DatePage | DimensionSet::Page => &[Dimension::Date, Dimension::Page],
            DimensionSet::QueryPage => &[Dimension::Query, Dimension::Page],
            DimensionSet::DateQuery => &[Dimension::Date, Dimension::Query],
            DimensionSet::DateQueryPage => &[Dimension::Date, Dimension::Query, Dimension::Page],
        }
    }

    /// Whether reads of this combination fold stored rows into totals.
    ///
    /// Non-date groupings aggregate at read time: `Page` folds (date, page)
    /// rows per page, and `QueryPage` folds per (query, page) pair so rows
    /// stamped with different chunk dates merge into one total.
    pub fn aggregates(&self) -> bool {
        matches!(self, DimensionSet::Page | DimensionSet::QueryPage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_combinations() {
        assert_eq!(
            DimensionSet::from_dimensions(&[Dimension::Date, Dimension::Page]).unwrap(),
            DimensionSet::DatePage
        );
        assert_eq!(
            DimensionSet::from_dimensions(&[Dimension::Page, Dimension::Query]).unwrap(),
            DimensionSet::QueryPage
        );
        assert_eq!(
            DimensionSet::from_dimensions(&[Dimension::Date, Dimension::Query]).unwrap(),
            DimensionSet::DateQuery
        );
        assert_eq!(
            DimensionSet::from_dimensions(&[Dimension::Date, Dimension::Query, Dimension::Page]).unwrap(),
            DimensionSet::DateQueryPage
        );
        assert_eq!(
            DimensionSet::from_dimensions(&[Dimension::Page]).unwrap(),
            DimensionSet::Page
        );
    }

    #[test]
    fn test_parse_order_insensitive() {
        let a = DimensionSet::from_dimensions(&[Dimension::Query, Dimension::Date]).unwrap();
        let b = DimensionSet::from_dimensions(&[Dimension::Date, Dimension::Query]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reject_unrecognized_combinations() {
        assert!(matches!(
            DimensionSet::from_dimensions(&[]),
            Err(Error::UnsupportedDimensions(_))
        ));
        assert!(matches!(
            DimensionSet::from_dimensions(&[Dimension::Date]),
            Err(Error::UnsupportedDimensions(_))
        ));
        assert!(matches!(
            DimensionSet::from_dimensions(&[Dimension::Query]),
            Err(Error::UnsupportedDimensions(_))
        ));
        assert!(matches!(
            DimensionSet::from_dimensions(&[Dimension::Country, Dimension::Device]),
            Err(Error::UnsupportedDimensions(_))
        ));
        assert!(matches!(
            DimensionSet::from_dimensions(&[Dimension::Date, Dimension::Query, Dimension::Country]),
            Err(Error::UnsupportedDimensions(_))
        ));
    }

    #[test]
    fn test_slot_rules_date_page() {
        let rules = DimensionSet::DatePage.slot_rules();
        assert_eq!(rules[0], (Dimension::Query, SlotRule::Empty));
        assert_eq!(rules[1], (Dimension::Page, SlotRule::NonEmpty));
        assert_eq!(rules[2], (Dimension::Country, SlotRule::Empty));
        assert_eq!(rules[3], (Dimension::Device, SlotRule::Empty));
    }

    #[test]
    fn test_page_fetches_finer_rows() {
        assert_eq!(
            DimensionSet::Page.fetch_dimensions(),
            &[Dimension::Date, Dimension::Page]
        );
        assert!(DimensionSet::Page.aggregates());
        assert!(DimensionSet::QueryPage.aggregates());
        assert!(!DimensionSet::DateQuery.aggregates());
        assert!(!DimensionSet::DateQueryPage.aggregates());
    }

    #[test]
    fn test_dimension_roundtrip() {
        for name in ["date", "query", "page", "country", "device"] {
            let dim: Dimension = name.parse().unwrap();
            assert_eq!(dim.as_str(), name);
        }
        assert!("week".parse::<Dimension>().is_err());
    }
}
