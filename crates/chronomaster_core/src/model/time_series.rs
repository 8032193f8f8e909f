//! Time-series metadata entity and data-point value types.
//!
//! # Invariants
//! - [`DateDoubleSeries`] dates are strictly increasing and values finite.
//! - [`DateRange`] bounds are inclusive; `start <= end` when both are set.

use crate::clock::Instant;
use crate::model::entity::{Entity, FieldDescriptor};
use crate::model::id::UniqueId;
use crate::model::version_correction::FixedVersionCorrection;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata document owning a dense data-point series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesInfo {
    pub name: String,
    pub data_field: String,
    pub data_source: String,
    pub data_provider: String,
    pub observation_time: String,
    #[serde(default)]
    pub external_ids: BTreeSet<String>,
}

impl TimeSeriesInfo {
    pub fn new(
        name: impl Into<String>,
        data_field: impl Into<String>,
        data_source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_field: data_field.into(),
            data_source: data_source.into(),
            data_provider: "UNKNOWN".to_string(),
            observation_time: "CLOSE".to_string(),
            external_ids: BTreeSet::new(),
        }
    }
}

impl Entity for TimeSeriesInfo {
    const KIND: &'static str = "time_series";
    const SCHEME: &'static str = "DbHts";
    const FIELDS: &'static [FieldDescriptor<Self>] = &[
        FieldDescriptor::Scalar {
            name: "name",
            read: |info| info.name.clone(),
        },
        FieldDescriptor::Scalar {
            name: "dataField",
            read: |info| info.data_field.clone(),
        },
        FieldDescriptor::Scalar {
            name: "dataSource",
            read: |info| info.data_source.clone(),
        },
        FieldDescriptor::Scalar {
            name: "dataProvider",
            read: |info| info.data_provider.clone(),
        },
        FieldDescriptor::Scalar {
            name: "observationTime",
            read: |info| info.observation_time.clone(),
        },
        FieldDescriptor::Collection {
            name: "externalIds",
            read: |info| info.external_ids.clone(),
        },
    ];

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("name", &self.name),
            ("dataField", &self.data_field),
            ("dataSource", &self.data_source),
            ("dataProvider", &self.data_provider),
            ("observationTime", &self.observation_time),
        ] {
            if value.trim().is_empty() {
                return Err(format!("time series {field} cannot be empty"));
            }
        }
        Ok(())
    }
}

/// Ordered `(date, value)` points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(NaiveDate, f64)>", into = "Vec<(NaiveDate, f64)>")]
pub struct DateDoubleSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl DateDoubleSeries {
    pub fn new(points: Vec<(NaiveDate, f64)>) -> Result<Self, String> {
        if let Some((date, value)) = points.iter().find(|(_, value)| !value.is_finite()) {
            return Err(format!("value at {date} is not finite: {value}"));
        }
        if let Some(pair) = points.windows(2).find(|pair| pair[0].0 >= pair[1].0) {
            return Err(format!(
                "dates must be strictly increasing: {} then {}",
                pair[0].0, pair[1].0
            ));
        }
        Ok(Self { points })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<(NaiveDate, f64)> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<(NaiveDate, f64)> {
        self.points.last().copied()
    }

    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |(d, _)| *d)
            .ok()
            .map(|index| self.points[index].1)
    }

    /// Keeps the window selected by `limit`.
    pub fn limited(mut self, limit: PointLimit) -> Self {
        match limit {
            PointLimit::All => {}
            PointLimit::First(count) => self.points.truncate(count),
            PointLimit::Last(count) => {
                let skip = self.points.len().saturating_sub(count);
                self.points.drain(..skip);
            }
        }
        self
    }
}

impl TryFrom<Vec<(NaiveDate, f64)>> for DateDoubleSeries {
    type Error = String;

    fn try_from(value: Vec<(NaiveDate, f64)>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DateDoubleSeries> for Vec<(NaiveDate, f64)> {
    fn from(value: DateDoubleSeries) -> Self {
        value.points
    }
}

/// Inclusive date window; `None` leaves a side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub const ALL: Self = Self {
        start: None,
        end: None,
    };

    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, String> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => {
                Err(format!("date range is inverted: {start} > {end}"))
            }
            _ => Ok(()),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| start <= date) && self.end.map_or(true, |end| date <= end)
    }
}

/// How many points a read returns after date filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointLimit {
    #[default]
    All,
    First(usize),
    Last(usize),
}

impl PointLimit {
    /// Maps the signed convention: `None` is all, `n >= 0` is first `n`,
    /// `n < 0` is last `|n|`.
    pub fn from_count(count: Option<i64>) -> Self {
        match count {
            None => Self::All,
            Some(n) if n >= 0 => Self::First(usize::try_from(n).unwrap_or(usize::MAX)),
            Some(n) => Self::Last(usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX)),
        }
    }
}

/// Points visible at one pinned coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSeries {
    /// Data-point id encoding `version_correction`.
    pub unique_id: UniqueId,
    pub version_correction: FixedVersionCorrection,
    pub points: DateDoubleSeries,
}

/// Earliest and latest visible points of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesSummary {
    pub earliest: Option<(NaiveDate, f64)>,
    pub latest: Option<(NaiveDate, f64)>,
    pub version_as_of: Instant,
    pub corrected_to: Instant,
}

#[cfg(test)]
mod tests {
    use super::{DateDoubleSeries, DateRange, PointLimit};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    #[test]
    fn series_rejects_unordered_or_non_finite_points() {
        assert!(DateDoubleSeries::new(vec![(day(2), 1.0), (day(1), 2.0)]).is_err());
        assert!(DateDoubleSeries::new(vec![(day(1), 1.0), (day(1), 2.0)]).is_err());
        assert!(DateDoubleSeries::new(vec![(day(1), f64::NAN)]).is_err());
        assert!(DateDoubleSeries::new(vec![(day(1), 1.0), (day(2), 2.0)]).is_ok());
    }

    #[test]
    fn limit_keeps_first_or_last_points() {
        let series =
            DateDoubleSeries::new(vec![(day(1), 1.0), (day(2), 2.0), (day(3), 3.0)]).unwrap();
        assert_eq!(series.clone().limited(PointLimit::First(2)).len(), 2);
        let last = series.clone().limited(PointLimit::Last(1));
        assert_eq!(last.points(), &[(day(3), 3.0)]);
        assert_eq!(series.limited(PointLimit::Last(10)).len(), 3);
    }

    #[test]
    fn signed_count_maps_to_limit() {
        assert_eq!(PointLimit::from_count(None), PointLimit::All);
        assert_eq!(PointLimit::from_count(Some(0)), PointLimit::First(0));
        assert_eq!(PointLimit::from_count(Some(5)), PointLimit::First(5));
        assert_eq!(PointLimit::from_count(Some(-2)), PointLimit::Last(2));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(DateRange::new(Some(day(3)), Some(day(1))).is_err());
        let range = DateRange::new(None, Some(day(2))).unwrap();
        assert!(range.contains(day(1)));
        assert!(!range.contains(day(3)));
    }

    #[test]
    fn series_deserialization_validates_order() {
        let bad = r#"[["2020-01-02", 1.0], ["2020-01-01", 2.0]]"#;
        assert!(serde_json::from_str::<DateDoubleSeries>(bad).is_err());
        let good = r#"[["2020-01-01", 1.0], ["2020-01-02", 2.0]]"#;
        let series: DateDoubleSeries = serde_json::from_str(good).unwrap();
        assert_eq!(series.value_at(day(2)), Some(2.0));
    }
}
