//! Dense date-keyed data points layered over time-series documents.
//!
//! # Responsibility
//! - Append, correct and tombstone points without ever deleting a row.
//! - Read the winning value per date at a pinned (version, correction).
//!
//! # Invariants
//! - Per date, the winner is the row with the greatest `corr_instant` among
//!   rows with `ver_instant <= version_as_of` and `corr_instant <= corrected_to`.
//! - A winning `NULL` value is a tombstone and hides the date.
//! - Corrections and tombstones keep the `ver_instant` of the value they
//!   replace.

use crate::clock::{from_micros, to_micros, Instant};
use crate::context::MasterContext;
use crate::error::{MasterError, MasterResult};
use crate::model::entity::Entity;
use crate::model::id::{ObjectId, UniqueId};
use crate::model::time_series::{
    DateDoubleSeries, DateRange, PointLimit, PointSeries, TimeSeriesInfo, TimeSeriesSummary,
};
use crate::model::version_correction::{FixedVersionCorrection, VersionCorrection};
use crate::notify::{ChangeEvent, ChangeType};
use crate::repo::resolver::IdentifierResolver;
use crate::repo::retry::RetryCoordinator;
use chrono::NaiveDate;
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

const DATA_POINT_PREFIX: &str = "DP";
const DATE_FORMAT: &str = "%Y-%m-%d";

const WINNING_POINTS_SQL: &str = "SELECT p.point_date, p.point_value
FROM data_points p
WHERE p.doc_oid = ?1
  AND p.ver_instant <= ?2
  AND p.corr_instant <= ?3
  AND (?4 IS NULL OR p.point_date >= ?4)
  AND (?5 IS NULL OR p.point_date <= ?5)
  AND p.corr_instant = (
      SELECT MAX(q.corr_instant)
      FROM data_points q
      WHERE q.doc_oid = p.doc_oid
        AND q.point_date = p.point_date
        AND q.ver_instant <= ?2
        AND q.corr_instant <= ?3
  )
  AND p.point_value IS NOT NULL
ORDER BY p.point_date ASC;";

/// Data-point master for [`TimeSeriesInfo`] documents.
pub struct TimeSeriesPointStore<'a> {
    conn: &'a Connection,
    ctx: &'a MasterContext,
    retry: RetryCoordinator,
    resolver: IdentifierResolver,
}

/// Winning non-tombstone value of one date.
struct VisiblePoint {
    date: NaiveDate,
    value: f64,
}

impl<'a> TimeSeriesPointStore<'a> {
    pub fn new(conn: &'a Connection, ctx: &'a MasterContext) -> Self {
        Self {
            conn,
            ctx,
            retry: ctx.retry_coordinator(),
            resolver: IdentifierResolver::new(TimeSeriesInfo::KIND, TimeSeriesInfo::SCHEME),
        }
    }

    /// Adds points dated strictly after the latest visible point.
    ///
    /// # Errors
    /// - `NotFound` when the series document is not live.
    /// - `Validation` when the first new date is not after the latest date.
    pub fn append(&self, info_id: &ObjectId, series: &DateDoubleSeries) -> MasterResult<UniqueId> {
        if series.is_empty() {
            return self.current_points_id(info_id);
        }

        self.mutate("points_append", info_id, ChangeType::Changed, |tx, now| {
            let fixed = FixedVersionCorrection::new(now, now);
            if let (Some(latest), Some((first, _))) =
                (latest_visible_date(tx, &info_id.value, fixed)?, series.first())
            {
                if first <= latest {
                    return Err(MasterError::Validation(format!(
                        "appended points must start after {latest}, got {first}; use correct instead"
                    )));
                }
            }

            for (date, value) in series.points() {
                insert_point(tx, &info_id.value, *date, now, now, Some(*value))?;
            }
            Ok(series.len())
        })
    }

    /// Writes `series` as a new correction, whether or not dates hold values.
    pub fn correct(&self, info_id: &ObjectId, series: &DateDoubleSeries) -> MasterResult<UniqueId> {
        if series.is_empty() {
            return self.current_points_id(info_id);
        }

        self.mutate("points_correct", info_id, ChangeType::Corrected, |tx, now| {
            for (date, value) in series.points() {
                let ver_instant = latest_ver_instant(tx, &info_id.value, *date)?.unwrap_or(now);
                insert_point(tx, &info_id.value, *date, ver_instant, now, Some(*value))?;
            }
            Ok(series.len())
        })
    }

    /// Tombstones every visible point in `range`.
    pub fn remove(&self, info_id: &ObjectId, range: DateRange) -> MasterResult<UniqueId> {
        range.validate().map_err(MasterError::Validation)?;

        self.mutate("points_remove", info_id, ChangeType::Changed, |tx, now| {
            let fixed = FixedVersionCorrection::new(now, now);
            let visible = winning_points(tx, &info_id.value, fixed, range)?;
            for point in &visible {
                let ver_instant =
                    latest_ver_instant(tx, &info_id.value, point.date)?.unwrap_or(now);
                insert_point(tx, &info_id.value, point.date, ver_instant, now, None)?;
            }
            Ok(visible.len())
        })
    }

    /// Points visible at `vc` within `range`, trimmed by `limit`.
    pub fn read(
        &self,
        info_id: &ObjectId,
        vc: VersionCorrection,
        range: DateRange,
        limit: PointLimit,
    ) -> MasterResult<PointSeries> {
        self.read_fixed(info_id, self.ctx.fix(vc), range, limit)
    }

    /// Reads at the coordinate encoded in a data-point id.
    pub fn read_at(
        &self,
        points_id: &UniqueId,
        range: DateRange,
        limit: PointLimit,
    ) -> MasterResult<PointSeries> {
        let info_id = info_id_of(points_id)?;
        let token = points_id.version_token.as_deref().ok_or_else(|| {
            MasterError::Validation(format!("`{points_id}` must carry a version token"))
        })?;
        self.read_fixed(&info_id, parse_points_token(token)?, range, limit)
    }

    /// Earliest and latest visible points at `vc`.
    pub fn summary(
        &self,
        info_id: &ObjectId,
        vc: VersionCorrection,
    ) -> MasterResult<TimeSeriesSummary> {
        let series = self.read(info_id, vc, DateRange::ALL, PointLimit::All)?;
        Ok(TimeSeriesSummary {
            earliest: series.points.first(),
            latest: series.points.last(),
            version_as_of: series.version_correction.version_as_of,
            corrected_to: series.version_correction.corrected_to,
        })
    }

    fn read_fixed(
        &self,
        info_id: &ObjectId,
        fixed: FixedVersionCorrection,
        range: DateRange,
        limit: PointLimit,
    ) -> MasterResult<PointSeries> {
        range.validate().map_err(MasterError::Validation)?;
        self.resolver.resolve_row_id(self.conn, info_id, fixed)?;

        let points = winning_points(self.conn, &info_id.value, fixed, range)?
            .into_iter()
            .map(|point| (point.date, point.value))
            .collect();
        let points = DateDoubleSeries::new(points).map_err(MasterError::InvalidData)?;

        Ok(PointSeries {
            unique_id: points_id(info_id, fixed),
            version_correction: fixed,
            points: points.limited(limit),
        })
    }

    fn current_points_id(&self, info_id: &ObjectId) -> MasterResult<UniqueId> {
        let fixed = self.ctx.fix(VersionCorrection::LATEST);
        self.resolver.resolve_row_id(self.conn, info_id, fixed)?;
        Ok(points_id(info_id, fixed))
    }

    fn mutate<F>(
        &self,
        operation: &'static str,
        info_id: &ObjectId,
        change_type: ChangeType,
        mut work: F,
    ) -> MasterResult<UniqueId>
    where
        F: FnMut(&Transaction<'_>, Instant) -> MasterResult<usize>,
    {
        let started_at = std::time::Instant::now();
        let result = self.retry.execute(self.conn, operation, |tx| {
            let now = self.ctx.now();
            self.resolver
                .resolve_row_id(tx, info_id, FixedVersionCorrection::new(now, now))?;
            let written = work(tx, now)?;
            Ok((now, written))
        });

        match result {
            Ok((now, written)) => {
                info!(
                    "event={} module=points status={} oid={} points={} duration_ms={}",
                    operation,
                    if written > 0 { "ok" } else { "noop" },
                    info_id,
                    written,
                    started_at.elapsed().as_millis()
                );
                if written > 0 {
                    self.ctx.notifier().publish(&ChangeEvent {
                        change_type,
                        object_id: info_id.clone(),
                        version_instant: now,
                        correction_instant: now,
                    });
                }
                Ok(points_id(info_id, FixedVersionCorrection::new(now, now)))
            }
            Err(err) => {
                match &err {
                    MasterError::NotFound(_) | MasterError::Validation(_) => warn!(
                        "event={} module=points status=rejected oid={} duration_ms={} error_code={}",
                        operation,
                        info_id,
                        started_at.elapsed().as_millis(),
                        err.code()
                    ),
                    _ => error!(
                        "event={} module=points status=error oid={} duration_ms={} error_code={} error={}",
                        operation,
                        info_id,
                        started_at.elapsed().as_millis(),
                        err.code(),
                        err
                    ),
                }
                Err(err)
            }
        }
    }
}

/// Data-point id for `info_id` pinned at `fixed`.
pub fn points_id(info_id: &ObjectId, fixed: FixedVersionCorrection) -> UniqueId {
    let version = to_micros(fixed.version_as_of);
    let correction = to_micros(fixed.corrected_to);
    UniqueId::of(
        info_id.scheme.clone(),
        format!("{DATA_POINT_PREFIX}{}", info_id.value),
        Some(format!("{version}P{}", correction.saturating_sub(version))),
    )
}

fn info_id_of(points_id: &UniqueId) -> MasterResult<ObjectId> {
    points_id
        .object_id
        .strip_prefix(DATA_POINT_PREFIX)
        .filter(|value| !value.is_empty())
        .map(|value| ObjectId::new(points_id.scheme.clone(), value))
        .ok_or_else(|| MasterError::Validation(format!("`{points_id}` is not a data-point id")))
}

fn parse_points_token(token: &str) -> MasterResult<FixedVersionCorrection> {
    let invalid = || MasterError::Validation(format!("invalid data-point version `{token}`"));
    let (version, delta) = token.split_once('P').ok_or_else(invalid)?;
    let version: i64 = version.parse().map_err(|_| invalid())?;
    let delta: i64 = delta.parse().map_err(|_| invalid())?;
    let correction = version.checked_add(delta).ok_or_else(invalid)?;
    Ok(FixedVersionCorrection::new(
        from_micros(version),
        from_micros(correction),
    ))
}

fn winning_points(
    conn: &Connection,
    oid: &str,
    fixed: FixedVersionCorrection,
    range: DateRange,
) -> MasterResult<Vec<VisiblePoint>> {
    let mut stmt = conn.prepare_cached(WINNING_POINTS_SQL)?;
    let mut rows = stmt.query(params![
        oid,
        to_micros(fixed.version_as_of),
        to_micros(fixed.corrected_to),
        range.start.map(format_date),
        range.end.map(format_date),
    ])?;

    let mut points = Vec::new();
    while let Some(row) = rows.next()? {
        let date_text: String = row.get(0)?;
        points.push(VisiblePoint {
            date: parse_date(&date_text)?,
            value: row.get(1)?,
        });
    }
    Ok(points)
}

fn latest_visible_date(
    conn: &Connection,
    oid: &str,
    fixed: FixedVersionCorrection,
) -> MasterResult<Option<NaiveDate>> {
    Ok(winning_points(conn, oid, fixed, DateRange::ALL)?
        .last()
        .map(|point| point.date))
}

fn latest_ver_instant(
    conn: &Connection,
    oid: &str,
    date: NaiveDate,
) -> MasterResult<Option<Instant>> {
    let ver_instant: Option<i64> = conn
        .query_row(
            "SELECT ver_instant
             FROM data_points
             WHERE doc_oid = ?1 AND point_date = ?2
             ORDER BY corr_instant DESC
             LIMIT 1;",
            params![oid, format_date(date)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(ver_instant.map(from_micros))
}

fn insert_point(
    conn: &Connection,
    oid: &str,
    date: NaiveDate,
    ver_instant: Instant,
    corr_instant: Instant,
    value: Option<f64>,
) -> MasterResult<()> {
    conn.execute(
        "INSERT INTO data_points (doc_oid, point_date, ver_instant, corr_instant, point_value)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            oid,
            format_date(date),
            to_micros(ver_instant),
            to_micros(corr_instant),
            value
        ],
    )?;
    Ok(())
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(text: &str) -> MasterResult<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|err| {
        MasterError::InvalidData(format!(
            "invalid date `{text}` in data_points.point_date: {err}"
        ))
    })
}
