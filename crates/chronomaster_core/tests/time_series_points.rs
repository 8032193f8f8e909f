use chrono::NaiveDate;
use chronomaster_core::db::open_db_in_memory;
use chronomaster_core::{
    DateDoubleSeries, DateRange, Document, DocumentMaster, MasterContext, MasterError, ObjectId,
    PointLimit, SteppingClock, TimeSeriesInfo, TimeSeriesPointStore, VersionCorrection,
    VersionedStore,
};
use rusqlite::Connection;
use std::sync::Arc;

fn setup() -> (Connection, MasterContext) {
    let conn = open_db_in_memory().unwrap();
    let ctx = MasterContext::default().with_clock(Arc::new(SteppingClock::starting_2020()));
    (conn, ctx)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 3, d).unwrap()
}

fn series(points: &[(u32, f64)]) -> DateDoubleSeries {
    DateDoubleSeries::new(points.iter().map(|(d, v)| (day(*d), *v)).collect()).unwrap()
}

fn add_info(conn: &Connection, ctx: &MasterContext) -> Document<TimeSeriesInfo> {
    VersionedStore::<TimeSeriesInfo>::new(conn, ctx)
        .add(TimeSeriesInfo::new("AAPL close", "CLOSE", "BLOOMBERG"))
        .unwrap()
}

#[test]
fn appended_points_read_back_in_date_order() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);

    let uid = points
        .append(&info.object_id(), &series(&[(1, 10.0), (2, 11.0), (3, 12.5)]))
        .unwrap();
    assert_eq!(uid.scheme, "DbHts");
    assert_eq!(uid.object_id, format!("DP{}", info.unique_id.object_id));
    assert!(uid.is_versioned());

    let read = points
        .read(
            &info.object_id(),
            VersionCorrection::LATEST,
            DateRange::ALL,
            PointLimit::All,
        )
        .unwrap();
    assert_eq!(read.points, series(&[(1, 10.0), (2, 11.0), (3, 12.5)]));
}

#[test]
fn append_merges_with_existing_points_and_rejects_overlap() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let oid = info.object_id();

    points.append(&oid, &series(&[(1, 1.0), (2, 2.0)])).unwrap();
    points.append(&oid, &series(&[(3, 3.0), (4, 4.0)])).unwrap();

    let err = points.append(&oid, &series(&[(2, 9.0)])).unwrap_err();
    assert!(matches!(err, MasterError::Validation(_)));

    let read = points
        .read(&oid, VersionCorrection::LATEST, DateRange::ALL, PointLimit::All)
        .unwrap();
    assert_eq!(read.points, series(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]));
}

#[test]
fn correction_keeps_prior_view_reproducible() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let oid = info.object_id();

    let before = points
        .append(&oid, &series(&[(1, 1.0), (2, 2.0), (3, 3.0)]))
        .unwrap();
    let after = points.correct(&oid, &series(&[(2, 2.5)])).unwrap();
    assert_ne!(before, after);

    let original = points
        .read_at(&before, DateRange::ALL, PointLimit::All)
        .unwrap();
    assert_eq!(original.points, series(&[(1, 1.0), (2, 2.0), (3, 3.0)]));
    assert_eq!(original.unique_id, before);

    let corrected = points
        .read(&oid, VersionCorrection::LATEST, DateRange::ALL, PointLimit::All)
        .unwrap();
    assert_eq!(corrected.points, series(&[(1, 1.0), (2, 2.5), (3, 3.0)]));

    let as_known_then = points
        .read(
            &oid,
            VersionCorrection::of_corrected_to(original.version_correction.corrected_to),
            DateRange::ALL,
            PointLimit::All,
        )
        .unwrap();
    assert_eq!(as_known_then.points.value_at(day(2)), Some(2.0));
}

#[test]
fn correction_can_fill_a_missing_date() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let oid = info.object_id();

    points.append(&oid, &series(&[(1, 1.0), (3, 3.0)])).unwrap();
    points.correct(&oid, &series(&[(2, 2.0)])).unwrap();

    let read = points
        .read(&oid, VersionCorrection::LATEST, DateRange::ALL, PointLimit::All)
        .unwrap();
    assert_eq!(read.points, series(&[(1, 1.0), (2, 2.0), (3, 3.0)]));
}

#[test]
fn remove_tombstones_range_without_losing_history() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let oid = info.object_id();

    let appended = points
        .append(&oid, &series(&[(1, 1.0), (2, 2.0), (3, 3.0)]))
        .unwrap();
    points
        .remove(
            &oid,
            DateRange {
                start: None,
                end: Some(day(2)),
            },
        )
        .unwrap();

    let latest = points
        .read(&oid, VersionCorrection::LATEST, DateRange::ALL, PointLimit::All)
        .unwrap();
    assert_eq!(latest.points, series(&[(3, 3.0)]));

    let earlier = points
        .read_at(&appended, DateRange::ALL, PointLimit::All)
        .unwrap();
    assert_eq!(earlier.points.len(), 3);

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM data_points;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 5);

    // A tombstoned date can be filled again by correction.
    points.correct(&oid, &series(&[(1, 1.5)])).unwrap();
    let refilled = points
        .read(&oid, VersionCorrection::LATEST, DateRange::ALL, PointLimit::All)
        .unwrap();
    assert_eq!(refilled.points, series(&[(1, 1.5), (3, 3.0)]));
}

#[test]
fn reads_honor_range_limit_and_version() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let oid = info.object_id();

    points
        .append(&oid, &series(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]))
        .unwrap();

    let window = DateRange::new(Some(day(2)), Some(day(4))).unwrap();
    let first = points
        .read(&oid, VersionCorrection::LATEST, window, PointLimit::from_count(Some(1)))
        .unwrap();
    assert_eq!(first.points, series(&[(2, 2.0)]));

    let last = points
        .read(&oid, VersionCorrection::LATEST, window, PointLimit::from_count(Some(-2)))
        .unwrap();
    assert_eq!(last.points, series(&[(3, 3.0), (4, 4.0)]));

    let before_append = points
        .read(
            &oid,
            VersionCorrection::of_version_as_of(info.version_from),
            DateRange::ALL,
            PointLimit::All,
        )
        .unwrap();
    assert!(before_append.points.is_empty());

    let inverted = points.read(
        &oid,
        VersionCorrection::LATEST,
        DateRange {
            start: Some(day(4)),
            end: Some(day(1)),
        },
        PointLimit::All,
    );
    assert!(matches!(inverted, Err(MasterError::Validation(_))));
}

#[test]
fn summary_reports_first_and_last_visible_points() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let oid = info.object_id();

    let empty = points.summary(&oid, VersionCorrection::LATEST).unwrap();
    assert_eq!(empty.earliest, None);
    assert_eq!(empty.latest, None);

    points
        .append(&oid, &series(&[(1, 1.0), (2, 2.0), (3, 3.0)]))
        .unwrap();
    let summary = points.summary(&oid, VersionCorrection::LATEST).unwrap();
    assert_eq!(summary.earliest, Some((day(1), 1.0)));
    assert_eq!(summary.latest, Some((day(3), 3.0)));
}

#[test]
fn empty_input_returns_current_id_without_writing() {
    let (conn, ctx) = setup();
    let info = add_info(&conn, &ctx);
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let oid = info.object_id();

    let uid = points.append(&oid, &DateDoubleSeries::empty()).unwrap();
    assert!(uid.is_versioned());
    points.correct(&oid, &DateDoubleSeries::empty()).unwrap();
    points.remove(&oid, DateRange::ALL).unwrap();

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM data_points;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn unknown_or_removed_series_is_not_found() {
    let (conn, ctx) = setup();
    let points = TimeSeriesPointStore::new(&conn, &ctx);

    let missing = ObjectId::new("DbHts", "missing");
    assert!(matches!(
        points.append(&missing, &series(&[(1, 1.0)])),
        Err(MasterError::NotFound(_))
    ));
    assert!(matches!(
        points.read(&missing, VersionCorrection::LATEST, DateRange::ALL, PointLimit::All),
        Err(MasterError::NotFound(_))
    ));
    assert!(matches!(
        points.append(&ObjectId::new("DbUsr", "x"), &series(&[(1, 1.0)])),
        Err(MasterError::Validation(_))
    ));

    let info = add_info(&conn, &ctx);
    points.append(&info.object_id(), &series(&[(1, 1.0)])).unwrap();
    VersionedStore::<TimeSeriesInfo>::new(&conn, &ctx)
        .remove(&info.object_id())
        .unwrap();
    assert!(matches!(
        points.append(&info.object_id(), &series(&[(2, 2.0)])),
        Err(MasterError::NotFound(_))
    ));
}

#[test]
fn malformed_series_are_rejected_before_storage() {
    assert!(DateDoubleSeries::new(vec![(day(2), 1.0), (day(1), 2.0)]).is_err());
    assert!(DateDoubleSeries::new(vec![(day(1), f64::NAN)]).is_err());
    assert!(DateRange::new(Some(day(3)), Some(day(1))).is_err());
}
