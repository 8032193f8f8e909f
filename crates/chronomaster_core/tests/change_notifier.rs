use chrono::NaiveDate;
use chronomaster_core::db::open_db_in_memory;
use chronomaster_core::{
    ChangeEvent, ChangeListener, ChangeNotifier, ChangeType, DateDoubleSeries, DateRange,
    DocumentMaster, ListenerResult, ManageableUser, MasterContext, SteppingClock, TimeSeriesInfo,
    TimeSeriesPointStore, VersionReplacement, VersionedStore,
};
use std::sync::{Arc, Mutex};

fn recording_context() -> (MasterContext, Arc<Mutex<Vec<ChangeEvent>>>) {
    let notifier = Arc::new(ChangeNotifier::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: Arc<dyn ChangeListener> = Arc::new(move |event: &ChangeEvent| -> ListenerResult {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    notifier.add_listener(listener);

    let ctx = MasterContext::default()
        .with_clock(Arc::new(SteppingClock::starting_2020()))
        .with_notifier(notifier);
    (ctx, seen)
}

fn change_types(seen: &Mutex<Vec<ChangeEvent>>) -> Vec<ChangeType> {
    seen.lock().unwrap().iter().map(|e| e.change_type).collect()
}

#[test]
fn store_mutations_publish_after_commit() {
    let conn = open_db_in_memory().unwrap();
    let (ctx, seen) = recording_context();
    let store = VersionedStore::<ManageableUser>::new(&conn, &ctx);

    let v1 = store.add(ManageableUser::new("alice")).unwrap();
    let v2 = store
        .update(&v1.unique_id, ManageableUser::new("alicia"))
        .unwrap();
    let c1 = store
        .correct(&v2.unique_id, ManageableUser::new("alicia").with_permission("x"))
        .unwrap();
    store.remove(&v1.object_id()).unwrap();

    assert_eq!(
        change_types(&seen),
        vec![
            ChangeType::Added,
            ChangeType::Changed,
            ChangeType::Corrected,
            ChangeType::Removed
        ]
    );

    let events = seen.lock().unwrap();
    assert!(events.iter().all(|e| e.object_id == v1.object_id()));
    assert_eq!(events[0].version_instant, v1.version_from);
    assert_eq!(events[1].version_instant, v2.version_from);
    assert_eq!(events[2].version_instant, v2.version_from);
    assert_eq!(events[2].correction_instant, c1.correction_from);
}

#[test]
fn version_replacements_publish_changed_or_removed() {
    let conn = open_db_in_memory().unwrap();
    let (ctx, seen) = recording_context();
    let store = VersionedStore::<ManageableUser>::new(&conn, &ctx);

    let v1 = store.add(ManageableUser::new("alice")).unwrap();
    let v2 = store
        .update(&v1.unique_id, ManageableUser::new("alicia"))
        .unwrap();
    store.remove_version(&v2.unique_id).unwrap();
    store
        .replace_versions(&v1.object_id(), Vec::new())
        .unwrap();
    let live = store.get_by_name("alice").unwrap();
    store
        .replace_version(
            &live.unique_id,
            vec![VersionReplacement::new(
                live.version_from,
                ManageableUser::new("alice").with_permission("read"),
            )],
        )
        .unwrap();
    store.replace_all_versions(&v1.object_id(), Vec::new()).unwrap();

    assert_eq!(
        change_types(&seen),
        vec![
            ChangeType::Added,
            ChangeType::Changed,
            ChangeType::Changed,
            ChangeType::Changed,
            ChangeType::Removed
        ]
    );
    let events = seen.lock().unwrap();
    assert_eq!(events[2].version_instant, v1.version_from);
    assert!(events[2].correction_instant > v2.correction_from);
}

#[test]
fn noop_and_rejected_mutations_publish_nothing() {
    let conn = open_db_in_memory().unwrap();
    let (ctx, seen) = recording_context();
    let store = VersionedStore::<ManageableUser>::new(&conn, &ctx);

    let v1 = store.add(ManageableUser::new("alice")).unwrap();
    store
        .update(&v1.unique_id, ManageableUser::new("alice"))
        .unwrap();
    store.add(ManageableUser::new("alice")).unwrap_err();
    store
        .add(ManageableUser::new("bad name with spaces"))
        .unwrap_err();

    assert_eq!(change_types(&seen), vec![ChangeType::Added]);
}

#[test]
fn failing_and_panicking_listeners_do_not_fail_mutations() {
    let conn = open_db_in_memory().unwrap();
    let (ctx, seen) = recording_context();
    ctx.notifier().add_listener(Arc::new(|_: &ChangeEvent| -> ListenerResult {
        Err("downstream unavailable".into())
    }));
    ctx.notifier()
        .add_listener(Arc::new(|_: &ChangeEvent| -> ListenerResult {
            panic!("listener bug")
        }));
    let store = VersionedStore::<ManageableUser>::new(&conn, &ctx);

    let v1 = store.add(ManageableUser::new("alice")).unwrap();
    store
        .update(&v1.unique_id, ManageableUser::new("alice").with_permission("read"))
        .unwrap();

    assert_eq!(change_types(&seen).len(), 2);
    assert_eq!(
        store
            .get_by_name("alice")
            .unwrap()
            .entity
            .permissions
            .len(),
        1
    );
}

#[test]
fn point_mutations_publish_only_when_rows_are_written() {
    let conn = open_db_in_memory().unwrap();
    let (ctx, seen) = recording_context();
    let info = VersionedStore::<TimeSeriesInfo>::new(&conn, &ctx)
        .add(TimeSeriesInfo::new("EURUSD", "MID", "REUTERS"))
        .unwrap();
    let points = TimeSeriesPointStore::new(&conn, &ctx);
    let date = |d| NaiveDate::from_ymd_opt(2022, 6, d).unwrap();
    let oid = info.object_id();

    points
        .append(&oid, &DateDoubleSeries::new(vec![(date(1), 1.1)]).unwrap())
        .unwrap();
    points
        .correct(&oid, &DateDoubleSeries::new(vec![(date(1), 1.2)]).unwrap())
        .unwrap();
    points
        .remove(
            &oid,
            DateRange {
                start: Some(date(10)),
                end: None,
            },
        )
        .unwrap();
    points.remove(&oid, DateRange::ALL).unwrap();

    assert_eq!(
        change_types(&seen),
        vec![
            ChangeType::Added,
            ChangeType::Changed,
            ChangeType::Corrected,
            ChangeType::Changed
        ]
    );
}

#[test]
fn removed_listener_stops_receiving() {
    let notifier = Arc::new(ChangeNotifier::new());
    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let id = notifier.add_listener(Arc::new(move |_: &ChangeEvent| -> ListenerResult {
        *sink.lock().unwrap() += 1;
        Ok(())
    }));

    let conn = open_db_in_memory().unwrap();
    let ctx = MasterContext::default().with_notifier(Arc::clone(&notifier));
    let store = VersionedStore::<ManageableUser>::new(&conn, &ctx);

    store.add(ManageableUser::new("alice")).unwrap();
    assert!(notifier.remove_listener(id));
    store.add(ManageableUser::new("bob")).unwrap();

    assert_eq!(*seen.lock().unwrap(), 1);
    assert_eq!(notifier.listener_count(), 0);
}
