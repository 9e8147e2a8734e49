//! End-to-end lock session scenarios driven through gateway reports

mod common;

use airbnk_lib::packet;
use airbnk_lib::operation::OperationState;
use chrono::{Duration, TimeZone, Utc};
use common::*;

#[test]
fn test_lock_operation_completes_after_both_acknowledgments() {
    let mut session = advertised(attach(config()));
    session.request_operation(2).unwrap();

    let frame1 = last_frame(&session);
    assert!(frame1.starts_with("FF00"));
    assert_eq!(frame1.len(), 40);
    assert_eq!(
        session.transport().last().unwrap().payload(),
        format!("M:{MAC} s:FFF0 c:FFF2 w:{frame1} go")
    );

    session.on_message(&write_report("DONEWRITE", &frame1)).unwrap();
    let frame2 = last_frame(&session);
    assert!(frame2.starts_with("FF01"));
    assert_eq!(frame2.len(), 40);

    session.on_message(&write_report("DONEWRITE", &frame2)).unwrap();
    assert!(session.is_locked());
    assert_eq!(session.operation(), &OperationState::Completed(LockState::Locked));
}

#[test]
fn test_written_frames_reassemble_to_a_valid_packet() {
    let mut session = advertised(attach(config()));
    session.request_operation(1).unwrap();
    let frame1 = last_frame(&session);
    session.on_message(&write_report("DONEWRITE", &frame1.to_lowercase())).unwrap();
    let frame2 = last_frame(&session);

    let pending = packet::FramePair { frame1, frame2 };
    let bytes = hex::decode(pending.reassemble()).unwrap();
    assert_eq!(bytes.len(), 36);
    assert_eq!(&bytes[..4], &[0xAA, 0x10, 0x1A, 0x03]);
    assert_eq!(bytes[28], packet::checksum(&bytes[3..28]));
    assert!(bytes[29..].iter().all(|&b| b == 0));
}

#[test]
fn test_unlock_frames_match_reference_packet() {
    let mut session = attach(config());
    session.on_message(&details_report(&broadcast(1, 1234, 870))).unwrap();

    let now = Utc.timestamp_opt(1_637_590_376, 0).unwrap();
    session.request_operation_at(1, now).unwrap();
    let frame1 = last_frame(&session);
    session.on_message(&write_report("DONEWRITE", &frame1)).unwrap();
    let frame2 = last_frame(&session);

    assert_eq!(
        packet::FramePair { frame1, frame2 }.reassemble(),
        "AA101A03D3BB1795A77129770450335D9860A7A15AFCC24CAAE65A107700000000000000"
    );
}

#[test]
fn test_request_before_first_advertisement_is_rejected() {
    let mut session = attach(config());
    let err = session.request_operation(2).unwrap_err();
    assert!(matches!(err, LockError::NoEventCounter));
    assert_eq!(err.kind(), ErrorKind::Request);
    assert_eq!(session.transport().len(), 1);
}

#[test]
fn test_rejected_write_fails_the_operation() {
    let mut session = advertised(attach(config()));
    session.request_operation(1).unwrap();
    let frame1 = last_frame(&session);
    session.on_message(&write_report("DONEWRITE", &frame1)).unwrap();
    let frame2 = last_frame(&session);

    session.on_message(&write_report("FAILCONNECT", &frame2)).unwrap();
    assert_eq!(session.lock_state(), LockState::Failed);
    assert!(!session.operation().is_operating());

    // A new request is accepted once the failure is reported
    session.request_operation(1).unwrap();
    assert!(session.operation().is_operating());
}

#[test]
fn test_availability_follows_report_gaps() {
    let mut session = attach(config());
    let t0 = Utc.with_ymd_and_hms(2021, 11, 22, 10, 0, 0).unwrap();

    session.on_message_at(&details_report(&broadcast(1, 10, 955)), t0).unwrap();
    assert!(!session.is_available());
    assert!((session.battery().unwrap() - 95.5).abs() < 1e-9);

    let mut at = t0;
    for (gap, available) in [(10, true), (40, false), (29, true), (30, false)] {
        at += Duration::seconds(gap);
        session
            .on_message_at(&details_report(&broadcast(1, 10, 955)), at)
            .unwrap();
        assert_eq!(session.is_available(), available, "after a {gap} s gap");
    }
}

#[test]
fn test_wrong_header_leaves_state_untouched() {
    let mut session = attach(config());
    session.on_message(&details_report(&broadcast(0, 3, 900))).unwrap();
    assert!(session.is_locked());

    let mut record = broadcast(1, 4, 800);
    record[1] = 0xBB;
    session.on_message(&details_report(&record)).unwrap();

    assert!(session.is_locked());
    assert_eq!(session.event_counter(), 3);
    assert!((session.battery().unwrap() - 90.0).abs() < 1e-9);
}

#[test]
fn test_other_devices_are_ignored() {
    let mut session = attach(config());
    let report = details_report(&broadcast(0, 3, 900)).replace(MAC, "112233445566");
    session.on_message(&report).unwrap();
    assert!(session.record().is_none());
}

#[test]
fn test_mac_is_discovered_from_serial() {
    let mut config = config();
    config.mac_address = Some(String::new());
    let mut session = attach(config);
    assert_eq!(session.transport(), &vec![OutboundRequest::ScanAll]);

    session.on_message(&details_report(&broadcast(2, 1, 500))).unwrap();
    assert_eq!(session.mac_address(), Some(MAC));
    assert!(session.is_jammed());
    assert_eq!(session.identity().sw_version.as_deref(), Some("1.0.9"));
}

#[test]
fn test_status_reaches_observers() {
    use std::sync::{Arc, Mutex};

    let mut session = attach(config());
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    session.register_observer(Box::new(move |status: &airbnk_lib::LockStatus| {
        sink.lock().unwrap().push(*status)
    }));

    session.on_message(&details_report(&broadcast(0, 8, 640))).unwrap();
    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].lock_state, LockState::Locked);
    assert_eq!(statuses[0].event_counter, 8);
    assert_eq!(statuses[0].battery, Some(64.0));
}

#[test]
fn test_invalid_report_is_an_error() {
    let mut session = attach(config());
    let err = session.on_message("{not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Message);
}
