//! Common test utilities and shared imports

// Shared across test files; not every item is used in each of them
#[allow(unused_imports)]
pub use airbnk_lib::advert::{AdvertisementRecord, Generation, LockState};
#[allow(unused_imports)]
pub use airbnk_lib::error::{ErrorKind, LockError};
#[allow(unused_imports)]
pub use airbnk_lib::message::OutboundRequest;
#[allow(unused_imports)]
pub use airbnk_lib::{DeviceConfig, LockSession};

use airbnk_lib::cipher;
use airbnk_lib::provision::session_key;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

pub const SERIAL: &str = "AB0012345";
pub const MODEL: &str = "M531";
pub const APP_KEY: &str = "fedcba9876543210k9Qz";
pub const MAC: &str = "C8DF84A1B2C3";
pub const MANUFACTURER_KEY: [u8; 16] = *b"manufacturer-key";
pub const BINDING_KEY: [u8; 20] = *b"binding-key-20-bytes";

/// Build a `newSnInfo` blob the way the cloud does.
#[allow(dead_code)]
pub fn provisioning_blob() -> String {
    let session_key = session_key(SERIAL, APP_KEY);
    let mut record = vec![0u8; 88];
    record[..SERIAL.len()].copy_from_slice(SERIAL.as_bytes());
    let manufacturer_key = cipher::encrypt(&session_key, &MANUFACTURER_KEY).expect("encrypt manufacturer key");
    record[16..48].copy_from_slice(&manufacturer_key);
    record[48..80].copy_from_slice(&cipher::encrypt(&session_key, &BINDING_KEY).expect("encrypt binding key"));
    record[80..80 + MODEL.len()].copy_from_slice(MODEL.as_bytes());

    let mut blob = cipher::encrypt(&APP_KEY.as_bytes()[..16], &record).expect("encrypt record");
    blob.extend_from_slice(b"trailer-10");
    BASE64.encode(blob)
}

#[allow(dead_code)]
pub fn config() -> DeviceConfig {
    DeviceConfig::new(provisioning_blob(), APP_KEY)
        .with_mac_address(MAC)
        .with_mqtt_topic("tasmota_ble")
}

/// Route library logs to the test output; `RUST_LOG` picks the level.
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[allow(dead_code)]
pub fn attach(config: DeviceConfig) -> LockSession<Vec<OutboundRequest>> {
    init_logging();
    LockSession::attach(config, Vec::new()).expect("attach")
}

/// 24-byte broadcast record for the test lock.
#[allow(dead_code)]
pub fn broadcast(state: u8, counter: u32, battery_tenths: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; 24];
    bytes[..2].copy_from_slice(&[0xBA, 0xBA]);
    bytes[2..7].copy_from_slice(&[0x0A, 0x02, 1, 0, 9]);
    bytes[7..16].copy_from_slice(SERIAL.as_bytes());
    bytes[16..18].copy_from_slice(&battery_tenths.to_be_bytes());
    bytes[18..22].copy_from_slice(&counter.to_be_bytes());
    bytes[22] = (state & 0x03) << 4;
    bytes
}

/// Gateway report relaying `record` as a 62-character advertisement.
#[allow(dead_code)]
pub fn details_report(record: &[u8]) -> String {
    let payload = format!("0201061BFF{}C4D5", hex::encode_upper(record));
    format!(r#"{{"DetailsBLE":{{"mac":"{MAC}","p":"{payload}","RSSI":-64}}}}"#)
}

#[allow(dead_code)]
pub fn write_report(state: &str, written: &str) -> String {
    format!(
        concat!(
            r#"{{"BLEOperation":{{"opid":"7","stat":"3","state":"{state}","MAC":"{mac}","#,
            r#""svc":"FFF0","char":"FFF2","write":"{written}"}}}}"#
        ),
        state = state,
        mac = MAC,
        written = written,
    )
}

/// Feed one unlocked broadcast so the session knows the lock's event counter.
#[allow(dead_code)]
pub fn advertised(mut session: LockSession<Vec<OutboundRequest>>) -> LockSession<Vec<OutboundRequest>> {
    session
        .on_message(&details_report(&broadcast(1, 42, 900)))
        .expect("advertisement");
    session
}

/// Frame of the most recent write request.
#[allow(dead_code)]
pub fn last_frame(session: &LockSession<Vec<OutboundRequest>>) -> String {
    match session.transport().last() {
        Some(OutboundRequest::Write { frame, .. }) => frame.clone(),
        other => panic!("Expected a write request, got {other:?}"),
    }
}
