//! Lock status records: FFF3 characteristic reads and gateway-relayed broadcasts.
//!
//! Two hardware generations answer FFF3 reads with different layouts; the
//! discriminator is byte 6 (`0xF0` for generation 1). Relayed advertisements always use
//! the `BA BA` broadcast layout, whose flag byte matches generation 2.

use bytes::Buf;
use modular_bitfield::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

use crate::constants::{
    BROADCAST_HEADER, BROADCAST_LEN, GENERATION_MARKER_OFFSET, V1_MARKER, V1_MIN_LEN, V2_MIN_LEN,
};
use crate::error::LockError;

/// Lock state with the numeric codes used by the 2-bit state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum LockState {
    #[strum(to_string = "Locked")]
    Locked = 0,
    #[strum(to_string = "Unlocked")]
    Unlocked = 1,
    #[strum(to_string = "Jammed")]
    Jammed = 2,
    #[strum(to_string = "Operating")]
    Operating = 3,
    #[strum(to_string = "Failed")]
    Failed = 4,
}

impl LockState {
    /// State from the 2-bit field of broadcast and generation 2 records.
    pub fn from_code(code: u8) -> Self {
        LockState::try_from(code & 0x03).unwrap_or(LockState::Jammed)
    }

    /// State from the 3-bit field of generation 1 records.
    pub fn from_v1_code(code: u8) -> Self {
        match code & 0x07 {
            0 | 5 => LockState::Unlocked,
            1 | 4 => LockState::Locked,
            _ => LockState::Jammed,
        }
    }
}

/// Which layout a status record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Generation {
    /// Generation 1 FFF3 read
    V1,
    /// Generation 2 FFF3 read
    V2,
    /// Gateway-relayed `BA BA` advertisement
    Broadcast,
}

impl Generation {
    /// Pick the FFF3 layout from the discriminating byte.
    pub fn detect(bytes: &[u8]) -> Result<Self, LockError> {
        let marker = *bytes.get(GENERATION_MARKER_OFFSET).ok_or(LockError::InsufficientData {
            expected: GENERATION_MARKER_OFFSET + 1,
            actual: bytes.len(),
        })?;
        Ok(if marker == V1_MARKER {
            Generation::V1
        } else {
            Generation::V2
        })
    }

    pub fn min_len(&self) -> usize {
        match self {
            Generation::V1 => V1_MIN_LEN,
            Generation::V2 => V2_MIN_LEN,
            Generation::Broadcast => BROADCAST_LEN,
        }
    }
}

/// Flag byte of broadcast and generation 2 records.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusFlags {
    pub back_lock: bool,
    pub initialized: bool,
    pub image_a: bool,
    pub new_record: bool,
    pub state: B2,
    pub auto_unlock: bool,
    pub left_open: bool,
}

/// Flag byte of generation 1 records.
///
/// The top bit of `state` doubles as an inverted left-open flag.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusFlagsV1 {
    pub back_lock: bool,
    pub initialized: bool,
    pub image_a: bool,
    pub new_record: bool,
    pub state: B3,
    pub auto_unlock: bool,
}

/// Byte following the flag byte.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxFlags {
    #[skip]
    unused: B4,
    pub low_battery: bool,
    pub magnet_state: B2,
    pub magnet_enabled: bool,
}

/// Decoded flag bits, independent of the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockFlags {
    pub back_lock: bool,
    pub initialized: bool,
    pub image_a: bool,
    pub new_record: bool,
    pub auto_unlock: bool,
    pub left_open: bool,
    pub low_battery: bool,
    pub magnet_state: u8,
    pub magnet_enabled: bool,
}

impl LockFlags {
    fn from_status(status: StatusFlags, aux: AuxFlags) -> Self {
        Self {
            back_lock: status.back_lock(),
            initialized: status.initialized(),
            image_a: status.image_a(),
            new_record: status.new_record(),
            auto_unlock: status.auto_unlock(),
            left_open: status.left_open(),
            ..Self::from_aux(aux)
        }
    }

    fn from_status_v1(status: StatusFlagsV1, aux: AuxFlags) -> Self {
        Self {
            back_lock: status.back_lock(),
            initialized: status.initialized(),
            image_a: status.image_a(),
            new_record: status.new_record(),
            auto_unlock: status.auto_unlock(),
            left_open: status.state() & 0b100 == 0,
            ..Self::from_aux(aux)
        }
    }

    fn from_aux(aux: AuxFlags) -> Self {
        Self {
            low_battery: aux.low_battery(),
            magnet_state: aux.magnet_state(),
            magnet_enabled: aux.magnet_enabled(),
            ..Default::default()
        }
    }
}

/// Snapshot of the lock status carried by one record.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementRecord {
    pub generation: Generation,
    pub lock_state: LockState,
    /// Battery level, 0.0-100.0
    pub battery: f64,
    pub event_counter: u32,
    /// `major.minor.patch`; generation 2 reads carry none
    pub firmware_version: Option<String>,
    /// Generation 2 only
    pub utc_minutes: Option<u32>,
    /// Broadcast only
    pub board_model: Option<u8>,
    /// Broadcast only
    pub long_software_version: Option<u8>,
    /// Broadcast only, 24-bit
    pub software_version: Option<u32>,
    /// Broadcast only, NUL-trimmed
    pub serial_number: Option<String>,
    pub flags: LockFlags,
}

impl AdvertisementRecord {
    /// Decode a record of a known generation.
    ///
    /// `expected_serial` is checked against broadcast records, which carry one.
    pub fn decode(bytes: &[u8], generation: Generation, expected_serial: Option<&str>) -> Result<Self, LockError> {
        if bytes.len() < generation.min_len() {
            return Err(LockError::InsufficientData {
                expected: generation.min_len(),
                actual: bytes.len(),
            });
        }
        match generation {
            Generation::V1 => Ok(decode_v1(bytes)),
            Generation::V2 => Ok(decode_v2(bytes)),
            Generation::Broadcast => decode_broadcast(bytes, expected_serial),
        }
    }

    /// Decode an FFF3 characteristic read, detecting the generation.
    pub fn decode_characteristic(bytes: &[u8]) -> Result<Self, LockError> {
        let generation = Generation::detect(bytes)?;
        Self::decode(bytes, generation, None)
    }

    /// Re-encode in the 24-byte broadcast layout.
    pub fn to_broadcast_bytes(&self, serial_number: &str) -> [u8; BROADCAST_LEN] {
        let mut out = [0u8; BROADCAST_LEN];
        out[..2].copy_from_slice(&BROADCAST_HEADER);
        out[2] = self.board_model.unwrap_or(0);
        out[3] = self.long_software_version.unwrap_or(0);

        let version = match (&self.software_version, &self.firmware_version) {
            (Some(v), _) => *v,
            (None, Some(text)) => firmware_to_u24(text),
            (None, None) => 0,
        };
        out[4..7].copy_from_slice(&version.to_be_bytes()[1..]);

        let serial = serial_number.as_bytes();
        let n = serial.len().min(9);
        out[7..7 + n].copy_from_slice(&serial[..n]);

        let battery = (self.battery * 10.0).round().clamp(0.0, u16::MAX as f64) as u16;
        out[16..18].copy_from_slice(&battery.to_be_bytes());
        out[18..22].copy_from_slice(&self.event_counter.to_be_bytes());

        let state_code = match self.lock_state {
            LockState::Locked => 0,
            LockState::Unlocked => 1,
            LockState::Jammed | LockState::Failed => 2,
            LockState::Operating => 3,
        };
        let status = StatusFlags::new()
            .with_back_lock(self.flags.back_lock)
            .with_initialized(self.flags.initialized)
            .with_image_a(self.flags.image_a)
            .with_new_record(self.flags.new_record)
            .with_state(state_code)
            .with_auto_unlock(self.flags.auto_unlock)
            .with_left_open(self.flags.left_open);
        let aux = AuxFlags::new()
            .with_low_battery(self.flags.low_battery)
            .with_magnet_state(self.flags.magnet_state & 0x03)
            .with_magnet_enabled(self.flags.magnet_enabled);
        out[22] = status.into_bytes()[0];
        out[23] = aux.into_bytes()[0];
        out
    }
}

fn firmware_to_u24(text: &str) -> u32 {
    text.split('.')
        .take(3)
        .map(|part| part.parse::<u8>().unwrap_or(0) as u32)
        .fold(0, |acc, part| (acc << 8) | part)
}

fn decode_v1(bytes: &[u8]) -> AdvertisementRecord {
    let firmware_version = format!("{}.{}.{}", bytes[7], bytes[8], bytes[9]);

    let mut buf = &bytes[10..];
    let event_counter = buf.get_u32();
    let battery = buf.get_u16() as f64 / 100.0;

    let status = StatusFlagsV1::from_bytes([bytes[16]]);
    let aux = AuxFlags::from_bytes([bytes[17]]);

    AdvertisementRecord {
        generation: Generation::V1,
        lock_state: LockState::from_v1_code(status.state()),
        battery,
        event_counter,
        firmware_version: Some(firmware_version),
        utc_minutes: None,
        board_model: None,
        long_software_version: None,
        software_version: None,
        serial_number: None,
        flags: LockFlags::from_status_v1(status, aux),
    }
}

fn decode_v2(bytes: &[u8]) -> AdvertisementRecord {
    let mut buf = &bytes[8..];
    let event_counter = buf.get_u32();
    let utc_minutes = buf.get_u32();
    let battery = buf.get_u8() as f64 / 10.0;

    let status = StatusFlags::from_bytes([bytes[17]]);
    let aux = AuxFlags::from_bytes([bytes[18]]);

    AdvertisementRecord {
        generation: Generation::V2,
        lock_state: LockState::from_code(status.state()),
        battery,
        event_counter,
        firmware_version: None,
        utc_minutes: Some(utc_minutes),
        board_model: None,
        long_software_version: None,
        software_version: None,
        serial_number: None,
        flags: LockFlags::from_status(status, aux),
    }
}

fn decode_broadcast(bytes: &[u8], expected_serial: Option<&str>) -> Result<AdvertisementRecord, LockError> {
    let header = [bytes[0], bytes[1]];
    if header != BROADCAST_HEADER {
        return Err(LockError::HeaderMismatch {
            expected: BROADCAST_HEADER,
            actual: header,
        });
    }

    let serial_number = std::str::from_utf8(&bytes[7..16])
        .map_err(|_| LockError::InvalidPacket("serial number is not UTF-8".to_string()))?
        .trim_matches('\0')
        .to_string();
    if let Some(expected) = expected_serial {
        if serial_number != expected {
            return Err(LockError::SerialMismatch {
                expected: expected.to_string(),
                actual: serial_number,
            });
        }
    }

    let mut buf = &bytes[2..7];
    let board_model = buf.get_u8();
    let long_software_version = buf.get_u8();
    let software_version = buf.get_uint(3) as u32;

    let mut buf = &bytes[16..22];
    let battery = buf.get_u16() as f64 / 10.0;
    let event_counter = buf.get_u32();

    let status = StatusFlags::from_bytes([bytes[22]]);
    let aux = AuxFlags::from_bytes([bytes[23]]);

    Ok(AdvertisementRecord {
        generation: Generation::Broadcast,
        lock_state: LockState::from_code(status.state()),
        battery,
        event_counter,
        firmware_version: Some(format!("{}.{}.{}", bytes[4], bytes[5], bytes[6])),
        utc_minutes: None,
        board_model: Some(board_model),
        long_software_version: Some(long_software_version),
        software_version: Some(software_version),
        serial_number: Some(serial_number),
        flags: LockFlags::from_status(status, aux),
    })
}
