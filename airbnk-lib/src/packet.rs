use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use tracing::debug;

use crate::cipher;
use crate::constants::{
    BLOCK_SIZE, COMMAND_PACKET_SIZE, COMMAND_PACKET_USED, FRAME1_HEX_LEN, FRAME1_MARKER, FRAME2_MARKER,
};
use crate::error::LockError;
use crate::signing::{self, VERIFICATION_CODE_SIZE};

const HEADER: [u8; 3] = [0xAA, 0x10, 0x1A];
const PROTOCOL_VERSION: u8 = 0x03;
const OPCODE_BASE: u8 = 0x10;
const OPCODE_FLAG: u8 = 0x01;

const OPCODE_OFFSET: usize = 5;
const FLAG_OFFSET: usize = 8;
const TIMESTAMP_OFFSET: usize = 9;
const ENCRYPTED_START: usize = 4;
const ENCRYPTED_PLAIN_END: usize = 18;
const ENCRYPTED_END: usize = 20;
const SIGNED_START: usize = 3;
const CODE_OFFSET: usize = 20;
const CHECKSUM_OFFSET: usize = 28;

/// Direction of a lock operation as carried in the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum LockDirection {
    #[strum(to_string = "unlock")]
    Unlock = 1,
    #[strum(to_string = "lock")]
    Lock = 2,
}

impl LockDirection {
    /// Opcode byte placed at offset 5
    pub fn opcode(&self) -> u8 {
        OPCODE_BASE + u8::from(*self)
    }
}

/// The 36-byte signed command sent to the lock.
///
/// Layout (29 meaningful bytes):
/// - 0x00-0x02: header `AA 10 1A`
/// - 0x03-0x04: protocol version `03 03` (0x04 is inside the encrypted block)
/// - 0x04-0x13: AES block over opcode, reserved byte, flag, BE timestamp, 5 zero bytes
/// - 0x14-0x1B: verification code over bytes 0x03-0x13
/// - 0x1C: checksum, sum of bytes 0x03-0x1B
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPacket {
    bytes: [u8; COMMAND_PACKET_SIZE],
}

impl CommandPacket {
    pub fn build(
        direction: LockDirection,
        timestamp: u32,
        manufacturer_key: &[u8],
        working_key: &[u8],
        counter: u32,
    ) -> Result<Self, LockError> {
        let key = manufacturer_key
            .get(..BLOCK_SIZE)
            .ok_or(LockError::InvalidKeyLength(manufacturer_key.len()))?;

        let mut bytes = [0u8; COMMAND_PACKET_SIZE];
        bytes[..3].copy_from_slice(&HEADER);
        bytes[3] = PROTOCOL_VERSION;
        bytes[4] = PROTOCOL_VERSION;
        bytes[OPCODE_OFFSET] = direction.opcode();
        bytes[FLAG_OFFSET] = OPCODE_FLAG;
        bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4].copy_from_slice(&timestamp.to_be_bytes());

        let encrypted = cipher::encrypt(key, &bytes[ENCRYPTED_START..ENCRYPTED_PLAIN_END])?;
        bytes[ENCRYPTED_START..ENCRYPTED_END].copy_from_slice(&encrypted[..BLOCK_SIZE]);

        let code = signing::verification_code(working_key, counter, &bytes[SIGNED_START..ENCRYPTED_END]);
        bytes[CODE_OFFSET..CODE_OFFSET + VERIFICATION_CODE_SIZE].copy_from_slice(&code);

        bytes[CHECKSUM_OFFSET] = checksum(&bytes[SIGNED_START..CHECKSUM_OFFSET]);

        debug!(%direction, timestamp, counter, "built command packet");
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_PACKET_SIZE] {
        &self.bytes
    }

    /// The bytes the lock interprets; the remainder is zero filler.
    pub fn meaningful(&self) -> &[u8] {
        &self.bytes[..COMMAND_PACKET_USED]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[CHECKSUM_OFFSET]
    }

    /// Uppercase hex of the whole 36-byte buffer.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }

    pub fn frames(&self) -> FramePair {
        split_into_frames(&self.to_hex())
    }
}

/// Sum of `data` modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// The two characteristic writes carrying one command packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePair {
    pub frame1: String,
    pub frame2: String,
}

impl FramePair {
    /// Hex of the full packet with both markers stripped.
    pub fn reassemble(&self) -> String {
        let first = self.frame1.strip_prefix(FRAME1_MARKER).unwrap_or(&self.frame1);
        let second = self.frame2.strip_prefix(FRAME2_MARKER).unwrap_or(&self.frame2);
        format!("{first}{second}")
    }

    /// Which frame an echoed write payload corresponds to, if any.
    pub fn position_of(&self, written: &str) -> Option<FramePosition> {
        if written.eq_ignore_ascii_case(&self.frame1) {
            Some(FramePosition::First)
        } else if written.eq_ignore_ascii_case(&self.frame2) {
            Some(FramePosition::Second)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    First,
    Second,
}

/// Split a packet hex string into the `FF00` and `FF01` frames.
pub fn split_into_frames(hex: &str) -> FramePair {
    let cut = hex
        .char_indices()
        .nth(FRAME1_HEX_LEN)
        .map(|(i, _)| i)
        .unwrap_or(hex.len());
    let (first, second) = hex.split_at(cut);
    FramePair {
        frame1: format!("{FRAME1_MARKER}{first}"),
        frame2: format!("{FRAME2_MARKER}{second}"),
    }
}
