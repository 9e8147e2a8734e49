// Protocol constants for Airbnk / WeHere BLE locks

/// AES block size used by the cipher primitive
pub const BLOCK_SIZE: usize = 16;

/// Number of opaque trailer bytes at the end of the decoded provisioning blob
pub const PROVISIONING_TRAILER_LEN: usize = 10;

/// Characters dropped from the end of the app key to form the blob key
pub const APP_KEY_SUFFIX_LEN: usize = 4;

/// Size of the command packet buffer
pub const COMMAND_PACKET_SIZE: usize = 36;

/// Bytes of the command packet that carry meaning; the rest stay zero
pub const COMMAND_PACKET_USED: usize = 29;

/// Hex characters carried by the first frame
pub const FRAME1_HEX_LEN: usize = 36;

/// Marker prefixed to the first half of a command packet
pub const FRAME1_MARKER: &str = "FF00";

/// Marker prefixed to the second half of a command packet
pub const FRAME2_MARKER: &str = "FF01";

/// Header of gateway-relayed advertisements
pub const BROADCAST_HEADER: [u8; 2] = [0xBA, 0xBA];

/// Discriminating byte of a generation 1 FFF3 read
pub const V1_MARKER: u8 = 0xF0;

/// Offset of the generation discriminator in an FFF3 read
pub const GENERATION_MARKER_OFFSET: usize = 6;

/// Minimum length of a generation 1 FFF3 read
pub const V1_MIN_LEN: usize = 18;

/// Minimum length of a generation 2 FFF3 read
pub const V2_MIN_LEN: usize = 19;

/// Length of a broadcast record after the BLE framing has been removed
pub const BROADCAST_LEN: usize = 24;

/// Exact length of the hex payload of a relayed advertisement
pub const RELAYED_ADVERT_HEX_LEN: usize = 62;

/// Hex characters of BLE framing in front of the broadcast record
pub const RELAYED_ADVERT_PREFIX_HEX_LEN: usize = 10;

/// Hex offset of the serial number inside a relayed advertisement payload
pub const RELAYED_ADVERT_SERIAL_HEX_OFFSET: usize = 24;

/// Gateway status reported for a successful characteristic write
pub const ACK_SUCCESS: &str = "DONEWRITE";

/// Gateway status for a completed characteristic read
pub const ACK_READ_SUCCESS: &str = "DONEREAD";

/// Prefix shared by every successful gateway status
pub const ACK_DONE_PREFIX: &str = "DONE";

/// GATT service of the lock
pub const SERVICE_UUID: &str = "FFF0";

/// Characteristic command frames are written to
pub const WRITE_CHARACTERISTIC_UUID: &str = "FFF2";

/// Characteristic carrying the lock status record
pub const READ_CHARACTERISTIC_UUID: &str = "FFF3";

/// Advertisement gap (seconds) at which a lock is reported unavailable
pub const DEFAULT_AVAILABILITY_THRESHOLD_SECS: u64 = 30;

/// Device manufacturer reported in the identity
pub const MANUFACTURER: &str = "Airbnk";
