//! Protocol constants for the Tarantool binary protocol.

/// First byte of every frame: the MessagePack `uint32` tag.
pub const FRAME_MARKER: u8 = 0xce;

/// Size of the frame prefix (marker plus 32-bit big-endian length).
pub const FRAME_PREFIX_SIZE: usize = 5;

/// Size of the server greeting in bytes.
pub const GREETING_SIZE: usize = 128;

/// Size of one greeting line.
pub const GREETING_LINE_SIZE: usize = 64;

/// Banner every greeting must start with.
pub const GREETING_BANNER: &str = "Tarantool";

/// Number of salt bytes used by the CHAP-SHA1 scramble.
pub const SCRAMBLE_SIZE: usize = 20;

/// Authentication mechanism name.
pub const CHAP_SHA1: &str = "chap-sha1";

/// Bit set in the response code when the request failed.
pub const ERROR_TYPE_MARKER: u32 = 0x8000;

// Header keys.

/// Request type / response code.
pub const KEY_CODE: u64 = 0x00;
/// Request correlation id.
pub const KEY_SYNC: u64 = 0x01;
/// Schema version.
pub const KEY_SCHEMA_ID: u64 = 0x05;

// Body keys.

/// Space id.
pub const KEY_SPACE: u64 = 0x10;
/// Index id.
pub const KEY_INDEX: u64 = 0x11;
/// Select limit.
pub const KEY_LIMIT: u64 = 0x12;
/// Select offset.
pub const KEY_OFFSET: u64 = 0x13;
/// Select iterator type.
pub const KEY_ITERATOR: u64 = 0x14;
/// Index key.
pub const KEY_KEY: u64 = 0x20;
/// Tuple, update operations or call arguments.
pub const KEY_TUPLE: u64 = 0x21;
/// Function name.
pub const KEY_FUNCTION: u64 = 0x22;
/// User name.
pub const KEY_USERNAME: u64 = 0x23;
/// Lua expression.
pub const KEY_EXPRESSION: u64 = 0x27;
/// Upsert operations.
pub const KEY_UPSERT_OPS: u64 = 0x28;
/// Response payload.
pub const KEY_DATA: u64 = 0x30;
/// Error message.
pub const KEY_ERROR: u64 = 0x31;

/// Server error: the instance is read-only.
pub const ER_READONLY: u32 = 7;
/// Server error: operation timed out.
pub const ER_TIMEOUT: u32 = 78;
/// Server error: the instance is still loading.
pub const ER_LOADING: u32 = 116;
/// Server error: the local instance id is read-only.
pub const ER_LOCAL_INSTANCE_ID_IS_READ_ONLY: u32 = 128;
