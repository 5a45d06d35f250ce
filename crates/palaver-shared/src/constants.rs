/// Application name
pub const APP_NAME: &str = "Palaver";

/// Seconds a call may ring before it is marked missed
pub const DEFAULT_RING_TIMEOUT_SECS: u64 = 30;

/// Maximum message body length in characters
pub const MAX_MESSAGE_BODY_CHARS: usize = 10_000;

/// Maximum display name length in characters
pub const MAX_NAME_CHARS: usize = 120;

/// Maximum group name length in characters
pub const MAX_GROUP_NAME_CHARS: usize = 100;

/// Maximum file upload size in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default and maximum page size for message listings
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Prefixes for the media channel names handed to the calling SDK
pub const PERSONAL_CALL_CHANNEL_PREFIX: &str = "call-";
pub const GROUP_CALL_CHANNEL_PREFIX: &str = "group-call-";
