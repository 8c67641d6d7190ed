/// Separator used when joining the two participants of a direct conversation.
pub const DIRECT_ID_SEPARATOR: char = '_';

/// Prefix of every generated group conversation id.
pub const GROUP_ID_PREFIX: &str = "grp-";

/// Maximum length of a user id in bytes
pub const MAX_ID_LEN: usize = 128;

/// Minimum number of participants in a group, creator included
pub const MIN_GROUP_SIZE: usize = 3;

/// Default maximum text message length in bytes (16 KiB)
pub const DEFAULT_MAX_TEXT_LEN: usize = 16 * 1024;

/// Default maximum attachment handle length in bytes
pub const DEFAULT_MAX_HANDLE_LEN: usize = 2048;

/// Default window during which a client request id is remembered
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 300;

/// Default per-listener buffer before a listener is considered lagging
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
