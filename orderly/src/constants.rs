use std::time::Duration;

/// Attribute set by the broker on topics bound to a schema. Its value names
/// the payload encoding.
pub const ENCODING_ATTRIBUTE: &str = "googclient_schemaencoding";

/// Initial capacity of a freshly created per-key queue or buffer. Most keys
/// carry a handful of messages at a time.
pub const KEY_QUEUE_CAPACITY: usize = 8;

/// Pause between pull attempts after a transient transport failure.
pub const PULL_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// How long a pull keeps retrying transient failures by default.
pub const DEFAULT_PULL_DEADLINE: Duration = Duration::from_secs(5);
