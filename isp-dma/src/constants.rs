/// Maximum number of buffers a single port's pool can hold.
pub const MAX_BUFFERS: usize = 16;

/// Maximum number of planes per buffer (Y, U, V).
pub const MAX_PLANES: usize = 3;

/// Number of DMA ports: memory input, codec output, display output.
pub const PORT_COUNT: usize = 3;

/// Buffers the driver keeps in flight in normal capture mode.
pub const MIN_DRV_BUF: usize = 2;

/// Required alignment, in bytes, of every plane address handed to the DMA engine.
pub const DMA_ALIGN: u32 = 8;

/// Largest number of completion events one codec frame may be split into.
pub const MAX_EOF_MULTIPLEX: u32 = 4;

/// Number of times `stop()` polls a port for idle before giving up.
pub const STATUS_POLL_RETRIES: u32 = 20;

/// Delay between two idle polls, in microseconds.
pub const STATUS_POLL_INTERVAL_US: u32 = 500;

/// Consecutive stop timeouts after which every port is forced down.
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;
