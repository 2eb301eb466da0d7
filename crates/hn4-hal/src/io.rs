//! I/O request/completion shapes for `sync_io`/`submit_io`/`poll`.

/// Operation kind for `sync_io`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoOp {
    Read,
    Write,
    Discard,
    ZoneReset,
    /// Zone-append. The device chooses the landing LBA; see
    /// [`IoOutcome::landed_lba`].
    ZoneAppend,
}

/// Outcome of a completed `sync_io`/async completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoOutcome {
    /// For `ZoneAppend`, the LBA the device actually chose. Equal to the
    /// requested LBA for every other op.
    pub landed_lba: u64,
    pub sectors_done: u32,
}

/// A queued asynchronous I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    pub op: IoOp,
    pub lba: u64,
    pub sectors: u32,
}

/// Opaque handle returned by `submit_io`, presented back by `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoToken(pub u64);

/// A completion surfaced by `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCompletion {
    pub token: IoToken,
    pub result: Result<IoOutcome, crate::error::HalError>,
}
