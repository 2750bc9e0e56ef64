//! The seam between the protocol logic and the operating system.

use std::{io, time::Duration};

/// Acknowledgement code meaning the peer handled and accepted the batch.
pub const MSG_ACCEPTED: u64 = 1;

/// A notification attempt that produced no usable acknowledgement.
#[derive(Debug)]
pub enum NotifyFault {
    /// The send ran out of time without the transport reporting an error.
    NoReply,
    /// The transport itself failed.
    Os(io::Error),
}

/// One shared channel to the peer: the mapped request region plus a way to
/// wake the peer up.
///
/// Implementations own the OS resources backing the channel and release
/// them on drop, best-effort, in reverse acquisition order; release
/// failures are observable only through logging.
pub trait Transport {
    /// Usable request capacity. The mapped region is larger than this by at
    /// least one tag width so the batch terminator always fits.
    fn capacity(&self) -> usize;

    /// The mapped request/response region.
    fn region(&mut self) -> &mut [u8];

    /// Deliver one notification to the peer and wait up to `reply_timeout`
    /// for its acknowledgement code. Retrying is the caller's business.
    fn notify(&mut self, reply_timeout: Duration) -> Result<u64, NotifyFault>;
}
