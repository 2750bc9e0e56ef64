use snafu::{Backtrace, Snafu};

use crate::handshake::Simulator;

/// Everything that can go wrong on the client side of the channel.
///
/// Every public operation reports failure through exactly one of these
/// kinds; nothing panics across the crate boundary except the decode
/// contract violation documented on
/// [`FsuipcLink::flush`](crate::FsuipcLink::flush).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LinkError {
    #[snafu(display("the connection is already open"))]
    AlreadyOpen,

    #[snafu(display("no simulator window found"))]
    NoSimulator,

    #[snafu(display("failed to register the IPC window message: {source}"))]
    RegisterMessage {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("failed to register the channel name atom: {source}"))]
    CreateAtom {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("failed to create the shared request region: {source}"))]
    CreateMapping {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("failed to map a view of the shared request region: {source}"))]
    CreateView {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "simulator published implausible version data (fsuipc {fsuipc:#010x}, simulator {simulator:#010x})"
    ))]
    VersionMismatch { fsuipc: u32, simulator: u32 },

    #[snafu(display("wrong simulator: requested {requested}, found {found}"))]
    WrongSimulator { requested: Simulator, found: u32 },

    #[snafu(display("there is no active connection"))]
    NotOpen,

    #[snafu(display("no operations queued, nothing to exchange"))]
    NoData,

    #[snafu(display("peer did not acknowledge the request batch after {attempts} attempts"))]
    Timeout { attempts: u32 },

    #[snafu(display("failed to deliver the request message after {attempts} attempts: {source}"))]
    SendFailed {
        attempts: u32,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("peer rejected the request batch (acknowledgement {code:#x})"))]
    RejectedData { code: u64 },

    #[snafu(display("simulator is not running (version fields stayed zero)"))]
    NotRunning,

    #[snafu(display("request of {needed} bytes exceeds the {free} bytes left in the batch"))]
    BufferFull { needed: usize, free: usize },
}
