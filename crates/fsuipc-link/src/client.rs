//! The public client: connection lifecycle, request queueing, exchange.

use std::{collections::HashMap, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    arena::RequestArena,
    error::{AlreadyOpenSnafu, LinkError, NoDataSnafu, NotOpenSnafu},
    exchange::{self, Pace, RetryPolicy, ThreadPace},
    handshake::{FieldWidth, LIBRARY_VERSION, Simulator, VersionInfo},
    transport::Transport,
    wire::{ReadHeader, WriteHeader},
};

/// Binds a queued read to the bytes the peer echoes back for it.
///
/// A handle is only good for the batch it was queued in; after the next
/// exchange completes, handles from older batches stop resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHandle {
    id: u32,
}

/// Client end of one shared-memory channel to a simulator host.
///
/// The channel is strictly single-threaded and synchronous: one batch is
/// queued at a time, [`flush`](Self::flush) blocks until the peer answers
/// or the retry schedule is exhausted, and the next batch must not be
/// queued until the previous flush has returned (the borrow checker
/// enforces this within one thread). Tearing the channel down while a
/// flush is in flight is not supported.
pub struct FsuipcLink<T: Transport> {
    connect: Box<dyn FnMut() -> Result<T, LinkError> + Send>,
    transport: Option<T>,
    arena: RequestArena,
    /// Read id -> expected length, drained by every response decode.
    pending: HashMap<u32, usize>,
    /// Read id -> echoed bytes from the last completed exchange.
    results: HashMap<u32, Vec<u8>>,
    next_id: u32,
    policy: RetryPolicy,
    pace: Box<dyn Pace + Send>,
    version: VersionInfo,
    width: FieldWidth,
}

impl<T: Transport> FsuipcLink<T> {
    /// Build a closed client. `connect` is invoked by every
    /// [`open`](Self::open) to acquire a fresh transport.
    pub fn with_connector(
        connect: impl FnMut() -> Result<T, LinkError> + Send + 'static,
    ) -> Self {
        Self {
            connect: Box::new(connect),
            transport: None,
            arena: RequestArena::new(0),
            pending: HashMap::new(),
            results: HashMap::new(),
            next_id: 0,
            policy: RetryPolicy::default(),
            pace: Box::new(ThreadPace),
            version: VersionInfo {
                library: LIBRARY_VERSION,
                ..VersionInfo::default()
            },
            width: FieldWidth::Unknown,
        }
    }

    /// Replace the retry schedule used for exchanges.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Replace the waiting strategy. Tests inject a recording pace here.
    pub fn set_pace(&mut self, pace: impl Pace + Send + 'static) {
        self.pace = Box::new(pace);
    }

    pub(crate) fn pause(&mut self, delay: Duration) {
        self.pace.pause(delay);
    }

    /// True iff a mapped view to the peer is live.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Acquire the channel and run the handshake.
    ///
    /// Opening an already open client fails with `AlreadyOpen` and leaves
    /// the live channel untouched. Any failure after acquisition tears the
    /// fresh channel down completely before reporting.
    pub fn open(&mut self, requested: Simulator) -> Result<(), LinkError> {
        if self.is_open() {
            return AlreadyOpenSnafu.fail();
        }

        let transport = (self.connect)()?;
        self.arena = RequestArena::new(transport.capacity());
        self.transport = Some(transport);
        self.pending.clear();
        self.results.clear();

        match self.negotiate(requested) {
            Ok(version) => {
                self.version = version;
                self.width = self.probe_field_width();
                info!(
                    simulator = version.simulator,
                    width = ?self.width,
                    "channel open"
                );
                Ok(())
            }
            Err(err) => {
                warn!(%err, "handshake failed, tearing the channel down");
                self.teardown();
                Err(err)
            }
        }
    }

    /// Release the channel. Closing a closed client fails with `NotOpen`;
    /// closing twice is otherwise harmless.
    pub fn close(&mut self) -> Result<(), LinkError> {
        if !self.is_open() {
            return NotOpenSnafu.fail();
        }
        self.teardown();
        info!("channel closed");
        Ok(())
    }

    /// Best-effort release of everything the channel holds. Resource
    /// release failures surface only through the transport's drop logging.
    fn teardown(&mut self) {
        self.transport = None;
        self.arena.rewind();
        self.pending.clear();
        self.results.clear();
        self.version = VersionInfo {
            library: LIBRARY_VERSION,
            ..VersionInfo::default()
        };
        self.width = FieldWidth::Unknown;
    }

    /// Versions negotiated at open time, while the channel is open.
    pub fn version(&self) -> Option<VersionInfo> {
        self.is_open().then_some(self.version)
    }

    /// Field width negotiated at open time (or by the last re-probe).
    pub fn field_width(&self) -> FieldWidth {
        self.width
    }

    /// Run the width probe again on an open channel, for callers that saw
    /// `Unknown` at open time and want to retry once the simulator has
    /// data.
    pub fn refresh_field_width(&mut self) -> Result<FieldWidth, LinkError> {
        if !self.is_open() {
            return NotOpenSnafu.fail();
        }
        self.width = self.probe_field_width();
        Ok(self.width)
    }

    /// Bytes the current batch occupies in the shared region.
    pub fn batch_bytes(&self) -> usize {
        self.arena.used()
    }

    /// Queue a read of `len` bytes at `offset` in the peer's address
    /// space. The echoed bytes become available through the returned
    /// handle once the batch is flushed.
    pub fn queue_read(
        &mut self,
        offset: u32,
        len: usize,
    ) -> Result<ReadHandle, LinkError> {
        let transport =
            self.transport.as_mut().ok_or_else(|| NotOpenSnafu.build())?;

        let id = self.next_id;
        let header = ReadHeader::new(offset, len as u32, id);
        self.arena.push_read(transport.region(), header)?;

        self.next_id = self.next_id.wrapping_add(1);
        self.pending.insert(id, len);
        Ok(ReadHandle { id })
    }

    /// Queue a write of `payload` at `offset` in the peer's address space.
    pub fn queue_write(
        &mut self,
        offset: u32,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let transport =
            self.transport.as_mut().ok_or_else(|| NotOpenSnafu.build())?;

        let header = WriteHeader::new(offset, payload.len() as u32);
        self.arena.push_write(transport.region(), header, payload)
    }

    /// Run one full exchange for the queued batch: terminate, notify the
    /// peer, wait for the acknowledgement, decode the in-place responses.
    ///
    /// An empty batch fails with `NoData` before any notification goes
    /// out. Whatever the outcome, the write cursor ends up back at the
    /// start of the region, ready for the next batch. On failure the
    /// results of the last successful exchange stay readable.
    ///
    /// # Panics
    ///
    /// If the peer echoes a read id this client never issued: request
    /// bookkeeping and buffer contents have come apart, which is a bug,
    /// not an environmental failure.
    pub fn flush(&mut self) -> Result<(), LinkError> {
        let transport =
            self.transport.as_mut().ok_or_else(|| NotOpenSnafu.build())?;
        if self.arena.is_empty() {
            return NoDataSnafu.fail();
        }

        self.arena.terminate(transport.region());
        debug!(pending = self.pending.len(), "exchanging request batch");

        exchange::notify_with_retry(
            transport,
            self.policy,
            self.pace.as_mut(),
        )?;
        self.results =
            exchange::decode_responses(transport.region(), &mut self.pending);
        Ok(())
    }

    /// Bytes the peer echoed for this read in the last completed exchange.
    pub fn result_bytes(&self, handle: &ReadHandle) -> Option<&[u8]> {
        self.results.get(&handle.id).map(Vec::as_slice)
    }

    pub fn result_u8(&self, handle: &ReadHandle) -> Option<u8> {
        self.result_bytes(handle)?.first().copied()
    }

    pub fn result_u16(&self, handle: &ReadHandle) -> Option<u16> {
        let bytes = self.result_bytes(handle)?.get(..2)?;
        Some(u16::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn result_u32(&self, handle: &ReadHandle) -> Option<u32> {
        let bytes = self.result_bytes(handle)?.get(..4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }
}

#[cfg(windows)]
impl FsuipcLink<crate::win::SimWindowTransport> {
    /// Client over the real simulator window, the usual entry point on
    /// Windows.
    pub fn new() -> Self {
        Self::with_connector(crate::win::SimWindowTransport::connect)
    }
}

#[cfg(windows)]
impl Default for FsuipcLink<crate::win::SimWindowTransport> {
    fn default() -> Self {
        Self::new()
    }
}
