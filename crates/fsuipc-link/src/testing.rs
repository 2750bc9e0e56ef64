//! In-process peer emulation.
//!
//! [`ScriptedSim`] stands in for the simulator host: it owns a request
//! region and a 64 KiB peer address space, and answers notifications the
//! way the real host does, walking the batch up to the terminator,
//! filling read placeholders from its address space, applying writes to
//! it, and echoing every header in place. Failure behavior is scriptable
//! so retry, timeout and rejection paths can be exercised without a
//! simulator installed.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use crate::{
    arena::{MAX_BATCH_BYTES, REGION_SLACK},
    error::{LinkError, NoSimulatorSnafu},
    exchange::Pace,
    handshake::{OFFSET_FSUIPC_VERSION, OFFSET_SIM_VERSION, Simulator},
    transport::{MSG_ACCEPTED, NotifyFault, Transport},
    wire::{OpTag, ReadHeader, WriteHeader, peek_tag},
};

/// Size of the emulated peer address space.
const PEER_SPACE: usize = 0x1_0000;

/// How scripted notification failures present themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    /// The peer never answers within the reply timeout.
    NoReply,
    /// The transport reports an OS error.
    Os,
}

#[derive(Debug, Clone, Copy)]
struct FailPlan {
    skip: u32,
    fails: u32,
    kind: FailKind,
}

/// A scripted simulator host living entirely in this process.
pub struct ScriptedSim {
    region: Vec<u8>,
    capacity: usize,
    memory: Vec<u8>,
    notify_count: Arc<AtomicU32>,
    plan: FailPlan,
    ack_code: u64,
    read_id_skew: u32,
}

impl Default for ScriptedSim {
    fn default() -> Self {
        Self::with_capacity(MAX_BATCH_BYTES)
    }
}

impl ScriptedSim {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            region: vec![0; capacity + REGION_SLACK],
            capacity,
            memory: vec![0; PEER_SPACE],
            notify_count: Arc::new(AtomicU32::new(0)),
            plan: FailPlan {
                skip: 0,
                fails: 0,
                kind: FailKind::NoReply,
            },
            ack_code: MSG_ACCEPTED,
            read_id_skew: 0,
        }
    }

    /// A host whose version fields already pass the handshake checks,
    /// claiming to front the given simulator.
    pub fn live(simulator: Simulator) -> Self {
        let mut sim = Self::default();
        sim.set_u32(OFFSET_FSUIPC_VERSION, 0x5001_0000);
        sim.set_u32(OFFSET_SIM_VERSION, 0xFADE_0000 | simulator as u32);
        sim
    }

    pub fn set_bytes(&mut self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn set_u8(&mut self, offset: u32, value: u8) {
        self.set_bytes(offset, &[value]);
    }

    pub fn set_u16(&mut self, offset: u32, value: u16) {
        self.set_bytes(offset, &value.to_le_bytes());
    }

    pub fn set_u32(&mut self, offset: u32, value: u32) {
        self.set_bytes(offset, &value.to_le_bytes());
    }

    /// Peer-side bytes, for asserting that client writes landed.
    pub fn peer_bytes(&self, offset: u32, len: usize) -> &[u8] {
        &self.memory[offset as usize..offset as usize + len]
    }

    /// Shared counter of notifications this peer has received, usable
    /// after the sim has been moved into a client.
    pub fn notification_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.notify_count)
    }

    /// Succeed the first `skip` notifications, then fail the next `fails`
    /// the given way.
    pub fn fail_notifies(&mut self, skip: u32, fails: u32, kind: FailKind) {
        self.plan = FailPlan { skip, fails, kind };
    }

    /// Acknowledgement code returned instead of accepting batches.
    pub fn set_ack_code(&mut self, code: u64) {
        self.ack_code = code;
    }

    /// Echo read headers with their ids shifted by `skew`, acting as a
    /// corrupted peer for exercising the registry contract.
    pub fn skew_read_ids(&mut self, skew: u32) {
        self.read_id_skew = skew;
    }

    /// Answer the batch in place, the way the host process does.
    fn serve(&mut self) {
        let mut at = 0usize;
        while let Some(tag) = peek_tag(&self.region, at) {
            match OpTag::try_from(tag) {
                Ok(OpTag::Read) => {
                    let Some(mut header) = ReadHeader::decode_at(&self.region, at)
                    else {
                        break;
                    };
                    let start = at + ReadHeader::SIZE;
                    let size = header.size as usize;
                    if start + size > self.region.len() {
                        break;
                    }
                    let src = header.offset as usize;
                    for i in 0..size {
                        self.region[start + i] =
                            self.memory.get(src + i).copied().unwrap_or(0);
                    }
                    if self.read_id_skew != 0 {
                        header.target_id =
                            header.target_id.wrapping_add(self.read_id_skew);
                        self.region[at..at + ReadHeader::SIZE]
                            .copy_from_slice(&header.encode());
                    }
                    at = start + size;
                }
                Ok(OpTag::Write) => {
                    let Some(header) =
                        WriteHeader::decode_at(&self.region, at)
                    else {
                        break;
                    };
                    let start = at + WriteHeader::SIZE;
                    let size = header.size as usize;
                    if start + size > self.region.len() {
                        break;
                    }
                    let dst = header.offset as usize;
                    for i in 0..size {
                        if let Some(slot) = self.memory.get_mut(dst + i) {
                            *slot = self.region[start + i];
                        }
                    }
                    at = start + size;
                }
                Err(_) => break,
            }
        }
    }
}

impl Transport for ScriptedSim {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn region(&mut self) -> &mut [u8] {
        &mut self.region
    }

    fn notify(&mut self, _reply_timeout: Duration) -> Result<u64, NotifyFault> {
        self.notify_count.fetch_add(1, Ordering::SeqCst);

        if self.plan.skip > 0 {
            self.plan.skip -= 1;
        } else if self.plan.fails > 0 {
            self.plan.fails = self.plan.fails.saturating_sub(1);
            return Err(match self.plan.kind {
                FailKind::NoReply => NotifyFault::NoReply,
                FailKind::Os => NotifyFault::Os(io::Error::other(
                    "scripted transport failure",
                )),
            });
        }

        if self.ack_code != MSG_ACCEPTED {
            return Ok(self.ack_code);
        }
        self.serve();
        Ok(MSG_ACCEPTED)
    }
}

/// Connector serving a fixed queue of scripted peers, then `NoSimulator`
/// once the queue runs dry.
pub fn queue_connector(
    sims: Vec<ScriptedSim>,
) -> impl FnMut() -> Result<ScriptedSim, LinkError> + Send {
    let mut queue: VecDeque<ScriptedSim> = sims.into();
    move || queue.pop_front().ok_or_else(|| NoSimulatorSnafu.build())
}

/// A pace that records every requested pause instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct CountingPace(Arc<Mutex<Vec<Duration>>>);

impl CountingPace {
    pub fn pauses(&self) -> Vec<Duration> {
        self.0.lock().expect("pause log poisoned").clone()
    }
}

impl Pace for CountingPace {
    fn pause(&mut self, delay: Duration) {
        self.0.lock().expect("pause log poisoned").push(delay);
    }
}
