//! One full exchange: notify the peer, wait for its acknowledgement, then
//! decode the responses it wrote over the request stream.

use std::{collections::HashMap, time::Duration};

use snafu::ResultExt;
use tracing::{debug, trace};

use crate::{
    error::{LinkError, RejectedDataSnafu, SendFailedSnafu, TimeoutSnafu},
    transport::{MSG_ACCEPTED, NotifyFault, Transport},
    wire::{OpTag, ReadHeader, WriteHeader, peek_tag},
};

/// Bounded-retry schedule for notifying the peer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// How many notification attempts before giving up.
    pub attempts: u32,
    /// How long each attempt blocks waiting for the acknowledgement.
    pub reply_timeout: Duration,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            reply_timeout: Duration::from_secs(2),
            backoff: Duration::from_millis(100),
        }
    }
}

/// Injectable waiting, so retry and handshake timing can be simulated
/// deterministically in tests.
pub trait Pace {
    fn pause(&mut self, delay: Duration);
}

/// Real wall-clock pacing.
#[derive(Debug, Default)]
pub struct ThreadPace;

impl Pace for ThreadPace {
    fn pause(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Wake the peer up, retrying transient delivery failures on the policy's
/// schedule. A rejection is final and is not retried.
pub(crate) fn notify_with_retry<T: Transport>(
    transport: &mut T,
    policy: RetryPolicy,
    pace: &mut dyn Pace,
) -> Result<(), LinkError> {
    let mut last_fault = NotifyFault::NoReply;

    for attempt in 1..=policy.attempts {
        match transport.notify(policy.reply_timeout) {
            Ok(code) if code == MSG_ACCEPTED => {
                trace!(attempt, "peer acknowledged the request batch");
                return Ok(());
            }
            Ok(code) => return RejectedDataSnafu { code }.fail(),
            Err(fault) => {
                debug!(attempt, ?fault, "notification attempt failed");
                last_fault = fault;
                if attempt < policy.attempts {
                    pace.pause(policy.backoff);
                }
            }
        }
    }

    match last_fault {
        NotifyFault::NoReply => TimeoutSnafu {
            attempts: policy.attempts,
        }
        .fail(),
        NotifyFault::Os(source) => Err(source).context(SendFailedSnafu {
            attempts: policy.attempts,
        }),
    }
}

/// Walk the answered stream from the start of the region, copying echoed
/// read payloads out by their request id.
///
/// Write headers are echoed without interesting payload and only advance
/// the walk. A zero or unrecognized tag ends the stream, as does a header
/// or payload that would run past the region.
///
/// The registry is drained completely: ids the peer never echoed are
/// dropped so they cannot alias a later batch.
///
/// # Panics
///
/// An echoed id that was never registered means the request bookkeeping is
/// out of sync with the buffer, which is a programming error, not a
/// recoverable condition.
pub(crate) fn decode_responses(
    region: &[u8],
    pending: &mut HashMap<u32, usize>,
) -> HashMap<u32, Vec<u8>> {
    let mut results = HashMap::with_capacity(pending.len());
    let mut at = 0usize;

    while let Some(tag) = peek_tag(region, at) {
        match OpTag::try_from(tag) {
            Ok(OpTag::Read) => {
                let Some(header) = ReadHeader::decode_at(region, at) else {
                    break;
                };
                let start = at + ReadHeader::SIZE;
                let Some(end) = start
                    .checked_add(header.size as usize)
                    .filter(|&end| end <= region.len())
                else {
                    break;
                };

                assert!(
                    pending.remove(&header.target_id).is_some(),
                    "response for unknown read id {}; request registry \
                     out of sync with the buffer",
                    header.target_id
                );
                results.insert(header.target_id, region[start..end].to_vec());
                at = end;
            }
            Ok(OpTag::Write) => {
                let Some(header) = WriteHeader::decode_at(region, at) else {
                    break;
                };
                let Some(end) = (at + WriteHeader::SIZE)
                    .checked_add(header.size as usize)
                    .filter(|&end| end <= region.len())
                else {
                    break;
                };
                at = end;
            }
            // zero terminator, or garbage we refuse to walk into
            Err(_) => break,
        }
    }

    if !pending.is_empty() {
        trace!(
            unanswered = pending.len(),
            "dropping read registrations the peer never answered"
        );
        pending.clear();
    }
    results
}
