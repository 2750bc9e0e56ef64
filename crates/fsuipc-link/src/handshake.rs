//! Version negotiation and field-width probing on a freshly opened channel.
//!
//! A live host publishes its own version and the simulator's version at
//! well-known offsets. Both are polled until they look plausible, the
//! client announces its library version once, and finally a known-hot
//! frequency slot is probed in both encodings to learn which integer width
//! this peer speaks.

use std::time::Duration;

use strum::{Display, EnumString, FromRepr};
use tracing::{debug, info, warn};

use crate::{
    client::FsuipcLink,
    error::{
        LinkError, NotRunningSnafu, VersionMismatchSnafu, WrongSimulatorSnafu,
    },
    transport::Transport,
};

/// Version of the host's IPC module.
pub const OFFSET_FSUIPC_VERSION: u32 = 0x3304;
/// Version of the simulator behind the host.
pub const OFFSET_SIM_VERSION: u32 = 0x3308;
/// Where the client announces its own library version.
pub const OFFSET_LIBRARY_VERSION: u32 = 0x330A;

/// COM1 active frequency, narrow (BCD word) slot. Non-zero on any live
/// simulator, which makes it the width probe target.
pub const OFFSET_PROBE_NARROW: u32 = 0x034E;
/// COM1 active frequency, wide (Hz dword) slot.
pub const OFFSET_PROBE_WIDE: u32 = 0x05C4;

/// Version this client announces to the peer, once per open.
pub const LIBRARY_VERSION: u32 = 2002;

/// A genuine host carries this signature in the simulator version's high
/// half; anything else is stale or garbage memory.
const SIM_SIGNATURE_MASK: u32 = 0xFFFF_0000;
const SIM_SIGNATURE: u32 = 0xFADE_0000;
/// Oldest simulator version the protocol supports.
const SIM_VERSION_FLOOR: u32 = 0x1998_0005;

const HANDSHAKE_ROUNDS: u32 = 5;
const HANDSHAKE_PAUSE: Duration = Duration::from_millis(100);

/// The peer kind a caller may require when opening the channel.
#[repr(u32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, FromRepr,
)]
#[strum(ascii_case_insensitive)]
pub enum Simulator {
    Any = 0,
    Fs98 = 1,
    Fs2k = 2,
    Cfs2 = 3,
    Cfs1 = 4,
    Fly = 5,
    Fs2k2 = 6,
    Fs2k4 = 7,
    Fsx = 8,
    Esp = 9,
    P3d = 10,
}

/// The three version numbers exchanged during the handshake. Fixed after a
/// successful negotiation until the channel is reopened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub fsuipc: u32,
    pub simulator: u32,
    pub library: u32,
}

/// Which integer width the peer uses for frequency-class fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldWidth {
    /// Probe found no live data; domain reads must be refused until a
    /// re-probe succeeds.
    #[default]
    Unknown,
    /// 16-bit BCD fields.
    Narrow,
    /// 32-bit plain fields.
    Wide,
}

impl<T: Transport> FsuipcLink<T> {
    /// Poll the peer's version fields until they pass the plausibility
    /// checks, announcing our own library version on the first round.
    pub(crate) fn negotiate(
        &mut self,
        requested: Simulator,
    ) -> Result<VersionInfo, LinkError> {
        let mut version = VersionInfo {
            library: LIBRARY_VERSION,
            ..VersionInfo::default()
        };

        let mut round = 0;
        loop {
            round += 1;
            let fsuipc = self.queue_read(OFFSET_FSUIPC_VERSION, 4)?;
            let simulator = self.queue_read(OFFSET_SIM_VERSION, 4)?;
            if round == 1 {
                // announce ourselves exactly once per open
                let announced = version.library as u16;
                self.queue_write(
                    OFFSET_LIBRARY_VERSION,
                    &announced.to_le_bytes(),
                )?;
            }
            self.flush()?;

            version.fsuipc = self.result_u32(&fsuipc).unwrap_or(0);
            version.simulator = self.result_u32(&simulator).unwrap_or(0);

            if version.fsuipc != 0
                && version.simulator != 0
                && version.simulator & SIM_SIGNATURE_MASK == SIM_SIGNATURE
                && version.simulator >= SIM_VERSION_FLOOR
            {
                break;
            }

            debug!(
                round,
                fsuipc = version.fsuipc,
                simulator = version.simulator,
                "version fields not plausible yet"
            );
            if round >= HANDSHAKE_ROUNDS {
                if version.fsuipc == 0 && version.simulator == 0 {
                    return NotRunningSnafu.fail();
                }
                return VersionMismatchSnafu {
                    fsuipc: version.fsuipc,
                    simulator: version.simulator,
                }
                .fail();
            }
            self.pause(HANDSHAKE_PAUSE);
        }

        // only the low half carries the simulator kind
        version.simulator &= 0xFFFF;

        if requested != Simulator::Any
            && requested as u32 != version.simulator
        {
            return WrongSimulatorSnafu {
                requested,
                found: version.simulator,
            }
            .fail();
        }

        info!(
            fsuipc = format_args!("{:#x}", version.fsuipc),
            simulator = version.simulator,
            "version negotiation complete"
        );
        Ok(version)
    }

    fn width_probe_exchange(&mut self) -> Result<(u16, u32), LinkError> {
        let narrow = self.queue_read(OFFSET_PROBE_NARROW, 2)?;
        let wide = self.queue_read(OFFSET_PROBE_WIDE, 4)?;
        self.flush()?;
        Ok((
            self.result_u16(&narrow).unwrap_or(0),
            self.result_u32(&wide).unwrap_or(0),
        ))
    }

    /// Read the same frequency slot in both encodings and see which one the
    /// peer actually populates.
    pub(crate) fn probe_field_width(&mut self) -> FieldWidth {
        // an unusable probe leaves the width unknown rather than failing
        // the open; callers re-probe before touching domain data
        let (narrow, wide) = match self.width_probe_exchange() {
            Ok(values) => values,
            Err(err) => {
                warn!(%err, "field width probe exchange failed");
                return FieldWidth::Unknown;
            }
        };

        let width = if wide != 0 {
            FieldWidth::Wide
        } else if narrow != 0 {
            FieldWidth::Narrow
        } else {
            FieldWidth::Unknown
        };
        debug!(?width, narrow, wide, "field width probe");
        width
    }
}
