//! Consumer layer over the link: read the COM stack, keep last-good
//! values, and notice when the simulator disappears underneath us.

use fsuipc_link::{FieldWidth, FsuipcLink, LinkError, Simulator, Transport};
use thiserror::Error;
use tracing::warn;

use crate::{
    decode::{DecodeError, narrow_to_hz},
    offsets::{NARROW, RADIO_SWITCH, RadioOffsets, WIDE},
};

/// One decoded snapshot of the COM stack, all frequencies in Hz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioReadout {
    pub com1_active: u32,
    pub com1_standby: u32,
    pub com2_active: u32,
    pub com2_standby: u32,
    /// Radio selection flags, one bit per radio.
    pub switches: u8,
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("field width still unknown; the simulator has no frequency data yet")]
    WidthUnknown,

    #[error("simulator stopped publishing frequencies; connection closed")]
    PeerGone,
}

/// The radio panel a caller actually talks to.
pub struct RadioPanel<T: Transport> {
    link: FsuipcLink<T>,
    last: RadioReadout,
}

impl<T: Transport> RadioPanel<T> {
    pub fn new(link: FsuipcLink<T>) -> Self {
        Self {
            link,
            last: RadioReadout::default(),
        }
    }

    pub fn open(&mut self, requested: Simulator) -> Result<(), PanelError> {
        self.link.open(requested)?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), LinkError> {
        self.link.close()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    /// The underlying channel, for version queries and re-probes.
    pub fn link(&mut self) -> &mut FsuipcLink<T> {
        &mut self.link
    }

    /// The last readout that decoded successfully.
    pub fn last_readout(&self) -> RadioReadout {
        self.last
    }

    /// Exchange one batch for the whole COM stack and decode it.
    ///
    /// An all-zero raw readout never happens on a live simulator; it means
    /// the peer is gone, so the panel forgets its last-good values, closes
    /// the channel and reports `PeerGone`.
    pub fn refresh(&mut self) -> Result<RadioReadout, PanelError> {
        let width = self.link.field_width();
        let (raw, switches) = match width {
            FieldWidth::Unknown => return Err(PanelError::WidthUnknown),
            FieldWidth::Narrow => self.exchange_stack(&NARROW, 2)?,
            FieldWidth::Wide => self.exchange_stack(&WIDE, 4)?,
        };

        if raw == [0, 0, 0, 0] {
            warn!("all frequencies read zero; treating the simulator as gone");
            self.last = RadioReadout::default();
            if let Err(err) = self.link.close() {
                warn!(%err, "closing the abandoned channel failed");
            }
            return Err(PanelError::PeerGone);
        }

        let readout = match width {
            FieldWidth::Narrow => RadioReadout {
                com1_active: narrow_to_hz(raw[0] as u16)?,
                com1_standby: narrow_to_hz(raw[1] as u16)?,
                com2_active: narrow_to_hz(raw[2] as u16)?,
                com2_standby: narrow_to_hz(raw[3] as u16)?,
                switches,
            },
            _ => RadioReadout {
                com1_active: raw[0],
                com1_standby: raw[1],
                com2_active: raw[2],
                com2_standby: raw[3],
                switches,
            },
        };

        self.last = readout;
        Ok(readout)
    }

    /// Queue the switch byte plus all four frequency slots, flush, and
    /// collect the raw values.
    fn exchange_stack(
        &mut self,
        offsets: &RadioOffsets,
        len: usize,
    ) -> Result<([u32; 4], u8), PanelError> {
        let switches = self.link.queue_read(RADIO_SWITCH, 1)?;
        let handles = [
            self.link.queue_read(offsets.com1_active, len)?,
            self.link.queue_read(offsets.com1_standby, len)?,
            self.link.queue_read(offsets.com2_active, len)?,
            self.link.queue_read(offsets.com2_standby, len)?,
        ];
        self.link.flush()?;

        let mut raw = [0u32; 4];
        for (slot, handle) in raw.iter_mut().zip(&handles) {
            *slot = if len == 2 {
                u32::from(self.link.result_u16(handle).unwrap_or(0))
            } else {
                self.link.result_u32(handle).unwrap_or(0)
            };
        }
        Ok((raw, self.link.result_u8(&switches).unwrap_or(0)))
    }
}
