//! The COM radio stack over an FSUIPC channel: well-known offsets,
//! frequency decoding, and a panel façade that tracks last-good values and
//! notices when the simulator goes away.

pub mod decode;
pub mod offsets;
pub mod panel;

pub use decode::{DecodeError, narrow_to_hz};
pub use panel::{PanelError, RadioPanel, RadioReadout};
