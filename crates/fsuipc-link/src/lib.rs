//! Client for the FSUIPC shared-memory IPC protocol.
//!
//! A simulator host exposes its address space through a single shared
//! memory region. The client packs read and write requests into that
//! region, wakes the host up with a registered window message, and the
//! host answers in place: read placeholders are filled with data, headers
//! are echoed back. This crate owns the whole client side of that
//! exchange: the wire layout, the bounded request arena, the connection
//! lifecycle with its handshake, and the notify/decode engine.
//!
//! The OS specifics sit behind the [`Transport`] trait:
//! [`win::SimWindowTransport`] talks to a live simulator on Windows, and
//! [`testing::ScriptedSim`] emulates the host in-process on any platform.

pub mod arena;
pub mod client;
pub mod error;
pub mod exchange;
pub mod handshake;
pub mod testing;
pub mod transport;
pub mod wire;

#[cfg(windows)]
pub mod win;

pub use client::{FsuipcLink, ReadHandle};
pub use error::LinkError;
pub use exchange::{Pace, RetryPolicy, ThreadPace};
pub use handshake::{FieldWidth, Simulator, VersionInfo};
pub use transport::Transport;
