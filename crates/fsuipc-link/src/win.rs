//! Win32 transport: the simulator's message window, the registered IPC
//! message, the global atom naming the request region, and the mapped
//! region itself.

use std::{
    io, slice,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use snafu::ResultExt;
use tracing::{debug, warn};
use windows::{
    Win32::{
        Foundation::{
            CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, HWND,
            INVALID_HANDLE_VALUE, LPARAM, WPARAM,
        },
        System::{
            DataExchange::{GlobalAddAtomW, GlobalDeleteAtom},
            Memory::{
                CreateFileMappingW, FILE_MAP_WRITE, MEMORY_MAPPED_VIEW_ADDRESS,
                MapViewOfFile, PAGE_READWRITE, UnmapViewOfFile,
            },
            Threading::GetCurrentProcessId,
        },
        UI::WindowsAndMessaging::{
            FindWindowExW, RegisterWindowMessageW, SMTO_BLOCK,
            SendMessageTimeoutW,
        },
    },
    core::PCWSTR,
};

use crate::{
    arena::{MAX_BATCH_BYTES, REGION_SLACK},
    error::{
        CreateAtomSnafu, CreateMappingSnafu, CreateViewSnafu, LinkError,
        NoSimulatorSnafu, RegisterMessageSnafu,
    },
    transport::{NotifyFault, Transport},
};

/// Well-known class names of the simulator's IPC window.
const WINDOW_CLASSES: [&str; 2] = ["UIPCMAIN", "FS98MAIN"];

/// Name of the process-wide IPC message, and prefix of the region name.
const MSG_NAME: &str = "FsasmLib:IPC";

/// Distinguishes region names across repeated opens within one process.
static OPEN_SEQ: AtomicU32 = AtomicU32::new(0);

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

struct AtomToken(u16);

impl Drop for AtomToken {
    fn drop(&mut self) {
        // returns the atom back on failure, which there is no answer to
        unsafe { GlobalDeleteAtom(self.0) };
    }
}

struct View(MEMORY_MAPPED_VIEW_ADDRESS);

impl Drop for View {
    fn drop(&mut self) {
        if let Err(err) = unsafe { UnmapViewOfFile(self.0) } {
            warn!(%err, "failed to unmap the request region view");
        }
    }
}

struct Mapping(HANDLE);

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            warn!(%err, "failed to close the request region handle");
        }
    }
}

/// The live Win32 channel. Field order is release order: the atom goes
/// first, then the view, then the mapping handle.
pub struct SimWindowTransport {
    atom: AtomToken,
    view: View,
    _mapping: Mapping,
    hwnd: HWND,
    msg: u32,
    capacity: usize,
}

// SAFETY: the handles are process-wide kernel objects and the mapping is
// valid for the whole process; all access goes through &mut self.
unsafe impl Send for SimWindowTransport {}

impl SimWindowTransport {
    /// Locate the simulator window and stand up a fresh shared request
    /// region. If any step fails, everything acquired before it is
    /// released again before the error is returned.
    pub fn connect() -> Result<Self, LinkError> {
        let hwnd = WINDOW_CLASSES
            .iter()
            .find_map(|class| {
                let class_w = wide(class);
                unsafe {
                    FindWindowExW(
                        HWND::default(),
                        HWND::default(),
                        PCWSTR(class_w.as_ptr()),
                        PCWSTR::null(),
                    )
                }
                .ok()
            })
            .ok_or_else(|| NoSimulatorSnafu.build())?;

        let msg_w = wide(MSG_NAME);
        let msg = unsafe { RegisterWindowMessageW(PCWSTR(msg_w.as_ptr())) };
        if msg == 0 {
            return Err(io::Error::last_os_error())
                .context(RegisterMessageSnafu);
        }

        let seq = OPEN_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        let pid = unsafe { GetCurrentProcessId() };
        let region_name = format!("{MSG_NAME}:{pid:X}:{seq:X}");
        let name_w = wide(&region_name);

        let atom = unsafe { GlobalAddAtomW(PCWSTR(name_w.as_ptr())) };
        if atom == 0 {
            return Err(io::Error::last_os_error()).context(CreateAtomSnafu);
        }
        let atom = AtomToken(atom);

        let total = MAX_BATCH_BYTES + REGION_SLACK;
        let mapping = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                0,
                total as u32,
                PCWSTR(name_w.as_ptr()),
            )
        }
        .map_err(io::Error::other)
        .context(CreateMappingSnafu)?;

        // a region by this name already existing means another client is
        // live on it; refuse to share rather than corrupt its exchanges
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            if let Err(err) = unsafe { CloseHandle(mapping) } {
                warn!(%err, "failed to close the colliding mapping handle");
            }
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("shared region {region_name} already exists"),
            ))
            .context(CreateMappingSnafu);
        }
        let mapping = Mapping(mapping);

        let view =
            unsafe { MapViewOfFile(mapping.0, FILE_MAP_WRITE, 0, 0, 0) };
        if view.Value.is_null() {
            return Err(io::Error::last_os_error()).context(CreateViewSnafu);
        }
        let view = View(view);

        debug!(region = %region_name, total, "shared request region mapped");
        Ok(Self {
            atom,
            view,
            _mapping: mapping,
            hwnd,
            msg,
            capacity: MAX_BATCH_BYTES,
        })
    }
}

impl Transport for SimWindowTransport {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn region(&mut self) -> &mut [u8] {
        // SAFETY: the view maps capacity + slack writable bytes for as
        // long as `self.view` is alive
        unsafe {
            slice::from_raw_parts_mut(
                self.view.0.Value.cast::<u8>(),
                self.capacity + REGION_SLACK,
            )
        }
    }

    fn notify(&mut self, reply_timeout: Duration) -> Result<u64, NotifyFault> {
        let mut ack: usize = 0;
        let sent = unsafe {
            SendMessageTimeoutW(
                self.hwnd,
                self.msg,
                WPARAM(self.atom.0 as usize),
                LPARAM(0),
                SMTO_BLOCK,
                reply_timeout.as_millis() as u32,
                Some(&mut ack),
            )
        };

        if sent.0 == 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                // no error code means the peer simply never answered
                Some(0) | None => NotifyFault::NoReply,
                _ => NotifyFault::Os(err),
            });
        }
        Ok(ack as u64)
    }
}
