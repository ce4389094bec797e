//! Owned channel resource and streaming reads
//!
//! A [`Channel`] is a transient engine resource: opened for exactly one
//! purpose (command execution or one SCP transfer), used, and released
//! exactly once. Release happens in `Drop`, so every exit path out of an
//! operation, including error unwinds, frees the underlying handle.

use crate::error::{Error, Result};
use crate::terminal::{TerminalModes, TerminalType};
use libssh2_sys as raw;
use std::ffi::CString;
use std::io;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_uint};

/// Stream id for standard output.
pub(crate) const STDOUT_STREAM: c_int = 0;
/// Stream id for standard error (SSH extended data stream 1).
pub(crate) const STDERR_STREAM: c_int = 1;

/// An exclusively-owned engine channel.
///
/// The parent session pointer is retained only to pull last-error text for
/// diagnostics; the session outlives every channel because channels are
/// created and dropped inside a single session operation.
pub(crate) struct Channel {
    chan: *mut raw::LIBSSH2_CHANNEL,
    sess: *mut raw::LIBSSH2_SESSION,
    closed: bool,
}

impl Channel {
    /// Opens a "session"-type channel with the given flow-control window
    /// and maximum packet size. Returns `None` when the engine refuses the
    /// open (callers decide whether that is an error or a soft failure).
    pub(crate) fn open_session(
        sess: *mut raw::LIBSSH2_SESSION,
        window_size: u32,
        packet_size: u32,
    ) -> Option<Channel> {
        const CHANNEL_TYPE: &[u8] = b"session";
        let chan = unsafe {
            raw::libssh2_channel_open_ex(
                sess,
                CHANNEL_TYPE.as_ptr() as *const c_char,
                CHANNEL_TYPE.len() as c_uint,
                window_size as c_uint,
                packet_size as c_uint,
                std::ptr::null(),
                0,
            )
        };
        if chan.is_null() {
            return None;
        }
        Some(Channel {
            chan,
            sess,
            closed: false,
        })
    }

    /// Wraps a channel handle the engine already opened (SCP send/receive).
    ///
    /// # Safety
    /// `chan` must be a live channel belonging to `sess`, not owned by
    /// anything else.
    pub(crate) unsafe fn from_raw(
        chan: *mut raw::LIBSSH2_CHANNEL,
        sess: *mut raw::LIBSSH2_SESSION,
    ) -> Channel {
        Channel {
            chan,
            sess,
            closed: false,
        }
    }

    /// Requests a pseudo-terminal on this channel.
    pub(crate) fn request_pty(
        &mut self,
        term: TerminalType,
        modes: &TerminalModes,
        width: u32,
        height: u32,
        width_px: u32,
        height_px: u32,
    ) -> Result<()> {
        let term = term.as_str().as_bytes();
        let modes = modes.as_bytes();
        let rc = unsafe {
            raw::libssh2_channel_request_pty_ex(
                self.chan,
                term.as_ptr() as *const c_char,
                term.len() as c_uint,
                modes.as_ptr() as *const c_char,
                modes.len() as c_uint,
                width as c_int,
                height as c_int,
                width_px as c_int,
                height_px as c_int,
            )
        };
        self.check(rc, "failed to request PTY")
    }

    /// Issues the "exec" process-start request with the given command line.
    pub(crate) fn exec(&mut self, command: &str) -> Result<()> {
        const REQUEST: &[u8] = b"exec";
        let rc = unsafe {
            raw::libssh2_channel_process_startup(
                self.chan,
                REQUEST.as_ptr() as *const c_char,
                REQUEST.len() as c_uint,
                command.as_ptr() as *const c_char,
                command.len() as c_uint,
            )
        };
        self.check(rc, "unable to start remote process")
    }

    /// One raw read from a channel stream. Returns the engine's result
    /// unmodified: positive byte count, zero at EOF, negative on failure.
    pub(crate) fn read(&mut self, stream_id: c_int, buf: &mut [u8]) -> isize {
        unsafe {
            raw::libssh2_channel_read_ex(
                self.chan,
                stream_id,
                buf.as_mut_ptr() as *mut c_char,
                buf.len(),
            )
        }
    }

    /// One raw write to a channel stream. May consume only part of `buf`;
    /// callers retry with the remainder.
    pub(crate) fn write(&mut self, stream_id: c_int, buf: &[u8]) -> isize {
        unsafe {
            raw::libssh2_channel_write_ex(
                self.chan,
                stream_id,
                buf.as_ptr() as *const c_char,
                buf.len(),
            )
        }
    }

    pub(crate) fn send_eof(&mut self) -> Result<()> {
        let rc = unsafe { raw::libssh2_channel_send_eof(self.chan) };
        self.check(rc, "failed to send channel EOF")
    }

    pub(crate) fn wait_eof(&mut self) -> Result<()> {
        let rc = unsafe { raw::libssh2_channel_wait_eof(self.chan) };
        self.check(rc, "failed waiting for channel EOF")
    }

    /// Closes the channel and waits for the remote acknowledgment. Safe to
    /// call once; `Drop` performs the same sequence if it never ran.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        unsafe {
            let rc = raw::libssh2_channel_close(self.chan);
            if rc < 0 {
                return Err(Error::from_session(self.sess, "failed to close channel"));
            }
            let rc = raw::libssh2_channel_wait_closed(self.chan);
            if rc < 0 {
                return Err(Error::from_session(
                    self.sess,
                    "failed waiting for channel close",
                ));
            }
        }
        Ok(())
    }

    /// Waits for the remote close acknowledgment without initiating a close
    /// (SCP channels are closed by the peer after the EOF exchange).
    pub(crate) fn wait_closed(&mut self) -> Result<()> {
        self.closed = true;
        let rc = unsafe { raw::libssh2_channel_wait_closed(self.chan) };
        if rc < 0 {
            return Err(unsafe {
                Error::from_session(self.sess, "failed waiting for channel close")
            });
        }
        Ok(())
    }

    /// The remote process exit code. Only meaningful after [`close`].
    pub(crate) fn exit_status(&self) -> i32 {
        unsafe { raw::libssh2_channel_get_exit_status(self.chan) }
    }

    /// The name of the signal that terminated the remote process, if any.
    pub(crate) fn exit_signal(&self) -> Option<String> {
        let mut sig: *mut c_char = std::ptr::null_mut();
        let mut sig_len: libc::size_t = 0;
        let rc = unsafe {
            raw::libssh2_channel_get_exit_signal(
                self.chan,
                &mut sig,
                &mut sig_len,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if rc != 0 || sig.is_null() || sig_len == 0 {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(sig as *const u8, sig_len) };
        let name = String::from_utf8_lossy(bytes).into_owned();
        unsafe { raw::libssh2_free(self.sess, sig as *mut libc::c_void) };
        Some(name)
    }

    /// A read-only stream view over one stream id of this channel.
    pub(crate) fn stream(&self, stream_id: c_int) -> ChannelStream<'_> {
        ChannelStream {
            chan: self.chan,
            stream_id,
            eof: false,
            _owner: PhantomData,
        }
    }

    fn check(&self, rc: c_int, fallback: &str) -> Result<()> {
        if rc >= 0 {
            return Ok(());
        }
        Err(unsafe { Error::from_session(self.sess, fallback) })
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        unsafe {
            if !self.closed {
                // Results ignored: the peer may already have torn the
                // channel down, and Drop must not fail.
                let _ = raw::libssh2_channel_close(self.chan);
                let _ = raw::libssh2_channel_wait_closed(self.chan);
            }
            let _ = raw::libssh2_channel_free(self.chan);
        }
    }
}

/// A live read-only byte stream bound to one channel stream id.
///
/// Reads call straight into the engine without buffering. A zero or
/// negative engine result latches EOF: negative reads are reported as "no
/// more data", never as a hard error, matching the transfer engine.
pub struct ChannelStream<'a> {
    chan: *mut raw::LIBSSH2_CHANNEL,
    stream_id: c_int,
    eof: bool,
    _owner: PhantomData<&'a Channel>,
}

impl io::Read for ChannelStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        let n = unsafe {
            raw::libssh2_channel_read_ex(
                self.chan,
                self.stream_id,
                buf.as_mut_ptr() as *mut c_char,
                buf.len(),
            )
        };
        if n <= 0 {
            self.eof = true;
            return Ok(0);
        }
        Ok(n as usize)
    }
}

/// Builds a NUL-terminated path for the engine, rejecting interior NULs as
/// a usage error.
pub(crate) fn path_cstring(path: &str) -> Result<CString> {
    CString::new(path).map_err(|_| Error::usage("path contains an interior NUL byte"))
}
