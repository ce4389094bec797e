//! Channel transfer engine
//!
//! Bounded and unbounded byte movement between a channel stream and a local
//! `Read`/`Write` endpoint. Cancellation is cooperative: the token is
//! checked once per loop iteration and cannot interrupt a single in-flight
//! blocking engine call.

use crate::channel::Channel;
use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::os::raw::c_int;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One endpoint of a multiplexed channel, as seen by the transfer loops.
///
/// Read/write results follow the engine convention: positive byte count,
/// zero at EOF, negative on failure. A write may consume only part of the
/// buffer.
pub(crate) trait ChannelEndpoint {
    fn read_stream(&mut self, stream_id: c_int, buf: &mut [u8]) -> isize;
    fn write_stream(&mut self, stream_id: c_int, buf: &[u8]) -> isize;
}

impl ChannelEndpoint for Channel {
    fn read_stream(&mut self, stream_id: c_int, buf: &mut [u8]) -> isize {
        self.read(stream_id, buf)
    }

    fn write_stream(&mut self, stream_id: c_int, buf: &[u8]) -> isize {
        self.write(stream_id, buf)
    }
}

/// Drains a channel stream into `dest`.
///
/// With `limit: Some(n)` the copy stops at exactly `n` bytes, truncating the
/// final chunk if a read overshoots; with `None` it reads until EOF. A zero
/// byte read is EOF. A negative engine read is treated as "no more data",
/// never as a hard error. Returns the number of bytes written to `dest`.
pub(crate) fn drain_to_writer(
    endpoint: &mut impl ChannelEndpoint,
    stream_id: c_int,
    dest: &mut dyn Write,
    buffer_size: usize,
    limit: Option<u64>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total: u64 = 0;

    while limit.map_or(true, |n| total < n) {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }

        let n = endpoint.read_stream(stream_id, &mut buf);
        if n <= 0 {
            break;
        }

        let mut chunk = n as u64;
        if let Some(n) = limit {
            chunk = chunk.min(n - total);
        }

        dest.write_all(&buf[..chunk as usize])
            .map_err(|e| Error::wrapped("failed to write to destination stream", e))?;
        total += chunk;
    }

    trace!(total, stream_id, "channel drain complete");
    Ok(total)
}

/// Feeds `declared_len` bytes from `source` into a channel stream.
///
/// Each chunk is written with a retry loop because the engine may consume
/// only part of a buffer. A negative engine write aborts the transfer and
/// reports zero bytes transferred; the caller compares against the declared
/// size and fails the operation without raising. Stops early if `source`
/// runs dry.
pub(crate) fn feed_from_reader(
    endpoint: &mut impl ChannelEndpoint,
    stream_id: c_int,
    source: &mut dyn Read,
    declared_len: u64,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total: u64 = 0;

    while total < declared_len {
        if cancel.is_cancelled() {
            return Err(Error::cancelled());
        }

        let n = source
            .read(&mut buf)
            .map_err(|e| Error::wrapped("failed to read from source stream", e))?;
        if n == 0 {
            break;
        }

        let mut offset = 0;
        while offset < n {
            let written = endpoint.write_stream(stream_id, &buf[offset..n]);
            if written < 0 {
                trace!(total, code = written, "channel write failed, aborting transfer");
                return Ok(0);
            }
            offset += written as usize;
            total += written as u64;
        }
    }

    trace!(total, declared_len, "channel feed complete");
    Ok(total)
}
