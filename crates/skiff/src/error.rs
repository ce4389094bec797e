//! Error taxonomy for SSH operations
//!
//! Every negative status code returned by the engine is translated into a
//! closed [`ErrorKind`], together with the last-error text the engine
//! recorded for the session. Failures that originate outside the engine
//! (socket errors, stream I/O) are carried as [`ErrorKind::Wrapped`] with
//! the original cause preserved as the error source.

use libssh2_sys as raw;
use std::ffi::CStr;
use std::fmt;
use std::os::raw::{c_char, c_int};
use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an SSH failure.
///
/// The first group mirrors the engine's negative status codes; the last four
/// are synthetic kinds produced by this crate itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket-level send/receive failure or an unusable socket.
    Transport,
    /// SSH banner exchange failed.
    Banner,
    /// Key exchange negotiation failed.
    KeyExchange,
    /// Message authentication code verification failed.
    Mac,
    /// The operation or the socket timed out.
    Timeout,
    /// Incoming data could not be decrypted.
    Decrypt,
    /// The peer disconnected the transport.
    Disconnect,
    /// SSH protocol violation.
    Protocol,
    /// Authentication was rejected by the server.
    AuthFailed,
    /// Channel packets arrived out of order.
    ChannelOutOfOrder,
    /// General channel failure.
    ChannelFailure,
    /// A channel request was denied by the server.
    ChannelRequestDenied,
    /// Data arrived for an unknown channel.
    ChannelUnknown,
    /// The channel flow-control window was exceeded.
    ChannelWindowExceeded,
    /// The channel maximum packet size was exceeded.
    ChannelPacketExceeded,
    /// The channel is already closed.
    ChannelClosed,
    /// EOF was already sent on the channel.
    ChannelEofSent,
    /// SCP protocol violation during a file transfer.
    ScpProtocol,
    /// Compression or decompression failure.
    Compression,
    /// SSH agent protocol failure.
    AgentProtocol,
    /// A negative engine status this crate does not map more precisely.
    Unknown,
    /// The engine handle could not be created.
    SessionInit,
    /// A non-engine failure (socket or stream I/O) converted into this
    /// taxonomy; the original cause is kept as the error source.
    Wrapped,
    /// Programmer-contract violation: wrong session state or invalid
    /// argument. Never retried internally.
    Usage,
    /// The operation observed a signalled cancellation token.
    Cancelled,
}

impl ErrorKind {
    /// Maps a negative engine status code onto the taxonomy.
    ///
    /// Non-negative codes do not represent failures and map to `Unknown`;
    /// callers are expected to check the sign before translating.
    pub fn from_code(code: c_int) -> ErrorKind {
        match code {
            raw::LIBSSH2_ERROR_SOCKET_SEND
            | raw::LIBSSH2_ERROR_SOCKET_RECV
            | raw::LIBSSH2_ERROR_BAD_SOCKET => ErrorKind::Transport,
            raw::LIBSSH2_ERROR_BANNER_RECV | raw::LIBSSH2_ERROR_BANNER_SEND => ErrorKind::Banner,
            raw::LIBSSH2_ERROR_KEX_FAILURE
            | raw::LIBSSH2_ERROR_KEY_EXCHANGE_FAILURE
            | raw::LIBSSH2_ERROR_HOSTKEY_INIT
            | raw::LIBSSH2_ERROR_HOSTKEY_SIGN => ErrorKind::KeyExchange,
            raw::LIBSSH2_ERROR_INVALID_MAC => ErrorKind::Mac,
            raw::LIBSSH2_ERROR_TIMEOUT | raw::LIBSSH2_ERROR_SOCKET_TIMEOUT => ErrorKind::Timeout,
            raw::LIBSSH2_ERROR_DECRYPT => ErrorKind::Decrypt,
            raw::LIBSSH2_ERROR_SOCKET_DISCONNECT => ErrorKind::Disconnect,
            raw::LIBSSH2_ERROR_PROTO => ErrorKind::Protocol,
            raw::LIBSSH2_ERROR_AUTHENTICATION_FAILED
            | raw::LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED
            | raw::LIBSSH2_ERROR_PASSWORD_EXPIRED => ErrorKind::AuthFailed,
            raw::LIBSSH2_ERROR_CHANNEL_OUTOFORDER => ErrorKind::ChannelOutOfOrder,
            raw::LIBSSH2_ERROR_CHANNEL_FAILURE => ErrorKind::ChannelFailure,
            raw::LIBSSH2_ERROR_CHANNEL_REQUEST_DENIED | raw::LIBSSH2_ERROR_REQUEST_DENIED => {
                ErrorKind::ChannelRequestDenied
            }
            raw::LIBSSH2_ERROR_CHANNEL_UNKNOWN => ErrorKind::ChannelUnknown,
            raw::LIBSSH2_ERROR_CHANNEL_WINDOW_EXCEEDED => ErrorKind::ChannelWindowExceeded,
            raw::LIBSSH2_ERROR_CHANNEL_PACKET_EXCEEDED => ErrorKind::ChannelPacketExceeded,
            raw::LIBSSH2_ERROR_CHANNEL_CLOSED => ErrorKind::ChannelClosed,
            raw::LIBSSH2_ERROR_CHANNEL_EOF_SENT => ErrorKind::ChannelEofSent,
            raw::LIBSSH2_ERROR_SCP_PROTOCOL => ErrorKind::ScpProtocol,
            raw::LIBSSH2_ERROR_ZLIB | raw::LIBSSH2_ERROR_COMPRESS => ErrorKind::Compression,
            raw::LIBSSH2_ERROR_AGENT_PROTOCOL => ErrorKind::AgentProtocol,
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport failure",
            ErrorKind::Banner => "banner exchange failure",
            ErrorKind::KeyExchange => "key exchange failure",
            ErrorKind::Mac => "MAC verification failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Decrypt => "decrypt failure",
            ErrorKind::Disconnect => "peer disconnected",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::AuthFailed => "authentication failed",
            ErrorKind::ChannelOutOfOrder => "channel packets out of order",
            ErrorKind::ChannelFailure => "channel failure",
            ErrorKind::ChannelRequestDenied => "channel request denied",
            ErrorKind::ChannelUnknown => "unknown channel",
            ErrorKind::ChannelWindowExceeded => "channel window exceeded",
            ErrorKind::ChannelPacketExceeded => "channel packet size exceeded",
            ErrorKind::ChannelClosed => "channel closed",
            ErrorKind::ChannelEofSent => "channel EOF already sent",
            ErrorKind::ScpProtocol => "SCP protocol error",
            ErrorKind::Compression => "compression failure",
            ErrorKind::AgentProtocol => "agent protocol error",
            ErrorKind::Unknown => "unknown engine error",
            ErrorKind::SessionInit => "failed to initialize session",
            ErrorKind::Wrapped => "wrapped error",
            ErrorKind::Usage => "usage error",
            ErrorKind::Cancelled => "operation cancelled",
        };
        f.write_str(name)
    }
}

/// An SSH failure: a taxonomy kind, a human-readable message, the raw engine
/// status code when one exists, and an optional wrapped cause.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    code: Option<c_int>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Builds an error from a raw engine status code.
    pub(crate) fn from_code(code: c_int, message: impl Into<String>) -> Error {
        Error {
            kind: ErrorKind::from_code(code),
            message: message.into(),
            code: Some(code),
            source: None,
        }
    }

    /// Builds an error from the session's recorded last error, falling back
    /// to `fallback` when the engine has no message.
    ///
    /// # Safety
    /// `sess` must be a live engine session handle.
    pub(crate) unsafe fn from_session(
        sess: *mut raw::LIBSSH2_SESSION,
        fallback: &str,
    ) -> Error {
        let mut msg: *mut c_char = std::ptr::null_mut();
        let mut msg_len: c_int = 0;
        let code = raw::libssh2_session_last_error(sess, &mut msg, &mut msg_len, 0);

        let message = if code < 0 && !msg.is_null() {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        } else {
            fallback.to_string()
        };

        Error {
            kind: if code < 0 {
                ErrorKind::from_code(code)
            } else {
                ErrorKind::Unknown
            },
            message,
            code: (code < 0).then_some(code),
            source: None,
        }
    }

    /// Precondition violation. Fatal to the call, never retried.
    pub(crate) fn usage(message: impl Into<String>) -> Error {
        Error {
            kind: ErrorKind::Usage,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Wraps a non-engine failure, preserving it as the source.
    pub(crate) fn wrapped(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Error {
        Error {
            kind: ErrorKind::Wrapped,
            message: message.into(),
            code: None,
            source: Some(Box::new(cause)),
        }
    }

    /// The engine handle could not be created.
    pub(crate) fn session_init(message: impl Into<String>) -> Error {
        Error {
            kind: ErrorKind::SessionInit,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// A cancellation token was observed as signalled.
    pub(crate) fn cancelled() -> Error {
        Error {
            kind: ErrorKind::Cancelled,
            message: "operation cancelled before completion".to_string(),
            code: None,
            source: None,
        }
    }

    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The raw engine status code, when this error came from the engine.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}
