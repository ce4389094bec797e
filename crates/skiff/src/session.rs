//! Session lifecycle and the operations built on top of it
//!
//! A [`Session`] owns exactly one engine handle and one TCP socket, created
//! together in [`Session::connect`] and destroyed together in
//! [`Session::close`]. The lifecycle is a strict state machine:
//!
//! ```text
//! Disconnected -> Connected -> LoggedIn -> Disposed
//! ```
//!
//! `Disposed` is terminal and reachable from every state. Every mutating
//! operation asserts its required state up front and fails with a usage
//! error otherwise; that check is a programmer contract, not a recoverable
//! condition.
//!
//! Operations on one session are strictly sequential. The exclusive `&mut`
//! receiver is what serializes them: Rust's borrow rules stand in for the
//! per-session lock the engine would otherwise need.

use crate::channel::{path_cstring, Channel, STDERR_STREAM, STDOUT_STREAM};
use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::terminal::{TerminalModes, TerminalType};
use crate::transfer;
use libssh2_sys as raw;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::raw::{c_char, c_int};
use std::os::unix::io::AsRawFd;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default channel flow-control window: 2 MiB.
pub const DEFAULT_WINDOW_SIZE: u32 = 2 * 1024 * 1024;
/// Default channel maximum packet size: 32 KiB.
pub const DEFAULT_PACKET_SIZE: u32 = 32 * 1024;
/// Default SCP transfer buffer: 32 KiB.
pub const DEFAULT_TRANSFER_BUFFER: usize = 32 * 1024;
/// Default POSIX mode for files created by [`Session::write_file`].
pub const DEFAULT_FILE_MODE: i32 = 0o644;

/// Chunk size for buffered command-output reads.
const OUTPUT_CHUNK: usize = 4096;

/// Process-wide engine initialization flag. Written once under the lock;
/// the engine is never torn down before process exit.
static LIBRARY_INITIALIZED: Mutex<bool> = Mutex::new(false);

fn ensure_initialized() -> Result<()> {
    let mut initialized = LIBRARY_INITIALIZED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if *initialized {
        return Ok(());
    }

    debug!("initializing SSH engine");
    let rc = unsafe { raw::libssh2_init(0) };
    if rc < 0 {
        return Err(Error::from_code(rc, "engine initialization failed"));
    }
    *initialized = true;
    Ok(())
}

// Not re-exported by the sys crate; bound directly against the linked
// engine.
extern "C" {
    fn libssh2_version(required_version: c_int) -> *const c_char;
}

/// Version string of the linked engine, when it reports one.
pub fn engine_version() -> Option<String> {
    let ptr = unsafe { libssh2_version(0) };
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport established yet.
    Disconnected,
    /// Handshake complete; not yet authenticated.
    Connected,
    /// Authenticated; commands and transfers are available.
    LoggedIn,
    /// Released. Terminal state; the session must not be reused.
    Disposed,
}

/// Negotiation slots whose algorithm preferences can be set before the
/// handshake and inspected after it. CS = client-to-server, SC =
/// server-to-client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Key exchange algorithms.
    Kex,
    /// Host key algorithms.
    HostKey,
    /// Cipher, client to server.
    CryptCs,
    /// Cipher, server to client.
    CryptSc,
    /// MAC, client to server.
    MacCs,
    /// MAC, server to client.
    MacSc,
    /// Compression, client to server.
    CompCs,
    /// Compression, server to client.
    CompSc,
}

impl Method {
    fn raw(self) -> c_int {
        match self {
            Method::Kex => raw::LIBSSH2_METHOD_KEX,
            Method::HostKey => raw::LIBSSH2_METHOD_HOSTKEY,
            Method::CryptCs => raw::LIBSSH2_METHOD_CRYPT_CS,
            Method::CryptSc => raw::LIBSSH2_METHOD_CRYPT_SC,
            Method::MacCs => raw::LIBSSH2_METHOD_MAC_CS,
            Method::MacSc => raw::LIBSSH2_METHOD_MAC_SC,
            Method::CompCs => raw::LIBSSH2_METHOD_COMP_CS,
            Method::CompSc => raw::LIBSSH2_METHOD_COMP_SC,
        }
    }
}

/// Fixed order in which queued preferences are applied during connect.
const METHOD_APPLY_ORDER: [Method; 8] = [
    Method::Kex,
    Method::HostKey,
    Method::CryptCs,
    Method::CryptSc,
    Method::MacCs,
    Method::MacSc,
    Method::CompCs,
    Method::CompSc,
];

/// Hash algorithms for host key fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum HashType {
    /// MD5, 16 bytes. Weak; legacy compatibility only.
    MD5,
    /// SHA-1, 20 bytes. Weak; prefer SHA-256.
    SHA1,
    /// SHA-256, 32 bytes. Recommended.
    SHA256,
}

impl HashType {
    fn raw(self) -> c_int {
        match self {
            HashType::MD5 => raw::LIBSSH2_HOSTKEY_HASH_MD5,
            HashType::SHA1 => raw::LIBSSH2_HOSTKEY_HASH_SHA1,
            HashType::SHA256 => raw::LIBSSH2_HOSTKEY_HASH_SHA256,
        }
    }

    /// Digest length in bytes.
    pub fn len(self) -> usize {
        match self {
            HashType::MD5 => 16,
            HashType::SHA1 => 20,
            HashType::SHA256 => 32,
        }
    }
}

/// Host key algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyType {
    /// Unrecognized key type.
    Unknown,
    /// RSA.
    Rsa,
    /// DSA (deprecated).
    Dss,
    /// ECDSA over P-256.
    Ecdsa256,
    /// ECDSA over P-384.
    Ecdsa384,
    /// ECDSA over P-521.
    Ecdsa521,
    /// Ed25519.
    Ed25519,
}

impl HostKeyType {
    fn from_raw(kind: c_int) -> HostKeyType {
        match kind {
            raw::LIBSSH2_HOSTKEY_TYPE_RSA => HostKeyType::Rsa,
            raw::LIBSSH2_HOSTKEY_TYPE_DSS => HostKeyType::Dss,
            raw::LIBSSH2_HOSTKEY_TYPE_ECDSA_256 => HostKeyType::Ecdsa256,
            raw::LIBSSH2_HOSTKEY_TYPE_ECDSA_384 => HostKeyType::Ecdsa384,
            raw::LIBSSH2_HOSTKEY_TYPE_ECDSA_521 => HostKeyType::Ecdsa521,
            raw::LIBSSH2_HOSTKEY_TYPE_ED25519 => HostKeyType::Ed25519,
            _ => HostKeyType::Unknown,
        }
    }
}

/// The server's host key, for out-of-band verification policies.
#[derive(Debug, Clone)]
pub struct HostKey {
    /// Raw key bytes as presented by the server.
    pub data: Vec<u8>,
    /// Key algorithm family.
    pub key_type: HostKeyType,
}

/// Pseudo-terminal parameters for [`ExecOptions`].
#[derive(Debug, Clone)]
pub struct PtyRequest {
    /// Terminal type advertised to the server.
    pub terminal: TerminalType,
    /// Encoded terminal modes; the default empty encoding means "use
    /// remote default modes".
    pub modes: TerminalModes,
    /// Width in characters.
    pub width: u32,
    /// Height in characters.
    pub height: u32,
    /// Width in pixels.
    pub width_px: u32,
    /// Height in pixels.
    pub height_px: u32,
}

impl Default for PtyRequest {
    fn default() -> Self {
        PtyRequest {
            terminal: TerminalType::Xterm,
            modes: TerminalModes::default(),
            width: 80,
            height: 24,
            width_px: 0,
            height_px: 0,
        }
    }
}

/// Options for [`Session::execute_command`].
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Channel flow-control window size.
    pub window_size: u32,
    /// Channel maximum packet size.
    pub packet_size: u32,
    /// Request a pseudo-terminal before starting the process.
    pub pty: Option<PtyRequest>,
    /// Cooperative cancellation, checked at read-loop iterations only; it
    /// cannot interrupt an in-flight blocking engine call.
    pub cancel: CancellationToken,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            window_size: DEFAULT_WINDOW_SIZE,
            packet_size: DEFAULT_PACKET_SIZE,
            pty: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Options for [`Session::read_file`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Transfer chunk size.
    pub buffer_size: usize,
    /// Cooperative cancellation, checked per loop iteration.
    pub cancel: CancellationToken,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            buffer_size: DEFAULT_TRANSFER_BUFFER,
            cancel: CancellationToken::new(),
        }
    }
}

/// Options for [`Session::write_file`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// POSIX mode for the created remote file; only permission bits are
    /// used.
    pub mode: i32,
    /// Transfer chunk size.
    pub buffer_size: usize,
    /// Cooperative cancellation, checked per loop iteration.
    pub cancel: CancellationToken,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            mode: DEFAULT_FILE_MODE,
            buffer_size: DEFAULT_TRANSFER_BUFFER,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of one command execution. Immutable once produced.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was started and its output collected.
    pub successful: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Remote process exit code.
    pub exit_code: Option<i32>,
    /// Name of the signal that terminated the remote process, if it was
    /// killed rather than exiting.
    pub exit_signal: Option<String>,
}

impl CommandResult {
    pub(crate) fn unsuccessful() -> CommandResult {
        CommandResult {
            successful: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            exit_signal: None,
        }
    }
}

/// A running remote command whose output is consumed incrementally.
///
/// Produced by [`Session::execute_command_streaming`]. The underlying
/// channel stays open until [`wait_exit`](CommandStream::wait_exit) or
/// drop. The stream mutably borrows its session, so closing or reusing
/// the session while a stream is alive is rejected at compile time:
///
/// ```compile_fail
/// use skiff::{ExecOptions, Session};
///
/// fn demo(session: &mut Session) -> skiff::Result<()> {
///     let stream = session.execute_command_streaming("true", &ExecOptions::default())?;
///     session.close(); // still borrowed by `stream`
///     stream.wait_exit()?;
///     Ok(())
/// }
/// ```
///
/// Reading stdout and stderr can be interleaved freely.
pub struct CommandStream<'a> {
    channel: Channel,
    _session: std::marker::PhantomData<&'a mut Session>,
}

impl<'a> CommandStream<'a> {
    pub(crate) fn new(channel: Channel) -> CommandStream<'a> {
        CommandStream {
            channel,
            _session: std::marker::PhantomData,
        }
    }

    /// Live reader over the remote process's standard output.
    pub fn stdout(&self) -> crate::ChannelStream<'_> {
        self.channel.stream(STDOUT_STREAM)
    }

    /// Live reader over the remote process's standard error.
    pub fn stderr(&self) -> crate::ChannelStream<'_> {
        self.channel.stream(STDERR_STREAM)
    }

    /// Closes the channel and collects the exit status.
    ///
    /// Output the caller never read is discarded; the returned result
    /// carries empty stdout/stderr buffers.
    pub fn wait_exit(mut self) -> Result<CommandResult> {
        self.channel.close()?;
        let exit_code = self.channel.exit_status();
        let exit_signal = self.channel.exit_signal();
        Ok(CommandResult {
            successful: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(exit_code),
            exit_signal,
        })
    }
}

impl std::fmt::Debug for CommandStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStream").finish_non_exhaustive()
    }
}

/// An SSH session: one engine handle, one socket, one state machine.
pub struct Session {
    status: ConnectionStatus,
    sess: *mut raw::LIBSSH2_SESSION,
    stream: Option<TcpStream>,
    method_prefs: HashMap<Method, String>,
}

// The engine handle is not thread-affine; it just must never be used from
// two threads at once, which `&mut self` already guarantees.
unsafe impl Send for Session {}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("method_prefs", &self.method_prefs.len())
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    /// Creates a session in the `Disconnected` state.
    pub fn new() -> Session {
        Session {
            status: ConnectionStatus::Disconnected,
            sess: std::ptr::null_mut(),
            stream: None,
            method_prefs: HashMap::new(),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn ensure_status(&self, allowed: &[ConnectionStatus], operation: &str) -> Result<()> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(Error::usage(format!(
            "{operation} requires session status {allowed:?}, current status is {:?}",
            self.status
        )))
    }

    /// Queues an algorithm preference list for one negotiation slot.
    ///
    /// Preferences are fixed before the handshake: this call is only valid
    /// while `Disconnected` and takes effect during [`connect`].
    ///
    /// [`connect`]: Session::connect
    pub fn set_method_pref(&mut self, method: Method, preferences: &[&str]) -> Result<()> {
        self.ensure_status(&[ConnectionStatus::Disconnected], "SetMethodPreferences")?;
        if preferences.is_empty() {
            return Err(Error::usage("preference list must not be empty"));
        }
        self.method_prefs.insert(method, preferences.join(","));
        Ok(())
    }

    /// Queues a hardened default preference set for all eight negotiation
    /// slots: modern key exchange and host key algorithms, AEAD-first
    /// ciphers, ETM MACs, and no compression.
    pub fn harden_method_prefs(&mut self) -> Result<()> {
        const KEX: &[&str] = &[
            "curve25519-sha256",
            "curve25519-sha256@libssh.org",
            "diffie-hellman-group16-sha512",
            "diffie-hellman-group14-sha256",
        ];
        const HOSTKEY: &[&str] = &[
            "ssh-ed25519",
            "rsa-sha2-512",
            "rsa-sha2-256",
            "ecdsa-sha2-nistp256",
        ];
        const CRYPT: &[&str] = &[
            "chacha20-poly1305@openssh.com",
            "aes256-gcm@openssh.com",
            "aes128-gcm@openssh.com",
            "aes256-ctr",
            "aes192-ctr",
            "aes128-ctr",
        ];
        const MAC: &[&str] = &[
            "hmac-sha2-256-etm@openssh.com",
            "hmac-sha2-512-etm@openssh.com",
            "hmac-sha2-256",
            "hmac-sha2-512",
        ];
        const COMP: &[&str] = &["none"];

        self.set_method_pref(Method::Kex, KEX)?;
        self.set_method_pref(Method::HostKey, HOSTKEY)?;
        self.set_method_pref(Method::CryptCs, CRYPT)?;
        self.set_method_pref(Method::CryptSc, CRYPT)?;
        self.set_method_pref(Method::MacCs, MAC)?;
        self.set_method_pref(Method::MacSc, MAC)?;
        self.set_method_pref(Method::CompCs, COMP)?;
        self.set_method_pref(Method::CompSc, COMP)?;
        Ok(())
    }

    /// The preference list queued for a slot, if any.
    pub fn method_pref(&self, method: Method) -> Option<&str> {
        self.method_prefs.get(&method).map(String::as_str)
    }

    /// Connects to an SSH server and performs the protocol handshake.
    ///
    /// `timeout` bounds the TCP connect and becomes the engine's
    /// blocking-call timeout for the rest of the session. On success the
    /// session is `Connected`; authenticate before executing commands. On
    /// any failure after handle creation, the handle and socket are
    /// released before the error propagates.
    pub fn connect(&mut self, host: &str, port: u16, timeout: Option<Duration>) -> Result<()> {
        ensure_initialized()?;
        self.ensure_status(&[ConnectionStatus::Disconnected], "Connect")?;
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::usage("socket timeout must be greater than zero"));
        }

        let sess =
            unsafe { raw::libssh2_session_init_ex(None, None, None, std::ptr::null_mut()) };
        if sess.is_null() {
            return Err(Error::session_init("failed to create engine session handle"));
        }

        info!(host, port, "connecting to SSH server");
        let stream = match open_socket(host, port, timeout) {
            Ok(stream) => stream,
            Err(err) => {
                unsafe { raw::libssh2_session_free(sess) };
                return Err(err);
            }
        };

        if let Some(timeout) = timeout {
            unsafe { raw::libssh2_session_set_timeout(sess, timeout.as_millis() as libc::c_long) };
        }

        // Queued preferences go in before the handshake, in slot order.
        for method in METHOD_APPLY_ORDER {
            let Some(prefs) = self.method_prefs.get(&method) else {
                continue;
            };
            let prefs = match CString::new(prefs.as_str()) {
                Ok(prefs) => prefs,
                Err(_) => {
                    unsafe { raw::libssh2_session_free(sess) };
                    return Err(Error::usage("method preference contains a NUL byte"));
                }
            };
            let rc =
                unsafe { raw::libssh2_session_method_pref(sess, method.raw(), prefs.as_ptr()) };
            if rc < 0 {
                let err = unsafe {
                    Error::from_session(sess, "failed to apply method preferences")
                };
                unsafe { raw::libssh2_session_free(sess) };
                return Err(err);
            }
        }

        debug!("starting SSH handshake");
        let rc = unsafe {
            raw::libssh2_session_handshake(sess, stream.as_raw_fd() as raw::libssh2_socket_t)
        };
        if rc < 0 {
            let err = unsafe { Error::from_session(sess, "handshake with server failed") };
            unsafe { raw::libssh2_session_free(sess) };
            drop(stream);
            return Err(err);
        }

        unsafe { raw::libssh2_session_set_blocking(sess, 1) };

        info!(host, port, "SSH handshake complete");
        self.sess = sess;
        self.stream = Some(stream);
        self.status = ConnectionStatus::Connected;
        Ok(())
    }

    /// Authenticates with the given credential.
    ///
    /// Authentication failure is an ordinary `Ok(false)` and leaves the
    /// session `Connected`, so a caller can try further credentials.
    pub fn authenticate(&mut self, credential: &Credential) -> Result<bool> {
        ensure_initialized()?;
        self.ensure_status(&[ConnectionStatus::Connected], "Authenticate")?;

        debug!("starting authentication");
        let authenticated = unsafe { credential.authenticate(self.sess) };
        if authenticated {
            info!("authentication successful");
            self.status = ConnectionStatus::LoggedIn;
        } else {
            debug!("authentication failed");
        }
        Ok(authenticated)
    }

    /// Executes a command, buffering stdout and stderr to completion.
    ///
    /// A refused channel open yields an unsuccessful [`CommandResult`]
    /// rather than an error; PTY and process-startup failures close the
    /// channel and propagate.
    pub fn execute_command(&mut self, command: &str, options: &ExecOptions) -> Result<CommandResult> {
        self.ensure_status(&[ConnectionStatus::LoggedIn], "ExecuteCommand")?;

        debug!(command, "opening channel for command execution");
        let Some(mut channel) =
            Channel::open_session(self.sess, options.window_size, options.packet_size)
        else {
            warn!("failed to open command channel");
            return Ok(CommandResult::unsuccessful());
        };

        // The channel is freed by Drop on every path below.
        if let Some(pty) = &options.pty {
            debug!(terminal = pty.terminal.as_str(), width = pty.width, height = pty.height, "requesting PTY");
            channel.request_pty(
                pty.terminal,
                &pty.modes,
                pty.width,
                pty.height,
                pty.width_px,
                pty.height_px,
            )?;
        }

        channel.exec(command)?;

        let mut stdout = Vec::new();
        transfer::drain_to_writer(
            &mut channel,
            STDOUT_STREAM,
            &mut stdout,
            OUTPUT_CHUNK,
            None,
            &options.cancel,
        )?;
        let mut stderr = Vec::new();
        transfer::drain_to_writer(
            &mut channel,
            STDERR_STREAM,
            &mut stderr,
            OUTPUT_CHUNK,
            None,
            &options.cancel,
        )?;

        channel.close()?;
        let exit_code = channel.exit_status();
        let exit_signal = channel.exit_signal();
        debug!(exit_code, ?exit_signal, "command finished");

        Ok(CommandResult {
            successful: true,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: Some(exit_code),
            exit_signal,
        })
    }

    /// Starts a command and hands the still-open channel to the caller as
    /// a [`CommandStream`] with live stdout/stderr readers.
    ///
    /// Unlike [`execute_command`], a refused channel open is an error here:
    /// there is no result object to carry a soft failure.
    ///
    /// [`execute_command`]: Session::execute_command
    pub fn execute_command_streaming<'a>(
        &'a mut self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<CommandStream<'a>> {
        self.ensure_status(&[ConnectionStatus::LoggedIn], "ExecuteCommand")?;

        let Some(mut channel) =
            Channel::open_session(self.sess, options.window_size, options.packet_size)
        else {
            return Err(unsafe {
                Error::from_session(self.sess, "failed to open command channel")
            });
        };

        if let Some(pty) = &options.pty {
            channel.request_pty(
                pty.terminal,
                &pty.modes,
                pty.width,
                pty.height,
                pty.width_px,
                pty.height_px,
            )?;
        }
        channel.exec(command)?;

        Ok(CommandStream::new(channel))
    }

    /// Downloads a remote file over SCP into `dest`.
    ///
    /// Returns `true` only if the bytes received equal the size the remote
    /// declared. `dest` is not flushed or closed.
    pub fn read_file(
        &mut self,
        path: &str,
        dest: &mut impl Write,
        options: &ReadOptions,
    ) -> Result<bool> {
        self.ensure_status(&[ConnectionStatus::LoggedIn], "ReadFile")?;

        debug!(path, "starting SCP download");
        let path_c = path_cstring(path)?;
        let mut stat: raw::libssh2_struct_stat = unsafe { std::mem::zeroed() };
        let chan = unsafe { raw::libssh2_scp_recv2(self.sess, path_c.as_ptr(), &mut stat) };
        if chan.is_null() {
            return Err(unsafe {
                Error::from_session(self.sess, "failed to open SCP receive channel")
            });
        }
        let mut channel = unsafe { Channel::from_raw(chan, self.sess) };

        // The only stat field this layer interprets.
        let remote_size = stat.st_size as u64;
        debug!(remote_size, "remote file size declared");

        let received = transfer::drain_to_writer(
            &mut channel,
            STDOUT_STREAM,
            dest,
            options.buffer_size,
            Some(remote_size),
            &options.cancel,
        );
        finalize_scp(&mut channel);

        let received = received?;
        debug!(received, remote_size, "SCP download finished");
        Ok(received == remote_size)
    }

    /// Uploads `source` to a remote path over SCP.
    ///
    /// The source must be seekable because SCP declares the total size
    /// before the first byte; the remaining length from the current
    /// position is what gets sent. Returns `true` only if the bytes
    /// transferred equal that declared length. `source` is left at
    /// wherever the copy stopped.
    pub fn write_file(
        &mut self,
        path: &str,
        source: &mut (impl Read + Seek),
        options: &WriteOptions,
    ) -> Result<bool> {
        self.ensure_status(&[ConnectionStatus::LoggedIn], "WriteFile")?;

        let position = source
            .stream_position()
            .map_err(|e| Error::wrapped("source stream is not seekable", e))?;
        let end = source
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::wrapped("source stream is not seekable", e))?;
        source
            .seek(SeekFrom::Start(position))
            .map_err(|e| Error::wrapped("failed to rewind source stream", e))?;
        let file_size = end - position;

        debug!(path, file_size, mode = options.mode, "starting SCP upload");
        let path_c = path_cstring(path)?;
        let chan = unsafe {
            raw::libssh2_scp_send64(
                self.sess,
                path_c.as_ptr(),
                (options.mode & 0o777) as c_int,
                file_size as i64,
                0,
                0,
            )
        };
        if chan.is_null() {
            return Err(unsafe {
                Error::from_session(self.sess, "failed to open SCP send channel")
            });
        }
        let mut channel = unsafe { Channel::from_raw(chan, self.sess) };

        let sent = transfer::feed_from_reader(
            &mut channel,
            STDOUT_STREAM,
            source,
            file_size,
            options.buffer_size,
            &options.cancel,
        );
        finalize_scp(&mut channel);

        let sent = sent?;
        debug!(sent, file_size, "SCP upload finished");
        Ok(sent == file_size)
    }

    /// The server's host key, for out-of-band verification.
    pub fn host_key(&self) -> Result<HostKey> {
        self.ensure_status(
            &[ConnectionStatus::Connected, ConnectionStatus::LoggedIn],
            "GetHostKey",
        )?;

        let mut len: libc::size_t = 0;
        let mut kind: c_int = 0;
        let ptr = unsafe { raw::libssh2_session_hostkey(self.sess, &mut len, &mut kind) };
        if ptr.is_null() {
            return Err(unsafe { Error::from_session(self.sess, "no host key available") });
        }
        let data = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) }.to_vec();
        Ok(HostKey {
            data,
            key_type: HostKeyType::from_raw(kind),
        })
    }

    /// Fingerprint of the server's host key, or `None` when the engine has
    /// no digest of that type for this session.
    pub fn host_key_hash(&self, hash: HashType) -> Result<Option<Vec<u8>>> {
        self.ensure_status(
            &[ConnectionStatus::Connected, ConnectionStatus::LoggedIn],
            "GetHostKeyHash",
        )?;

        let ptr = unsafe { raw::libssh2_hostkey_hash(self.sess, hash.raw()) };
        if ptr.is_null() {
            return Ok(None);
        }
        Ok(Some(
            unsafe { std::slice::from_raw_parts(ptr as *const u8, hash.len()) }.to_vec(),
        ))
    }

    /// The algorithm actually negotiated for a slot during the handshake.
    pub fn negotiated_method(&self, method: Method) -> Result<Option<String>> {
        self.ensure_status(
            &[ConnectionStatus::Connected, ConnectionStatus::LoggedIn],
            "GetNegotiatedMethod",
        )?;

        let ptr = unsafe { raw::libssh2_session_methods(self.sess, method.raw()) };
        if ptr.is_null() {
            return Ok(None);
        }
        Ok(Some(
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned(),
        ))
    }

    /// Releases the engine handle and socket. Idempotent; the session is
    /// `Disposed` afterwards and must not be reused.
    ///
    /// A graceful disconnect notification is attempted when the transport
    /// is still up; its result, like socket shutdown errors, is ignored
    /// because the peer may already be gone.
    pub fn close(&mut self) {
        if self.status == ConnectionStatus::Disposed {
            return;
        }

        if !self.sess.is_null() {
            if matches!(
                self.status,
                ConnectionStatus::Connected | ConnectionStatus::LoggedIn
            ) {
                const DESCRIPTION: &[u8] = b"session closed\0";
                const LANG: &[u8] = b"\0";
                unsafe {
                    let _ = raw::libssh2_session_disconnect_ex(
                        self.sess,
                        raw::SSH_DISCONNECT_BY_APPLICATION,
                        DESCRIPTION.as_ptr() as *const c_char,
                        LANG.as_ptr() as *const c_char,
                    );
                }
            }
            unsafe {
                let _ = raw::libssh2_session_free(self.sess);
            }
            self.sess = std::ptr::null_mut();
        }

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        debug!("session disposed");
        self.status = ConnectionStatus::Disposed;
    }

    /// Async wrapper over [`connect`](Session::connect); the blocking call
    /// runs via [`tokio::task::block_in_place`], so a multi-threaded
    /// runtime is required.
    pub async fn connect_async(
        &mut self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<()> {
        tokio::task::block_in_place(|| self.connect(host, port, timeout))
    }

    /// Async wrapper over [`authenticate`](Session::authenticate).
    pub async fn authenticate_async(&mut self, credential: &Credential) -> Result<bool> {
        tokio::task::block_in_place(|| self.authenticate(credential))
    }

    /// Async wrapper over [`execute_command`](Session::execute_command).
    pub async fn execute_command_async(
        &mut self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<CommandResult> {
        tokio::task::block_in_place(|| self.execute_command(command, options))
    }

    /// Async wrapper over [`read_file`](Session::read_file).
    pub async fn read_file_async(
        &mut self,
        path: &str,
        dest: &mut (impl Write + Send),
        options: &ReadOptions,
    ) -> Result<bool> {
        tokio::task::block_in_place(|| self.read_file(path, dest, options))
    }

    /// Async wrapper over [`write_file`](Session::write_file).
    pub async fn write_file_async(
        &mut self,
        path: &str,
        source: &mut (impl Read + Seek + Send),
        options: &WriteOptions,
    ) -> Result<bool> {
        tokio::task::block_in_place(|| self.write_file(path, source, options))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// SCP finalization: EOF exchange, close wait, then free (via drop).
/// Always attempted, even after a failed transfer; individual step
/// failures are logged and swallowed because the peer may have closed
/// first.
fn finalize_scp(channel: &mut Channel) {
    if let Err(err) = channel.send_eof() {
        debug!(%err, "SCP finalize: send EOF failed");
    }
    if let Err(err) = channel.wait_eof() {
        debug!(%err, "SCP finalize: wait EOF failed");
    }
    if let Err(err) = channel.wait_closed() {
        debug!(%err, "SCP finalize: wait close failed");
    }
}

fn open_socket(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let stream = match timeout {
        None => TcpStream::connect((host, port)),
        Some(timeout) => (host, port)
            .to_socket_addrs()
            .and_then(|mut addrs| {
                let Some(addr) = addrs.next() else {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "host resolved to no addresses",
                    ));
                };
                TcpStream::connect_timeout(&addr, timeout)
            }),
    };
    stream.map_err(|e| Error::wrapped(format!("failed to connect to {host}:{port}"), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    #[test]
    fn test_new_session_starts_disconnected() {
        let session = Session::new();
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_operations_gate_on_state_without_native_calls() {
        let mut session = Session::new();

        let err = session
            .execute_command("true", &ExecOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = session
            .authenticate(&Credential::password("user", "secret"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = session
            .read_file("/etc/hostname", &mut Vec::<u8>::new(), &ReadOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);

        let mut source = Cursor::new(b"payload".to_vec());
        let err = session
            .write_file("/tmp/out", &mut source, &WriteOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = session.host_key().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = session.host_key_hash(HashType::SHA256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = session.negotiated_method(Method::Kex).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_method_prefs_only_while_disconnected() {
        let mut session = Session::new();
        session
            .set_method_pref(Method::Kex, &["curve25519-sha256"])
            .unwrap();
        assert_eq!(session.method_pref(Method::Kex), Some("curve25519-sha256"));

        session.close();
        let err = session
            .set_method_pref(Method::Kex, &["curve25519-sha256"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_empty_preference_list_is_a_usage_error() {
        let mut session = Session::new();
        let err = session.set_method_pref(Method::MacCs, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_zero_timeout_is_a_usage_error() {
        let mut session = Session::new();
        let err = session
            .connect("127.0.0.1", 22, Some(Duration::ZERO))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_hardened_prefs_fill_all_eight_slots() {
        let mut session = Session::new();
        session.harden_method_prefs().unwrap();
        for method in METHOD_APPLY_ORDER {
            assert!(
                session.method_pref(method).is_some(),
                "missing preference for {method:?}"
            );
        }
        assert!(session
            .method_pref(Method::Kex)
            .unwrap()
            .contains("curve25519-sha256"));
        assert_eq!(session.method_pref(Method::CompSc), Some("none"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = Session::new();
        session.close();
        assert_eq!(session.status(), ConnectionStatus::Disposed);
        session.close();
        assert_eq!(session.status(), ConnectionStatus::Disposed);

        // A disposed session rejects everything, including reconnects.
        let err = session.connect("localhost", 22, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_connect_failure_releases_and_stays_disconnected() {
        let mut session = Session::new();
        // Nothing listens on port 1; the connect is refused immediately.
        let err = session
            .connect("127.0.0.1", 1, Some(Duration::from_millis(500)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wrapped);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);

        // The failure path freed the handle, so a fresh session (and this
        // one) can still attempt connects.
        let mut second = Session::new();
        let err = second
            .connect("127.0.0.1", 1, Some(Duration::from_millis(500)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wrapped);
    }

    #[test]
    fn test_contract_defaults() {
        let exec = ExecOptions::default();
        assert_eq!(exec.window_size, 2 * 1024 * 1024);
        assert_eq!(exec.packet_size, 32 * 1024);
        assert!(exec.pty.is_none());

        let pty = PtyRequest::default();
        assert_eq!(pty.terminal, TerminalType::Xterm);
        assert_eq!(pty.modes.as_bytes(), &[0]);
        assert_eq!((pty.width, pty.height), (80, 24));
        assert_eq!((pty.width_px, pty.height_px), (0, 0));

        assert_eq!(ReadOptions::default().buffer_size, 32 * 1024);
        let write = WriteOptions::default();
        assert_eq!(write.mode, 0o644);
        assert_eq!(write.buffer_size, 32 * 1024);
    }

    #[test]
    fn test_engine_reports_a_version() {
        let version = engine_version();
        assert!(version.is_some_and(|v| !v.is_empty()));
    }

    #[test]
    fn test_hash_digest_lengths() {
        assert_eq!(HashType::MD5.len(), 16);
        assert_eq!(HashType::SHA1.len(), 20);
        assert_eq!(HashType::SHA256.len(), 32);
    }

    #[test]
    fn test_unsuccessful_result_shape() {
        let result = CommandResult::unsuccessful();
        assert!(!result.successful);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
        assert_eq!(result.exit_code, None);
        assert_eq!(result.exit_signal, None);
    }
}
