//! # Skiff
//!
//! A small SSH client library: session lifecycle, remote command execution
//! with optional PTY, and SCP file transfer over a battle-tested native
//! engine.
//!
//! A [`Session`] walks a strict lifecycle (`Disconnected` -> `Connected` ->
//! `LoggedIn` -> `Disposed`); credentials are pluggable [`Credential`]
//! strategies, and every long-running operation accepts a cooperative
//! cancellation token.
//!
//! ```no_run
//! use skiff::{Credential, ExecOptions, Session};
//!
//! fn main() -> skiff::Result<()> {
//!     let mut session = Session::new();
//!     session.connect("server.example", 22, None)?;
//!     if !session.authenticate(&Credential::password("deploy", "secret"))? {
//!         return Ok(());
//!     }
//!     let result = session.execute_command("uname -a", &ExecOptions::default())?;
//!     println!("{}", result.stdout);
//!     session.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Error types for SSH operations
pub mod error;

/// Terminal types and terminal mode encoding for PTY requests
pub mod terminal;

/// Authentication credential strategies
pub mod credential;

mod channel;
mod transfer;

/// Session lifecycle, command execution, and file transfer
pub mod session;

pub use channel::ChannelStream;
pub use credential::Credential;
pub use error::{Error, ErrorKind, Result};
pub use session::{
    engine_version, CommandResult, CommandStream, ConnectionStatus, ExecOptions, HashType,
    HostKey, HostKeyType, Method, PtyRequest, ReadOptions, Session, WriteOptions,
};
pub use terminal::{TerminalMode, TerminalModes, TerminalModesBuilder, TerminalType};
