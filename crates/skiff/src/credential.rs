//! Authentication credential strategies
//!
//! A [`Credential`] names one authentication method and carries only that
//! method's parameters. Credentials are stateless values: construct once,
//! reuse across attempts and sessions. Each variant validates its own
//! parameters before touching the engine, so malformed credentials fail
//! fast with `false` instead of a wasted round trip.
//!
//! Success is defined by the engine's return status being non-negative;
//! failure is an ordinary `false`, so callers can walk a credential list
//! without exception-driven control flow.

use libssh2_sys as raw;
use std::ffi::CString;
use std::os::raw::{c_char, c_uint};
use std::path::PathBuf;
use tracing::debug;

/// An authentication method plus its parameters.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Username and password.
    Password {
        /// Username to authenticate as.
        username: String,
        /// Account password.
        password: String,
    },
    /// Public-key authentication with keys on disk.
    PublicKeyFile {
        /// Username to authenticate as.
        username: String,
        /// Optional explicit public key path. When absent (or when the
        /// first attempt fails), the engine derives it from the private key.
        public_key: Option<PathBuf>,
        /// Private key path.
        private_key: PathBuf,
        /// Passphrase protecting the private key, if any.
        passphrase: Option<String>,
    },
    /// Public-key authentication with key material in memory.
    PublicKeyMemory {
        /// Username to authenticate as.
        username: String,
        /// Public key bytes.
        public_key: Vec<u8>,
        /// Private key bytes.
        private_key: Vec<u8>,
        /// Passphrase protecting the private key, if any.
        passphrase: Option<String>,
    },
    /// Authentication through the local SSH agent.
    Agent {
        /// Username to authenticate as.
        username: String,
    },
    /// Host-based authentication (rarely used outside trusted clusters).
    HostBased {
        /// Username to authenticate as.
        username: String,
        /// Public key path.
        public_key: PathBuf,
        /// Private key path.
        private_key: PathBuf,
        /// Passphrase protecting the private key, if any.
        passphrase: Option<String>,
        /// Hostname of the client machine.
        hostname: String,
        /// Local username on the client machine; defaults to `username`.
        local_username: Option<String>,
    },
}

impl Credential {
    /// Password credential.
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Credential {
        Credential::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Key-file credential. The engine derives the public key from the
    /// private key unless an explicit path is supplied.
    pub fn key_file(
        username: impl Into<String>,
        private_key: impl Into<PathBuf>,
        public_key: Option<PathBuf>,
        passphrase: Option<String>,
    ) -> Credential {
        Credential::PublicKeyFile {
            username: username.into(),
            public_key,
            private_key: private_key.into(),
            passphrase,
        }
    }

    /// In-memory key credential.
    pub fn key_memory(
        username: impl Into<String>,
        public_key: Vec<u8>,
        private_key: Vec<u8>,
        passphrase: Option<String>,
    ) -> Credential {
        Credential::PublicKeyMemory {
            username: username.into(),
            public_key,
            private_key,
            passphrase,
        }
    }

    /// Agent credential: tries every identity the local agent offers.
    pub fn agent(username: impl Into<String>) -> Credential {
        Credential::Agent {
            username: username.into(),
        }
    }

    /// Checks this credential's own parameters without touching the engine.
    ///
    /// Returns `false` for blank usernames, blank passwords, empty key
    /// buffers or paths: the same conditions `authenticate` fails fast on.
    pub fn validate(&self) -> bool {
        match self {
            Credential::Password { username, password } => {
                !username.trim().is_empty() && !password.trim().is_empty()
            }
            Credential::PublicKeyFile {
                username,
                private_key,
                ..
            } => !username.trim().is_empty() && !private_key.as_os_str().is_empty(),
            Credential::PublicKeyMemory {
                username,
                public_key,
                private_key,
                ..
            } => {
                !username.trim().is_empty()
                    && !public_key.is_empty()
                    && !private_key.is_empty()
            }
            Credential::Agent { username } => !username.trim().is_empty(),
            Credential::HostBased {
                username,
                public_key,
                private_key,
                hostname,
                ..
            } => {
                !username.trim().is_empty()
                    && !public_key.as_os_str().is_empty()
                    && !private_key.as_os_str().is_empty()
                    && !hostname.trim().is_empty()
            }
        }
    }

    /// Runs this credential's negotiation against a connected session.
    ///
    /// Invalid parameters short-circuit to `false` before any native call.
    ///
    /// # Safety
    /// `sess` must be a live engine session handle in the connected state.
    pub(crate) unsafe fn authenticate(&self, sess: *mut raw::LIBSSH2_SESSION) -> bool {
        if !self.validate() {
            debug!("credential failed parameter validation, skipping negotiation");
            return false;
        }

        match self {
            Credential::Password { username, password } => {
                let rc = raw::libssh2_userauth_password_ex(
                    sess,
                    username.as_ptr() as *const c_char,
                    username.len() as c_uint,
                    password.as_ptr() as *const c_char,
                    password.len() as c_uint,
                    None,
                );
                rc >= 0
            }
            Credential::PublicKeyFile {
                username,
                public_key,
                private_key,
                passphrase,
            } => {
                let Some(private_key) = cstring_path(private_key) else {
                    return false;
                };
                let passphrase = passphrase.as_deref().and_then(cstring);
                let passphrase_ptr = passphrase
                    .as_ref()
                    .map_or(std::ptr::null(), |p| p.as_ptr());

                // First attempt: private key only, letting the engine
                // derive the public half.
                let rc = raw::libssh2_userauth_publickey_fromfile_ex(
                    sess,
                    username.as_ptr() as *const c_char,
                    username.len() as c_uint,
                    std::ptr::null(),
                    private_key.as_ptr(),
                    passphrase_ptr,
                );
                if rc >= 0 {
                    return true;
                }

                let Some(public_key) = public_key.as_deref().and_then(cstring_path) else {
                    return false;
                };
                debug!("private-key-only attempt failed, retrying with explicit public key");
                let rc = raw::libssh2_userauth_publickey_fromfile_ex(
                    sess,
                    username.as_ptr() as *const c_char,
                    username.len() as c_uint,
                    public_key.as_ptr(),
                    private_key.as_ptr(),
                    passphrase_ptr,
                );
                rc >= 0
            }
            Credential::PublicKeyMemory {
                username,
                public_key,
                private_key,
                passphrase,
            } => {
                let passphrase = passphrase.as_deref().and_then(cstring);
                let passphrase_ptr = passphrase
                    .as_ref()
                    .map_or(std::ptr::null(), |p| p.as_ptr());

                let rc = raw::libssh2_userauth_publickey_frommemory(
                    sess,
                    username.as_ptr() as *const c_char,
                    username.len(),
                    public_key.as_ptr() as *const c_char,
                    public_key.len(),
                    private_key.as_ptr() as *const c_char,
                    private_key.len(),
                    passphrase_ptr,
                );
                rc >= 0
            }
            Credential::Agent { username } => authenticate_via_agent(sess, username),
            Credential::HostBased {
                username,
                public_key,
                private_key,
                passphrase,
                hostname,
                local_username,
            } => {
                let Some(public_key) = cstring_path(public_key) else {
                    return false;
                };
                let Some(private_key) = cstring_path(private_key) else {
                    return false;
                };
                let passphrase = passphrase.as_deref().and_then(cstring);
                let passphrase_ptr = passphrase
                    .as_ref()
                    .map_or(std::ptr::null(), |p| p.as_ptr());
                let local = local_username
                    .as_deref()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or(username);

                let rc = raw::libssh2_userauth_hostbased_fromfile_ex(
                    sess,
                    username.as_ptr() as *const c_char,
                    username.len() as c_uint,
                    public_key.as_ptr(),
                    private_key.as_ptr(),
                    passphrase_ptr,
                    hostname.as_ptr() as *const c_char,
                    hostname.len() as c_uint,
                    local.as_ptr() as *const c_char,
                    local.len() as c_uint,
                );
                rc >= 0
            }
        }
    }
}

/// Walks the local agent's identity list, trying each against `username`.
///
/// Missing or unreachable agents degrade to `false` rather than erroring,
/// so environments without an agent fall through to the next credential.
unsafe fn authenticate_via_agent(sess: *mut raw::LIBSSH2_SESSION, username: &str) -> bool {
    let Some(username) = cstring(username) else {
        return false;
    };

    let agent = raw::libssh2_agent_init(sess);
    if agent.is_null() {
        return false;
    }

    // Connect/list/walk, with disconnect+free on every path.
    let authenticated = 'agent: {
        if raw::libssh2_agent_connect(agent) != 0 {
            debug!("no reachable SSH agent");
            break 'agent false;
        }

        let result = 'connected: {
            if raw::libssh2_agent_list_identities(agent) != 0 {
                break 'connected false;
            }

            let mut identity: *mut raw::libssh2_agent_publickey = std::ptr::null_mut();
            let mut prev: *mut raw::libssh2_agent_publickey = std::ptr::null_mut();
            loop {
                let rc = raw::libssh2_agent_get_identity(agent, &mut identity, prev);
                if rc == 1 {
                    // List exhausted.
                    break 'connected false;
                }
                if rc < 0 {
                    break 'connected false;
                }
                if raw::libssh2_agent_userauth(agent, username.as_ptr(), identity) == 0 {
                    break 'connected true;
                }
                prev = identity;
            }
        };

        raw::libssh2_agent_disconnect(agent);
        result
    };

    raw::libssh2_agent_free(agent);
    authenticated
}

fn cstring(s: &str) -> Option<CString> {
    CString::new(s).ok()
}

fn cstring_path(path: &std::path::Path) -> Option<CString> {
    CString::new(path.to_str()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_password_fields_fail_validation() {
        assert!(!Credential::password("", "secret").validate());
        assert!(!Credential::password("user", "").validate());
        assert!(!Credential::password("  ", "secret").validate());
        assert!(Credential::password("user", "secret").validate());
    }

    #[test]
    fn test_empty_key_material_fails_validation() {
        assert!(!Credential::key_memory("user", vec![], vec![1], None).validate());
        assert!(!Credential::key_memory("user", vec![1], vec![], None).validate());
        assert!(Credential::key_memory("user", vec![1], vec![2], None).validate());
    }

    #[test]
    fn test_missing_private_key_path_fails_validation() {
        assert!(!Credential::key_file("user", "", None, None).validate());
        assert!(Credential::key_file("user", "/home/u/.ssh/id_ed25519", None, None).validate());
    }

    #[test]
    fn test_agent_requires_username() {
        assert!(!Credential::agent("").validate());
        assert!(Credential::agent("user").validate());
    }

    #[test]
    fn test_host_based_requires_hostname_and_keys() {
        let cred = Credential::HostBased {
            username: "user".to_string(),
            public_key: PathBuf::from("/k.pub"),
            private_key: PathBuf::from("/k"),
            passphrase: None,
            hostname: String::new(),
            local_username: None,
        };
        assert!(!cred.validate());
    }

    #[test]
    fn test_invalid_credentials_never_reach_the_engine() {
        // A null session handle would crash if negotiation were attempted;
        // validation must short-circuit first.
        let cred = Credential::password("", "");
        assert!(!unsafe { cred.authenticate(std::ptr::null_mut()) });

        let cred = Credential::key_memory("user", vec![], vec![], None);
        assert!(!unsafe { cred.authenticate(std::ptr::null_mut()) });
    }
}
