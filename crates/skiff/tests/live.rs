//! Integration tests against a live SSH server
//!
//! These tests need a reachable server and are ignored by default. Point
//! them at one with environment variables and run with `--ignored`:
//!
//! ```text
//! SKIFF_TEST_HOST=127.0.0.1 SKIFF_TEST_PORT=2222 \
//! SKIFF_TEST_USER=test SKIFF_TEST_PASSWORD=test \
//! cargo test --test live -- --ignored
//! ```

use anyhow::{bail, Context, Result};
use rand::Rng;
use skiff::{
    Credential, ExecOptions, HashType, Method, PtyRequest, ReadOptions, Session, TerminalMode,
    TerminalModesBuilder, WriteOptions,
};
use std::io::Cursor;
use std::time::Duration;

struct TestServer {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl TestServer {
    fn from_env() -> Result<TestServer> {
        // RUST_LOG=skiff=debug surfaces the engine call trail on failures.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let host = std::env::var("SKIFF_TEST_HOST").context("SKIFF_TEST_HOST not set")?;
        let port = std::env::var("SKIFF_TEST_PORT")
            .unwrap_or_else(|_| "22".to_string())
            .parse()
            .context("SKIFF_TEST_PORT is not a port number")?;
        let user = std::env::var("SKIFF_TEST_USER").context("SKIFF_TEST_USER not set")?;
        let password =
            std::env::var("SKIFF_TEST_PASSWORD").context("SKIFF_TEST_PASSWORD not set")?;
        Ok(TestServer {
            host,
            port,
            user,
            password,
        })
    }

    fn connect(&self) -> Result<Session> {
        let mut session = Session::new();
        session
            .connect(&self.host, self.port, Some(Duration::from_secs(10)))
            .context("failed to connect to test server")?;
        Ok(session)
    }

    fn login(&self) -> Result<Session> {
        let mut session = self.connect()?;
        let ok = session
            .authenticate(&Credential::password(&self.user, &self.password))
            .context("authentication errored")?;
        if !ok {
            bail!("test server rejected the configured credentials");
        }
        Ok(session)
    }
}

fn remote_scratch_path() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("/tmp/skiff-test-{suffix:016x}")
}

/// Connect, inspect the handshake, and dispose without authenticating.
#[test]
#[ignore]
fn test_connect_and_dispose() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = server.connect()?;

    let kex = session.negotiated_method(Method::Kex)?;
    assert!(kex.is_some(), "no key exchange algorithm negotiated");

    let fingerprint = session.host_key_hash(HashType::SHA256)?;
    assert_eq!(fingerprint.map(|f| f.len()), Some(32));

    let host_key = session.host_key()?;
    assert!(!host_key.data.is_empty());

    session.close();
    Ok(())
}

/// Correct password authenticates; a wrong one returns false and leaves
/// the session usable for another attempt.
#[test]
#[ignore]
fn test_password_authentication_outcomes() -> Result<()> {
    let server = TestServer::from_env()?;

    let mut session = server.connect()?;
    let wrong = Credential::password(&server.user, "definitely-not-the-password");
    assert!(!session.authenticate(&wrong)?);

    let right = Credential::password(&server.user, &server.password);
    assert!(session.authenticate(&right)?);
    session.close();
    Ok(())
}

/// Command output and exit codes round-trip faithfully.
#[test]
#[ignore]
fn test_command_output_and_exit_code() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = server.login()?;

    let result = session.execute_command("printf hello", &ExecOptions::default())?;
    assert!(result.successful);
    assert_eq!(result.stdout, "hello");
    assert_eq!(result.exit_code, Some(0));

    let result = session.execute_command("exit 42", &ExecOptions::default())?;
    assert_eq!(result.exit_code, Some(42));

    let result =
        session.execute_command("printf oops >&2; false", &ExecOptions::default())?;
    assert_eq!(result.stderr, "oops");
    assert_eq!(result.exit_code, Some(1));

    session.close();
    Ok(())
}

/// A PTY request with echo disabled still executes and captures output.
#[test]
#[ignore]
fn test_command_with_pty() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = server.login()?;

    let options = ExecOptions {
        pty: Some(PtyRequest {
            modes: TerminalModesBuilder::new()
                .flag(TerminalMode::Echo, false)
                .build(),
            ..PtyRequest::default()
        }),
        ..ExecOptions::default()
    };
    let result = session.execute_command("tty && printf ready", &options)?;
    assert!(result.successful);
    assert!(result.stdout.contains("ready"));
    assert_eq!(result.exit_code, Some(0));

    session.close();
    Ok(())
}

/// Streaming execution delivers stdout incrementally and reports the exit
/// status afterwards.
#[test]
#[ignore]
fn test_streaming_execution() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = server.login()?;

    let stream =
        session.execute_command_streaming("printf abc; printf err >&2", &ExecOptions::default())?;
    let mut stdout = String::new();
    std::io::Read::read_to_string(&mut stream.stdout(), &mut stdout)?;
    let mut stderr = String::new();
    std::io::Read::read_to_string(&mut stream.stderr(), &mut stderr)?;
    assert_eq!(stdout, "abc");
    assert_eq!(stderr, "err");

    let result = stream.wait_exit()?;
    assert_eq!(result.exit_code, Some(0));

    session.close();
    Ok(())
}

/// Upload then download round-trips payloads across size boundaries,
/// including empty files and sizes straddling the transfer buffer.
#[test]
#[ignore]
fn test_scp_round_trip_at_size_boundaries() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = server.login()?;

    for size in [0usize, 1, 4095, 4096, 1024 * 1024] {
        let mut payload = vec![0u8; size];
        rand::thread_rng().fill(payload.as_mut_slice());
        let remote = remote_scratch_path();

        let mut source = Cursor::new(payload.clone());
        let complete =
            session.write_file(&remote, &mut source, &WriteOptions::default())?;
        assert!(complete, "upload of {size} bytes was incomplete");

        let mut downloaded = Vec::new();
        let complete = session.read_file(&remote, &mut downloaded, &ReadOptions::default())?;
        assert!(complete, "download of {size} bytes was incomplete");
        assert_eq!(downloaded, payload, "payload mismatch at {size} bytes");

        session.execute_command(&format!("rm -f {remote}"), &ExecOptions::default())?;
    }

    session.close();
    Ok(())
}

/// Downloading a missing remote path is an error, not a hang.
#[test]
#[ignore]
fn test_scp_download_of_missing_file_fails() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = server.login()?;

    let mut dest = Vec::<u8>::new();
    let missing = remote_scratch_path();
    assert!(session
        .read_file(&missing, &mut dest, &ReadOptions::default())
        .is_err());
    assert!(dest.is_empty());

    // The session survives the failed transfer.
    let result = session.execute_command("true", &ExecOptions::default())?;
    assert_eq!(result.exit_code, Some(0));

    session.close();
    Ok(())
}

/// Hardened algorithm preferences still negotiate with a modern server.
#[test]
#[ignore]
fn test_hardened_preferences_negotiate() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = Session::new();
    session.harden_method_prefs()?;
    session.connect(&server.host, server.port, Some(Duration::from_secs(10)))?;

    let kex = session
        .negotiated_method(Method::Kex)?
        .context("no key exchange negotiated")?;
    assert!(
        session.method_pref(Method::Kex).unwrap().contains(&kex),
        "negotiated kex {kex} not in the hardened preference list"
    );

    session.close();
    Ok(())
}

/// The async wrappers drive a full session on a multi-threaded runtime.
#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn test_async_wrappers() -> Result<()> {
    let server = TestServer::from_env()?;
    let mut session = Session::new();
    session
        .connect_async(&server.host, server.port, Some(Duration::from_secs(10)))
        .await?;
    let ok = session
        .authenticate_async(&Credential::password(&server.user, &server.password))
        .await?;
    assert!(ok);

    let result = session
        .execute_command_async("printf async", &ExecOptions::default())
        .await?;
    assert_eq!(result.stdout, "async");

    session.close();
    Ok(())
}
