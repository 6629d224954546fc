//! SSH tunnel provider.
//!
//! Opens a local port-forward to a database host reachable only through an
//! SSH bastion. The forward's local port is substituted for the configured
//! host/port when the engine client connects. Tunnel failures propagate
//! immediately - tunnels are operator-configured infrastructure and are never
//! retried here.

use crate::models::TunnelSpec;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Failed to connect to SSH server {host}:{port}: {message}")]
    ConnectionFailed {
        host: String,
        port: u16,
        message: String,
    },

    #[error("SSH handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("SSH authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Private key file not found: {path}")]
    PrivateKeyNotFound { path: String },

    #[error("Failed to bind local forward port: {0}")]
    BindFailed(String),

    #[error("Failed to establish port forwarding: {0}")]
    PortForwardingFailed(String),
}

/// An established SSH port-forward.
///
/// The forwarding thread bridges connections accepted on the local port to
/// `remote_host:remote_port` through the SSH session. Closing is idempotent;
/// dropping the handle also closes it.
pub struct SshTunnel {
    session: ssh2::Session,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    is_running: Arc<AtomicBool>,
    forward_thread: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for SshTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnel")
            .field("local_port", &self.local_port)
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .field("is_running", &self.is_running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SshTunnel {
    /// Open a tunnel forwarding an ephemeral local port to
    /// `remote_host:remote_port` via the bastion in `spec`.
    ///
    /// Blocking; callers on the async path run this under `spawn_blocking`.
    pub fn open(spec: &TunnelSpec, remote_host: &str, remote_port: u16) -> Result<Self, TunnelError> {
        info!(
            ssh_host = %spec.host,
            ssh_port = spec.port,
            remote = format!("{}:{}", remote_host, remote_port),
            "Opening SSH tunnel"
        );

        use std::net::ToSocketAddrs;
        let sock_addr = (spec.host.as_str(), spec.port)
            .to_socket_addrs()
            .map_err(|e| TunnelError::ConnectionFailed {
                host: spec.host.clone(),
                port: spec.port,
                message: e.to_string(),
            })?
            .next()
            .ok_or_else(|| TunnelError::ConnectionFailed {
                host: spec.host.clone(),
                port: spec.port,
                message: "hostname did not resolve".to_string(),
            })?;

        let tcp = TcpStream::connect_timeout(&sock_addr, SSH_CONNECT_TIMEOUT).map_err(|e| {
            TunnelError::ConnectionFailed {
                host: spec.host.clone(),
                port: spec.port,
                message: e.to_string(),
            }
        })?;

        let mut session =
            ssh2::Session::new().map_err(|e| TunnelError::HandshakeFailed(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| TunnelError::HandshakeFailed(e.to_string()))?;

        authenticate(&mut session, spec)?;

        let local_port = find_available_port()?;
        let is_running = Arc::new(AtomicBool::new(true));
        let forward_thread = start_forwarding_thread(
            session.clone(),
            local_port,
            remote_host.to_string(),
            remote_port,
            is_running.clone(),
        )?;

        info!(local_port, "SSH tunnel established");

        Ok(Self {
            session,
            local_port,
            remote_host: remote_host.to_string(),
            remote_port,
            is_running,
            forward_thread: Some(forward_thread),
        })
    }

    /// The local port the engine client should dial instead of the remote
    /// host/port.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Tear the tunnel down. Closing an already-closed tunnel is a no-op.
    pub fn close(&mut self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.forward_thread.take() {
            let _ = handle.join();
        }

        if let Err(e) = self.session.disconnect(None, "tunnel closed", None) {
            warn!(error = %e, "Error disconnecting SSH session");
        }

        debug!(local_port = self.local_port, "SSH tunnel closed");
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Authenticate with a key file when configured, falling back to password.
fn authenticate(session: &mut ssh2::Session, spec: &TunnelSpec) -> Result<(), TunnelError> {
    if let Some(key_file) = &spec.key_file {
        let path = Path::new(key_file);
        if !path.exists() {
            return Err(TunnelError::PrivateKeyNotFound {
                path: key_file.clone(),
            });
        }
        debug!(path = %key_file, "Authenticating with private key");
        session
            .userauth_pubkey_file(&spec.username, None, path, None)
            .map_err(|e| TunnelError::AuthenticationFailed(e.to_string()))?;
    } else if let Some(password) = &spec.password {
        debug!("Authenticating with password");
        session
            .userauth_password(&spec.username, password)
            .map_err(|e| TunnelError::AuthenticationFailed(e.to_string()))?;
    } else {
        return Err(TunnelError::AuthenticationFailed(
            "no password or key file configured".to_string(),
        ));
    }

    if !session.authenticated() {
        return Err(TunnelError::AuthenticationFailed(
            "authentication not confirmed".to_string(),
        ));
    }
    Ok(())
}

/// Find an available local port for the tunnel.
fn find_available_port() -> Result<u16, TunnelError> {
    let listener =
        TcpListener::bind("127.0.0.1:0").map_err(|e| TunnelError::BindFailed(e.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|e| TunnelError::BindFailed(e.to_string()))?
        .port();
    drop(listener);
    Ok(port)
}

/// Start the thread accepting local connections and bridging them through
/// the SSH session.
fn start_forwarding_thread(
    session: ssh2::Session,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    is_running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, TunnelError> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", local_port))
        .map_err(|e| TunnelError::BindFailed(e.to_string()))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| TunnelError::BindFailed(e.to_string()))?;

    Ok(thread::spawn(move || {
        while is_running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((local_stream, _)) => {
                    let session = session.clone();
                    let remote_host = remote_host.clone();
                    let is_running = is_running.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(
                            local_stream,
                            &session,
                            &remote_host,
                            remote_port,
                            &is_running,
                        ) {
                            debug!(error = %e, "Forwarded connection ended with error");
                        }
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    if is_running.load(Ordering::SeqCst) {
                        error!(error = %e, "Error accepting tunnel connection");
                    }
                    break;
                }
            }
        }
        debug!("Tunnel forwarding thread exiting");
    }))
}

/// Bridge a single local connection to the remote endpoint.
fn handle_connection(
    mut local_stream: TcpStream,
    session: &ssh2::Session,
    remote_host: &str,
    remote_port: u16,
    is_running: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    local_stream.set_nonblocking(false)?;
    local_stream.set_read_timeout(Some(Duration::from_millis(100)))?;

    let mut channel = session
        .channel_direct_tcpip(remote_host, remote_port, None)
        .map_err(|e| TunnelError::PortForwardingFailed(e.to_string()))?;

    session.set_blocking(false);

    let mut local_buf = [0u8; 8192];
    let mut remote_buf = [0u8; 8192];

    while is_running.load(Ordering::SeqCst) {
        let mut activity = false;

        match local_stream.read(&mut local_buf) {
            Ok(0) => break,
            Ok(n) => {
                session.set_blocking(true);
                channel.write_all(&local_buf[..n])?;
                session.set_blocking(false);
                activity = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }

        match channel.read(&mut remote_buf) {
            Ok(0) => {
                if channel.eof() {
                    break;
                }
            }
            Ok(n) => {
                local_stream.write_all(&remote_buf[..n])?;
                activity = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }

        if !activity {
            thread::sleep(Duration::from_millis(1));
        }
    }

    session.set_blocking(true);
    let _ = channel.send_eof();
    let _ = channel.wait_close();

    Ok(())
}
