//! Relay transports
//!
//! The pipeline talks to the bus relay through three narrow traits: a `Connector`
//! opens a `Transport` to an endpoint, the transport runs one-shot commands and opens
//! the long-lived dump stream, and a `StreamSession` yields raw bytes from that
//! stream. Three implementations are provided: `SshConnector` runs commands on the
//! relay host through the system `ssh` client, `LocalConnector` runs them on this host
//! through `sh -c`, and `ReplayConnector` streams a recorded dump file.

use crate::config::RemoteEndpoint;
use crate::types::{Result, TelemetryError};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Output of a one-shot command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Opens transports
pub trait Connector {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn Transport>>;
}

/// A connection to the relay host
pub trait Transport: Send {
    /// Run `command` to completion
    fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    /// Start a long-running command and stream its output
    fn open_stream(&mut self, command: &str) -> Result<Box<dyn StreamSession>>;
}

/// Byte stream of a long-running command
pub trait StreamSession: Send {
    /// Blocking read into `buf`; `Ok(0)` means the stream has closed
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Handle that ends the stream from another thread, making a blocked
    /// `receive` return. `None` if the stream cannot block indefinitely.
    fn kill_handle(&self) -> Option<KillHandle> {
        None
    }
}

/// Ends a stream from outside the thread that reads it
pub struct KillHandle(Box<dyn FnOnce() + Send>);

impl KillHandle {
    pub fn new(kill: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(kill))
    }

    pub fn kill(self) {
        (self.0)()
    }
}

impl fmt::Debug for KillHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KillHandle")
    }
}

/// Runs commands on the relay host over SSH.
///
/// Key-based authentication is used when the endpoint has no password; otherwise the
/// password is handed to `sshpass` through its environment, never on the command line.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn Transport>> {
        log::debug!("SSH transport to {}@{}", endpoint.user, endpoint.host);
        Ok(Box::new(SshTransport {
            endpoint: endpoint.clone(),
        }))
    }
}

struct SshTransport {
    endpoint: RemoteEndpoint,
}

impl SshTransport {
    /// Local process that runs `remote` on the relay host
    fn command(&self, remote: &str) -> Command {
        let mut command = if self.endpoint.password.is_empty() {
            let mut ssh = Command::new("ssh");
            ssh.args(["-o", "BatchMode=yes"]);
            ssh
        } else {
            let mut sshpass = Command::new("sshpass");
            sshpass.arg("-e").arg("ssh").env("SSHPASS", &self.endpoint.password);
            sshpass
        };
        command
            .args(["-o", "StrictHostKeyChecking=accept-new", "-o", "ConnectTimeout=5"])
            .arg(format!("{}@{}", self.endpoint.user, self.endpoint.host))
            .arg("--")
            .arg(remote);
        command
    }
}

impl Transport for SshTransport {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        run_to_completion(self.command(command), command)
    }

    fn open_stream(&mut self, command: &str) -> Result<Box<dyn StreamSession>> {
        ChildStream::spawn(self.command(command), command)
    }
}

/// Runs commands on the local host, e.g. against a SocketCAN interface
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl Connector for LocalConnector {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn Transport>> {
        log::debug!("Local transport (ignoring endpoint {}@{})", endpoint.user, endpoint.host);
        Ok(Box::new(LocalTransport))
    }
}

struct LocalTransport;

impl LocalTransport {
    fn command(command: &str) -> Command {
        let mut sh = Command::new("sh");
        sh.arg("-c").arg(command);
        sh
    }
}

impl Transport for LocalTransport {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        run_to_completion(Self::command(command), command)
    }

    fn open_stream(&mut self, command: &str) -> Result<Box<dyn StreamSession>> {
        ChildStream::spawn(Self::command(command), command)
    }
}

fn run_to_completion(mut process: Command, command: &str) -> Result<CommandOutput> {
    let output = process
        .output()
        .map_err(|e| TelemetryError::TransportFailure(format!("cannot run '{}': {}", command, e)))?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Stdout of a child process; the child is killed when the stream is dropped or its
/// kill handle is used
struct ChildStream {
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
}

impl ChildStream {
    fn spawn(mut process: Command, command: &str) -> Result<Box<dyn StreamSession>> {
        let mut child = process
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TelemetryError::TransportFailure(format!("cannot start '{}': {}", command, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TelemetryError::TransportFailure(format!("'{}' has no stdout", command)))?;
        log::info!("Streaming '{}' (pid {})", command, child.id());
        Ok(Box::new(ChildStream {
            child: Arc::new(Mutex::new(child)),
            stdout,
        }))
    }
}

fn kill_child(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = child.kill() {
        log::debug!("Stream process already gone: {}", e);
    }
    match child.wait() {
        Ok(status) => log::debug!("Stream process {} exited: {}", child.id(), status),
        Err(e) => log::warn!("Error waiting for stream process: {}", e),
    }
}

impl StreamSession for ChildStream {
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stdout
            .read(buf)
            .map_err(|e| TelemetryError::TransportFailure(format!("stream read failed: {}", e)))
    }

    fn kill_handle(&self) -> Option<KillHandle> {
        let child = Arc::clone(&self.child);
        Some(KillHandle::new(move || kill_child(&child)))
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        kill_child(&self.child);
    }
}

/// Streams a recorded dump file and acknowledges every command
#[derive(Debug, Clone)]
pub struct ReplayConnector {
    path: PathBuf,
    chunk_size: usize,
    chunk_delay: Duration,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ReplayConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: 1024,
            chunk_delay: Duration::ZERO,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Builder method: bytes handed out per receive
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Builder method: pause between chunks to pace the replay
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Commands executed through any transport of this connector
    pub fn sent_commands(&self) -> Vec<String> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Connector for ReplayConnector {
    fn connect(&self, _endpoint: &RemoteEndpoint) -> Result<Box<dyn Transport>> {
        Ok(Box::new(ReplayTransport {
            connector: self.clone(),
        }))
    }
}

struct ReplayTransport {
    connector: ReplayConnector,
}

impl Transport for ReplayTransport {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        log::debug!("Replay acknowledges '{}'", command);
        match self.connector.sent.lock() {
            Ok(mut sent) => sent.push(command.to_string()),
            Err(poisoned) => poisoned.into_inner().push(command.to_string()),
        }
        Ok(CommandOutput::default())
    }

    fn open_stream(&mut self, command: &str) -> Result<Box<dyn StreamSession>> {
        let file = File::open(&self.connector.path)?;
        log::info!(
            "Replaying '{}' in place of '{}'",
            self.connector.path.display(),
            command
        );
        Ok(Box::new(ReplayStream {
            file,
            chunk_size: self.connector.chunk_size,
            chunk_delay: self.connector.chunk_delay,
        }))
    }
}

struct ReplayStream {
    file: File,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl StreamSession for ReplayStream {
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.chunk_delay.is_zero() {
            thread::sleep(self.chunk_delay);
        }
        let limit = self.chunk_size.min(buf.len());
        Ok(self.file.read(&mut buf[..limit])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_replay_streams_in_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "can0  130  [00]\ncan0  110  [2]  D3 1B\n").unwrap();

        let connector = ReplayConnector::new(file.path()).with_chunk_size(5);
        let mut transport = connector.connect(&RemoteEndpoint::default()).unwrap();
        let mut stream = transport.open_stream("candump can0").unwrap();

        let mut buf = [0u8; 64];
        let mut collected = Vec::new();
        loop {
            let n = stream.receive(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 5);
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"can0  130  [00]\ncan0  110  [2]  D3 1B\n");
    }

    #[test]
    fn test_replay_records_commands() {
        let connector = ReplayConnector::new("unused.log");
        let mut transport = connector.connect(&RemoteEndpoint::default()).unwrap();
        let output = transport.exec("cansend can0 202##00A").unwrap();
        assert!(output.stderr.is_empty());
        assert_eq!(connector.sent_commands(), vec!["cansend can0 202##00A".to_string()]);
    }

    #[test]
    fn test_replay_missing_file() {
        let connector = ReplayConnector::new("/nonexistent/dump.log");
        let mut transport = connector.connect(&RemoteEndpoint::default()).unwrap();
        assert!(transport.open_stream("candump can0").is_err());
    }

    #[test]
    fn test_ssh_command_uses_endpoint() {
        let endpoint = RemoteEndpoint {
            host: "10.0.0.2".to_string(),
            user: "pi".to_string(),
            password: String::new(),
        };
        let transport = SshTransport { endpoint };
        let command = transport.command("candump can0");
        assert_eq!(command.get_program(), "ssh");
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(&args[args.len() - 3..], ["pi@10.0.0.2", "--", "candump can0"]);
    }

    #[test]
    fn test_ssh_password_passed_through_environment() {
        let endpoint = RemoteEndpoint {
            host: "10.0.0.2".to_string(),
            user: "pi".to_string(),
            password: "hunter2".to_string(),
        };
        let transport = SshTransport { endpoint };
        let command = transport.command("cat /sys/class/thermal/thermal_zone0/temp");
        assert_eq!(command.get_program(), "sshpass");
        assert!(command.get_args().all(|a| a != "hunter2"));
        let envs: Vec<_> = command.get_envs().collect();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].0, "SSHPASS");
        assert_eq!(envs[0].1.map(|v| v.to_string_lossy().into_owned()), Some("hunter2".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_handle_unblocks_stream() {
        let mut transport = LocalConnector.connect(&RemoteEndpoint::default()).unwrap();
        let mut stream = transport.open_stream("exec sleep 30").unwrap();
        let kill = stream.kill_handle().unwrap();

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 16];
            stream.receive(&mut buf).unwrap()
        });
        thread::sleep(Duration::from_millis(50));
        kill.kill();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_replay_stream_has_no_kill_handle() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let connector = ReplayConnector::new(file.path());
        let mut transport = connector.connect(&RemoteEndpoint::default()).unwrap();
        let stream = transport.open_stream("candump can0").unwrap();
        assert!(stream.kill_handle().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_exec() {
        let mut transport = LocalConnector.connect(&RemoteEndpoint::default()).unwrap();
        let output = transport.exec("echo hello; echo oops >&2").unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
    }
}
