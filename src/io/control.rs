//! Start/stop commands for the C64 Ultimate's streaming service.
//!
//! Commands are short binary messages sent over a fresh TCP connection to port 64:
//!
//! ```text
//! start: [0x20 + id, 0xFF, len_lo, len_hi, 0x00, 0x00, "<ip>:<port>"]
//!        len = 2 (duration, 0 = forever) + length of the address string
//! stop:  [0x30 + id, 0xFF, 0x00, 0x00]
//! ```

use std::io::Write;
use std::net::{IpAddr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::pipeline::ReconnectRequest;
use crate::protocol::CONTROL_PORT;
use crate::session::StreamConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    Video,
    Audio,
}

impl StreamId {
    fn id(self) -> u8 {
        match self {
            StreamId::Video => 0,
            StreamId::Audio => 1,
        }
    }
}

pub fn start_command(stream: StreamId, target: SocketAddr) -> Vec<u8> {
    let address = target.to_string();
    let param_len = (2 + address.len()) as u16;

    let mut cmd = Vec::with_capacity(6 + address.len());
    cmd.push(0x20 + stream.id());
    cmd.push(0xFF);
    cmd.extend_from_slice(&param_len.to_le_bytes());
    cmd.extend_from_slice(&[0x00, 0x00]);
    cmd.extend_from_slice(address.as_bytes());
    cmd
}

pub fn stop_command(stream: StreamId) -> [u8; 4] {
    [0x30 + stream.id(), 0xFF, 0x00, 0x00]
}

/// Sends one command over a new TCP connection.
pub fn send_command(addr: SocketAddr, command: &[u8]) -> Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("Failed to connect to {addr}"))?;
    stream
        .set_write_timeout(Some(CONNECT_TIMEOUT))
        .context("Failed to set write timeout")?;
    stream
        .write_all(command)
        .with_context(|| format!("Failed to send command to {addr}"))?;
    Ok(())
}

pub fn start_stream(host: IpAddr, stream: StreamId, target: SocketAddr) -> Result<()> {
    send_command(
        SocketAddr::new(host, CONTROL_PORT),
        &start_command(stream, target),
    )
    .with_context(|| format!("Failed to start {stream:?} stream"))?;
    info!("Requested {:?} stream from {} to {}", stream, host, target);
    Ok(())
}

pub fn stop_stream(host: IpAddr, stream: StreamId) -> Result<()> {
    send_command(SocketAddr::new(host, CONTROL_PORT), &stop_command(stream))
        .with_context(|| format!("Failed to stop {stream:?} stream"))?;
    info!("Stopped {:?} stream on {}", stream, host);
    Ok(())
}

/// Local address of the interface that routes to `remote`.
///
/// Connecting a UDP socket sends nothing; it only selects the route.
pub fn local_ip_towards(remote: IpAddr) -> Result<IpAddr> {
    let bind_addr: SocketAddr = match remote {
        IpAddr::V4(_) => "0.0.0.0:0".parse()?,
        IpAddr::V6(_) => "[::]:0".parse()?,
    };
    let socket = UdpSocket::bind(bind_addr).context("Failed to create socket")?;
    socket
        .connect(SocketAddr::new(remote, CONTROL_PORT))
        .with_context(|| format!("No route to {remote}"))?;
    Ok(socket
        .local_addr()
        .context("Failed to get local address")?
        .ip())
}

/// Restarts the device's streams on request.
pub struct ControlClient {
    host: IpAddr,
    video_target: SocketAddr,
    audio_target: SocketAddr,
    consecutive_failures: u32,
}

impl ControlClient {
    pub fn new(host: IpAddr, client_ip: IpAddr, video_port: u16, audio_port: u16) -> Self {
        Self {
            host,
            video_target: SocketAddr::new(client_ip, video_port),
            audio_target: SocketAddr::new(client_ip, audio_port),
            consecutive_failures: 0,
        }
    }

    /// `None` when no device host is configured.
    pub fn from_config(config: &StreamConfig) -> Result<Option<Self>> {
        let Some(host) = config.host else {
            return Ok(None);
        };
        let client_ip = match config.client_addr {
            Some(ip) => ip,
            None => local_ip_towards(host)?,
        };
        Ok(Some(Self::new(
            host,
            client_ip,
            config.video_port,
            config.audio_port,
        )))
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn start_streams(&mut self) -> Result<()> {
        let result = start_stream(self.host, StreamId::Video, self.video_target)
            .and_then(|_| start_stream(self.host, StreamId::Audio, self.audio_target));
        match &result {
            Ok(()) => self.consecutive_failures = 0,
            Err(_) => self.consecutive_failures += 1,
        }
        result
    }

    pub fn stop_streams(&self) -> Result<()> {
        stop_stream(self.host, StreamId::Video)?;
        stop_stream(self.host, StreamId::Audio)
    }

    pub fn handle(&mut self, request: ReconnectRequest) {
        debug!(
            "Reconnect request after {} ms of silence (attempt {})",
            request.silent_for.as_millis(),
            request.attempt
        );
        if let Err(e) = self.start_streams() {
            warn!(
                "Reconnect to {} failed ({} in a row): {:#}",
                self.host, self.consecutive_failures, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_start_command_bytes() {
        let target: SocketAddr = "192.168.1.10:11000".parse().unwrap();
        let cmd = start_command(StreamId::Video, target);

        assert_eq!(&cmd[..6], &[0x20, 0xFF, 20, 0x00, 0x00, 0x00]);
        assert_eq!(&cmd[6..], b"192.168.1.10:11000");

        let cmd = start_command(StreamId::Audio, "10.0.0.2:11001".parse().unwrap());
        assert_eq!(cmd[0], 0x21);
        assert_eq!(cmd[2], 16);
    }

    #[test]
    fn test_stop_command_bytes() {
        assert_eq!(stop_command(StreamId::Video), [0x30, 0xFF, 0x00, 0x00]);
        assert_eq!(stop_command(StreamId::Audio), [0x31, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn test_send_command_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            conn.read_to_end(&mut received).unwrap();
            received
        });

        send_command(addr, &stop_command(StreamId::Audio)).unwrap();
        assert_eq!(server.join().unwrap(), vec![0x31, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn test_send_command_connection_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        assert!(send_command(addr, &stop_command(StreamId::Video)).is_err());
    }

    #[test]
    fn test_local_ip_towards_loopback() {
        let ip = local_ip_towards("127.0.0.1".parse().unwrap()).unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn test_from_config_without_host() {
        assert!(ControlClient::from_config(&StreamConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_from_config_with_client_addr() {
        let config = StreamConfig {
            host: Some("192.168.1.64".parse().unwrap()),
            client_addr: Some("192.168.1.2".parse().unwrap()),
            ..StreamConfig::default()
        };
        let client = ControlClient::from_config(&config).unwrap().unwrap();
        assert_eq!(client.host(), "192.168.1.64".parse::<IpAddr>().unwrap());
        assert_eq!(client.video_target, "192.168.1.2:11000".parse().unwrap());
        assert_eq!(client.audio_target, "192.168.1.2:11001".parse().unwrap());
    }
}
