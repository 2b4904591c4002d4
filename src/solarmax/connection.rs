use crate::prelude::*;
use crate::solarmax::frame;

use {
    bytes::{BufMut, BytesMut},
    net2::TcpStreamExt,
    std::io,
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::TcpStream,
};

const TCP_KEEPALIVE_SECS: u64 = 60; // TCP keepalive interval
const MAX_FRAME_SIZE: usize = 4096; // no legitimate reply comes close to this

/// Where and how to reach one inverter bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Upper bound for sending one frame and for receiving one frame.
    pub io_timeout: Duration,
    pub use_tcp_nodelay: bool,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl ConnectionSettings {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(10),
            use_tcp_nodelay: true,
            reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(60000),
        }
    }
}

impl std::fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

// Backoff {{{
/// Delay before the next connect attempt. Zero until an attempt fails, then
/// doubles per consecutive failure up to the ceiling.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    next: Option<Duration>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: None,
        }
    }

    fn delay(&self) -> Option<Duration> {
        self.next
    }

    fn failed(&mut self) {
        self.next = Some(match self.next {
            None => self.initial.min(self.max),
            Some(current) => (current * 2).min(self.max),
        });
    }

    fn reset(&mut self) {
        self.next = None;
    }
} // }}}

/// Owns the single TCP socket to an inverter bus.
///
/// Besides the socket this tracks whether the last detection pass found every
/// configured inverter. Any transport hiccup clears that flag, which tells the
/// client to re-run detection before trusting the bus again.
pub struct Connection {
    settings: ConnectionSettings,
    stream: Option<TcpStream>,
    all_inverters_present: bool,
    backoff: Backoff,
}

impl Connection {
    pub fn new(settings: ConnectionSettings) -> Self {
        let backoff = Backoff::new(settings.reconnect_delay, settings.max_reconnect_delay);
        Self {
            settings,
            stream: None,
            all_inverters_present: false,
            backoff,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn all_inverters_present(&self) -> bool {
        self.all_inverters_present
    }

    pub fn set_all_inverters_present(&mut self, present: bool) {
        self.all_inverters_present = present;
    }

    /// Delay the next `connect` will wait before dialing, if any.
    pub fn pending_backoff(&self) -> Option<Duration> {
        self.backoff.delay()
    }

    /// (Re)connect, closing any previous socket first.
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.disconnect().await;

        if let Some(delay) = self.backoff.delay() {
            info!("{}: waiting {:?} before reconnecting", self.settings, delay);
            tokio::time::sleep(delay).await;
        }

        info!("{}: establishing connection", self.settings);
        match self.open().await {
            Ok(stream) => {
                info!("{}: connected", self.settings);
                self.stream = Some(stream);
                self.backoff.reset();
                Ok(())
            }
            Err(e) => {
                warn!("{}: connection failed: {}", self.settings, e);
                self.backoff.failed();
                self.all_inverters_present = false;
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<TcpStream, Error> {
        let target = (self.settings.host.as_str(), self.settings.port);

        let stream = match tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect(target),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::Connection(e)),
            Err(_) => {
                return Err(Error::Connection(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timeout after {:?}", self.settings.connect_timeout),
                )))
            }
        };

        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS))) {
            warn!("{}: failed to set TCP keepalive: {}", self.settings, e);
        }
        let stream = TcpStream::from_std(std_stream)?;

        if self.settings.use_tcp_nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("{}: failed to set TCP_NODELAY: {}", self.settings, e);
            }
        }

        Ok(stream)
    }

    /// Close the socket. Never fails; problems are only logged.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!("{}: closing connection", self.settings);
            if let Err(e) = stream.shutdown().await {
                debug!("{}: shutdown failed: {}", self.settings, e);
            }
        }
        self.all_inverters_present = false;
    }

    /// Send one complete frame.
    ///
    /// A write timeout only clears the all-present flag; any other socket
    /// error drops the connection.
    pub async fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Connection(io::Error::new(
                io::ErrorKind::NotConnected,
                "not connected",
            )));
        };

        debug!("{} => {}", self.settings, String::from_utf8_lossy(frame));

        let result = tokio::time::timeout(self.settings.io_timeout, async {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("{}: write failed: {}", self.settings, e);
                self.stream = None;
                self.all_inverters_present = false;
                Err(Error::Connection(e))
            }
            Err(_) => {
                warn!(
                    "{}: write timeout after {:?}",
                    self.settings, self.settings.io_timeout
                );
                self.all_inverters_present = false;
                Err(Error::Connection(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write timeout",
                )))
            }
        }
    }

    /// Read one frame, byte by byte, up to and including the closing `}`.
    ///
    /// Returns whatever was read when the peer closes the stream, and an
    /// empty buffer on timeout or socket error.
    pub async fn receive_frame(&mut self) -> Vec<u8> {
        let Some(stream) = self.stream.as_mut() else {
            self.all_inverters_present = false;
            return Vec::new();
        };

        let result = tokio::time::timeout(self.settings.io_timeout, read_frame(stream)).await;

        match result {
            Ok(Ok((frame, closed))) => {
                if closed {
                    info!("{}: connection closed by peer", self.settings);
                    self.stream = None;
                }
                if frame.is_empty() {
                    self.all_inverters_present = false;
                } else {
                    debug!("{} <= {}", self.settings, String::from_utf8_lossy(&frame));
                }
                frame.to_vec()
            }
            Ok(Err(e)) => {
                warn!("{}: receive failed: {}", self.settings, e);
                self.all_inverters_present = false;
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "{}: no reply within {:?}",
                    self.settings, self.settings.io_timeout
                );
                self.all_inverters_present = false;
                Vec::new()
            }
        }
    }
}

// (bytes read, peer closed)
async fn read_frame(stream: &mut TcpStream) -> io::Result<(BytesMut, bool)> {
    let mut buf = BytesMut::with_capacity(64);
    let mut byte = [0u8; 1];

    loop {
        if stream.read(&mut byte).await? == 0 {
            return Ok((buf, true));
        }
        buf.put_u8(byte[0]);

        if byte[0] == frame::END {
            return Ok((buf, false));
        }
        if buf.len() >= MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no frame terminator in {} bytes", MAX_FRAME_SIZE),
            ));
        }
    }
}
