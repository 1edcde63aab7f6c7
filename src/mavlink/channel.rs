//! Telemetry channel abstraction over a simulator's MAVLink link.
//!
//! The [`TelemetryChannel`] trait decouples the scorer and mission uploader
//! from the UDP transport so both can be driven by scripted channels in
//! tests. [`ChannelFactory`] opens one channel per simulator index.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use ::mavlink::common::MavMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::udp::UdpFramed;
use tracing::debug;

use super::codec::{MavCodec, MavFrame};
use crate::{AppError, Result};

/// Boxed future returned by channel methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Bidirectional MAVLink link to one simulator.
pub trait TelemetryChannel: Send {
    /// Receive the next decoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] if the underlying link is closed or fails.
    fn recv(&mut self) -> ChannelFuture<'_, MavFrame>;

    /// Send `message` to the simulator.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] if the peer is unknown or the write fails.
    fn send(&mut self, message: MavMessage) -> ChannelFuture<'_, ()>;
}

/// Opens telemetry channels for simulator indices.
pub trait ChannelFactory: Send + Sync {
    /// Open the channel for simulator `index`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] if the channel cannot be opened.
    fn open(&self, index: usize) -> ChannelFuture<'_, Box<dyn TelemetryChannel>>;
}

/// Receive frames until `select` yields a value or `timeout` elapses.
///
/// Frames for which `select` returns `None` are discarded.
///
/// # Errors
///
/// Returns [`AppError::Timeout`] naming `what` when the deadline passes, or
/// propagates the channel's receive error.
pub async fn recv_until<T, F>(
    channel: &mut dyn TelemetryChannel,
    timeout: Duration,
    what: &str,
    mut select: F,
) -> Result<T>
where
    F: FnMut(&MavFrame) -> Option<T>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let frame = tokio::time::timeout_at(deadline, channel.recv())
            .await
            .map_err(|_| AppError::Timeout(format!("no {what} within {timeout:?}")))??;
        if let Some(value) = select(&frame) {
            return Ok(value);
        }
    }
}

/// UDP telemetry endpoint bound to a simulator's local port.
///
/// Simulators push telemetry to the bound port; replies go to the address the
/// most recent datagram came from.
pub struct UdpTelemetryChannel {
    framed: UdpFramed<MavCodec>,
    peer: Option<SocketAddr>,
}

impl UdpTelemetryChannel {
    /// Bind a listening endpoint at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|err| AppError::Telemetry(format!("failed to bind {addr}: {err}")))?;
        debug!(%addr, "telemetry channel bound");
        Ok(Self {
            framed: UdpFramed::new(socket, MavCodec::new()),
            peer: None,
        })
    }

    /// Local address of the bound socket.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] if the address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.framed
            .get_ref()
            .local_addr()
            .map_err(|err| AppError::Telemetry(format!("no local address: {err}")))
    }

    /// Address replies are sent to, once any datagram has arrived.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl TelemetryChannel for UdpTelemetryChannel {
    fn recv(&mut self) -> ChannelFuture<'_, MavFrame> {
        Box::pin(async move {
            match self.framed.next().await {
                Some(Ok((frame, from))) => {
                    self.peer = Some(from);
                    Ok(frame)
                }
                Some(Err(err)) => Err(AppError::Telemetry(format!("receive failed: {err}"))),
                None => Err(AppError::Telemetry("telemetry socket closed".into())),
            }
        })
    }

    fn send(&mut self, message: MavMessage) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            let peer = self.peer.ok_or_else(|| {
                AppError::Telemetry("no peer has sent telemetry yet".into())
            })?;
            self.framed
                .send((message, peer))
                .await
                .map_err(|err| AppError::Telemetry(format!("send to {peer} failed: {err}")))
        })
    }
}

/// Opens [`UdpTelemetryChannel`]s at `base_port + index` on `host`.
#[derive(Debug, Clone)]
pub struct UdpChannelFactory {
    host: IpAddr,
    base_port: u16,
}

impl UdpChannelFactory {
    /// Factory listening on loopback from `base_port` upward.
    #[must_use]
    pub fn new(base_port: u16) -> Self {
        Self::with_host(IpAddr::V4(Ipv4Addr::LOCALHOST), base_port)
    }

    /// Factory listening on `host` from `base_port` upward.
    #[must_use]
    pub fn with_host(host: IpAddr, base_port: u16) -> Self {
        Self { host, base_port }
    }

    /// Port assigned to simulator `index`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] if the port would overflow.
    pub fn port_for(&self, index: usize) -> Result<u16> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or_else(|| {
                AppError::Telemetry(format!(
                    "port for instance {index} overflows base port {}",
                    self.base_port
                ))
            })
    }
}

impl ChannelFactory for UdpChannelFactory {
    fn open(&self, index: usize) -> ChannelFuture<'_, Box<dyn TelemetryChannel>> {
        Box::pin(async move {
            let port = self.port_for(index)?;
            let channel = UdpTelemetryChannel::bind(SocketAddr::new(self.host, port)).await?;
            Ok(Box::new(channel) as Box<dyn TelemetryChannel>)
        })
    }
}
