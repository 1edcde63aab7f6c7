//! Narrow MAVLink support over the `mavlink` crate: frame codec, protocol
//! helpers, and the per-simulator telemetry channel.

pub mod channel;
pub mod codec;
pub mod messages;

pub use ::mavlink::common::MavMessage;
pub use channel::{
    recv_until, ChannelFactory, ChannelFuture, TelemetryChannel, UdpChannelFactory,
    UdpTelemetryChannel,
};
pub use codec::{MavCodec, MavFrame};
