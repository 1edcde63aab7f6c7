//! MAVLink frame codec for simulator telemetry links.
//!
//! Frames are split out of the datagram buffer here; checksum validation and
//! payload parsing are delegated to the `mavlink` crate. Decodes v1 and v2
//! frames and encodes v2 frames. Use [`MavCodec`] as the codec parameter for
//! [`tokio_util::udp::UdpFramed`].
//!
//! The decoder never fails on bad input: leading garbage is skipped up to the
//! next start byte, and frames with a bad checksum or a message id outside
//! the `common` dialect are dropped.

use ::mavlink::common::MavMessage;
use ::mavlink::peek_reader::PeekReader;
use ::mavlink::{MavHeader, MavlinkVersion, MAV_STX, MAV_STX_V2};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::{AppError, Result};

/// System id this crate uses when talking to autopilots.
pub const GCS_SYSTEM_ID: u8 = 255;
/// Component id this crate uses when talking to autopilots.
pub const GCS_COMPONENT_ID: u8 = 190;

const V2_HEADER_LEN: usize = 10;
const V1_HEADER_LEN: usize = 6;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// One decoded frame: sender identity plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MavFrame {
    /// Sender packet sequence number.
    pub sequence: u8,
    /// Sender system id.
    pub system_id: u8,
    /// Sender component id.
    pub component_id: u8,
    /// Decoded message.
    pub message: MavMessage,
}

impl MavFrame {
    fn from_parts(header: MavHeader, message: MavMessage) -> Self {
        Self {
            sequence: header.sequence,
            system_id: header.system_id,
            component_id: header.component_id,
            message,
        }
    }
}

/// Stateful MAVLink codec; the encoder stamps an incrementing sequence.
#[derive(Debug, Clone)]
pub struct MavCodec {
    system_id: u8,
    component_id: u8,
    sequence: u8,
}

impl MavCodec {
    /// Create a codec that sends as the ground-station identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_identity(GCS_SYSTEM_ID, GCS_COMPONENT_ID)
    }

    /// Create a codec that sends as `system_id`/`component_id`.
    #[must_use]
    pub fn with_identity(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
            sequence: 0,
        }
    }
}

impl Default for MavCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MavCodec {
    type Item = MavFrame;
    type Error = AppError;

    /// Decode the next valid frame from `src`.
    ///
    /// Returns `Ok(None)` while the buffered bytes hold no complete frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(start) = src.iter().position(|&b| b == MAV_STX_V2 || b == MAV_STX) else {
                src.clear();
                return Ok(None);
            };
            src.advance(start);

            let Some(bounds) = frame_bounds(src) else {
                return Ok(None);
            };
            let version = if src[0] == MAV_STX_V2 {
                MavlinkVersion::V2
            } else {
                MavlinkVersion::V1
            };

            let decoded = {
                let mut reader: PeekReader<&[u8]> = PeekReader::new(&src[..bounds.checked]);
                ::mavlink::read_versioned_msg(&mut reader, version)
            };
            match decoded {
                Ok((header, message)) => {
                    src.advance(bounds.total);
                    return Ok(Some(MavFrame::from_parts(header, message)));
                }
                Err(err) => {
                    debug!(?err, "dropping undecodable frame");
                    // The start byte may have been payload; resync from the next byte.
                    src.advance(1);
                }
            }
        }
    }

    /// Leftover partial bytes at end of a datagram are discarded.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let frame = self.decode(src)?;
        if frame.is_none() {
            src.clear();
        }
        Ok(frame)
    }
}

impl Encoder<MavMessage> for MavCodec {
    type Error = AppError;

    /// Encode `item` as a v2 frame into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] if the frame cannot be written.
    fn encode(&mut self, item: MavMessage, dst: &mut BytesMut) -> Result<()> {
        let header = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence,
        };
        ::mavlink::write_v2_msg(&mut dst.writer(), header, &item)
            .map_err(|err| AppError::Telemetry(format!("cannot encode frame: {err:?}")))?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }
}

struct FrameBounds {
    /// Bytes covered by the checksum, plus the checksum itself.
    checked: usize,
    /// Whole frame including any signature.
    total: usize,
}

/// Bounds of the frame starting at `src[0]`, once all of it is buffered.
fn frame_bounds(src: &BytesMut) -> Option<FrameBounds> {
    let (header_len, signature) = if src[0] == MAV_STX_V2 {
        let flags = *src.get(2)?;
        let signature = if flags & INCOMPAT_FLAG_SIGNED == 0 {
            0
        } else {
            SIGNATURE_LEN
        };
        (V2_HEADER_LEN, signature)
    } else {
        (V1_HEADER_LEN, 0)
    };
    if src.len() < header_len {
        return None;
    }

    let checked = header_len + usize::from(src[1]) + CHECKSUM_LEN;
    let total = checked + signature;
    (src.len() >= total).then_some(FrameBounds { checked, total })
}
