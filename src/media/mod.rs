//! Media boundary: sources and sinks of encoded units, and the per-session
//! streaming loops that connect them to the peer session's tracks.

pub mod ogg;
pub mod policy;
pub mod receiver;
pub mod sender;

use crate::error::Result;
use crate::peer::state::{MediaCodec, KEYFRAME_INTERVAL, OGG_PAGE_DURATION};
use crate::peer::transport::LocalTrack;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub use ogg::{FileMedia, OggFileSink, OggFileSource};
pub use policy::{plan, MediaPlan, MediaTrigger};

/// One encoded frame/page plus its position on the media clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    pub data: Bytes,
    pub time_position: u64,
}

/// Local media origin. `Ok(None)` is end of stream.
pub trait MediaReader: Send {
    fn read_next(&mut self) -> Result<Option<EncodedUnit>>;
}

/// Destination for received media.
pub trait MediaWriter: Send {
    fn write_unit(&mut self, unit: &EncodedUnit) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Opens sources and sinks for sessions.
pub trait MediaFactory: Send + Sync {
    fn open_source(&self, codec: &MediaCodec) -> Result<Box<dyn MediaReader>>;
    fn create_sink(&self, remote: &str, codec: &MediaCodec) -> Result<Box<dyn MediaWriter>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaTiming {
    pub page_duration: Duration,
    pub keyframe_interval: Duration,
}

impl Default for MediaTiming {
    fn default() -> Self {
        Self {
            page_duration: OGG_PAGE_DURATION,
            keyframe_interval: KEYFRAME_INTERVAL,
        }
    }
}

/// Outbound media attached to a session, waiting for the call to connect.
pub struct MediaSender {
    pub track: Arc<dyn LocalTrack>,
    pub reader: Box<dyn MediaReader>,
}

/// Granule position of an Ogg page on which no packet ends.
pub const NO_POSITION: u64 = u64::MAX;

/// Sample duration for a page: the position delta over the clock rate,
/// truncated to whole milliseconds. Pages without a position last zero.
pub fn unit_duration(position: u64, last_position: u64, clock_rate: u32) -> Duration {
    if position == NO_POSITION || clock_rate == 0 {
        return Duration::ZERO;
    }
    let samples = u128::from(position.saturating_sub(last_position));
    let millis = samples * 1000 / u128::from(clock_rate);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}
