use crate::error::Result;
use crate::media::{unit_duration, MediaSender, NO_POSITION};
use crate::peer::state::{SessionState, AUDIO_CODEC};
use crate::session::Session;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Paces units from the source into the local track, one per page duration,
/// while the session stays active. The session is closed when the source runs
/// out or anything fails.
pub async fn stream(session: Arc<Session>, sender: MediaSender) {
    match pump(&session, sender).await {
        Ok(()) => info!("end of audio to {}", session.remote()),
        Err(e) => warn!("audio to {} stopped: {}", session.remote(), e),
    }
    if let Err(e) = session.close().await {
        warn!("unable to close connection to {}: {}", session.remote(), e);
    }
}

async fn pump(session: &Session, mut sender: MediaSender) -> Result<()> {
    let mut ticker = interval(session.timing().page_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_position = 0;
    let mut sent = 0usize;

    loop {
        ticker.tick().await;
        if session.state() != SessionState::Active {
            debug!(sent, "session with {} no longer active", session.remote());
            return Ok(());
        }

        let Some(unit) = sender.reader.read_next()? else {
            debug!(sent, "audio source for {} exhausted", session.remote());
            return Ok(());
        };
        let duration = unit_duration(unit.time_position, last_position, AUDIO_CODEC.clock_rate);
        if unit.time_position != NO_POSITION {
            last_position = unit.time_position;
        }

        sender.track.write_sample(unit.data, duration).await?;
        sent += 1;
    }
}
