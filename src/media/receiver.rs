use crate::error::{CallError, Result};
use crate::media::MediaWriter;
use crate::peer::state::SessionState;
use crate::peer::transport::RemoteTrack;
use crate::session::Session;
use std::sync::Arc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

/// Pulls units from a remote track into the sink while the session is active.
/// The sink is finalized and the session closed when the loop ends.
pub async fn receive(
    session: Arc<Session>,
    track: Arc<dyn RemoteTrack>,
    mut sink: Box<dyn MediaWriter>,
) {
    let ssrc = track.ssrc();
    match pull(&session, track, sink.as_mut()).await {
        Ok(units) => info!(ssrc, units, "recording from {} finished", session.remote()),
        Err(e) => warn!(ssrc, "recording from {} stopped: {}", session.remote(), e),
    }
    if let Err(e) = sink.close() {
        warn!("unable to finalize recording from {}: {}", session.remote(), e);
    }
    if let Err(e) = session.close().await {
        warn!("unable to close connection to {}: {}", session.remote(), e);
    }
}

async fn pull(
    session: &Session,
    track: Arc<dyn RemoteTrack>,
    sink: &mut dyn MediaWriter,
) -> Result<usize> {
    let mut state = session.watch_state();
    // tracks can show up while the answer is still in flight
    let current = *state
        .wait_for(|s| {
            !matches!(
                s,
                SessionState::Standby | SessionState::Ringing | SessionState::Answering
            )
        })
        .await
        .map_err(|_| CallError::StreamFault("session dropped".into()))?;
    if current != SessionState::Active {
        return Ok(0);
    }

    let mut units = 0;
    loop {
        tokio::select! {
            unit = track.read_unit() => {
                sink.write_unit(&unit?)?;
                units += 1;
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() != SessionState::Active {
                    return Ok(units);
                }
            }
        }
    }
}

/// Asks the remote for a keyframe on `ssrc` every keyframe interval until the
/// session leaves `Active`.
pub async fn request_keyframes(session: Arc<Session>, ssrc: u32) {
    let period = session.timing().keyframe_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        match session.state() {
            SessionState::Active => {}
            SessionState::Ringing | SessionState::Answering => continue,
            SessionState::Standby | SessionState::Closed => {
                debug!(ssrc, "keyframe requests to {} stopped", session.remote());
                return;
            }
        }
        if let Err(e) = session.peer().request_keyframe(ssrc).await {
            warn!(ssrc, "keyframe request to {} failed: {}", session.remote(), e);
        }
    }
}
