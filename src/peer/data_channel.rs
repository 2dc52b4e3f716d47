use crate::error::Result;
use crate::peer::transport::{DataChannel, PeerEvent, PeerEvents};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// common data-channel handler: open, message and close go to the session's event stream
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: PeerEvents) {
    debug!(label = dc.label(), "attaching data channel handlers");

    let tx = events.clone();
    dc.on_open(Box::new(move || {
        let _ = tx.send(PeerEvent::DataChannelOpen);
        Box::pin(async {})
    }));

    let tx = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        let _ = tx.send(PeerEvent::DataChannelMessage(text));
        Box::pin(async {})
    }));

    let tx = events;
    dc.on_close(Box::new(move || {
        let _ = tx.send(PeerEvent::DataChannelClosed);
        Box::pin(async {})
    }));
}

pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

impl RtcDataChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        format!("{}#{}", self.dc.label(), self.dc.id())
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.dc.send_text(text.to_owned()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc.close().await?;
        Ok(())
    }
}
