use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::types::{error::Result, video_frame::EncodedVideoFrame};

/// Receives finished packets and packages them into a container.
pub trait Muxer: Send {
    fn write_video_packet(&mut self, packet: &EncodedVideoFrame) -> Result<()>;

    /// Called once after the encoder has been flushed.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Forwards packets over a bounded channel, dropping them when the reader lags.
pub struct ChannelMuxer {
    sender: Sender<EncodedVideoFrame>,
}

impl ChannelMuxer {
    pub fn new(capacity: usize) -> (Self, Receiver<EncodedVideoFrame>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl Muxer for ChannelMuxer {
    fn write_video_packet(&mut self, packet: &EncodedVideoFrame) -> Result<()> {
        match self.sender.try_send(packet.clone()) {
            Ok(_) => {}
            Err(TrySendError::Full(_)) => {
                log::error!("Could not send encoded video frame. Receiver is full");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("Could not send encoded video frame. Receiver disconnected");
            }
        }
        Ok(())
    }
}
