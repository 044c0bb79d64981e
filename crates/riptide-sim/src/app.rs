//! # Application Interface
//!
//! The contract between a host and the traffic source/sink riding on it.
//! Applications hand payloads down, receive delivered packets, and surface
//! typed events (frame arrivals) the host forwards to interested parties —
//! there are no back-references from the application into the transport.

use crate::packet::{AppData, Packet, MSS};
use crate::time::{Rate, Timestamp};

/// Timing of one frame's last packet, as seen by the receiver.
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    pub sent: Timestamp,
    pub rcvd: Timestamp,
}

/// Events an application surfaces to its host after a tick.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A frame decoded. Carries the timing needed by frame-gradient
    /// estimators and the highest sequence number belonging to the frame.
    FrameDecoded {
        frame_id: u64,
        max_pkt_seq: u64,
        timing: FrameTiming,
        /// Timing of the previous frame, absent when it was never
        /// reassembled (bursty loss).
        prev_timing: Option<FrameTiming>,
    },
}

pub trait Application {
    /// Size of the packet at the front of the send queue; zero when idle.
    fn next_pkt_size(&self) -> usize;

    /// Pop the next payload for the transport layer.
    fn next_pkt(&mut self) -> Option<AppData>;

    /// Deliver a received packet to the application.
    fn deliver_pkt(&mut self, pkt: Packet);

    fn tick(&mut self, now: Timestamp);

    fn reset(&mut self);

    /// Bytes waiting in the application send queue.
    fn queued_bytes(&self) -> usize;

    /// Drain events produced since the last call.
    fn drain_events(&mut self) -> Vec<AppEvent> {
        Vec::new()
    }

    /// Highest frame id decoded so far (receivers only).
    fn last_decoded_frame(&self) -> Option<u64> {
        None
    }

    /// Rate allocation from the host (senders only).
    fn set_target_bitrate(&mut self, _rate: Rate) {}
}

// ─── File Transfer ──────────────────────────────────────────────────────────

/// A source that always has another MSS-sized packet to send. Useful for
/// saturating a link without the video pipeline.
#[derive(Debug, Default)]
pub struct FileSender;

impl Application for FileSender {
    fn next_pkt_size(&self) -> usize {
        MSS
    }

    fn next_pkt(&mut self) -> Option<AppData> {
        Some(AppData::plain(MSS))
    }

    fn deliver_pkt(&mut self, _pkt: Packet) {}

    fn tick(&mut self, _now: Timestamp) {}

    fn reset(&mut self) {}

    fn queued_bytes(&self) -> usize {
        0
    }
}

/// A sink that counts delivered bytes and discards them.
#[derive(Debug, Default)]
pub struct FileReceiver {
    bytes_rcvd: usize,
}

impl FileReceiver {
    pub fn bytes_rcvd(&self) -> usize {
        self.bytes_rcvd
    }
}

impl Application for FileReceiver {
    fn next_pkt_size(&self) -> usize {
        0
    }

    fn next_pkt(&mut self) -> Option<AppData> {
        None
    }

    fn deliver_pkt(&mut self, pkt: Packet) {
        self.bytes_rcvd += pkt.size_byte;
    }

    fn tick(&mut self, _now: Timestamp) {}

    fn reset(&mut self) {
        self.bytes_rcvd = 0;
    }

    fn queued_bytes(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sender_is_inexhaustible() {
        let mut app = FileSender;
        assert_eq!(app.next_pkt_size(), MSS);
        let data = app.next_pkt().unwrap();
        assert_eq!(data.size_byte, MSS);
        assert!(data.video.is_none());
    }

    #[test]
    fn file_receiver_counts_bytes() {
        let mut app = FileReceiver::default();
        app.deliver_pkt(Packet::data(AppData::plain(700)));
        app.deliver_pkt(Packet::data(AppData::plain(300)));
        assert_eq!(app.bytes_rcvd(), 1000);
        app.reset();
        assert_eq!(app.bytes_rcvd(), 0);
    }
}
