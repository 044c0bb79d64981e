//! # Video Conferencing Application
//!
//! The sender encodes a frame every `1/fps`, sizes it against the current
//! rate allocation, applies FEC inflation, packetizes, and optionally pads
//! the frame out to its byte target. The receiver reassembles frames,
//! runs FEC and codec decode in strict frame order, and reports quality
//! per decoded frame.

use tracing::trace;

use crate::app::{AppEvent, Application, FrameTiming};
use crate::codec::{Decoder, Encoder};
use crate::fec::{FecDecoder, SharedFecEncoder};
use crate::frame::Frame;
use crate::packet::{AppData, Packet, VideoPayload, MSS};
use crate::stats::{VideoRecvRecord, VideoSendRecord};
use crate::time::{Rate, Timestamp, TimestampDelta};
use std::collections::{HashMap, VecDeque};

/// Frames per second produced by the sender.
pub const FPS: u64 = 25;

// ─── Sender ─────────────────────────────────────────────────────────────────

/// How an encoded frame is split into packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketizePolicy {
    /// MSS-sized chunks plus one remainder packet.
    Mtu,
    /// At least five equal chunks, remainder spread a byte at a time.
    AtLeastFive,
}

pub struct VideoSender {
    encoder: Encoder,
    fec_encoder: SharedFecEncoder,
    queue: VecDeque<AppData>,
    padding_queue: VecDeque<AppData>,
    frame_id: u64,
    last_encode_ts: Option<Timestamp>,
    frame_interval: TimestampDelta,
    target_bitrate: Rate,
    padding_enabled: bool,
    packetize: PacketizePolicy,
    records: Vec<VideoSendRecord>,
}

impl VideoSender {
    pub fn new(encoder: Encoder, fec_encoder: SharedFecEncoder) -> Self {
        // Redundancy is applied only once a controller sets a rate; until
        // then the enabled encoder passes sizes through.
        fec_encoder.borrow_mut().enable();
        VideoSender {
            encoder,
            fec_encoder,
            queue: VecDeque::new(),
            padding_queue: VecDeque::new(),
            frame_id: 0,
            last_encode_ts: None,
            frame_interval: TimestampDelta::from_micros(1_000_000 / FPS as i64),
            target_bitrate: Rate::ZERO,
            padding_enabled: false,
            packetize: PacketizePolicy::AtLeastFive,
            records: Vec::new(),
        }
    }

    pub fn enable_padding(&mut self) {
        self.padding_enabled = true;
    }

    pub fn set_packetize_policy(&mut self, policy: PacketizePolicy) {
        self.packetize = policy;
    }

    pub fn frame_interval(&self) -> TimestampDelta {
        self.frame_interval
    }

    pub fn take_records(&mut self) -> Vec<VideoSendRecord> {
        std::mem::take(&mut self.records)
    }

    fn encode_frame(&mut self, now: Timestamp) {
        let target_data_byte =
            (self.target_bitrate.bytes_per_sec() * self.frame_interval.as_secs_f64()) as usize;

        let (fec_rate, fec_enabled) = {
            let fec = self.fec_encoder.borrow();
            (fec.rate(), fec.is_enabled())
        };
        // Reserve the FEC overhead out of the frame's byte budget.
        let target_fsize_byte = ((1.0 - fec_rate) * target_data_byte as f64) as usize;

        let encoded = self.encoder.encode(self.frame_id, target_fsize_byte);
        let fsize_byte = encoded.frame_size_byte;
        let fsize_fec_enc_byte = self.fec_encoder.borrow().encode(fsize_byte);

        let padding_byte = if self.padding_enabled {
            target_data_byte.saturating_sub(fsize_fec_enc_byte)
        } else {
            0
        };

        // The redundancy actually protecting this frame.
        let applied_fec_rate = if fec_enabled { fec_rate } else { 0.0 };
        let encode_bitrate = self.target_bitrate * (1.0 - applied_fec_rate);

        let interval_s = self.frame_interval.as_secs_f64();
        self.records.push(VideoSendRecord {
            timestamp_us: now.micros(),
            target_bitrate_bps: self.target_bitrate.bps(),
            fec_data_rate_bps: (8.0 * (fsize_fec_enc_byte - fsize_byte) as f64 / interval_s)
                .round() as u64,
            frame_bitrate_bps: (8.0 * fsize_byte as f64 / interval_s).round() as u64,
            min_frame_bitrate_bps: (8.0 * encoded.min_frame_size_byte as f64 / interval_s)
                .round() as u64,
            max_frame_bitrate_bps: (8.0 * encoded.max_frame_size_byte as f64 / interval_s)
                .round() as u64,
            fec_rate: applied_fec_rate,
            model_id: encoded.model_id,
            padding_byte,
        });
        trace!(
            frame_id = self.frame_id,
            target_byte = target_data_byte,
            fsize_byte,
            fsize_fec_enc_byte,
            padding_byte,
            "encode frame"
        );

        // Padding never carries over to the next frame.
        self.padding_queue.clear();
        self.packetize_frame(
            encode_bitrate,
            fsize_byte,
            fsize_fec_enc_byte,
            encoded.model_id,
            applied_fec_rate,
            padding_byte,
            now,
        );

        self.last_encode_ts = Some(now);
        self.frame_id += 1;
    }

    #[allow(clippy::too_many_arguments)]
    fn packetize_frame(
        &mut self,
        encode_bitrate: Rate,
        frame_size_byte: usize,
        frame_size_fec_enc_byte: usize,
        model_id: u32,
        fec_rate: f64,
        padding_byte: usize,
        now: Timestamp,
    ) {
        let payload = |offset, num_pkts, padding| VideoPayload {
            frame_id: self.frame_id,
            model_id,
            offset,
            num_pkts,
            frame_size_byte,
            frame_size_fec_enc_byte,
            encode_ts: now,
            encode_bitrate,
            fec_rate,
            padding,
            padding_size_byte: padding_byte,
        };

        // Data packets.
        let sizes = match self.packetize {
            PacketizePolicy::Mtu => mtu_chunks(frame_size_fec_enc_byte),
            PacketizePolicy::AtLeastFive => at_least_five_chunks(frame_size_fec_enc_byte),
        };
        let num_pkts = sizes.len() as u32;
        for (i, size) in sizes.into_iter().enumerate() {
            assert!(size > 0 && size <= MSS);
            self.queue
                .push_back(AppData::video(size, payload(i as u32, num_pkts, false)));
        }

        // Padding packets go into their own queue, drained only when the
        // data queue is empty.
        let padding_sizes = mtu_chunks(padding_byte);
        let num_padding = padding_sizes.len() as u32;
        for (i, size) in padding_sizes.into_iter().enumerate() {
            self.padding_queue
                .push_back(AppData::video(size, payload(i as u32, num_padding, true)));
        }
    }
}

fn mtu_chunks(total_byte: usize) -> Vec<usize> {
    let mut sizes = vec![MSS; total_byte / MSS];
    let remainder = total_byte % MSS;
    if remainder > 0 {
        sizes.push(remainder);
    }
    sizes
}

fn at_least_five_chunks(total_byte: usize) -> Vec<usize> {
    let n_pkts = (total_byte.div_ceil(MSS)).max(5);
    let base = total_byte / n_pkts;
    let extra = total_byte % n_pkts;
    (0..n_pkts)
        .map(|i| base + usize::from(i < extra))
        .collect()
}

impl Application for VideoSender {
    fn next_pkt_size(&self) -> usize {
        self.queue
            .front()
            .or_else(|| self.padding_queue.front())
            .map(|d| d.size_byte)
            .unwrap_or(0)
    }

    fn next_pkt(&mut self) -> Option<AppData> {
        self.queue
            .pop_front()
            .or_else(|| self.padding_queue.pop_front())
    }

    fn deliver_pkt(&mut self, _pkt: Packet) {}

    fn tick(&mut self, now: Timestamp) {
        let due = match self.last_encode_ts {
            None => true,
            Some(ts) => now - ts >= self.frame_interval,
        };
        if due {
            self.encode_frame(now);
        }
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.padding_queue.clear();
        self.frame_id = 0;
        self.last_encode_ts = None;
        self.target_bitrate = Rate::ZERO;
        self.records.clear();
    }

    fn queued_bytes(&self) -> usize {
        self.queue.iter().map(|d| d.size_byte).sum()
    }

    fn set_target_bitrate(&mut self, rate: Rate) {
        self.target_bitrate = rate;
    }
}

// ─── Receiver ───────────────────────────────────────────────────────────────

pub struct VideoReceiver {
    decoder: Decoder,
    fec_decoder: FecDecoder,
    /// Next frame id expected to decode.
    frame_id: u64,
    frames: HashMap<u64, Frame>,
    events: Vec<AppEvent>,
    records: Vec<VideoRecvRecord>,
    last_decoded: Option<u64>,
}

impl VideoReceiver {
    pub fn new(decoder: Decoder) -> Self {
        VideoReceiver {
            decoder,
            fec_decoder: FecDecoder,
            frame_id: 0,
            frames: HashMap::new(),
            events: Vec::new(),
            records: Vec::new(),
            last_decoded: None,
        }
    }

    pub fn take_records(&mut self) -> Vec<VideoRecvRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn frames_pending(&self) -> usize {
        self.frames.len()
    }
}

impl Application for VideoReceiver {
    fn next_pkt_size(&self) -> usize {
        0
    }

    fn next_pkt(&mut self) -> Option<AppData> {
        None
    }

    fn deliver_pkt(&mut self, pkt: Packet) {
        let Some(video) = pkt.video.as_ref() else {
            return;
        };
        if video.padding {
            return;
        }

        let frame = self.frames.entry(video.frame_id).or_insert_with(|| Frame {
            frame_id: video.frame_id,
            model_id: video.model_id,
            first_pkt_seq: pkt.seq,
            frame_size_byte: video.frame_size_byte,
            frame_size_fec_enc_byte: video.frame_size_fec_enc_byte,
            num_pkts: video.num_pkts,
            encode_bitrate: video.encode_bitrate,
            encode_ts: video.encode_ts,
            fec_rate: video.fec_rate,
            ..Default::default()
        });
        if !frame.pkts_rcvd.insert(pkt.seq) {
            // Duplicate delivery (late retransmit); frame state unchanged.
            return;
        }
        frame.frame_size_rcvd_byte += pkt.size_byte;
        frame.num_pkts_rcvd += 1;
        frame.last_pkt_sent_ts = pkt.ts_sent();
        frame.last_pkt_rcvd_ts = pkt.ts_rcvd();
    }

    fn tick(&mut self, now: Timestamp) {
        // Decode in strict frame order; stop at the first frame that is
        // missing or not yet decodable.
        loop {
            if !self.frames.contains_key(&self.frame_id) {
                break;
            }
            let next_frame_pkt_rcvd = self.frames.contains_key(&(self.frame_id + 1));
            let prev_timing = self
                .frame_id
                .checked_sub(1)
                .and_then(|id| self.frames.get(&id))
                .map(|prev| FrameTiming {
                    sent: prev.last_pkt_sent_ts,
                    rcvd: prev.last_pkt_rcvd_ts,
                });

            let frame = self
                .frames
                .get_mut(&self.frame_id)
                .expect("presence checked above");
            self.fec_decoder.decode(frame);
            if !self.decoder.decode(frame, next_frame_pkt_rcvd, now) {
                break;
            }

            self.records.push(VideoRecvRecord {
                frame_id: frame.frame_id,
                model_id: frame.model_id,
                frame_encode_ts_us: frame.encode_ts.micros(),
                frame_decode_ts_us: frame.decode_ts.unwrap_or(Timestamp::ZERO).micros(),
                encode_bitrate_bps: frame.encode_bitrate.bps(),
                frame_loss_rate: frame.loss_rate(),
                ssim: frame.ssim,
                psnr: frame.psnr,
            });
            self.events.push(AppEvent::FrameDecoded {
                frame_id: frame.frame_id,
                max_pkt_seq: frame.max_pkt_seq().unwrap_or(0),
                timing: FrameTiming {
                    sent: frame.last_pkt_sent_ts,
                    rcvd: frame.last_pkt_rcvd_ts,
                },
                prev_timing,
            });
            self.last_decoded = Some(self.frame_id);

            // Retire the frame two behind the one just decoded.
            if self.frame_id >= 2 {
                self.frames.remove(&(self.frame_id - 2));
            }
            self.frame_id += 1;
        }
    }

    fn reset(&mut self) {
        self.frame_id = 0;
        self.frames.clear();
        self.events.clear();
        self.records.clear();
        self.last_decoded = None;
    }

    fn queued_bytes(&self) -> usize {
        0
    }

    fn drain_events(&mut self) -> Vec<AppEvent> {
        std::mem::take(&mut self.events)
    }

    fn last_decoded_frame(&self) -> Option<u64> {
        self.last_decoded
    }
}
