//! # Codec Model
//!
//! Encode and decode are table lookups: a dense per-frame table maps a
//! model id and a rounded loss rate to `{size, psnr, ssim}`. The encoder
//! picks the model whose zero-loss size best matches a byte target; the
//! decoder gates on in-order arrival and looks up quality for the observed
//! loss.
//!
//! An external codec capability can replace both lookups; it is treated as
//! an opaque, infallible pair of callables (a failing implementation is a
//! fatal fault and may panic).
//!
//! ## Lookup-table CSV format
//!
//! Header plus rows `size_bytes, psnr, ssim, loss_rate, frame_id,
//! n_frames, model_id, video_name`. Frame ids are 1-indexed on disk and
//! id 0 marks a skip row; internally frames are zero-indexed modulo the
//! table length.

use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

use crate::frame::Frame;
use crate::time::Timestamp;

/// Loss rates are binned to one decimal; bins are keyed in tenths.
fn loss_bin(loss_rate: f64) -> u32 {
    (loss_rate * 10.0).round().max(0.0) as u32
}

/// At most this many loss bins per model row.
const MAX_LOSS_BINS: usize = 10;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("lookup table has no frame rows")]
    Empty,
    #[error("line {line}: bad field `{field}`: {value}")]
    BadField {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("frame {frame_id}: model {model_id} has no zero-loss entry")]
    MissingZeroLoss { frame_id: usize, model_id: u32 },
    #[error("frame {frame_id}: model {model_id} carries more than {MAX_LOSS_BINS} loss bins")]
    TooManyLossBins { frame_id: usize, model_id: u32 },
}

/// Quality metrics for one `(model, loss)` table cell.
#[derive(Debug, Clone, Copy)]
pub struct CodecStats {
    pub size_byte: usize,
    pub psnr: f64,
    pub ssim: f64,
}

/// Loss bin (tenths) → stats.
type LossProfile = BTreeMap<u32, CodecStats>;
/// Model id → loss profile.
type FrameProfile = BTreeMap<u32, LossProfile>;

/// The dense per-frame codec table, indexed by `frame_id mod len`.
#[derive(Debug)]
pub struct LookupTable {
    frames: Vec<FrameProfile>,
}

impl LookupTable {
    pub fn parse(text: &str) -> Result<Rc<Self>, TableError> {
        let mut frames: Vec<FrameProfile> = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            if idx == 0 || line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let mut cols = line.split(',').map(str::trim);

            let size_byte: f64 = req_col(cols.next(), line_no, "size_bytes")?;
            let psnr: f64 = req_col(cols.next(), line_no, "psnr")?;
            let ssim: f64 = req_col(cols.next(), line_no, "ssim")?;
            let loss_rate: f64 = req_col(cols.next(), line_no, "loss_rate")?;
            let frame_id: usize = req_col(cols.next(), line_no, "frame_id")?;
            let _n_frames: Option<usize> = opt_col(cols.next(), line_no, "n_frames")?;
            let model_id: u32 = req_col(cols.next(), line_no, "model_id")?;
            // Trailing video_name column is free text.

            // Frame ids are 1-based in the file; 0 is a skip row.
            if frame_id == 0 {
                continue;
            }
            let frame_idx = frame_id - 1;
            if frames.len() <= frame_idx {
                frames.resize_with(frame_idx + 1, FrameProfile::new);
            }
            frames[frame_idx]
                .entry(model_id)
                .or_default()
                .insert(
                    loss_bin(loss_rate),
                    CodecStats {
                        size_byte: size_byte as usize,
                        psnr,
                        ssim,
                    },
                );
        }

        let table = LookupTable { frames };
        table.validate()?;
        Ok(Rc::new(table))
    }

    /// Build a table programmatically (tests, scenario generators).
    /// `rows[frame][..] = (model_id, loss_rate, stats)`.
    pub fn from_cells(
        rows: Vec<Vec<(u32, f64, CodecStats)>>,
    ) -> Result<Rc<Self>, TableError> {
        let frames = rows
            .into_iter()
            .map(|cells| {
                let mut profile = FrameProfile::new();
                for (model_id, loss_rate, stats) in cells {
                    profile
                        .entry(model_id)
                        .or_default()
                        .insert(loss_bin(loss_rate), stats);
                }
                profile
            })
            .collect();
        let table = LookupTable { frames };
        table.validate()?;
        Ok(Rc::new(table))
    }

    fn validate(&self) -> Result<(), TableError> {
        if self.frames.is_empty() {
            return Err(TableError::Empty);
        }
        for (frame_id, profile) in self.frames.iter().enumerate() {
            for (&model_id, losses) in profile {
                if !losses.contains_key(&0) {
                    return Err(TableError::MissingZeroLoss { frame_id, model_id });
                }
                if losses.len() > MAX_LOSS_BINS {
                    return Err(TableError::TooManyLossBins { frame_id, model_id });
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn row(&self, frame_id: u64) -> &FrameProfile {
        &self.frames[(frame_id % self.frames.len() as u64) as usize]
    }

    fn lookup(&self, frame_id: u64, model_id: u32, loss_rate: f64) -> Option<CodecStats> {
        self.row(frame_id)
            .get(&model_id)?
            .get(&loss_bin(loss_rate))
            .copied()
    }
}

fn req_col<T: std::str::FromStr>(
    col: Option<&str>,
    line: usize,
    field: &'static str,
) -> Result<T, TableError> {
    let raw = col.unwrap_or("");
    raw.parse::<T>().map_err(|_| TableError::BadField {
        line,
        field,
        value: raw.to_string(),
    })
}

fn opt_col<T: std::str::FromStr>(
    col: Option<&str>,
    line: usize,
    field: &'static str,
) -> Result<Option<T>, TableError> {
    match col {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| TableError::BadField {
            line,
            field,
            value: raw.to_string(),
        }),
    }
}

// ─── External Capability ────────────────────────────────────────────────────

/// An externally hosted codec: `encode` maps a byte target to a chosen
/// size and model, `decode` maps observed loss to quality metrics. A
/// failing implementation is a fatal fault; implementations panic rather
/// than return errors.
pub trait ExternalCodec {
    fn encode(&mut self, target_frame_size_byte: usize, frame_id: u64) -> (usize, u32);
    fn decode(&mut self, frame_id: u64, loss_rate: f64, mode: u32) -> (f64, f64);
}

pub type SharedExternalCodec = Rc<std::cell::RefCell<dyn ExternalCodec>>;

// ─── Encoder ────────────────────────────────────────────────────────────────

/// Result of encoding one frame.
#[derive(Debug, Clone, Copy)]
pub struct EncodeResult {
    pub frame_size_byte: usize,
    pub model_id: u32,
    /// Smallest zero-loss size over the frame row's models.
    pub min_frame_size_byte: usize,
    /// Largest zero-loss size over the frame row's models.
    pub max_frame_size_byte: usize,
}

pub struct Encoder {
    table: Option<Rc<LookupTable>>,
    external: Option<SharedExternalCodec>,
}

impl Encoder {
    pub fn from_table(table: Rc<LookupTable>) -> Self {
        Encoder {
            table: Some(table),
            external: None,
        }
    }

    pub fn from_external(external: SharedExternalCodec) -> Self {
        Encoder {
            table: None,
            external: Some(external),
        }
    }

    /// Pick the model for `frame_id` whose zero-loss size is the largest
    /// not exceeding the target (smallest positive gap); if nothing fits
    /// under the target, the closest size above it.
    pub fn encode(&mut self, frame_id: u64, target_frame_size_byte: usize) -> EncodeResult {
        if let Some(ext) = &self.external {
            let (size, model_id) = ext
                .borrow_mut()
                .encode(target_frame_size_byte, frame_id);
            return EncodeResult {
                frame_size_byte: size,
                model_id,
                min_frame_size_byte: 0,
                max_frame_size_byte: 0,
            };
        }

        let table = self.table.as_ref().expect("encoder needs a table or capability");
        let row = table.row(frame_id);

        let mut min_size = usize::MAX;
        let mut max_size = 0usize;
        let mut under: Option<(usize, u32)> = None; // largest size <= target
        let mut over: Option<(usize, u32)> = None; // smallest size > target

        for (&model_id, losses) in row {
            let size = losses[&0].size_byte;
            min_size = min_size.min(size);
            max_size = max_size.max(size);
            if size <= target_frame_size_byte {
                if under.map(|(s, _)| size > s).unwrap_or(true) {
                    under = Some((size, model_id));
                }
            } else if over.map(|(s, _)| size < s).unwrap_or(true) {
                over = Some((size, model_id));
            }
        }

        let (frame_size_byte, model_id) =
            under.or(over).expect("validated rows are non-empty");
        EncodeResult {
            frame_size_byte,
            model_id,
            min_frame_size_byte: min_size,
            max_frame_size_byte: max_size,
        }
    }
}

// ─── Decoder ────────────────────────────────────────────────────────────────

pub struct Decoder {
    table: Option<Rc<LookupTable>>,
    external: Option<SharedExternalCodec>,
}

impl Decoder {
    pub fn from_table(table: Rc<LookupTable>) -> Self {
        Decoder {
            table: Some(table),
            external: None,
        }
    }

    pub fn from_external(external: SharedExternalCodec) -> Self {
        Decoder {
            table: None,
            external: Some(external),
        }
    }

    /// Attempt to decode `frame`. Frame 0 requires zero loss; later frames
    /// require a packet of the following frame to have arrived and a loss
    /// rate of at most 0.9. On success the frame's quality metrics and
    /// decode instant are populated.
    pub fn decode(&mut self, frame: &mut Frame, next_frame_pkt_rcvd: bool, now: Timestamp) -> bool {
        let loss_rate = frame.loss_rate();
        let can_decode = if frame.frame_id == 0 {
            loss_rate == 0.0
        } else {
            next_frame_pkt_rcvd && loss_rate <= 0.9
        };
        if !can_decode {
            return false;
        }

        if let Some(ext) = &self.external {
            let (psnr, ssim) = ext.borrow_mut().decode(frame.frame_id, loss_rate, 1);
            frame.psnr = psnr;
            frame.ssim = ssim;
        } else {
            let table = self.table.as_ref().expect("decoder needs a table or capability");
            match table.lookup(frame.frame_id, frame.model_id, loss_rate) {
                Some(stats) => {
                    frame.psnr = stats.psnr;
                    frame.ssim = stats.ssim;
                }
                // No bin for this loss level: leave the frame queued; a
                // retransmission may still lower its loss rate.
                None => return false,
            }
        }
        frame.decode_ts = Some(now);
        true
    }
}
