//! CSV log emission.
//!
//! Rows are hand-formatted so reruns with the same seed produce
//! byte-identical files.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use riptide_sim::sim::Simulation;
use riptide_sim::stats::PacketLogRecord;

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_file(dir: &Path, name: &str, contents: String) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
}

fn pkt_log_csv(records: &[PacketLogRecord]) -> String {
    let mut out = String::from(
        "timestamp_us,direction,seq_num,ack_num,pkt_size_byte,one_way_delay_ms,rtt_ms,\
         tx_link_qsize_byte,rx_link_qsize_byte\n",
    );
    for r in records {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            r.timestamp_us,
            r.direction.symbol(),
            opt(r.seq),
            opt(r.ack),
            r.pkt_size_byte,
            opt(r.one_way_delay_ms),
            opt(r.rtt_ms),
            r.tx_link_qsize_byte,
            r.rx_link_qsize_byte,
        );
    }
    out
}

pub fn write_logs(sim: &Simulation, dir: &Path) -> Result<()> {
    write_file(dir, "pkt_log0.csv", pkt_log_csv(&sim.sender_pkt_log()))?;
    write_file(dir, "pkt_log1.csv", pkt_log_csv(&sim.receiver_pkt_log()))?;

    let mut out = String::from(
        "timestamp_us,target_bitrate_bps,fec_data_rate_bps,frame_bitrate_bps,\
         min_frame_bitrate_bps,max_frame_bitrate_bps,fec_rate,model_id,padding_byte\n",
    );
    for r in sim.video_send_log() {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            r.timestamp_us,
            r.target_bitrate_bps,
            r.fec_data_rate_bps,
            r.frame_bitrate_bps,
            r.min_frame_bitrate_bps,
            r.max_frame_bitrate_bps,
            r.fec_rate,
            r.model_id,
            r.padding_byte,
        );
    }
    write_file(dir, "video_sender_log.csv", out)?;

    let mut out = String::from(
        "frame_id,model_id,frame_encode_ts_us,frame_decode_ts_us,encode_bitrate_bps,\
         frame_loss_rate,ssim,psnr\n",
    );
    for r in sim.video_recv_log() {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            r.frame_id,
            r.model_id,
            r.frame_encode_ts_us,
            r.frame_decode_ts_us,
            r.encode_bitrate_bps,
            r.frame_loss_rate,
            r.ssim,
            r.psnr,
        );
    }
    write_file(dir, "video_receiver_log.csv", out)?;

    if let Some((sender, receiver)) = sim.gcc_logs() {
        for (records, name) in [(sender, "gcc_log_0.csv"), (receiver, "gcc_log_1.csv")] {
            let mut out = String::from(
                "timestamp_us,rate_bps,loss_based_rate_bps,delay_based_rate_bps,\
                 remote_rate_control_state,delay_gradient,delay_gradient_hat,\
                 delay_gradient_thresh,rcv_rate_bps,overuse_signal,loss_fraction\n",
            );
            for r in records {
                let _ = writeln!(
                    out,
                    "{},{},{},{},{},{},{},{},{},{},{}",
                    r.timestamp_us,
                    r.rate_bps,
                    r.loss_based_rate_bps,
                    r.delay_based_rate_bps,
                    r.remote_rate_control_state,
                    r.delay_gradient,
                    r.delay_gradient_hat,
                    r.delay_gradient_thresh,
                    r.rcv_rate_bps,
                    r.overuse_signal,
                    r.loss_fraction,
                );
            }
            write_file(dir, name, out)?;
        }
    }

    if let Some(records) = sim.fbra_log() {
        let mut out = String::from(
            "timestamp_us,rate_bps,p40_owd_ms,p80_owd_ms,state,fec_enabled,fec_interval,\
             corr_owd_low,corr_owd_high\n",
        );
        for r in records {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{},{},{}",
                r.timestamp_us,
                r.rate_bps,
                r.p40_owd_ms,
                r.p80_owd_ms,
                r.state,
                r.fec_enabled,
                r.fec_interval,
                r.corr_owd_low,
                r.corr_owd_high,
            );
        }
        write_file(dir, "fbra_log.csv", out)?;
    }

    if let Some(records) = sim.salsify_log() {
        let mut out = String::from(
            "timestamp_us,num_pkt_inflight,mean_interarrival_us,incoming_rate_bps,\
             encode_rate_bps\n",
        );
        for r in records {
            let _ = writeln!(
                out,
                "{},{},{},{},{}",
                r.timestamp_us,
                r.num_pkt_inflight,
                r.mean_interarrival_us,
                r.incoming_rate_bps,
                r.encode_rate_bps,
            );
        }
        write_file(dir, "salsify_log.csv", out)?;
    }

    Ok(())
}
