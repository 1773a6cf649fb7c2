//! Per-source reception statistics
//!
//! [`ReceptionStats`] follows one synchronization source: it unwraps the
//! 16-bit sequence space, counts packets and bytes, measures inter-arrival
//! gaps, runs the RFC 3550 interarrival jitter estimator and maps media
//! timestamps onto wall-clock presentation times. Sender reports re-anchor
//! that mapping.

use crate::clock::WallTime;
use crate::sequence::{SeqNum, SequencePolicy, SequenceWindow};
use std::time::Duration;

/// Default forward jump, in sequence numbers, above which a packet is
/// reported as a sequence anomaly
pub const DEFAULT_MAX_DROPOUT: u32 = 3000;

/// Cumulative loss is reported as a signed 24-bit value
const MAX_CUMULATIVE_LOST: i64 = 0x7F_FFFF;
const MIN_CUMULATIVE_LOST: i64 = -0x80_0000;

/// Reception statistics configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionConfig {
    /// How sequence numbers advance the extended window
    pub sequence_policy: SequencePolicy,
    /// Forward jumps larger than this are logged and counted
    pub max_dropout: u32,
    /// Let sender reports re-anchor presentation times. When disabled every
    /// source counts as synchronized from the start.
    pub report_sync: bool,
}

impl Default for ReceptionConfig {
    fn default() -> Self {
        ReceptionConfig {
            sequence_policy: SequencePolicy::default(),
            max_dropout: DEFAULT_MAX_DROPOUT,
            report_sync: true,
        }
    }
}

/// Metadata of one received data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingPacket {
    pub seq: SeqNum,
    pub rtp_timestamp: u32,
    /// Media clock rate in Hz
    pub clock_rate: u32,
    /// False for packets that must not feed the jitter estimate
    pub use_for_jitter: bool,
    /// Payload size in bytes
    pub size: usize,
}

/// Presentation timing computed for a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTiming {
    pub presentation_time: WallTime,
    /// True once a sender report has anchored this source
    pub synchronized: bool,
}

/// Media timestamp paired with the wall-clock time it corresponds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SyncAnchor {
    rtp_timestamp: u32,
    time: WallTime,
}

/// Last sender report received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReportInfo {
    pub ntp_msw: u32,
    pub ntp_lsw: u32,
    /// Local time the report arrived
    pub received_at: WallTime,
}

impl SenderReportInfo {
    /// Middle 32 bits of the report's NTP timestamp
    pub fn compact_ntp(&self) -> u32 {
        (self.ntp_msw << 16) | (self.ntp_lsw >> 16)
    }
}

/// Reception statistics for one source
#[derive(Debug, Clone)]
pub struct ReceptionStats {
    ssrc: u32,
    config: ReceptionConfig,

    packets_since_reset: u64,
    total_packets: u64,
    total_bytes: u64,
    window: SequenceWindow,
    sequence_anomalies: u64,

    last_reception: Option<WallTime>,
    min_gap_us: u32,
    max_gap_us: u32,
    total_gaps: Duration,

    previous_rtp_timestamp: Option<u32>,
    last_transit: Option<i32>,
    jitter: f64,

    synchronized: bool,
    anchor: Option<SyncAnchor>,
    last_report: Option<SenderReportInfo>,
}

impl ReceptionStats {
    pub fn new(ssrc: u32, config: ReceptionConfig) -> Self {
        ReceptionStats {
            ssrc,
            config,
            packets_since_reset: 0,
            total_packets: 0,
            total_bytes: 0,
            window: SequenceWindow::new(),
            sequence_anomalies: 0,
            last_reception: None,
            min_gap_us: 0x7FFF_FFFF,
            max_gap_us: 0,
            total_gaps: Duration::ZERO,
            previous_rtp_timestamp: None,
            last_transit: None,
            jitter: 0.0,
            synchronized: !config.report_sync,
            anchor: None,
            last_report: None,
        }
    }

    /// Account for a data packet that arrived at `now`
    pub fn on_packet(&mut self, packet: &IncomingPacket, now: WallTime) -> PacketTiming {
        self.packets_since_reset += 1;
        self.total_packets += 1;
        self.total_bytes = self.total_bytes.saturating_add(packet.size as u64);

        self.track_sequence(packet.seq);
        self.track_gap(now);

        if packet.use_for_jitter
            && packet.clock_rate != 0
            && self.previous_rtp_timestamp != Some(packet.rtp_timestamp)
        {
            self.update_jitter(packet.rtp_timestamp, packet.clock_rate, now);
        }

        let presentation_time =
            self.presentation_time(packet.rtp_timestamp, packet.clock_rate, now);
        self.previous_rtp_timestamp = Some(packet.rtp_timestamp);

        PacketTiming {
            presentation_time,
            synchronized: self.synchronized,
        }
    }

    /// Account for a sender report carrying an NTP time and the matching
    /// media timestamp
    pub fn on_report(&mut self, ntp_msw: u32, ntp_lsw: u32, rtp_timestamp: u32, now: WallTime) {
        self.last_report = Some(SenderReportInfo {
            ntp_msw,
            ntp_lsw,
            received_at: now,
        });

        if self.config.report_sync {
            let time = WallTime::from_ntp(ntp_msw, ntp_lsw);
            tracing::debug!(ssrc = self.ssrc, rtp_timestamp, %time, "sender report anchored source");
            self.anchor = Some(SyncAnchor {
                rtp_timestamp,
                time,
            });
        }
        self.synchronized = true;
    }

    /// Start a new reporting interval
    pub fn reset(&mut self) {
        self.packets_since_reset = 0;
        self.window.reset();
    }

    fn track_sequence(&mut self, seq: SeqNum) {
        let jump = self.window.observe(seq, self.config.sequence_policy);
        if jump > self.config.max_dropout {
            self.sequence_anomalies += 1;
            tracing::warn!(
                ssrc = self.ssrc,
                seq = seq.as_raw(),
                jump,
                max_dropout = self.config.max_dropout,
                "sequence number jumped beyond dropout limit"
            );
        }
    }

    fn track_gap(&mut self, now: WallTime) {
        if let Some(last) = self.last_reception {
            let gap = now.micros_since(last).clamp(0, u32::MAX as i64) as u32;
            self.max_gap_us = self.max_gap_us.max(gap);
            self.min_gap_us = self.min_gap_us.min(gap);
            self.total_gaps = self
                .total_gaps
                .saturating_add(Duration::from_micros(gap as u64));
        }
        self.last_reception = Some(now);
    }

    /// RFC 3550 A.8 interarrival jitter
    fn update_jitter(&mut self, rtp_timestamp: u32, clock_rate: u32, now: WallTime) {
        let rate = clock_rate as u64;
        let rounded_micros = (2 * rate * now.subsec_micros() as u64 + 1_000_000) / 2_000_000;
        let arrival = clock_rate
            .wrapping_mul(now.secs() as u32)
            .wrapping_add(rounded_micros as u32);
        let transit = arrival.wrapping_sub(rtp_timestamp) as i32;

        if let Some(last_transit) = self.last_transit {
            let d = (transit.wrapping_sub(last_transit) as i64).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    fn presentation_time(
        &mut self,
        rtp_timestamp: u32,
        clock_rate: u32,
        now: WallTime,
    ) -> WallTime {
        let anchor = *self.anchor.get_or_insert(SyncAnchor {
            rtp_timestamp,
            time: now,
        });

        let presentation_time = if clock_rate == 0 {
            anchor.time
        } else {
            let diff = rtp_timestamp.wrapping_sub(anchor.rtp_timestamp) as i32;
            anchor
                .time
                .offset_by_secs_f64(diff as f64 / clock_rate as f64)
        };

        self.anchor = Some(SyncAnchor {
            rtp_timestamp,
            time: presentation_time,
        });
        presentation_time
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn config(&self) -> &ReceptionConfig {
        &self.config
    }

    pub fn packets_since_reset(&self) -> u64 {
        self.packets_since_reset
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_kbytes_received(&self) -> f64 {
        self.total_bytes as f64 / 1000.0
    }

    pub fn base_ext_seq(&self) -> u32 {
        self.window.base()
    }

    pub fn highest_ext_seq(&self) -> u32 {
        self.window.highest()
    }

    pub fn last_reset_ext_seq(&self) -> u32 {
        self.window.last_reset()
    }

    /// Packets expected from the span of sequence numbers seen
    pub fn total_expected(&self) -> u32 {
        self.window.expected()
    }

    pub fn expected_since_last_reset(&self) -> u32 {
        self.window.expected_since_reset()
    }

    /// Expected minus received, clamped to a signed 24-bit range.
    /// Duplicates can drive it negative.
    pub fn cumulative_lost(&self) -> i32 {
        let lost = self.total_expected() as i64 - self.total_packets as i64;
        lost.clamp(MIN_CUMULATIVE_LOST, MAX_CUMULATIVE_LOST) as i32
    }

    /// Fraction of the packets expected this interval that were lost, in
    /// units of 1/256
    pub fn fraction_lost_since_last_reset(&self) -> u8 {
        let expected = self.expected_since_last_reset() as i64;
        let lost = expected - self.packets_since_reset as i64;
        if expected == 0 || lost <= 0 {
            0
        } else {
            ((lost << 8) / expected).min(255) as u8
        }
    }

    pub fn sequence_anomalies(&self) -> u64 {
        self.sequence_anomalies
    }

    /// Interarrival jitter in media clock units
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    /// Smallest inter-packet gap in microseconds (`0x7FFFFFFF` until two
    /// packets have arrived)
    pub fn min_gap_us(&self) -> u32 {
        self.min_gap_us
    }

    pub fn max_gap_us(&self) -> u32 {
        self.max_gap_us
    }

    pub fn total_gaps(&self) -> Duration {
        self.total_gaps
    }

    pub fn last_reception(&self) -> Option<WallTime> {
        self.last_reception
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn last_report(&self) -> Option<&SenderReportInfo> {
        self.last_report.as_ref()
    }

    /// Time since the last sender report arrived
    pub fn delay_since_last_report(&self, now: WallTime) -> Option<Duration> {
        self.last_report
            .map(|report| now.saturating_duration_since(report.received_at))
    }
}
