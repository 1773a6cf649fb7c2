//! Statistics display and formatting

use liveloop_rtp::{ReceptionStats, ReceptionStatsRegistry, WallTime};
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format an inter-packet gap given in microseconds
pub fn format_gap(gap_us: u32) -> String {
    if gap_us >= 1_000_000 {
        format!("{:.2}s", gap_us as f64 / 1_000_000.0)
    } else if gap_us >= 1_000 {
        format!("{:.2}ms", gap_us as f64 / 1_000.0)
    } else {
        format!("{}µs", gap_us)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Jitter in milliseconds for a given media clock rate
pub fn jitter_ms(stats: &ReceptionStats, clock_rate: u32) -> f64 {
    if clock_rate == 0 {
        return 0.0;
    }
    stats.jitter() as f64 * 1000.0 / clock_rate as f64
}

/// Mean inter-packet gap over the source's lifetime, in microseconds
fn mean_gap_us(stats: &ReceptionStats) -> Option<u32> {
    let gaps = stats.total_packets().checked_sub(1).filter(|n| *n > 0)?;
    Some((stats.total_gaps().as_micros() / gaps as u128).min(u32::MAX as u128) as u32)
}

/// One table row describing a source
pub fn source_row(stats: &ReceptionStats, clock_rate: u32) -> String {
    let (min_gap, mean_gap) = match mean_gap_us(stats) {
        Some(mean) => (format_gap(stats.min_gap_us()), format_gap(mean)),
        None => ("N/A".to_string(), "N/A".to_string()),
    };

    format!(
        "│ {:08x} │ {:>8} │ {:>7} │ {:>5.1}% │ {:>9} │ {:>8.2}ms │ {:>9} │ {:>9} │ {:4} │",
        stats.ssrc(),
        stats.packets_since_reset(),
        stats.cumulative_lost(),
        stats.fraction_lost_since_last_reset() as f64 * 100.0 / 256.0,
        format_bytes(stats.total_bytes()),
        jitter_ms(stats, clock_rate),
        min_gap,
        mean_gap,
        if stats.is_synchronized() { "yes" } else { "no" },
    )
}

/// Display registry statistics for the interval that just ended
pub fn display_registry_stats(
    registry: &ReceptionStatsRegistry,
    clock_rate: u32,
    include_inactive: bool,
    uptime: Duration,
    now: WallTime,
) {
    println!("\n┌────────────────────────────────────────────────────────────────────────────────────────────┐");
    println!(
        "│ RECEPTION  uptime {:<10} packets {:<12} sources {} ({} active)",
        format_duration(uptime),
        registry.total_packets(),
        registry.len(),
        registry.active_since_reset()
    );
    println!("├──────────┬──────────┬─────────┬────────┬───────────┬────────────┬───────────┬───────────┬──────┤");
    println!("│ SSRC     │ Packets  │ Lost    │ Loss   │ Bytes     │ Jitter     │ Min gap   │ Mean gap  │ Sync │");
    println!("├──────────┼──────────┼─────────┼────────┼───────────┼────────────┼───────────┼───────────┼──────┤");

    let mut sources: Vec<&ReceptionStats> = registry.iter(include_inactive).collect();
    sources.sort_by_key(|stats| stats.ssrc());
    for stats in sources {
        println!("{}", source_row(stats, clock_rate));
        if stats.sequence_anomalies() > 0 {
            println!("│   {} sequence anomalies", stats.sequence_anomalies());
        }
        if let Some(delay) = stats.delay_since_last_report(now) {
            println!("│   last sender report {} ago", format_duration(delay));
        }
    }

    println!("└──────────┴──────────┴─────────┴────────┴───────────┴────────────┴───────────┴───────────┴──────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveloop_rtp::{IncomingPacket, ReceptionConfig, SeqNum};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
    }

    #[test]
    fn test_format_gap() {
        assert_eq!(format_gap(500), "500µs");
        assert_eq!(format_gap(50_000), "50.00ms");
        assert_eq!(format_gap(2_000_000), "2.00s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_source_row() {
        let mut stats = ReceptionStats::new(0xABCD, ReceptionConfig::default());
        for (i, seq) in [1u16, 2, 4].into_iter().enumerate() {
            let packet = IncomingPacket {
                seq: SeqNum::new(seq),
                rtp_timestamp: seq as u32 * 900,
                clock_rate: 90_000,
                use_for_jitter: true,
                size: 100,
            };
            stats.on_packet(&packet, WallTime::new(1, i as i64 * 10_000));
        }

        let row = source_row(&stats, 90_000);
        assert!(row.contains("0000abcd"));
        assert!(row.contains("10.00ms"));
        assert!(row.contains("no"));
        assert_eq!(mean_gap_us(&stats), Some(10_000));
    }

    #[test]
    fn test_single_packet_has_no_gap() {
        let mut stats = ReceptionStats::new(1, ReceptionConfig::default());
        let packet = IncomingPacket {
            seq: SeqNum::new(0),
            rtp_timestamp: 0,
            clock_rate: 90_000,
            use_for_jitter: true,
            size: 1,
        };
        stats.on_packet(&packet, WallTime::new(1, 0));
        assert_eq!(mean_gap_us(&stats), None);
        assert!(source_row(&stats, 90_000).contains("N/A"));
    }
}
