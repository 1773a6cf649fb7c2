//! Reception statistics for every source of a session

use crate::clock::WallTime;
use crate::reception::{IncomingPacket, PacketTiming, ReceptionConfig, ReceptionStats};
use std::collections::HashMap;

/// Per-source statistics keyed by SSRC, created on first contact
#[derive(Debug, Clone, Default)]
pub struct ReceptionStatsRegistry {
    sources: HashMap<u32, ReceptionStats>,
    total_packets: u64,
    active_since_reset: usize,
    config: ReceptionConfig,
}

impl ReceptionStatsRegistry {
    pub fn new(config: ReceptionConfig) -> Self {
        ReceptionStatsRegistry {
            config,
            ..Self::default()
        }
    }

    fn entry(&mut self, ssrc: u32) -> &mut ReceptionStats {
        let config = self.config;
        self.sources.entry(ssrc).or_insert_with(|| {
            tracing::debug!(ssrc, "new reception source");
            ReceptionStats::new(ssrc, config)
        })
    }

    /// Account for a data packet from `ssrc`
    pub fn on_packet(&mut self, ssrc: u32, packet: &IncomingPacket, now: WallTime) -> PacketTiming {
        self.total_packets += 1;

        let stats = self.entry(ssrc);
        let newly_active = stats.packets_since_reset() == 0;
        let timing = stats.on_packet(packet, now);

        if newly_active {
            self.active_since_reset += 1;
        }
        timing
    }

    /// Account for a sender report from `ssrc`
    pub fn on_report(
        &mut self,
        ssrc: u32,
        ntp_msw: u32,
        ntp_lsw: u32,
        rtp_timestamp: u32,
        now: WallTime,
    ) {
        self.entry(ssrc).on_report(ntp_msw, ntp_lsw, rtp_timestamp, now);
    }

    /// Forget a source, e.g. on BYE
    pub fn remove(&mut self, ssrc: u32) -> Option<ReceptionStats> {
        let removed = self.sources.remove(&ssrc);
        if removed.is_some() {
            tracing::debug!(ssrc, "removed reception source");
        }
        removed
    }

    pub fn lookup(&self, ssrc: u32) -> Option<&ReceptionStats> {
        self.sources.get(&ssrc)
    }

    /// Start a new reporting interval for every source
    pub fn reset(&mut self) {
        self.active_since_reset = 0;
        for stats in self.sources.values_mut() {
            stats.reset();
        }
    }

    /// Sources, skipping those silent since the last reset unless
    /// `include_inactive` is set. Order is unspecified.
    pub fn iter(
        &self,
        include_inactive: bool,
    ) -> impl Iterator<Item = &ReceptionStats> + Clone + '_ {
        self.sources
            .values()
            .filter(move |stats| include_inactive || stats.packets_since_reset() > 0)
    }

    /// Packets received from all sources
    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    /// Sources heard from since the last reset
    pub fn active_since_reset(&self) -> usize {
        self.active_since_reset
    }

    pub fn config(&self) -> &ReceptionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SeqNum;

    fn packet(seq: u16) -> IncomingPacket {
        IncomingPacket {
            seq: SeqNum::new(seq),
            rtp_timestamp: seq as u32 * 3000,
            clock_rate: 90_000,
            use_for_jitter: true,
            size: 100,
        }
    }

    fn now() -> WallTime {
        WallTime::new(1_700_000_000, 0)
    }

    #[test]
    fn test_lazy_creation() {
        let mut registry = ReceptionStatsRegistry::default();
        assert!(registry.is_empty());

        registry.on_packet(1, &packet(10), now());
        registry.on_packet(1, &packet(11), now());
        registry.on_packet(2, &packet(500), now());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.total_packets(), 3);
        assert_eq!(registry.active_since_reset(), 2);
        assert_eq!(registry.lookup(1).unwrap().total_packets(), 2);
        assert!(registry.lookup(3).is_none());
    }

    #[test]
    fn test_report_creates_inactive_source() {
        let mut registry = ReceptionStatsRegistry::default();
        registry.on_report(9, 0x83AA_7E80, 0, 0, now());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.total_packets(), 0);
        assert_eq!(registry.active_since_reset(), 0);
        assert_eq!(registry.iter(false).count(), 0);
        assert_eq!(registry.iter(true).count(), 1);
        assert!(registry.lookup(9).unwrap().is_synchronized());
    }

    #[test]
    fn test_reset_and_reactivation() {
        let mut registry = ReceptionStatsRegistry::default();
        registry.on_packet(1, &packet(1), now());
        registry.on_packet(2, &packet(1), now());

        registry.reset();
        assert_eq!(registry.active_since_reset(), 0);
        assert_eq!(registry.iter(false).count(), 0);
        assert_eq!(registry.total_packets(), 2);

        registry.on_packet(2, &packet(2), now());
        assert_eq!(registry.active_since_reset(), 1);

        let active: Vec<u32> = registry.iter(false).map(|s| s.ssrc()).collect();
        assert_eq!(active, vec![2]);
        assert_eq!(registry.lookup(1).unwrap().total_packets(), 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = ReceptionStatsRegistry::default();
        registry.on_packet(1, &packet(1), now());

        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.ssrc(), 1);
        assert!(registry.is_empty());
        assert!(registry.remove(1).is_none());

        // A returning source starts over
        registry.on_packet(1, &packet(40_000), now());
        assert_eq!(registry.lookup(1).unwrap().base_ext_seq(), 0x10000 | 40_000);
    }

    #[test]
    fn test_iter_is_restartable() {
        let mut registry = ReceptionStatsRegistry::default();
        for ssrc in 0..4 {
            registry.on_packet(ssrc, &packet(1), now());
        }

        let iter = registry.iter(false);
        assert_eq!(iter.clone().count(), 4);
        assert_eq!(iter.count(), 4);
    }

    #[test]
    fn test_config_applies_to_new_sources() {
        let config = ReceptionConfig {
            report_sync: false,
            ..ReceptionConfig::default()
        };
        let mut registry = ReceptionStatsRegistry::new(config);
        let timing = registry.on_packet(5, &packet(1), now());
        assert!(timing.synchronized);
        assert_eq!(*registry.lookup(5).unwrap().config(), config);
    }
}
