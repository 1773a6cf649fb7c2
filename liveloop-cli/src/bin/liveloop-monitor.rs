//! liveloop monitor - RTP reception statistics
//!
//! Listens for RTP on a UDP socket, feeds every packet into per-source
//! reception statistics and prints an interval report.

use anyhow::Context;
use clap::Parser;
use liveloop_cli::{display_registry_stats, MonitorConfig, RtpHeader, SequenceMode};
use liveloop_io::{Reactor, UdpEndpoint};
use liveloop_rtp::{IncomingPacket, ReceptionStatsRegistry, SeqNum, WallTime};
use std::cell::RefCell;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Largest UDP payload
const MAX_DATAGRAM: usize = 65_536;

#[derive(Parser, Debug)]
#[command(name = "liveloop-monitor")]
#[command(about = "RTP reception monitor", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// IPv4 multicast group to join
    #[arg(short, long)]
    multicast: Option<Ipv4Addr>,

    /// Media clock rate in Hz
    #[arg(long)]
    clock_rate: Option<u32>,

    /// Report interval in seconds (0 disables interval reports)
    #[arg(long)]
    stats: Option<u64>,

    /// Scheduler tick in milliseconds
    #[arg(long)]
    granularity_ms: Option<u64>,

    /// Track sequence numbers by forward delta only
    #[arg(long)]
    delta_only: bool,

    /// Sequence jump reported as an anomaly
    #[arg(long)]
    max_dropout: Option<u32>,

    /// Include sources silent during the last interval
    #[arg(long)]
    include_inactive: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Write an example configuration file and exit
    #[arg(long)]
    write_example_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::from_file(path)
                .with_context(|| format!("Failed to load config '{}'", path.display()))?,
            None => MonitorConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if self.multicast.is_some() {
            config.multicast_group = self.multicast;
        }
        if let Some(rate) = self.clock_rate {
            config.clock_rate = rate;
        }
        if let Some(stats) = self.stats {
            config.report_interval_secs = stats;
        }
        if let Some(granularity) = self.granularity_ms {
            config.scheduler_granularity_ms = granularity;
        }
        if self.delta_only {
            config.sequence_mode = SequenceMode::DeltaOnly;
        }
        if let Some(max_dropout) = self.max_dropout {
            config.max_dropout = max_dropout;
        }
        if self.include_inactive {
            config.include_inactive = true;
        }

        config.validate()?;
        Ok(config)
    }
}

/// State shared by the report task
struct Report {
    registry: Rc<RefCell<ReceptionStatsRegistry>>,
    clock_rate: u32,
    include_inactive: bool,
    started: Instant,
}

impl Report {
    fn print_and_reset(&self) {
        let mut registry = self.registry.borrow_mut();
        display_registry_stats(
            &registry,
            self.clock_rate,
            self.include_inactive,
            self.started.elapsed(),
            WallTime::now(),
        );
        registry.reset();
    }
}

fn schedule_report(reactor: &mut Reactor, report: Rc<Report>, interval: Duration) {
    reactor.schedule_delayed_task(interval, move |reactor| {
        report.print_and_reset();
        schedule_report(reactor, report, interval);
    });
}

/// Drain every pending datagram into the registry
fn receive_all(
    endpoint: &UdpEndpoint,
    buf: &mut [u8],
    registry: &RefCell<ReceptionStatsRegistry>,
    clock_rate: u32,
) {
    loop {
        let (n, from) = match endpoint.try_recv_from(buf) {
            Ok(Some(received)) => received,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Receive error: {}", e);
                return;
            }
        };

        let header = match RtpHeader::from_bytes(&buf[..n]) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(%from, "Dropping non-RTP datagram: {}", e);
                continue;
            }
        };

        let packet = IncomingPacket {
            seq: SeqNum::new(header.sequence_number),
            rtp_timestamp: header.timestamp,
            clock_rate,
            use_for_jitter: true,
            size: header.payload_len,
        };
        let timing = registry
            .borrow_mut()
            .on_packet(header.ssrc, &packet, WallTime::now());

        tracing::trace!(
            ssrc = header.ssrc,
            seq = header.sequence_number,
            presentation = %timing.presentation_time,
            "RTP packet"
        );
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = &args.write_example_config {
        MonitorConfig::example().to_file(path)?;
        tracing::info!("Wrote example config to {}", path.display());
        return Ok(());
    }

    let run_for = args.duration.map(Duration::from_secs);
    let config = args.into_config()?;

    let endpoint = UdpEndpoint::bind(config.listen)
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    if let Some(group) = config.multicast_group {
        endpoint.join_multicast_v4(group)?;
        tracing::info!("Joined multicast group {}", group);
    }
    if let Some(size) = config.recv_buffer_size {
        endpoint.set_recv_buffer_size(size)?;
    }
    tracing::info!("Listening on: {}", endpoint.local_addr()?);

    let mut reactor = Reactor::with_config(config.reactor_config());
    let registry = Rc::new(RefCell::new(ReceptionStatsRegistry::new(config.reception_config())));
    let stop = Rc::new(AtomicBool::new(false));

    let socket = endpoint.socket_num();
    let clock_rate = config.clock_rate;
    let rx_registry = registry.clone();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    reactor.turn_on_background_read_handling(socket, move |_, _| {
        receive_all(&endpoint, &mut buf, &rx_registry, clock_rate);
    });

    let report = Rc::new(Report {
        registry: registry.clone(),
        clock_rate,
        include_inactive: config.include_inactive,
        started: Instant::now(),
    });
    if config.report_interval_secs > 0 {
        schedule_report(&mut reactor, report.clone(), config.report_interval());
    }

    // Enter on stdin stops the loop from a helper thread
    let stop_on_enter = stop.clone();
    let shutdown = reactor.create_event_trigger(move |_| {
        tracing::info!("Shutdown requested");
        stop_on_enter.store(true, Ordering::Release);
    })?;
    let handle = reactor.trigger_handle();
    thread::spawn(move || {
        let mut line = String::new();
        if matches!(io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            handle.trigger(shutdown);
        }
    });

    if let Some(limit) = run_for {
        let stop_after = stop.clone();
        reactor.schedule_delayed_task(limit, move |_| {
            stop_after.store(true, Ordering::Release);
        });
    }

    tracing::info!("Ready to receive packets...");
    reactor.do_event_loop(&stop)?;

    report.print_and_reset();
    Ok(())
}
