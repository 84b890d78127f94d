//! Cumulative counters to interval-local rates
//!
//! The normalizer keeps exactly one previous snapshot (a depth-1 window).
//! Items are matched by position only: names ride along for display but are
//! never used to pair a disk or interface with its earlier reading, so a
//! device swap that keeps the count unchanged goes unnoticed.
//!
//! CPU rates are scaled to 0..=255 with round-half-up integer arithmetic:
//! `(delta * 255 + all / 2) / all`. An interval with no elapsed ticks yields
//! all-zero bytes. Disk and network rates are raw deltas truncated to 32
//! bits; a counter that went backwards (reset) contributes zero.

use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{CpuItem, CpuLoad, DiskItem, InterfaceItem, IoLoad, MemoryLoad, NetworkLoad, ProcLoad};

/// Four cumulative counters of one item
pub type Counters = [u64; 4];

/// Counters of an identifiable item (disk or network interface)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCounters {
    pub name: String,
    pub counters: Counters,
}

impl NamedCounters {
    pub fn new(name: impl Into<String>, counters: Counters) -> Self {
        Self {
            name: name.into(),
            counters,
        }
    }
}

/// Sampling domain tracked by the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Cpu,
    Disk,
    Network,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Domain::Cpu => "CPU cores",
            Domain::Disk => "disks",
            Domain::Network => "network interfaces",
        })
    }
}

/// Host introspection collaborator
///
/// Cumulative counter layouts:
/// - cpu: `[user, sys, iowait, idle]` ticks per core
/// - disk: `[reads, writes, kbytes_read, kbytes_written]`
/// - network: `[rx_packets, tx_packets, rx_kbytes, tx_kbytes]`
pub trait CounterSource {
    fn proc_load(&mut self) -> Result<ProcLoad>;

    fn memory_load(&mut self) -> Result<MemoryLoad>;

    fn cpu_counters(&mut self) -> Result<Vec<Counters>>;

    fn disk_counters(&mut self) -> Result<Vec<NamedCounters>>;

    fn network_counters(&mut self) -> Result<Vec<NamedCounters>>;
}

/// Cumulative counters of every domain at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub cpu: Vec<Counters>,
    pub disks: Vec<NamedCounters>,
    pub interfaces: Vec<NamedCounters>,
}

impl Snapshot {
    pub fn capture<S: CounterSource + ?Sized>(source: &mut S) -> Result<Self> {
        Ok(Snapshot {
            cpu: source.cpu_counters()?,
            disks: source.disk_counters()?,
            interfaces: source.network_counters()?,
        })
    }
}

/// Rates computed from two consecutive snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rates {
    pub cpu: CpuLoad,
    pub io: IoLoad,
    pub network: NetworkLoad,
}

#[derive(Debug, Default)]
pub struct RateNormalizer {
    previous: Option<Snapshot>,
}

impl RateNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_primed(&self) -> bool {
        self.previous.is_some()
    }

    /// Capture the first snapshot; produces no rates
    pub fn probe_init<S: CounterSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        let snapshot = Snapshot::capture(source)?;
        debug!(
            "normalizer primed: {} cores, {} disks, {} interfaces",
            snapshot.cpu.len(),
            snapshot.disks.len(),
            snapshot.interfaces.len()
        );
        self.previous = Some(snapshot);
        Ok(())
    }

    /// Capture a new snapshot and return rates against the previous one
    pub fn probe<S: CounterSource + ?Sized>(&mut self, source: &mut S) -> Result<Rates> {
        if !self.is_primed() {
            return Err(Error::Unprimed);
        }
        let current = Snapshot::capture(source)?;
        self.advance(current)
    }

    /// Compute rates against `current` and slide the window forward.
    ///
    /// The window moves even when item counts changed, so the cycle after a
    /// hot-plug event measures against the new device set.
    pub fn advance(&mut self, current: Snapshot) -> Result<Rates> {
        let previous = self.previous.take().ok_or(Error::Unprimed)?;
        let rates = compute_rates(&previous, &current);
        self.previous = Some(current);
        rates
    }
}

fn check_cardinality(domain: Domain, previous: usize, current: usize) -> Result<()> {
    if previous != current {
        return Err(Error::CardinalityMismatch {
            domain,
            previous,
            current,
        });
    }
    Ok(())
}

fn compute_rates(previous: &Snapshot, current: &Snapshot) -> Result<Rates> {
    check_cardinality(Domain::Cpu, previous.cpu.len(), current.cpu.len())?;
    check_cardinality(Domain::Disk, previous.disks.len(), current.disks.len())?;
    check_cardinality(Domain::Network, previous.interfaces.len(), current.interfaces.len())?;

    let cpu = CpuLoad {
        items: previous
            .cpu
            .iter()
            .zip(&current.cpu)
            .map(|(prev, cur)| cpu_item(prev, cur))
            .collect(),
    };

    let io = IoLoad {
        items: previous
            .disks
            .iter()
            .zip(&current.disks)
            .map(|(prev, cur)| {
                let d = counter_deltas(&prev.counters, &cur.counters);
                DiskItem {
                    name: cur.name.clone(),
                    reads: d[0],
                    writes: d[1],
                    read_kbytes: d[2],
                    written_kbytes: d[3],
                }
            })
            .collect(),
    };

    let network = NetworkLoad {
        items: previous
            .interfaces
            .iter()
            .zip(&current.interfaces)
            .map(|(prev, cur)| {
                let d = counter_deltas(&prev.counters, &cur.counters);
                InterfaceItem {
                    name: cur.name.clone(),
                    rx_packets: d[0],
                    tx_packets: d[1],
                    rx_kbytes: d[2],
                    tx_kbytes: d[3],
                }
            })
            .collect(),
    };

    Ok(Rates { cpu, io, network })
}

/// Per-field deltas truncated to 32 bits (wraparound is not detected)
fn counter_deltas(previous: &Counters, current: &Counters) -> [u32; 4] {
    let mut out = [0u32; 4];
    for (slot, (prev, cur)) in out.iter_mut().zip(previous.iter().zip(current)) {
        *slot = cur.saturating_sub(*prev) as u32;
    }
    out
}

/// Normalize one core's tick deltas against their sum
pub fn cpu_item(previous: &Counters, current: &Counters) -> CpuItem {
    let mut deltas = [0u64; 4];
    for (slot, (prev, cur)) in deltas.iter_mut().zip(previous.iter().zip(current)) {
        *slot = cur.saturating_sub(*prev);
    }
    let all: u128 = deltas.iter().map(|&d| u128::from(d)).sum();
    if all == 0 {
        return CpuItem::default();
    }

    let scale = |delta: u64| -> u8 {
        let scaled = (u128::from(delta) * 255 + all / 2) / all;
        scaled.min(255) as u8
    };
    CpuItem {
        user: scale(deltas[0]),
        sys: scale(deltas[1]),
        iowait: scale(deltas[2]),
        idle: scale(deltas[3]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source replaying a scripted list of snapshots
    struct ScriptedSource {
        snapshots: Vec<Snapshot>,
        next: usize,
    }

    impl ScriptedSource {
        fn new(snapshots: Vec<Snapshot>) -> Self {
            Self { snapshots, next: 0 }
        }

        fn current(&self) -> Result<&Snapshot> {
            self.snapshots
                .get(self.next)
                .ok_or_else(|| Error::Source("script exhausted".to_string()))
        }
    }

    impl CounterSource for ScriptedSource {
        fn proc_load(&mut self) -> Result<ProcLoad> {
            Ok(ProcLoad::default())
        }

        fn memory_load(&mut self) -> Result<MemoryLoad> {
            Ok(MemoryLoad::default())
        }

        fn cpu_counters(&mut self) -> Result<Vec<Counters>> {
            Ok(self.current()?.cpu.clone())
        }

        fn disk_counters(&mut self) -> Result<Vec<NamedCounters>> {
            Ok(self.current()?.disks.clone())
        }

        // last domain read per capture: step to the next snapshot
        fn network_counters(&mut self) -> Result<Vec<NamedCounters>> {
            let interfaces = self.current()?.interfaces.clone();
            self.next += 1;
            Ok(interfaces)
        }
    }

    fn cpu_only(cores: Vec<Counters>) -> Snapshot {
        Snapshot {
            cpu: cores,
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_rounding_example() {
        let item = cpu_item(&[100, 50, 10, 840], &[110, 55, 12, 860]);
        // deltas [10, 5, 2, 20], all = 37
        assert_eq!(item.user, 69); // 68.92
        assert_eq!(item.sys, 34); // 34.46
        assert_eq!(item.iowait, 14); // 13.78
        assert_eq!(item.idle, 138); // 137.84
    }

    #[test]
    fn test_cpu_round_half_up() {
        // 1/2 * 255 = 127.5
        let item = cpu_item(&[0, 0, 0, 0], &[1, 0, 0, 1]);
        assert_eq!(item.user, 128);
        assert_eq!(item.idle, 128);
    }

    #[test]
    fn test_cpu_no_elapsed_ticks() {
        let item = cpu_item(&[5, 5, 5, 5], &[5, 5, 5, 5]);
        assert_eq!(item, CpuItem::default());
    }

    #[test]
    fn test_cpu_fully_idle() {
        let item = cpu_item(&[0, 0, 0, 0], &[0, 0, 0, 1000]);
        assert_eq!(item, CpuItem { user: 0, sys: 0, iowait: 0, idle: 255 });
    }

    #[test]
    fn test_counter_reset_is_zero() {
        let item = cpu_item(&[500, 0, 0, 500], &[10, 0, 0, 600]);
        assert_eq!(item.user, 0);
        assert_eq!(item.idle, 255);
        assert_eq!(counter_deltas(&[10, 20, 30, 40], &[5, 25, 30, 50]), [0, 5, 0, 10]);
    }

    #[test]
    fn test_disk_deltas_truncate_to_32_bits() {
        let deltas = counter_deltas(&[0, 0, 0, 0], &[(1u64 << 32) + 7, 0, 0, 0]);
        assert_eq!(deltas[0], 7);
    }

    #[test]
    fn test_probe_requires_init() {
        let mut source = ScriptedSource::new(vec![Snapshot::default()]);
        let mut normalizer = RateNormalizer::new();
        assert!(matches!(normalizer.probe(&mut source), Err(Error::Unprimed)));
    }

    #[test]
    fn test_probe_sequence() {
        let first = Snapshot {
            cpu: vec![[100, 50, 10, 840]],
            disks: vec![NamedCounters::new("sda", [10, 20, 300, 400])],
            interfaces: vec![NamedCounters::new("eth0", [1000, 900, 50, 40])],
        };
        let second = Snapshot {
            cpu: vec![[110, 55, 12, 860]],
            disks: vec![NamedCounters::new("sda", [15, 22, 364, 400])],
            interfaces: vec![NamedCounters::new("eth0", [1100, 950, 60, 41])],
        };
        let mut source = ScriptedSource::new(vec![first, second]);
        let mut normalizer = RateNormalizer::new();
        normalizer.probe_init(&mut source).unwrap();
        let rates = normalizer.probe(&mut source).unwrap();

        assert_eq!(rates.cpu.items, vec![CpuItem { user: 69, sys: 34, iowait: 14, idle: 138 }]);
        assert_eq!(
            rates.io.items,
            vec![DiskItem {
                name: "sda".to_string(),
                reads: 5,
                writes: 2,
                read_kbytes: 64,
                written_kbytes: 0,
            }]
        );
        assert_eq!(rates.network.items[0].rx_packets, 100);
        assert_eq!(rates.network.items[0].tx_kbytes, 1);
    }

    #[test]
    fn test_disk_cardinality_change() {
        let two_disks = Snapshot {
            disks: vec![
                NamedCounters::new("sda", [0; 4]),
                NamedCounters::new("sdb", [0; 4]),
            ],
            ..Default::default()
        };
        let one_disk = Snapshot {
            disks: vec![NamedCounters::new("sda", [1; 4])],
            ..Default::default()
        };
        let mut source = ScriptedSource::new(vec![two_disks, one_disk.clone(), one_disk]);
        let mut normalizer = RateNormalizer::new();
        normalizer.probe_init(&mut source).unwrap();

        assert!(matches!(
            normalizer.probe(&mut source),
            Err(Error::CardinalityMismatch { domain: Domain::Disk, previous: 2, current: 1 })
        ));
        // the window moved to the one-disk snapshot
        let rates = normalizer.probe(&mut source).unwrap();
        assert_eq!(rates.io.items.len(), 1);
        assert_eq!(rates.io.items[0].reads, 0);
    }

    #[test]
    fn test_core_count_change() {
        let mut normalizer = RateNormalizer::new();
        let mut source = ScriptedSource::new(vec![cpu_only(vec![[0; 4]; 4])]);
        normalizer.probe_init(&mut source).unwrap();
        let err = normalizer.advance(cpu_only(vec![[1; 4]; 2])).unwrap_err();
        assert!(matches!(err, Error::CardinalityMismatch { domain: Domain::Cpu, .. }));
        assert!(err.to_string().contains("CPU cores"));
    }

    #[test]
    fn test_positional_matching_ignores_names() {
        let mut normalizer = RateNormalizer::new();
        let mut source = ScriptedSource::new(vec![Snapshot {
            interfaces: vec![NamedCounters::new("eth0", [100, 0, 0, 0])],
            ..Default::default()
        }]);
        normalizer.probe_init(&mut source).unwrap();
        let rates = normalizer
            .advance(Snapshot {
                interfaces: vec![NamedCounters::new("wlan0", [150, 0, 0, 0])],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rates.network.items[0].name, "wlan0");
        assert_eq!(rates.network.items[0].rx_packets, 50);
    }

    #[test]
    fn test_source_failure_keeps_window() {
        let mut source = ScriptedSource::new(vec![cpu_only(vec![[0, 0, 0, 10]])]);
        let mut normalizer = RateNormalizer::new();
        normalizer.probe_init(&mut source).unwrap();
        assert!(matches!(normalizer.probe(&mut source), Err(Error::Source(_))));
        assert!(normalizer.is_primed());
    }
}
