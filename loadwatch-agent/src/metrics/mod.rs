//! Host counter collection for loadwatch agents
//!
//! Reads the Linux procfs interfaces:
//! - Uptime (`/proc/uptime`)
//! - Memory counters (`/proc/meminfo`)
//! - Per-core CPU ticks (`/proc/stat`)
//! - Per-disk I/O (`/proc/diskstats`) and per-interface traffic (`/proc/net/dev`)
//! - Load averages and process table summary (via sysinfo)
//!
//! Item lists are cut down so each subpacket fits its 255 byte payload.

use loadwatch_core::codec::{named_item_size, CPU_ITEM_SIZE};
use loadwatch_core::message::MAX_SUBPACKET_PAYLOAD;
use loadwatch_core::{CounterSource, Counters, Domain, Error, MemoryLoad, NamedCounters, ProcLoad, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use sysinfo::{ProcessRefreshKind, ProcessStatus, System};
use tracing::warn;

/// Most cores a CPULoad payload can carry
pub const MAX_CPU_ITEMS: usize = (MAX_SUBPACKET_PAYLOAD - 1) / CPU_ITEM_SIZE;

/// Device name prefixes never reported as disks
const SKIPPED_DISK_PREFIXES: &[&str] = &["loop", "ram"];

/// Counter source backed by procfs
pub struct ProcfsSource {
    root: PathBuf,
    system: System,
    truncation_reported: HashSet<Domain>,
}

impl ProcfsSource {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read counters below an alternate procfs mount
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            system: System::new(),
            truncation_reported: HashSet::new(),
        }
    }

    fn read(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path)
            .map_err(|e| Error::Source(format!("failed to read {}: {}", path.display(), e)))
    }

    /// (all, running, iowait, zombie), threads excluded
    fn process_counts(&mut self) -> [i32; 4] {
        self.system.refresh_processes_specifics(ProcessRefreshKind::new());

        let mut counts = [0i32; 4];
        for process in self.system.processes().values() {
            if process.thread_kind().is_some() {
                continue;
            }
            counts[0] += 1;
            match process.status() {
                ProcessStatus::Run => counts[1] += 1,
                ProcessStatus::UninterruptibleDiskSleep => counts[2] += 1,
                ProcessStatus::Zombie => counts[3] += 1,
                _ => {}
            }
        }
        counts
    }

    /// Warn once per domain; returns true when a warning was emitted
    fn report_truncation(&mut self, domain: Domain, kept: usize, total: usize) -> bool {
        if kept < total && self.truncation_reported.insert(domain) {
            warn!("Reporting only {} of {} {} to fit the wire format", kept, total, domain);
            return true;
        }
        false
    }
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for ProcfsSource {
    fn proc_load(&mut self) -> Result<ProcLoad> {
        let (uptime_total, uptime_idle) = parse_uptime(&self.read("uptime")?)?;
        let load = System::load_average();
        let loadavg = [load.one as f32, load.five as f32, load.fifteen as f32];
        let [procs_all, procs_running, procs_iowait, procs_zombie] = self.process_counts();

        Ok(ProcLoad {
            uptime_total,
            uptime_idle,
            loadavg,
            procs_all,
            procs_running,
            procs_iowait,
            procs_zombie,
        })
    }

    fn memory_load(&mut self) -> Result<MemoryLoad> {
        parse_meminfo(&self.read("meminfo")?)
    }

    fn cpu_counters(&mut self) -> Result<Vec<Counters>> {
        let mut cores = parse_stat_cpus(&self.read("stat")?)?;
        let total = cores.len();
        cores.truncate(MAX_CPU_ITEMS);
        self.report_truncation(Domain::Cpu, cores.len(), total);
        Ok(cores)
    }

    fn disk_counters(&mut self) -> Result<Vec<NamedCounters>> {
        let disks = parse_diskstats(&self.read("diskstats")?)?;
        let total = disks.len();
        let disks = fit_payload(disks);
        self.report_truncation(Domain::Disk, disks.len(), total);
        Ok(disks)
    }

    fn network_counters(&mut self) -> Result<Vec<NamedCounters>> {
        let interfaces = parse_net_dev(&self.read("net/dev")?)?;
        let total = interfaces.len();
        let interfaces = fit_payload(interfaces);
        self.report_truncation(Domain::Network, interfaces.len(), total);
        Ok(interfaces)
    }
}

fn malformed(file: &str, detail: impl std::fmt::Display) -> Error {
    Error::Source(format!("malformed {}: {}", file, detail))
}

fn parse_field<T: std::str::FromStr>(file: &str, field: Option<&str>) -> Result<T> {
    let field = field.ok_or_else(|| malformed(file, "missing field"))?;
    field
        .parse()
        .map_err(|_| malformed(file, format!("bad value {:?}", field)))
}

/// `/proc/uptime`: total seconds, idle seconds
pub fn parse_uptime(text: &str) -> Result<(f32, f32)> {
    let mut fields = text.split_whitespace();
    let total = parse_field("uptime", fields.next())?;
    let idle = parse_field("uptime", fields.next())?;
    Ok((total, idle))
}

/// `/proc/meminfo` in kB, values beyond u32 saturate
pub fn parse_meminfo(text: &str) -> Result<MemoryLoad> {
    let mut memory = MemoryLoad::default();
    let mut seen_free = false;

    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value: u64 = parse_field("meminfo", rest.split_whitespace().next())?;
        let value = u32::try_from(value).unwrap_or(u32::MAX);
        let slot = match key.trim() {
            "MemFree" => {
                seen_free = true;
                &mut memory.free
            }
            "Buffers" => &mut memory.buffers,
            "Cached" => &mut memory.cached,
            "Dirty" => &mut memory.dirty,
            "Active" => &mut memory.active,
            "SwapTotal" => &mut memory.swap_total,
            "SwapFree" => &mut memory.swap_free,
            "SwapCached" => &mut memory.swap_cached,
            _ => continue,
        };
        *slot = value;
    }

    if !seen_free {
        return Err(malformed("meminfo", "no MemFree line"));
    }
    Ok(memory)
}

/// Per-core `cpuN` lines of `/proc/stat` as `[user+nice, system+irq+softirq, iowait, idle]`
pub fn parse_stat_cpus(text: &str) -> Result<Vec<Counters>> {
    let mut cores = Vec::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let is_core = label
            .strip_prefix("cpu")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if !is_core {
            continue;
        }

        let mut ticks = [0u64; 7];
        for tick in ticks.iter_mut() {
            *tick = parse_field("stat", fields.next())?;
        }
        let [user, nice, system, idle, iowait, irq, softirq] = ticks;
        cores.push([user + nice, system + irq + softirq, iowait, idle]);
    }
    Ok(cores)
}

/// `/proc/diskstats` as `[reads, writes, kbytes_read, kbytes_written]`
pub fn parse_diskstats(text: &str) -> Result<Vec<NamedCounters>> {
    let mut disks = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if SKIPPED_DISK_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let reads: u64 = parse_field("diskstats", Some(fields[3]))?;
        let sectors_read: u64 = parse_field("diskstats", Some(fields[5]))?;
        let writes: u64 = parse_field("diskstats", Some(fields[7]))?;
        let sectors_written: u64 = parse_field("diskstats", Some(fields[9]))?;
        // 512-byte sectors
        disks.push(NamedCounters::new(
            name,
            [reads, writes, sectors_read / 2, sectors_written / 2],
        ));
    }
    Ok(disks)
}

/// `/proc/net/dev` as `[rx_packets, tx_packets, rx_kbytes, tx_kbytes]`
pub fn parse_net_dev(text: &str) -> Result<Vec<NamedCounters>> {
    let mut interfaces = Vec::new();
    for line in text.lines() {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 10 {
            return Err(malformed("net/dev", format!("short line for {}", name.trim())));
        }
        let rx_bytes: u64 = parse_field("net/dev", Some(fields[0]))?;
        let rx_packets: u64 = parse_field("net/dev", Some(fields[1]))?;
        let tx_bytes: u64 = parse_field("net/dev", Some(fields[8]))?;
        let tx_packets: u64 = parse_field("net/dev", Some(fields[9]))?;
        interfaces.push(NamedCounters::new(
            name.trim(),
            [rx_packets, tx_packets, rx_bytes / 1024, tx_bytes / 1024],
        ));
    }
    Ok(interfaces)
}

/// Longest prefix of `items` whose encoded IOLoad/NetworkLoad payload fits
pub fn fit_payload(items: Vec<NamedCounters>) -> Vec<NamedCounters> {
    let mut used = 1;
    let mut kept = 0;
    for item in &items {
        let size = named_item_size(&item.name);
        if item.name.len() > u8::MAX as usize || used + size > MAX_SUBPACKET_PAYLOAD {
            break;
        }
        used += size;
        kept += 1;
    }
    let mut items = items;
    items.truncate(kept);
    items
}
