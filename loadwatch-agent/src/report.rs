//! Human-readable rendering of load messages and log replay

use anyhow::{Context, Result};
use chrono::Local;
use loadwatch_core::{timestamp, LoadMessage, LogFile, OpenMode};
use std::fmt::{self, Write as _};
use std::path::Path;
use tracing::{info, warn};

const HEXDUMP_WIDTH: usize = 16;

/// Display adapter for a decoded message
pub struct Report<'a>(pub &'a LoadMessage);

fn percent(byte: u8) -> u32 {
    u32::from(byte) * 100 / 255
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.0;
        let local = timestamp::from_timestamp(message.timestamp).with_timezone(&Local);
        writeln!(
            f,
            "time {} ({}), interval {}s",
            local.format("%Y-%m-%d %H:%M:%S"),
            message.timestamp,
            message.interval
        )?;

        if let Some(proc_load) = &message.proc_load {
            writeln!(
                f,
                "  proc: uptime {:.2}s idle {:.2}s, load {:.2} {:.2} {:.2}",
                proc_load.uptime_total,
                proc_load.uptime_idle,
                proc_load.loadavg[0],
                proc_load.loadavg[1],
                proc_load.loadavg[2]
            )?;
            writeln!(
                f,
                "        procs {} running {} iowait {} zombie {}",
                proc_load.procs_all,
                proc_load.procs_running,
                proc_load.procs_iowait,
                proc_load.procs_zombie
            )?;
        }

        if let Some(cpu_load) = &message.cpu_load {
            for (n, cpu) in cpu_load.items.iter().enumerate() {
                writeln!(
                    f,
                    "  cpu{}: user {}% sys {}% iowait {}% idle {}%",
                    n,
                    percent(cpu.user),
                    percent(cpu.sys),
                    percent(cpu.iowait),
                    percent(cpu.idle)
                )?;
            }
        }

        if let Some(memory) = &message.memory_load {
            writeln!(
                f,
                "  mem: free {} buffers {} cached {} dirty {} active {} kB",
                memory.free, memory.buffers, memory.cached, memory.dirty, memory.active
            )?;
            writeln!(
                f,
                "       swap total {} free {} cached {} kB",
                memory.swap_total, memory.swap_free, memory.swap_cached
            )?;
        }

        if let Some(io_load) = &message.io_load {
            for disk in &io_load.items {
                writeln!(
                    f,
                    "  disk {}: {} reads {} writes, {} kB read {} kB written",
                    disk.name, disk.reads, disk.writes, disk.read_kbytes, disk.written_kbytes
                )?;
            }
        }

        if let Some(network_load) = &message.network_load {
            for iface in &network_load.items {
                writeln!(
                    f,
                    "  net {}: rx {} pkts {} kB, tx {} pkts {} kB",
                    iface.name, iface.rx_packets, iface.rx_kbytes, iface.tx_packets, iface.tx_kbytes
                )?;
            }
        }
        Ok(())
    }
}

/// Offset, hex and printable columns, 16 bytes per row
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(HEXDUMP_WIDTH).enumerate() {
        let _ = write!(out, "{:04x}  ", row * HEXDUMP_WIDTH);
        for col in 0..HEXDUMP_WIDTH {
            match chunk.get(col) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                char::from(b)
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}

/// Print a message at the detail level chosen by `verbose`:
/// 0 nothing, 1 summary, 2 adds a hexdump of the wire bytes.
pub fn print_message(title: &str, message: &LoadMessage, bytes: &[u8], verbose: u8) {
    if verbose == 0 {
        return;
    }
    println!("{} ({} bytes)", title, bytes.len());
    print!("{}", Report(message));
    if verbose >= 2 {
        print!("{}", hexdump(bytes));
    }
}

/// Local wall-clock rendering of a log record stamp
pub fn logged_at(ts: u32) -> String {
    timestamp::from_timestamp(ts)
        .with_timezone(&Local)
        .format("%Y%m%d-%H%M%S")
        .to_string()
}

/// Print every record of a log; stops at the first record that fails to
/// decode. Returns the number of messages printed.
pub fn replay_log(path: &Path, verbose: u8) -> Result<usize> {
    let mut log = LogFile::open(path, OpenMode::Read)
        .with_context(|| format!("Failed to open log {}", path.display()))?;

    let mut count = 0;
    while let Some(record) = log
        .read_message()
        .with_context(|| format!("Failed to read log {}", path.display()))?
    {
        let message = match LoadMessage::decode(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Error decoding record {} of {}: {}", count + 1, path.display(), e);
                break;
            }
        };
        count += 1;
        print_message(
            &format!("Record {} (logged at {})", count, logged_at(record.timestamp)),
            &message,
            &record.payload,
            verbose.max(1),
        );
    }

    info!("Replayed {} messages from {}", count, path.display());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadwatch_core::{CpuItem, CpuLoad, DiskItem, IoLoad, ProcLoad};

    fn sample_message() -> LoadMessage {
        LoadMessage {
            proc_load: Some(ProcLoad {
                procs_all: 310,
                procs_running: 2,
                ..Default::default()
            }),
            cpu_load: Some(CpuLoad {
                items: vec![CpuItem {
                    user: 255,
                    sys: 0,
                    iowait: 0,
                    idle: 128,
                }],
            }),
            io_load: Some(IoLoad {
                items: vec![DiskItem {
                    name: "nvme0n1".to_string(),
                    reads: 12,
                    ..Default::default()
                }],
            }),
            ..LoadMessage::new(0, 10)
        }
    }

    #[test]
    fn test_report_contents() {
        let text = Report(&sample_message()).to_string();
        assert!(text.contains("interval 10s"));
        assert!(text.contains("procs 310 running 2"));
        assert!(text.contains("cpu0: user 100% sys 0% iowait 0% idle 50%"));
        assert!(text.contains("disk nvme0n1: 12 reads"));
        assert!(!text.contains("mem:"));
        assert!(!text.contains("net "));
    }

    #[test]
    fn test_logged_at_is_local_date() {
        // 2024-05-01T12:00:00Z
        let ts = 767_880_000;
        let text = logged_at(ts);
        assert_eq!(text.len(), "20240501-120000".len());
        assert_eq!(text.as_bytes()[8], b'-');
        assert!(text.starts_with("2024050"));

        let parsed = chrono::NaiveDateTime::parse_from_str(&text, "%Y%m%d-%H%M%S").unwrap();
        let expected = timestamp::from_timestamp(ts).with_timezone(&Local).naive_local();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_hexdump_rows() {
        let bytes: Vec<u8> = (0u8..20).chain(*b"AB").collect();
        let dump = hexdump(&bytes);
        let rows: Vec<&str> = dump.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("0000  00 01 02"));
        assert!(rows[1].starts_with("0010  10 11 12 13 41 42"));
        assert!(rows[1].ends_with("....AB"));
        assert_eq!(hexdump(&[]), "");
    }

    #[test]
    fn test_replay_stops_at_bad_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer.log");
        let good = sample_message().encode().unwrap();

        let mut log = LogFile::open(&path, OpenMode::Append).unwrap();
        log.write_message(&good).unwrap();
        log.write_message(&good).unwrap();
        log.write_message(&[9, 9, 9]).unwrap();
        log.write_message(&good).unwrap();
        log.close();

        assert_eq!(replay_log(&path, 0).unwrap(), 2);
    }

    #[test]
    fn test_replay_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(replay_log(&dir.path().join("absent.log"), 1).is_err());
    }
}
