//! Load message model and framing
//!
//! Wire layout of one message (all integers big-endian, no padding):
//! ```text
//! byte 0      version (= 1)
//! bytes 1-4   timestamp, seconds since 2000-01-01T00:00:00Z
//! bytes 5-6   interval, seconds
//! repeated    [kind:u8][len:u8][len bytes payload]
//! ```
//! Subpackets are written in canonical order (ProcLoad, CPULoad, MemoryLoad,
//! IOLoad, NetworkLoad) but accepted in any order and any subset.

use std::fmt;

use tracing::warn;

use crate::codec::{encode_checked, write_subpacket, Payload, Reader};
use crate::error::{Error, Result};

pub const MESSAGE_VERSION: u8 = 1;

/// version + timestamp + interval
pub const HEADER_LEN: usize = 7;

/// Largest payload a subpacket length byte can describe
pub const MAX_SUBPACKET_PAYLOAD: usize = 255;

/// Subpacket kind codes as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SubpacketKind {
    ProcLoad = 10,
    CpuLoad = 11,
    MemoryLoad = 12,
    IoLoad = 13,
    NetworkLoad = 14,
}

impl SubpacketKind {
    /// Canonical encoding order
    pub const ALL: [SubpacketKind; 5] = [
        SubpacketKind::ProcLoad,
        SubpacketKind::CpuLoad,
        SubpacketKind::MemoryLoad,
        SubpacketKind::IoLoad,
        SubpacketKind::NetworkLoad,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            10 => Ok(SubpacketKind::ProcLoad),
            11 => Ok(SubpacketKind::CpuLoad),
            12 => Ok(SubpacketKind::MemoryLoad),
            13 => Ok(SubpacketKind::IoLoad),
            14 => Ok(SubpacketKind::NetworkLoad),
            other => Err(Error::UnknownSubpacket(other)),
        }
    }
}

impl fmt::Display for SubpacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubpacketKind::ProcLoad => "ProcLoad",
            SubpacketKind::CpuLoad => "CPULoad",
            SubpacketKind::MemoryLoad => "MemoryLoad",
            SubpacketKind::IoLoad => "IOLoad",
            SubpacketKind::NetworkLoad => "NetworkLoad",
        };
        f.write_str(name)
    }
}

/// Uptime, load averages and process table summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcLoad {
    pub uptime_total: f32,
    pub uptime_idle: f32,
    pub loadavg: [f32; 3], // [1min, 5min, 15min]
    pub procs_all: i32,
    pub procs_running: i32,
    pub procs_iowait: i32,
    pub procs_zombie: i32,
}

/// Per-core utilisation, each rate scaled so 255 means 100%
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuItem {
    pub user: u8,
    pub sys: u8,
    pub iowait: u8,
    pub idle: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuLoad {
    pub items: Vec<CpuItem>,
}

/// Memory counters in kB
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLoad {
    pub free: u32,
    pub buffers: u32,
    pub cached: u32,
    pub dirty: u32,
    pub active: u32,
    pub swap_total: u32,
    pub swap_free: u32,
    pub swap_cached: u32,
}

/// Per-disk activity over one interval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskItem {
    pub name: String,
    pub reads: u32,
    pub writes: u32,
    pub read_kbytes: u32,
    pub written_kbytes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoLoad {
    pub items: Vec<DiskItem>,
}

/// Per-interface traffic over one interval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceItem {
    pub name: String,
    pub rx_packets: u32,
    pub tx_packets: u32,
    pub rx_kbytes: u32,
    pub tx_kbytes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkLoad {
    pub items: Vec<InterfaceItem>,
}

/// One self-describing record nested in a message
#[derive(Debug, Clone, PartialEq)]
pub enum Subpacket {
    Proc(ProcLoad),
    Cpu(CpuLoad),
    Memory(MemoryLoad),
    Io(IoLoad),
    Network(NetworkLoad),
}

impl Subpacket {
    pub fn kind(&self) -> SubpacketKind {
        match self {
            Subpacket::Proc(_) => SubpacketKind::ProcLoad,
            Subpacket::Cpu(_) => SubpacketKind::CpuLoad,
            Subpacket::Memory(_) => SubpacketKind::MemoryLoad,
            Subpacket::Io(_) => SubpacketKind::IoLoad,
            Subpacket::Network(_) => SubpacketKind::NetworkLoad,
        }
    }

    /// Encode the payload, rejecting anything the length byte cannot describe
    pub fn encode(&self) -> Result<(SubpacketKind, Vec<u8>)> {
        let payload = match self {
            Subpacket::Proc(load) => encode_checked(load)?,
            Subpacket::Cpu(load) => encode_checked(load)?,
            Subpacket::Memory(load) => encode_checked(load)?,
            Subpacket::Io(load) => encode_checked(load)?,
            Subpacket::Network(load) => encode_checked(load)?,
        };
        Ok((self.kind(), payload))
    }

    /// Decode a payload whose length is the declared subpacket length
    pub fn decode(kind: SubpacketKind, payload: &[u8]) -> Result<Self> {
        Ok(match kind {
            SubpacketKind::ProcLoad => Subpacket::Proc(ProcLoad::decode_payload(payload)?),
            SubpacketKind::CpuLoad => Subpacket::Cpu(CpuLoad::decode_payload(payload)?),
            SubpacketKind::MemoryLoad => Subpacket::Memory(MemoryLoad::decode_payload(payload)?),
            SubpacketKind::IoLoad => Subpacket::Io(IoLoad::decode_payload(payload)?),
            SubpacketKind::NetworkLoad => {
                Subpacket::Network(NetworkLoad::decode_payload(payload)?)
            }
        })
    }
}

/// A complete sampling report: header plus at most one subpacket per kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadMessage {
    pub timestamp: u32,
    pub interval: u16,
    pub proc_load: Option<ProcLoad>,
    pub cpu_load: Option<CpuLoad>,
    pub memory_load: Option<MemoryLoad>,
    pub io_load: Option<IoLoad>,
    pub network_load: Option<NetworkLoad>,
}

impl LoadMessage {
    pub fn new(timestamp: u32, interval: u16) -> Self {
        Self {
            timestamp,
            interval,
            ..Default::default()
        }
    }

    /// Store a subpacket in its slot. Returns true when an earlier value of
    /// the same kind was overwritten.
    pub fn insert(&mut self, subpacket: Subpacket) -> bool {
        match subpacket {
            Subpacket::Proc(load) => self.proc_load.replace(load).is_some(),
            Subpacket::Cpu(load) => self.cpu_load.replace(load).is_some(),
            Subpacket::Memory(load) => self.memory_load.replace(load).is_some(),
            Subpacket::Io(load) => self.io_load.replace(load).is_some(),
            Subpacket::Network(load) => self.network_load.replace(load).is_some(),
        }
    }

    /// Kinds present in this message, in canonical order
    pub fn kinds(&self) -> Vec<SubpacketKind> {
        let present = [
            self.proc_load.is_some(),
            self.cpu_load.is_some(),
            self.memory_load.is_some(),
            self.io_load.is_some(),
            self.network_load.is_some(),
        ];
        SubpacketKind::ALL
            .into_iter()
            .zip(present)
            .filter_map(|(kind, is_present)| is_present.then_some(kind))
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + 512);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Append the encoded message to `out`. On error `out` may hold a
    /// partial message and must be discarded.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(MESSAGE_VERSION);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.interval.to_be_bytes());

        if let Some(load) = &self.proc_load {
            write_subpacket(out, load)?;
        }
        if let Some(load) = &self.cpu_load {
            write_subpacket(out, load)?;
        }
        if let Some(load) = &self.memory_load {
            write_subpacket(out, load)?;
        }
        if let Some(load) = &self.io_load {
            write_subpacket(out, load)?;
        }
        if let Some(load) = &self.network_load {
            write_subpacket(out, load)?;
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let truncated = || Error::TruncatedHeader {
            needed: HEADER_LEN,
            available: buf.len(),
        };

        let mut reader = Reader::new(buf);
        let version = reader.read_u8().ok_or_else(truncated)?;
        if version != MESSAGE_VERSION {
            return Err(Error::VersionMismatch {
                expected: MESSAGE_VERSION,
                found: version,
            });
        }
        let timestamp = reader.read_u32().ok_or_else(truncated)?;
        let interval = reader.read_u16().ok_or_else(truncated)?;

        let mut message = LoadMessage::new(timestamp, interval);
        while let Some(code) = reader.read_u8() {
            let offset = reader.position() - 1;
            let len = reader.read_u8().ok_or_else(|| Error::PrematureSubpacket {
                offset,
                detail: "missing length byte".to_string(),
            })?;
            let available = reader.remaining();
            let payload = reader
                .take(usize::from(len))
                .ok_or_else(|| Error::PrematureSubpacket {
                    offset,
                    detail: format!("declared {} bytes, {} available", len, available),
                })?;

            let kind = SubpacketKind::from_code(code)?;
            if message.insert(Subpacket::decode(kind, payload)?) {
                warn!("{} repeated at offset {}, keeping the later one", kind, offset);
            }
        }

        Ok(message)
    }
}
