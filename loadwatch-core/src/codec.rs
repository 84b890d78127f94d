//! Subpacket payload codec
//!
//! Fixed-size kinds (ProcLoad, MemoryLoad) only accept their exact wire size.
//! CPULoad must satisfy `len == 1 + count * 4`. IOLoad and NetworkLoad carry
//! per-item names, so they are read item by item and must consume the
//! declared payload exactly.

use crate::error::{Error, Result};
use crate::message::{
    CpuItem, CpuLoad, DiskItem, InterfaceItem, IoLoad, MemoryLoad, NetworkLoad, ProcLoad,
    SubpacketKind, MAX_SUBPACKET_PAYLOAD,
};

pub const PROC_LOAD_SIZE: usize = 36;
pub const MEMORY_LOAD_SIZE: usize = 32;
pub const CPU_ITEM_SIZE: usize = 4;

/// Cursor over a borrowed byte slice; every read is bounds-checked.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    pub(crate) fn read_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|b| b[0])
    }

    pub(crate) fn read_u16(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub(crate) fn read_u32(&mut self) -> Option<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.read_array().map(i32::from_be_bytes)
    }

    fn read_f32(&mut self) -> Option<f32> {
        self.read_array().map(f32::from_be_bytes)
    }
}

/// Payload encoding for one subpacket kind
pub(crate) trait Payload: Sized {
    const KIND: SubpacketKind;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()>;

    fn decode_payload(payload: &[u8]) -> Result<Self>;
}

/// Encode a payload and enforce the one-byte length limit
pub(crate) fn encode_checked<P: Payload>(load: &P) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    load.encode_payload(&mut payload)?;
    if payload.len() > MAX_SUBPACKET_PAYLOAD {
        return Err(Error::PayloadOverflow {
            kind: P::KIND,
            len: payload.len(),
        });
    }
    Ok(payload)
}

/// Append `[kind][len][payload]` to a message buffer
pub(crate) fn write_subpacket<P: Payload>(out: &mut Vec<u8>, load: &P) -> Result<()> {
    let payload = encode_checked(load)?;
    out.push(P::KIND.code());
    out.push(payload.len() as u8);
    out.extend_from_slice(&payload);
    Ok(())
}

fn truncated(kind: SubpacketKind) -> impl Fn() -> Error {
    move || Error::format(kind, "payload ends inside a field")
}

impl Payload for ProcLoad {
    const KIND: SubpacketKind = SubpacketKind::ProcLoad;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.uptime_total.to_be_bytes());
        out.extend_from_slice(&self.uptime_idle.to_be_bytes());
        for load in self.loadavg {
            out.extend_from_slice(&load.to_be_bytes());
        }
        out.extend_from_slice(&self.procs_all.to_be_bytes());
        out.extend_from_slice(&self.procs_running.to_be_bytes());
        out.extend_from_slice(&self.procs_iowait.to_be_bytes());
        out.extend_from_slice(&self.procs_zombie.to_be_bytes());
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != PROC_LOAD_SIZE {
            return Err(Error::format(
                Self::KIND,
                format!("size {} (expected {})", payload.len(), PROC_LOAD_SIZE),
            ));
        }
        let mut r = Reader::new(payload);
        let eof = truncated(Self::KIND);
        Ok(ProcLoad {
            uptime_total: r.read_f32().ok_or_else(&eof)?,
            uptime_idle: r.read_f32().ok_or_else(&eof)?,
            loadavg: [
                r.read_f32().ok_or_else(&eof)?,
                r.read_f32().ok_or_else(&eof)?,
                r.read_f32().ok_or_else(&eof)?,
            ],
            procs_all: r.read_i32().ok_or_else(&eof)?,
            procs_running: r.read_i32().ok_or_else(&eof)?,
            procs_iowait: r.read_i32().ok_or_else(&eof)?,
            procs_zombie: r.read_i32().ok_or_else(&eof)?,
        })
    }
}

impl Payload for CpuLoad {
    const KIND: SubpacketKind = SubpacketKind::CpuLoad;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(self.items.len() as u8);
        for item in &self.items {
            out.extend_from_slice(&[item.user, item.sys, item.iowait, item.idle]);
        }
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let Some((&count, rest)) = payload.split_first() else {
            return Err(Error::format(Self::KIND, "empty payload"));
        };
        let expected = 1 + usize::from(count) * CPU_ITEM_SIZE;
        if payload.len() != expected {
            return Err(Error::format(
                Self::KIND,
                format!("size {} for {} cores (expected {})", payload.len(), count, expected),
            ));
        }
        let items = rest
            .chunks_exact(CPU_ITEM_SIZE)
            .map(|c| CpuItem {
                user: c[0],
                sys: c[1],
                iowait: c[2],
                idle: c[3],
            })
            .collect();
        Ok(CpuLoad { items })
    }
}

impl Payload for MemoryLoad {
    const KIND: SubpacketKind = SubpacketKind::MemoryLoad;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        for value in [
            self.free,
            self.buffers,
            self.cached,
            self.dirty,
            self.active,
            self.swap_total,
            self.swap_free,
            self.swap_cached,
        ] {
            out.extend_from_slice(&value.to_be_bytes());
        }
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != MEMORY_LOAD_SIZE {
            return Err(Error::format(
                Self::KIND,
                format!("size {} (expected {})", payload.len(), MEMORY_LOAD_SIZE),
            ));
        }
        let mut r = Reader::new(payload);
        let eof = truncated(Self::KIND);
        Ok(MemoryLoad {
            free: r.read_u32().ok_or_else(&eof)?,
            buffers: r.read_u32().ok_or_else(&eof)?,
            cached: r.read_u32().ok_or_else(&eof)?,
            dirty: r.read_u32().ok_or_else(&eof)?,
            active: r.read_u32().ok_or_else(&eof)?,
            swap_total: r.read_u32().ok_or_else(&eof)?,
            swap_free: r.read_u32().ok_or_else(&eof)?,
            swap_cached: r.read_u32().ok_or_else(&eof)?,
        })
    }
}

/// Items of IOLoad/NetworkLoad: a short name and four rate fields
trait NamedItem: Sized {
    fn name(&self) -> &str;
    fn fields(&self) -> [u32; 4];
    fn from_parts(name: String, fields: [u32; 4]) -> Self;
}

impl NamedItem for DiskItem {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> [u32; 4] {
        [self.reads, self.writes, self.read_kbytes, self.written_kbytes]
    }

    fn from_parts(name: String, f: [u32; 4]) -> Self {
        DiskItem {
            name,
            reads: f[0],
            writes: f[1],
            read_kbytes: f[2],
            written_kbytes: f[3],
        }
    }
}

impl NamedItem for InterfaceItem {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> [u32; 4] {
        [self.rx_packets, self.tx_packets, self.rx_kbytes, self.tx_kbytes]
    }

    fn from_parts(name: String, f: [u32; 4]) -> Self {
        InterfaceItem {
            name,
            rx_packets: f[0],
            tx_packets: f[1],
            rx_kbytes: f[2],
            tx_kbytes: f[3],
        }
    }
}

fn encode_named<T: NamedItem>(kind: SubpacketKind, items: &[T], out: &mut Vec<u8>) -> Result<()> {
    out.push(items.len() as u8);
    for item in items {
        let name = item.name().as_bytes();
        if name.len() > u8::MAX as usize {
            return Err(Error::NameTooLong {
                kind,
                len: name.len(),
            });
        }
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        for value in item.fields() {
            out.extend_from_slice(&value.to_be_bytes());
        }
    }
    Ok(())
}

fn decode_named<T: NamedItem>(kind: SubpacketKind, payload: &[u8]) -> Result<Vec<T>> {
    let mut r = Reader::new(payload);
    let count = r
        .read_u8()
        .ok_or_else(|| Error::format(kind, "empty payload"))?;

    let mut items = Vec::with_capacity(usize::from(count));
    for index in 0..count {
        let short = || Error::format(kind, format!("item {} of {} truncated", index, count));
        let name_len = r.read_u8().ok_or_else(short)?;
        let name = r.take(usize::from(name_len)).ok_or_else(short)?;
        let name = String::from_utf8_lossy(name).into_owned();
        let mut fields = [0u32; 4];
        for field in fields.iter_mut() {
            *field = r.read_u32().ok_or_else(short)?;
        }
        items.push(T::from_parts(name, fields));
    }

    if r.remaining() != 0 {
        return Err(Error::format(
            kind,
            format!("{} trailing bytes after {} items", r.remaining(), count),
        ));
    }
    Ok(items)
}

impl Payload for IoLoad {
    const KIND: SubpacketKind = SubpacketKind::IoLoad;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        encode_named(Self::KIND, &self.items, out)
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        Ok(IoLoad {
            items: decode_named(Self::KIND, payload)?,
        })
    }
}

impl Payload for NetworkLoad {
    const KIND: SubpacketKind = SubpacketKind::NetworkLoad;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        encode_named(Self::KIND, &self.items, out)
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        Ok(NetworkLoad {
            items: decode_named(Self::KIND, payload)?,
        })
    }
}

/// Encoded size of one IOLoad/NetworkLoad item
pub fn named_item_size(name: &str) -> usize {
    1 + name.len() + 16
}
