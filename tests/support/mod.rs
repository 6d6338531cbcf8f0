//! Shared fakes for the integration tests: a sparse byte-addressable memory
//! and a host-bridge stub that just records what it was sent.

use std::collections::{HashMap, HashSet};

use riscv_iommu_model::hostbridge::{HbMessage, HostBridge};
use riscv_iommu_model::memory::{MemStatus, MemoryAccess};

/// Installs the `log`/`env_logger` bridge so `RUST_LOG=trace` surfaces the
/// model's `trace!`/`debug!`/`warn!` output while a scenario runs. Safe to
/// call from every test — the second and later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct FakeMemory {
    bytes: HashMap<u64, u8>,
    access_fault_addrs: HashSet<u64>,
    corruption_addrs: HashSet<u64>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
    }

    pub fn read_u64(&self, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = *self.bytes.get(&(addr + i as u64)).unwrap_or(&0);
        }
        u64::from_le_bytes(buf)
    }

    /// Marks a single address as raising `AccessFault` on any read/write that
    /// touches it (the fake checks only the access's start address).
    pub fn mark_access_fault(&mut self, addr: u64) {
        self.access_fault_addrs.insert(addr);
    }

    pub fn mark_corruption(&mut self, addr: u64) {
        self.corruption_addrs.insert(addr);
    }
}

impl MemoryAccess for FakeMemory {
    fn read(&mut self, addr: u64, len: usize, out: &mut [u8]) -> MemStatus {
        if self.access_fault_addrs.contains(&addr) {
            return MemStatus::AccessFault;
        }
        if self.corruption_addrs.contains(&addr) {
            return MemStatus::DataCorruption;
        }
        for i in 0..len {
            out[i] = *self.bytes.get(&(addr + i as u64)).unwrap_or(&0);
        }
        MemStatus::Ok
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> MemStatus {
        if self.access_fault_addrs.contains(&addr) {
            return MemStatus::AccessFault;
        }
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
        MemStatus::Ok
    }
}

#[derive(Default)]
pub struct FakeHostBridge {
    pub messages: Vec<HbMessage>,
}

impl FakeHostBridge {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostBridge for FakeHostBridge {
    fn send(&mut self, msg: HbMessage) {
        self.messages.push(msg);
    }
}

/// Encodes a `tc` (TransCtrl) word with the bit layout `src/context.rs` decodes.
#[allow(clippy::too_many_arguments)]
pub fn encode_tc(
    en_ats: bool,
    en_pri: bool,
    t2gpa: bool,
    dtf: bool,
    pdtv: bool,
    prpr: bool,
    gade: bool,
    sade: bool,
) -> u64 {
    let mut v = 1u64; // V
    v |= (en_ats as u64) << 1;
    v |= (en_pri as u64) << 2;
    v |= (t2gpa as u64) << 3;
    v |= (dtf as u64) << 4;
    v |= (pdtv as u64) << 5;
    v |= (prpr as u64) << 6;
    v |= (gade as u64) << 7;
    v |= (sade as u64) << 8;
    v
}

/// Encodes an `iohgatp` word: mode[63:60], gscid[59:44], ppn[43:0].
pub fn encode_iohgatp(mode: u8, gscid: u16, ppn: u64) -> u64 {
    ((mode as u64) << 60) | ((gscid as u64) << 44) | (ppn & ((1u64 << 44) - 1))
}

/// Encodes a `ta` word: pscid[31:12].
pub fn encode_ta(pscid: u32) -> u64 {
    (pscid as u64 & 0xf_ffff) << 12
}

/// Encodes an `fsc`/`iosatp` word: mode[63:60], ppn[43:0].
pub fn encode_fsc(mode: u8, ppn: u64) -> u64 {
    ((mode as u64) << 60) | (ppn & ((1u64 << 44) - 1))
}

/// Writes a 32-byte (base) device context at `addr`: words tc, iohgatp, ta, fsc.
pub fn write_dc_base(mem: &mut FakeMemory, addr: u64, tc: u64, iohgatp: u64, ta: u64, fsc: u64) {
    mem.write_u64(addr, tc);
    mem.write_u64(addr + 8, iohgatp);
    mem.write_u64(addr + 16, ta);
    mem.write_u64(addr + 24, fsc);
}

/// Writes a DDTE (non-leaf DDT/PDT entry): V=1, ppn in bits [53:10].
pub fn write_ddte(mem: &mut FakeMemory, addr: u64, ppn: u64) {
    mem.write_u64(addr, 1 | (ppn << 10));
}

/// Encodes a leaf PTE: V|R|W|X|U|G|A|D flags plus PPN in bits [53:10].
#[allow(clippy::too_many_arguments)]
pub fn encode_pte(r: bool, w: bool, x: bool, u: bool, g: bool, a: bool, d: bool, ppn: u64) -> u64 {
    let mut v = 1u64; // V
    v |= (r as u64) << 1;
    v |= (w as u64) << 2;
    v |= (x as u64) << 3;
    v |= (u as u64) << 4;
    v |= (g as u64) << 5;
    v |= (a as u64) << 6;
    v |= (d as u64) << 7;
    v |= ppn << 10;
    v
}

/// Writes a 16-byte process-context leaf: words ta, fsc.
pub fn write_pc(mem: &mut FakeMemory, addr: u64, ta: u64, fsc: u64) {
    mem.write_u64(addr, ta);
    mem.write_u64(addr + 8, fsc);
}
