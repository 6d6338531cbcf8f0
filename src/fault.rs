//! C7: fault classification and fault-queue writer.

use log::{debug, warn};

use crate::error::Cause;
use crate::hostbridge::Status;
use crate::memory::MemoryAccess;
use crate::regs::RegisterFile;
use crate::types::Ttyp;

/// Maps a translation-path cause to the PCIe completion status an ATS
/// Translation Request receives. Non-ATS translated/untranslated requests
/// always receive `UNSUPPORTED_REQUEST` on failure.
///
/// `original_source/iommu_faults.c`'s `stop_and_report_fault` assigns CA for a
/// specific access-fault-class cause set, then *unconditionally* overwrites
/// the status to SUCCESS/R=W=0 whenever the request is an ATS Translation
/// Request — there is no `UNSUPPORTED_REQUEST` outcome reachable for ATS in
/// the original control flow, including for the gating causes (256-260) that
/// fire before a device context is even located. This model follows that
/// literal behavior rather than a broader reading of cause-to-status grouping.
pub fn ats_status_for_cause(cause: u16) -> Status {
    match cause {
        1 | 5 | 7 | 261 | 263 | 265 | 267 => Status::CompleterAbort,
        _ => Status::Success,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FaultRecord {
    pub did: u32,
    pub pid: u32,
    pub pv: bool,
    pub priv_: bool,
    pub ttyp: u8,
    pub cause: u16,
    pub iotval: u64,
    pub iotval2: u64,
}

impl FaultRecord {
    pub fn encode(&self) -> [u8; 32] {
        let mut w0 = 0u64;
        w0 |= (self.did as u64) & 0xff_ffff;
        w0 |= ((self.pid as u64) & 0xfffff) << 24;
        w0 |= (self.pv as u64) << 44;
        w0 |= (self.priv_ as u64) << 45;
        w0 |= ((self.ttyp as u64) & 0x3f) << 46;
        w0 |= ((self.cause as u64) & 0xfff) << 52;
        let w1 = 0u64; // custom (64 bits) + reserved: both zero
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&w0.to_le_bytes());
        out[8..16].copy_from_slice(&w1.to_le_bytes());
        out[16..24].copy_from_slice(&self.iotval.to_le_bytes());
        out[24..32].copy_from_slice(&self.iotval2.to_le_bytes());
        out
    }
}

/// Whether DTF suppresses this cause from generating a fault record.
pub fn dtf_suppresses(dtf: bool, cause: u16) -> bool {
    dtf && !Cause::dtf_exempt(cause)
}

/// Enqueues a fault record unless FQ is off/in-error; returns true if a CQ-style
/// interrupt condition (`fqmf`/`fqof`) should be raised alongside the normal `fip`.
pub fn enqueue(mem: &mut dyn MemoryAccess, regs: &mut RegisterFile, record: FaultRecord) -> FaultOutcome {
    if !regs.fqcsr.on() {
        return FaultOutcome::Dropped;
    }
    if regs.fqcsr.fqmf() || regs.fqcsr.fqof() {
        return FaultOutcome::Dropped;
    }
    let size = ring_size(regs.fqb.log2szm1());
    let next_fqt = (regs.fqt + 1) % size;
    if next_fqt == regs.fqh {
        regs.fqcsr.set_fqof(true);
        warn!("fault queue overflow, dropping cause {}", record.cause);
        return FaultOutcome::Overflow;
    }
    let addr = regs.fqb.ppn() * 4096 + regs.fqt as u64 * 32;
    let bytes = record.encode();
    match mem.write(addr, &bytes) {
        crate::memory::MemStatus::Ok => {
            regs.fqt = next_fqt;
            debug!("fault record enqueued, cause {} at fqt slot", record.cause);
            FaultOutcome::Enqueued
        }
        _ => {
            regs.fqcsr.set_fqmf(true);
            FaultOutcome::MemoryFault
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Enqueued,
    Dropped,
    Overflow,
    MemoryFault,
}

fn ring_size(log2szm1: u8) -> u32 {
    1u32 << (log2szm1 as u32 + 1)
}

pub fn ttyp_code(t: Ttyp) -> u8 {
    t as u8
}
