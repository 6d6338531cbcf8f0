//! C6: command queue engine — fetch, decode, dispatch IOTINVAL/IODIR/IOFENCE/ATS,
//! and the deferred-completion state machines for IOFENCE.C and ITAG exhaustion.

use bit_field::BitField;
use log::{debug, warn};

use crate::cache::{Caches, Itag, ItagTracker};
use crate::hostbridge::{HbMessage, HostBridge};
use crate::interrupt::{self, InterruptSource};
use crate::memory::{MemStatus, MemoryAccess};
use crate::regs::RegisterFile;

const OP_IOTINVAL: u64 = 1;
const OP_IODIR: u64 = 2;
const OP_IOFENCE: u64 = 3;
const OP_ATS: u64 = 4;

const FUNC3_VMA: u64 = 0;
const FUNC3_GVMA: u64 = 1;
const FUNC3_MSI: u64 = 2;
const FUNC3_INVAL_DDT: u64 = 0;
const FUNC3_INVAL_PDT: u64 = 1;
const FUNC3_IOFENCE_C: u64 = 0;
const FUNC3_ATS_INVAL: u64 = 0;
const FUNC3_ATS_PRGR: u64 = 1;

#[derive(Debug, Clone, Copy)]
struct PendingIofence {
    pr: bool,
    pw: bool,
    av: bool,
    wis: bool,
    addr: u64,
    data: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingAtsInval {
    dsv: bool,
    dseg: u8,
    rid: u16,
    pv: bool,
    pid: u32,
    payload: u64,
}

/// Deferred-completion state the command queue carries across ticks: an
/// IOFENCE.C waiting on in-flight ATS invalidations, and at most one ATS.INVAL
/// stalled on ITAG exhaustion.
#[derive(Debug, Default)]
pub struct CommandEngine {
    pending_iofence: Option<PendingIofence>,
    stalled_inval: Option<PendingAtsInval>,
}

impl CommandEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn gated(&self, regs: &RegisterFile, itags: &ItagTracker) -> bool {
        !regs.cqcsr.on()
            || regs.cqcsr.cqmf()
            || regs.cqcsr.cmd_ill()
            || regs.cqcsr.cmd_to()
            || self.stalled_inval.is_some()
            || (self.pending_iofence.is_some() && itags.in_flight())
    }

    /// One command-queue step: resolves a pending IOFENCE or stalled ATS.INVAL
    /// first, then fetches and executes at most one new command from the ring.
    pub fn step(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        regs: &mut RegisterFile,
        caches: &mut Caches,
        itags: &mut ItagTracker,
    ) {
        if let Some(stalled) = self.stalled_inval {
            if let Some(itag) = itags.allocate(Itag { dsv: stalled.dsv, dseg: stalled.dseg, rid: stalled.rid, countdown: 64 }) {
                hb.send(HbMessage::AtsInval {
                    dsv: stalled.dsv,
                    dseg: stalled.dseg,
                    rid: stalled.rid,
                    pv: stalled.pv,
                    pid: stalled.pid,
                    payload: stalled.payload,
                    itag,
                });
                self.stalled_inval = None;
            } else {
                return;
            }
        }

        if let Some(pending) = self.pending_iofence {
            if itags.in_flight() {
                return;
            }
            complete_iofence(mem, hb, regs, itags, pending);
            self.pending_iofence = None;
            // This IOFENCE.C was already fetched (and left un-advanced) the tick it
            // stalled; now that it has actually completed, retire it and stop here
            // instead of falling through to re-fetch the same ring slot.
            regs.cqh = (regs.cqh + 1) % ring_size(regs.cqb.log2szm1());
            return;
        }

        if self.gated(regs, itags) {
            return;
        }
        if regs.cqh == regs.cqt {
            return;
        }

        let addr = regs.cqb.ppn() * 4096 + regs.cqh as u64 * 16;
        let mut raw = [0u8; 16];
        match mem.read(addr, 16, &mut raw) {
            MemStatus::Ok => {}
            _ => {
                regs.cqcsr.set_cqmf(true);
                interrupt::generate(mem, hb, regs, InterruptSource::CommandQueue);
                return;
            }
        }
        let low = u64::from_le_bytes(raw[0..8].try_into().unwrap());
        let high = u64::from_le_bytes(raw[8..16].try_into().unwrap());

        match self.execute(mem, hb, regs, caches, itags, low, high) {
            Outcome::Advance => {
                regs.cqh = (regs.cqh + 1) % ring_size(regs.cqb.log2szm1());
            }
            Outcome::Illegal => {
                regs.cqcsr.set_cmd_ill(true);
                interrupt::generate(mem, hb, regs, InterruptSource::CommandQueue);
            }
            Outcome::Stalled => {}
        }
    }

    fn execute(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        regs: &mut RegisterFile,
        caches: &mut Caches,
        itags: &mut ItagTracker,
        low: u64,
        high: u64,
    ) -> Outcome {
        let opcode = low.get_bits(0..=6);
        let func3 = low.get_bits(7..=9);
        match opcode {
            OP_IOTINVAL => decode_iotinval(caches, low, high, func3),
            OP_IODIR => decode_iodir(caches, low, high, func3),
            OP_IOFENCE => self.decode_iofence(mem, hb, regs, itags, low, high, func3),
            OP_ATS => self.decode_ats(hb, itags, low, high, func3),
            _ => Outcome::Illegal,
        }
    }

    fn decode_iofence(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        regs: &mut RegisterFile,
        itags: &mut ItagTracker,
        low: u64,
        high: u64,
        func3: u64,
    ) -> Outcome {
        if func3 != FUNC3_IOFENCE_C {
            return Outcome::Illegal;
        }
        let pr = low.get_bit(10);
        let pw = low.get_bit(11);
        let av = low.get_bit(12);
        let wis = low.get_bit(13);
        let reserved_low = low.get_bits(14..=31);
        let data = low.get_bits(32..=63) as u32;
        let reserved_high = high.get_bits(0..=1);
        if reserved_low != 0 || reserved_high != 0 {
            return Outcome::Illegal;
        }
        let addr = high;
        let pending = PendingIofence { pr, pw, av, wis, addr, data };
        if itags.in_flight() {
            self.pending_iofence = Some(pending);
            return Outcome::Stalled;
        }
        complete_iofence(mem, hb, regs, itags, pending);
        Outcome::Advance
    }

    fn decode_ats(
        &mut self,
        hb: &mut dyn HostBridge,
        itags: &mut ItagTracker,
        low: u64,
        high: u64,
        func3: u64,
    ) -> Outcome {
        let dsv = low.get_bit(10);
        let pv = low.get_bit(11);
        let reserved = low.get_bits(12..=15);
        let pid = low.get_bits(16..=35) as u32;
        let reserved2 = low.get_bits(36..=39);
        let dseg = low.get_bits(40..=47) as u8;
        let rid = low.get_bits(48..=63) as u16;
        let payload = high;
        if reserved != 0 || reserved2 != 0 {
            return Outcome::Illegal;
        }
        match func3 {
            FUNC3_ATS_INVAL => {
                let pending = PendingAtsInval { dsv, dseg, rid, pv, pid, payload };
                match itags.allocate(Itag { dsv, dseg, rid, countdown: 64 }) {
                    Some(itag) => {
                        hb.send(HbMessage::AtsInval { dsv, dseg, rid, pv, pid, payload, itag });
                        Outcome::Advance
                    }
                    None => {
                        self.stalled_inval = Some(pending);
                        Outcome::Stalled
                    }
                }
            }
            FUNC3_ATS_PRGR => {
                hb.send(HbMessage::AtsPrgr { dsv, dseg, rid, payload });
                Outcome::Advance
            }
            _ => Outcome::Illegal,
        }
    }
}

enum Outcome {
    Advance,
    Illegal,
    Stalled,
}

fn decode_iotinval(caches: &mut Caches, low: u64, high: u64, func3: u64) -> Outcome {
    let pscv = low.get_bit(10);
    let av = low.get_bit(11);
    let gv = low.get_bit(12);
    let reserved = low.get_bits(13..=15);
    let pscid = low.get_bits(16..=35) as u32;
    let reserved2 = low.get_bits(36..=39);
    let gscid = low.get_bits(40..=55) as u16;
    let reserved3 = low.get_bits(56..=63);
    if reserved != 0 || reserved2 != 0 || reserved3 != 0 {
        return Outcome::Illegal;
    }
    let addr = high.get_bits(0..=52);
    match func3 {
        FUNC3_VMA => {
            caches.inval_vma(gv, av, pscv, gscid, pscid, addr);
            Outcome::Advance
        }
        FUNC3_GVMA => {
            if pscv {
                return Outcome::Illegal;
            }
            caches.inval_gvma(gscid, av, addr);
            Outcome::Advance
        }
        FUNC3_MSI => {
            if pscv {
                return Outcome::Illegal;
            }
            // MSI PTEs are never cached in this model, so IOTINVAL.MSI always
            // retires immediately with nothing to flush.
            let _ = (gv, av, addr);
            Outcome::Advance
        }
        _ => Outcome::Illegal,
    }
}

fn decode_iodir(caches: &mut Caches, low: u64, high: u64, func3: u64) -> Outcome {
    let dv = low.get_bit(10);
    let reserved = low.get_bits(11..=15);
    let pid = low.get_bits(16..=35) as u32;
    let reserved2 = low.get_bits(36..=39);
    let did = low.get_bits(40..=55) as u32;
    let reserved3 = low.get_bits(56..=63);
    if reserved != 0 || reserved2 != 0 || reserved3 != 0 || high != 0 {
        return Outcome::Illegal;
    }
    match func3 {
        FUNC3_INVAL_DDT => {
            if pid != 0 {
                return Outcome::Illegal;
            }
            caches.inval_ddt(dv, did);
            Outcome::Advance
        }
        FUNC3_INVAL_PDT => {
            if !dv {
                return Outcome::Illegal;
            }
            caches.inval_pdt(did, pid);
            Outcome::Advance
        }
        _ => Outcome::Illegal,
    }
}

fn complete_iofence(
    mem: &mut dyn MemoryAccess,
    hb: &mut dyn HostBridge,
    regs: &mut RegisterFile,
    itags: &mut ItagTracker,
    pending: PendingIofence,
) {
    if itags.take_timeout() {
        regs.cqcsr.set_cmd_to(true);
        interrupt::generate(mem, hb, regs, InterruptSource::CommandQueue);
    }
    if pending.pr || pending.pw {
        hb.send(HbMessage::GlobalObservabilitySync { pr: pending.pr, pw: pending.pw });
    }
    if pending.wis {
        if regs.fctrl.wis() {
            regs.cqcsr.set_fence_w_ip(true);
            interrupt::generate(mem, hb, regs, InterruptSource::CommandQueue);
        } else {
            warn!("IOFENCE.C WIS set but iommu is not in wired mode, ignoring");
        }
    }
    if pending.av {
        let addr = pending.addr & !0x3;
        match mem.write(addr, &pending.data.to_le_bytes()) {
            MemStatus::Ok => debug!("IOFENCE.C data write committed at {addr:#x}"),
            _ => regs.cqcsr.set_cqmf(true),
        }
    }
}

fn ring_size(log2szm1: u8) -> u32 {
    1u32 << (log2szm1 as u32 + 1)
}
