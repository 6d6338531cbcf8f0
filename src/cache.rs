//! Observability-only caches (DDT, PDT, IOATC) and the ITAG tracker for in-flight
//! ATS invalidations. The design notes permit omitting the caches entirely provided
//! invalidation commands remain correct no-ops; this model keeps tiny bounded ones
//! so that property 5 (no stale cached entry survives a matching invalidation) is
//! directly observable in tests rather than vacuously true.

use heapless::Vec as HVec;

const CACHE_CAPACITY: usize = 64;
pub const ITAG_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdtCacheTag {
    pub device_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdtCacheTag {
    pub device_id: u32,
    pub process_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoatcTag {
    pub gv: bool,
    pub gscid: u16,
    pub pscv: bool,
    pub pscid: u32,
    pub av: bool,
    pub addr: u64,
    pub g: bool,
}

#[derive(Debug, Default)]
pub struct Caches {
    ddt: HVec<DdtCacheTag, CACHE_CAPACITY>,
    pdt: HVec<PdtCacheTag, CACHE_CAPACITY>,
    ioatc: HVec<IoatcTag, CACHE_CAPACITY>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ddt(&mut self, tag: DdtCacheTag) {
        if self.ddt.iter().any(|t| *t == tag) {
            return;
        }
        if self.ddt.push(tag).is_err() {
            self.ddt.remove(0);
            let _ = self.ddt.push(tag);
        }
    }

    pub fn insert_pdt(&mut self, tag: PdtCacheTag) {
        if self.pdt.iter().any(|t| *t == tag) {
            return;
        }
        if self.pdt.push(tag).is_err() {
            self.pdt.remove(0);
            let _ = self.pdt.push(tag);
        }
    }

    pub fn insert_ioatc(&mut self, tag: IoatcTag) {
        if self.ioatc.iter().any(|t| *t == tag) {
            return;
        }
        if self.ioatc.push(tag).is_err() {
            self.ioatc.remove(0);
            let _ = self.ioatc.push(tag);
        }
    }

    pub fn ddt_cached(&self, device_id: u32) -> bool {
        self.ddt.iter().any(|t| t.device_id == device_id)
    }

    pub fn pdt_cached(&self, device_id: u32, process_id: u32) -> bool {
        self.pdt.iter().any(|t| t.device_id == device_id && t.process_id == process_id)
    }

    pub fn ioatc_cached(&self, tag: &IoatcTag) -> bool {
        self.ioatc.iter().any(|t| t == tag)
    }

    pub fn inval_ddt(&mut self, dv: bool, did: u32) {
        if !dv {
            self.ddt.clear();
            self.pdt.clear();
        } else {
            self.ddt.retain(|t| t.device_id != did);
            self.pdt.retain(|t| t.device_id != did);
        }
    }

    pub fn inval_pdt(&mut self, did: u32, pid: u32) {
        self.pdt.retain(|t| !(t.device_id == did && t.process_id == pid));
    }

    /// IOTINVAL.VMA truth table: an entry is invalidated iff its (GV, GSCID) match,
    /// its (PSCV, PSCID) match, any address constraint matches, and the entry is
    /// not a global-only entry the command must spare.
    pub fn inval_vma(&mut self, gv: bool, av: bool, pscv: bool, gscid: u16, pscid: u32, addr: u64) {
        self.ioatc.retain(|t| {
            let gscid_match = t.gv == gv && t.gscid == gscid;
            let pscid_match = t.pscv == pscv && t.pscid == pscid;
            let addr_match = !av || (t.av && t.addr == addr);
            let global_match = (pscv && av) || !t.g;
            !(gscid_match && pscid_match && addr_match && global_match)
        });
    }

    pub fn inval_gvma(&mut self, gscid: u16, av: bool, addr: u64) {
        self.ioatc.retain(|t| {
            let gscid_match = t.gscid == gscid;
            let addr_match = !av || (t.av && t.addr == addr);
            !(gscid_match && addr_match)
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Itag {
    pub dsv: bool,
    pub dseg: u8,
    pub rid: u16,
    pub countdown: u32,
}

#[derive(Debug, Default)]
pub struct ItagTracker {
    slots: HVec<Option<Itag>, ITAG_CAPACITY>,
    pub timed_out: bool,
}

impl ItagTracker {
    pub fn new() -> Self {
        let mut slots = HVec::new();
        for _ in 0..ITAG_CAPACITY {
            let _ = slots.push(None);
        }
        Self { slots, timed_out: false }
    }

    pub fn allocate(&mut self, itag: Itag) -> Option<usize> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(itag);
                return Some(i);
            }
        }
        None
    }

    pub fn free(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    pub fn in_flight(&self) -> bool {
        self.slots.iter().any(|s| s.is_some())
    }

    pub fn tick(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(tag) = slot {
                if tag.countdown == 0 {
                    self.timed_out = true;
                    *slot = None;
                } else {
                    tag.countdown -= 1;
                }
            }
        }
    }

    pub fn take_timeout(&mut self) -> bool {
        core::mem::replace(&mut self.timed_out, false)
    }
}
