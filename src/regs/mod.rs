//! C1: the 4 KiB memory-mapped register window.
//!
//! The window is modelled as a struct of typed registers rather than a raw byte
//! buffer — there is no physical memory behind it in this model, so the offset
//! table exists purely to validate accesses and to route a `(offset, size)` pair
//! to the right field, exactly the contract described for the real window.

pub mod fields;

use fields::*;
use log::{debug, trace, warn};

use crate::capabilities::Capabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegSize {
    Invalid,
    Four,
    Eight,
}

pub const NUM_HPM_MAX: u8 = 31;
pub const NUM_VEC_MAX: u8 = 16;
pub const MSI_CFG_ENTRIES: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct MsiCfgEntry {
    pub addr: u64,
    pub data: u32,
    pub vec_ctrl: MsiVecCtrl,
}

#[derive(Debug, Clone)]
pub struct RegisterFile {
    pub capabilities: Capabilities,
    pub fctrl: Fctrl,
    pub ddtp: Ddtp,
    pub cqb: QueueBase,
    pub cqh: u32,
    pub cqt: u32,
    pub fqb: QueueBase,
    pub fqh: u32,
    pub fqt: u32,
    pub pqb: QueueBase,
    pub pqh: u32,
    pub pqt: u32,
    pub cqcsr: CqCsr,
    pub fqcsr: FqCsr,
    pub pqcsr: PqCsr,
    pub ipsr: Ipsr,
    pub iocntinh: u32,
    pub iohpmcycles: IoHpmCycles,
    pub iohpmctr: [u64; NUM_HPM_MAX as usize],
    pub iohpmevt: [IoHpmEvt; NUM_HPM_MAX as usize],
    pub icvec: Icvec,
    pub msi_cfg: [MsiCfgEntry; MSI_CFG_ENTRIES],

    pub num_vec_bits: u8,
    pub num_hpm: u8,
    pub hpmctr_bits: u8,
    pub event_id_mask: u16,
}

impl RegisterFile {
    /// Constructs the post-reset register file: every writable register zero
    /// except `capabilities`, `fctrl`, and `ddtp.iommu_mode` (installed by the
    /// caller immediately afterward), per invariant 2 in the testable-properties
    /// list.
    pub fn new(
        capabilities: Capabilities,
        fctrl: Fctrl,
        num_hpm: u8,
        hpmctr_bits: u8,
        event_id_mask: u16,
        num_vec_bits: u8,
    ) -> Self {
        Self {
            capabilities,
            fctrl,
            ddtp: Ddtp::default(),
            cqb: QueueBase::default(),
            cqh: 0,
            cqt: 0,
            fqb: QueueBase::default(),
            fqh: 0,
            fqt: 0,
            pqb: QueueBase::default(),
            pqh: 0,
            pqt: 0,
            cqcsr: CqCsr::default(),
            fqcsr: FqCsr::default(),
            pqcsr: PqCsr::default(),
            ipsr: Ipsr::default(),
            iocntinh: 0,
            iohpmcycles: IoHpmCycles::default(),
            iohpmctr: [0u64; NUM_HPM_MAX as usize],
            iohpmevt: [IoHpmEvt::default(); NUM_HPM_MAX as usize],
            icvec: Icvec::default(),
            msi_cfg: [MsiCfgEntry::default(); MSI_CFG_ENTRIES],
            num_vec_bits,
            num_hpm,
            hpmctr_bits,
            event_id_mask,
        }
    }

    /// Static offset-to-size classification. Pure function of the offset: the set
    /// of implemented registers never changes after `reset_iommu`, only their
    /// contents and per-field legality do.
    pub fn classify_offset(offset: u32) -> RegSize {
        match offset {
            0 => RegSize::Eight,
            8 => RegSize::Four,
            16 => RegSize::Eight,
            24 => RegSize::Eight,
            32 => RegSize::Four,
            36 => RegSize::Four,
            40 => RegSize::Eight,
            48 => RegSize::Four,
            52 => RegSize::Four,
            56 => RegSize::Eight,
            64 => RegSize::Four,
            68 => RegSize::Four,
            72 => RegSize::Four,
            76 => RegSize::Four,
            80 => RegSize::Four,
            84 => RegSize::Four,
            88 => RegSize::Four,
            92 => RegSize::Four,
            96 => RegSize::Eight,
            104..=351 if (offset - 104) % 8 == 0 => RegSize::Eight,
            352..=599 if (offset - 352) % 8 == 0 => RegSize::Eight,
            760 => RegSize::Four,
            768..=1023 => match (offset - 768) % 16 {
                0 => RegSize::Eight,
                8 => RegSize::Four,
                12 => RegSize::Four,
                _ => RegSize::Invalid,
            },
            _ => RegSize::Invalid,
        }
    }

    /// Finds the register base offset an access at `offset` falls within, and
    /// whether it lands on the low or high 4-byte half of an 8-byte register.
    fn locate(offset: u32, access_size: u8) -> Option<(u32, bool)> {
        if offset % access_size as u32 != 0 {
            return None;
        }
        match Self::classify_offset(offset) {
            RegSize::Eight => Some((offset, false)),
            RegSize::Four if access_size == 4 => Some((offset, false)),
            _ if access_size == 4 && offset >= 4 && Self::classify_offset(offset - 4) == RegSize::Eight => {
                Some((offset - 4, true))
            }
            _ => None,
        }
    }

    /// Reads `access_size` (4 or 8) bytes at `offset`. Returns all-ones on any
    /// invalid access, never an error — there is no fault path for MMIO.
    pub fn read(&self, offset: u32, access_size: u8) -> u64 {
        let Some((base, high_half)) = Self::locate(offset, access_size) else {
            trace!("register read at invalid offset {offset:#x}, returning all-ones");
            return all_ones(access_size);
        };
        let full = self.read_full_register(base);
        narrow_for_access(full, access_size, high_half)
    }

    pub fn write(&mut self, offset: u32, access_size: u8, value: u64) {
        let Some((base, high_half)) = Self::locate(offset, access_size) else {
            trace!("register write at invalid offset {offset:#x} dropped");
            return;
        };
        let merged = if !high_half && access_size == Self::full_width(base) {
            value
        } else {
            let current = self.read_full_register(base);
            merge_for_access(current, access_size, high_half, value)
        };
        self.write_full_register(base, merged);
    }

    fn full_width(offset: u32) -> u8 {
        match Self::classify_offset(offset) {
            RegSize::Eight => 8,
            RegSize::Four => 4,
            RegSize::Invalid => 0,
        }
    }

    fn read_full_register(&self, offset: u32) -> u64 {
        match offset {
            0 => self.capabilities.0,
            8 => self.fctrl.0 as u64,
            16 => self.ddtp.0,
            24 => self.cqb.0,
            32 => self.cqh as u64,
            36 => self.cqt as u64,
            40 => self.fqb.0,
            48 => self.fqh as u64,
            52 => self.fqt as u64,
            56 => self.pqb.0,
            64 => self.pqh as u64,
            68 => self.pqt as u64,
            72 => self.cqcsr.0 as u64,
            76 => self.fqcsr.0 as u64,
            80 => self.pqcsr.0 as u64,
            84 => self.ipsr.0 as u64,
            88 => self.iocntovf() as u64,
            92 => self.iocntinh as u64,
            96 => self.iohpmcycles.0,
            104..=351 => self.iohpmctr[((offset - 104) / 8) as usize],
            352..=599 => self.iohpmevt[((offset - 352) / 8) as usize].0,
            760 => self.icvec.0 as u64,
            768..=1023 => self.read_msi_cfg(offset),
            _ => all_ones(8),
        }
    }

    fn read_msi_cfg(&self, offset: u32) -> u64 {
        let idx = ((offset - 768) / 16) as usize;
        let field = (offset - 768) % 16;
        if self.igs_is_wsi() || idx >= (1usize << self.num_vec_bits) {
            return 0;
        }
        let e = &self.msi_cfg[idx];
        match field {
            0 => e.addr,
            8 => e.data as u64,
            12 => e.vec_ctrl.0 as u64,
            _ => 0,
        }
    }

    fn igs_is_wsi(&self) -> bool {
        matches!(self.capabilities.igs(), crate::capabilities::InterruptGenSupport::Wsi)
    }

    pub fn iocntovf(&self) -> u32 {
        let mut v = self.iohpmcycles.of() as u32;
        for i in 0..self.num_hpm as usize {
            v |= (self.iohpmevt[i].of() as u32) << (i + 1);
        }
        v
    }

    fn write_full_register(&mut self, offset: u32, value: u64) {
        match offset {
            0 => { /* capabilities: read-only */ }
            8 => self.write_fctrl(value as u32),
            16 => self.write_ddtp(value),
            24 => self.write_queue_base(QueueWhich::Cq, value),
            40 => self.write_queue_base(QueueWhich::Fq, value),
            56 => self.write_queue_base(QueueWhich::Pq, value),
            32 | 52 | 68 | 88 => { /* cqh, fqt, pqt, iocntovf: hardware/derived, read-only */ }
            36 => self.write_cqt(value as u32),
            48 => self.write_fqh(value as u32),
            64 => self.write_pqh(value as u32),
            72 => self.write_cqcsr(value as u32),
            76 => self.write_fqcsr(value as u32),
            80 => self.write_pqcsr(value as u32),
            84 => self.write_ipsr_rw1c(value as u32),
            92 => self.write_iocntinh(value as u32),
            96 => self.write_iohpmcycles(value),
            104..=351 => self.write_iohpmctr(((offset - 104) / 8) as usize, value),
            352..=599 => self.write_iohpmevt(((offset - 352) / 8) as usize, value),
            760 => self.write_icvec(value as u32),
            768..=1023 => self.write_msi_cfg(offset, value),
            _ => {}
        }
    }

    fn write_fctrl(&mut self, value: u32) {
        let ddt_off = self.ddtp.iommu_mode() == DDTP_OFF;
        let queues_disabled = !self.cqcsr.en() && !self.fqcsr.en() && !self.pqcsr.en();
        if !(ddt_off && queues_disabled) {
            debug!("fctrl write dropped: iommu not idle");
            return;
        }
        let mut new = Fctrl(value);
        if !matches!(
            self.capabilities.end(),
            crate::capabilities::Endianness::Both
        ) {
            new.set_end(self.fctrl.end());
        }
        if !matches!(self.capabilities.igs(), crate::capabilities::InterruptGenSupport::Both) {
            new.set_wis(self.fctrl.wis());
        }
        self.fctrl = new;
    }

    fn write_ddtp(&mut self, value: u64) {
        if self.ddtp.busy() {
            debug!("ddtp write dropped: busy");
            return;
        }
        let mut new = Ddtp(value);
        let legal = matches!(
            new.iommu_mode(),
            DDTP_OFF | DDTP_BARE | DDTP_1LVL | DDTP_2LVL | DDTP_3LVL
        );
        if !legal {
            new.set_iommu_mode(self.ddtp.iommu_mode());
        }
        let pas_mask = (1u64 << self.capabilities.pas()) - 1;
        new.set_ppn(new.ppn() & (pas_mask >> 12));
        new.set_busy(false);
        self.ddtp = new;
    }

    fn write_queue_base(&mut self, which: QueueWhich, value: u64) {
        let (on, busy) = match which {
            QueueWhich::Cq => (self.cqcsr.on(), self.cqcsr.busy()),
            QueueWhich::Fq => (self.fqcsr.on(), self.fqcsr.busy()),
            QueueWhich::Pq => (self.pqcsr.on(), self.pqcsr.busy()),
        };
        if on || busy {
            debug!("{which:?} base write dropped: queue on or busy");
            return;
        }
        let pas_mask = (1u64 << self.capabilities.pas()) - 1;
        let mut qb = QueueBase(value);
        qb.set_ppn(qb.ppn() & (pas_mask >> 12));
        match which {
            QueueWhich::Cq => self.cqb = qb,
            QueueWhich::Fq => self.fqb = qb,
            QueueWhich::Pq => self.pqb = qb,
        }
    }

    fn ring_size(log2szm1: u8) -> u32 {
        1u32 << (log2szm1 as u32 + 1)
    }

    fn write_cqt(&mut self, value: u32) {
        if self.cqcsr.on() && self.cqh != self.cqt {
            return;
        }
        self.cqt = value % Self::ring_size(self.cqb.log2szm1());
    }

    fn write_fqh(&mut self, value: u32) {
        if self.fqcsr.on() && self.fqh != self.fqt {
            return;
        }
        self.fqh = value % Self::ring_size(self.fqb.log2szm1());
    }

    fn write_pqh(&mut self, value: u32) {
        if self.pqcsr.on() && self.pqh != self.pqt {
            return;
        }
        self.pqh = value % Self::ring_size(self.pqb.log2szm1());
    }

    fn write_cqcsr(&mut self, value: u32) {
        let requested = CqCsr(value);
        let was_on = self.cqcsr.en();
        if requested.en() && !was_on {
            self.cqh = 0;
            self.cqt = 0;
            self.cqcsr.set_on(true);
        } else if !requested.en() && was_on {
            self.cqh = 0;
            self.cqt = 0;
            self.cqcsr.set_on(false);
            self.cqcsr.set_cmd_ill(false);
            self.cqcsr.set_cmd_to(false);
            self.cqcsr.set_cqmf(false);
            self.cqcsr.set_fence_w_ip(false);
        }
        self.cqcsr.set_en(requested.en());
        self.cqcsr.set_ie(requested.ie());
        if requested.cqmf() {
            self.cqcsr.set_cqmf(false);
        }
        if requested.cmd_ill() {
            self.cqcsr.set_cmd_ill(false);
        }
        if requested.cmd_to() {
            self.cqcsr.set_cmd_to(false);
        }
        if requested.fence_w_ip() {
            self.cqcsr.set_fence_w_ip(false);
        }
        self.cqcsr.set_busy(false);
    }

    fn write_fqcsr(&mut self, value: u32) {
        let requested = FqCsr(value);
        let was_on = self.fqcsr.en();
        if requested.en() && !was_on {
            self.fqh = 0;
            self.fqt = 0;
            self.fqcsr.set_on(true);
        } else if !requested.en() && was_on {
            self.fqh = 0;
            self.fqt = 0;
            self.fqcsr.set_on(false);
            self.fqcsr.set_fqmf(false);
            self.fqcsr.set_fqof(false);
        }
        self.fqcsr.set_en(requested.en());
        self.fqcsr.set_ie(requested.ie());
        if requested.fqmf() {
            self.fqcsr.set_fqmf(false);
        }
        if requested.fqof() {
            self.fqcsr.set_fqof(false);
        }
        self.fqcsr.set_busy(false);
    }

    fn write_pqcsr(&mut self, value: u32) {
        let requested = PqCsr(value);
        let was_on = self.pqcsr.en();
        if requested.en() && !was_on {
            self.pqh = 0;
            self.pqt = 0;
            self.pqcsr.set_on(true);
        } else if !requested.en() && was_on {
            self.pqh = 0;
            self.pqt = 0;
            self.pqcsr.set_on(false);
            self.pqcsr.set_pqmf(false);
            self.pqcsr.set_pqof(false);
        }
        self.pqcsr.set_en(requested.en());
        self.pqcsr.set_ie(requested.ie());
        if requested.pqmf() {
            self.pqcsr.set_pqmf(false);
        }
        if requested.pqof() {
            self.pqcsr.set_pqof(false);
        }
        self.pqcsr.set_busy(false);
    }

    /// RW1C write to `ipsr`. A cleared bit is re-pended immediately if its unit
    /// still has a live, enabled reason to be pending (property 8).
    fn write_ipsr_rw1c(&mut self, value: u32) {
        let mut new = self.ipsr;
        if value & 0x1 != 0 && new.cip() {
            new.set_cip(false);
        }
        if value & 0x2 != 0 && new.fip() {
            new.set_fip(false);
        }
        if value & 0x4 != 0 && new.pmip() {
            new.set_pmip(false);
        }
        if value & 0x8 != 0 && new.pip() {
            new.set_pip(false);
        }
        self.ipsr = new;

        if !self.ipsr.cip() && self.cqcsr.ie() && self.cq_interrupt_reason_live() {
            self.ipsr.set_cip(true);
        }
        if !self.ipsr.fip() && self.fqcsr.ie() && (self.fqcsr.fqmf() || self.fqcsr.fqof()) {
            self.ipsr.set_fip(true);
        }
        if !self.ipsr.pmip() && self.iocntovf() != 0 {
            self.ipsr.set_pmip(true);
        }
        if !self.ipsr.pip() && self.pqcsr.ie() && (self.pqcsr.pqmf() || self.pqcsr.pqof()) {
            self.ipsr.set_pip(true);
        }
    }

    fn cq_interrupt_reason_live(&self) -> bool {
        self.cqcsr.cqmf() || self.cqcsr.cmd_ill() || self.cqcsr.cmd_to() || self.cqcsr.fence_w_ip()
    }

    fn write_iocntinh(&mut self, value: u32) {
        if !self.capabilities.pmon() {
            warn!("iocntinh write dropped: pmon not supported");
            return;
        }
        self.iocntinh = value;
    }

    fn write_iohpmcycles(&mut self, value: u64) {
        if !self.capabilities.pmon() {
            return;
        }
        let mut v = IoHpmCycles(value);
        if self.iohpmcycles.of() && !v.of() {
            // RW1C: writing 0 leaves it set, only an explicit 1 clears it.
            v.set_of(true);
        }
        self.iohpmcycles = v;
    }

    fn write_iohpmctr(&mut self, idx: usize, value: u64) {
        if !self.capabilities.pmon() || idx >= self.num_hpm as usize {
            return;
        }
        let mask = if self.hpmctr_bits >= 64 { u64::MAX } else { (1u64 << self.hpmctr_bits) - 1 };
        self.iohpmctr[idx] = value & mask;
    }

    fn write_iohpmevt(&mut self, idx: usize, value: u64) {
        if !self.capabilities.pmon() || idx >= self.num_hpm as usize {
            return;
        }
        let mut e = IoHpmEvt(value);
        e.set_event_id(e.event_id() & self.event_id_mask);
        if self.iohpmevt[idx].of() && !e.of() {
            e.set_of(true);
        }
        self.iohpmevt[idx] = e;
    }

    fn write_icvec(&mut self, value: u32) {
        let mut v = Icvec(value);
        let vec_mask = if self.num_vec_bits == 0 { 0 } else { (1u8 << self.num_vec_bits) - 1 };
        v.set_civ(v.civ() & vec_mask);
        v.set_fiv(v.fiv() & vec_mask);
        v.set_pmiv(if self.capabilities.pmon() { v.pmiv() & vec_mask } else { 0 });
        v.set_piv(if self.capabilities.ats() { v.piv() & vec_mask } else { 0 });
        self.icvec = v;
    }

    fn write_msi_cfg(&mut self, offset: u32, value: u64) {
        if self.igs_is_wsi() {
            return;
        }
        let idx = ((offset - 768) / 16) as usize;
        if idx >= (1usize << self.num_vec_bits) {
            return;
        }
        let field = (offset - 768) % 16;
        let pas_mask = (1u64 << (self.capabilities.pas() - 2)) - 1;
        let e = &mut self.msi_cfg[idx];
        match field {
            0 => e.addr = value & pas_mask,
            8 => e.data = value as u32,
            12 => e.vec_ctrl = MsiVecCtrl(value as u32),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum QueueWhich {
    Cq,
    Fq,
    Pq,
}

fn all_ones(size: u8) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size as u32 * 8)) - 1
    }
}

fn narrow_for_access(full: u64, access_size: u8, high_half: bool) -> u64 {
    if access_size == 8 {
        return full;
    }
    if high_half {
        full >> 32
    } else {
        full & 0xFFFF_FFFF
    }
}

fn merge_for_access(current: u64, access_size: u8, high_half: bool, value: u64) -> u64 {
    if access_size == 8 {
        return value;
    }
    if high_half {
        (current & 0xFFFF_FFFF) | (value << 32)
    } else {
        (current & !0xFFFF_FFFFu64) | (value & 0xFFFF_FFFF)
    }
}
