//! C4: S/VS-stage and G-stage page-table walker.

use crate::context::{Iohgatp, Iosatp, HGATP_BARE, SATP_BARE};
use crate::error::{Cause, TranslationFault};
use crate::memory::{MemStatus, MemoryAccess};
use crate::types::Ttyp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub v: bool,
    pub r: bool,
    pub w: bool,
    pub x: bool,
    pub u: bool,
    pub g: bool,
    pub a: bool,
    pub d: bool,
    pub n: bool,
    pub pbmt: u8,
    pub ppn: u64,
}

impl Pte {
    fn decode(raw: u64, has_napot: bool) -> Self {
        Pte {
            v: raw & 1 != 0,
            r: raw & (1 << 1) != 0,
            w: raw & (1 << 2) != 0,
            x: raw & (1 << 3) != 0,
            u: raw & (1 << 4) != 0,
            g: raw & (1 << 5) != 0,
            a: raw & (1 << 6) != 0,
            d: raw & (1 << 7) != 0,
            n: has_napot && (raw & (1 << 63) != 0),
            pbmt: ((raw >> 61) & 0x3) as u8,
            ppn: (raw >> 10) & ((1u64 << 44) - 1),
        }
    }

    fn is_leaf(&self) -> bool {
        self.r || self.w || self.x
    }

    fn encode(&self, raw_reserved: u64) -> u64 {
        let mut v = raw_reserved & !0xfff;
        v |= self.v as u64;
        v |= (self.r as u64) << 1;
        v |= (self.w as u64) << 2;
        v |= (self.x as u64) << 3;
        v |= (self.u as u64) << 4;
        v |= (self.g as u64) << 5;
        v |= (self.a as u64) << 6;
        v |= (self.d as u64) << 7;
        v
    }
}

/// Per-mode level count and VPN index width (Sv32 uses 10-bit indices, Sv39/48/57
/// use 9-bit indices).
fn levels_for(mode: u8) -> Option<(u8, u8)> {
    match mode {
        crate::context::SATP_SV39 => Some((3, 9)), // also covers HGATP_SV39X4 (same raw value)
        9 => Some((4, 9)),
        10 => Some((5, 9)),
        _ => None,
    }
}

pub struct Resolved {
    pub ppn: u64,
    pub page_bits: u8,
    pub pte: Pte,
}

fn access_kind_causes(access: Access, guest: bool) -> (Cause, Cause) {
    match (access, guest) {
        (Access::Exec, false) => (Cause::InstructionPageFault, Cause::InstructionAccessFault),
        (Access::Read, false) => (Cause::ReadPageFault, Cause::ReadAccessFault),
        (Access::Write, false) => (Cause::WritePageFault, Cause::WriteAccessFault),
        (Access::Exec, true) => (Cause::InstructionGuestPageFault, Cause::InstructionAccessFault),
        (Access::Read, true) => (Cause::ReadGuestPageFault, Cause::ReadAccessFault),
        (Access::Write, true) => (Cause::WriteGuestPageFault, Cause::WriteAccessFault),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Exec,
}

impl Access {
    pub fn from_ttyp(t: Ttyp) -> Self {
        if t.is_exec() {
            Access::Exec
        } else if t.is_write() {
            Access::Write
        } else {
            Access::Read
        }
    }
}

/// Walks a single radix-tree stage (S, VS, or G) rooted at `root_ppn` for `vpn`,
/// extended with the implicit-G-stage translation of every intermediate PTE
/// fetch when `g_stage` is `Some`. Returns the resolved leaf PPN/page size.
fn walk_stage(
    mem: &mut dyn MemoryAccess,
    root_ppn: u64,
    mode: u8,
    va: u64,
    access: Access,
    amo_hwad: bool,
    g_stage: Option<(&Iohgatp, bool)>, // (iohgatp, g_amo_hwad for implicit PTE-fetch translation)
    guest_fault: bool,
    ras: bool,
) -> Result<Resolved, TranslationFault> {
    if mode == SATP_BARE {
        return Ok(Resolved {
            ppn: va >> 12,
            page_bits: 12,
            pte: Pte { v: true, r: true, w: true, x: true, u: true, g: false, a: true, d: true, n: false, pbmt: 0, ppn: va >> 12 },
        });
    }
    let Some((levels, idx_width)) = levels_for(mode) else {
        return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
    };
    let page_off_bits = 12u32;
    let mut level = levels as i32 - 1;
    let mut a = root_ppn * 4096;
    loop {
        let vpn = (va >> (page_off_bits + level as u32 * idx_width as u32)) & ((1u64 << idx_width) - 1);
        let pte_addr = a + vpn * 8;
        // Under two-stage translation `pte_addr` is itself a guest-physical address;
        // report it in iotval2 on any fault raised while resolving this PTE, matching
        // the "iotval2 carries the guest PA that faulted" convention for two-stage walks.
        let fault = |c: Cause| -> TranslationFault {
            if g_stage.is_some() {
                TranslationFault::with_iotval2(c, pte_addr)
            } else {
                TranslationFault::new(c)
            }
        };
        let fetch_addr = if let Some((g, g_amo_hwad)) = g_stage {
            translate_g_implicit(mem, g, pte_addr, g_amo_hwad, ras)?
        } else {
            pte_addr
        };
        let mut buf = [0u8; 8];
        let status = mem.read(fetch_addr, 8, &mut buf);
        match status {
            MemStatus::Ok => {}
            MemStatus::AccessFault => {
                let (_, af) = access_kind_causes(access, guest_fault);
                return Err(fault(af));
            }
            MemStatus::DataCorruption if ras => {
                return Err(fault(Cause::InternalDatapathError));
            }
            MemStatus::DataCorruption => {
                // RAS not implemented: corruption is not signalled as a fault and
                // the walk proceeds with the corrupted bytes as read.
            }
        }
        let raw = u64::from_le_bytes(buf);
        let pte = Pte::decode(raw, idx_width == 9 && level == 0);
        if !pte.v || (!pte.r && pte.w) {
            let (pf, _) = access_kind_causes(access, guest_fault);
            return Err(fault(pf));
        }
        if pte.is_leaf() {
            check_permission(&pte, access, access_kind_causes(access, guest_fault).0).map_err(fault)?;
            if level > 0 {
                let low_bits_mask = (1u64 << (level as u32 * idx_width as u32)) - 1;
                if pte.ppn & low_bits_mask != 0 {
                    let (pf, _) = access_kind_causes(access, guest_fault);
                    return Err(fault(pf));
                }
            }
            let needs_a = !pte.a;
            let needs_d = access == Access::Write && !pte.d;
            if needs_a || needs_d {
                if !amo_hwad {
                    let (pf, _) = access_kind_causes(access, guest_fault);
                    return Err(fault(pf));
                }
                let mut updated = pte;
                updated.a = true;
                if needs_d {
                    updated.d = true;
                }
                let new_raw = updated.encode(raw);
                let mut rbuf = [0u8; 8];
                let _ = mem.read_for_amo(fetch_addr, 8, &mut rbuf);
                let _ = mem.write(fetch_addr, &new_raw.to_le_bytes());
            }
            let page_bits = page_off_bits + level as u32 * idx_width as u32;
            let ppn = pte.ppn | ((va >> 12) & (low_ppn_mask(level, idx_width)));
            return Ok(Resolved { ppn, page_bits: page_bits as u8, pte });
        }
        if level == 0 {
            let (pf, _) = access_kind_causes(access, guest_fault);
            return Err(fault(pf));
        }
        a = pte.ppn * 4096;
        level -= 1;
    }
}

fn low_ppn_mask(level: i32, idx_width: u8) -> u64 {
    if level == 0 {
        0
    } else {
        (1u64 << (level as u32 * idx_width as u32)) - 1
    }
}

fn check_permission(pte: &Pte, access: Access, pf: Cause) -> Result<(), Cause> {
    let ok = match access {
        Access::Read => pte.r,
        Access::Write => pte.w,
        Access::Exec => pte.x,
    };
    if !ok {
        return Err(pf);
    }
    Ok(())
}

/// Translates a guest-physical address (an intermediate PTE fetch address, or a
/// final leaf address under two-stage translation) through the G-stage, with no
/// permission check beyond V/reserved — this is the "implicit" G-stage translation.
fn translate_g_implicit(
    mem: &mut dyn MemoryAccess,
    iohgatp: &Iohgatp,
    gpa: u64,
    amo_hwad: bool,
    ras: bool,
) -> Result<u64, TranslationFault> {
    if iohgatp.mode == HGATP_BARE {
        return Ok(gpa);
    }
    let resolved = walk_stage(mem, iohgatp.ppn, iohgatp.mode, gpa, Access::Read, amo_hwad, None, true, ras)?;
    let off_mask = (1u64 << resolved.page_bits) - 1;
    Ok((resolved.ppn << 12) | (gpa & off_mask))
}

pub struct TranslationResult {
    pub spa: u64,
    pub page_bits: u8,
    pub pte: Pte,
}

/// Single-stage translation (`iohgatp.MODE == Bare`): only `iosatp` applies.
pub fn one_stage_translate(
    mem: &mut dyn MemoryAccess,
    iosatp: &Iosatp,
    va: u64,
    access: Access,
    amo_hwad: bool,
    ras: bool,
) -> Result<TranslationResult, TranslationFault> {
    let r = walk_stage(mem, iosatp.ppn, iosatp.mode, va, access, amo_hwad, None, false, ras)?;
    let off_mask = (1u64 << r.page_bits) - 1;
    Ok(TranslationResult { spa: (r.ppn << 12) | (va & off_mask), page_bits: r.page_bits, pte: r.pte })
}

/// Two-stage translation: VS-stage over `iosatp`, with every VS-stage PTE fetch
/// (and the final leaf) implicitly translated again through G-stage.
///
/// `vs_amo_hwad` (gated by `capabilities.amo_hwad && DC.tc.SADE`) controls A/D
/// setting on VS-stage PTEs; `g_amo_hwad` (gated by `capabilities.amo_hwad &&
/// DC.tc.GADE`) controls A/D setting on every G-stage PTE, including the
/// implicit translations of VS-stage PTE fetch addresses. `ras` gates whether a
/// corrupted PTE fetch (`MemStatus::DataCorruption`) raises a fault at all: with
/// RAS unimplemented, corruption is not observable and the walk proceeds as if
/// the read had succeeded, per `capabilities.ras`.
pub fn two_stage_translate(
    mem: &mut dyn MemoryAccess,
    iosatp: &Iosatp,
    iohgatp: &Iohgatp,
    va: u64,
    access: Access,
    vs_amo_hwad: bool,
    g_amo_hwad: bool,
    ras: bool,
) -> Result<TranslationResult, TranslationFault> {
    let vs = walk_stage(
        mem,
        iosatp.ppn,
        iosatp.mode,
        va,
        access,
        vs_amo_hwad,
        Some((iohgatp, g_amo_hwad)),
        false,
        ras,
    )?;
    let vs_off_mask = (1u64 << vs.page_bits) - 1;
    let gpa = (vs.ppn << 12) | (va & vs_off_mask);
    let g = walk_stage(mem, iohgatp.ppn, iohgatp.mode, gpa, access, g_amo_hwad, None, true, ras)?;
    let page_bits = vs.page_bits.min(g.page_bits);
    let off_mask = (1u64 << page_bits) - 1;
    Ok(TranslationResult { spa: (g.ppn << 12) | (gpa & off_mask), page_bits, pte: vs.pte })
}
