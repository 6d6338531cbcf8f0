//! C5: MSI address identification and translation via the per-device MSI page table.

use crate::context::DeviceContext;
use crate::error::{Cause, TranslationFault};
use crate::hostbridge::{AddrType, TransRequest};
use crate::memory::{MemStatus, MemoryAccess};

pub struct MsiTranslation {
    pub pa: u64,
    pub is_mrif_wr: bool,
    pub mrif_nid: u16,
    pub mrif_nppn: u64,
}

/// Is this request even eligible to be checked for an MSI address? (step 8 gate,
/// independent of whether the IOVA actually matches the device's MSI window).
pub fn eligible(caps_msi_flat: bool, req: &TransRequest, pid_valid: bool, dc: &DeviceContext) -> bool {
    caps_msi_flat
        && req.iova & 0x3 == 0
        && (req.at == AddrType::AtsTranslationRequest
            || (req.at == AddrType::Translated && req.length == 4)
            || (req.at == AddrType::Untranslated && req.length == 4))
        && !pid_valid
        && dc.msiptp.mode != crate::context::MSIPTP_BARE
}

/// Interleaved interrupt-file-number extraction: for each set bit in the mask
/// (scanned low to high), the corresponding IOVA bit is packed into the IFN.
fn interrupt_file_number(iova_ppn: u64, mask: u64) -> u64 {
    let mut ifn = 0u64;
    let mut out_bit = 0u32;
    for bit in 0..52 {
        if (mask >> bit) & 1 != 0 {
            ifn |= ((iova_ppn >> bit) & 1) << out_bit;
            out_bit += 1;
        }
    }
    ifn
}

fn is_msi_address(iova: u64, dc: &DeviceContext) -> bool {
    let page = iova >> 12;
    let mask = dc.msi_addr_mask;
    (page & !mask) == (dc.msi_addr_pattern & !mask)
}

/// Returns `Ok(None)` when the IOVA is not an MSI address (translation must fall
/// through to ordinary page-table translation at step 9), `Ok(Some(..))` on a
/// successful MSI translation, or `Err` on an MSI-specific fault.
pub fn determine_and_translate(
    mem: &mut dyn MemoryAccess,
    dc: &DeviceContext,
    iova: u64,
    ras: bool,
) -> Result<Option<MsiTranslation>, TranslationFault> {
    if !is_msi_address(iova, dc) {
        return Ok(None);
    }
    let ifn = interrupt_file_number(iova >> 12, dc.msi_addr_mask);
    let root = dc.msiptp.ppn * 4096;
    let addr = root + ifn * 16;
    let mut buf = [0u8; 16];
    match mem.read(addr, 16, &mut buf) {
        MemStatus::Ok => {}
        MemStatus::AccessFault => return Err(TranslationFault::new(Cause::MsiPteLoadAccessFault)),
        MemStatus::DataCorruption if ras => return Err(TranslationFault::new(Cause::MsiPtDataCorruption)),
        // RAS not implemented: corruption is not signalled, the walk proceeds
        // with the corrupted bytes as read, matching the DDT/PDT/PTE walkers.
        MemStatus::DataCorruption => {}
    }
    let low = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let high = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let v = low & 1 != 0;
    let w = (low >> 1) & 1 != 0;
    if !v {
        return Err(TranslationFault::new(Cause::MsiPteNotValid));
    }
    if !w {
        let ppn = (low >> 10) & ((1u64 << 44) - 1);
        let c = (low >> 63) & 1 != 0;
        let reserved = low & !0x000f_ffff_ffff_fc03u64;
        if reserved != 0 || c {
            return Err(TranslationFault::new(Cause::MsiPteMisconfigured));
        }
        let pa = (ppn * 4096) | (iova & 0xfff);
        Ok(Some(MsiTranslation { pa, is_mrif_wr: false, mrif_nid: 0, mrif_nppn: 0 }))
    } else {
        let mrif_addr = low & !0x3u64;
        let n10 = (high >> 10) & 0x1;
        let n90 = high & 0x1ff;
        let nppn = (high >> 11) & ((1u64 << 44) - 1);
        let mrif_nid = ((n10 as u16) << 9) | n90 as u16;
        Ok(Some(MsiTranslation { pa: mrif_addr, is_mrif_wr: true, mrif_nid, mrif_nppn: nppn }))
    }
}
