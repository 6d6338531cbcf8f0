//! C3: device/process context walker — locates a `DeviceContext` via the DDT and,
//! when PASIDs are in play, a `ProcessContext` via the PDT.

use crate::error::{Cause, TranslationFault};
use crate::memory::{MemStatus, MemoryAccess};
use crate::regs::fields::{Ddtp, DDTP_1LVL, DDTP_2LVL, DDTP_3LVL};
use crate::capabilities::Capabilities;

#[derive(Debug, Clone, Copy, Default)]
pub struct Iohgatp {
    pub mode: u8,
    pub ppn: u64,
    pub gscid: u16,
}

pub const HGATP_BARE: u8 = 0;
pub const HGATP_SV39X4: u8 = 8;
pub const HGATP_SV48X4: u8 = 9;
pub const HGATP_SV57X4: u8 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct Iosatp {
    pub mode: u8,
    pub ppn: u64,
}

pub const SATP_BARE: u8 = 0;
pub const SATP_SV32: u8 = 8;
pub const SATP_SV39: u8 = 8;
pub const SATP_SV48: u8 = 9;
pub const SATP_SV57: u8 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct TransCtrl {
    pub valid: bool,
    pub en_ats: bool,
    pub en_pri: bool,
    pub t2gpa: bool,
    /// Disable-translation-fault: suppresses most translation-path fault records
    /// (see `crate::fault::dtf_suppresses`) without affecting the host-bridge
    /// response itself.
    pub dtf: bool,
    pub pdtv: bool,
    pub prpr: bool,
    pub gade: bool,
    pub sade: bool,
    pub dpe: bool,
    pub sbe: bool,
    pub sxl: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MsiPtp {
    pub mode: u8,
    pub ppn: u64,
}

pub const MSIPTP_BARE: u8 = 0;
pub const MSIPTP_FLAT: u8 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceContext {
    pub tc: TransCtrl,
    pub iohgatp: Iohgatp,
    pub fsc_mode: u8,
    pub fsc_ppn: u64,
    pub pscid: u32,
    pub msiptp: MsiPtp,
    pub msi_addr_mask: u64,
    pub msi_addr_pattern: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContext {
    pub valid: bool,
    pub fsc_mode: u8,
    pub fsc_ppn: u64,
    pub pscid: u32,
}

pub const PDTP_BARE: u8 = 0;
pub const PDTP_PD8: u8 = 1;
pub const PDTP_PD17: u8 = 2;
pub const PDTP_PD20: u8 = 3;

/// Device-directory-index triple, computed per the MSI_FLAT-dependent partitioning.
pub fn device_directory_index(device_id: u32, msi_flat: bool) -> [u32; 3] {
    if msi_flat {
        [
            device_id & 0x3f,
            (device_id >> 6) & 0x1ff,
            (device_id >> 15) & 0x1ff,
        ]
    } else {
        [
            device_id & 0x7f,
            (device_id >> 7) & 0x1ff,
            (device_id >> 16) & 0xff,
        ]
    }
}

/// Number of non-leaf DDTE fetches before the leaf device-context array:
/// 1LVL addresses the DC array directly (0 non-leaf fetches via DDI[0] only),
/// 2LVL adds one DDTE fetch via DDI[1], 3LVL adds DDI[2] then DDI[1].
fn ddt_levels(mode: u8) -> u8 {
    match mode {
        DDTP_1LVL => 0,
        DDTP_2LVL => 1,
        DDTP_3LVL => 2,
        _ => 0,
    }
}

fn classify(status: MemStatus, ras: bool, access_cause: Cause, corruption_cause: Cause) -> Option<TranslationFault> {
    match status {
        MemStatus::Ok => None,
        MemStatus::AccessFault => Some(TranslationFault::new(access_cause)),
        MemStatus::DataCorruption if ras => Some(TranslationFault::new(corruption_cause)),
        MemStatus::DataCorruption => None,
    }
}

const DC_SIZE_BASE: usize = 32;
const DC_SIZE_EXT: usize = 64;

fn decode_device_context(bytes: &[u8], caps: Capabilities) -> Result<DeviceContext, TranslationFault> {
    let w = |i: usize| -> u64 {
        u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap())
    };
    let tc_raw = w(0);
    let valid = tc_raw & 1 != 0;
    if !valid {
        return Err(TranslationFault::new(Cause::DdtEntryNotValid));
    }
    let tc = TransCtrl {
        valid,
        en_ats: tc_raw & (1 << 1) != 0,
        en_pri: tc_raw & (1 << 2) != 0,
        t2gpa: tc_raw & (1 << 3) != 0,
        dtf: tc_raw & (1 << 4) != 0,
        pdtv: tc_raw & (1 << 5) != 0,
        prpr: tc_raw & (1 << 6) != 0,
        gade: tc_raw & (1 << 7) != 0,
        sade: tc_raw & (1 << 8) != 0,
        dpe: tc_raw & (1 << 9) != 0,
        sbe: tc_raw & (1 << 10) != 0,
        sxl: tc_raw & (1 << 11) != 0,
    };
    let tc_reserved = tc_raw & !0xfff;

    let iohgatp_raw = w(1);
    let iohgatp = Iohgatp {
        mode: ((iohgatp_raw >> 60) & 0xf) as u8,
        ppn: iohgatp_raw & ((1u64 << 44) - 1),
        gscid: ((iohgatp_raw >> 44) & 0xffff) as u16,
    };

    let ta_raw = w(2);
    let pscid = ((ta_raw >> 12) & 0xfffff) as u32;
    let ta_reserved = ta_raw & !0xffff_f000;

    let fsc_raw = w(3);
    let fsc_mode = ((fsc_raw >> 60) & 0xf) as u8;
    let fsc_ppn = fsc_raw & ((1u64 << 44) - 1);

    let mut dc = DeviceContext {
        tc,
        iohgatp,
        fsc_mode,
        fsc_ppn,
        pscid,
        ..Default::default()
    };

    let mut reserved = tc_reserved | ta_reserved;

    if bytes.len() >= DC_SIZE_EXT {
        let msiptp_raw = w(4);
        dc.msiptp = MsiPtp {
            mode: (msiptp_raw & 0xf) as u8,
            ppn: (msiptp_raw >> 10) & ((1u64 << 44) - 1),
        };
        reserved |= msiptp_raw & !0x000f_ffff_ffff_fc0fu64;
        dc.msi_addr_mask = w(5) & ((1u64 << 52) - 1);
        dc.msi_addr_pattern = w(6) & ((1u64 << 52) - 1);
    }

    if reserved != 0 {
        return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
    }

    if (tc.en_ats || tc.en_pri || tc.prpr) && !caps.ats() {
        return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
    }
    if tc.t2gpa && !caps.t2gpa() {
        return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
    }
    let iohgatp_mode_legal = matches!(
        dc.iohgatp.mode,
        HGATP_BARE | HGATP_SV39X4 | HGATP_SV48X4 | HGATP_SV57X4
    );
    if !iohgatp_mode_legal {
        return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
    }
    let iohgatp_supported = match dc.iohgatp.mode {
        HGATP_BARE => true,
        HGATP_SV39X4 => caps.sv39x4(),
        HGATP_SV48X4 => caps.sv48x4(),
        HGATP_SV57X4 => caps.sv57x4(),
        _ => false,
    };
    if !iohgatp_supported {
        return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
    }
    if tc.pdtv {
        let pdtp_legal = matches!(dc.fsc_mode, PDTP_BARE | PDTP_PD8 | PDTP_PD17 | PDTP_PD20);
        if !pdtp_legal {
            return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
        }
    } else {
        let iosatp_legal = matches!(dc.fsc_mode, SATP_BARE | SATP_SV39 | SATP_SV48 | SATP_SV57);
        if !iosatp_legal {
            return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
        }
        let iosatp_supported = match dc.fsc_mode {
            SATP_BARE => true,
            SATP_SV39 => caps.sv39(),
            SATP_SV48 => caps.sv48(),
            SATP_SV57 => caps.sv57(),
            _ => false,
        };
        if !iosatp_supported {
            return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
        }
    }
    if !caps.msi_flat() {
        let msiptp_legal = matches!(dc.msiptp.mode, MSIPTP_BARE);
        if !msiptp_legal {
            return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
        }
    } else if !matches!(dc.msiptp.mode, MSIPTP_BARE | MSIPTP_FLAT) {
        return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
    }

    Ok(dc)
}

/// Walks the DDT for `device_id`, returning the resolved `DeviceContext`.
pub fn locate_device_context(
    mem: &mut dyn MemoryAccess,
    ddtp: Ddtp,
    caps: Capabilities,
    device_id: u32,
) -> Result<DeviceContext, TranslationFault> {
    let ddi = device_directory_index(device_id, caps.msi_flat());
    let mut level = ddt_levels(ddtp.iommu_mode());
    let mut addr = ddtp.ppn() * 4096;
    while level > 0 {
        let idx = ddi[level as usize] as u64;
        let entry_addr = addr + idx * 8;
        let mut buf = [0u8; 8];
        let status = mem.read(entry_addr, 8, &mut buf);
        if let Some(f) = classify(status, caps.ras(), Cause::DdtEntryLoadAccessFault, Cause::DdtDataCorruption) {
            return Err(f);
        }
        let ddte = u64::from_le_bytes(buf);
        if ddte & 1 == 0 {
            return Err(TranslationFault::new(Cause::DdtEntryNotValid));
        }
        if ddte & !0x0000_ffff_ffff_fc01u64 != 0 {
            return Err(TranslationFault::new(Cause::DdtEntryMisconfigured));
        }
        addr = ((ddte >> 10) & ((1u64 << 44) - 1)) * 4096;
        level -= 1;
    }
    let dc_size = if caps.msi_flat() { DC_SIZE_EXT } else { DC_SIZE_BASE };
    let leaf_addr = addr + ddi[0] as u64 * dc_size as u64;
    let mut buf = [0u8; DC_SIZE_EXT];
    let status = mem.read(leaf_addr, dc_size, &mut buf[..dc_size]);
    if let Some(f) = classify(status, caps.ras(), Cause::DdtEntryLoadAccessFault, Cause::DdtDataCorruption) {
        return Err(f);
    }
    decode_device_context(&buf[..dc_size], caps)
}

fn pdi_parts(process_id: u32, mode: u8) -> Option<[u32; 3]> {
    match mode {
        PDTP_PD8 => Some([process_id & 0xff, 0, 0]),
        PDTP_PD17 => Some([process_id & 0x1ff, (process_id >> 9) & 0xff, 0]),
        PDTP_PD20 => Some([
            process_id & 0x1ff,
            (process_id >> 9) & 0xff,
            (process_id >> 17) & 0x7,
        ]),
        _ => None,
    }
}

/// Number of non-leaf PDTE fetches before the leaf process-context array,
/// same addressing scheme as `ddt_levels`.
fn pdt_levels(mode: u8) -> u8 {
    match mode {
        PDTP_PD8 => 0,
        PDTP_PD17 => 1,
        PDTP_PD20 => 2,
        _ => 0,
    }
}

/// Walks the PDT rooted at `DC.fsc` for `process_id`.
pub fn locate_process_context(
    mem: &mut dyn MemoryAccess,
    pdtp_mode: u8,
    pdtp_ppn: u64,
    caps: Capabilities,
    process_id: u32,
) -> Result<ProcessContext, TranslationFault> {
    let Some(pdi) = pdi_parts(process_id, pdtp_mode) else {
        return Err(TranslationFault::new(Cause::PdtEntryMisconfigured));
    };
    let mut level = pdt_levels(pdtp_mode);
    let mut addr = pdtp_ppn * 4096;
    while level > 0 {
        let idx = pdi[level as usize] as u64;
        let entry_addr = addr + idx * 8;
        let mut buf = [0u8; 8];
        let status = mem.read(entry_addr, 8, &mut buf);
        if let Some(f) = classify(status, caps.ras(), Cause::PdtEntryLoadAccessFault, Cause::PdtDataCorruption) {
            return Err(f);
        }
        let pdte = u64::from_le_bytes(buf);
        if pdte & 1 == 0 {
            return Err(TranslationFault::new(Cause::PdtEntryNotValid));
        }
        if pdte & !0x0000_ffff_ffff_fc01u64 != 0 {
            return Err(TranslationFault::new(Cause::PdtEntryMisconfigured));
        }
        addr = ((pdte >> 10) & ((1u64 << 44) - 1)) * 4096;
        level -= 1;
    }
    let leaf_addr = addr + pdi[0] as u64 * 16;
    let mut buf = [0u8; 16];
    let status = mem.read(leaf_addr, 16, &mut buf);
    if let Some(f) = classify(status, caps.ras(), Cause::PdtEntryLoadAccessFault, Cause::PdtDataCorruption) {
        return Err(f);
    }
    let ta = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let fsc = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    if ta & 1 == 0 {
        return Err(TranslationFault::new(Cause::PdtEntryNotValid));
    }
    Ok(ProcessContext {
        valid: true,
        fsc_mode: ((fsc >> 60) & 0xf) as u8,
        fsc_ppn: fsc & ((1u64 << 44) - 1),
        pscid: ((ta >> 12) & 0xfffff) as u32,
    })
}
