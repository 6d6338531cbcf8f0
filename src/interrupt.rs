//! C8: interrupt unit — pending-bit bookkeeping and MSI/wired dispatch.

use log::trace;

use crate::hostbridge::{HbMessage, HostBridge};
use crate::memory::MemoryAccess;
use crate::regs::RegisterFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    CommandQueue,
    FaultQueue,
    Pmu,
    PageQueue,
}

impl InterruptSource {
    fn vector_field(self, icvec: crate::regs::fields::Icvec) -> u8 {
        match self {
            InterruptSource::CommandQueue => icvec.civ(),
            InterruptSource::FaultQueue => icvec.fiv(),
            InterruptSource::Pmu => icvec.pmiv(),
            InterruptSource::PageQueue => icvec.piv(),
        }
    }
}

fn pending(regs: &RegisterFile, src: InterruptSource) -> bool {
    match src {
        InterruptSource::CommandQueue => regs.ipsr.cip(),
        InterruptSource::FaultQueue => regs.ipsr.fip(),
        InterruptSource::Pmu => regs.ipsr.pmip(),
        InterruptSource::PageQueue => regs.ipsr.pip(),
    }
}

fn set_pending(regs: &mut RegisterFile, src: InterruptSource, value: bool) {
    match src {
        InterruptSource::CommandQueue => regs.ipsr.set_cip(value),
        InterruptSource::FaultQueue => regs.ipsr.set_fip(value),
        InterruptSource::Pmu => regs.ipsr.set_pmip(value),
        InterruptSource::PageQueue => regs.ipsr.set_pip(value),
    };
}

fn enabled(regs: &RegisterFile, src: InterruptSource) -> bool {
    match src {
        InterruptSource::CommandQueue => regs.cqcsr.ie(),
        InterruptSource::FaultQueue => regs.fqcsr.ie(),
        InterruptSource::Pmu => regs.iocntovf() != 0,
        InterruptSource::PageQueue => regs.pqcsr.ie(),
    }
}

/// `generate_interrupt`: sets the pending bit (if not already set and enabled)
/// and, in MSI mode, performs the 4-byte MSI write unless the vector is masked.
pub fn generate(
    mem: &mut dyn MemoryAccess,
    hb: &mut dyn HostBridge,
    regs: &mut RegisterFile,
    src: InterruptSource,
) {
    if pending(regs, src) || !enabled(regs, src) {
        return;
    }
    set_pending(regs, src, true);
    if regs.fctrl.wis() {
        trace!("wired interrupt raised for {src:?} (out of model)");
        return;
    }
    let vec = src.vector_field(regs.icvec) as usize;
    let entry = regs.msi_cfg[vec];
    if entry.vec_ctrl.mask() {
        return;
    }
    let _ = mem.write(entry.addr, &entry.data.to_le_bytes());
    hb.send(HbMessage::MsiWrite { addr: entry.addr, data: entry.data });
}
