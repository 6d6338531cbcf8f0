//! Platform memory collaborator boundary. The model never owns guest/host memory; it
//! calls out through this trait exactly as the register model calls `read_memory` /
//! `write_memory` in the surrounding platform.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemStatus {
    Ok,
    AccessFault,
    DataCorruption,
}

/// Implemented by whatever owns guest-visible memory (a test harness, in this crate's
/// case). The model issues naturally aligned reads/writes of 4, 8, 16 or 32 bytes.
pub trait MemoryAccess {
    fn read(&mut self, addr: u64, len: usize, out: &mut [u8]) -> MemStatus;
    fn write(&mut self, addr: u64, data: &[u8]) -> MemStatus;

    /// Atomic read-modify-write path used for A/D bit updates on PTEs, distinguished
    /// from `write` so a harness can model contested updates if it chooses.
    fn read_for_amo(&mut self, addr: u64, len: usize, out: &mut [u8]) -> MemStatus {
        self.read(addr, len, out)
    }
}

pub fn read_u64(mem: &mut dyn MemoryAccess, addr: u64) -> Result<u64, MemStatus> {
    let mut buf = [0u8; 8];
    match mem.read(addr, 8, &mut buf) {
        MemStatus::Ok => Ok(u64::from_le_bytes(buf)),
        e => Err(e),
    }
}

pub fn write_u64(mem: &mut dyn MemoryAccess, addr: u64, value: u64) -> MemStatus {
    mem.write(addr, &value.to_le_bytes())
}

pub fn write_u32(mem: &mut dyn MemoryAccess, addr: u64, value: u32) -> MemStatus {
    mem.write(addr, &value.to_le_bytes())
}

pub fn read_bytes<const N: usize>(mem: &mut dyn MemoryAccess, addr: u64) -> Result<[u8; N], MemStatus> {
    let mut buf = [0u8; N];
    match mem.read(addr, N, &mut buf) {
        MemStatus::Ok => Ok(buf),
        e => Err(e),
    }
}
