//! `capabilities` is the only register that is entirely read-only and fixed at
//! `reset_iommu` time; every WARL/gating decision elsewhere in the register file
//! consults it.

use bit_field::BitField;
use crate::macros::{get_bit, get_bits, rw_bits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptGenSupport {
    Wsi,
    Msi,
    Both,
}

/// Raw 64-bit `capabilities` register, decoded on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(pub u64);

impl Capabilities {
    get_bits!(0..=7, version, u8);
    get_bit!(8, sv32);
    get_bit!(9, sv39);
    get_bit!(10, sv48);
    get_bit!(11, sv57);
    get_bit!(12, sv32x4);
    get_bit!(13, sv39x4);
    get_bit!(14, sv48x4);
    get_bit!(15, sv57x4);
    get_bit!(16, msi_flat);
    get_bit!(17, mrif);
    get_bit!(18, ats);
    get_bit!(19, t2gpa);
    get_bit!(20, amo_hwad);
    rw_bits!(21..=22, end_raw, u8);
    rw_bits!(23..=24, igs_raw, u8);
    get_bit!(25, pmon);
    get_bit!(26, ras);
    get_bits!(32..=38, pas, u8);

    pub fn end(self) -> Endianness {
        match self.end_raw() {
            0 => Endianness::Little,
            1 => Endianness::Big,
            _ => Endianness::Both,
        }
    }

    pub fn igs(self) -> InterruptGenSupport {
        match self.igs_raw() {
            0 => InterruptGenSupport::Msi,
            1 => InterruptGenSupport::Wsi,
            _ => InterruptGenSupport::Both,
        }
    }

    pub fn builder() -> Builder {
        Builder(Capabilities(0))
    }
}

/// Builder used by `reset_iommu`'s `ResetConfig`; capabilities are otherwise
/// immutable for the lifetime of an `Iommu` instance.
pub struct Builder(Capabilities);

impl Builder {
    pub fn version(mut self, v: u8) -> Self {
        self.0 .0.set_bits(0..=7, v as u64);
        self
    }
    pub fn sv(mut self, sv32: bool, sv39: bool, sv48: bool, sv57: bool) -> Self {
        self.0 .0.set_bit(8, sv32);
        self.0 .0.set_bit(9, sv39);
        self.0 .0.set_bit(10, sv48);
        self.0 .0.set_bit(11, sv57);
        self
    }
    pub fn svx4(mut self, sv32x4: bool, sv39x4: bool, sv48x4: bool, sv57x4: bool) -> Self {
        self.0 .0.set_bit(12, sv32x4);
        self.0 .0.set_bit(13, sv39x4);
        self.0 .0.set_bit(14, sv48x4);
        self.0 .0.set_bit(15, sv57x4);
        self
    }
    pub fn msi_flat(mut self, v: bool) -> Self {
        self.0 .0.set_bit(16, v);
        self
    }
    pub fn mrif(mut self, v: bool) -> Self {
        self.0 .0.set_bit(17, v);
        self
    }
    pub fn ats(mut self, v: bool) -> Self {
        self.0 .0.set_bit(18, v);
        self
    }
    pub fn t2gpa(mut self, v: bool) -> Self {
        self.0 .0.set_bit(19, v);
        self
    }
    pub fn amo_hwad(mut self, v: bool) -> Self {
        self.0 .0.set_bit(20, v);
        self
    }
    pub fn end(mut self, e: Endianness) -> Self {
        let raw = match e {
            Endianness::Little => 0,
            Endianness::Big => 1,
            Endianness::Both => 2,
        };
        self.0 .0.set_bits(21..=22, raw);
        self
    }
    pub fn igs(mut self, igs: InterruptGenSupport) -> Self {
        let raw = match igs {
            InterruptGenSupport::Msi => 0,
            InterruptGenSupport::Wsi => 1,
            InterruptGenSupport::Both => 2,
        };
        self.0 .0.set_bits(23..=24, raw);
        self
    }
    pub fn pmon(mut self, v: bool) -> Self {
        self.0 .0.set_bit(25, v);
        self
    }
    pub fn ras(mut self, v: bool) -> Self {
        self.0 .0.set_bit(26, v);
        self
    }
    pub fn pas(mut self, width: u8) -> Self {
        self.0 .0.set_bits(32..=38, width as u64);
        self
    }
    pub fn build(self) -> Capabilities {
        self.0
    }
}
