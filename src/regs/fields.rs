//! Typed decodings of each register. Every register is a newtype over its native
//! integer with explicit accessors, never a `#[repr(C)]` struct laid directly over
//! memory — see the crate's design notes on why.

use crate::macros::{get_bit, get_bits, rw_bit, rw_bits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fctrl(pub u32);
impl Fctrl {
    rw_bits!(0..=1, end, u8);
    rw_bit!(2, wis);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ddtp(pub u64);
impl Ddtp {
    rw_bits!(0..=3, iommu_mode, u8);
    rw_bit!(4, busy);
    rw_bits!(10..=63, ppn, u64);
}

pub const DDTP_OFF: u8 = 0;
pub const DDTP_BARE: u8 = 1;
pub const DDTP_1LVL: u8 = 2;
pub const DDTP_2LVL: u8 = 3;
pub const DDTP_3LVL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueBase(pub u64);
impl QueueBase {
    rw_bits!(0..=4, log2szm1, u8);
    rw_bits!(10..=63, ppn, u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CqCsr(pub u32);
impl CqCsr {
    rw_bit!(0, en);
    rw_bit!(1, ie);
    rw_bit!(8, cqmf);
    rw_bit!(9, cmd_ill);
    rw_bit!(10, cmd_to);
    rw_bit!(11, fence_w_ip);
    rw_bit!(16, busy);
    rw_bit!(17, on);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FqCsr(pub u32);
impl FqCsr {
    rw_bit!(0, en);
    rw_bit!(1, ie);
    rw_bit!(8, fqmf);
    rw_bit!(9, fqof);
    rw_bit!(16, busy);
    rw_bit!(17, on);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PqCsr(pub u32);
impl PqCsr {
    rw_bit!(0, en);
    rw_bit!(1, ie);
    rw_bit!(8, pqmf);
    rw_bit!(9, pqof);
    rw_bit!(16, busy);
    rw_bit!(17, on);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ipsr(pub u32);
impl Ipsr {
    rw_bit!(0, cip);
    rw_bit!(1, fip);
    rw_bit!(2, pmip);
    rw_bit!(3, pip);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Icvec(pub u32);
impl Icvec {
    rw_bits!(0..=3, civ, u8);
    rw_bits!(4..=7, fiv, u8);
    rw_bits!(8..=11, pmiv, u8);
    rw_bits!(12..=15, piv, u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoHpmEvt(pub u64);
impl IoHpmEvt {
    rw_bits!(0..=14, event_id, u16);
    rw_bit!(30, oie);
    rw_bit!(63, of);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoHpmCycles(pub u64);
impl IoHpmCycles {
    rw_bits!(0..=62, counter, u64);
    rw_bit!(63, of);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsiVecCtrl(pub u32);
impl MsiVecCtrl {
    rw_bit!(0, mask);
}
