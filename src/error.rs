//! Error types local to individual components. Entry points that aggregate several
//! failure modes (reset, configuration) surface `anyhow::Result` instead.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Cause codes as defined by the register-mapped fault taxonomy (12-bit cause space).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Cause {
    InstructionAddressMisaligned = 0,
    InstructionAccessFault = 1,
    ReadAddressMisaligned = 4,
    ReadAccessFault = 5,
    WriteAddressMisaligned = 6,
    WriteAccessFault = 7,
    InstructionPageFault = 12,
    ReadPageFault = 13,
    WritePageFault = 15,
    InstructionGuestPageFault = 20,
    ReadGuestPageFault = 21,
    WriteGuestPageFault = 23,
    AllInboundTransactionsDisallowed = 256,
    DdtEntryLoadAccessFault = 257,
    DdtEntryNotValid = 258,
    DdtEntryMisconfigured = 259,
    TransactionTypeDisallowed = 260,
    MsiPteLoadAccessFault = 261,
    MsiPteNotValid = 262,
    MsiPteMisconfigured = 263,
    MrifAccessFault = 264,
    PdtEntryLoadAccessFault = 265,
    PdtEntryNotValid = 266,
    PdtEntryMisconfigured = 267,
    DdtDataCorruption = 268,
    PdtDataCorruption = 269,
    MsiPtDataCorruption = 270,
    MrifDataCorruption = 271,
    InternalDatapathError = 272,
    IommuMsiWriteAccessFault = 273,
}

impl Cause {
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Causes exempt from DTF (disable-translation-fault) suppression.
    pub fn dtf_exempt(code: u16) -> bool {
        matches!(code, 256 | 257 | 258 | 259 | 273)
    }
}

/// A fault raised during a single translation attempt; carries enough context for
/// the fault reporter (C7) to classify the host-bridge response and fault record.
#[derive(Debug, Clone, Copy)]
pub struct TranslationFault {
    pub cause: u16,
    pub iotval2: u64,
}

impl TranslationFault {
    pub fn new(cause: Cause) -> Self {
        Self { cause: cause.code(), iotval2: 0 }
    }

    pub fn with_iotval2(cause: Cause, iotval2: u64) -> Self {
        Self { cause: cause.code(), iotval2 }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("translation fault, cause {0}")]
    Translation(u16),
    #[error("memory access fault at {addr:#x}")]
    AccessFault { addr: u64 },
    #[error("data corruption at {addr:#x}")]
    DataCorruption { addr: u64 },
    #[error("command queue decode error")]
    CommandIllegal,
}

impl From<TranslationFault> for Error {
    fn from(f: TranslationFault) -> Self {
        Error::Translation(f.cause)
    }
}

impl From<Error> for anyhow::Error {
    fn from(e: Error) -> Self {
        anyhow::anyhow!("riscv-iommu-model error: {e}")
    }
}
