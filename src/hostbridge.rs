//! Wire shapes exchanged with the host-bridge transport (a non-goal collaborator;
//! this crate only defines the shapes at the interface boundary, per `iommu_req_rsp.h`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    Untranslated,
    AtsTranslationRequest,
    Translated,
}

#[derive(Debug, Clone, Copy)]
pub struct TransRequest {
    pub at: AddrType,
    pub iova: u64,
    pub length: u32,
    pub write_amo: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub payload: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct InvalCompletion {
    pub payload: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum RequestPayload {
    Trans(TransRequest),
    Page(PageRequest),
    InvalCompletion(InvalCompletion),
}

#[derive(Debug, Clone, Copy)]
pub struct HbToIommuRequest {
    pub device_id: u32,
    pub pid_valid: bool,
    pub process_id: u32,
    pub exec_req: bool,
    pub priv_req: bool,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    UnsupportedRequest,
    CompleterAbort,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransResponse {
    pub pa: u64,
    pub s: bool,
    pub n: bool,
    pub cxl_io: bool,
    pub global: bool,
    pub priv_: bool,
    pub u: bool,
    pub r: bool,
    pub w: bool,
    pub exe: bool,
    pub ama: bool,
    pub pbmt: u8,
    pub is_msi: bool,
    pub is_mrif_wr: bool,
    pub mrif_nid: u16,
}

#[derive(Debug, Clone, Copy)]
pub enum ResponsePayload {
    Trans(TransResponse),
    PrgPayload(u64),
    InvReqPayload(u64),
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct IommuToHbResponse {
    pub status: Status,
    pub device_id: u32,
    pub payload: ResponsePayload,
}

/// Messages the command-queue engine (C6) emits toward the host bridge for
/// ATS.INVAL / ATS.PRGR, distinct from per-transaction responses above.
#[derive(Debug, Clone, Copy)]
pub enum HbMessage {
    AtsInval { dsv: bool, dseg: u8, rid: u16, pv: bool, pid: u32, payload: u64, itag: usize },
    AtsPrgr { dsv: bool, dseg: u8, rid: u16, payload: u64 },
    MsiWrite { addr: u64, data: u32 },
    GlobalObservabilitySync { pr: bool, pw: bool },
}

/// Host-bridge collaborator boundary: a harness implements this to receive
/// IOMMU-generated messages (ATS invalidations, MSI writes, observability syncs).
pub trait HostBridge {
    fn send(&mut self, msg: HbMessage);
}
