//! RISC-V IOMMU reference model.
//!
//! This crate models the behavioural core of a RISC-V IOMMU: the register file
//! (C1), device/process context walker (C3), two-stage page-table walker (C4),
//! MSI address translator (C5), command queue engine (C6), fault reporter (C7),
//! interrupt unit (C8), and the top-level translation orchestrator (C9) defined
//! in this module. Platform memory and host-bridge transport are collaborator
//! traits (`memory::MemoryAccess`, `hostbridge::HostBridge`) a caller supplies;
//! this crate never owns guest memory or a wire transport of its own.

pub mod cache;
pub mod capabilities;
pub mod commands;
pub mod context;
pub mod error;
pub mod fault;
pub mod hostbridge;
pub mod interrupt;
pub(crate) mod macros;
pub mod memory;
pub mod msi;
pub mod pagetable;
pub mod regs;
pub mod types;

use log::{trace, warn};

use cache::{Caches, ItagTracker};
use capabilities::Capabilities;
use commands::CommandEngine;
use context::{device_directory_index, locate_device_context, locate_process_context, Iosatp};
use error::{Cause, TranslationFault};
use fault::{ats_status_for_cause, dtf_suppresses, enqueue, FaultRecord};
use hostbridge::{
    AddrType, HbToIommuRequest, HostBridge, IommuToHbResponse, RequestPayload, ResponsePayload,
    Status, TransRequest, TransResponse,
};
use interrupt::InterruptSource;
use memory::MemoryAccess;
use pagetable::{one_stage_translate, two_stage_translate, Access};
use regs::fields::{Fctrl, Ddtp, DDTP_1LVL, DDTP_2LVL, DDTP_3LVL, DDTP_BARE, DDTP_OFF};
use regs::RegisterFile;
use types::Ttyp;

/// Input to `Iommu::reset`, mirroring the original C reference's reset
/// arguments (num_hpm, hpmctr_bits, eventID_mask, num_vec_bits, reset mode,
/// capabilities, fctrl).
#[derive(Debug, Clone, Copy)]
pub struct ResetConfig {
    pub num_hpm: u8,
    pub hpmctr_bits: u8,
    pub event_id_mask: u16,
    pub num_vec_bits: u8,
    pub reset_iommu_mode: u8,
    pub capabilities: Capabilities,
    pub fctrl: Fctrl,
}

/// The IOMMU instance. Bundles the register file, observability caches, the
/// ITAG tracker, and the command-queue engine's deferred-completion state —
/// all the mutable state the design notes call out as belonging to a single
/// opaque instance rather than process-global statics.
#[derive(Debug)]
pub struct Iommu {
    pub regs: RegisterFile,
    pub caches: Caches,
    pub itags: ItagTracker,
    cq_engine: CommandEngine,
}

impl Iommu {
    /// Validates `cfg` and constructs a freshly reset instance. Returns `Err`
    /// (the Rust analogue of the original C reference's `return -1`) on any
    /// violated precondition, per §4.1's Reset paragraph.
    pub fn reset(cfg: ResetConfig) -> anyhow::Result<Self> {
        if !(12..=56).contains(&cfg.capabilities.pas()) {
            anyhow::bail!("capabilities.pas {} out of range 12..=56", cfg.capabilities.pas());
        }
        if cfg.num_vec_bits > 4 {
            anyhow::bail!("num_vec_bits {} exceeds 4", cfg.num_vec_bits);
        }
        if cfg.num_hpm > 31 {
            anyhow::bail!("num_hpm {} exceeds 31", cfg.num_hpm);
        }
        if cfg.capabilities.pmon() {
            if !(1..=63).contains(&cfg.hpmctr_bits) {
                anyhow::bail!("hpmctr_bits {} out of range 1..=63 with pmon=1", cfg.hpmctr_bits);
            }
        } else if cfg.num_hpm != 0
            || cfg.hpmctr_bits != 0
            || cfg.event_id_mask != 0
        {
            anyhow::bail!("pmon=0 but PMON-gated fields were requested non-zero");
        }
        if !matches!(cfg.reset_iommu_mode, DDTP_OFF | DDTP_BARE) {
            anyhow::bail!("reset_iommu_mode must be Off or Bare");
        }
        use capabilities::InterruptGenSupport;
        match (cfg.capabilities.igs(), cfg.fctrl.wis()) {
            (InterruptGenSupport::Msi, true) => {
                anyhow::bail!("fctrl.wis requests wired interrupts but igs=MSI-only")
            }
            (InterruptGenSupport::Wsi, false) => {
                anyhow::bail!("fctrl.wis requests MSI interrupts but igs=WSI-only")
            }
            _ => {}
        }

        let mut regs = RegisterFile::new(cfg.capabilities, cfg.fctrl, cfg.num_hpm, cfg.hpmctr_bits, cfg.event_id_mask, cfg.num_vec_bits);
        let mut ddtp = Ddtp::default();
        ddtp.set_iommu_mode(cfg.reset_iommu_mode);
        regs.ddtp = ddtp;

        Ok(Self {
            regs,
            caches: Caches::new(),
            itags: ItagTracker::new(),
            cq_engine: CommandEngine::new(),
        })
    }

    /// C1 entry point: a naturally aligned MMIO read of 4 or 8 bytes.
    pub fn mmio_read(&self, offset: u32, size: u8) -> u64 {
        self.regs.read(offset, size)
    }

    /// C1 entry point: a naturally aligned MMIO write of 4 or 8 bytes.
    pub fn mmio_write(&mut self, offset: u32, size: u8, value: u64) {
        self.regs.write(offset, size, value);
    }

    /// Advances the command-queue engine by at most one command (C6).
    pub fn command_queue_tick(&mut self, mem: &mut dyn MemoryAccess, hb: &mut dyn HostBridge) {
        self.cq_engine.step(mem, hb, &mut self.regs, &mut self.caches, &mut self.itags);
    }

    /// Ages every in-flight ITAG by one tick; a countdown reaching zero frees
    /// the slot and sets the sticky timeout flag surfaced at the next
    /// IOFENCE.C completion.
    pub fn tick_itag_timers(&mut self) {
        self.itags.tick();
    }

    /// Delivers an ATS invalidation response for `itag`, freeing the slot.
    pub fn ats_inval_response(&mut self, itag: usize) {
        self.itags.free(itag);
    }

    /// C9: the top-level per-request state machine. Dispatches a host-bridge
    /// request to a translation, a page-request enqueue, or (for the protocol
    /// violation case) a model panic.
    pub fn handle_request(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        req: HbToIommuRequest,
    ) -> IommuToHbResponse {
        match req.payload {
            RequestPayload::Trans(tr) => self.translate(mem, hb, &req, tr),
            RequestPayload::Page(pg) => self.page_request(mem, hb, &req, pg.payload),
            RequestPayload::InvalCompletion(_) => {
                panic!("INVAL_COMPLETION received through the transaction request entry point — protocol violation")
            }
        }
    }

    fn page_request(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        req: &HbToIommuRequest,
        payload: u64,
    ) -> IommuToHbResponse {
        let bytes = payload.to_le_bytes();
        let mut full = [0u8; 16];
        full[0..8].copy_from_slice(&bytes);
        let size = ring_size(self.regs.pqb.log2szm1());
        let next = (self.regs.pqt + 1) % size;
        if self.regs.pqcsr.pqmf() || self.regs.pqcsr.pqof() || !self.regs.pqcsr.on() {
            trace!("page request dropped: PQ off or in error");
        } else if next == self.regs.pqh {
            self.regs.pqcsr.set_pqof(true);
            interrupt::generate(mem, hb, &mut self.regs, InterruptSource::PageQueue);
        } else {
            let addr = self.regs.pqb.ppn() * 4096 + self.regs.pqt as u64 * 16;
            match mem.write(addr, &full) {
                memory::MemStatus::Ok => {
                    self.regs.pqt = next;
                    interrupt::generate(mem, hb, &mut self.regs, InterruptSource::PageQueue);
                }
                _ => {
                    self.regs.pqcsr.set_pqmf(true);
                    interrupt::generate(mem, hb, &mut self.regs, InterruptSource::PageQueue);
                }
            }
        }
        IommuToHbResponse { status: Status::Success, device_id: req.device_id, payload: ResponsePayload::None }
    }

    fn translate(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        req: &HbToIommuRequest,
        tr: TransRequest,
    ) -> IommuToHbResponse {
        let access = if req.exec_req { Access::Exec } else if tr.write_amo { Access::Write } else { Access::Read };
        let ttyp = classify_ttyp(tr.at, access);

        // Step 1: ddtp.iommu_mode == Off.
        if self.regs.ddtp.iommu_mode() == DDTP_OFF {
            return self.fail(mem, hb, req, tr.iova, ttyp, Cause::AllInboundTransactionsDisallowed, 0, false);
        }

        // Step 2: ddtp.iommu_mode == Bare gate.
        if self.regs.ddtp.iommu_mode() == DDTP_BARE
            && (tr.at == AddrType::Translated || tr.at == AddrType::AtsTranslationRequest || req.pid_valid)
        {
            return self.fail(mem, hb, req, tr.iova, ttyp, Cause::TransactionTypeDisallowed, 0, false);
        }

        // Steps 3/4: DDI width vs. active DDT levels.
        let ddi = device_directory_index(req.device_id, self.regs.capabilities.msi_flat());
        let active_levels = match self.regs.ddtp.iommu_mode() {
            DDTP_1LVL => 1,
            DDTP_2LVL => 2,
            DDTP_3LVL => 3,
            _ => 0,
        };
        let ddi_overflows = match active_levels {
            1 => ddi[1] != 0 || ddi[2] != 0,
            2 => ddi[2] != 0,
            _ => false,
        };
        if ddi_overflows {
            return self.fail(mem, hb, req, tr.iova, ttyp, Cause::TransactionTypeDisallowed, 0, false);
        }

        // Step 5/6: locate the device context.
        let dc = match locate_device_context(mem, self.regs.ddtp, self.regs.capabilities, req.device_id) {
            Ok(dc) => dc,
            Err(f) => return self.fail_with(mem, hb, req, tr.iova, ttyp, f, false),
        };
        self.caches.insert_ddt(cache::DdtCacheTag { device_id: req.device_id });
        let dtf = dc.tc.dtf;

        // Step 7: transaction-type gate against DC.tc.
        let ats_like = tr.at == AddrType::Translated || tr.at == AddrType::AtsTranslationRequest;
        if ats_like && !dc.tc.en_ats {
            return self.fail_with(mem, hb, req, tr.iova, ttyp, TranslationFault::new(Cause::TransactionTypeDisallowed), dtf);
        }
        if req.pid_valid && !dc.tc.pdtv {
            return self.fail_with(mem, hb, req, tr.iova, ttyp, TranslationFault::new(Cause::TransactionTypeDisallowed), dtf);
        }
        if req.pid_valid && dc.tc.pdtv && !process_id_fits(req.process_id, dc.fsc_mode) {
            return self.fail_with(mem, hb, req, tr.iova, ttyp, TranslationFault::new(Cause::TransactionTypeDisallowed), dtf);
        }

        // Step 8: MSI eligibility and attempted translation.
        if msi::eligible(self.regs.capabilities.msi_flat(), &tr, req.pid_valid, &dc) {
            match msi::determine_and_translate(mem, &dc, tr.iova, self.regs.capabilities.ras()) {
                Ok(Some(m)) => {
                    return IommuToHbResponse {
                        status: Status::Success,
                        device_id: req.device_id,
                        payload: ResponsePayload::Trans(TransResponse {
                            pa: m.pa,
                            r: false,
                            w: true,
                            is_msi: true,
                            is_mrif_wr: m.is_mrif_wr,
                            mrif_nid: m.mrif_nid,
                            priv_: if req.pid_valid { req.priv_req } else { false },
                            ..Default::default()
                        }),
                    };
                }
                Ok(None) => { /* not an MSI address, fall through to step 9 */ }
                Err(f) => return self.fail_with(mem, hb, req, tr.iova, ttyp, f, dtf),
            }
        }

        // Steps 9-11: choose iosatp / PSCID / iohgatp.
        let (iosatp, pscid, iohgatp) = if !dc.tc.pdtv || !req.pid_valid {
            (Iosatp { mode: dc.fsc_mode, ppn: dc.fsc_ppn }, dc.pscid, dc.iohgatp)
        } else {
            let pc = match locate_process_context(mem, dc.fsc_mode, dc.fsc_ppn, self.regs.capabilities, req.process_id) {
                Ok(pc) => pc,
                Err(f) => return self.fail_with(mem, hb, req, tr.iova, ttyp, f, dtf),
            };
            self.caches.insert_pdt(cache::PdtCacheTag { device_id: req.device_id, process_id: req.process_id });
            (Iosatp { mode: pc.fsc_mode, ppn: pc.fsc_ppn }, pc.pscid, dc.iohgatp)
        };
        let pscv = req.pid_valid && dc.tc.pdtv;

        // Steps 12/13: single- or two-stage translation.
        let amo_base = self.regs.capabilities.amo_hwad();
        let ras = self.regs.capabilities.ras();
        let result = if iohgatp.mode == context::HGATP_BARE {
            one_stage_translate(mem, &iosatp, tr.iova, access, amo_base && dc.tc.sade, ras)
        } else {
            two_stage_translate(
                mem,
                &iosatp,
                &iohgatp,
                tr.iova,
                access,
                amo_base && dc.tc.sade,
                amo_base && dc.tc.gade,
                ras,
            )
        };

        match result {
            Ok(t) => {
                let page_mask = (1u64 << t.page_bits) - 1;
                self.caches.insert_ioatc(cache::IoatcTag {
                    gv: iohgatp.mode != context::HGATP_BARE,
                    gscid: iohgatp.gscid,
                    pscv,
                    pscid,
                    av: true,
                    addr: tr.iova & !page_mask,
                    g: t.pte.g,
                });
                IommuToHbResponse {
                    status: Status::Success,
                    device_id: req.device_id,
                    payload: ResponsePayload::Trans(TransResponse {
                        pa: t.spa,
                        global: t.pte.g,
                        u: t.pte.u,
                        r: t.pte.r,
                        w: t.pte.w,
                        exe: t.pte.x,
                        n: t.pte.n,
                        pbmt: t.pte.pbmt,
                        priv_: if req.pid_valid { req.priv_req } else { false },
                        ..Default::default()
                    }),
                }
            }
            Err(f) => self.fail_with(mem, hb, req, tr.iova, ttyp, f, dtf),
        }
    }

    fn fail(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        req: &HbToIommuRequest,
        iova: u64,
        ttyp: Ttyp,
        cause: Cause,
        iotval2: u64,
        dtf: bool,
    ) -> IommuToHbResponse {
        self.fail_with(mem, hb, req, iova, ttyp, TranslationFault::with_iotval2(cause, iotval2), dtf)
    }

    /// C7: classify the host-bridge response, then (unless suppressed) build
    /// and enqueue a fault record and raise the FQ interrupt.
    fn fail_with(
        &mut self,
        mem: &mut dyn MemoryAccess,
        hb: &mut dyn HostBridge,
        req: &HbToIommuRequest,
        iova: u64,
        ttyp: Ttyp,
        f: TranslationFault,
        dtf: bool,
    ) -> IommuToHbResponse {
        let is_ats = ttyp == Ttyp::AtsTranslationRequest;
        let status = if is_ats {
            ats_status_for_cause(f.cause)
        } else {
            Status::UnsupportedRequest
        };
        let response = IommuToHbResponse {
            status,
            device_id: req.device_id,
            payload: if is_ats {
                ResponsePayload::Trans(TransResponse {
                    r: false,
                    w: false,
                    priv_: if req.pid_valid { req.priv_req } else { false },
                    ..Default::default()
                })
            } else {
                ResponsePayload::None
            },
        };

        // Property 6: no fault record is ever written for an ATS Translation Request.
        if is_ats {
            return response;
        }

        if !dtf_suppresses(dtf, f.cause) {
            let record = FaultRecord {
                did: req.device_id,
                pid: if req.pid_valid { req.process_id } else { 0 },
                pv: req.pid_valid,
                priv_: if req.pid_valid { req.priv_req } else { false },
                ttyp: fault::ttyp_code(ttyp),
                cause: f.cause,
                iotval: iova,
                iotval2: f.iotval2,
            };
            match enqueue(mem, &mut self.regs, record) {
                fault::FaultOutcome::Enqueued => {
                    interrupt::generate(mem, hb, &mut self.regs, InterruptSource::FaultQueue);
                }
                fault::FaultOutcome::Overflow | fault::FaultOutcome::MemoryFault => {
                    interrupt::generate(mem, hb, &mut self.regs, InterruptSource::FaultQueue);
                }
                fault::FaultOutcome::Dropped => {}
            }
        } else {
            warn!("fault cause {} suppressed by DTF", f.cause);
        }

        response
    }
}

fn classify_ttyp(at: AddrType, access: Access) -> Ttyp {
    match (at, access) {
        (AddrType::AtsTranslationRequest, _) => Ttyp::AtsTranslationRequest,
        (AddrType::Untranslated, Access::Exec) => Ttyp::UntranslatedReadForExec,
        (AddrType::Untranslated, Access::Read) => Ttyp::UntranslatedRead,
        (AddrType::Untranslated, Access::Write) => Ttyp::UntranslatedWrite,
        (AddrType::Translated, Access::Exec) => Ttyp::TranslatedReadForExec,
        (AddrType::Translated, Access::Read) => Ttyp::TranslatedRead,
        (AddrType::Translated, Access::Write) => Ttyp::TranslatedWrite,
    }
}

fn process_id_fits(process_id: u32, pdtp_mode: u8) -> bool {
    use context::{PDTP_BARE, PDTP_PD17, PDTP_PD20, PDTP_PD8};
    match pdtp_mode {
        PDTP_BARE => false,
        PDTP_PD8 => process_id < (1 << 8),
        PDTP_PD17 => process_id < (1 << 17),
        PDTP_PD20 => process_id < (1 << 20),
        _ => false,
    }
}

fn ring_size(log2szm1: u8) -> u32 {
    1u32 << (log2szm1 as u32 + 1)
}
