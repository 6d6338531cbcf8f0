//! End-to-end scenarios, one test per named scenario.

mod support;

use riscv_iommu_model::capabilities::{Capabilities, InterruptGenSupport};
use riscv_iommu_model::hostbridge::{
    AddrType, HbMessage, HbToIommuRequest, RequestPayload, ResponsePayload, Status, TransRequest,
};
use riscv_iommu_model::regs::fields::{Fctrl, DDTP_1LVL, DDTP_BARE, DDTP_OFF};
use riscv_iommu_model::{Iommu, ResetConfig};

use support::*;

fn base_caps() -> riscv_iommu_model::capabilities::Builder {
    Capabilities::builder().sv(false, true, false, false).svx4(false, true, false, false)
}

/// S1: ddtp.MODE == Off rejects every request with cause 256.
#[test]
fn s1_off_mode_rejects_with_cause_256() {
    init_logging();
    let caps = base_caps()
        .pas(46)
        .ats(true)
        .msi_flat(true)
        .igs(InterruptGenSupport::Msi)
        .pmon(true)
        .build();
    let cfg = ResetConfig {
        num_hpm: 8,
        hpmctr_bits: 40,
        event_id_mask: 0x7FFF,
        num_vec_bits: 4,
        reset_iommu_mode: DDTP_OFF,
        capabilities: caps,
        fctrl: Fctrl::default(),
    };
    let mut iommu = Iommu::reset(cfg).unwrap();
    let mut mem = FakeMemory::new();
    let mut hb = FakeHostBridge::new();

    // Enable the fault queue so the expected fault record is observable.
    iommu.mmio_write(40, 8, 1 | (5u64 << 10));
    iommu.mmio_write(76, 4, 1);

    let req = HbToIommuRequest {
        device_id: 7,
        pid_valid: false,
        process_id: 0,
        exec_req: false,
        priv_req: false,
        payload: RequestPayload::Trans(TransRequest { at: AddrType::Untranslated, iova: 0x1000, length: 4, write_amo: false }),
    };
    let resp = iommu.handle_request(&mut mem, &mut hb, req);
    assert_eq!(resp.status, Status::UnsupportedRequest);
    assert_eq!(iommu.regs.fqt, 1, "exactly one fault record should have been enqueued");

    let rec = mem.read_u64(5 * 4096);
    let did = rec & 0xff_ffff;
    let ttyp = (rec >> 46) & 0x3f;
    let cause = (rec >> 52) & 0xfff;
    assert_eq!(did, 7);
    assert_eq!(ttyp, 2, "TTYP must be UNTRANSLATED_READ");
    assert_eq!(cause, 256);
}

/// S2: Bare mode rejects an ATS Translation Request with SUCCESS/R=W=0, no fault record.
#[test]
fn s2_bare_mode_ats_rejection_is_success_not_ur() {
    init_logging();
    let caps = base_caps().pas(46).ats(true).build();
    let cfg = ResetConfig {
        num_hpm: 0,
        hpmctr_bits: 0,
        event_id_mask: 0,
        num_vec_bits: 0,
        reset_iommu_mode: DDTP_BARE,
        capabilities: caps,
        fctrl: Fctrl::default(),
    };
    let mut iommu = Iommu::reset(cfg).unwrap();
    let mut mem = FakeMemory::new();
    let mut hb = FakeHostBridge::new();

    iommu.mmio_write(40, 8, 1 | (5u64 << 10));
    iommu.mmio_write(76, 4, 1);

    let req = HbToIommuRequest {
        device_id: 9,
        pid_valid: false,
        process_id: 0,
        exec_req: false,
        priv_req: false,
        payload: RequestPayload::Trans(TransRequest { at: AddrType::AtsTranslationRequest, iova: 0x2000, length: 4, write_amo: false }),
    };
    let resp = iommu.handle_request(&mut mem, &mut hb, req);
    assert_eq!(resp.status, Status::Success);
    match resp.payload {
        ResponsePayload::Trans(t) => {
            assert!(!t.r);
            assert!(!t.w);
        }
        other => panic!("expected Trans payload, got {other:?}"),
    }
    assert_eq!(iommu.regs.fqt, 0, "an ATS Translation Request never writes a fault record");
}

/// S3: DDT leaf entry with V=0 faults with cause 258.
#[test]
fn s3_ddt_missing_entry_faults_258() {
    init_logging();
    let caps = base_caps().pas(46).build();
    let cfg = ResetConfig {
        num_hpm: 0,
        hpmctr_bits: 0,
        event_id_mask: 0,
        num_vec_bits: 0,
        reset_iommu_mode: DDTP_OFF,
        capabilities: caps,
        fctrl: Fctrl::default(),
    };
    let mut iommu = Iommu::reset(cfg).unwrap();
    let mut mem = FakeMemory::new();
    let mut hb = FakeHostBridge::new();

    let ddtp_ppn = 2u64;
    iommu.mmio_write(16, 8, (DDTP_1LVL as u64) | (ddtp_ppn << 10));
    iommu.mmio_write(40, 8, 1 | (5u64 << 10));
    iommu.mmio_write(76, 4, 1);
    // Deliberately leave the leaf DC word at ddtp.ppn*4096 as all-zero (V=0).

    let req = HbToIommuRequest {
        device_id: 0,
        pid_valid: false,
        process_id: 0,
        exec_req: false,
        priv_req: false,
        payload: RequestPayload::Trans(TransRequest { at: AddrType::Untranslated, iova: 0x3000, length: 4, write_amo: false }),
    };
    let resp = iommu.handle_request(&mut mem, &mut hb, req);
    assert_eq!(resp.status, Status::UnsupportedRequest);
    assert_eq!(iommu.regs.fqt, 1);
    let rec = mem.read_u64(5 * 4096);
    let did = rec & 0xff_ffff;
    let cause = (rec >> 52) & 0xfff;
    assert_eq!(did, 0);
    assert_eq!(cause, 258);
}

/// S4: a VS-stage permission fault under two-stage translation reports both
/// the faulting iova and the guest-physical address of the faulting PTE.
#[test]
fn s4_two_stage_page_fault_reports_guest_pa() {
    init_logging();
    let caps = base_caps().pas(46).build();
    let cfg = ResetConfig {
        num_hpm: 0,
        hpmctr_bits: 0,
        event_id_mask: 0,
        num_vec_bits: 0,
        reset_iommu_mode: DDTP_OFF,
        capabilities: caps,
        fctrl: Fctrl::default(),
    };
    let mut iommu = Iommu::reset(cfg).unwrap();
    let mut mem = FakeMemory::new();
    let mut hb = FakeHostBridge::new();

    let ddtp_ppn = 1u64;
    iommu.mmio_write(16, 8, (DDTP_1LVL as u64) | (ddtp_ppn << 10));
    iommu.mmio_write(40, 8, 1 | (5u64 << 10));
    iommu.mmio_write(76, 4, 1);

    let g_root_ppn = 10u64;
    let vs_root_ppn = 2u64;
    let mid_table_ppn = 3u64;

    let dc_addr = ddtp_ppn * 4096; // device_id 0 -> DDI[0] == 0, dc size 32 (msi_flat=false)
    let tc = encode_tc(false, false, false, false, false, false, false, false);
    let iohgatp = encode_iohgatp(8 /* Sv39x4 */, 0, g_root_ppn);
    let ta = encode_ta(0);
    let fsc = encode_fsc(8 /* Sv39 */, vs_root_ppn);
    write_dc_base(&mut mem, dc_addr, tc, iohgatp, ta, fsc);

    // G-stage: a single gigapage leaf identity-maps every GPA below 1 GiB.
    mem.write_u64(g_root_ppn * 4096, encode_pte(true, true, true, true, false, true, true, 0));

    // VS-stage level 2 (top): non-leaf pointer to mid_table_ppn, indexed by VPN[2] = 0.
    mem.write_u64(vs_root_ppn * 4096, encode_pte(false, false, false, false, false, false, false, mid_table_ppn));
    // VS-stage level 1: the faulting leaf (execute-only: V=1,R=0,W=0), indexed by VPN[1] = 1.
    mem.write_u64(mid_table_ppn * 4096 + 8, encode_pte(false, false, true, true, false, true, true, 0));

    let req = HbToIommuRequest {
        device_id: 0,
        pid_valid: false,
        process_id: 0,
        exec_req: false,
        priv_req: false,
        payload: RequestPayload::Trans(TransRequest { at: AddrType::Untranslated, iova: 0x200000, length: 4, write_amo: false }),
    };
    let resp = iommu.handle_request(&mut mem, &mut hb, req);
    assert_eq!(resp.status, Status::UnsupportedRequest);
    assert_eq!(iommu.regs.fqt, 1);
    let rec = mem.read_u64(5 * 4096);
    let cause = (rec >> 52) & 0xfff;
    assert_eq!(cause, 13, "VS-stage read-permission fault");
    let iotval = mem.read_u64(5 * 4096 + 16);
    let iotval2 = mem.read_u64(5 * 4096 + 24);
    assert_eq!(iotval, 0x200000);
    assert_eq!(iotval2, mid_table_ppn * 4096 + 8, "iotval2 must carry the guest PA of the faulting PTE");
}

/// S5: an IOFENCE.C queued behind an in-flight ATS.INVAL does not retire (and
/// `cqh` does not advance past it) until the invalidation completes.
#[test]
fn s5_command_queue_iofence_waits_for_ats_inval() {
    init_logging();
    let caps = base_caps().pas(46).ats(true).build();
    let cfg = ResetConfig {
        num_hpm: 0,
        hpmctr_bits: 0,
        event_id_mask: 0,
        num_vec_bits: 0,
        reset_iommu_mode: DDTP_OFF,
        capabilities: caps,
        fctrl: Fctrl::default(),
    };
    let mut iommu = Iommu::reset(cfg).unwrap();
    let mut mem = FakeMemory::new();
    let mut hb = FakeHostBridge::new();

    let cq_ppn = 1u64;
    iommu.mmio_write(24, 8, 1 | (cq_ppn << 10)); // log2szm1=1 -> ring size 4
    iommu.mmio_write(72, 4, 1); // cqcsr.en = 1

    // Slot 0: ATS.INVAL (opcode 4, func3 0), rid = 1.
    let ats_inval_low = 4u64 | (1u64 << 48);
    mem.write_u64(cq_ppn * 4096, ats_inval_low);
    mem.write_u64(cq_ppn * 4096 + 8, 0xDEAD);

    // Slot 1: IOFENCE.C (opcode 3, func3 0), PR=PW=AV=1, WIS=0, DATA=D, ADDR=A.
    let data: u32 = 0xCAFEBABE;
    let addr: u64 = 0x9000; // word-aligned: low 2 bits of `high` double as reserved bits
    let iofence_low = 3u64 | (1 << 10) | (1 << 11) | (1 << 12) | ((data as u64) << 32);
    mem.write_u64(cq_ppn * 4096 + 16, iofence_low);
    mem.write_u64(cq_ppn * 4096 + 24, addr);

    iommu.mmio_write(36, 4, 2); // cqt = 2

    iommu.command_queue_tick(&mut mem, &mut hb);
    assert_eq!(iommu.regs.cqh, 1, "ATS.INVAL consumed, cqh advances to the IOFENCE slot");
    assert_eq!(hb.messages.len(), 1);
    assert!(matches!(hb.messages[0], HbMessage::AtsInval { itag: 0, .. }));

    iommu.command_queue_tick(&mut mem, &mut hb);
    assert_eq!(iommu.regs.cqh, 1, "cqh must not advance past the IOFENCE while the ATS.INVAL is in flight");
    assert_eq!(hb.messages.len(), 1, "no observability sync yet");
    assert_eq!(mem.read_u64(addr) & 0xFFFF_FFFF, 0, "IOFENCE data write not yet committed");

    iommu.ats_inval_response(0);
    iommu.command_queue_tick(&mut mem, &mut hb);
    assert_eq!(iommu.regs.cqh, 2, "cqh advances past the IOFENCE only once it completes");
    assert_eq!(hb.messages.len(), 2);
    assert!(matches!(hb.messages[1], HbMessage::GlobalObservabilitySync { pr: true, pw: true }));
    assert_eq!(mem.read_u64(addr) & 0xFFFF_FFFF, data as u64);
}

/// S6: `icvec` is WARL against `num_vec_bits` and the optional-unit capability bits.
#[test]
fn s6_icvec_is_warl() {
    init_logging();
    let caps = base_caps().pas(46).ats(false).pmon(false).build();
    let cfg = ResetConfig {
        num_hpm: 0,
        hpmctr_bits: 0,
        event_id_mask: 0,
        num_vec_bits: 2,
        reset_iommu_mode: DDTP_OFF,
        capabilities: caps,
        fctrl: Fctrl::default(),
    };
    let mut iommu = Iommu::reset(cfg).unwrap();

    iommu.mmio_write(760, 4, 0xFFFF);
    let v = iommu.mmio_read(760, 4);
    assert_eq!(v & 0xf, 0x3, "civ masked to num_vec_bits");
    assert_eq!((v >> 4) & 0xf, 0x3, "fiv masked to num_vec_bits");
    assert_eq!((v >> 8) & 0xf, 0, "pmiv forced to 0 when capabilities.pmon = 0");
    assert_eq!((v >> 12) & 0xf, 0, "piv forced to 0 when capabilities.ats = 0");
}
