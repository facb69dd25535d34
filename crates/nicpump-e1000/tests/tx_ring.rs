use std::cell::RefCell;
use std::rc::Rc;

use nicpump_e1000::regs;
use nicpump_e1000::testing::{DeviceModel, HeapDma, RegisterFile};
use nicpump_e1000::{
    E1000, E1000Config, TxCmd, TxDesc, TxError, TxStatus, MAX_FRAME_LEN, TX_RING_LEN,
};
use proptest::prelude::*;

type TestNic = E1000<Rc<RefCell<RegisterFile>>, Rc<RefCell<HeapDma>>>;

fn attached() -> (DeviceModel, TestNic) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let model = DeviceModel::new();
    let nic = E1000::attach(model.pci(), model.dma.clone(), E1000Config::default()).unwrap();
    model.regs.borrow_mut().clear_log();
    (model, nic)
}

fn build_test_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    frame.extend_from_slice(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Queue `TX_RING_LEN` frames, letting hardware fetch each one but write none back, so every
/// slot is in flight and TDH has caught up with TDT again.
fn fill_ring(model: &DeviceModel, nic: &mut TestNic) {
    for i in 0..TX_RING_LEN {
        nic.transmit(&build_test_frame(&[i as u8])).unwrap();
        assert_eq!(model.fetch_tx(), 1);
    }
}

fn descriptors(model: &DeviceModel) -> Vec<TxDesc> {
    (0..TX_RING_LEN).map(|slot| model.tx_desc(slot)).collect()
}

#[test]
fn transmit_fills_slot_and_publishes_tail() {
    let (model, mut nic) = attached();
    let frame = build_test_frame(b"nic->wire");

    nic.transmit(&frame).unwrap();

    let desc = model.tx_desc(0);
    assert_eq!(usize::from(desc.length), frame.len());
    assert_eq!(desc.cmd, TxCmd::RS | TxCmd::EOP);
    assert!(!desc.status.contains(TxStatus::DD));
    assert_eq!(model.tx_frame(0), frame);
    assert_eq!(model.regs.borrow().writes_to(regs::TDT), vec![1]);
    assert_eq!(nic.tx_ring().tail(), 1);

    assert_eq!(model.poll_tx(), vec![frame]);
    assert!(model.tx_desc(0).is_done());
    assert_eq!(model.regs.borrow().get(regs::TDH), 1);
}

#[test]
fn hardware_sends_only_published_descriptors() {
    let (model, mut nic) = attached();
    assert!(model.poll_tx().is_empty());

    for i in 0..3u8 {
        nic.transmit(&build_test_frame(&[i])).unwrap();
    }
    let sent = model.poll_tx();
    assert_eq!(sent, (0..3u8).map(|i| build_test_frame(&[i])).collect::<Vec<_>>());
    assert!(model.poll_tx().is_empty());
    assert_eq!(model.regs.borrow().get(regs::TDH), 3);
    // Slots past the tail were never touched by the device.
    assert!(model.tx_desc(3).is_done());
    assert_eq!(model.tx_desc(3).length, 0);
}

#[test]
fn oversized_frame_is_rejected_without_side_effects() {
    let (model, mut nic) = attached();
    let before = descriptors(&model);

    let err = nic.transmit(&vec![0u8; MAX_FRAME_LEN]).unwrap_err();

    assert_eq!(
        err,
        TxError::PacketTooLarge {
            len: MAX_FRAME_LEN,
            max: MAX_FRAME_LEN,
        }
    );
    assert!(!err.is_transient());
    assert_eq!(descriptors(&model), before);
    assert!(model.regs.borrow().writes_to(regs::TDT).is_empty());
    assert_eq!(nic.tx_ring().tail(), 0);
}

#[test]
fn ring_full_when_tail_slot_is_still_in_flight() {
    let (model, mut nic) = attached();
    fill_ring(&model, &mut nic);
    assert_eq!(nic.tx_ring().tail(), 0);
    model.regs.borrow_mut().clear_log();

    let err = nic.transmit(b"blocked").unwrap_err();
    assert_eq!(err, TxError::RingFull);
    assert!(err.is_transient());
    assert!(model.regs.borrow().writes_to(regs::TDT).is_empty());
    assert_eq!(model.tx_frame(0), build_test_frame(&[0]));

    assert_eq!(model.write_back_tx(1), vec![build_test_frame(&[0])]);
    nic.transmit(b"unblocked").unwrap();
    assert_eq!(model.tx_frame(0), b"unblocked");
}

#[test]
fn filling_the_ring_wraps_tail_and_then_waits_for_hardware() {
    let (model, mut nic) = attached();

    for i in 0..TX_RING_LEN {
        nic.transmit(&build_test_frame(&[i as u8])).unwrap();
        assert_eq!(model.poll_tx(), vec![build_test_frame(&[i as u8])]);
    }
    assert_eq!(nic.tx_ring().tail(), 0);
    assert_eq!(model.regs.borrow().get(regs::TDT), 0);
    nic.transmit(b"one more").unwrap();
    assert_eq!(nic.tx_ring().tail(), 1);

    // Fetched but not yet written back: only slot 0 may be reused.
    let (model, mut nic) = attached();
    fill_ring(&model, &mut nic);
    model.write_back_tx(1);
    nic.transmit(b"one too many").unwrap();
    assert_eq!(nic.tx_ring().tail(), 1);
    assert_eq!(nic.transmit(b"one too many"), Err(TxError::RingFull));
    assert_eq!(model.tx_frame(0), b"one too many");
    assert_eq!(model.tx_frame(1), build_test_frame(&[1]));
}

#[test]
fn completed_slots_are_reused_in_order() {
    let (model, mut nic) = attached();

    for round in 0..3u8 {
        for i in 0..TX_RING_LEN {
            nic.transmit(&[round, i as u8]).unwrap();
            assert_eq!(model.poll_tx(), vec![vec![round, i as u8]]);
        }
    }
    assert_eq!(model.tx_frame(TX_RING_LEN - 1), vec![2, (TX_RING_LEN - 1) as u8]);
    assert_eq!(model.regs.borrow().writes_to(regs::TDT).len(), 3 * TX_RING_LEN);
}

proptest! {
    #[test]
    fn transmit_succeeds_iff_the_tail_slot_is_done(
        frame in proptest::collection::vec(any::<u8>(), 0..MAX_FRAME_LEN),
        done in any::<bool>(),
    ) {
        let (model, mut nic) = attached();
        if !done {
            model.hold_tx(0);
        }
        let before = descriptors(&model);

        let result = nic.transmit(&frame);

        prop_assert_eq!(result.is_ok(), done);
        if done {
            let desc = model.tx_desc(0);
            prop_assert!(!desc.is_done());
            prop_assert_eq!(desc.cmd, TxCmd::RS | TxCmd::EOP);
            prop_assert_eq!(model.tx_frame(0), frame.clone());
            prop_assert_eq!(model.poll_tx(), vec![frame]);
        } else {
            prop_assert_eq!(result, Err(TxError::RingFull));
            prop_assert_eq!(descriptors(&model), before);
            prop_assert!(model.regs.borrow().writes_to(regs::TDT).is_empty());
        }
    }

    #[test]
    fn frames_at_or_above_the_limit_are_refused(len in MAX_FRAME_LEN..4096usize) {
        let (model, mut nic) = attached();
        let before = descriptors(&model);
        let is_too_large = matches!(
            nic.transmit(&vec![0u8; len]),
            Err(TxError::PacketTooLarge { .. })
        );
        prop_assert!(is_too_large);
        prop_assert_eq!(nic.tx_ring().tail(), 0);
        prop_assert_eq!(descriptors(&model), before);
    }
}
