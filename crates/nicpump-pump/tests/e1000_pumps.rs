//! Both pumps driving one real driver over the in-memory device model.

use std::cell::{Cell, RefCell};
use std::ops::ControlFlow;
use std::rc::Rc;

use nicpump_e1000::testing::{DeviceModel, HeapDma, RegisterFile};
use nicpump_e1000::{regs, E1000, RX_RING_LEN, TX_RING_LEN};
use nicpump_ipc::testing::Mailbox;
use nicpump_ipc::{ProcessId, RequestKind};
use nicpump_pump::{backoff, BoundedRetries, InputPump, OutputPump, PumpConfig};

type SharedNic = Rc<RefCell<E1000<Rc<RefCell<RegisterFile>>, Rc<RefCell<HeapDma>>>>>;

fn setup() -> (DeviceModel, SharedNic, PumpConfig) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = PumpConfig::from_lookup(|key| {
        (key == "NICPUMP_NS_ENVID").then(|| "0x1002".to_string())
    })
    .unwrap();
    let model = DeviceModel::new();
    let nic = E1000::attach(model.pci(), model.dma.clone(), config.e1000_config()).unwrap();
    (model, Rc::new(RefCell::new(nic)), config)
}

fn build_test_frame(tag: u8, payload_len: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + payload_len);
    frame.extend_from_slice(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, tag]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.extend(std::iter::repeat(tag).take(payload_len));
    frame
}

#[test]
fn wire_frames_reach_the_stack_in_order() {
    let (model, nic, config) = setup();
    let mut mailbox = Mailbox::new();
    let frames: Vec<Vec<u8>> = (0..3u8).map(|i| build_test_frame(i, 50 + usize::from(i))).collect();
    for frame in &frames {
        assert!(model.receive_frame(frame));
    }

    let mut pump = InputPump::new(nic.clone(), &mut mailbox, BoundedRetries::new(0), config.stack);
    pump.run();
    assert_eq!(pump.stats().forwarded, 3);
    assert_eq!(pump.stats().empty_polls, 1);
    drop(pump);

    let delivered: Vec<&[u8]> = mailbox
        .sent()
        .iter()
        .map(|sent| {
            assert_eq!(sent.to, ProcessId(0x1002));
            assert_eq!(sent.value, RequestKind::Input.value());
            sent.page.packet().unwrap()
        })
        .collect();
    assert_eq!(delivered, frames.iter().map(Vec::as_slice).collect::<Vec<_>>());
    assert_eq!(model.regs.borrow().get(regs::RDT), 2);
    assert_eq!(nic.borrow().rx_ring().cursor(), 3);
    assert_eq!(model.rx_buffers_available(), RX_RING_LEN - 1);
}

#[test]
fn input_pump_outlasts_the_ring_when_frames_keep_arriving() {
    let (model, nic, config) = setup();
    let mut mailbox = Mailbox::new();
    let total = 2 * RX_RING_LEN + 7;

    for i in 0..total {
        assert!(model.receive_frame(&build_test_frame(i as u8, 30)), "frame {i} had no buffer");
        let mut pump = InputPump::new(nic.clone(), &mut mailbox, BoundedRetries::new(0), config.stack);
        assert!(pump.pump_one().is_continue());
        assert_eq!(pump.stats().forwarded, 1);
    }

    assert_eq!(mailbox.sent().len(), total);
    let last = &mailbox.sent()[total - 1];
    assert_eq!(last.page.packet().unwrap(), build_test_frame((total - 1) as u8, 30).as_slice());
}

#[test]
fn stack_frames_reach_the_wire() {
    let (model, nic, config) = setup();
    let mut mailbox = Mailbox::new();
    mailbox
        .push_packet(config.stack, RequestKind::Output.value(), &[1, 2, 10, 4, 5])
        .unwrap();

    let mut pump = OutputPump::new(nic.clone(), &mut mailbox, BoundedRetries::new(0), config.stack);
    assert!(pump.pump_one().is_continue());
    assert_eq!(pump.stats().transmitted, 1);

    assert_eq!(model.regs.borrow().get(regs::TDT), 1);
    assert_eq!(model.poll_tx(), vec![vec![1, 2, 10, 4, 5]]);
}

#[test]
fn full_transmit_ring_waits_for_hardware_completion() {
    let (model, nic, config) = setup();
    let mut mailbox = Mailbox::new();
    for i in 0..=TX_RING_LEN {
        mailbox
            .push_packet(
                config.stack,
                RequestKind::Output.value(),
                &build_test_frame(i as u8, 46),
            )
            .unwrap();
    }

    // Hardware finishes the oldest fetched frame the first time the pump has to wait.
    let waits = Cell::new(0);
    let wire = RefCell::new(Vec::new());
    let device = model.clone();
    let on_wait = backoff::from_fn(|| {
        waits.set(waits.get() + 1);
        if waits.get() == 1 {
            wire.borrow_mut().extend(device.write_back_tx(1));
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    });

    let mut pump = OutputPump::new(nic.clone(), &mut mailbox, on_wait, config.stack);
    for _ in 0..=TX_RING_LEN {
        assert!(pump.pump_one().is_continue());
        // The device pulls each published descriptor but holds DD until the frame is out.
        model.fetch_tx();
    }
    let stats = pump.stats();
    drop(pump);

    assert_eq!(stats.transmitted, TX_RING_LEN as u64 + 1);
    assert_eq!(stats.ring_full_retries, 1);
    assert_eq!(waits.get(), 1);
    assert_eq!(nic.borrow().tx_ring().tail(), 1);
    assert_eq!(wire.into_inner(), vec![build_test_frame(0, 46)]);

    let rest = model.poll_tx();
    assert_eq!(rest.len(), TX_RING_LEN);
    assert_eq!(rest[0], build_test_frame(1, 46));
    assert_eq!(rest[TX_RING_LEN - 1], build_test_frame(TX_RING_LEN as u8, 46));
}

#[test]
fn one_driver_serves_both_directions() {
    let (model, nic, config) = setup();
    let mut to_stack = Mailbox::new();
    let mut from_stack = Mailbox::new();
    from_stack
        .push_packet(config.stack, RequestKind::Output.value(), &build_test_frame(9, 20))
        .unwrap();
    assert!(model.receive_frame(&build_test_frame(8, 20)));

    let mut input = InputPump::new(nic.clone(), &mut to_stack, BoundedRetries::new(0), config.stack);
    let mut output = OutputPump::new(nic.clone(), &mut from_stack, BoundedRetries::new(0), config.stack);
    assert!(input.pump_one().is_continue());
    assert!(output.pump_one().is_continue());
    drop((input, output));

    assert_eq!(to_stack.sent()[0].page.packet().unwrap(), build_test_frame(8, 20).as_slice());
    assert_eq!(model.poll_tx(), vec![build_test_frame(9, 20)]);
}
