//! End-to-end in-band interrupt delivery: fragments arriving on the bulk
//! endpoint, the notification on the interrupt endpoint, and the user
//! callback seeing the reassembled payload.

mod common;

use std::sync::{Arc, Mutex};

use common::*;

use rs_usbi3c::ibi::IbiDescriptor;
use rs_usbi3c::notification::{ibi_codes, notification_types};
use rs_usbi3c::I3cDevice;
use rs_usbi3c::wire;

fn controller_device() -> (Arc<MockTransport>, I3cDevice) {
    let mock = MockTransport::new();
    let device = I3cDevice::from_transport(mock.clone());
    device.initialize().unwrap();
    (mock, device)
}

type IbiRecord = (u16, IbiDescriptor, Vec<u8>);

fn capture_ibis(device: &I3cDevice) -> Arc<Mutex<Vec<IbiRecord>>> {
    let received: Arc<Mutex<Vec<IbiRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    device.on_ibi(Box::new(move |report, descriptor, data| {
        sink.lock().unwrap().push((report, *descriptor, data.to_vec()));
    }));
    received
}

#[test]
fn fragmented_ibi_payload_reaches_the_callback_assembled() {
    let (mock, device) = controller_device();
    let received = capture_ibis(&device);

    // MDB 0x47 (group 2, id 7), then payload continuing over two frames,
    // with only two bytes of the second frame's last DWORD valid
    mock.deliver_bulk_response(&wire::build_ibi_response_frame(
        0,
        &[0x47, 0x01, 0x02, 0x03],
        &wire::IbiResponseFooter {
            target_address: 0x15,
            read_not_write: true,
            pending_read: true,
            ..Default::default()
        },
    ));
    mock.deliver_bulk_response(&wire::build_ibi_response_frame(
        1,
        &[0x04, 0x05, 0x00, 0x00],
        &wire::IbiResponseFooter {
            target_address: 0x15,
            read_not_write: true,
            pending_read: true,
            last_byte: true,
            bytes_valid: 2,
            ..Default::default()
        },
    ));
    mock.deliver_notification(
        notification_types::I3C_IBI,
        ibi_codes::REGULAR_IBI_PAYLOAD_ACKED,
    );

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (report, descriptor, payload) = &received[0];
    assert_eq!(*report, ibi_codes::REGULAR_IBI_PAYLOAD_ACKED);
    assert_eq!(descriptor.address, 0x15);
    assert_eq!(descriptor.mdb, 0x47);
    assert_eq!(descriptor.interrupt_group_id(), 2);
    assert_eq!(descriptor.specific_interrupt_id(), 7);
    // the payload is the concatenation of the fragments, last DWORD
    // truncated to bytes_valid
    assert_eq!(payload, &[0x47, 0x01, 0x02, 0x03, 0x04, 0x05]);
}

#[test]
fn notification_before_response_data_still_pairs_up() {
    let (mock, device) = controller_device();
    let received = capture_ibis(&device);

    mock.deliver_notification(
        notification_types::I3C_IBI,
        ibi_codes::REGULAR_IBI_PAYLOAD_ACKED,
    );
    assert!(received.lock().unwrap().is_empty());

    mock.deliver_bulk_response(&wire::build_ibi_response_frame(
        0,
        &[0xAB, 0x00, 0x00, 0x00],
        &wire::IbiResponseFooter {
            target_address: 0x21,
            pending_read: true,
            last_byte: true,
            ..Default::default()
        },
    ));

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1.address, 0x21);
}

#[test]
fn consecutive_ibis_pair_in_arrival_order() {
    let (mock, device) = controller_device();
    let received = capture_ibis(&device);

    for (address, mdb) in [(0x10u8, 0x01u8), (0x20, 0x02)] {
        mock.deliver_bulk_response(&wire::build_ibi_response_frame(
            0,
            &[mdb, 0, 0, 0],
            &wire::IbiResponseFooter {
                target_address: address,
                pending_read: true,
                last_byte: true,
                ..Default::default()
            },
        ));
        mock.deliver_notification(
            notification_types::I3C_IBI,
            ibi_codes::REGULAR_IBI_PAYLOAD_ACKED,
        );
    }

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].1.address, 0x10);
    assert_eq!(received[0].1.mdb, 0x01);
    assert_eq!(received[1].1.address, 0x20);
    assert_eq!(received[1].1.mdb, 0x02);
}

#[test]
fn hot_join_ibi_report_reaches_the_callback() {
    let (mock, device) = controller_device();
    let received = capture_ibis(&device);

    mock.deliver_bulk_response(&wire::build_ibi_response_frame(
        0,
        &[],
        &wire::IbiResponseFooter {
            target_address: 0x02,
            last_byte: true,
            ..Default::default()
        },
    ));
    mock.deliver_notification(notification_types::I3C_IBI, ibi_codes::HOTJOIN_IBI_ACKED);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, ibi_codes::HOTJOIN_IBI_ACKED);
    assert!(received[0].2.is_empty());
}
