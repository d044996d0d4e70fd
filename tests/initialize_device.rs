//! Initialization state machine scenarios: capability loading, address
//! assignment mode selection, bus initialization results, and the
//! target-role hot-join request.

mod common;

use common::*;

use rs_usbi3c::commands::Direction;
use rs_usbi3c::constants::{address_assignment, class_requests};
use rs_usbi3c::target_device::{TargetDeviceInfo, TargetType};
use rs_usbi3c::types::DeviceRole;
use rs_usbi3c::{Error, I3cDevice};
use rs_usbi3c::wire;

fn init_mode_sent(mock: &MockTransport) -> u16 {
    mock.control_out_log()
        .iter()
        .find(|record| record.request == class_requests::INITIALIZE_I3C_BUS)
        .expect("INITIALIZE_I3C_BUS was not sent")
        .value
}

#[test]
fn controller_aware_of_its_bus_lets_the_bridge_assign_addresses() {
    let mock = MockTransport::new();
    mock.set_capability(controller_capability(&[
        wire::CapabilityDeviceEntry {
            address: 100,
            pid_lo: 0x1111,
            pid_hi: 0x2222,
            ..Default::default()
        },
        wire::CapabilityDeviceEntry {
            address: 101,
            pid_lo: 0x3333,
            pid_hi: 0x4444,
            ..Default::default()
        },
    ]));
    mock.set_table_buffer(table_with(&[100, 101]));

    let device = I3cDevice::from_transport(mock.clone());
    device.initialize().unwrap();

    assert_eq!(device.device_role().unwrap(), DeviceRole::PrimaryController);
    assert_eq!(device.device_address().unwrap(), 0x08);
    assert!(device.is_active_controller());
    assert_eq!(init_mode_sent(&mock), address_assignment::CONTROLLER_DECIDED);

    // the table mirrors what the bridge reported after initialization
    assert_eq!(device.address_list(), vec![100, 101]);
    assert_eq!(device.target_bcr(100).unwrap(), 0x42);
    assert_eq!(device.target_dcr(101).unwrap(), 0x17);

    // the default configuration went out to the bridge
    assert!(mock
        .control_out_log()
        .iter()
        .any(|record| record.request == class_requests::SET_TARGET_DEVICE_CONFIG));
}

#[test]
fn controller_without_capability_data_broadcasts_entdaa() {
    let mock = MockTransport::new();
    mock.set_capability(absent_capability());

    let device = I3cDevice::from_transport(mock.clone());
    device.initialize().unwrap();

    assert_eq!(device.device_role().unwrap(), DeviceRole::PrimaryController);
    assert_eq!(
        init_mode_sent(&mock),
        address_assignment::ENTER_DYNAMIC_ADDRESS_ASSIGNMENT
    );
}

#[test]
fn i2c_only_table_uses_static_addresses() {
    let mock = MockTransport::new();
    let device = I3cDevice::from_transport(mock.clone());

    device
        .add_device_to_table(TargetDeviceInfo {
            device_type: TargetType::I2c,
            static_address: 0x20,
            ..Default::default()
        })
        .unwrap();

    device.initialize().unwrap();
    assert_eq!(
        init_mode_sent(&mock),
        address_assignment::SET_STATIC_ADDRESS_AS_DYNAMIC
    );
}

#[test]
fn i3c_only_table_uses_entdaa() {
    let mock = MockTransport::new();
    let device = I3cDevice::from_transport(mock.clone());

    device
        .add_device_to_table(TargetDeviceInfo {
            device_type: TargetType::I3c,
            provisioned_id: 0xBEEF_CAFE,
            ..Default::default()
        })
        .unwrap();

    device.initialize().unwrap();
    assert_eq!(
        init_mode_sent(&mock),
        address_assignment::ENTER_DYNAMIC_ADDRESS_ASSIGNMENT
    );
}

#[test]
fn mixed_table_lets_the_bridge_decide() {
    let mock = MockTransport::new();
    let device = I3cDevice::from_transport(mock.clone());

    device
        .add_device_to_table(TargetDeviceInfo {
            device_type: TargetType::I2c,
            static_address: 0x20,
            ..Default::default()
        })
        .unwrap();
    device
        .add_device_to_table(TargetDeviceInfo {
            device_type: TargetType::I3c,
            provisioned_id: 0xBEEF_CAFE,
            ..Default::default()
        })
        .unwrap();

    device.initialize().unwrap();
    assert_eq!(init_mode_sent(&mock), address_assignment::CONTROLLER_DECIDED);
}

#[test]
fn bus_initialization_failure_fails_the_device() {
    let mock = MockTransport::new();
    mock.set_bus_init_code(0x2);

    let device = I3cDevice::from_transport(mock.clone());
    let error = device.initialize().unwrap_err();
    assert!(matches!(
        error.downcast_ref(),
        Some(Error::BusInitFailed { code: 0x2 })
    ));
    assert!(!device.is_active_controller());
}

#[test]
fn target_role_requests_a_hot_join() {
    let mock = MockTransport::new();
    mock.set_capability(target_capability(false));

    let device = I3cDevice::from_transport(mock.clone());
    device.initialize().unwrap();

    assert_eq!(device.device_role().unwrap(), DeviceRole::Target);
    assert!(!device.is_active_controller());

    // the hot-join went out as a single write to the reserved address
    let frames = mock.bulk_out_log();
    assert_eq!(frames.len(), 1);
    let block = wire::parse_command_block(&frames[0], wire::BULK_TRANSFER_HEADER_SIZE).unwrap();
    assert_eq!(block.descriptor.target_address, 0x02);
    assert_eq!(block.descriptor.direction, Direction::Write);
}

#[test]
fn duplicate_devices_are_rejected_when_added_manually() {
    let mock = MockTransport::new();
    let device = I3cDevice::from_transport(mock.clone());

    let i2c = TargetDeviceInfo {
        device_type: TargetType::I2c,
        static_address: 0x20,
        ..Default::default()
    };
    device.add_device_to_table(i2c).unwrap();
    assert!(device.add_device_to_table(i2c).is_err());

    // an I2C device needs a static address, an I3C device a PID
    assert!(device
        .add_device_to_table(TargetDeviceInfo {
            device_type: TargetType::I2c,
            ..Default::default()
        })
        .is_err());
    assert!(device
        .add_device_to_table(TargetDeviceInfo {
            device_type: TargetType::I3c,
            ..Default::default()
        })
        .is_err());
}
