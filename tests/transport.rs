extern crate hci_central;

mod fixture;

use fixture::*;
use hci_central::gatt::GattEvent;
use hci_central::{CentralEvent, Config, ConnectionHandle, State};
use std::time::{Duration, Instant};

#[test]
fn raw_channel_bring_up() {
    let mut fixture = Fixture::new();
    fixture.central.init().unwrap();

    assert_eq!(
        fixture.written(),
        vec![
            command(SET_EVENT_MASK, &[0xff, 0xff, 0xfb, 0xff, 0x07, 0xf8, 0xbf, 0x3d]),
            command(LE_SET_EVENT_MASK, &[0x1f, 0, 0, 0, 0, 0, 0, 0]),
            command(READ_SUPPORTED_COMMANDS, &[]),
            command(READ_LOCAL_VERSION, &[]),
            command(WRITE_LE_HOST_SUPPORTED, &[0x01, 0x00]),
            command(READ_LE_HOST_SUPPORTED, &[]),
            command(LE_READ_BUFFER_SIZE, &[]),
            command(READ_BD_ADDR, &[]),
        ]
    );
    assert_eq!(fixture.socket().filter.as_ref().map(Vec::len), Some(14));
    assert!(fixture.events().is_empty());
}

#[test]
fn supported_version_starts_scan_setup() {
    let mut fixture = Fixture::new();
    fixture.central.init().unwrap();
    fixture.written();

    fixture.receive(command_complete(
        READ_BD_ADDR,
        0,
        &[0x55, 0x44, 0x33, 0x22, 0x11, 0x00],
    ));
    fixture.receive(command_complete(
        READ_LOCAL_VERSION,
        0,
        &[0x09, 0x00, 0x00, 0x09, 0x0f, 0x00, 0x00, 0x00],
    ));
    assert_eq!(
        fixture.written(),
        vec![
            command(LE_SET_SCAN_ENABLE, &[0x00, 0x01]),
            command(
                LE_SET_SCAN_PARAMETERS,
                &[0x01, 0x12, 0x00, 0x12, 0x00, 0x00, 0x00]
            ),
        ]
    );

    fixture.receive(command_complete(LE_SET_SCAN_PARAMETERS, 0, &[]));
    assert_eq!(
        fixture.events(),
        vec![
            CentralEvent::AddressChange("00:11:22:33:44:55".parse().unwrap()),
            CentralEvent::StateChange(State::PoweredOn),
            CentralEvent::ScanParametersSet,
        ]
    );
    assert_eq!(fixture.central.state(), Some(State::PoweredOn));
}

#[test]
fn old_controllers_are_unsupported() {
    let mut fixture = Fixture::new();
    fixture.central.init().unwrap();
    fixture.written();

    fixture.receive(command_complete(
        READ_LOCAL_VERSION,
        0,
        &[0x05, 0x00, 0x00, 0x05, 0x0f, 0x00, 0x00, 0x00],
    ));
    assert!(fixture.written().is_empty());
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::StateChange(State::Unsupported)]
    );
}

#[test]
fn adapter_down_is_powered_off_until_it_comes_up() {
    let mut fixture = Fixture::new();
    fixture.socket().dev_up = false;
    fixture.central.init().unwrap();

    assert!(fixture.written().is_empty());
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::StateChange(State::PoweredOff)]
    );

    let start = Instant::now();
    fixture.central.tick(start);
    assert!(fixture.written().is_empty());

    fixture.socket().dev_up = true;
    fixture.central.tick(start + Duration::from_millis(500));
    assert!(fixture.written().is_empty());

    fixture.central.tick(start + Duration::from_millis(1000));
    let written = fixture.written();
    assert_eq!(written.len(), 8);
    assert_eq!(written[0], command(SET_EVENT_MASK, &[0xff, 0xff, 0xfb, 0xff, 0x07, 0xf8, 0xbf, 0x3d]));
}

#[test]
fn user_channel_resets_the_controller() {
    let mut fixture = Fixture::with_config(Config {
        user_channel: true,
        ..Config::default()
    });
    fixture.central.init().unwrap();
    assert!(fixture.socket().bound_user);
    assert_eq!(fixture.written(), vec![command(RESET, &[])]);

    fixture.receive(command_complete(RESET, 0, &[]));
    assert_eq!(
        fixture.written(),
        vec![
            command(SET_EVENT_MASK, &[0xff, 0xff, 0xfb, 0xff, 0x07, 0xf8, 0xbf, 0x3d]),
            command(LE_SET_EVENT_MASK, &[0x1f, 0, 0, 0, 0, 0, 0, 0]),
            command(READ_SUPPORTED_COMMANDS, &[]),
            command(READ_LOCAL_VERSION, &[]),
            command(LE_READ_BUFFER_SIZE, &[]),
            command(READ_BD_ADDR, &[]),
        ]
    );
}

#[test]
fn permission_denied_is_unauthorized() {
    let mut fixture = Fixture::new();
    fixture.socket().deny_bind = true;

    assert!(fixture.central.init().is_err());
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::StateChange(State::Unauthorized)]
    );
}

#[test]
fn extended_commands_are_used_when_supported() {
    let mut fixture = Fixture::new();
    fixture.central.init().unwrap();
    fixture.written();

    let mut supported = [0; 64];
    supported[37] = 0x30;
    fixture.receive(command_complete(READ_SUPPORTED_COMMANDS, 0, &supported));

    assert!(fixture.central.transport().is_extended());
    assert_eq!(
        fixture.written(),
        vec![command(LE_SET_EVENT_MASK, &[0x1f, 0xff, 0, 0, 0, 0, 0, 0])]
    );
}

#[test]
fn missing_le_buffers_fall_back_to_the_shared_buffers() {
    let mut fixture = Fixture::new();
    fixture.central.init().unwrap();
    fixture.written();

    fixture.receive(command_complete(LE_READ_BUFFER_SIZE, 0, &[0x00, 0x00, 0x00]));
    assert_eq!(fixture.written(), vec![command(0x1005, &[])]);

    fixture.receive(command_complete(0x1005, 0, &[0xfd, 0x03, 0x40, 0x0a, 0x00]));
    let buffers = fixture.central.transport().acl_buffers().unwrap();
    assert_eq!((buffers.length, buffers.num), (1021, 10));
}

#[test]
fn acl_writes_respect_controller_buffers() {
    let mut fixture = Fixture::connected();
    let id = peripheral_id();

    fixture
        .central
        .write_handle(&id, 0x0010, &[0x55; 200], true)
        .unwrap();
    // 203 byte PDU plus the L2CAP header, in 27 byte fragments.
    let written = fixture.written();
    assert_eq!(written.len(), usize::from(ACL_NUM));
    assert_eq!(&written[0][..12], &[0x02, 0x40, 0x00, 0x1b, 0x00, 0xcb, 0x00, 0x04, 0x00, 0x52, 0x10, 0x00]);
    assert!(written[1..].iter().all(|packet| packet[2] == 0x10));
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::Gatt {
            id: id.clone(),
            event: GattEvent::HandleWrite { handle: 0x0010 },
        }]
    );

    fixture
        .central
        .write_handle(&id, 0x0010, &[0x55; 200], true)
        .unwrap();
    assert!(fixture.written().is_empty());
    assert_eq!(
        fixture.central.transport().pending_packets(ConnectionHandle(HANDLE)),
        Some(usize::from(ACL_NUM))
    );

    fixture.receive(number_of_completed_packets(HANDLE, 3));
    assert_eq!(fixture.written().len(), 3);

    fixture.receive(number_of_completed_packets(HANDLE, 8));
    assert_eq!(fixture.written().len(), 5);
}

#[test]
fn disconnection_discards_queued_acl_data() {
    let mut fixture = Fixture::connected();
    let id = peripheral_id();

    for _ in 0..2 {
        fixture
            .central
            .write_handle(&id, 0x0010, &[0x55; 200], true)
            .unwrap();
    }
    assert_eq!(fixture.written().len(), usize::from(ACL_NUM));

    fixture.receive(disconnection_complete(HANDLE, 0x13));
    fixture.receive(number_of_completed_packets(HANDLE, 8));
    assert!(fixture.written().is_empty());
    assert_eq!(
        fixture.central.transport().pending_packets(ConnectionHandle(HANDLE)),
        None
    );
}

#[test]
fn fragmented_notifications_are_reassembled() {
    let mut fixture = Fixture::connected();

    // A 30 byte notification split over two packets.
    let mut pdu = vec![0x1b, 0x20, 0x00];
    pdu.extend((0u8..27).collect::<Vec<_>>());
    let mut first = vec![pdu.len() as u8, 0x00, 0x04, 0x00];
    first.extend_from_slice(&pdu[..10]);

    fixture.receive(acl(HANDLE, 0b10, &first));
    assert!(fixture.events().is_empty());

    fixture.receive(acl(HANDLE, 0b01, &pdu[10..]));
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::Gatt {
            id: peripheral_id(),
            event: GattEvent::HandleNotify {
                handle: 0x0020,
                data: (0u8..27).collect(),
            },
        }]
    );
}

#[test]
fn continuation_without_a_start_is_dropped() {
    let mut fixture = Fixture::connected();
    fixture.receive(acl(HANDLE, 0b01, &[0x1b, 0x20, 0x00, 0x01]));
    assert!(fixture.events().is_empty());
    assert!(fixture.written().is_empty());
}

#[test]
fn malformed_packets_are_dropped() {
    let mut fixture = Fixture::powered_on();
    fixture.receive(vec![0x04, 0x0e]);
    fixture.receive(vec![0x03, 0x00, 0x00]);
    fixture.receive(vec![0x04, 0x05, 0x04, 0x00]);
    assert!(fixture.events().is_empty());
    assert!(fixture.written().is_empty());
}

#[test]
fn extended_controllers_enable_the_coded_phy() {
    let mut fixture = Fixture::with_config(Config {
        extended: true,
        ..Config::default()
    });
    fixture.central.init().unwrap();

    let written = fixture.written();
    assert_eq!(written.len(), 9);
    assert_eq!(written[0], command(0x2031, &[0x00, 0x05, 0x05]));
    assert_eq!(
        written[2],
        command(LE_SET_EVENT_MASK, &[0x1f, 0xff, 0, 0, 0, 0, 0, 0])
    );
}

#[test]
fn refused_acl_write_is_retried_on_the_next_flush() {
    let mut fixture = Fixture::connected();
    let id = peripheral_id();

    fixture.socket().refuse_writes = 1;
    assert!(fixture
        .central
        .write_handle(&id, 0x0010, &[0x55; 200], true)
        .is_err());
    assert!(fixture.written().is_empty());
    assert_eq!(
        fixture.central.transport().pending_packets(ConnectionHandle(HANDLE)),
        Some(0)
    );

    fixture.receive(number_of_completed_packets(HANDLE, 0));
    let written = fixture.written();
    assert_eq!(written.len(), usize::from(ACL_NUM));
    assert_eq!(&written[0][..12], &[0x02, 0x40, 0x00, 0x1b, 0x00, 0xcb, 0x00, 0x04, 0x00, 0x52, 0x10, 0x00]);
}
