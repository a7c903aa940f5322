extern crate hci_central;

mod fixture;

use fixture::*;
use hci_central::command::ConnectParameters;
use hci_central::{CentralEvent, Config, ConnectError, Error};

fn create_connection(address: &[u8; 6]) -> Vec<u8> {
    let mut params = vec![0x60, 0x00, 0x30, 0x00, 0x00, 0x01];
    params.extend_from_slice(address);
    params.extend_from_slice(&[
        0x00, 0x06, 0x00, 0x12, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x04, 0x00, 0x06, 0x00,
    ]);
    command(LE_CREATE_CONNECTION, &params)
}

fn failed_connection(handle: u16, address: &[u8; 6], status: u8) -> Vec<u8> {
    let mut packet = le_connection_complete(handle, address);
    packet[4] = status;
    packet
}

const MTU_REQUEST: [u8; 12] = [
    0x02, 0x40, 0x00, 0x07, 0x00, 0x03, 0x00, 0x04, 0x00, 0x02, 0x00, 0x01,
];

#[test]
fn connects_to_a_discovered_peripheral() {
    let mut fixture = Fixture::discovered();
    let id = peripheral_id();

    fixture.central.connect(&id, None).unwrap();
    assert_eq!(fixture.written(), vec![create_connection(&PERIPHERAL)]);

    fixture.receive(le_connection_complete(HANDLE, &PERIPHERAL));
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::Connect {
            id: id.clone(),
            result: Ok(()),
        }]
    );
    assert_eq!(fixture.written(), vec![MTU_REQUEST.to_vec()]);
    assert!(fixture.central.is_connected(&id));
    assert_eq!(fixture.central.gatt(&id).map(|gatt| gatt.mtu()), Some(23));
}

#[test]
fn custom_connection_parameters() {
    let mut fixture = Fixture::discovered();
    let parameters = ConnectParameters {
        min_interval: 0x0018,
        max_interval: 0x0028,
        latency: 0x0001,
        supervision_timeout: 0x0100,
    };

    fixture
        .central
        .connect(&peripheral_id(), Some(parameters))
        .unwrap();
    let written = fixture.written();
    assert_eq!(written.len(), 1);
    assert_eq!(
        &written[0][17..25],
        &[0x18, 0x00, 0x28, 0x00, 0x01, 0x00, 0x00, 0x01]
    );
}

#[test]
fn connection_attempts_run_one_at_a_time() {
    let mut fixture = Fixture::discovered();
    let id = peripheral_id();
    let other = other_peripheral_id();

    fixture.central.connect(&id, None).unwrap();
    fixture.central.connect(&other, None).unwrap();
    assert_eq!(fixture.written(), vec![create_connection(&PERIPHERAL)]);

    fixture.receive(le_connection_complete(HANDLE, &PERIPHERAL));
    assert_eq!(
        fixture.written(),
        vec![MTU_REQUEST.to_vec(), create_connection(&OTHER_PERIPHERAL)]
    );

    fixture.receive(le_connection_complete(OTHER_HANDLE, &OTHER_PERIPHERAL));
    assert_eq!(
        fixture.events(),
        vec![
            CentralEvent::Connect {
                id: id.clone(),
                result: Ok(()),
            },
            CentralEvent::Connect {
                id: other.clone(),
                result: Ok(()),
            },
        ]
    );
    assert!(fixture.central.is_connected(&id));
    assert!(fixture.central.is_connected(&other));
}

#[test]
fn rejected_command_fails_the_attempt() {
    let mut fixture = Fixture::discovered();
    let id = peripheral_id();
    let other = other_peripheral_id();

    fixture.central.connect(&id, None).unwrap();
    fixture.central.connect(&other, None).unwrap();
    fixture.written();

    fixture.receive(command_status(LE_CREATE_CONNECTION, 0x0c));
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::Connect {
            id: id.clone(),
            result: Err(ConnectError { status: 0x0c }),
        }]
    );
    assert_eq!(
        fixture.written(),
        vec![create_connection(&OTHER_PERIPHERAL)]
    );
    assert!(!fixture.central.is_connected(&id));
}

#[test]
fn pending_command_status_is_not_a_failure() {
    let mut fixture = Fixture::discovered();
    fixture.central.connect(&peripheral_id(), None).unwrap();
    fixture.receive(command_status(LE_CREATE_CONNECTION, 0x00));
    assert!(fixture.events().is_empty());
}

#[test]
fn canceled_attempt_fails() {
    let mut fixture = Fixture::discovered();
    let id = peripheral_id();

    fixture.central.connect(&id, None).unwrap();
    fixture.written();

    fixture.central.cancel_connect(&id).unwrap();
    assert_eq!(
        fixture.written(),
        vec![command(LE_CREATE_CONNECTION_CANCEL, &[])]
    );

    fixture.receive(failed_connection(0x0000, &[0; 6], 0x02));
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::Connect {
            id,
            result: Err(ConnectError { status: 0x02 }),
        }]
    );
}

#[test]
fn canceling_a_queued_attempt_drops_it() {
    let mut fixture = Fixture::discovered();
    let id = peripheral_id();
    let other = other_peripheral_id();

    fixture.central.connect(&id, None).unwrap();
    fixture.central.connect(&other, None).unwrap();
    fixture.written();

    fixture.central.cancel_connect(&other).unwrap();
    assert!(fixture.written().is_empty());

    fixture.receive(le_connection_complete(HANDLE, &PERIPHERAL));
    assert_eq!(fixture.written(), vec![MTU_REQUEST.to_vec()]);
}

#[test]
fn unknown_peripherals_cannot_be_connected() {
    let mut fixture = Fixture::powered_on();
    match fixture.central.connect(&peripheral_id(), None) {
        Err(Error::UnknownPeripheral(id)) => assert_eq!(id, peripheral_id()),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(fixture.written().is_empty());
}

#[test]
fn peripheral_role_connections_are_ignored() {
    let mut fixture = Fixture::discovered();
    let mut packet = le_connection_complete(HANDLE, &PERIPHERAL);
    packet[7] = 0x01;
    fixture.receive(packet);

    assert!(fixture.events().is_empty());
    assert!(fixture.written().is_empty());
    assert!(!fixture.central.is_connected(&peripheral_id()));
}

#[test]
fn disconnect_cleans_up() {
    let mut fixture = Fixture::connected();
    let id = peripheral_id();

    fixture.central.disconnect(&id).unwrap();
    assert_eq!(
        fixture.written(),
        vec![command(DISCONNECT, &[0x40, 0x00, 0x13])]
    );

    fixture.receive(disconnection_complete(HANDLE, 0x16));
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::Disconnect {
            id: id.clone(),
            reason: 0x16,
        }]
    );
    assert!(!fixture.central.is_connected(&id));
    assert!(fixture.central.gatt(&id).is_none());
    assert!(fixture.central.read_handle(&id, 0x0003).is_err());

    // Data for the old handle goes nowhere.
    fixture.receive(l2cap(HANDLE, 0x0004, &[0x1b, 0x03, 0x00, 0x01]));
    assert!(fixture.events().is_empty());

    // Still known, so it can be connected again.
    fixture.central.connect(&id, None).unwrap();
    assert_eq!(fixture.written(), vec![create_connection(&PERIPHERAL)]);
}

#[test]
fn parameter_update_requests_are_applied_and_answered() {
    let mut fixture = Fixture::connected();
    fixture.receive(l2cap(
        HANDLE,
        0x0005,
        &[0x12, 0x01, 0x08, 0x00, 0x06, 0x00, 0x0c, 0x00, 0x00, 0x00, 0xc8, 0x00],
    ));

    assert_eq!(
        fixture.written(),
        vec![
            command(
                LE_CONNECTION_UPDATE,
                &[0x40, 0x00, 0x06, 0x00, 0x0c, 0x00, 0x00, 0x00, 0xc8, 0x00, 0x00, 0x00, 0x00, 0x00]
            ),
            vec![0x02, 0x40, 0x00, 0x0a, 0x00, 0x06, 0x00, 0x05, 0x00, 0x13, 0x01, 0x02, 0x00, 0x00, 0x00],
        ]
    );
}

#[test]
fn kernel_answers_parameter_updates_on_the_raw_channel() {
    let mut fixture = Fixture::powered_on_with(Config {
        kernel_accepts_parameter_updates: true,
        ..Config::default()
    });
    fixture.central.start_scanning(&[], true).unwrap();
    fixture.receive(command_complete(LE_SET_SCAN_ENABLE, 0, &[]));
    fixture.receive(advertising_report(0x03, 0x01, &PERIPHERAL, &[], -70));
    fixture.central.connect(&peripheral_id(), None).unwrap();
    fixture.receive(le_connection_complete(HANDLE, &PERIPHERAL));
    fixture.written();

    fixture.receive(l2cap(
        HANDLE,
        0x0005,
        &[0x12, 0x01, 0x08, 0x00, 0x06, 0x00, 0x0c, 0x00, 0x00, 0x00, 0xc8, 0x00],
    ));
    let written = fixture.written();
    assert_eq!(written.len(), 1);
    assert_eq!(&written[0][..4], &[0x01, 0x13, 0x20, 0x0e]);
}

#[test]
fn rssi_is_read_per_connection() {
    let mut fixture = Fixture::connected();
    let id = peripheral_id();

    fixture.central.update_rssi(&id).unwrap();
    assert_eq!(fixture.written(), vec![command(READ_RSSI, &[0x40, 0x00])]);

    fixture.receive(command_complete(READ_RSSI, 0, &[0x40, 0x00, 0xc4]));
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::RssiUpdate { id, rssi: -60 }]
    );
}

#[test]
fn random_address_is_written() {
    let mut fixture = Fixture::powered_on();
    fixture
        .central
        .set_random_address(&"c0:01:02:03:04:05".parse().unwrap())
        .unwrap();
    assert_eq!(
        fixture.written(),
        vec![command(0x2005, &[0x05, 0x04, 0x03, 0x02, 0x01, 0xc0])]
    );
}

#[test]
fn exit_stops_scanning_and_disconnects() {
    let mut fixture = Fixture::connected();
    fixture.central.on_exit();

    assert_eq!(
        fixture.written(),
        vec![
            command(LE_SET_SCAN_ENABLE, &[0x00, 0x01]),
            command(DISCONNECT, &[0x40, 0x00, 0x13]),
        ]
    );
}

#[test]
fn refused_write_still_starts_the_next_attempt() {
    let mut fixture = Fixture::discovered();
    let id = peripheral_id();

    fixture.central.connect(&id, None).unwrap();
    fixture.central.connect(&other_peripheral_id(), None).unwrap();
    fixture.written();

    fixture.socket().refuse_writes = 1;
    fixture.receive(le_connection_complete(HANDLE, &PERIPHERAL));
    assert_eq!(
        fixture.written(),
        vec![create_connection(&OTHER_PERIPHERAL)]
    );
    assert_eq!(
        fixture.events(),
        vec![CentralEvent::Connect {
            id: id.clone(),
            result: Ok(()),
        }]
    );

    // The MTU request was kept and goes out with the next flush.
    fixture.receive(number_of_completed_packets(HANDLE, 0));
    assert_eq!(fixture.written(), vec![MTU_REQUEST.to_vec()]);
}
