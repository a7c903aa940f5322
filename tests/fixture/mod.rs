#![allow(dead_code)]

extern crate env_logger;
extern crate hci_central;
extern crate nb;

use hci_central::{Central, CentralEvent, Config, HciSocket, PeripheralId};
use std::collections::VecDeque;
use std::io;
use std::mem;

pub const RESET: u16 = 0x0c03;
pub const SET_EVENT_MASK: u16 = 0x0c01;
pub const READ_LE_HOST_SUPPORTED: u16 = 0x0c6c;
pub const WRITE_LE_HOST_SUPPORTED: u16 = 0x0c6d;
pub const DISCONNECT: u16 = 0x0406;
pub const READ_LOCAL_VERSION: u16 = 0x1001;
pub const READ_SUPPORTED_COMMANDS: u16 = 0x1002;
pub const READ_BD_ADDR: u16 = 0x1009;
pub const READ_RSSI: u16 = 0x1405;
pub const LE_SET_EVENT_MASK: u16 = 0x2001;
pub const LE_READ_BUFFER_SIZE: u16 = 0x2002;
pub const LE_SET_SCAN_PARAMETERS: u16 = 0x200b;
pub const LE_SET_SCAN_ENABLE: u16 = 0x200c;
pub const LE_CREATE_CONNECTION: u16 = 0x200d;
pub const LE_CREATE_CONNECTION_CANCEL: u16 = 0x200e;
pub const LE_CONNECTION_UPDATE: u16 = 0x2013;

/// Wire order of c4:7c:8d:66:d3:a1.
pub const PERIPHERAL: [u8; 6] = [0xa1, 0xd3, 0x66, 0x8d, 0x7c, 0xc4];
/// Wire order of c4:7c:8d:66:d3:a2.
pub const OTHER_PERIPHERAL: [u8; 6] = [0xa2, 0xd3, 0x66, 0x8d, 0x7c, 0xc4];

pub const HANDLE: u16 = 0x0040;
pub const OTHER_HANDLE: u16 = 0x0041;

/// Controller ACL geometry used by [`Fixture::powered_on`].
pub const ACL_LENGTH: u16 = 27;
pub const ACL_NUM: u8 = 8;

pub struct MockSocket {
    pub written: Vec<Vec<u8>>,
    pub incoming: VecDeque<Vec<u8>>,
    pub dev_up: bool,
    pub filter: Option<Vec<u8>>,
    pub bound_user: bool,
    pub deny_bind: bool,
    /// Number of upcoming writes to refuse.
    pub refuse_writes: usize,
}

impl MockSocket {
    pub fn new() -> MockSocket {
        MockSocket {
            written: Vec::new(),
            incoming: VecDeque::new(),
            dev_up: true,
            filter: None,
            bound_user: false,
            deny_bind: false,
            refuse_writes: 0,
        }
    }

    fn bind(&mut self) -> io::Result<u16> {
        if self.deny_bind {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        } else {
            Ok(0)
        }
    }
}

impl HciSocket for MockSocket {
    fn bind_raw(&mut self, _device_id: Option<u16>) -> io::Result<u16> {
        self.bind()
    }

    fn bind_user(&mut self, _device_id: Option<u16>) -> io::Result<u16> {
        let device_id = self.bind()?;
        self.bound_user = true;
        Ok(device_id)
    }

    fn set_filter(&mut self, filter: &[u8]) -> io::Result<()> {
        self.filter = Some(filter.to_vec());
        Ok(())
    }

    fn is_dev_up(&mut self) -> io::Result<bool> {
        Ok(self.dev_up)
    }

    fn write(&mut self, packet: &[u8]) -> nb::Result<(), io::Error> {
        if self.refuse_writes > 0 {
            self.refuse_writes -= 1;
            return Err(nb::Error::Other(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.written.push(packet.to_vec());
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> nb::Result<usize, io::Error> {
        match self.incoming.pop_front() {
            Some(packet) => {
                buffer[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => Err(nb::Error::WouldBlock),
        }
    }
}

pub struct Fixture {
    pub central: Central<MockSocket>,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture::with_config(Config {
            kernel_accepts_parameter_updates: false,
            ..Config::default()
        })
    }

    pub fn with_config(config: Config) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        Fixture {
            central: Central::new(MockSocket::new(), config),
        }
    }

    /// Brought up on the raw channel with a controller that reports LE buffers and a recent HCI
    /// version. Nothing written or reported so far is kept.
    pub fn powered_on() -> Fixture {
        Fixture::powered_on_with(Config {
            kernel_accepts_parameter_updates: false,
            ..Config::default()
        })
    }

    pub fn powered_on_with(config: Config) -> Fixture {
        let mut fixture = Fixture::with_config(config);
        fixture.central.init().unwrap();
        fixture.receive(command_complete(
            LE_READ_BUFFER_SIZE,
            0,
            &[ACL_LENGTH as u8, 0x00, ACL_NUM],
        ));
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
        fixture.receive(command_complete(LE_SET_SCAN_PARAMETERS, 0, &[]));
        fixture.written();
        fixture.events();
        fixture
    }

    /// Powered on and scanning, with both peripherals discovered.
    pub fn discovered() -> Fixture {
        let mut fixture = Fixture::powered_on();
        fixture.central.start_scanning(&[], true).unwrap();
        fixture.receive(command_complete(LE_SET_SCAN_ENABLE, 0, &[]));
        for address in &[PERIPHERAL, OTHER_PERIPHERAL] {
            fixture.receive(advertising_report(0x03, 0x01, address, &[], -70));
        }
        fixture.written();
        fixture.events();
        fixture
    }

    /// Connected to [`PERIPHERAL`] on [`HANDLE`], with the MTU exchange answered.
    pub fn connected() -> Fixture {
        let mut fixture = Fixture::discovered();
        fixture.central.connect(&peripheral_id(), None).unwrap();
        fixture.receive(le_connection_complete(HANDLE, &PERIPHERAL));
        fixture.receive(l2cap(HANDLE, 0x0004, &[0x03, 0x00, 0x01]));
        fixture.receive(number_of_completed_packets(HANDLE, 1));
        fixture.written();
        fixture.events();
        fixture
    }

    pub fn socket(&mut self) -> &mut MockSocket {
        self.central.socket_mut()
    }

    pub fn receive(&mut self, packet: Vec<u8>) {
        self.socket().incoming.push_back(packet);
        self.central.process();
    }

    pub fn written(&mut self) -> Vec<Vec<u8>> {
        mem::replace(&mut self.socket().written, Vec::new())
    }

    pub fn events(&mut self) -> Vec<CentralEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.central.next_event() {
            events.push(event);
        }
        events
    }
}

pub fn peripheral_id() -> PeripheralId {
    "c4:7c:8d:66:d3:a1"
        .parse::<hci_central::Address>()
        .map(|address| PeripheralId::from(&address))
        .unwrap()
}

pub fn other_peripheral_id() -> PeripheralId {
    "c4:7c:8d:66:d3:a2"
        .parse::<hci_central::Address>()
        .map(|address| PeripheralId::from(&address))
        .unwrap()
}

pub fn command(opcode: u16, params: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x01, opcode as u8, (opcode >> 8) as u8, params.len() as u8];
    packet.extend_from_slice(params);
    packet
}

pub fn command_complete(opcode: u16, status: u8, params: &[u8]) -> Vec<u8> {
    let mut packet = vec![
        0x04,
        0x0e,
        4 + params.len() as u8,
        0x01,
        opcode as u8,
        (opcode >> 8) as u8,
        status,
    ];
    packet.extend_from_slice(params);
    packet
}

pub fn command_status(opcode: u16, status: u8) -> Vec<u8> {
    vec![0x04, 0x0f, 0x04, status, 0x01, opcode as u8, (opcode >> 8) as u8]
}

pub fn le_connection_complete(handle: u16, address: &[u8; 6]) -> Vec<u8> {
    let mut packet = vec![0x04, 0x3e, 19, 0x01, 0x00, handle as u8, (handle >> 8) as u8];
    packet.push(0x00); // central
    packet.push(0x01); // random address
    packet.extend_from_slice(address);
    packet.extend_from_slice(&[0x18, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x01]);
    packet
}

pub fn disconnection_complete(handle: u16, reason: u8) -> Vec<u8> {
    vec![0x04, 0x05, 0x04, 0x00, handle as u8, (handle >> 8) as u8, reason]
}

pub fn encryption_change(handle: u16, encrypted: bool) -> Vec<u8> {
    vec![
        0x04,
        0x08,
        0x04,
        0x00,
        handle as u8,
        (handle >> 8) as u8,
        encrypted as u8,
    ]
}

pub fn number_of_completed_packets(handle: u16, count: u16) -> Vec<u8> {
    vec![
        0x04,
        0x13,
        0x05,
        0x01,
        handle as u8,
        (handle >> 8) as u8,
        count as u8,
        (count >> 8) as u8,
    ]
}

pub fn advertising_report(
    event_type: u8,
    address_type: u8,
    address: &[u8; 6],
    data: &[u8],
    rssi: i8,
) -> Vec<u8> {
    let mut packet = vec![0x04, 0x3e, 12 + data.len() as u8, 0x02, 0x01, event_type, address_type];
    packet.extend_from_slice(address);
    packet.push(data.len() as u8);
    packet.extend_from_slice(data);
    packet.push(rssi as u8);
    packet
}

/// One ACL packet; `boundary` is the two-bit packet boundary flag.
pub fn acl(handle: u16, boundary: u16, payload: &[u8]) -> Vec<u8> {
    let header = handle | (boundary << 12);
    let mut packet = vec![
        0x02,
        header as u8,
        (header >> 8) as u8,
        payload.len() as u8,
        (payload.len() >> 8) as u8,
    ];
    packet.extend_from_slice(payload);
    packet
}

/// A whole L2CAP frame in one ACL packet, as a controller sends it.
pub fn l2cap(handle: u16, cid: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![
        data.len() as u8,
        (data.len() >> 8) as u8,
        cid as u8,
        (cid >> 8) as u8,
    ];
    payload.extend_from_slice(data);
    acl(handle, 0b10, &payload)
}

/// The ACL packet the host writes for a short L2CAP frame.
pub fn outgoing_l2cap(handle: u16, cid: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![
        data.len() as u8,
        (data.len() >> 8) as u8,
        cid as u8,
        (cid >> 8) as u8,
    ];
    payload.extend_from_slice(data);
    acl(handle, 0b00, &payload)
}

pub fn extended_advertising_report(
    event_type: u16,
    address: &[u8; 6],
    tx_power: i8,
    data: &[u8],
    rssi: i8,
) -> Vec<u8> {
    let mut packet = vec![0x04, 0x3e, 26 + data.len() as u8, 0x0d, 0x01];
    packet.extend_from_slice(&event_type.to_le_bytes());
    packet.push(0x01);
    packet.extend_from_slice(address);
    packet.extend_from_slice(&[0x01, 0x01, 0xff]); // PHYs, SID
    packet.push(tx_power as u8);
    packet.push(rssi as u8);
    packet.extend_from_slice(&[0x00, 0x00, 0x00]); // interval, direct address type
    packet.extend_from_slice(&[0; 6]);
    packet.push(data.len() as u8);
    packet.extend_from_slice(data);
    packet
}
