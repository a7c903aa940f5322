//! Parsing of packets received from the controller.
//!
//! The raw HCI socket delivers one packet per read. The first byte selects the packet class:
//! command (our own commands looped back by the kernel), ACL data, or event. [`Packet::new`]
//! splits that into typed values; LE meta events are flattened into the [`Event`] enum the same
//! way `bluetooth_hci` does it.

pub mod command;

use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;

use crate::types::{Address, AddressType};
use crate::Error;
use hci::ConnectionHandle;

pub use self::command::{CommandComplete, LocalVersion, ReturnParameters};
use crate::opcode::Opcode;

/// Packet type indicator of HCI command packets.
pub const COMMAND_PACKET: u8 = 0x01;
/// Packet type indicator of ACL data packets.
pub const ACL_DATA_PACKET: u8 = 0x02;
/// Packet type indicator of HCI event packets.
pub const EVENT_PACKET: u8 = 0x04;

const DISCONNECTION_COMPLETE: u8 = 0x05;
const ENCRYPTION_CHANGE: u8 = 0x08;
const COMMAND_COMPLETE: u8 = 0x0E;
const COMMAND_STATUS: u8 = 0x0F;
const NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
const LE_META_EVENT: u8 = 0x3E;

const LE_CONNECTION_COMPLETE: u8 = 0x01;
const LE_ADVERTISING_REPORT: u8 = 0x02;
const LE_CONNECTION_UPDATE_COMPLETE: u8 = 0x03;
const LE_ENHANCED_CONNECTION_COMPLETE: u8 = 0x0A;
const LE_EXTENDED_ADVERTISING_REPORT: u8 = 0x0D;

/// Events the socket filter lets through; the value for the `HCI_FILTER` socket option.
pub fn socket_filter() -> [u8; 14] {
    let type_mask: u32 =
        (1 << COMMAND_PACKET) | (1 << EVENT_PACKET) | (1 << ACL_DATA_PACKET);
    let event_mask1: u32 = (1 << DISCONNECTION_COMPLETE)
        | (1 << ENCRYPTION_CHANGE)
        | (1 << COMMAND_COMPLETE)
        | (1 << COMMAND_STATUS)
        | (1 << NUMBER_OF_COMPLETED_PACKETS);
    let event_mask2: u32 = 1 << (LE_META_EVENT - 32);

    let mut filter = [0; 14];
    LittleEndian::write_u32(&mut filter[0..4], type_mask);
    LittleEndian::write_u32(&mut filter[4..8], event_mask1);
    LittleEndian::write_u32(&mut filter[8..12], event_mask2);
    LittleEndian::write_u16(&mut filter[12..14], 0);
    filter
}

pub(crate) fn require(buffer: &[u8], len: usize) -> Result<(), Error> {
    if buffer.len() < len {
        return Err(Error::BadLength(buffer.len(), len));
    }
    Ok(())
}

/// One packet read from the HCI socket.
#[derive(Clone, Debug)]
pub enum Packet {
    /// A command written to the controller, as observed on the raw socket. This includes commands
    /// written by other processes sharing the adapter.
    Command(CommandPacket),
    /// A fragment of ACL data.
    AclData(AclPacket),
    /// An HCI event.
    Event(Event),
}

impl Packet {
    /// Parses a complete packet, including its packet type indicator.
    ///
    /// # Errors
    ///
    /// - [`Error::BadLength`] if the packet is shorter than its fixed fields.
    /// - [`Error::UnknownPacketType`] for SCO or vendor packet classes.
    pub fn new(buffer: &[u8]) -> Result<Packet, Error> {
        require(buffer, 1)?;
        match buffer[0] {
            COMMAND_PACKET => {
                require(buffer, 4)?;
                Ok(Packet::Command(CommandPacket {
                    opcode: Opcode(LittleEndian::read_u16(&buffer[1..3])),
                    parameters: buffer[4..].to_vec(),
                }))
            }
            ACL_DATA_PACKET => {
                require(buffer, 5)?;
                let header = LittleEndian::read_u16(&buffer[1..3]);
                Ok(Packet::AclData(AclPacket {
                    conn_handle: ConnectionHandle(header & 0x0FFF),
                    boundary: PacketBoundary::from((header >> 12) as u8 & 0b11),
                    data: buffer[5..].to_vec(),
                }))
            }
            EVENT_PACKET => Event::new(buffer).map(Packet::Event),
            other => Err(Error::UnknownPacketType(other)),
        }
    }
}

/// A command packet seen on the socket.
#[derive(Clone, Debug)]
pub struct CommandPacket {
    /// Command opcode.
    pub opcode: Opcode,
    /// Command parameters, without the length byte.
    pub parameters: Vec<u8>,
}

/// Packet boundary flag of an ACL data packet header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketBoundary {
    /// First fragment of a higher layer message, non-automatically-flushable. Used host to
    /// controller.
    FirstNonFlushable,
    /// Continuation fragment.
    Continuing,
    /// First fragment of a higher layer message, automatically flushable. Used controller to host.
    FirstFlushable,
    /// Reserved in LE.
    Complete,
}

impl PacketBoundary {
    /// The two-bit flag value.
    pub fn bits(self) -> u16 {
        match self {
            PacketBoundary::FirstNonFlushable => 0b00,
            PacketBoundary::Continuing => 0b01,
            PacketBoundary::FirstFlushable => 0b10,
            PacketBoundary::Complete => 0b11,
        }
    }
}

impl From<u8> for PacketBoundary {
    fn from(value: u8) -> PacketBoundary {
        match value & 0b11 {
            0b00 => PacketBoundary::FirstNonFlushable,
            0b01 => PacketBoundary::Continuing,
            0b10 => PacketBoundary::FirstFlushable,
            _ => PacketBoundary::Complete,
        }
    }
}

/// One ACL data fragment, header stripped.
#[derive(Clone, Debug)]
pub struct AclPacket {
    /// Connection the fragment belongs to.
    pub conn_handle: ConnectionHandle,
    /// Where the fragment sits in the L2CAP frame.
    pub boundary: PacketBoundary,
    /// Fragment payload. For a first fragment this starts with the L2CAP basic header.
    pub data: Vec<u8>,
}

/// Role of the local device on a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// We initiated the connection.
    Central,
    /// The remote device initiated the connection.
    Peripheral,
}

impl From<u8> for Role {
    fn from(value: u8) -> Role {
        if value == 0 {
            Role::Central
        } else {
            Role::Peripheral
        }
    }
}

/// HCI events this stack reacts to.
#[derive(Clone, Debug)]
pub enum Event {
    /// A connection was terminated.
    DisconnectionComplete(DisconnectionComplete),
    /// Link encryption was switched on or off.
    EncryptionChange(EncryptionChange),
    /// A command finished.
    CommandComplete(CommandComplete),
    /// A command was accepted (or rejected) and will complete later.
    CommandStatus(CommandStatus),
    /// The controller freed ACL buffers.
    NumberOfCompletedPackets(Vec<NumberOfCompletedPackets>),
    /// A connection was created, or creating it failed. Covers the enhanced variant as well.
    LeConnectionComplete(LeConnectionComplete),
    /// Legacy advertising reports. Reports after a malformed one are dropped.
    LeAdvertisingReport(Vec<AdvertisingReport>),
    /// Connection parameters changed.
    LeConnectionUpdateComplete(LeConnectionUpdateComplete),
    /// Extended advertising reports. Reports after a malformed one are dropped.
    LeExtendedAdvertisingReport(Vec<ExtendedAdvertisingReport>),
    /// An event the stack does not interpret: the event code, or the LE subevent code for LE meta
    /// events.
    Unknown(u8),
}

impl Event {
    /// Parses an event packet, including the packet type indicator.
    ///
    /// # Errors
    ///
    /// [`Error::BadLength`] if the fixed fields of the event do not fit in the packet.
    pub fn new(buffer: &[u8]) -> Result<Event, Error> {
        require(buffer, 3)?;
        match buffer[1] {
            DISCONNECTION_COMPLETE => {
                require(buffer, 7)?;
                Ok(Event::DisconnectionComplete(DisconnectionComplete {
                    status: buffer[3],
                    conn_handle: ConnectionHandle(LittleEndian::read_u16(&buffer[4..6])),
                    reason: buffer[6],
                }))
            }
            ENCRYPTION_CHANGE => {
                require(buffer, 7)?;
                Ok(Event::EncryptionChange(EncryptionChange {
                    status: buffer[3],
                    conn_handle: ConnectionHandle(LittleEndian::read_u16(&buffer[4..6])),
                    encrypted: buffer[6] != 0,
                }))
            }
            COMMAND_COMPLETE => {
                require(buffer, 7)?;
                let opcode = Opcode(LittleEndian::read_u16(&buffer[4..6]));
                let status = buffer[6];
                Ok(Event::CommandComplete(CommandComplete {
                    opcode,
                    status,
                    return_params: ReturnParameters::new(opcode, status, &buffer[7..])?,
                }))
            }
            COMMAND_STATUS => {
                require(buffer, 7)?;
                Ok(Event::CommandStatus(CommandStatus {
                    status: buffer[3],
                    opcode: Opcode(LittleEndian::read_u16(&buffer[5..7])),
                }))
            }
            NUMBER_OF_COMPLETED_PACKETS => {
                require(buffer, 4)?;
                let count = usize::from(buffer[3]);
                require(buffer, 4 + 4 * count)?;
                Ok(Event::NumberOfCompletedPackets(
                    buffer[4..4 + 4 * count]
                        .chunks(4)
                        .map(|entry| NumberOfCompletedPackets {
                            conn_handle: ConnectionHandle(LittleEndian::read_u16(&entry[0..2])),
                            num_completed_packets: LittleEndian::read_u16(&entry[2..4]),
                        })
                        .collect(),
                ))
            }
            LE_META_EVENT => {
                require(buffer, 5)?;
                to_le_meta_event(buffer[3], buffer[4], &buffer[5..])
            }
            other => Ok(Event::Unknown(other)),
        }
    }
}

fn to_le_meta_event(subevent: u8, status: u8, data: &[u8]) -> Result<Event, Error> {
    match subevent {
        LE_CONNECTION_COMPLETE => {
            require(data, 17)?;
            Ok(Event::LeConnectionComplete(LeConnectionComplete {
                status,
                conn_handle: ConnectionHandle(LittleEndian::read_u16(&data[0..2])),
                role: Role::from(data[2]),
                peer_address_type: AddressType::from(data[3]),
                peer_address: Address::from_le_bytes(&data[4..10])?,
                conn_interval: to_interval(LittleEndian::read_u16(&data[10..12])),
                conn_latency: LittleEndian::read_u16(&data[12..14]),
                supervision_timeout: to_timeout(LittleEndian::read_u16(&data[14..16])),
                central_clock_accuracy: data[16],
            }))
        }
        LE_ENHANCED_CONNECTION_COMPLETE => {
            require(data, 29)?;
            Ok(Event::LeConnectionComplete(LeConnectionComplete {
                status,
                conn_handle: ConnectionHandle(LittleEndian::read_u16(&data[0..2])),
                role: Role::from(data[2]),
                peer_address_type: AddressType::from(data[3]),
                peer_address: Address::from_le_bytes(&data[4..10])?,
                conn_interval: to_interval(LittleEndian::read_u16(&data[22..24])),
                conn_latency: LittleEndian::read_u16(&data[24..26]),
                supervision_timeout: to_timeout(LittleEndian::read_u16(&data[26..28])),
                central_clock_accuracy: data[28],
            }))
        }
        LE_ADVERTISING_REPORT => Ok(Event::LeAdvertisingReport(to_advertising_reports(
            status, data,
        ))),
        LE_EXTENDED_ADVERTISING_REPORT => Ok(Event::LeExtendedAdvertisingReport(
            to_extended_advertising_reports(status, data),
        )),
        LE_CONNECTION_UPDATE_COMPLETE => {
            require(data, 8)?;
            Ok(Event::LeConnectionUpdateComplete(LeConnectionUpdateComplete {
                status,
                conn_handle: ConnectionHandle(LittleEndian::read_u16(&data[0..2])),
                conn_interval: to_interval(LittleEndian::read_u16(&data[2..4])),
                conn_latency: LittleEndian::read_u16(&data[4..6]),
                supervision_timeout: to_timeout(LittleEndian::read_u16(&data[6..8])),
            }))
        }
        other => Ok(Event::Unknown(other)),
    }
}

fn to_advertising_reports(num_reports: u8, mut data: &[u8]) -> Vec<AdvertisingReport> {
    let mut reports = Vec::with_capacity(usize::from(num_reports));
    for _ in 0..num_reports {
        match AdvertisingReport::new(data) {
            Ok((report, rest)) => {
                reports.push(report);
                data = rest;
            }
            Err(e) => {
                warn!("dropping malformed advertising report: {}", e);
                break;
            }
        }
    }
    reports
}

fn to_extended_advertising_reports(
    num_reports: u8,
    mut data: &[u8],
) -> Vec<ExtendedAdvertisingReport> {
    let mut reports = Vec::with_capacity(usize::from(num_reports));
    for _ in 0..num_reports {
        match ExtendedAdvertisingReport::new(data) {
            Ok((report, rest)) => {
                reports.push(report);
                data = rest;
            }
            Err(e) => {
                warn!("dropping malformed extended advertising report: {}", e);
                break;
            }
        }
    }
    reports
}

/// Converts a connection interval from 1.25 ms controller units.
pub fn to_interval(units: u16) -> Duration {
    Duration::from_micros(u64::from(units) * 1250)
}

/// Converts a supervision timeout from 10 ms controller units.
pub fn to_timeout(units: u16) -> Duration {
    Duration::from_millis(u64::from(units) * 10)
}

/// Parameters of the [Disconnection Complete](Event::DisconnectionComplete) event.
#[derive(Copy, Clone, Debug)]
pub struct DisconnectionComplete {
    /// Status of the disconnection.
    pub status: u8,
    /// Connection that was terminated.
    pub conn_handle: ConnectionHandle,
    /// HCI status code explaining why.
    pub reason: u8,
}

/// Parameters of the [Encryption Change](Event::EncryptionChange) event.
#[derive(Copy, Clone, Debug)]
pub struct EncryptionChange {
    /// Status of the change.
    pub status: u8,
    /// Affected connection.
    pub conn_handle: ConnectionHandle,
    /// Whether the link is now encrypted.
    pub encrypted: bool,
}

/// Parameters of the [Command Status](Event::CommandStatus) event.
#[derive(Copy, Clone, Debug)]
pub struct CommandStatus {
    /// Zero if the command is pending.
    pub status: u8,
    /// Command the status refers to.
    pub opcode: Opcode,
}

/// One entry of the [Number of Completed Packets](Event::NumberOfCompletedPackets) event.
#[derive(Copy, Clone, Debug)]
pub struct NumberOfCompletedPackets {
    /// Connection whose packets completed.
    pub conn_handle: ConnectionHandle,
    /// How many ACL packets the controller released.
    pub num_completed_packets: u16,
}

/// Parameters of the [LE Connection Complete](Event::LeConnectionComplete) event.
#[derive(Copy, Clone, Debug)]
pub struct LeConnectionComplete {
    /// Zero if the connection was established.
    pub status: u8,
    /// Handle the controller assigned to the connection.
    pub conn_handle: ConnectionHandle,
    /// Local role on the connection.
    pub role: Role,
    /// Type of the peer address.
    pub peer_address_type: AddressType,
    /// Address of the peer.
    pub peer_address: Address,
    /// Connection interval.
    pub conn_interval: Duration,
    /// Peripheral latency, in connection events.
    pub conn_latency: u16,
    /// Supervision timeout.
    pub supervision_timeout: Duration,
    /// Clock accuracy code of the central.
    pub central_clock_accuracy: u8,
}

/// Parameters of the [LE Connection Update Complete](Event::LeConnectionUpdateComplete) event.
#[derive(Copy, Clone, Debug)]
pub struct LeConnectionUpdateComplete {
    /// Zero if the update succeeded.
    pub status: u8,
    /// Updated connection.
    pub conn_handle: ConnectionHandle,
    /// New connection interval.
    pub conn_interval: Duration,
    /// New peripheral latency.
    pub conn_latency: u16,
    /// New supervision timeout.
    pub supervision_timeout: Duration,
}

/// One legacy advertising report.
#[derive(Clone, Debug, PartialEq)]
pub struct AdvertisingReport {
    /// Advertising event type: 0x00 ADV_IND, 0x01 ADV_DIRECT_IND, 0x02 ADV_SCAN_IND,
    /// 0x03 ADV_NONCONN_IND, 0x04 SCAN_RSP.
    pub event_type: u8,
    /// Type of the advertiser's address.
    pub address_type: AddressType,
    /// Advertiser's address.
    pub address: Address,
    /// Advertising data.
    pub data: Vec<u8>,
    /// Received signal strength, dBm.
    pub rssi: i8,
}

impl AdvertisingReport {
    fn new(data: &[u8]) -> Result<(AdvertisingReport, &[u8]), Error> {
        require(data, 9)?;
        let data_len = usize::from(data[8]);
        require(data, 10 + data_len)?;

        let report = AdvertisingReport {
            event_type: data[0],
            address_type: AddressType::from(data[1]),
            address: Address::from_le_bytes(&data[2..8])?,
            data: data[9..9 + data_len].to_vec(),
            rssi: data[9 + data_len] as i8,
        };
        Ok((report, &data[10 + data_len..]))
    }
}

/// One extended advertising report.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtendedAdvertisingReport {
    /// Event type bit field; see [`ExtendedEventType`](crate::gap::ExtendedEventType).
    pub event_type: u16,
    /// Type of the advertiser's address.
    pub address_type: AddressType,
    /// Advertiser's address.
    pub address: Address,
    /// Advertised transmit power, dBm. 127 if unavailable.
    pub tx_power: i8,
    /// Received signal strength, dBm.
    pub rssi: i8,
    /// Advertising data.
    pub data: Vec<u8>,
}

impl ExtendedAdvertisingReport {
    fn new(data: &[u8]) -> Result<(ExtendedAdvertisingReport, &[u8]), Error> {
        require(data, 24)?;
        let data_len = usize::from(data[23]);
        require(data, 24 + data_len)?;

        let report = ExtendedAdvertisingReport {
            event_type: LittleEndian::read_u16(&data[0..2]),
            address_type: AddressType::from(data[2]),
            address: Address::from_le_bytes(&data[3..9])?,
            tx_power: data[12] as i8,
            rssi: data[13] as i8,
            data: data[24..24 + data_len].to_vec(),
        };
        Ok((report, &data[24 + data_len..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_filter_bytes() {
        assert_eq!(
            socket_filter(),
            [
                0x16, 0x00, 0x00, 0x00, 0x20, 0xc1, 0x08, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn advertising_reports_stop_at_overflow() {
        let packet = [
            0x04, 0x3e, 0x00, 0x02, 0x02, // two reports announced
            0x00, 0x01, 1, 2, 3, 4, 5, 6, 0x02, 0xaa, 0xbb, 0xc4, // complete report
            0x04, 0x00, 1, 2, 3, 4, 5, 6, 0x09, 0xaa, // truncated report
        ];
        match Event::new(&packet) {
            Ok(Event::LeAdvertisingReport(reports)) => {
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].event_type, 0x00);
                assert_eq!(reports[0].address_type, AddressType::Random);
                assert_eq!(reports[0].address.to_string(), "06:05:04:03:02:01");
                assert_eq!(reports[0].data, vec![0xaa, 0xbb]);
                assert_eq!(reports[0].rssi, -60);
            }
            other => panic!("Did not get advertising report: {:?}", other),
        }
    }

    #[test]
    fn truncated_events_are_rejected() {
        match Event::new(&[0x04, 0x05, 0x04, 0x00, 0x01]) {
            Err(Error::BadLength(5, 7)) => (),
            other => panic!("Did not get bad length: {:?}", other),
        }
    }
}
