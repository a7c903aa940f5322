//! HCI commands issued by the central, and the types needed for those commands.
//!
//! Scan and connection commands exist in a legacy and an extended (LE Coded PHY capable) form.
//! Which one is written depends on whether the controller advertised the extended scanning
//! commands; the parameter structs encode both forms.

use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;

use crate::types::{Address, AddressType};
use hci::ConnectionHandle;

/// Reason code sent with a locally initiated disconnection: "Remote User Terminated Connection".
pub const USER_ENDED_CONNECTION: u8 = 0x13;

/// Commands the central sends to its controller.
pub trait Commands {
    /// Type of communication errors.
    type Error;

    /// Resets the controller.
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Enables the HCI events the central consumes.
    fn set_event_mask(&mut self) -> Result<(), Self::Error>;

    /// Enables the LE meta events the central consumes, including the extended advertising report
    /// when extended scanning is in use.
    fn set_le_event_mask(&mut self) -> Result<(), Self::Error>;

    /// Reads the controller's HCI and link layer versions.
    fn read_local_version(&mut self) -> Result<(), Self::Error>;

    /// Reads the controller's supported command bitmap.
    fn read_supported_commands(&mut self) -> Result<(), Self::Error>;

    /// Reads the controller's public address.
    fn read_bd_addr(&mut self) -> Result<(), Self::Error>;

    /// Reads the shared ACL buffer geometry.
    fn read_buffer_size(&mut self) -> Result<(), Self::Error>;

    /// Reads the LE ACL buffer geometry.
    fn read_le_buffer_size(&mut self) -> Result<(), Self::Error>;

    /// Reads the LE host support flags.
    fn read_le_host_supported(&mut self) -> Result<(), Self::Error>;

    /// Declares LE host support to the controller.
    fn write_le_host_supported(&mut self) -> Result<(), Self::Error>;

    /// Allows LE 1M and LE Coded PHYs for transmission and reception.
    fn set_coded_phy_support(&mut self) -> Result<(), Self::Error>;

    /// Sets the controller's random address.
    fn set_random_address(&mut self, address: &Address) -> Result<(), Self::Error>;

    /// Configures active scanning.
    fn set_scan_parameters(&mut self, params: &ScanParameters) -> Result<(), Self::Error>;

    /// Starts or stops scanning.
    fn set_scan_enabled(
        &mut self,
        enabled: bool,
        filter_duplicates: bool,
    ) -> Result<(), Self::Error>;

    /// Starts connecting to a peripheral.
    ///
    /// # Generated events
    ///
    /// A command status, followed by an LE connection complete event once the link is established
    /// or the attempt is canceled.
    fn create_le_conn(&mut self, params: &CreateConnectionParameters) -> Result<(), Self::Error>;

    /// Requests new parameters for an established connection.
    fn conn_update_le(&mut self, params: &ConnectionUpdateParameters) -> Result<(), Self::Error>;

    /// Cancels the outstanding connection attempt.
    fn cancel_connect(&mut self) -> Result<(), Self::Error>;

    /// Starts link encryption with the given key.
    fn start_le_encryption(&mut self, params: &StartEncryptionParameters)
        -> Result<(), Self::Error>;

    /// Terminates a connection.
    fn disconnect(&mut self, conn_handle: ConnectionHandle, reason: u8)
        -> Result<(), Self::Error>;

    /// Reads the signal strength of a connection.
    fn read_rssi(&mut self, conn_handle: ConnectionHandle) -> Result<(), Self::Error>;
}

/// HCI event mask written by [`Commands::set_event_mask`].
pub const EVENT_MASK: [u8; 8] = [0xff, 0xff, 0xfb, 0xff, 0x07, 0xf8, 0xbf, 0x3d];

/// Returns the LE event mask written by [`Commands::set_le_event_mask`].
pub fn le_event_mask(extended: bool) -> [u8; 8] {
    if extended {
        [0x1f, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
    } else {
        [0x1f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
    }
}

/// Parameters for LE Write Host Supported: LE supported, no simultaneous BR/EDR.
pub const LE_HOST_SUPPORTED: [u8; 2] = [0x01, 0x00];

/// Parameters for LE Set Default PHY: no preference mask, TX and RX on LE 1M + LE Coded.
pub const CODED_PHY_SUPPORT: [u8; 3] = [0x00, 0x05, 0x05];

const PHYS_1M_AND_CODED: u8 = 0x05;
const ACTIVE_SCANNING: u8 = 0x01;

/// Parameters for the [`set_scan_parameters`](Commands::set_scan_parameters) command.
///
/// Interval and window are in units of 0.625 ms.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScanParameters {
    /// Time between the starts of two scan windows.
    pub interval: u16,
    /// Time spent scanning in each interval.
    pub window: u16,
}

impl Default for ScanParameters {
    fn default() -> ScanParameters {
        ScanParameters {
            interval: 0x0012,
            window: 0x0012,
        }
    }
}

impl ScanParameters {
    /// Largest encoding of these parameters.
    pub const MAX_LENGTH: usize = 13;

    /// Encodes the parameters into `bytes` and returns the number of bytes used.
    pub fn into_bytes(&self, extended: bool, bytes: &mut [u8]) -> usize {
        if extended {
            bytes[0] = 0x00; // own address type: public
            bytes[1] = 0x00; // accept all advertisements
            bytes[2] = PHYS_1M_AND_CODED;
            for phy in bytes[3..13].chunks_mut(5) {
                phy[0] = ACTIVE_SCANNING;
                LittleEndian::write_u16(&mut phy[1..3], self.interval);
                LittleEndian::write_u16(&mut phy[3..5], self.window);
            }
            13
        } else {
            bytes[0] = ACTIVE_SCANNING;
            LittleEndian::write_u16(&mut bytes[1..3], self.interval);
            LittleEndian::write_u16(&mut bytes[3..5], self.window);
            bytes[5] = 0x00; // own address type: public
            bytes[6] = 0x00; // accept all advertisements
            7
        }
    }
}

/// Encodes scan enable parameters. Returns the number of bytes used.
pub fn scan_enable_into_bytes(
    enabled: bool,
    filter_duplicates: bool,
    extended: bool,
    bytes: &mut [u8],
) -> usize {
    bytes[0] = enabled as u8;
    bytes[1] = filter_duplicates as u8;
    if extended {
        LittleEndian::write_u16(&mut bytes[2..4], 0x0000); // duration: until disabled
        LittleEndian::write_u16(&mut bytes[4..6], 0x0000); // period: continuous
        6
    } else {
        2
    }
}

/// Connection parameters requested when creating a connection, in controller units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConnectParameters {
    /// Minimum connection interval, 1.25 ms units.
    pub min_interval: u16,
    /// Maximum connection interval, 1.25 ms units.
    pub max_interval: u16,
    /// Peripheral latency, in connection events.
    pub latency: u16,
    /// Supervision timeout, 10 ms units.
    pub supervision_timeout: u16,
}

impl Default for ConnectParameters {
    fn default() -> ConnectParameters {
        ConnectParameters {
            min_interval: 0x0006,
            max_interval: 0x0012,
            latency: 0x0000,
            supervision_timeout: 0x002a,
        }
    }
}

/// Parameters for the [`create_le_conn`](Commands::create_le_conn) command.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CreateConnectionParameters {
    /// Peer to connect to.
    pub peer_address: Address,
    /// Type of the peer's address.
    pub peer_address_type: AddressType,
    /// Requested connection parameters.
    pub connection: ConnectParameters,
}

impl CreateConnectionParameters {
    /// Largest encoding of these parameters.
    pub const MAX_LENGTH: usize = 42;

    /// Encodes the parameters into `bytes` and returns the number of bytes used.
    pub fn into_bytes(&self, extended: bool, bytes: &mut [u8]) -> usize {
        let conn = &self.connection;
        if extended {
            bytes[0] = 0x00; // no filter accept list
            bytes[1] = 0x00; // own address type: public
            bytes[2] = self.peer_address_type.as_u8();
            bytes[3..9].copy_from_slice(&self.peer_address.to_le_bytes());
            bytes[9] = PHYS_1M_AND_CODED;
            for phy in bytes[10..42].chunks_mut(16) {
                LittleEndian::write_u16(&mut phy[0..2], 0x0060); // scan interval
                LittleEndian::write_u16(&mut phy[2..4], 0x0060); // scan window
                LittleEndian::write_u16(&mut phy[4..6], conn.min_interval);
                LittleEndian::write_u16(&mut phy[6..8], conn.max_interval);
                LittleEndian::write_u16(&mut phy[8..10], conn.latency);
                LittleEndian::write_u16(&mut phy[10..12], conn.supervision_timeout);
                LittleEndian::write_u16(&mut phy[12..14], 0x0000); // min CE length
                LittleEndian::write_u16(&mut phy[14..16], 0x0000); // max CE length
            }
            42
        } else {
            LittleEndian::write_u16(&mut bytes[0..2], 0x0060); // scan interval
            LittleEndian::write_u16(&mut bytes[2..4], 0x0030); // scan window
            bytes[4] = 0x00; // no filter accept list
            bytes[5] = self.peer_address_type.as_u8();
            bytes[6..12].copy_from_slice(&self.peer_address.to_le_bytes());
            bytes[12] = 0x00; // own address type: public
            LittleEndian::write_u16(&mut bytes[13..15], conn.min_interval);
            LittleEndian::write_u16(&mut bytes[15..17], conn.max_interval);
            LittleEndian::write_u16(&mut bytes[17..19], conn.latency);
            LittleEndian::write_u16(&mut bytes[19..21], conn.supervision_timeout);
            LittleEndian::write_u16(&mut bytes[21..23], 0x0004); // min CE length
            LittleEndian::write_u16(&mut bytes[23..25], 0x0006); // max CE length
            25
        }
    }
}

/// Parameters for the [`conn_update_le`](Commands::conn_update_le) command.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConnectionUpdateParameters {
    /// Connection to update.
    pub conn_handle: ConnectionHandle,
    /// Minimum connection interval. Rounded down to 1.25 ms.
    pub min_interval: Duration,
    /// Maximum connection interval. Rounded down to 1.25 ms.
    pub max_interval: Duration,
    /// Peripheral latency, in connection events.
    pub latency: u16,
    /// Supervision timeout. Rounded down to 10 ms.
    pub supervision_timeout: Duration,
}

impl ConnectionUpdateParameters {
    /// Length of the encoded parameters.
    pub const LENGTH: usize = 14;

    /// Encodes the parameters into `bytes` and returns the number of bytes used.
    pub fn into_bytes(&self, bytes: &mut [u8]) -> usize {
        LittleEndian::write_u16(&mut bytes[0..2], self.conn_handle.0);
        LittleEndian::write_u16(&mut bytes[2..4], to_interval_units(self.min_interval));
        LittleEndian::write_u16(&mut bytes[4..6], to_interval_units(self.max_interval));
        LittleEndian::write_u16(&mut bytes[6..8], self.latency);
        LittleEndian::write_u16(&mut bytes[8..10], to_timeout_units(self.supervision_timeout));
        LittleEndian::write_u16(&mut bytes[10..12], 0x0000); // min CE length
        LittleEndian::write_u16(&mut bytes[12..14], 0x0000); // max CE length
        Self::LENGTH
    }
}

fn to_interval_units(interval: Duration) -> u16 {
    (interval.as_micros() / 1250) as u16
}

fn to_timeout_units(timeout: Duration) -> u16 {
    (timeout.as_millis() / 10) as u16
}

/// Parameters for the [`start_le_encryption`](Commands::start_le_encryption) command.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StartEncryptionParameters {
    /// Connection to encrypt.
    pub conn_handle: ConnectionHandle,
    /// Random number of the key. All zero for an STK.
    pub random_number: [u8; 8],
    /// Encrypted diversifier of the key. All zero for an STK.
    pub encrypted_diversifier: [u8; 2],
    /// The key itself, little-endian.
    pub long_term_key: [u8; 16],
}

impl StartEncryptionParameters {
    /// Length of the encoded parameters.
    pub const LENGTH: usize = 28;

    /// Encodes the parameters into `bytes` and returns the number of bytes used.
    pub fn into_bytes(&self, bytes: &mut [u8]) -> usize {
        LittleEndian::write_u16(&mut bytes[0..2], self.conn_handle.0);
        bytes[2..10].copy_from_slice(&self.random_number);
        bytes[10..12].copy_from_slice(&self.encrypted_diversifier);
        bytes[12..28].copy_from_slice(&self.long_term_key);
        Self::LENGTH
    }
}
