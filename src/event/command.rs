//! Return parameters of the Command Complete event.
//!
//! Only the commands this stack issues and interprets are decoded; everything else completes
//! with [`ReturnParameters::None`].

use byteorder::{ByteOrder, LittleEndian};

use super::require;
use crate::opcode::{self, Opcode};
use crate::types::Address;
use crate::Error;
use hci::ConnectionHandle;

/// Parameters of the Command Complete event.
#[derive(Clone, Debug)]
pub struct CommandComplete {
    /// Command that completed.
    pub opcode: Opcode,
    /// HCI status of the command.
    pub status: u8,
    /// Decoded return parameters.
    pub return_params: ReturnParameters,
}

/// Values returned by the controller for the commands we read results from.
///
/// Results are only decoded when the status is zero; failed commands carry
/// [`ReturnParameters::None`].
#[derive(Clone, Debug, PartialEq)]
pub enum ReturnParameters {
    /// Nothing to decode.
    None,
    /// Result of Read LE Host Supported.
    ReadLeHostSupported {
        /// LE Supported (Host) flag.
        le: u8,
        /// Simultaneous LE and BR/EDR flag.
        simultaneous: u8,
    },
    /// Result of Read Local Version Information.
    ReadLocalVersion(LocalVersion),
    /// Result of Read Local Supported Commands, reduced to what the stack uses.
    ReadSupportedCommands {
        /// Both LE Set Extended Scan Parameters and LE Set Extended Scan Enable are supported.
        extended_scan: bool,
    },
    /// Result of Read BD_ADDR.
    ReadBdAddr(Address),
    /// Result of Read RSSI.
    ReadRssi {
        /// Connection that was measured.
        conn_handle: ConnectionHandle,
        /// Signal strength, dBm.
        rssi: i8,
    },
    /// Result of LE Read Buffer Size.
    LeReadBufferSize {
        /// Maximum ACL payload per packet. Zero means "use the shared BR/EDR buffers".
        acl_length: u16,
        /// Number of ACL packets the controller can buffer.
        acl_num: u8,
    },
    /// Result of Read Buffer Size.
    ReadBufferSize {
        /// Maximum ACL payload per packet.
        acl_length: u16,
        /// Number of ACL packets the controller can buffer.
        acl_num: u16,
    },
}

/// Local version information of the controller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LocalVersion {
    /// HCI version. 0x06 is Bluetooth 4.0.
    pub hci_version: u8,
    /// HCI revision.
    pub hci_revision: u16,
    /// Link layer version.
    pub lmp_version: i8,
    /// Company identifier of the controller manufacturer.
    pub manufacturer_name: u16,
    /// Link layer subversion.
    pub lmp_subversion: u16,
}

const SUPPORTED_COMMANDS_EXTENDED_SCAN_OCTET: usize = 37;
const EXTENDED_SCAN_PARAMETERS_BIT: u8 = 0x10;
const EXTENDED_SCAN_ENABLE_BIT: u8 = 0x20;

impl ReturnParameters {
    /// Decodes the return parameters that follow the status byte.
    ///
    /// # Errors
    ///
    /// [`Error::BadLength`] if a successful command returned fewer bytes than its result needs.
    pub fn new(opcode: Opcode, status: u8, bytes: &[u8]) -> Result<ReturnParameters, Error> {
        if status != 0 {
            return Ok(ReturnParameters::None);
        }

        if opcode == opcode::READ_LE_HOST_SUPPORTED {
            require(bytes, 2)?;
            Ok(ReturnParameters::ReadLeHostSupported {
                le: bytes[0],
                simultaneous: bytes[1],
            })
        } else if opcode == opcode::READ_LOCAL_VERSION {
            require(bytes, 8)?;
            Ok(ReturnParameters::ReadLocalVersion(LocalVersion {
                hci_version: bytes[0],
                hci_revision: LittleEndian::read_u16(&bytes[1..3]),
                lmp_version: bytes[3] as i8,
                manufacturer_name: LittleEndian::read_u16(&bytes[4..6]),
                lmp_subversion: LittleEndian::read_u16(&bytes[6..8]),
            }))
        } else if opcode == opcode::READ_SUPPORTED_COMMANDS {
            require(bytes, SUPPORTED_COMMANDS_EXTENDED_SCAN_OCTET + 1)?;
            let octet = bytes[SUPPORTED_COMMANDS_EXTENDED_SCAN_OCTET];
            Ok(ReturnParameters::ReadSupportedCommands {
                extended_scan: octet & EXTENDED_SCAN_PARAMETERS_BIT != 0
                    && octet & EXTENDED_SCAN_ENABLE_BIT != 0,
            })
        } else if opcode == opcode::READ_BD_ADDR {
            Ok(ReturnParameters::ReadBdAddr(Address::from_le_bytes(bytes)?))
        } else if opcode == opcode::READ_RSSI {
            require(bytes, 3)?;
            Ok(ReturnParameters::ReadRssi {
                conn_handle: ConnectionHandle(LittleEndian::read_u16(&bytes[0..2])),
                rssi: bytes[2] as i8,
            })
        } else if opcode == opcode::LE_READ_BUFFER_SIZE {
            require(bytes, 3)?;
            Ok(ReturnParameters::LeReadBufferSize {
                acl_length: LittleEndian::read_u16(&bytes[0..2]),
                acl_num: bytes[2],
            })
        } else if opcode == opcode::READ_BUFFER_SIZE {
            require(bytes, 5)?;
            Ok(ReturnParameters::ReadBufferSize {
                acl_length: LittleEndian::read_u16(&bytes[0..2]),
                acl_num: LittleEndian::read_u16(&bytes[3..5]),
            })
        } else {
            Ok(ReturnParameters::None)
        }
    }
}
