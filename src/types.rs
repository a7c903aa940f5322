//! Value types shared by every layer of the stack.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use hci::BdAddr;

use crate::Error;

/// A Bluetooth device address.
///
/// The wrapped [`BdAddr`] holds the bytes in the order they travel over HCI (least significant
/// byte first). The textual form is the conventional colon separated, most significant byte first
/// notation, e.g. `"c4:7c:8d:66:d3:a1"`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Address(pub BdAddr);

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0).0.hash(state);
    }
}

impl Address {
    /// Reads an address from the first 6 bytes of `bytes`, in wire order.
    ///
    /// # Errors
    ///
    /// [`Error::BadLength`] if fewer than 6 bytes are available.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Address, Error> {
        if bytes.len() < 6 {
            return Err(Error::BadLength(bytes.len(), 6));
        }

        let mut addr = [0; 6];
        addr.copy_from_slice(&bytes[..6]);
        Ok(Address(BdAddr(addr)))
    }

    /// Returns the address bytes in wire order.
    pub fn to_le_bytes(&self) -> [u8; 6] {
        (self.0).0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = (self.0).0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            bytes[5], bytes[4], bytes[3], bytes[2], bytes[1], bytes[0]
        )
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Address, Error> {
        let invalid = || Error::InvalidAddress(s.to_string());

        let mut bytes = [0; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut().rev() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Address(BdAddr(bytes)))
    }
}

/// Whether an address is the controller's public address or a random one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressType {
    /// Public device address.
    Public,
    /// Random (static or private) device address.
    Random,
}

impl AddressType {
    /// Value of the address type field in HCI and SMP PDUs.
    pub fn as_u8(self) -> u8 {
        match self {
            AddressType::Public => 0x00,
            AddressType::Random => 0x01,
        }
    }
}

impl From<u8> for AddressType {
    fn from(value: u8) -> AddressType {
        if value == 0x01 {
            AddressType::Random
        } else {
            AddressType::Public
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressType::Public => f.write_str("public"),
            AddressType::Random => f.write_str("random"),
        }
    }
}

/// Stable identifier of a remote device: its address, lowercase, without separators.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a Address> for PeripheralId {
    fn from(address: &'a Address) -> PeripheralId {
        PeripheralId(address.to_string().replace(':', ""))
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribute or service UUID.
///
/// 128-bit values are stored in wire order (least significant byte first). The textual form is
/// lowercase hex without dashes; 16- and 32-bit values are zero padded to 4 and 8 digits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Uuid {
    /// 16-bit UUID
    Uuid16(u16),
    /// 32-bit UUID
    Uuid32(u32),
    /// 128-bit UUID
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Decodes a 2, 4 or 16 byte little-endian UUID. Other lengths yield `None`.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Uuid> {
        match bytes.len() {
            2 => Some(Uuid::Uuid16(LittleEndian::read_u16(bytes))),
            4 => Some(Uuid::Uuid32(LittleEndian::read_u32(bytes))),
            16 => {
                let mut value = [0; 16];
                value.copy_from_slice(bytes);
                Some(Uuid::Uuid128(value))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Uuid::Uuid16(value) => write!(f, "{:04x}", value),
            Uuid::Uuid32(value) => write!(f, "{:08x}", value),
            Uuid::Uuid128(bytes) => {
                let mut be = *bytes;
                be.reverse();
                f.write_str(&hex::encode(be))
            }
        }
    }
}

impl FromStr for Uuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Uuid, Error> {
        let digits = s.replace('-', "").to_lowercase();
        let invalid = || Error::InvalidUuid(s.to_string());
        match digits.len() {
            4 => u16::from_str_radix(&digits, 16)
                .map(Uuid::Uuid16)
                .map_err(|_| invalid()),
            8 => u32::from_str_radix(&digits, 16)
                .map(Uuid::Uuid32)
                .map_err(|_| invalid()),
            32 => {
                let mut bytes = [0; 16];
                hex::decode_to_slice(&digits, &mut bytes).map_err(|_| invalid())?;
                bytes.reverse();
                Ok(Uuid::Uuid128(bytes))
            }
            _ => Err(invalid()),
        }
    }
}

/// Adapter state reported through state change events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Nothing is known about the adapter yet.
    Unknown,
    /// The adapter is down.
    PoweredOff,
    /// The adapter is up and scanning parameters have been applied.
    PoweredOn,
    /// The process lacks the privileges to open the HCI socket.
    Unauthorized,
    /// The controller does not implement Bluetooth 4.0 or later.
    Unsupported,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Unknown => "unknown",
            State::PoweredOff => "poweredOff",
            State::PoweredOn => "poweredOn",
            State::Unauthorized => "unauthorized",
            State::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_text_is_reversed_wire_order() {
        let address = Address(BdAddr([0xa1, 0xd3, 0x66, 0x8d, 0x7c, 0xc4]));
        assert_eq!(address.to_string(), "c4:7c:8d:66:d3:a1");
        assert_eq!("c4:7c:8d:66:d3:a1".parse::<Address>().unwrap(), address);
        assert_eq!(PeripheralId::from(&address).as_str(), "c47c8d66d3a1");
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert!("c4:7c:8d:66:d3".parse::<Address>().is_err());
        assert!("c4:7c:8d:66:d3:a1:00".parse::<Address>().is_err());
        assert!("c4:7c:8d:66:d3:zz".parse::<Address>().is_err());
    }

    #[test]
    fn uuid_text_forms() {
        assert_eq!(Uuid::Uuid16(0x180d).to_string(), "180d");
        assert_eq!(Uuid::Uuid16(0x0a00).to_string(), "0a00");
        assert_eq!(Uuid::Uuid32(0x1234).to_string(), "00001234");

        let mut bytes = [0; 16];
        bytes[15] = 0xfe;
        bytes[0] = 0x01;
        let uuid = Uuid::Uuid128(bytes);
        assert_eq!(uuid.to_string(), "fe000000000000000000000000000001");
        assert_eq!("fe000000-0000-0000-0000-000000000001".parse::<Uuid>().unwrap(), uuid);
        assert_eq!("180D".parse::<Uuid>().unwrap(), Uuid::Uuid16(0x180d));
    }
}
