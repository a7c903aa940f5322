//! Bluetooth Low Energy central role, implemented on the host side of a raw HCI socket.
//!
//! # Design
//!
//! The crate talks to a controller through an [`HciSocket`], a byte-level transport that
//! delivers one HCI packet per read. On Linux, [`LinuxHciSocket`] binds an `AF_BLUETOOTH` raw (or
//! user channel) socket to an adapter. Everything above the socket is implemented here:
//!
//!  - [`Transport`] frames HCI commands, parses events, tracks ACL flow-control credits and
//!    fragments and reassembles ACL data.
//!  - [`gap::Gap`] turns advertising reports into deduplicated, merged discoveries.
//!  - [`acl::AclStream`] routes one connection's L2CAP traffic and drives SMP pairing.
//!  - [`gatt::Gatt`] runs the ATT client, one outstanding request per connection.
//!  - [`signaling::Signaling`] answers connection parameter update requests.
//!  - [`Central`] ties the layers together behind a command/event surface keyed by
//!    [`PeripheralId`].
//!
//! The stack is single threaded and does no blocking I/O on its own: the application calls
//! [`Central::process`] when the socket is readable, [`Central::tick`] periodically so the
//! adapter state can be polled, and drains [`Central::next_event`].
//!
//! No timeouts are enforced on outstanding HCI commands or ATT requests; a peer that never
//! answers stalls that connection's request queue until it disconnects.
//!
//! # Example
//!
//! ```no_run
//! use hci_central::{Central, CentralEvent, Config, LinuxHciSocket};
//! use std::time::Instant;
//!
//! let socket = LinuxHciSocket::new().unwrap();
//! let mut central = Central::new(socket, Config::default());
//! central.init().unwrap();
//! loop {
//!     central.process();
//!     central.tick(Instant::now());
//!     while let Some(event) = central.next_event() {
//!         if let CentralEvent::StateChange(state) = event {
//!             println!("adapter is {}", state);
//!         }
//!     }
//! }
//! ```

#![deny(missing_docs)]

#[macro_use]
extern crate bitflags;
extern crate bluetooth_hci as hci;
extern crate byteorder;
#[macro_use]
extern crate log;
#[macro_use(block)]
extern crate nb;

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub mod acl;
pub mod att;
pub mod central;
pub mod command;
pub mod crypto;
pub mod event;
pub mod gap;
pub mod gatt;
mod opcode;
pub mod signaling;
pub mod smp;
pub mod socket;
pub mod status;
pub mod transport;
pub mod types;

pub use central::{Central, CentralEvent};
pub use hci::ConnectionHandle;
#[cfg(target_os = "linux")]
pub use socket::LinuxHciSocket;
pub use socket::HciSocket;
pub use transport::Transport;
pub use types::{Address, AddressType, PeripheralId, State, Uuid};

/// Errors returned by the stack.
#[derive(Debug, Error)]
pub enum Error {
    /// A packet or PDU is shorter than its fixed fields. Includes the actual and the expected
    /// length.
    #[error("packet too short: {0} bytes, expected at least {1}")]
    BadLength(usize, usize),

    /// The packet type indicator is not command, ACL data or event.
    #[error("unknown HCI packet type 0x{0:02x}")]
    UnknownPacketType(u8),

    /// The socket failed.
    #[error("HCI socket: {0}")]
    Io(#[from] io::Error),

    /// The peripheral is not connected.
    #[error("peripheral {0} is not connected")]
    UnknownPeripheral(PeripheralId),

    /// The service has not been discovered on this connection.
    #[error("service {0} has not been discovered")]
    UnknownService(Uuid),

    /// The characteristic has not been discovered on this connection.
    #[error("characteristic {1} of service {0} has not been discovered")]
    UnknownCharacteristic(Uuid, Uuid),

    /// The descriptor has not been discovered on this connection.
    #[error("descriptor {2} of characteristic {1} in service {0} has not been discovered")]
    UnknownDescriptor(Uuid, Uuid, Uuid),

    /// Text that is not a colon separated Bluetooth address.
    #[error("invalid Bluetooth address {0:?}")]
    InvalidAddress(String),

    /// Text that is not a 16, 32 or 128-bit UUID.
    #[error("invalid UUID {0:?}")]
    InvalidUuid(String),
}

/// A connection attempt failed with a non-zero HCI status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConnectError {
    /// HCI status reported by the controller.
    pub status: u8,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} (0x{:x})",
            status::describe(self.status).unwrap_or("HCI Error: Unknown"),
            self.status
        )
    }
}

impl std::error::Error for ConnectError {}

/// Settings fixed at construction.
#[derive(Clone, Debug)]
pub struct Config {
    /// Adapter to bind. `None` picks the first adapter that is up, or the first one present.
    pub device_id: Option<u16>,

    /// Bind the HCI user channel, taking the adapter away from the kernel's own stack. The
    /// adapter must be down. The controller is reset instead of polled.
    pub user_channel: bool,

    /// Start out using the extended scan and connect commands. Also switched on automatically
    /// when the controller reports support for them.
    pub extended: bool,

    /// The kernel answers L2CAP connection parameter update requests itself, so the stack must not
    /// send its own response.
    pub kernel_accepts_parameter_updates: bool,

    /// How often [`Central::tick`] checks whether the adapter is up.
    pub poll_interval: Duration,

    /// ATT MTU requested right after connecting.
    pub mtu: u16,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            device_id: None,
            user_channel: false,
            extended: false,
            kernel_accepts_parameter_updates: cfg!(target_os = "linux"),
            poll_interval: Duration::from_millis(1000),
            mtu: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_name_the_status() {
        assert_eq!(
            ConnectError { status: 0x3e }.to_string(),
            "Connection Failed to be Established (0x3e)"
        );
        assert_eq!(
            ConnectError { status: 0x02 }.to_string(),
            "Unknown Connection Identifier (0x2)"
        );
        assert_eq!(
            ConnectError { status: 0x99 }.to_string(),
            "HCI Error: Unknown (0x99)"
        );
    }
}
