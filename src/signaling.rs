//! L2CAP LE signaling channel.
//!
//! Only the connection parameter update request is understood. Everything else on the channel is
//! ignored.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::time::Duration;

use crate::acl::AclStream;
use crate::command::ConnectionUpdateParameters;
use crate::event::{to_interval, to_timeout};
use hci::ConnectionHandle;

/// L2CAP fixed channel of the LE signaling protocol.
pub const SIGNALING_CID: u16 = 0x0005;

const CONNECTION_PARAMETER_UPDATE_REQUEST: u8 = 0x12;
const CONNECTION_PARAMETER_UPDATE_RESPONSE: u8 = 0x13;

const PARAMETERS_ACCEPTED: u16 = 0x0000;

/// Connection parameters a peripheral asked for.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConnectionParameterUpdateRequest {
    /// Connection the request arrived on.
    pub conn_handle: ConnectionHandle,
    /// Shortest acceptable connection interval.
    pub min_interval: Duration,
    /// Longest acceptable connection interval.
    pub max_interval: Duration,
    /// Connection events the peripheral may skip.
    pub latency: u16,
    /// Supervision timeout.
    pub supervision_timeout: Duration,
}

impl ConnectionParameterUpdateRequest {
    /// The HCI connection update that applies the request.
    pub fn to_update(&self) -> ConnectionUpdateParameters {
        ConnectionUpdateParameters {
            conn_handle: self.conn_handle,
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            latency: self.latency,
            supervision_timeout: self.supervision_timeout,
        }
    }
}

/// Signaling engine of one connection.
pub struct Signaling {
    conn_handle: ConnectionHandle,
    send_response: bool,
    events: VecDeque<ConnectionParameterUpdateRequest>,
}

impl Signaling {
    /// Creates the engine. When `send_response` is false the kernel is trusted to answer
    /// update requests and no response is written.
    pub fn new(conn_handle: ConnectionHandle, send_response: bool) -> Signaling {
        Signaling {
            conn_handle,
            send_response,
            events: VecDeque::new(),
        }
    }

    /// Removes the oldest parameter update request.
    pub fn next_event(&mut self) -> Option<ConnectionParameterUpdateRequest> {
        self.events.pop_front()
    }

    /// Puts back a request whose connection update could not be written.
    pub fn requeue(&mut self, request: ConnectionParameterUpdateRequest) {
        self.events.push_front(request);
    }

    /// Handles a frame received on [`SIGNALING_CID`].
    pub fn on_data(&mut self, acl: &mut AclStream, data: &[u8]) {
        if data.len() < 4 {
            warn!("signaling frame of {} bytes", data.len());
            return;
        }
        let code = data[0];
        let identifier = data[1];
        let length = usize::from(LittleEndian::read_u16(&data[2..4]));
        let payload = &data[4..data.len().min(4 + length)];

        if code == CONNECTION_PARAMETER_UPDATE_REQUEST {
            self.on_connection_parameter_update_request(acl, identifier, payload);
        } else {
            debug!("ignoring signaling code 0x{:02x}", code);
        }
    }

    fn on_connection_parameter_update_request(
        &mut self,
        acl: &mut AclStream,
        identifier: u8,
        data: &[u8],
    ) {
        if data.len() < 8 {
            warn!("connection parameter update request of {} bytes", data.len());
            return;
        }

        let request = ConnectionParameterUpdateRequest {
            conn_handle: self.conn_handle,
            min_interval: to_interval(LittleEndian::read_u16(&data[0..2])),
            max_interval: to_interval(LittleEndian::read_u16(&data[2..4])),
            latency: LittleEndian::read_u16(&data[4..6]),
            supervision_timeout: to_timeout(LittleEndian::read_u16(&data[6..8])),
        };
        debug!("handle {}: {:?}", self.conn_handle.0, request);

        if self.send_response {
            let mut response = [0; 6];
            response[0] = CONNECTION_PARAMETER_UPDATE_RESPONSE;
            response[1] = identifier;
            LittleEndian::write_u16(&mut response[2..4], 2);
            LittleEndian::write_u16(&mut response[4..6], PARAMETERS_ACCEPTED);
            acl.write(SIGNALING_CID, &response);
        }

        self.events.push_back(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclCommand;
    use crate::types::AddressType;

    fn stream() -> AclStream {
        AclStream::new(
            ConnectionHandle(0x0040),
            AddressType::Public,
            &"00:11:22:33:44:55".parse().unwrap(),
            AddressType::Public,
            &"c4:7c:8d:66:d3:a1".parse().unwrap(),
        )
    }

    const REQUEST: [u8; 12] = [0x12, 0x01, 0x08, 0x00, 1, 0, 2, 0, 3, 0, 4, 0];

    #[test]
    fn update_request_is_accepted() {
        let mut acl = stream();
        let mut signaling = Signaling::new(ConnectionHandle(0x0040), true);
        signaling.on_data(&mut acl, &REQUEST);

        assert_eq!(
            signaling.next_event(),
            Some(ConnectionParameterUpdateRequest {
                conn_handle: ConnectionHandle(0x0040),
                min_interval: Duration::from_micros(1250),
                max_interval: Duration::from_micros(2500),
                latency: 3,
                supervision_timeout: Duration::from_millis(40),
            })
        );
        assert_eq!(
            acl.next_command(),
            Some(AclCommand::Write {
                cid: SIGNALING_CID,
                data: vec![0x13, 0x01, 0x02, 0x00, 0x00, 0x00],
            })
        );
    }

    #[test]
    fn kernel_answers_when_asked_to() {
        let mut acl = stream();
        let mut signaling = Signaling::new(ConnectionHandle(0x0040), false);
        signaling.on_data(&mut acl, &REQUEST);

        assert!(signaling.next_event().is_some());
        assert_eq!(acl.next_command(), None);
    }

    #[test]
    fn other_codes_and_short_requests_are_ignored() {
        let mut acl = stream();
        let mut signaling = Signaling::new(ConnectionHandle(0x0040), true);
        signaling.on_data(&mut acl, &[0x00, 0x01, 0x02, 0x03, 0x04]);
        signaling.on_data(&mut acl, &[0x12, 0x01, 0x02, 0x03, 0x04, 0x05]);

        assert_eq!(signaling.next_event(), None);
        assert_eq!(acl.next_command(), None);
    }
}
