//! Per-connection L2CAP routing.
//!
//! An [`AclStream`] sits between the [`Transport`](crate::Transport) and the protocols running
//! on one connection. Inbound frames are routed by channel: ATT and signaling frames are handed
//! back to the caller, security manager frames are consumed by the stream's own [`Smp`] session.
//! Outbound traffic is collected as [`AclCommand`]s for the caller to carry out.

use std::collections::VecDeque;

use crate::att::ATT_CID;
use crate::command::StartEncryptionParameters;
use crate::signaling::SIGNALING_CID;
use crate::smp::{Smp, SmpEvent, SMP_CID};
use crate::types::{Address, AddressType};
use hci::ConnectionHandle;

/// Work the stream needs the transport to do.
#[derive(Clone, Debug, PartialEq)]
pub enum AclCommand {
    /// Send an L2CAP frame.
    Write {
        /// Destination channel.
        cid: u16,
        /// Frame payload.
        data: Vec<u8>,
    },
    /// Encrypt the link.
    StartEncryption(StartEncryptionParameters),
}

/// Security outcomes worth reporting above the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum AclEvent {
    /// Pairing failed.
    EncryptFail,
    /// The peer distributed its long term key.
    Ltk(Vec<u8>),
    /// The peer distributed the identification of its long term key.
    MasterIdent {
        /// Encrypted diversifier.
        ediv: Vec<u8>,
        /// Random number.
        rand: Vec<u8>,
    },
}

/// A frame for one of the protocols above the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Attribute protocol PDU.
    Att(Vec<u8>),
    /// L2CAP signaling command.
    Signaling(Vec<u8>),
}

/// The L2CAP side of one connection.
pub struct AclStream {
    conn_handle: ConnectionHandle,
    smp: Smp,
    ended: bool,
    outbox: VecDeque<AclCommand>,
    events: VecDeque<AclEvent>,
}

impl AclStream {
    /// Creates the stream for a new connection. The local side initiates pairing.
    pub fn new(
        conn_handle: ConnectionHandle,
        local_type: AddressType,
        local: &Address,
        remote_type: AddressType,
        remote: &Address,
    ) -> AclStream {
        AclStream {
            conn_handle,
            smp: Smp::new(local_type, local, remote_type, remote),
            ended: false,
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// The connection this stream belongs to.
    pub fn conn_handle(&self) -> ConnectionHandle {
        self.conn_handle
    }

    /// Queues an L2CAP frame for sending.
    pub fn write(&mut self, cid: u16, data: &[u8]) {
        self.outbox.push_back(AclCommand::Write {
            cid,
            data: data.to_vec(),
        });
    }

    /// Starts pairing so the link can be encrypted.
    pub fn encrypt(&mut self) {
        if self.ended {
            debug!("handle {}: not pairing on an ended stream", self.conn_handle.0);
            return;
        }
        self.smp.send_pairing_request();
        self.drain_smp();
    }

    /// Routes a received frame. Security manager frames are consumed here; frames on unknown
    /// channels are dropped.
    pub fn push(&mut self, cid: u16, data: Vec<u8>) -> Option<Inbound> {
        match cid {
            ATT_CID => Some(Inbound::Att(data)),
            SIGNALING_CID => Some(Inbound::Signaling(data)),
            SMP_CID => {
                if !self.ended {
                    self.smp.on_data(&data);
                    self.drain_smp();
                }
                None
            }
            _ => {
                debug!(
                    "handle {}: ignoring data on channel 0x{:04x}",
                    self.conn_handle.0, cid
                );
                None
            }
        }
    }

    /// Tears the stream down. Security manager traffic is ignored from here on.
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Removes the oldest command waiting for the transport.
    pub fn next_command(&mut self) -> Option<AclCommand> {
        self.outbox.pop_front()
    }

    /// Puts a command the transport could not take back at the head of the queue.
    pub fn requeue(&mut self, command: AclCommand) {
        self.outbox.push_front(command);
    }

    /// Removes the oldest security event.
    pub fn next_event(&mut self) -> Option<AclEvent> {
        self.events.pop_front()
    }

    fn drain_smp(&mut self) {
        while let Some(pdu) = self.smp.next_pdu() {
            self.outbox.push_back(AclCommand::Write {
                cid: SMP_CID,
                data: pdu,
            });
        }
        while let Some(event) = self.smp.next_event() {
            match event {
                SmpEvent::Stk(stk) => {
                    self.outbox
                        .push_back(AclCommand::StartEncryption(StartEncryptionParameters {
                            conn_handle: self.conn_handle,
                            random_number: [0; 8],
                            encrypted_diversifier: [0; 2],
                            long_term_key: stk,
                        }))
                }
                SmpEvent::Fail => self.events.push_back(AclEvent::EncryptFail),
                SmpEvent::Ltk(ltk) => self.events.push_back(AclEvent::Ltk(ltk)),
                SmpEvent::MasterIdent { ediv, rand } => {
                    self.events.push_back(AclEvent::MasterIdent { ediv, rand })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> AclStream {
        AclStream::new(
            ConnectionHandle(0x0040),
            AddressType::Public,
            &"00:11:22:33:44:55".parse().unwrap(),
            AddressType::Random,
            &"c4:7c:8d:66:d3:a1".parse().unwrap(),
        )
    }

    #[test]
    fn routes_by_channel() {
        let mut acl = stream();
        assert_eq!(acl.push(4, vec![0x0b]), Some(Inbound::Att(vec![0x0b])));
        assert_eq!(acl.push(5, vec![0x12]), Some(Inbound::Signaling(vec![0x12])));
        assert_eq!(acl.push(0x40, vec![0x00]), None);
        assert_eq!(acl.next_command(), None);
    }

    #[test]
    fn encrypt_sends_pairing_request() {
        let mut acl = stream();
        acl.encrypt();
        assert_eq!(
            acl.next_command(),
            Some(AclCommand::Write {
                cid: SMP_CID,
                data: vec![0x01, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01],
            })
        );
    }

    #[test]
    fn pairing_failure_is_reported() {
        let mut acl = stream();
        acl.encrypt();
        acl.push(SMP_CID, vec![0x05, 0x03]);
        assert_eq!(acl.next_event(), Some(AclEvent::EncryptFail));
    }

    #[test]
    fn ended_stream_ignores_pairing() {
        let mut acl = stream();
        acl.end();
        acl.encrypt();
        acl.push(SMP_CID, vec![0x05, 0x03]);
        assert_eq!(acl.next_command(), None);
        assert_eq!(acl.next_event(), None);
    }
}
