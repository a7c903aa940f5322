//! Security manager, LE legacy pairing with the "Just Works" method.

use std::collections::VecDeque;

use crate::crypto;
use crate::types::{Address, AddressType};

/// L2CAP fixed channel of the security manager.
pub const SMP_CID: u16 = 0x0006;

const SMP_PAIRING_REQUEST: u8 = 0x01;
const SMP_PAIRING_RESPONSE: u8 = 0x02;
const SMP_PAIRING_CONFIRM: u8 = 0x03;
const SMP_PAIRING_RANDOM: u8 = 0x04;
const SMP_PAIRING_FAILED: u8 = 0x05;
const SMP_ENCRYPT_INFO: u8 = 0x06;
const SMP_MASTER_IDENT: u8 = 0x07;

const SMP_UNSPECIFIED: u8 = 0x08;
const SMP_CONFIRM_VALUE_FAILED: u8 = 0x04;

/// Pairing request: no input/output, no OOB data, bonding without MITM protection, 16 byte keys,
/// the responder distributes its encryption key.
pub const PAIRING_REQUEST: [u8; 7] = [SMP_PAIRING_REQUEST, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01];

/// Outcome of a pairing exchange.
#[derive(Clone, Debug, PartialEq)]
pub enum SmpEvent {
    /// Pairing succeeded. Carries the short term key to encrypt the link with.
    Stk([u8; 16]),
    /// Pairing failed, locally or as reported by the peer.
    Fail,
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

/// One pairing session on one connection.
pub struct Smp {
    iat: u8,
    ia: [u8; 6],
    rat: u8,
    ra: [u8; 6],

    preq: Option<[u8; 7]>,
    pres: Option<[u8; 7]>,
    tk: [u8; 16],
    r: [u8; 16],
    pcnf: Option<Vec<u8>>,

    outbox: VecDeque<Vec<u8>>,
    events: VecDeque<SmpEvent>,
}

impl Smp {
    /// Creates a session. The first address pair is the initiator's, the second the
    /// responder's.
    pub fn new(
        initiator_type: AddressType,
        initiator: &Address,
        responder_type: AddressType,
        responder: &Address,
    ) -> Smp {
        Smp {
            iat: initiator_type.as_u8(),
            ia: initiator.to_le_bytes(),
            rat: responder_type.as_u8(),
            ra: responder.to_le_bytes(),
            preq: None,
            pres: None,
            tk: [0; 16],
            r: [0; 16],
            pcnf: None,
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Starts pairing.
    pub fn send_pairing_request(&mut self) {
        self.preq = Some(PAIRING_REQUEST);
        self.outbox.push_back(PAIRING_REQUEST.to_vec());
    }

    /// Removes the oldest PDU waiting to be written on [`SMP_CID`].
    pub fn next_pdu(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    /// Removes the oldest pairing event.
    pub fn next_event(&mut self) -> Option<SmpEvent> {
        self.events.pop_front()
    }

    /// Handles a PDU received on [`SMP_CID`].
    pub fn on_data(&mut self, data: &[u8]) {
        let code = match data.first() {
            Some(&code) => code,
            None => return,
        };

        match code {
            SMP_PAIRING_RESPONSE => self.handle_pairing_response(data),
            SMP_PAIRING_CONFIRM => self.handle_pairing_confirm(data),
            SMP_PAIRING_RANDOM => self.handle_pairing_random(data),
            SMP_PAIRING_FAILED => {
                debug!("peer failed pairing, reason {:?}", data.get(1));
                self.end_session();
                self.events.push_back(SmpEvent::Fail);
            }
            SMP_ENCRYPT_INFO => self.events.push_back(SmpEvent::Ltk(data[1..].to_vec())),
            SMP_MASTER_IDENT => {
                if data.len() < 3 {
                    warn!("short master identification PDU");
                    return;
                }
                self.events.push_back(SmpEvent::MasterIdent {
                    ediv: data[1..3].to_vec(),
                    rand: data[3..].to_vec(),
                });
            }
            other => debug!("ignoring SMP code 0x{:02x}", other),
        }
    }

    fn handle_pairing_response(&mut self, data: &[u8]) {
        let preq = match self.preq {
            Some(preq) => preq,
            None => {
                debug!("pairing response without a request");
                return;
            }
        };
        if data.len() != 7 {
            warn!("pairing response of {} bytes", data.len());
            self.fail(SMP_UNSPECIFIED);
            return;
        }

        let mut pres = [0; 7];
        pres.copy_from_slice(data);
        self.pres = Some(pres);
        self.tk = [0; 16];
        self.r = crypto::r();

        let confirm = crypto::c1(
            &self.tk, &self.r, &pres, &preq, self.iat, &self.ia, self.rat, &self.ra,
        );
        let mut pdu = vec![SMP_PAIRING_CONFIRM];
        pdu.extend_from_slice(&confirm);
        self.outbox.push_back(pdu);
    }

    fn handle_pairing_confirm(&mut self, data: &[u8]) {
        self.pcnf = Some(data.to_vec());

        let mut pdu = vec![SMP_PAIRING_RANDOM];
        pdu.extend_from_slice(&self.r);
        self.outbox.push_back(pdu);
    }

    fn handle_pairing_random(&mut self, data: &[u8]) {
        let (preq, pres, pcnf) = match (self.preq, self.pres, self.pcnf.take()) {
            (Some(preq), Some(pres), Some(pcnf)) => (preq, pres, pcnf),
            _ => {
                debug!("pairing random out of sequence");
                return;
            }
        };
        if data.len() != 17 {
            warn!("pairing random of {} bytes", data.len());
            self.fail(SMP_UNSPECIFIED);
            return;
        }

        let mut r = [0; 16];
        r.copy_from_slice(&data[1..]);
        let mut expected = vec![SMP_PAIRING_CONFIRM];
        expected.extend_from_slice(&crypto::c1(
            &self.tk, &r, &pres, &preq, self.iat, &self.ia, self.rat, &self.ra,
        ));

        if pcnf == expected {
            let stk = crypto::s1(&self.tk, &r, &self.r);
            self.end_session();
            self.events.push_back(SmpEvent::Stk(stk));
        } else {
            self.fail(SMP_CONFIRM_VALUE_FAILED);
        }
    }

    fn fail(&mut self, reason: u8) {
        self.outbox.push_back(vec![SMP_PAIRING_FAILED, reason]);
        self.end_session();
        self.events.push_back(SmpEvent::Fail);
    }

    fn end_session(&mut self) {
        self.preq = None;
        self.pres = None;
        self.pcnf = None;
    }
}
