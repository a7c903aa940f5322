//! GATT client.
//!
//! [`Gatt`] runs the attribute protocol on one connection. Requests are serialized: at most one
//! request is outstanding, the rest wait in FIFO order. Commands that expect no response (write
//! commands and confirmations) complete as soon as they are written.
//!
//! Discovery results are cached per connection. Characteristic and descriptor operations look
//! their handles up in that cache, so the owning service (and characteristic) must have been
//! discovered first.
//!
//! Outbound PDUs are written to the connection's [`AclStream`]. Results are reported as
//! [`GattEvent`]s.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::{HashMap, VecDeque};

use crate::acl::AclStream;
use crate::att::{self, ATT_CID};
use crate::types::Uuid;
use crate::Error;

/// ATT MTU of a link before any exchange.
pub const DEFAULT_MTU: u16 = 23;

bitflags! {
    /// Properties from a characteristic declaration.
    pub struct CharacteristicProperties: u8 {
        /// The value may be broadcast in advertising data.
        const BROADCAST = 0x01;
        /// The value may be read.
        const READ = 0x02;
        /// The value may be written without a response.
        const WRITE_WITHOUT_RESPONSE = 0x04;
        /// The value may be written.
        const WRITE = 0x08;
        /// The value may be notified.
        const NOTIFY = 0x10;
        /// The value may be indicated.
        const INDICATE = 0x20;
        /// The value may be written with a signature.
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        /// More properties are in the extended properties descriptor.
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// A primary service.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Service {
    /// Service type.
    pub uuid: Uuid,
    /// Handle of the service declaration.
    pub start_handle: u16,
    /// Last handle that belongs to the service.
    pub end_handle: u16,
}

/// A characteristic of a service.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Characteristic {
    /// Characteristic type.
    pub uuid: Uuid,
    /// What the characteristic supports.
    pub properties: CharacteristicProperties,
    /// Handle of the characteristic declaration.
    pub start_handle: u16,
    /// Handle of the characteristic value.
    pub value_handle: u16,
    /// Last handle that belongs to the characteristic.
    pub end_handle: u16,
}

/// A characteristic descriptor.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Descriptor {
    /// Descriptor type.
    pub uuid: Uuid,
    /// Attribute handle.
    pub handle: u16,
}

/// Link security as seen by the client.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Security {
    /// The link is not encrypted.
    Low,
    /// The link is encrypted with an unauthenticated key.
    Medium,
}

/// Results of GATT operations and unsolicited server messages.
#[derive(Clone, Debug, PartialEq)]
pub enum GattEvent {
    /// The MTU exchange finished. Carries the MTU now in use.
    Mtu(u16),
    /// Primary service discovery finished.
    ServicesDiscover(Vec<Uuid>),
    /// Included service discovery finished.
    IncludedServicesDiscover {
        /// Service that was searched.
        service: Uuid,
        /// Types of the included services.
        included: Vec<Uuid>,
    },
    /// Characteristic discovery finished.
    CharacteristicsDiscover {
        /// Service that was searched.
        service: Uuid,
        /// Characteristics found, in handle order.
        characteristics: Vec<Characteristic>,
    },
    /// Descriptor discovery finished.
    DescriptorsDiscover {
        /// Owning service.
        service: Uuid,
        /// Characteristic that was searched.
        characteristic: Uuid,
        /// Types of the descriptors found.
        descriptors: Vec<Uuid>,
    },
    /// A characteristic value was read, notified or indicated.
    Read {
        /// Owning service.
        service: Uuid,
        /// The characteristic.
        characteristic: Uuid,
        /// The value.
        data: Vec<u8>,
        /// The server sent the value on its own.
        is_notification: bool,
    },
    /// A characteristic value was written.
    Write {
        /// Owning service.
        service: Uuid,
        /// The characteristic.
        characteristic: Uuid,
    },
    /// Broadcasting of a characteristic was configured.
    Broadcast {
        /// Owning service.
        service: Uuid,
        /// The characteristic.
        characteristic: Uuid,
        /// Broadcasting is now on.
        state: bool,
    },
    /// Notifications or indications of a characteristic were configured.
    Notify {
        /// Owning service.
        service: Uuid,
        /// The characteristic.
        characteristic: Uuid,
        /// Notifications are now on.
        state: bool,
    },
    /// A descriptor value was read.
    ValueRead {
        /// Owning service.
        service: Uuid,
        /// Owning characteristic.
        characteristic: Uuid,
        /// The descriptor.
        descriptor: Uuid,
        /// The value.
        data: Vec<u8>,
    },
    /// A descriptor value was written.
    ValueWrite {
        /// Owning service.
        service: Uuid,
        /// Owning characteristic.
        characteristic: Uuid,
        /// The descriptor.
        descriptor: Uuid,
    },
    /// An attribute was read by handle.
    HandleRead {
        /// Attribute handle.
        handle: u16,
        /// The value.
        data: Vec<u8>,
    },
    /// An attribute was written by handle.
    HandleWrite {
        /// Attribute handle.
        handle: u16,
    },
    /// The server notified or indicated a value.
    HandleNotify {
        /// Attribute handle.
        handle: u16,
        /// The value.
        data: Vec<u8>,
    },
    /// An indication was confirmed.
    HandleConfirmation {
        /// Attribute handle of the indication.
        handle: u16,
    },
}

#[derive(Copy, Clone, Debug)]
enum Target {
    Characteristic {
        service: Uuid,
        characteristic: Uuid,
    },
    Descriptor {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    },
    Handle(u16),
}

#[derive(Copy, Clone, Debug)]
enum Config {
    Broadcast,
    Notify,
}

#[derive(Debug)]
enum Response {
    Mtu {
        requested: u16,
    },
    Services {
        filter: Vec<Uuid>,
        start: u16,
        found: Vec<Service>,
    },
    IncludedServices {
        service: Service,
        filter: Vec<Uuid>,
        start: u16,
        found: Vec<Uuid>,
    },
    Characteristics {
        service: Service,
        filter: Vec<Uuid>,
        start: u16,
        found: Vec<Characteristic>,
    },
    Descriptors {
        service: Uuid,
        characteristic: Characteristic,
        start: u16,
        found: Vec<Descriptor>,
    },
    Read {
        target: Target,
        handle: u16,
        data: Vec<u8>,
    },
    Write(Target),
    PrepareWrite {
        chunk_len: usize,
    },
    ExecuteWrite(Target),
    ReadConfig {
        service: Uuid,
        characteristic: Characteristic,
        config: Config,
        enable: bool,
    },
    WriteConfig {
        service: Uuid,
        characteristic: Uuid,
        config: Config,
        enable: bool,
    },
}

#[derive(Debug)]
enum Written {
    Write(Target),
    Confirmation(u16),
}

#[derive(Debug)]
enum Completion {
    Response(Response),
    Written(Written),
}

#[derive(Debug)]
struct Command {
    pdu: Vec<u8>,
    completion: Completion,
}

impl Command {
    fn response(pdu: Vec<u8>, response: Response) -> Command {
        Command {
            pdu,
            completion: Completion::Response(response),
        }
    }

    fn written(pdu: Vec<u8>, written: Written) -> Command {
        Command {
            pdu,
            completion: Completion::Written(written),
        }
    }
}

/// GATT client of one connection.
pub struct Gatt {
    mtu: u16,
    security: Security,

    services: HashMap<Uuid, Service>,
    characteristics: HashMap<Uuid, HashMap<Uuid, Characteristic>>,
    descriptors: HashMap<Uuid, HashMap<Uuid, HashMap<Uuid, Descriptor>>>,

    current: Option<Command>,
    commands: VecDeque<Command>,
    security_error: Option<Vec<u8>>,

    events: VecDeque<GattEvent>,
}

impl Default for Gatt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gatt {
    /// Creates a client with the default MTU, low security and an empty cache.
    pub fn new() -> Gatt {
        Gatt {
            mtu: DEFAULT_MTU,
            security: Security::Low,
            services: HashMap::new(),
            characteristics: HashMap::new(),
            descriptors: HashMap::new(),
            current: None,
            commands: VecDeque::new(),
            security_error: None,
            events: VecDeque::new(),
        }
    }

    /// The ATT MTU in use.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Current link security.
    pub fn security(&self) -> Security {
        self.security
    }

    /// Whether a request is waiting for its response.
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// Removes the oldest event.
    pub fn next_event(&mut self) -> Option<GattEvent> {
        self.events.pop_front()
    }

    /// A discovered service.
    pub fn service(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.get(uuid)
    }

    /// A discovered characteristic.
    pub fn characteristic(&self, service: &Uuid, characteristic: &Uuid) -> Option<&Characteristic> {
        self.characteristics
            .get(service)
            .and_then(|characteristics| characteristics.get(characteristic))
    }

    /// A discovered descriptor.
    pub fn descriptor(
        &self,
        service: &Uuid,
        characteristic: &Uuid,
        descriptor: &Uuid,
    ) -> Option<&Descriptor> {
        self.descriptors
            .get(service)
            .and_then(|characteristics| characteristics.get(characteristic))
            .and_then(|descriptors| descriptors.get(descriptor))
    }

    /// Seeds the cache with a service known from an earlier connection.
    pub fn add_service(&mut self, service: Service) {
        self.services.insert(service.uuid, service);
    }

    /// Seeds the cache with characteristics known from an earlier connection. Replaces
    /// characteristics of the same type.
    pub fn add_characteristics(&mut self, service: &Uuid, characteristics: &[Characteristic]) {
        let cached = self.characteristics.entry(*service).or_default();
        for characteristic in characteristics {
            cached.insert(characteristic.uuid, *characteristic);
        }
        self.descriptors.entry(*service).or_default();
    }

    fn find_service(&self, uuid: &Uuid) -> Result<Service, Error> {
        self.service(uuid)
            .copied()
            .ok_or(Error::UnknownService(*uuid))
    }

    fn find_characteristic(
        &self,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<Characteristic, Error> {
        self.characteristic(service, characteristic)
            .copied()
            .ok_or(Error::UnknownCharacteristic(*service, *characteristic))
    }

    fn find_descriptor(
        &self,
        service: &Uuid,
        characteristic: &Uuid,
        descriptor: &Uuid,
    ) -> Result<Descriptor, Error> {
        self.descriptor(service, characteristic, descriptor)
            .copied()
            .ok_or(Error::UnknownDescriptor(*service, *characteristic, *descriptor))
    }

    /// Negotiates the ATT MTU. The smaller of `mtu` and the server's MTU is used from then on.
    pub fn exchange_mtu(&mut self, acl: &mut AclStream, mtu: u16) {
        self.queue(
            acl,
            Command::response(att::mtu_request(mtu), Response::Mtu { requested: mtu }),
        );
    }

    /// Discovers all primary services. A non-empty `uuids` limits which ones are reported;
    /// all of them are cached.
    pub fn discover_services(&mut self, acl: &mut AclStream, uuids: &[Uuid]) {
        let pdu = att::read_by_group_request(0x0001, 0xffff, att::PRIMARY_SERVICE_UUID);
        self.queue(
            acl,
            Command::response(
                pdu,
                Response::Services {
                    filter: uuids.to_vec(),
                    start: 0x0001,
                    found: Vec::new(),
                },
            ),
        );
    }

    /// Discovers the services included by `service`.
    ///
    /// # Errors
    ///
    /// [`UnknownService`](Error::UnknownService) if `service` has not been discovered.
    pub fn discover_included_services(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        uuids: &[Uuid],
    ) -> Result<(), Error> {
        let service = self.find_service(service)?;
        let pdu = att::read_by_type_request(
            service.start_handle,
            service.end_handle,
            att::INCLUDE_UUID,
        );
        self.queue(
            acl,
            Command::response(
                pdu,
                Response::IncludedServices {
                    service,
                    filter: uuids.to_vec(),
                    start: service.start_handle,
                    found: Vec::new(),
                },
            ),
        );
        Ok(())
    }

    /// Discovers the characteristics of `service`. A non-empty `uuids` limits which ones are
    /// reported; all of them are cached.
    ///
    /// # Errors
    ///
    /// [`UnknownService`](Error::UnknownService) if `service` has not been discovered.
    pub fn discover_characteristics(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        uuids: &[Uuid],
    ) -> Result<(), Error> {
        let service = self.find_service(service)?;
        self.characteristics.entry(service.uuid).or_default();
        self.descriptors.entry(service.uuid).or_default();

        let pdu = att::read_by_type_request(
            service.start_handle,
            service.end_handle,
            att::CHARACTERISTIC_UUID,
        );
        self.queue(
            acl,
            Command::response(
                pdu,
                Response::Characteristics {
                    service,
                    filter: uuids.to_vec(),
                    start: service.start_handle,
                    found: Vec::new(),
                },
            ),
        );
        Ok(())
    }

    /// Reads a characteristic value, following up with blob reads while the value fills the MTU.
    ///
    /// # Errors
    ///
    /// [`UnknownCharacteristic`](Error::UnknownCharacteristic) if the characteristic has not
    /// been discovered.
    pub fn read(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<(), Error> {
        let found = self.find_characteristic(service, characteristic)?;
        let target = Target::Characteristic {
            service: *service,
            characteristic: *characteristic,
        };
        self.read_attribute(acl, found.value_handle, target);
        Ok(())
    }

    /// Writes a characteristic value.
    ///
    /// Without a response, a write command is sent and [`GattEvent::Write`] follows as soon as
    /// it is written. With a response, values that do not fit one request are sent as a long
    /// write.
    ///
    /// # Errors
    ///
    /// [`UnknownCharacteristic`](Error::UnknownCharacteristic) if the characteristic has not
    /// been discovered.
    pub fn write(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), Error> {
        let found = self.find_characteristic(service, characteristic)?;
        let target = Target::Characteristic {
            service: *service,
            characteristic: *characteristic,
        };

        if without_response {
            let pdu = att::write_request(found.value_handle, data, true);
            self.queue(acl, Command::written(pdu, Written::Write(target)));
        } else if data.len() + 3 > usize::from(self.mtu) {
            self.long_write(acl, found.value_handle, data, target);
        } else {
            let pdu = att::write_request(found.value_handle, data, false);
            self.queue(acl, Command::response(pdu, Response::Write(target)));
        }
        Ok(())
    }

    fn long_write(&mut self, acl: &mut AclStream, handle: u16, data: &[u8], target: Target) {
        let limit = usize::from(self.mtu) - 5;
        for (i, chunk) in data.chunks(limit).enumerate() {
            let pdu = att::prepare_write_request(handle, (i * limit) as u16, chunk);
            self.queue(
                acl,
                Command::response(
                    pdu,
                    Response::PrepareWrite {
                        chunk_len: chunk.len(),
                    },
                ),
            );
        }
        self.queue(
            acl,
            Command::response(
                att::execute_write_request(false),
                Response::ExecuteWrite(target),
            ),
        );
    }

    /// Switches broadcasting of a characteristic value on or off through its server
    /// characteristic configuration descriptor.
    ///
    /// # Errors
    ///
    /// [`UnknownCharacteristic`](Error::UnknownCharacteristic) if the characteristic has not
    /// been discovered.
    pub fn broadcast(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
        broadcast: bool,
    ) -> Result<(), Error> {
        self.configure(acl, service, characteristic, Config::Broadcast, broadcast)
    }

    /// Switches notifications of a characteristic on or off through its client characteristic
    /// configuration descriptor. Indications are used when the characteristic cannot notify.
    ///
    /// # Errors
    ///
    /// [`UnknownCharacteristic`](Error::UnknownCharacteristic) if the characteristic has not
    /// been discovered.
    pub fn notify(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
        notify: bool,
    ) -> Result<(), Error> {
        self.configure(acl, service, characteristic, Config::Notify, notify)
    }

    fn configure(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
        config: Config,
        enable: bool,
    ) -> Result<(), Error> {
        let found = self.find_characteristic(service, characteristic)?;
        let descriptor = match config {
            Config::Broadcast => att::SERVER_CHARACTERISTIC_CONFIG_UUID,
            Config::Notify => att::CLIENT_CHARACTERISTIC_CONFIG_UUID,
        };
        let pdu = att::read_by_type_request(found.start_handle, found.end_handle, descriptor);
        self.queue(
            acl,
            Command::response(
                pdu,
                Response::ReadConfig {
                    service: *service,
                    characteristic: found,
                    config,
                    enable,
                },
            ),
        );
        Ok(())
    }

    /// Discovers the descriptors of a characteristic.
    ///
    /// # Errors
    ///
    /// [`UnknownCharacteristic`](Error::UnknownCharacteristic) if the characteristic has not
    /// been discovered.
    pub fn discover_descriptors(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<(), Error> {
        let found = self.find_characteristic(service, characteristic)?;
        self.descriptors
            .entry(*service)
            .or_default()
            .insert(*characteristic, HashMap::new());

        let start = found.value_handle.saturating_add(1);
        self.queue(
            acl,
            Command::response(
                att::find_info_request(start, found.end_handle),
                Response::Descriptors {
                    service: *service,
                    characteristic: found,
                    start,
                    found: Vec::new(),
                },
            ),
        );
        Ok(())
    }

    /// Reads a descriptor value.
    ///
    /// # Errors
    ///
    /// [`UnknownDescriptor`](Error::UnknownDescriptor) if the descriptor has not been discovered.
    pub fn read_value(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
        descriptor: &Uuid,
    ) -> Result<(), Error> {
        let found = self.find_descriptor(service, characteristic, descriptor)?;
        let target = Target::Descriptor {
            service: *service,
            characteristic: *characteristic,
            descriptor: *descriptor,
        };
        self.read_attribute(acl, found.handle, target);
        Ok(())
    }

    /// Writes a descriptor value. Always waits for the write response.
    ///
    /// # Errors
    ///
    /// [`UnknownDescriptor`](Error::UnknownDescriptor) if the descriptor has not been discovered.
    pub fn write_value(
        &mut self,
        acl: &mut AclStream,
        service: &Uuid,
        characteristic: &Uuid,
        descriptor: &Uuid,
        data: &[u8],
    ) -> Result<(), Error> {
        let found = self.find_descriptor(service, characteristic, descriptor)?;
        let target = Target::Descriptor {
            service: *service,
            characteristic: *characteristic,
            descriptor: *descriptor,
        };
        let pdu = att::write_request(found.handle, data, false);
        self.queue(acl, Command::response(pdu, Response::Write(target)));
        Ok(())
    }

    /// Reads an attribute by handle.
    pub fn read_handle(&mut self, acl: &mut AclStream, handle: u16) {
        self.read_attribute(acl, handle, Target::Handle(handle));
    }

    /// Writes an attribute by handle.
    pub fn write_handle(
        &mut self,
        acl: &mut AclStream,
        handle: u16,
        data: &[u8],
        without_response: bool,
    ) {
        let pdu = att::write_request(handle, data, without_response);
        let target = Target::Handle(handle);
        if without_response {
            self.queue(acl, Command::written(pdu, Written::Write(target)));
        } else {
            self.queue(acl, Command::response(pdu, Response::Write(target)));
        }
    }

    fn read_attribute(&mut self, acl: &mut AclStream, handle: u16, target: Target) {
        self.queue(
            acl,
            Command::response(
                att::read_request(handle),
                Response::Read {
                    target,
                    handle,
                    data: Vec::new(),
                },
            ),
        );
    }

    /// Handles a PDU received on the ATT channel.
    pub fn on_data(&mut self, acl: &mut AclStream, data: &[u8]) {
        let opcode = match data.first() {
            Some(&opcode) => opcode,
            None => return,
        };

        if let Some(current) = &self.current {
            if current.pdu == data {
                debug!("ignoring echo of the current request: {}", hex::encode(data));
                return;
            }
        }

        if opcode & att::COMMAND_FLAG != 0 {
            debug!("ignoring command 0x{:02x}", opcode);
            return;
        }

        if opcode % 2 == 0 {
            debug!("replying with REQ_NOT_SUPP to 0x{:02x}", opcode);
            acl.write(
                ATT_CID,
                &att::error_response(opcode, 0x0000, att::ECODE_REQ_NOT_SUPP),
            );
            return;
        }

        if opcode == att::OP_HANDLE_NOTIFY || opcode == att::OP_HANDLE_IND {
            self.on_handle_value(acl, opcode, data);
            return;
        }

        let command = match self.current.take() {
            Some(command) => command,
            None => {
                debug!("no request outstanding for {}", hex::encode(data));
                return;
            }
        };

        if opcode == att::OP_ERROR
            && data.len() >= 5
            && (data[4] == att::ECODE_AUTHENTICATION
                || data[4] == att::ECODE_AUTHORIZATION
                || data[4] == att::ECODE_INSUFF_ENC)
            && self.security != Security::Medium
        {
            debug!("request needs security, pairing first");
            self.current = Some(command);
            self.security_error = Some(data.to_vec());
            acl.encrypt();
            return;
        }

        if let Completion::Response(response) = command.completion {
            self.complete(response, data);
        }
        self.write_next(acl);
    }

    /// Handles a change of link encryption. Once encrypted, the request that needed it is sent
    /// again.
    pub fn on_encrypt(&mut self, acl: &mut AclStream, encrypted: bool) {
        if !encrypted {
            return;
        }
        self.security = Security::Medium;
        self.security_error = None;
        if let Some(current) = &self.current {
            acl.write(ATT_CID, &current.pdu);
        }
    }

    /// Handles a failed pairing. The request that needed security completes with the error the
    /// server gave it.
    pub fn on_encrypt_fail(&mut self, acl: &mut AclStream) {
        let error = match self.security_error.take() {
            Some(error) => error,
            None => return,
        };
        if let Some(Command {
            completion: Completion::Response(response),
            ..
        }) = self.current.take()
        {
            self.complete(response, &error);
        }
        self.write_next(acl);
    }

    fn on_handle_value(&mut self, acl: &mut AclStream, opcode: u8, data: &[u8]) {
        if data.len() < 3 {
            warn!("handle value PDU of {} bytes", data.len());
            return;
        }
        let handle = LittleEndian::read_u16(&data[1..3]);
        let value = &data[3..];

        self.events.push_back(GattEvent::HandleNotify {
            handle,
            data: value.to_vec(),
        });

        if opcode == att::OP_HANDLE_IND {
            self.queue(
                acl,
                Command::written(att::handle_confirmation(), Written::Confirmation(handle)),
            );
        }

        for (service, characteristics) in &self.characteristics {
            for characteristic in characteristics.values() {
                if characteristic.value_handle == handle {
                    self.events.push_back(GattEvent::Read {
                        service: *service,
                        characteristic: characteristic.uuid,
                        data: value.to_vec(),
                        is_notification: true,
                    });
                }
            }
        }
    }

    fn queue(&mut self, acl: &mut AclStream, command: Command) {
        self.commands.push_back(command);
        if self.current.is_none() {
            self.write_next(acl);
        }
    }

    fn write_next(&mut self, acl: &mut AclStream) {
        while let Some(command) = self.commands.pop_front() {
            acl.write(ATT_CID, &command.pdu);
            match command.completion {
                Completion::Written(written) => self.written(written),
                Completion::Response(_) => {
                    self.current = Some(command);
                    break;
                }
            }
        }
    }

    fn written(&mut self, written: Written) {
        match written {
            Written::Write(target) => self.write_done(target),
            Written::Confirmation(handle) => self
                .events
                .push_back(GattEvent::HandleConfirmation { handle }),
        }
    }

    fn complete(&mut self, response: Response, data: &[u8]) {
        let opcode = data[0];
        match response {
            Response::Mtu { requested } => {
                if opcode == att::OP_MTU_RESP && data.len() >= 3 {
                    let server = LittleEndian::read_u16(&data[1..3]);
                    self.mtu = requested.min(server).max(DEFAULT_MTU);
                }
                self.events.push_back(GattEvent::Mtu(self.mtu));
            }
            Response::Services {
                filter,
                start,
                mut found,
            } => {
                let last = if opcode == att::OP_READ_BY_GROUP_RESP {
                    let page = parse_services(data);
                    let last = page.last().map(|service| service.end_handle);
                    found.extend(page);
                    last
                } else {
                    None
                };

                match last {
                    Some(end) if end != 0xffff && end >= start => {
                        let pdu =
                            att::read_by_group_request(end + 1, 0xffff, att::PRIMARY_SERVICE_UUID);
                        self.commands.push_back(Command::response(
                            pdu,
                            Response::Services {
                                filter,
                                start: end + 1,
                                found,
                            },
                        ));
                    }
                    _ => self.services_discovered(&filter, found),
                }
            }
            Response::IncludedServices {
                service,
                filter,
                start,
                mut found,
            } => {
                let last = if opcode == att::OP_READ_BY_TYPE_RESP {
                    let mut last = None;
                    for record in records(data, 6) {
                        last = Some(LittleEndian::read_u16(&record[0..2]));
                        match Uuid::from_le_bytes(&record[6..]) {
                            Some(uuid) => found.push(uuid),
                            None => debug!("included service without a 16-bit type"),
                        }
                    }
                    last
                } else {
                    None
                };

                match last {
                    Some(handle) if handle < service.end_handle && handle >= start => {
                        let pdu = att::read_by_type_request(
                            handle + 1,
                            service.end_handle,
                            att::INCLUDE_UUID,
                        );
                        self.commands.push_back(Command::response(
                            pdu,
                            Response::IncludedServices {
                                service,
                                filter,
                                start: handle + 1,
                                found,
                            },
                        ));
                    }
                    _ => {
                        let included = found
                            .into_iter()
                            .filter(|uuid| filter.is_empty() || filter.contains(uuid))
                            .collect();
                        self.events.push_back(GattEvent::IncludedServicesDiscover {
                            service: service.uuid,
                            included,
                        });
                    }
                }
            }
            Response::Characteristics {
                service,
                filter,
                start,
                mut found,
            } => {
                let last = if opcode == att::OP_READ_BY_TYPE_RESP {
                    let page = parse_characteristics(data);
                    let last = page.last().map(|characteristic| characteristic.value_handle);
                    found.extend(page);
                    last
                } else {
                    None
                };

                match last {
                    Some(handle) if handle < service.end_handle && handle >= start => {
                        let pdu = att::read_by_type_request(
                            handle + 1,
                            service.end_handle,
                            att::CHARACTERISTIC_UUID,
                        );
                        self.commands.push_back(Command::response(
                            pdu,
                            Response::Characteristics {
                                service,
                                filter,
                                start: handle + 1,
                                found,
                            },
                        ));
                    }
                    _ => self.characteristics_discovered(&service, &filter, found),
                }
            }
            Response::Descriptors {
                service,
                characteristic,
                start,
                mut found,
            } => {
                let last = if opcode == att::OP_FIND_INFO_RESP {
                    let page = parse_descriptors(data);
                    let last = page.last().map(|descriptor| descriptor.handle);
                    found.extend(page);
                    last
                } else {
                    None
                };

                match last {
                    Some(handle) if handle < characteristic.end_handle && handle >= start => {
                        let pdu = att::find_info_request(handle + 1, characteristic.end_handle);
                        self.commands.push_back(Command::response(
                            pdu,
                            Response::Descriptors {
                                service,
                                characteristic,
                                start: handle + 1,
                                found,
                            },
                        ));
                    }
                    _ => {
                        let cached = self
                            .descriptors
                            .entry(service)
                            .or_default()
                            .entry(characteristic.uuid)
                            .or_default();
                        let mut descriptors = Vec::with_capacity(found.len());
                        for descriptor in found {
                            cached.insert(descriptor.uuid, descriptor);
                            descriptors.push(descriptor.uuid);
                        }
                        self.events.push_back(GattEvent::DescriptorsDiscover {
                            service,
                            characteristic: characteristic.uuid,
                            descriptors,
                        });
                    }
                }
            }
            Response::Read {
                target,
                handle,
                data: mut value,
            } => {
                if opcode == att::OP_READ_RESP || opcode == att::OP_READ_BLOB_RESP {
                    value.extend_from_slice(&data[1..]);
                    if data.len() == usize::from(self.mtu) {
                        let pdu = att::read_blob_request(handle, value.len() as u16);
                        self.commands.push_back(Command::response(
                            pdu,
                            Response::Read {
                                target,
                                handle,
                                data: value,
                            },
                        ));
                        return;
                    }
                }
                self.read_done(target, value);
            }
            Response::Write(target) => {
                if opcode == att::OP_WRITE_RESP {
                    self.write_done(target);
                }
            }
            Response::PrepareWrite { chunk_len } => {
                if opcode != att::OP_PREPARE_WRITE_RESP {
                    debug!("unexpected reply to prepare write: 0x{:02x}", opcode);
                } else if data.len() != chunk_len + 5 {
                    debug!("prepare write echoed {} bytes", data.len());
                }
            }
            Response::ExecuteWrite(target) => {
                if opcode == att::OP_EXECUTE_WRITE_RESP {
                    self.write_done(target);
                }
            }
            Response::ReadConfig {
                service,
                characteristic,
                config,
                enable,
            } => {
                if opcode != att::OP_READ_BY_TYPE_RESP || data.len() < 6 {
                    debug!("no configuration descriptor for {}", characteristic.uuid);
                    return;
                }
                let handle = LittleEndian::read_u16(&data[2..4]);
                let mut value = LittleEndian::read_u16(&data[4..6]);
                match config {
                    Config::Broadcast => {
                        if enable {
                            value |= 0x0001;
                        } else {
                            value &= !0x0001;
                        }
                    }
                    Config::Notify => {
                        let properties = characteristic.properties;
                        let bit = if properties.contains(CharacteristicProperties::NOTIFY) {
                            0x0001
                        } else if properties.contains(CharacteristicProperties::INDICATE) {
                            0x0002
                        } else {
                            0x0000
                        };
                        if enable {
                            value |= bit;
                        } else {
                            value &= !bit;
                        }
                    }
                }

                let mut bytes = [0; 2];
                LittleEndian::write_u16(&mut bytes, value);
                self.commands.push_back(Command::response(
                    att::write_request(handle, &bytes, false),
                    Response::WriteConfig {
                        service,
                        characteristic: characteristic.uuid,
                        config,
                        enable,
                    },
                ));
            }
            Response::WriteConfig {
                service,
                characteristic,
                config,
                enable,
            } => {
                if opcode == att::OP_WRITE_RESP {
                    self.events.push_back(match config {
                        Config::Broadcast => GattEvent::Broadcast {
                            service,
                            characteristic,
                            state: enable,
                        },
                        Config::Notify => GattEvent::Notify {
                            service,
                            characteristic,
                            state: enable,
                        },
                    });
                }
            }
        }
    }

    fn services_discovered(&mut self, filter: &[Uuid], found: Vec<Service>) {
        let mut uuids = Vec::new();
        for service in found {
            if (filter.is_empty() || filter.contains(&service.uuid)) && !uuids.contains(&service.uuid)
            {
                uuids.push(service.uuid);
            }
            self.services.insert(service.uuid, service);
        }
        self.events.push_back(GattEvent::ServicesDiscover(uuids));
    }

    fn characteristics_discovered(
        &mut self,
        service: &Service,
        filter: &[Uuid],
        mut found: Vec<Characteristic>,
    ) {
        let mut end_handle = service.end_handle;
        for characteristic in found.iter_mut().rev() {
            characteristic.end_handle = end_handle;
            end_handle = characteristic.start_handle.saturating_sub(1);
        }

        let cached = self.characteristics.entry(service.uuid).or_default();
        for characteristic in &found {
            cached.insert(characteristic.uuid, *characteristic);
        }

        let characteristics = found
            .into_iter()
            .filter(|characteristic| filter.is_empty() || filter.contains(&characteristic.uuid))
            .collect();
        self.events.push_back(GattEvent::CharacteristicsDiscover {
            service: service.uuid,
            characteristics,
        });
    }

    fn read_done(&mut self, target: Target, data: Vec<u8>) {
        self.events.push_back(match target {
            Target::Characteristic {
                service,
                characteristic,
            } => GattEvent::Read {
                service,
                characteristic,
                data,
                is_notification: false,
            },
            Target::Descriptor {
                service,
                characteristic,
                descriptor,
            } => GattEvent::ValueRead {
                service,
                characteristic,
                descriptor,
                data,
            },
            Target::Handle(handle) => GattEvent::HandleRead { handle, data },
        });
    }

    fn write_done(&mut self, target: Target) {
        self.events.push_back(match target {
            Target::Characteristic {
                service,
                characteristic,
            } => GattEvent::Write {
                service,
                characteristic,
            },
            Target::Descriptor {
                service,
                characteristic,
                descriptor,
            } => GattEvent::ValueWrite {
                service,
                characteristic,
                descriptor,
            },
            Target::Handle(handle) => GattEvent::HandleWrite { handle },
        });
    }
}

/// Fixed-size records of a read by type or read by group type response. Records shorter than
/// `min_len` are not parsed.
fn records(data: &[u8], min_len: usize) -> std::slice::ChunksExact<'_, u8> {
    let stride = data.get(1).map_or(0, |&stride| usize::from(stride));
    let body: &[u8] = if stride >= min_len { &data[2..] } else { &[] };
    body.chunks_exact(stride.max(min_len))
}

fn parse_services(data: &[u8]) -> Vec<Service> {
    records(data, 6)
        .filter_map(|record| {
            let uuid = Uuid::from_le_bytes(&record[4..]);
            if uuid.is_none() {
                debug!("service with a malformed type: {}", hex::encode(record));
            }
            Some(Service {
                uuid: uuid?,
                start_handle: LittleEndian::read_u16(&record[0..2]),
                end_handle: LittleEndian::read_u16(&record[2..4]),
            })
        })
        .collect()
}

fn parse_characteristics(data: &[u8]) -> Vec<Characteristic> {
    records(data, 7)
        .filter_map(|record| {
            let uuid = Uuid::from_le_bytes(&record[5..]);
            if uuid.is_none() {
                debug!("characteristic with a malformed type: {}", hex::encode(record));
            }
            Some(Characteristic {
                uuid: uuid?,
                properties: CharacteristicProperties::from_bits_truncate(record[2]),
                start_handle: LittleEndian::read_u16(&record[0..2]),
                value_handle: LittleEndian::read_u16(&record[3..5]),
                end_handle: 0,
            })
        })
        .collect()
}

fn parse_descriptors(data: &[u8]) -> Vec<Descriptor> {
    let stride = match data.get(1) {
        Some(1) => 4,
        Some(2) => 18,
        _ => return Vec::new(),
    };
    data[2..]
        .chunks_exact(stride)
        .filter_map(|record| {
            Some(Descriptor {
                uuid: Uuid::from_le_bytes(&record[2..])?,
                handle: LittleEndian::read_u16(&record[0..2]),
            })
        })
        .collect()
}
