//! The central: one command and event surface over the whole stack.
//!
//! [`Central`] owns the [`Transport`], the [`Gap`] discovery engine and one bundle of
//! ACL stream, GATT client and signaling engine per connection. Peripherals are addressed by
//! [`PeripheralId`]; a peripheral must have been discovered (or connected) before it can be
//! connected to.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::acl::{AclCommand, AclEvent, AclStream, Inbound};
use crate::command::{Commands, ConnectParameters, CreateConnectionParameters, ScanParameters};
use crate::command::USER_ENDED_CONNECTION;
use crate::event::{LeConnectionComplete, Role};
use crate::gap::{Discovery, Gap, GapEvent, ScanState};
use crate::gatt::{Gatt, GattEvent};
use crate::signaling::Signaling;
use crate::socket::HciSocket;
use crate::transport::{HciEvent, Transport};
use crate::types::{Address, AddressType, PeripheralId, State, Uuid};
use crate::{Config, ConnectError, Error};
use hci::{BdAddr, ConnectionHandle};

/// Everything the central reports to the application.
#[derive(Clone, Debug, PartialEq)]
pub enum CentralEvent {
    /// The adapter changed state. Repeated states are not reported.
    StateChange(State),
    /// The adapter's public address is known.
    AddressChange(Address),
    /// Scan parameters were applied.
    ScanParametersSet,
    /// Scanning started.
    ScanStart {
        /// Duplicate reports are filtered by the controller.
        filter_duplicates: bool,
    },
    /// Scanning stopped.
    ScanStop,
    /// A peripheral was discovered, or its advertisement changed.
    Discover {
        /// The peripheral.
        id: PeripheralId,
        /// What was seen.
        discovery: Discovery,
    },
    /// A connection attempt finished.
    Connect {
        /// The peripheral.
        id: PeripheralId,
        /// Whether it is now connected.
        result: Result<(), ConnectError>,
    },
    /// A connection ended.
    Disconnect {
        /// The peripheral.
        id: PeripheralId,
        /// HCI status code explaining why.
        reason: u8,
    },
    /// The signal strength of a connection was read.
    RssiUpdate {
        /// The peripheral.
        id: PeripheralId,
        /// Signal strength, dBm.
        rssi: i8,
    },
    /// Pairing with a peripheral failed.
    EncryptFail {
        /// The peripheral.
        id: PeripheralId,
    },
    /// A peripheral distributed its long term key.
    Ltk {
        /// The peripheral.
        id: PeripheralId,
        /// The key.
        ltk: Vec<u8>,
    },
    /// A peripheral distributed the identification of its long term key.
    MasterIdent {
        /// The peripheral.
        id: PeripheralId,
        /// Encrypted diversifier.
        ediv: Vec<u8>,
        /// Random number.
        rand: Vec<u8>,
    },
    /// A GATT operation finished, or the peripheral sent a value on its own.
    Gatt {
        /// The peripheral.
        id: PeripheralId,
        /// What happened.
        event: GattEvent,
    },
}

struct Connection {
    id: PeripheralId,
    acl: AclStream,
    gatt: Gatt,
    signaling: Signaling,
}

#[derive(Clone, Debug)]
struct PendingConnect {
    id: PeripheralId,
    address: Address,
    address_type: AddressType,
    parameters: ConnectParameters,
}

/// A BLE central on top of an [`HciSocket`].
pub struct Central<S> {
    transport: Transport<S>,
    gap: Gap,
    config: Config,

    state: Option<State>,
    scan_service_uuids: Option<Vec<Uuid>>,
    peripherals: HashMap<PeripheralId, (Address, AddressType)>,

    connecting: Option<PendingConnect>,
    connect_queue: VecDeque<PendingConnect>,
    connections: HashMap<u16, Connection>,
    handles: HashMap<PeripheralId, u16>,

    events: VecDeque<CentralEvent>,
}

impl<S> Central<S>
where
    S: HciSocket,
{
    /// Creates a central on an unbound socket.
    pub fn new(socket: S, config: Config) -> Central<S> {
        Central {
            transport: Transport::new(socket, &config),
            gap: Gap::new(),
            config,
            state: None,
            scan_service_uuids: None,
            peripherals: HashMap::new(),
            connecting: None,
            connect_queue: VecDeque::new(),
            connections: HashMap::new(),
            handles: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    /// Binds the socket and starts bringing the adapter up.
    ///
    /// # Errors
    ///
    /// The socket could not be bound or written.
    pub fn init(&mut self) -> Result<(), Error> {
        let result = self.transport.init();
        self.dispatch();
        result
    }

    /// Reads everything the socket has ready and turns it into events.
    pub fn process(&mut self) {
        self.transport.process();
        self.dispatch();
    }

    /// Lets the transport poll the adapter state.
    pub fn tick(&mut self, now: Instant) {
        self.transport.tick(now);
        self.dispatch();
    }

    /// Removes the oldest event.
    pub fn next_event(&mut self) -> Option<CentralEvent> {
        self.events.pop_front()
    }

    /// The most recent adapter state.
    pub fn state(&self) -> Option<State> {
        self.state
    }

    /// The transport engine.
    pub fn transport(&self) -> &Transport<S> {
        &self.transport
    }

    /// The underlying socket.
    pub fn socket(&self) -> &S {
        self.transport.socket()
    }

    /// The underlying socket, mutably.
    pub fn socket_mut(&mut self) -> &mut S {
        self.transport.socket_mut()
    }

    /// Whether a peripheral is connected.
    pub fn is_connected(&self, id: &PeripheralId) -> bool {
        self.handles.contains_key(id)
    }

    /// The GATT client of a connected peripheral.
    pub fn gatt(&self, id: &PeripheralId) -> Option<&Gatt> {
        let handle = self.handles.get(id)?;
        self.connections
            .get(handle)
            .map(|connection| &connection.gatt)
    }

    /// Resets the controller.
    ///
    /// # Errors
    ///
    /// The command could not be written.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.transport.reset()
    }

    /// Applies scan interval and window, in units of 0.625 ms.
    ///
    /// # Errors
    ///
    /// The command could not be written.
    pub fn set_scan_parameters(&mut self, interval: u16, window: u16) -> Result<(), Error> {
        self.gap
            .set_scan_parameters(&mut self.transport, &ScanParameters { interval, window })
    }

    /// Sets the random address the controller uses when scanning and connecting with a random
    /// own address.
    ///
    /// # Errors
    ///
    /// The command could not be written.
    pub fn set_random_address(&mut self, address: &Address) -> Result<(), Error> {
        self.transport.set_random_address(address)
    }

    /// Starts scanning. Only peripherals advertising one of `service_uuids`, as a service or
    /// in service data, are reported; an empty list reports everything.
    ///
    /// # Errors
    ///
    /// A command could not be written.
    pub fn start_scanning(
        &mut self,
        service_uuids: &[Uuid],
        allow_duplicates: bool,
    ) -> Result<(), Error> {
        self.scan_service_uuids = Some(service_uuids.to_vec());
        self.gap.start_scanning(&mut self.transport, allow_duplicates)
    }

    /// Stops scanning.
    ///
    /// # Errors
    ///
    /// The command could not be written.
    pub fn stop_scanning(&mut self) -> Result<(), Error> {
        self.gap.stop_scanning(&mut self.transport)
    }

    /// Connects to a discovered peripheral. Only one attempt runs at a time; later requests wait
    /// for it to finish.
    ///
    /// # Errors
    ///
    /// [`UnknownPeripheral`](Error::UnknownPeripheral) if the peripheral has not been seen, or
    /// the command could not be written.
    pub fn connect(
        &mut self,
        id: &PeripheralId,
        parameters: Option<ConnectParameters>,
    ) -> Result<(), Error> {
        let (address, address_type) = *self
            .peripherals
            .get(id)
            .ok_or_else(|| Error::UnknownPeripheral(id.clone()))?;
        self.connect_queue.push_back(PendingConnect {
            id: id.clone(),
            address,
            address_type,
            parameters: parameters.unwrap_or_default(),
        });
        self.connect_next()
    }

    /// Abandons connecting to a peripheral. Waiting requests are dropped; an attempt in progress
    /// is canceled and finishes with a failed [`Connect`](CentralEvent::Connect).
    ///
    /// # Errors
    ///
    /// The cancel command could not be written.
    pub fn cancel_connect(&mut self, id: &PeripheralId) -> Result<(), Error> {
        self.connect_queue.retain(|pending| pending.id != *id);
        match &self.connecting {
            Some(pending) if pending.id == *id => self.transport.cancel_connect(),
            _ => Ok(()),
        }
    }

    /// Disconnects a peripheral.
    ///
    /// # Errors
    ///
    /// [`UnknownPeripheral`](Error::UnknownPeripheral) if it is not connected, or the command
    /// could not be written.
    pub fn disconnect(&mut self, id: &PeripheralId) -> Result<(), Error> {
        let handle = self.handle(id)?;
        self.transport
            .disconnect(ConnectionHandle(handle), USER_ENDED_CONNECTION)
    }

    /// Reads the signal strength of a connection.
    ///
    /// # Errors
    ///
    /// [`UnknownPeripheral`](Error::UnknownPeripheral) if it is not connected, or the command
    /// could not be written.
    pub fn update_rssi(&mut self, id: &PeripheralId) -> Result<(), Error> {
        let handle = self.handle(id)?;
        self.transport.read_rssi(ConnectionHandle(handle))
    }

    /// Stops scanning and disconnects everything. Failures are logged.
    pub fn on_exit(&mut self) {
        match self.gap.scan_state() {
            ScanState::Starting | ScanState::Started => {
                if let Err(e) = self.stop_scanning() {
                    warn!("stopping scan on exit: {}", e);
                }
            }
            _ => (),
        }

        let handles: Vec<u16> = self.connections.keys().copied().collect();
        for handle in handles {
            if let Err(e) = self
                .transport
                .disconnect(ConnectionHandle(handle), USER_ENDED_CONNECTION)
            {
                warn!("disconnecting handle {} on exit: {}", handle, e);
            }
        }
    }

    /// Negotiates the ATT MTU again.
    ///
    /// # Errors
    ///
    /// [`UnknownPeripheral`](Error::UnknownPeripheral) if it is not connected.
    pub fn exchange_mtu(&mut self, id: &PeripheralId, mtu: u16) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.exchange_mtu(acl, mtu);
            Ok(())
        })
    }

    /// Discovers primary services. See [`Gatt::discover_services`].
    ///
    /// # Errors
    ///
    /// [`UnknownPeripheral`](Error::UnknownPeripheral) if it is not connected.
    pub fn discover_services(&mut self, id: &PeripheralId, uuids: &[Uuid]) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.discover_services(acl, uuids);
            Ok(())
        })
    }

    /// Discovers included services. See [`Gatt::discover_included_services`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the service is unknown.
    pub fn discover_included_services(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        uuids: &[Uuid],
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.discover_included_services(acl, service, uuids)
        })
    }

    /// Discovers characteristics. See [`Gatt::discover_characteristics`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the service is unknown.
    pub fn discover_characteristics(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        uuids: &[Uuid],
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.discover_characteristics(acl, service, uuids)
        })
    }

    /// Reads a characteristic. See [`Gatt::read`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the characteristic is unknown.
    pub fn read(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| gatt.read(acl, service, characteristic))
    }

    /// Writes a characteristic. See [`Gatt::write`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the characteristic is unknown.
    pub fn write(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        characteristic: &Uuid,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.write(acl, service, characteristic, data, without_response)
        })
    }

    /// Configures broadcasting. See [`Gatt::broadcast`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the characteristic is unknown.
    pub fn broadcast(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        characteristic: &Uuid,
        broadcast: bool,
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.broadcast(acl, service, characteristic, broadcast)
        })
    }

    /// Configures notifications. See [`Gatt::notify`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the characteristic is unknown.
    pub fn notify(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        characteristic: &Uuid,
        notify: bool,
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.notify(acl, service, characteristic, notify)
        })
    }

    /// Discovers descriptors. See [`Gatt::discover_descriptors`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the characteristic is unknown.
    pub fn discover_descriptors(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.discover_descriptors(acl, service, characteristic)
        })
    }

    /// Reads a descriptor. See [`Gatt::read_value`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the descriptor is unknown.
    pub fn read_value(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        characteristic: &Uuid,
        descriptor: &Uuid,
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.read_value(acl, service, characteristic, descriptor)
        })
    }

    /// Writes a descriptor. See [`Gatt::write_value`].
    ///
    /// # Errors
    ///
    /// The peripheral is not connected or the descriptor is unknown.
    pub fn write_value(
        &mut self,
        id: &PeripheralId,
        service: &Uuid,
        characteristic: &Uuid,
        descriptor: &Uuid,
        data: &[u8],
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.write_value(acl, service, characteristic, descriptor, data)
        })
    }

    /// Reads an attribute by handle.
    ///
    /// # Errors
    ///
    /// [`UnknownPeripheral`](Error::UnknownPeripheral) if it is not connected.
    pub fn read_handle(&mut self, id: &PeripheralId, handle: u16) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.read_handle(acl, handle);
            Ok(())
        })
    }

    /// Writes an attribute by handle.
    ///
    /// # Errors
    ///
    /// [`UnknownPeripheral`](Error::UnknownPeripheral) if it is not connected.
    pub fn write_handle(
        &mut self,
        id: &PeripheralId,
        handle: u16,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), Error> {
        self.with_gatt(id, |gatt, acl| {
            gatt.write_handle(acl, handle, data, without_response);
            Ok(())
        })
    }

    fn handle(&self, id: &PeripheralId) -> Result<u16, Error> {
        self.handles
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownPeripheral(id.clone()))
    }

    fn with_gatt<F>(&mut self, id: &PeripheralId, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Gatt, &mut AclStream) -> Result<(), Error>,
    {
        let handle = self.handle(id)?;
        let connection = self
            .connections
            .get_mut(&handle)
            .ok_or_else(|| Error::UnknownPeripheral(id.clone()))?;
        f(&mut connection.gatt, &mut connection.acl)?;
        self.pump(handle)
    }

    fn connect_next(&mut self) -> Result<(), Error> {
        if self.connecting.is_some() {
            return Ok(());
        }
        let pending = match self.connect_queue.pop_front() {
            Some(pending) => pending,
            None => return Ok(()),
        };

        debug!("connecting to {}", pending.id);
        let params = CreateConnectionParameters {
            peer_address: pending.address,
            peer_address_type: pending.address_type,
            connection: pending.parameters,
        };
        self.connecting = Some(pending);
        let result = self.transport.create_le_conn(&params);
        if result.is_err() {
            self.connecting = None;
        }
        result
    }

    fn dispatch(&mut self) {
        while let Some(event) = self.transport.next_event() {
            if let Err(e) = self.on_hci_event(event) {
                warn!("handling HCI event: {}", e);
            }
            self.drain_gap();
        }
    }

    fn on_hci_event(&mut self, event: HciEvent) -> Result<(), Error> {
        match event {
            HciEvent::StateChange(state) => {
                if self.state != Some(state) {
                    self.state = Some(state);
                    self.events.push_back(CentralEvent::StateChange(state));
                }
            }
            HciEvent::AddressChange(address) => {
                self.events.push_back(CentralEvent::AddressChange(address));
            }
            HciEvent::ReadLocalVersion(version) => debug!("local version: {:?}", version),
            HciEvent::ScanParametersSet => self.gap.on_scan_parameters_set(),
            HciEvent::ScanEnableSet { status } => self.gap.on_scan_enable_set(status),
            HciEvent::ScanEnableSetCmd {
                enable,
                filter_duplicates,
            } => self.gap.on_scan_enable_set_cmd(enable, filter_duplicates),
            HciEvent::AdvertisingReport(report) => self.gap.on_advertising_report(&report),
            HciEvent::ExtendedAdvertisingReport(report) => {
                self.gap.on_extended_advertising_report(&report)
            }
            HciEvent::ConnectionComplete(result) => self.on_connection_complete(result)?,
            HciEvent::ConnectionUpdateComplete(update) => {
                debug!("connection parameters changed: {:?}", update)
            }
            HciEvent::Disconnection {
                conn_handle,
                reason,
            } => self.on_disconnection(conn_handle, reason),
            HciEvent::EncryptionChange {
                conn_handle,
                encrypted,
            } => {
                if let Some(connection) = self.connections.get_mut(&conn_handle.0) {
                    connection.gatt.on_encrypt(&mut connection.acl, encrypted);
                }
                self.pump(conn_handle.0)?;
            }
            HciEvent::AclData {
                conn_handle,
                cid,
                data,
            } => {
                match self.connections.get_mut(&conn_handle.0) {
                    Some(connection) => match connection.acl.push(cid, data) {
                        Some(Inbound::Att(data)) => connection.gatt.on_data(&mut connection.acl, &data),
                        Some(Inbound::Signaling(data)) => {
                            connection.signaling.on_data(&mut connection.acl, &data)
                        }
                        None => (),
                    },
                    None => {
                        debug!("ACL data for unknown handle {}", conn_handle.0);
                        return Ok(());
                    }
                }
                self.pump(conn_handle.0)?;
            }
            HciEvent::RssiRead { conn_handle, rssi } => {
                if let Some(connection) = self.connections.get(&conn_handle.0) {
                    self.events.push_back(CentralEvent::RssiUpdate {
                        id: connection.id.clone(),
                        rssi,
                    });
                }
            }
        }
        Ok(())
    }

    fn on_connection_complete(
        &mut self,
        result: Result<LeConnectionComplete, ConnectError>,
    ) -> Result<(), Error> {
        match result {
            Ok(complete) => {
                if complete.role != Role::Central {
                    debug!("ignoring connection in the peripheral role");
                    return Ok(());
                }
                let id = PeripheralId::from(&complete.peer_address);
                if let Some(pending) = &self.connecting {
                    if pending.id == id {
                        self.connecting = None;
                    }
                }
                let connected = self.on_connected(id, &complete);
                let next = self.connect_next();
                return connected.and(next);
            }
            Err(error) => match self.connecting.take() {
                Some(pending) => {
                    debug!("connecting to {} failed: {}", pending.id, error);
                    self.connect_queue.retain(|queued| queued.id != pending.id);
                    self.events.push_back(CentralEvent::Connect {
                        id: pending.id,
                        result: Err(error),
                    });
                }
                None => debug!("connection failed with no attempt pending: {}", error),
            },
        }
        self.connect_next()
    }

    fn on_connected(&mut self, id: PeripheralId, complete: &LeConnectionComplete) -> Result<(), Error> {
        let handle = complete.conn_handle;
        let local = self
            .transport
            .address()
            .unwrap_or(Address(BdAddr([0; 6])));
        let mut acl = AclStream::new(
            handle,
            AddressType::Public,
            &local,
            complete.peer_address_type,
            &complete.peer_address,
        );
        let mut gatt = Gatt::new();
        gatt.exchange_mtu(&mut acl, self.config.mtu);
        let send_response =
            self.config.user_channel || !self.config.kernel_accepts_parameter_updates;

        self.peripherals.insert(
            id.clone(),
            (complete.peer_address, complete.peer_address_type),
        );
        self.handles.insert(id.clone(), handle.0);
        self.connections.insert(
            handle.0,
            Connection {
                id: id.clone(),
                acl,
                gatt,
                signaling: Signaling::new(handle, send_response),
            },
        );
        self.events.push_back(CentralEvent::Connect { id, result: Ok(()) });
        self.pump(handle.0)
    }

    fn on_disconnection(&mut self, conn_handle: ConnectionHandle, reason: u8) {
        match self.connections.remove(&conn_handle.0) {
            Some(mut connection) => {
                connection.acl.end();
                self.handles.remove(&connection.id);
                self.events.push_back(CentralEvent::Disconnect {
                    id: connection.id,
                    reason,
                });
            }
            None => debug!("disconnection of unknown handle {}", conn_handle.0),
        }
    }

    /// Moves everything a connection produced to the transport and the event queue.
    fn pump(&mut self, handle: u16) -> Result<(), Error> {
        let connection = match self.connections.get_mut(&handle) {
            Some(connection) => connection,
            None => return Ok(()),
        };

        while let Some(event) = connection.acl.next_event() {
            let id = connection.id.clone();
            match event {
                AclEvent::EncryptFail => {
                    connection.gatt.on_encrypt_fail(&mut connection.acl);
                    self.events.push_back(CentralEvent::EncryptFail { id });
                }
                AclEvent::Ltk(ltk) => self.events.push_back(CentralEvent::Ltk { id, ltk }),
                AclEvent::MasterIdent { ediv, rand } => self
                    .events
                    .push_back(CentralEvent::MasterIdent { id, ediv, rand }),
            }
        }
        while let Some(event) = connection.gatt.next_event() {
            self.events.push_back(CentralEvent::Gatt {
                id: connection.id.clone(),
                event,
            });
        }

        // A failed write leaves the remaining commands queued for the next pump. ACL data stays
        // queued in the transport even when its flush fails.
        let conn_handle = connection.acl.conn_handle();
        while let Some(update) = connection.signaling.next_event() {
            if let Err(e) = self.transport.conn_update_le(&update.to_update()) {
                connection.signaling.requeue(update);
                return Err(e);
            }
        }
        while let Some(command) = connection.acl.next_command() {
            match command {
                AclCommand::Write { cid, data } => {
                    self.transport.write_acl_data(conn_handle, cid, &data)?
                }
                AclCommand::StartEncryption(params) => {
                    if let Err(e) = self.transport.start_le_encryption(&params) {
                        connection.acl.requeue(AclCommand::StartEncryption(params));
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn drain_gap(&mut self) {
        while let Some(event) = self.gap.next_event() {
            match event {
                GapEvent::ScanParametersSet => self.events.push_back(CentralEvent::ScanParametersSet),
                GapEvent::ScanStart { filter_duplicates } => self
                    .events
                    .push_back(CentralEvent::ScanStart { filter_duplicates }),
                GapEvent::ScanStop => self.events.push_back(CentralEvent::ScanStop),
                GapEvent::Discover(discovery) => self.on_discover(discovery),
            }
        }
    }

    fn on_discover(&mut self, discovery: Discovery) {
        let wanted = match &self.scan_service_uuids {
            None => false,
            Some(uuids) if uuids.is_empty() => true,
            Some(uuids) => {
                let advertisement = &discovery.advertisement;
                advertisement
                    .service_uuids
                    .iter()
                    .chain(advertisement.service_data.iter().map(|entry| &entry.uuid))
                    .any(|uuid| uuids.contains(uuid))
            }
        };
        if !wanted {
            return;
        }

        let id = PeripheralId::from(&discovery.address);
        self.peripherals
            .insert(id.clone(), (discovery.address, discovery.address_type));
        self.events
            .push_back(CentralEvent::Discover { id, discovery });
    }
}
