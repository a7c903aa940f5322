//! The HCI transport engine.
//!
//! [`Transport`] owns the [`HciSocket`]. It frames commands, turns packets read from the controller
//! into [`HciEvent`]s, brings the adapter up, and carries L2CAP frames over ACL with the
//! controller's flow control applied.

use byteorder::{ByteOrder, LittleEndian};
use hci::host::HciHeader;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

use crate::command::{self, Commands, ConnectionUpdateParameters, CreateConnectionParameters};
use crate::command::{ScanParameters, StartEncryptionParameters};
use crate::event::{self, AclPacket, CommandComplete, Event, Packet, PacketBoundary};
use crate::event::{AdvertisingReport, ExtendedAdvertisingReport, LocalVersion, ReturnParameters};
use crate::event::{LeConnectionComplete, LeConnectionUpdateComplete};
use crate::opcode::{self, Opcode};
use crate::socket::HciSocket;
use crate::types::{Address, State};
use crate::{Config, ConnectError, Error};
use hci::ConnectionHandle;

const READ_BUFFER_LEN: usize = 4096;
const COMMAND_HEADER_LEN: usize = 4;
const ACL_HEADER_LEN: usize = 5;
const L2CAP_HEADER_LEN: usize = 4;

const MIN_HCI_VERSION: u8 = 0x06;

/// Events produced by the transport engine, in the order the controller caused them.
#[derive(Clone, Debug)]
pub enum HciEvent {
    /// The adapter changed state.
    StateChange(State),
    /// The controller's public address was read.
    AddressChange(Address),
    /// The controller's version was read.
    ReadLocalVersion(LocalVersion),
    /// Scan parameters were accepted.
    ScanParametersSet,
    /// A scan enable command completed.
    ScanEnableSet {
        /// HCI status of the command.
        status: u8,
    },
    /// A scan enable command was written to the adapter, by this stack or by anyone sharing it.
    ScanEnableSetCmd {
        /// Scanning is being switched on.
        enable: bool,
        /// Duplicate filtering was requested.
        filter_duplicates: bool,
    },
    /// One legacy advertising report.
    AdvertisingReport(AdvertisingReport),
    /// One extended advertising report.
    ExtendedAdvertisingReport(ExtendedAdvertisingReport),
    /// A connection attempt finished.
    ConnectionComplete(Result<LeConnectionComplete, ConnectError>),
    /// Connection parameters changed.
    ConnectionUpdateComplete(LeConnectionUpdateComplete),
    /// A connection ended. Its queued ACL data has been discarded.
    Disconnection {
        /// Connection that ended.
        conn_handle: ConnectionHandle,
        /// HCI status code explaining why.
        reason: u8,
    },
    /// Link encryption changed.
    EncryptionChange {
        /// Affected connection.
        conn_handle: ConnectionHandle,
        /// Whether the link is now encrypted.
        encrypted: bool,
    },
    /// A complete L2CAP frame arrived.
    AclData {
        /// Connection it arrived on.
        conn_handle: ConnectionHandle,
        /// L2CAP channel.
        cid: u16,
        /// Frame payload, without the L2CAP header.
        data: Vec<u8>,
    },
    /// The signal strength of a connection was read.
    RssiRead {
        /// Measured connection.
        conn_handle: ConnectionHandle,
        /// Signal strength, dBm.
        rssi: i8,
    },
}

/// ACL buffer geometry reported by the controller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AclBuffers {
    /// Largest ACL payload per packet.
    pub length: u16,
    /// Packets the controller can hold at once, across all connections.
    pub num: u16,
}

struct ReassemblyBuffer {
    length: usize,
    cid: u16,
    data: Vec<u8>,
}

struct QueuedPacket {
    handle: u16,
    packet: Vec<u8>,
}

struct DeferredWrite {
    handle: ConnectionHandle,
    cid: u16,
    data: Vec<u8>,
}

/// Splits an L2CAP frame into ACL packets of at most `mtu` payload bytes.
///
/// The first packet carries the L2CAP basic header and the "first, non-flushable" boundary flag;
/// the rest are continuations. Every packet includes the packet type indicator.
pub fn fragment(conn_handle: ConnectionHandle, cid: u16, data: &[u8], mtu: usize) -> Vec<Vec<u8>> {
    let mtu = mtu.max(L2CAP_HEADER_LEN + 1);
    let acl_length = (L2CAP_HEADER_LEN + data.len()).min(mtu);
    let (head, mut rest) = data.split_at(acl_length - L2CAP_HEADER_LEN);

    let mut first = vec![0; ACL_HEADER_LEN + L2CAP_HEADER_LEN + head.len()];
    write_acl_header(
        &mut first,
        conn_handle,
        PacketBoundary::FirstNonFlushable,
        acl_length,
    );
    LittleEndian::write_u16(&mut first[5..7], data.len() as u16);
    LittleEndian::write_u16(&mut first[7..9], cid);
    first[9..].copy_from_slice(head);

    let mut packets = vec![first];
    while !rest.is_empty() {
        let (chunk, remaining) = rest.split_at(rest.len().min(mtu));
        let mut packet = vec![0; ACL_HEADER_LEN + chunk.len()];
        write_acl_header(
            &mut packet,
            conn_handle,
            PacketBoundary::Continuing,
            chunk.len(),
        );
        packet[ACL_HEADER_LEN..].copy_from_slice(chunk);
        packets.push(packet);
        rest = remaining;
    }
    packets
}

fn write_acl_header(
    packet: &mut [u8],
    conn_handle: ConnectionHandle,
    boundary: PacketBoundary,
    len: usize,
) {
    packet[0] = event::ACL_DATA_PACKET;
    LittleEndian::write_u16(
        &mut packet[1..3],
        (conn_handle.0 & 0x0FFF) | (boundary.bits() << 12),
    );
    LittleEndian::write_u16(&mut packet[3..5], len as u16);
}

macro_rules! impl_no_params {
    ($name:ident, $opcode:path) => {
        fn $name(&mut self) -> Result<(), Self::Error> {
            self.write_command($opcode, &[])
        }
    };
}

macro_rules! impl_const_params {
    ($name:ident, $opcode:path, $params:expr) => {
        fn $name(&mut self) -> Result<(), Self::Error> {
            self.write_command($opcode, &$params)
        }
    };
}

/// Host side of the HCI link.
pub struct Transport<S> {
    socket: S,
    device_id: Option<u16>,
    user_channel: bool,
    poll_interval: Duration,
    bound: bool,
    last_poll: Option<Instant>,
    is_dev_up: Option<bool>,
    extended: bool,
    state: Option<State>,
    address: Option<Address>,

    handle_buffers: HashMap<u16, ReassemblyBuffer>,
    acl_buffers: Option<AclBuffers>,
    deferred: VecDeque<DeferredWrite>,
    acl_connections: HashMap<u16, usize>,
    acl_queue: VecDeque<QueuedPacket>,

    events: VecDeque<HciEvent>,
}

impl<S> Transport<S>
where
    S: HciSocket,
{
    /// Wraps an unbound socket. Nothing is written until [`init`](Transport::init).
    pub fn new(socket: S, config: &Config) -> Transport<S> {
        Transport {
            socket,
            device_id: config.device_id,
            user_channel: config.user_channel,
            poll_interval: config.poll_interval,
            bound: false,
            last_poll: None,
            is_dev_up: None,
            extended: config.extended,
            state: None,
            address: None,
            handle_buffers: HashMap::new(),
            acl_buffers: None,
            deferred: VecDeque::new(),
            acl_connections: HashMap::new(),
            acl_queue: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Binds the socket and starts bringing the adapter up.
    ///
    /// On the raw channel the adapter state is checked right away and then on every
    /// [`tick`](Transport::tick); on the user channel the controller is reset instead.
    ///
    /// # Errors
    ///
    /// The socket could not be bound. A permission error is also reported as
    /// [`State::Unauthorized`].
    pub fn init(&mut self) -> Result<(), Error> {
        if self.user_channel {
            let result = self.socket.bind_user(self.device_id);
            let device_id = result.map_err(|e| self.socket_error(e))?;
            debug!("bound user channel of hci{}", device_id);
            self.bound = true;
            self.reset()
        } else {
            if !self.bound {
                let result = self.socket.bind_raw(self.device_id);
                let device_id = result.map_err(|e| self.socket_error(e))?;
                debug!("bound raw channel of hci{}", device_id);
                self.bound = true;
            }
            self.poll_is_dev_up()
        }
    }

    /// Checks the adapter state once `poll_interval` has passed since the last check. Does
    /// nothing on the user channel or before [`init`](Transport::init).
    pub fn tick(&mut self, now: Instant) {
        if self.user_channel || !self.bound {
            return;
        }
        if let Some(last) = self.last_poll {
            if now.duration_since(last) < self.poll_interval {
                return;
            }
        }
        self.last_poll = Some(now);

        if let Err(e) = self.poll_is_dev_up() {
            warn!("adapter poll failed: {}", e);
        }
    }

    fn poll_is_dev_up(&mut self) -> Result<(), Error> {
        let result = self.socket.is_dev_up();
        let is_dev_up = result.map_err(|e| self.socket_error(e))?;
        if self.is_dev_up == Some(is_dev_up) {
            return Ok(());
        }

        if is_dev_up {
            if self.state == Some(State::PoweredOff) {
                debug!("adapter came back up, reinitializing");
                self.state = None;
                return self.init();
            }
            self.bring_up()?;
        } else {
            self.set_state(State::PoweredOff);
        }

        self.is_dev_up = Some(is_dev_up);
        Ok(())
    }

    fn bring_up(&mut self) -> Result<(), Error> {
        if self.extended {
            self.set_coded_phy_support()?;
        }
        self.set_socket_filter()?;
        self.set_event_mask()?;
        self.set_le_event_mask()?;
        self.read_supported_commands()?;
        self.read_local_version()?;
        self.write_le_host_supported()?;
        self.read_le_host_supported()?;
        self.read_le_buffer_size()?;
        self.read_bd_addr()
    }

    fn set_socket_filter(&mut self) -> Result<(), Error> {
        let filter = event::socket_filter();
        debug!("setting filter to: {}", hex::encode(&filter));
        let result = self.socket.set_filter(&filter);
        result.map_err(|e| self.socket_error(e))
    }

    /// Reads every packet the socket has ready and queues the resulting events.
    ///
    /// Malformed packets are logged and dropped. Socket errors are logged; a permission error is
    /// reported as [`State::Unauthorized`].
    pub fn process(&mut self) {
        let mut buffer = [0; READ_BUFFER_LEN];
        loop {
            match self.socket.read(&mut buffer) {
                Ok(0) => break,
                Ok(len) => {
                    if let Err(e) = self.handle_packet(&buffer[..len]) {
                        warn!("dropping packet {}: {}", hex::encode(&buffer[..len]), e);
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    self.socket_error(e);
                    break;
                }
            }
        }
    }

    /// Removes the oldest queued event.
    pub fn next_event(&mut self) -> Option<HciEvent> {
        self.events.pop_front()
    }

    /// The most recent adapter state, if one has been reported.
    pub fn state(&self) -> Option<State> {
        self.state
    }

    /// The controller's public address, once read.
    pub fn address(&self) -> Option<Address> {
        self.address
    }

    /// Whether the extended scan and connect commands are in use.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// The controller's ACL buffer geometry, once read.
    pub fn acl_buffers(&self) -> Option<AclBuffers> {
        self.acl_buffers
    }

    /// ACL packets written to the controller and not yet reported complete, per connection.
    pub fn pending_packets(&self, conn_handle: ConnectionHandle) -> Option<usize> {
        self.acl_connections.get(&conn_handle.0).copied()
    }

    /// The underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// The underlying socket, mutably.
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    fn set_state(&mut self, state: State) {
        self.state = Some(state);
        self.events.push_back(HciEvent::StateChange(state));
    }

    fn socket_error(&mut self, error: io::Error) -> Error {
        if error.kind() == io::ErrorKind::PermissionDenied {
            self.set_state(State::Unauthorized);
        } else if error.raw_os_error() == Some(libc::ENETDOWN) {
            debug!("socket: {}", error);
        } else {
            error!("socket: {}", error);
        }
        Error::Io(error)
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        debug!("writing: {}", hex::encode(packet));
        block!(self.socket.write(packet)).map_err(|e| self.socket_error(e))
    }

    fn write_command(&mut self, opcode: Opcode, params: &[u8]) -> Result<(), Error> {
        let mut packet = [0; COMMAND_HEADER_LEN + 255];
        hci::host::uart::CommandHeader::new(opcode, params.len())
            .copy_into_slice(&mut packet[..COMMAND_HEADER_LEN]);
        packet[COMMAND_HEADER_LEN..COMMAND_HEADER_LEN + params.len()].copy_from_slice(params);
        self.write_packet(&packet[..COMMAND_HEADER_LEN + params.len()])
    }

    /// Sends an L2CAP frame on a connection.
    ///
    /// The frame is fragmented to the controller's ACL packet size and queued; packets are
    /// written while the controller has buffer space. Frames sent before the buffer size is
    /// known are held until it is.
    ///
    /// # Errors
    ///
    /// Writing a queued packet to the socket failed. The data stays queued and goes out on the
    /// next flush.
    pub fn write_acl_data(
        &mut self,
        conn_handle: ConnectionHandle,
        cid: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        let buffers = match self.acl_buffers {
            Some(buffers) => buffers,
            None => {
                debug!("deferring acl data until the buffer size is known");
                self.deferred.push_back(DeferredWrite {
                    handle: conn_handle,
                    cid,
                    data: data.to_vec(),
                });
                return Ok(());
            }
        };

        for packet in fragment(conn_handle, cid, data, usize::from(buffers.length)) {
            debug!("push to acl queue: {}", hex::encode(&packet));
            self.acl_queue.push_back(QueuedPacket {
                handle: conn_handle.0,
                packet,
            });
        }
        self.flush_acl()
    }

    fn total_pending(&self) -> usize {
        self.acl_connections.values().sum()
    }

    fn flush_acl(&mut self) -> Result<(), Error> {
        let num = match self.acl_buffers {
            Some(buffers) => usize::from(buffers.num),
            None => return Ok(()),
        };
        trace!(
            "flush - pending: {} queue length: {}",
            self.total_pending(),
            self.acl_queue.len()
        );

        while self.total_pending() < num {
            let entry = match self.acl_queue.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            if !self.acl_connections.contains_key(&entry.handle) {
                debug!("dropping acl data for unknown handle {}", entry.handle);
                continue;
            }
            if let Err(e) = self.write_packet(&entry.packet) {
                self.acl_queue.push_front(entry);
                return Err(e);
            }
            if let Some(pending) = self.acl_connections.get_mut(&entry.handle) {
                *pending += 1;
            }
        }
        Ok(())
    }

    fn set_acl_buffers(&mut self, length: u16, num: u16) -> Result<(), Error> {
        debug!("acl buffers: length = {}, num = {}", length, num);
        self.acl_buffers = Some(AclBuffers { length, num });
        while let Some(write) = self.deferred.pop_front() {
            self.write_acl_data(write.handle, write.cid, &write.data)?;
        }
        self.flush_acl()
    }

    fn handle_packet(&mut self, buffer: &[u8]) -> Result<(), Error> {
        debug!("read: {}", hex::encode(buffer));
        match Packet::new(buffer)? {
            Packet::Event(event) => self.handle_event(event),
            Packet::AclData(packet) => self.handle_acl_data(packet),
            Packet::Command(packet) => {
                if packet.opcode == opcode::LE_SET_SCAN_ENABLE
                    || packet.opcode == opcode::LE_SET_EXTENDED_SCAN_ENABLE
                {
                    event::require(&packet.parameters, 2)?;
                    let enable = packet.parameters[0] == 0x01;
                    let filter_duplicates = packet.parameters[1] == 0x01;
                    debug!(
                        "scan enable command seen: enable = {}, filter duplicates = {}",
                        enable, filter_duplicates
                    );
                    self.events.push_back(HciEvent::ScanEnableSetCmd {
                        enable,
                        filter_duplicates,
                    });
                }
                Ok(())
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::DisconnectionComplete(event) => {
                let handle = event.conn_handle.0;
                self.acl_queue.retain(|entry| entry.handle != handle);
                self.deferred.retain(|write| write.handle.0 != handle);
                self.acl_connections.remove(&handle);
                self.handle_buffers.remove(&handle);
                self.events.push_back(HciEvent::Disconnection {
                    conn_handle: event.conn_handle,
                    reason: event.reason,
                });
                self.flush_acl()
            }
            Event::EncryptionChange(event) => {
                self.events.push_back(HciEvent::EncryptionChange {
                    conn_handle: event.conn_handle,
                    encrypted: event.encrypted,
                });
                Ok(())
            }
            Event::CommandComplete(event) => self.handle_command_complete(event),
            Event::CommandStatus(event) => {
                if (event.opcode == opcode::LE_CREATE_CONNECTION
                    || event.opcode == opcode::LE_EXTENDED_CREATE_CONNECTION)
                    && event.status != 0
                {
                    self.events
                        .push_back(HciEvent::ConnectionComplete(Err(ConnectError {
                            status: event.status,
                        })));
                }
                Ok(())
            }
            Event::NumberOfCompletedPackets(entries) => {
                for entry in entries {
                    match self.acl_connections.get_mut(&entry.conn_handle.0) {
                        Some(pending) => {
                            *pending =
                                pending.saturating_sub(usize::from(entry.num_completed_packets));
                            trace!(
                                "handle {}: {} completed, {} pending",
                                entry.conn_handle.0,
                                entry.num_completed_packets,
                                pending
                            );
                        }
                        None => trace!("handle {}: closed", entry.conn_handle.0),
                    }
                }
                self.flush_acl()
            }
            Event::LeConnectionComplete(event) => {
                if event.status == 0 {
                    self.acl_connections.insert(event.conn_handle.0, 0);
                    self.events.push_back(HciEvent::ConnectionComplete(Ok(event)));
                } else {
                    self.events
                        .push_back(HciEvent::ConnectionComplete(Err(ConnectError {
                            status: event.status,
                        })));
                }
                Ok(())
            }
            Event::LeAdvertisingReport(reports) => {
                self.events
                    .extend(reports.into_iter().map(HciEvent::AdvertisingReport));
                Ok(())
            }
            Event::LeExtendedAdvertisingReport(reports) => {
                self.events
                    .extend(reports.into_iter().map(HciEvent::ExtendedAdvertisingReport));
                Ok(())
            }
            Event::LeConnectionUpdateComplete(event) => {
                self.events
                    .push_back(HciEvent::ConnectionUpdateComplete(event));
                Ok(())
            }
            Event::Unknown(code) => {
                trace!("ignoring event 0x{:02x}", code);
                Ok(())
            }
        }
    }

    fn handle_command_complete(&mut self, event: CommandComplete) -> Result<(), Error> {
        let opcode = event.opcode;
        if opcode == opcode::RESET {
            if self.extended {
                self.set_coded_phy_support()?;
            }
            self.set_event_mask()?;
            self.set_le_event_mask()?;
            self.read_supported_commands()?;
            self.read_local_version()?;
            self.read_le_buffer_size()?;
            self.read_bd_addr()?;
        } else if opcode == opcode::READ_LOCAL_VERSION {
            if let ReturnParameters::ReadLocalVersion(version) = event.return_params {
                debug!("local version: {:?}", version);
                let supported = version.hci_version >= MIN_HCI_VERSION;
                if !supported {
                    self.set_state(State::Unsupported);
                }
                self.events.push_back(HciEvent::ReadLocalVersion(version));
                if supported && self.state != Some(State::PoweredOn) {
                    self.set_scan_enabled(false, true)?;
                    self.set_scan_parameters(&ScanParameters::default())?;
                }
            }
        } else if opcode == opcode::READ_SUPPORTED_COMMANDS {
            if let ReturnParameters::ReadSupportedCommands { extended_scan } = event.return_params
            {
                debug!("extended scanning supported: {}", extended_scan);
                if extended_scan && !self.extended {
                    self.extended = true;
                    self.set_le_event_mask()?;
                }
            }
        } else if opcode == opcode::READ_BD_ADDR {
            if let ReturnParameters::ReadBdAddr(address) = event.return_params {
                debug!("address = {}", address);
                self.address = Some(address);
                self.events.push_back(HciEvent::AddressChange(address));
            }
        } else if opcode == opcode::LE_SET_SCAN_PARAMETERS
            || opcode == opcode::LE_SET_EXTENDED_SCAN_PARAMETERS
        {
            self.set_state(State::PoweredOn);
            self.events.push_back(HciEvent::ScanParametersSet);
        } else if opcode == opcode::LE_SET_SCAN_ENABLE
            || opcode == opcode::LE_SET_EXTENDED_SCAN_ENABLE
        {
            self.events.push_back(HciEvent::ScanEnableSet {
                status: event.status,
            });
        } else if opcode == opcode::READ_RSSI {
            if let ReturnParameters::ReadRssi { conn_handle, rssi } = event.return_params {
                self.events
                    .push_back(HciEvent::RssiRead { conn_handle, rssi });
            }
        } else if opcode == opcode::LE_READ_BUFFER_SIZE {
            if let ReturnParameters::LeReadBufferSize {
                acl_length,
                acl_num,
            } = event.return_params
            {
                if acl_length == 0 || acl_num == 0 {
                    debug!("no dedicated LE buffers, using br/edr buffer size");
                    self.read_buffer_size()?;
                } else {
                    self.set_acl_buffers(acl_length, u16::from(acl_num))?;
                }
            }
        } else if opcode == opcode::READ_BUFFER_SIZE {
            if let ReturnParameters::ReadBufferSize {
                acl_length,
                acl_num,
            } = event.return_params
            {
                self.set_acl_buffers(acl_length, acl_num)?;
            }
        } else if opcode == opcode::READ_LE_HOST_SUPPORTED {
            if let ReturnParameters::ReadLeHostSupported { le, simultaneous } = event.return_params
            {
                debug!("le host supported: le = {}, simul = {}", le, simultaneous);
            }
        }
        Ok(())
    }

    fn handle_acl_data(&mut self, packet: AclPacket) -> Result<(), Error> {
        let handle = packet.conn_handle.0;
        match packet.boundary {
            PacketBoundary::FirstFlushable | PacketBoundary::FirstNonFlushable => {
                event::require(&packet.data, L2CAP_HEADER_LEN)?;
                let length = usize::from(LittleEndian::read_u16(&packet.data[0..2]));
                let cid = LittleEndian::read_u16(&packet.data[2..4]);
                let data = packet.data[L2CAP_HEADER_LEN..].to_vec();

                if data.len() >= length {
                    self.deliver(packet.conn_handle, cid, data, length);
                } else {
                    self.handle_buffers
                        .insert(handle, ReassemblyBuffer { length, cid, data });
                }
            }
            PacketBoundary::Continuing => {
                let complete = match self.handle_buffers.get_mut(&handle) {
                    Some(buffer) => {
                        buffer.data.extend_from_slice(&packet.data);
                        buffer.data.len() >= buffer.length
                    }
                    None => {
                        debug!("continuation for handle {} without a start", handle);
                        return Ok(());
                    }
                };
                if complete {
                    if let Some(buffer) = self.handle_buffers.remove(&handle) {
                        self.deliver(packet.conn_handle, buffer.cid, buffer.data, buffer.length);
                    }
                }
            }
            PacketBoundary::Complete => {
                warn!("ignoring acl packet with reserved boundary flag on {}", handle);
            }
        }
        Ok(())
    }

    fn deliver(&mut self, conn_handle: ConnectionHandle, cid: u16, mut data: Vec<u8>, len: usize) {
        data.truncate(len);
        self.events.push_back(HciEvent::AclData {
            conn_handle,
            cid,
            data,
        });
    }
}

impl<S> Commands for Transport<S>
where
    S: HciSocket,
{
    type Error = Error;

    impl_no_params!(reset, opcode::RESET);

    impl_const_params!(set_event_mask, opcode::SET_EVENT_MASK, command::EVENT_MASK);

    fn set_le_event_mask(&mut self) -> Result<(), Self::Error> {
        let mask = command::le_event_mask(self.extended);
        self.write_command(opcode::LE_SET_EVENT_MASK, &mask)
    }

    impl_no_params!(read_local_version, opcode::READ_LOCAL_VERSION);

    impl_no_params!(read_supported_commands, opcode::READ_SUPPORTED_COMMANDS);

    impl_no_params!(read_bd_addr, opcode::READ_BD_ADDR);

    impl_no_params!(read_buffer_size, opcode::READ_BUFFER_SIZE);

    impl_no_params!(read_le_buffer_size, opcode::LE_READ_BUFFER_SIZE);

    impl_no_params!(read_le_host_supported, opcode::READ_LE_HOST_SUPPORTED);

    impl_const_params!(
        write_le_host_supported,
        opcode::WRITE_LE_HOST_SUPPORTED,
        command::LE_HOST_SUPPORTED
    );

    impl_const_params!(
        set_coded_phy_support,
        opcode::LE_SET_DEFAULT_PHY,
        command::CODED_PHY_SUPPORT
    );

    fn set_random_address(&mut self, address: &Address) -> Result<(), Self::Error> {
        self.write_command(opcode::LE_SET_RANDOM_ADDRESS, &address.to_le_bytes())
    }

    fn set_scan_parameters(&mut self, params: &ScanParameters) -> Result<(), Self::Error> {
        let mut bytes = [0; ScanParameters::MAX_LENGTH];
        let len = params.into_bytes(self.extended, &mut bytes);
        let opcode = if self.extended {
            opcode::LE_SET_EXTENDED_SCAN_PARAMETERS
        } else {
            opcode::LE_SET_SCAN_PARAMETERS
        };
        self.write_command(opcode, &bytes[..len])
    }

    fn set_scan_enabled(
        &mut self,
        enabled: bool,
        filter_duplicates: bool,
    ) -> Result<(), Self::Error> {
        let mut bytes = [0; 6];
        let len =
            command::scan_enable_into_bytes(enabled, filter_duplicates, self.extended, &mut bytes);
        let opcode = if self.extended {
            opcode::LE_SET_EXTENDED_SCAN_ENABLE
        } else {
            opcode::LE_SET_SCAN_ENABLE
        };
        self.write_command(opcode, &bytes[..len])
    }

    fn create_le_conn(&mut self, params: &CreateConnectionParameters) -> Result<(), Self::Error> {
        let mut bytes = [0; CreateConnectionParameters::MAX_LENGTH];
        let len = params.into_bytes(self.extended, &mut bytes);
        let opcode = if self.extended {
            opcode::LE_EXTENDED_CREATE_CONNECTION
        } else {
            opcode::LE_CREATE_CONNECTION
        };
        self.write_command(opcode, &bytes[..len])
    }

    fn conn_update_le(&mut self, params: &ConnectionUpdateParameters) -> Result<(), Self::Error> {
        let mut bytes = [0; ConnectionUpdateParameters::LENGTH];
        params.into_bytes(&mut bytes);
        self.write_command(opcode::LE_CONNECTION_UPDATE, &bytes)
    }

    impl_no_params!(cancel_connect, opcode::LE_CREATE_CONNECTION_CANCEL);

    fn start_le_encryption(
        &mut self,
        params: &StartEncryptionParameters,
    ) -> Result<(), Self::Error> {
        let mut bytes = [0; StartEncryptionParameters::LENGTH];
        params.into_bytes(&mut bytes);
        self.write_command(opcode::LE_START_ENCRYPTION, &bytes)
    }

    fn disconnect(
        &mut self,
        conn_handle: ConnectionHandle,
        reason: u8,
    ) -> Result<(), Self::Error> {
        let mut bytes = [0; 3];
        LittleEndian::write_u16(&mut bytes[0..2], conn_handle.0);
        bytes[2] = reason;
        self.write_command(opcode::DISCONNECT, &bytes)
    }

    fn read_rssi(&mut self, conn_handle: ConnectionHandle) -> Result<(), Self::Error> {
        let mut bytes = [0; 2];
        LittleEndian::write_u16(&mut bytes, conn_handle.0);
        self.write_command(opcode::READ_RSSI, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(packets: &[Vec<u8>]) -> Vec<u8> {
        let declared = usize::from(LittleEndian::read_u16(&packets[0][5..7]));
        let mut data = packets[0][9..].to_vec();
        for packet in &packets[1..] {
            assert_eq!(LittleEndian::read_u16(&packet[1..3]) >> 12, 0b01);
            data.extend_from_slice(&packet[5..]);
        }
        assert_eq!(data.len(), declared);
        data
    }

    #[test]
    fn fragments_fit_the_mtu() {
        for &mtu in &[5usize, 8, 23, 27] {
            for len in 0..100 {
                let data: Vec<u8> = (0..len).map(|b| b as u8).collect();
                let packets = fragment(ConnectionHandle(0x0041), 0x0004, &data, mtu);
                for packet in &packets {
                    let acl_len = usize::from(LittleEndian::read_u16(&packet[3..5]));
                    assert_eq!(acl_len, packet.len() - ACL_HEADER_LEN);
                    assert!(acl_len <= mtu);
                }
                assert_eq!(reassemble(&packets), data, "mtu {} len {}", mtu, len);
            }
        }
    }

    #[test]
    fn first_fragment_layout() {
        let packets = fragment(ConnectionHandle(0x0041), 0x0004, &[0x0a, 0x03, 0x00], 27);
        assert_eq!(
            packets,
            vec![vec![0x02, 0x41, 0x00, 0x07, 0x00, 0x03, 0x00, 0x04, 0x00, 0x0a, 0x03, 0x00]]
        );
    }

    #[test]
    fn exact_multiple_has_no_empty_fragment() {
        let data = [0x55; 19];
        let packets = fragment(ConnectionHandle(1), 0x0004, &data, 23 - 4);
        // 15 bytes ride in the first fragment, 4 in the continuation.
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].len(), ACL_HEADER_LEN + 4);
    }
}
