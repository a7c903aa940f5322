//! Scanning and advertisement discovery.
//!
//! [`Gap`] keeps one record per advertiser. Advertising data of each report is merged into the
//! record, and a [`GapEvent::Discover`] is only raised once the record is likely complete: on a
//! scan response, for non-connectable advertisers, or on a repeat sighting without a scan
//! response.

use std::collections::{HashMap, VecDeque};

use crate::command::{Commands, ScanParameters};
use crate::event::{AdvertisingReport, ExtendedAdvertisingReport};
use crate::types::{Address, AddressType, Uuid};

const ADV_NONCONN_IND: u8 = 0x03;
const SCAN_RSP: u8 = 0x04;

const TX_POWER_UNAVAILABLE: i8 = 127;

const EIR_INCOMPLETE_16BIT_UUIDS: u8 = 0x02;
const EIR_COMPLETE_16BIT_UUIDS: u8 = 0x03;
const EIR_INCOMPLETE_128BIT_UUIDS: u8 = 0x06;
const EIR_COMPLETE_128BIT_UUIDS: u8 = 0x07;
const EIR_SHORTENED_LOCAL_NAME: u8 = 0x08;
const EIR_COMPLETE_LOCAL_NAME: u8 = 0x09;
const EIR_TX_POWER_LEVEL: u8 = 0x0A;
const EIR_SOLICITATION_16BIT_UUIDS: u8 = 0x14;
const EIR_SOLICITATION_128BIT_UUIDS: u8 = 0x15;
const EIR_SERVICE_DATA_16BIT: u8 = 0x16;
const EIR_SOLICITATION_32BIT_UUIDS: u8 = 0x1F;
const EIR_SERVICE_DATA_32BIT: u8 = 0x20;
const EIR_SERVICE_DATA_128BIT: u8 = 0x21;
const EIR_MANUFACTURER_DATA: u8 = 0xFF;

bitflags! {
    /// Event type of an [extended advertising report](ExtendedAdvertisingReport).
    pub struct ExtendedEventType: u16 {
        /// Connectable advertising.
        const CONNECTABLE = 0x0001;
        /// Scannable advertising.
        const SCANNABLE = 0x0002;
        /// Directed advertising.
        const DIRECTED = 0x0004;
        /// The report is a scan response.
        const SCAN_RESPONSE = 0x0008;
        /// Legacy advertising PDU.
        const LEGACY = 0x0010;
        /// Incomplete, more data to come.
        const INCOMPLETE = 0x0020;
        /// Incomplete, data truncated.
        const TRUNCATED = 0x0040;
    }
}

/// Scanning progress, advanced by the controller confirming scan enable commands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanState {
    /// Scanning was never requested.
    Idle,
    /// Scan enable was requested and not yet confirmed.
    Starting,
    /// The controller confirmed scanning.
    Started,
    /// Scan disable was requested and not yet confirmed.
    Stopping,
    /// The controller confirmed scanning stopped.
    Stopped,
}

/// Service data carried in an advertisement.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceData {
    /// Service the data belongs to.
    pub uuid: Uuid,
    /// Opaque payload.
    pub data: Vec<u8>,
}

/// Accumulated advertising data of one device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Advertisement {
    /// Shortened or complete local name.
    pub local_name: Option<String>,
    /// Advertised transmit power, dBm.
    pub tx_power_level: Option<i8>,
    /// Manufacturer specific data, company identifier included. The last one seen wins.
    pub manufacturer_data: Option<Vec<u8>>,
    /// Service data entries.
    pub service_data: Vec<ServiceData>,
    /// Advertised service UUIDs, without duplicates.
    pub service_uuids: Vec<Uuid>,
    /// Solicited service UUIDs, without duplicates.
    pub service_solicitation_uuids: Vec<Uuid>,
}

impl Advertisement {
    fn reset_services(&mut self) {
        self.service_data.clear();
        self.service_uuids.clear();
        self.service_solicitation_uuids.clear();
    }

    /// Merges advertising data structures into the advertisement.
    ///
    /// Parsing stops at the first structure with a zero length or one that runs past the end of
    /// `eir`; the structures before it are kept.
    pub fn parse(&mut self, eir: &[u8]) {
        let mut i = 0;
        while i + 1 < eir.len() {
            let length = usize::from(eir[i]);
            if length < 1 {
                debug!("invalid EIR data, length = {}", length);
                break;
            }
            if i + length + 1 > eir.len() {
                debug!("invalid EIR data, out of range of buffer length");
                break;
            }

            let eir_type = eir[i + 1];
            let bytes = &eir[i + 2..i + 1 + length];
            match eir_type {
                EIR_INCOMPLETE_16BIT_UUIDS | EIR_COMPLETE_16BIT_UUIDS => {
                    insert_uuids(&mut self.service_uuids, bytes, 2)
                }
                EIR_INCOMPLETE_128BIT_UUIDS | EIR_COMPLETE_128BIT_UUIDS => {
                    insert_uuids(&mut self.service_uuids, bytes, 16)
                }
                EIR_SHORTENED_LOCAL_NAME | EIR_COMPLETE_LOCAL_NAME => {
                    self.local_name = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                EIR_TX_POWER_LEVEL => {
                    if let Some(&level) = bytes.first() {
                        self.tx_power_level = Some(level as i8);
                    }
                }
                EIR_SOLICITATION_16BIT_UUIDS => {
                    insert_uuids(&mut self.service_solicitation_uuids, bytes, 2)
                }
                EIR_SOLICITATION_32BIT_UUIDS => {
                    insert_uuids(&mut self.service_solicitation_uuids, bytes, 4)
                }
                EIR_SOLICITATION_128BIT_UUIDS => {
                    insert_uuids(&mut self.service_solicitation_uuids, bytes, 16)
                }
                EIR_SERVICE_DATA_16BIT => self.insert_service_data(bytes, 2),
                EIR_SERVICE_DATA_32BIT => self.insert_service_data(bytes, 4),
                EIR_SERVICE_DATA_128BIT => self.insert_service_data(bytes, 16),
                EIR_MANUFACTURER_DATA => self.manufacturer_data = Some(bytes.to_vec()),
                _ => (),
            }

            i += length + 1;
        }
    }

    fn insert_service_data(&mut self, bytes: &[u8], uuid_len: usize) {
        if bytes.len() < uuid_len {
            debug!("service data shorter than its UUID");
            return;
        }
        let uuid = match Uuid::from_le_bytes(&bytes[..uuid_len]) {
            Some(uuid) => uuid,
            None => return,
        };
        let entry = ServiceData {
            uuid,
            data: bytes[uuid_len..].to_vec(),
        };
        if !self.service_data.contains(&entry) {
            self.service_data.push(entry);
        }
    }
}

fn insert_uuids(uuids: &mut Vec<Uuid>, bytes: &[u8], uuid_len: usize) {
    for uuid in bytes.chunks_exact(uuid_len).filter_map(Uuid::from_le_bytes) {
        if !uuids.contains(&uuid) {
            uuids.push(uuid);
        }
    }
}

/// A device worth reporting.
#[derive(Clone, Debug, PartialEq)]
pub struct Discovery {
    /// Status of the report. Always zero for reports the controller delivered.
    pub status: u8,
    /// Advertiser's address.
    pub address: Address,
    /// Type of the advertiser's address.
    pub address_type: AddressType,
    /// The device accepts connections.
    pub connectable: bool,
    /// Everything the device advertised so far.
    pub advertisement: Advertisement,
    /// Signal strength of the latest report, dBm.
    pub rssi: i8,
    /// The device accepts scan requests. Only known from extended reports.
    pub scannable: bool,
}

/// Events raised by [`Gap`].
#[derive(Clone, Debug, PartialEq)]
pub enum GapEvent {
    /// Scan parameters were applied.
    ScanParametersSet,
    /// Scanning started, or its duplicate filtering changed.
    ScanStart {
        /// Duplicate reports are filtered by the controller.
        filter_duplicates: bool,
    },
    /// Scanning stopped.
    ScanStop,
    /// A device was discovered, or its data changed.
    Discover(Discovery),
}

struct DiscoveryRecord {
    connectable: bool,
    advertisement: Advertisement,
    count: u32,
    has_scan_response: bool,
}

/// The discovery engine.
pub struct Gap {
    scan_state: ScanState,
    scan_filter_duplicates: bool,
    discoveries: HashMap<Address, DiscoveryRecord>,
    events: VecDeque<GapEvent>,
}

impl Default for Gap {
    fn default() -> Gap {
        Gap::new()
    }
}

impl Gap {
    /// Creates an engine with no discoveries.
    pub fn new() -> Gap {
        Gap {
            scan_state: ScanState::Idle,
            scan_filter_duplicates: false,
            discoveries: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    /// Current scanning progress.
    pub fn scan_state(&self) -> ScanState {
        self.scan_state
    }

    /// Removes the oldest queued event.
    pub fn next_event(&mut self) -> Option<GapEvent> {
        self.events.pop_front()
    }

    /// Applies custom scan parameters.
    pub fn set_scan_parameters<C: Commands>(
        &mut self,
        controller: &mut C,
        params: &ScanParameters,
    ) -> Result<(), C::Error> {
        controller.set_scan_parameters(params)
    }

    /// Starts scanning. The scan is stopped and parameters re-applied first, as scan parameters
    /// may only change while scanning is off.
    pub fn start_scanning<C: Commands>(
        &mut self,
        controller: &mut C,
        allow_duplicates: bool,
    ) -> Result<(), C::Error> {
        self.scan_state = ScanState::Starting;
        self.scan_filter_duplicates = !allow_duplicates;

        controller.set_scan_enabled(false, true)?;
        controller.set_scan_parameters(&ScanParameters::default())?;
        controller.set_scan_enabled(true, self.scan_filter_duplicates)
    }

    /// Stops scanning.
    pub fn stop_scanning<C: Commands>(&mut self, controller: &mut C) -> Result<(), C::Error> {
        self.scan_state = ScanState::Stopping;
        controller.set_scan_enabled(false, true)
    }

    /// The controller applied scan parameters.
    pub fn on_scan_parameters_set(&mut self) {
        self.events.push_back(GapEvent::ScanParametersSet);
    }

    /// A scan enable command completed. Failures leave the scan state alone.
    pub fn on_scan_enable_set(&mut self, status: u8) {
        if status != 0 {
            return;
        }

        match self.scan_state {
            ScanState::Starting => {
                self.scan_state = ScanState::Started;
                self.events.push_back(GapEvent::ScanStart {
                    filter_duplicates: self.scan_filter_duplicates,
                });
            }
            ScanState::Stopping => {
                self.scan_state = ScanState::Stopped;
                self.events.push_back(GapEvent::ScanStop);
            }
            _ => (),
        }
    }

    /// A scan enable command was seen on the adapter, possibly issued by another process.
    pub fn on_scan_enable_set_cmd(&mut self, enable: bool, filter_duplicates: bool) {
        match self.scan_state {
            ScanState::Starting | ScanState::Started => {
                if !enable {
                    self.events.push_back(GapEvent::ScanStop);
                } else if self.scan_filter_duplicates != filter_duplicates {
                    self.scan_filter_duplicates = filter_duplicates;
                    self.events.push_back(GapEvent::ScanStart { filter_duplicates });
                }
            }
            ScanState::Stopping | ScanState::Stopped if enable => {
                self.events.push_back(GapEvent::ScanStart {
                    filter_duplicates: self.scan_filter_duplicates,
                });
            }
            _ => (),
        }
    }

    /// Merges a legacy advertising report.
    pub fn on_advertising_report(&mut self, report: &AdvertisingReport) {
        let scan_response = report.event_type == SCAN_RSP;
        let record = self.record_for(report.address, None);

        record.count += 1;
        if scan_response {
            record.has_scan_response = true;
        } else {
            record.advertisement.reset_services();
        }
        // A scan response keeps the connectable flag of the advertisement it answers.
        if !scan_response || record.count == 1 {
            record.connectable = report.event_type != ADV_NONCONN_IND;
        }
        record.advertisement.parse(&report.data);

        let report_now =
            scan_response || !record.connectable || (record.count > 1 && !record.has_scan_response);
        if report_now {
            let discovery = Discovery {
                status: 0,
                address: report.address,
                address_type: report.address_type,
                connectable: record.connectable,
                advertisement: record.advertisement.clone(),
                rssi: report.rssi,
                scannable: false,
            };
            self.events.push_back(GapEvent::Discover(discovery));
        }
    }

    /// Merges an extended advertising report.
    pub fn on_extended_advertising_report(&mut self, report: &ExtendedAdvertisingReport) {
        let event_type = ExtendedEventType::from_bits_truncate(report.event_type);
        let scan_response = event_type.contains(ExtendedEventType::SCAN_RESPONSE);
        let tx_power = if report.tx_power == TX_POWER_UNAVAILABLE {
            None
        } else {
            Some(report.tx_power)
        };
        let record = self.record_for(report.address, tx_power);

        record.count += 1;
        if scan_response {
            record.has_scan_response = true;
        } else {
            record.advertisement.reset_services();
        }
        if !scan_response || record.count == 1 {
            record.connectable = event_type.contains(ExtendedEventType::CONNECTABLE);
        }
        record.advertisement.parse(&report.data);

        let incomplete = event_type.contains(ExtendedEventType::INCOMPLETE);
        let report_now = scan_response
            || (!record.connectable && !incomplete)
            || (record.count > 1 && !record.has_scan_response);
        if report_now {
            let discovery = Discovery {
                status: 0,
                address: report.address,
                address_type: report.address_type,
                connectable: record.connectable,
                advertisement: record.advertisement.clone(),
                rssi: report.rssi,
                scannable: event_type.contains(ExtendedEventType::SCANNABLE),
            };
            self.events.push_back(GapEvent::Discover(discovery));
        }
    }

    fn record_for(&mut self, address: Address, tx_power: Option<i8>) -> &mut DiscoveryRecord {
        self.discoveries
            .entry(address)
            .or_insert_with(|| DiscoveryRecord {
                connectable: true,
                advertisement: Advertisement {
                    tx_power_level: tx_power,
                    ..Advertisement::default()
                },
                count: 0,
                has_scan_response: false,
            })
    }
}
