//! One lock, one session.
//!
//! A [`LockSession`] owns the credentials derived at attach, the cached status of the
//! lock and the operation state machine. Every entry point takes `&mut self`, so a
//! session processes one inbound event at a time; sessions of different locks share
//! nothing.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::advert::{AdvertisementRecord, Generation, LockState};
use crate::config::DeviceConfig;
use crate::constants::{
    MANUFACTURER, RELAYED_ADVERT_HEX_LEN, RELAYED_ADVERT_PREFIX_HEX_LEN, RELAYED_ADVERT_SERIAL_HEX_OFFSET,
};
use crate::error::LockError;
use crate::message::{self, InboundMessage, OutboundRequest, Transport};
use crate::operation::{OperationState, Transition};
use crate::packet::{CommandPacket, LockDirection};
use crate::provision::DeviceCredentials;
use crate::signing::{self, WORKING_KEY_COUNTER};

/// Handle returned by [`LockSession::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Callback invoked after every state change.
pub type Observer = Box<dyn FnMut(&LockStatus) + Send>;

/// Summary handed to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockStatus {
    pub lock_state: LockState,
    pub battery: Option<f64>,
    pub event_counter: u32,
    pub is_available: bool,
}

/// Device identity for registries and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub manufacturer: String,
    pub model: String,
    pub name: Option<String>,
    pub sw_version: Option<String>,
    pub mac_address: Option<String>,
}

pub struct LockSession<T: Transport> {
    config: DeviceConfig,
    credentials: DeviceCredentials,
    transport: T,
    mac_address: Option<String>,
    lock_state: LockState,
    record: Option<AdvertisementRecord>,
    event_counter: u32,
    operation: OperationState,
    is_available: bool,
    last_seen: Option<DateTime<Utc>>,
    last_advert: Option<String>,
    read_pending: bool,
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: u64,
}

impl<T: Transport> LockSession<T> {
    /// Provision the lock and ask the gateway for its status.
    ///
    /// Without a configured MAC address a full scan is requested and the MAC is learnt
    /// from the first advertisement carrying the lock's serial number.
    pub fn attach(config: DeviceConfig, transport: T) -> Result<Self, LockError> {
        config.validate()?;
        let credentials = DeviceCredentials::provision(&config.new_sn_info, &config.app_key)?;
        let mac_address = config.mac().map(str::to_string);

        info!(
            serial = %credentials.serial_number(),
            model = %credentials.model_id(),
            mac = ?mac_address,
            "Attached lock"
        );

        let mut session = Self {
            config,
            credentials,
            transport,
            mac_address,
            lock_state: LockState::Unlocked,
            record: None,
            event_counter: 0,
            operation: OperationState::Idle,
            is_available: false,
            last_seen: None,
            last_advert: None,
            read_pending: false,
            observers: Vec::new(),
            next_observer_id: 0,
        };

        let request = match &session.mac_address {
            Some(mac) => OutboundRequest::RequestDetails { mac: mac.clone() },
            None => OutboundRequest::ScanAll,
        };
        session.transport.send(request)?;

        Ok(session)
    }

    pub fn register_observer(&mut self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Returns whether the observer was registered.
    pub fn unregister_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    fn notify(&mut self) {
        let status = self.status();
        for (_, observer) in self.observers.iter_mut() {
            observer(&status);
        }
    }

    /// Start a lock (2) or unlock (1) operation; 0 announces and settles without frames.
    ///
    /// Commands are signed with the lock's advertised event counter, so a lock that has
    /// not been heard from yet rejects 1 and 2 with [`LockError::NoEventCounter`].
    pub fn request_operation(&mut self, direction: u8) -> Result<(), LockError> {
        self.request_operation_at(direction, Utc::now())
    }

    pub fn request_operation_at(&mut self, direction: u8, now: DateTime<Utc>) -> Result<(), LockError> {
        debug!(direction, "operateLock requested");
        if self.operation.is_operating() {
            return Err(LockError::OperationInProgress);
        }

        if direction == 0 {
            let previous = self.lock_state;
            self.lock_state = LockState::Operating;
            self.notify();
            self.lock_state = previous;
            self.notify();
            return Ok(());
        }

        let direction = LockDirection::try_from(direction).map_err(|_| LockError::InvalidDirection(direction))?;
        let mac = self
            .mac_address
            .clone()
            .ok_or_else(|| LockError::Config("lock MAC address is not known yet".to_string()))?;

        if self.record.is_none() {
            return Err(LockError::NoEventCounter);
        }
        let timestamp =
            u32::try_from(now.timestamp()).map_err(|_| LockError::TimestampOutOfRange(now.timestamp()))?;

        let working_key = signing::derive_working_key(self.credentials.binding_key(), WORKING_KEY_COUNTER);
        let packet = CommandPacket::build(
            direction,
            timestamp,
            self.credentials.manufacturer_key(),
            &working_key,
            self.event_counter,
        )?;
        let frames = packet.frames();
        debug!(
            %direction,
            counter = self.event_counter,
            packet = %hex::encode_upper(packet.meaningful()),
            "OperationCode generated"
        );

        let frame1 = self.operation.start(direction, frames, now)?;
        self.lock_state = LockState::Operating;
        self.notify();

        self.send_frame(mac, frame1)
    }

    fn send_frame(&mut self, mac: String, frame: String) -> Result<(), LockError> {
        let request = OutboundRequest::Write { mac, frame };
        debug!(payload = %request.payload(), "Sending frame");
        if let Err(err) = self.transport.send(request) {
            self.fail(format!("transport error: {err}"));
            return Err(err);
        }
        Ok(())
    }

    fn fail(&mut self, reason: String) {
        error!(%reason, "Lock operation failed");
        self.operation = OperationState::Failed(reason);
        self.lock_state = LockState::Failed;
        self.notify();
    }

    /// Handle one JSON payload from the gateway.
    pub fn on_message(&mut self, raw: &str) -> Result<(), LockError> {
        self.on_message_at(raw, Utc::now())
    }

    pub fn on_message_at(&mut self, raw: &str, now: DateTime<Utc>) -> Result<(), LockError> {
        debug!(msg = raw, "Received msg");
        for inbound in InboundMessage::parse(raw)? {
            match inbound {
                InboundMessage::Advertisement { mac, payload } => self.on_relayed_advert(mac, &payload, now)?,
                InboundMessage::Acknowledgment {
                    status,
                    mac,
                    written,
                    read,
                    ..
                } => self.on_acknowledgment(&status, &mac, written.as_deref(), read.as_deref(), now)?,
            }
        }
        Ok(())
    }

    /// Handle the value of an FFF3 characteristic read.
    pub fn on_characteristic_read(&mut self, bytes: &[u8]) -> bool {
        self.on_characteristic_read_at(bytes, Utc::now())
    }

    /// Returns whether the read was decoded and ingested.
    pub fn on_characteristic_read_at(&mut self, bytes: &[u8], now: DateTime<Utc>) -> bool {
        match AdvertisementRecord::decode_characteristic(bytes) {
            Ok(record) => {
                let normalized = hex::encode(record.to_broadcast_bytes(self.credentials.serial_number()));
                self.ingest(record, normalized, now);
                true
            }
            Err(err) => {
                warn!(%err, "Discarding characteristic read");
                false
            }
        }
    }

    fn is_own_mac(&self, mac: &str) -> bool {
        self.mac_address
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(mac))
    }

    fn on_relayed_advert(&mut self, mac: String, payload: &str, now: DateTime<Utc>) -> Result<(), LockError> {
        if self.mac_address.is_none() {
            let serial_hex = hex::encode(self.credentials.serial_number());
            let end = RELAYED_ADVERT_SERIAL_HEX_OFFSET + serial_hex.len();
            let carries_serial = payload
                .get(RELAYED_ADVERT_SERIAL_HEX_OFFSET..end)
                .is_some_and(|field| field.eq_ignore_ascii_case(&serial_hex));
            if !carries_serial {
                return Ok(());
            }
            info!(%mac, "Discovered lock MAC address");
            self.mac_address = Some(mac.clone());
            self.transport.send(OutboundRequest::RequestDetails { mac: mac.clone() })?;
        }

        if !self.is_own_mac(&mac) || payload.len() != RELAYED_ADVERT_HEX_LEN {
            return Ok(());
        }

        let Some(advert_hex) = payload.get(RELAYED_ADVERT_PREFIX_HEX_LEN..) else {
            return Ok(());
        };
        let decoded = hex::decode(advert_hex).map_err(LockError::from).and_then(|bytes| {
            AdvertisementRecord::decode(&bytes, Generation::Broadcast, Some(self.credentials.serial_number()))
        });

        match decoded {
            Ok(record) => self.ingest(record, advert_hex.to_string(), now),
            Err(err) => error!(%err, advert = advert_hex, "Wrong advert msg"),
        }
        Ok(())
    }

    fn ingest(&mut self, record: AdvertisementRecord, raw_hex: String, now: DateTime<Utc>) {
        debug!(?record, "Decoded advertisement");

        let counter_changed = self.record.is_none() || record.event_counter != self.event_counter;
        let adopt_state = match record.generation {
            Generation::Broadcast => counter_changed,
            Generation::V1 | Generation::V2 => true,
        };
        if adopt_state && !self.operation.is_operating() {
            self.lock_state = record.lock_state;
        }

        self.event_counter = record.event_counter;
        self.record = Some(record);
        self.last_advert = Some(raw_hex);

        if let Some(previous) = self.last_seen {
            let gap = now - previous;
            if gap < self.config.availability_threshold() {
                self.is_available = true;
                debug!(secs = gap.num_seconds(), "Time from last message");
            } else {
                error!(secs = gap.num_seconds(), "Time from last message: device unavailable");
                self.is_available = false;
            }
        }
        self.last_seen = Some(now);

        self.notify();
    }

    fn on_acknowledgment(
        &mut self,
        status: &str,
        mac: &str,
        written: Option<&str>,
        read: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), LockError> {
        if !self.is_own_mac(mac) {
            debug!(%mac, "Ignoring acknowledgment for another device");
            return Ok(());
        }

        // Read results never touch the write in flight
        if message::is_read_success(status) {
            self.read_pending = false;
            match read.map(hex::decode) {
                Some(Ok(bytes)) => {
                    self.on_characteristic_read_at(&bytes, now);
                }
                Some(Err(err)) => warn!(%err, "Discarding unreadable status read"),
                None => debug!("Status read returned no value"),
            }
            return Ok(());
        }
        if self.read_pending && written.is_none() && !message::is_done(status) {
            self.read_pending = false;
            warn!(%status, "Status read failed");
            return Ok(());
        }

        if !self.operation.is_operating() {
            debug!(%status, "Ignoring acknowledgment with no operation in flight");
            return Ok(());
        }

        let transition = if message::is_success(status) {
            match written {
                Some(written) => self.operation.on_written(written),
                None => Transition::Ignored,
            }
        } else if message::is_done(status) {
            Transition::Ignored
        } else {
            self.operation.on_failure(status)
        };

        match transition {
            Transition::Ignored => {
                debug!(?written, "Acknowledgment does not match an outstanding frame");
                Ok(())
            }
            Transition::SendFrame2(frame2) => {
                let mac = mac.to_string();
                self.send_frame(mac, frame2)
            }
            Transition::Completed(final_state) => {
                info!(state = %final_state, "Lock operation completed");
                self.lock_state = final_state;
                self.notify();
                Ok(())
            }
            Transition::Failed(reason) => {
                error!(%reason, "Lock operation failed");
                self.lock_state = LockState::Failed;
                self.notify();
                Ok(())
            }
        }
    }

    /// Apply the configured acknowledgment timeout; returns whether the operation failed.
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.config.ack_timeout() else {
            return false;
        };
        match self.operation.check_timeout(now, timeout) {
            Transition::Failed(reason) => {
                error!(%reason, "Lock operation failed");
                self.lock_state = LockState::Failed;
                self.notify();
                true
            }
            _ => false,
        }
    }

    /// Ask the gateway to read the status characteristic.
    pub fn request_status_read(&mut self) -> Result<(), LockError> {
        let mac = self
            .mac_address
            .clone()
            .ok_or_else(|| LockError::Config("lock MAC address is not known yet".to_string()))?;
        self.transport.send(OutboundRequest::Read { mac })?;
        self.read_pending = true;
        Ok(())
    }

    pub fn status(&self) -> LockStatus {
        LockStatus {
            lock_state: self.lock_state,
            battery: self.battery(),
            event_counter: self.event_counter,
            is_available: self.is_available,
        }
    }

    pub fn lock_state(&self) -> LockState {
        self.lock_state
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state == LockState::Locked
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock_state == LockState::Unlocked
    }

    pub fn is_jammed(&self) -> bool {
        self.lock_state == LockState::Jammed
    }

    pub fn battery(&self) -> Option<f64> {
        self.record.as_ref().map(|record| record.battery)
    }

    pub fn is_available(&self) -> bool {
        self.is_available
    }

    pub fn event_counter(&self) -> u32 {
        self.event_counter
    }

    pub fn record(&self) -> Option<&AdvertisementRecord> {
        self.record.as_ref()
    }

    pub fn operation(&self) -> &OperationState {
        &self.operation
    }

    /// Hex of the last ingested record in the broadcast layout.
    pub fn last_advert(&self) -> Option<&str> {
        self.last_advert.as_deref()
    }

    pub fn mac_address(&self) -> Option<&str> {
        self.mac_address.as_deref()
    }

    pub fn credentials(&self) -> &DeviceCredentials {
        &self.credentials
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            serial_number: self.credentials.serial_number().to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: self
                .config
                .device_type
                .clone()
                .unwrap_or_else(|| self.credentials.model_id().to_string()),
            name: self.config.device_name.clone(),
            sw_version: self
                .config
                .firmware_version
                .clone()
                .or_else(|| self.record.as_ref().and_then(|r| r.firmware_version.clone())),
            mac_address: self.mac_address.clone(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
