//! Gateway messages: JSON reports coming in, BLE commands going out.

use serde::Deserialize;

use crate::constants::{
    ACK_DONE_PREFIX, ACK_READ_SUCCESS, ACK_SUCCESS, READ_CHARACTERISTIC_UUID, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID,
};
use crate::error::LockError;

#[derive(Debug, Deserialize)]
struct GatewayReport {
    #[serde(rename = "DetailsBLE")]
    details: Option<DetailsBle>,
    #[serde(rename = "BLEOperation")]
    operation: Option<BleOperation>,
}

#[derive(Debug, Deserialize)]
struct DetailsBle {
    mac: Option<String>,
    p: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BleOperation {
    opid: Option<String>,
    state: Option<String>,
    #[serde(rename = "MAC")]
    mac: Option<String>,
    write: Option<String>,
    read: Option<String>,
}

/// A report from the BLE gateway relevant to a lock session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Relayed advertisement: originating MAC and hex payload
    Advertisement { mac: String, payload: String },
    /// Outcome of a characteristic write or read
    Acknowledgment {
        opid: Option<String>,
        status: String,
        mac: String,
        written: Option<String>,
        /// Hex value returned by a read
        read: Option<String>,
    },
}

impl InboundMessage {
    /// Parse one gateway JSON payload.
    ///
    /// A report may carry both an advertisement and an acknowledgment; they are returned
    /// in that order. Sections lacking their mandatory keys are skipped.
    pub fn parse(raw: &str) -> Result<Vec<InboundMessage>, LockError> {
        let report: GatewayReport = serde_json::from_str(raw)?;
        let mut messages = Vec::new();

        if let Some(DetailsBle {
            mac: Some(mac),
            p: Some(payload),
        }) = report.details
        {
            messages.push(InboundMessage::Advertisement { mac, payload });
        }

        if let Some(BleOperation {
            opid,
            state: Some(status),
            mac: Some(mac),
            write,
            read,
        }) = report.operation
        {
            messages.push(InboundMessage::Acknowledgment {
                opid,
                status,
                mac,
                written: write,
                read,
            });
        }

        Ok(messages)
    }
}

/// Whether an acknowledgment status reports a completed write.
pub fn is_success(status: &str) -> bool {
    status == ACK_SUCCESS
}

/// Whether an acknowledgment status reports a completed read.
pub fn is_read_success(status: &str) -> bool {
    status == ACK_READ_SUCCESS
}

/// Whether an acknowledgment status reports a completed operation of any kind.
pub fn is_done(status: &str) -> bool {
    status.starts_with(ACK_DONE_PREFIX)
}

/// A command for the BLE gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    /// Ask for the detailed advertisement of one MAC
    RequestDetails { mac: String },
    /// Ask for the detailed advertisements of every device in range
    ScanAll,
    /// Write a hex frame to the lock's command characteristic
    Write { mac: String, frame: String },
    /// Read the lock's status characteristic
    Read { mac: String },
}

impl OutboundRequest {
    /// Command text understood by the gateway.
    pub fn payload(&self) -> String {
        match self {
            OutboundRequest::RequestDetails { mac } => mac.clone(),
            OutboundRequest::ScanAll => String::new(),
            OutboundRequest::Write { mac, frame } => {
                format!("M:{mac} s:{SERVICE_UUID} c:{WRITE_CHARACTERISTIC_UUID} w:{frame} go")
            }
            OutboundRequest::Read { mac } => {
                format!("M:{mac} s:{SERVICE_UUID} c:{READ_CHARACTERISTIC_UUID} r go")
            }
        }
    }
}

/// Outbound side of a lock session.
pub trait Transport {
    fn send(&mut self, request: OutboundRequest) -> Result<(), LockError>;
}

/// Collects requests instead of sending them; the caller drains the vector.
impl Transport for Vec<OutboundRequest> {
    fn send(&mut self, request: OutboundRequest) -> Result<(), LockError> {
        self.push(request);
        Ok(())
    }
}
