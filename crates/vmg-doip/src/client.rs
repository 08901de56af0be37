//! DoIP/UDS client state machine
//!
//! One client per ZGW endpoint; the client exclusively owns its TCP socket.
//! All receive paths run under an explicit deadline; expiry is an error,
//! never silence.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use vmg_core::{CancelToken, ZgwEndpoint};

use crate::error::DoipError;
use crate::records::{parse_report, ReadinessInfo, VciInfo};
use crate::wire::{self, Header, PayloadType};

/// TCP connect deadline
const CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);
/// Routing activation response deadline
const ACTIVATION_TIMEOUT: Duration = Duration::from_millis(2000);
/// Diagnostic response deadline
const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_millis(5000);

/// Maximum data bytes per TransferData (0x36) block
const TRANSFER_BLOCK_LEN: usize = 1024;

/// Client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoipClientState {
    /// Not connected
    Idle,
    /// TCP connection in progress
    Connecting,
    /// TCP established, routing not yet activated
    Connected,
    /// Routing activated, diagnostics legal
    Active,
    /// Failed; recover with disconnect() + connect()
    Error,
}

/// DoIP/UDS client for a single ZGW
pub struct DoipClient {
    endpoint: ZgwEndpoint,
    stream: Option<TcpStream>,
    state: DoipClientState,
}

impl DoipClient {
    pub fn new(endpoint: ZgwEndpoint) -> Self {
        Self {
            endpoint,
            stream: None,
            state: DoipClientState::Idle,
        }
    }

    pub fn endpoint(&self) -> &ZgwEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> DoipClientState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == DoipClientState::Active
    }

    /// Connect and activate routing. Idempotent while already active.
    pub async fn connect(&mut self) -> Result<(), DoipError> {
        if self.state == DoipClientState::Active {
            debug!(endpoint = %self.endpoint, "already active");
            return Ok(());
        }
        self.disconnect();

        info!(endpoint = %self.endpoint, "connecting to ZGW");
        self.state = DoipClientState::Connecting;

        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(self.endpoint.to_string()))
            .await
        {
            Err(_) => {
                self.state = DoipClientState::Error;
                return Err(DoipError::Timeout("TCP connect"));
            }
            Ok(Err(e)) => {
                self.state = DoipClientState::Error;
                return Err(DoipError::Connect(e.to_string()));
            }
            Ok(Ok(stream)) => stream,
        };
        let _ = stream.set_nodelay(true);
        self.stream = Some(stream);
        self.state = DoipClientState::Connected;

        match self.activate_routing().await {
            Ok(()) => {
                info!(endpoint = %self.endpoint, "routing activated");
                self.state = DoipClientState::Active;
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "routing activation failed");
                self.stream = None;
                self.state = DoipClientState::Error;
                Err(e)
            }
        }
    }

    /// Close the socket and return to IDLE.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(endpoint = %self.endpoint, "disconnected");
        }
        self.state = DoipClientState::Idle;
    }

    async fn activate_routing(&mut self) -> Result<(), DoipError> {
        let payload = wire::routing_activation_request(wire::VMG_ADDRESS);
        let message = wire::encode_message(PayloadType::RoutingActivationRequest, &payload);
        self.send_raw(&message).await?;

        let (payload_type, response) = self.recv_message(ACTIVATION_TIMEOUT).await?;
        if payload_type != PayloadType::RoutingActivationResponse {
            return Err(DoipError::Protocol(format!(
                "expected routing activation response, got {:?}",
                payload_type
            )));
        }

        let code = wire::parse_routing_activation_response(&response)?;
        if code == wire::ACTIVATION_SUCCESS {
            Ok(())
        } else {
            Err(DoipError::Protocol(format!(
                "routing activation denied: 0x{:02X}",
                code
            )))
        }
    }

    /// Send one UDS request inside a DoIP diagnostic message and return the
    /// UDS response bytes (positive-response SID or 0x7F first).
    ///
    /// Legal only in ACTIVE. Any I/O failure closes the socket and parks the
    /// client in ERROR.
    pub async fn send_diagnostic_message(
        &mut self,
        service_id: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, DoipError> {
        if self.state != DoipClientState::Active {
            return Err(DoipError::NotActive);
        }

        let payload =
            wire::diagnostic_request(wire::VMG_ADDRESS, wire::ZGW_ADDRESS, service_id, data);
        let message = wire::encode_message(PayloadType::DiagnosticMessage, &payload);
        debug!(sid = format!("0x{:02X}", service_id), len = data.len(), "TX diagnostic");
        self.send_raw(&message).await?;

        let (payload_type, response) = self.recv_message(DIAGNOSTIC_TIMEOUT).await?;
        if payload_type != PayloadType::DiagnosticMessage {
            return Err(DoipError::Protocol(format!(
                "expected diagnostic message, got {:?}",
                payload_type
            )));
        }

        let uds = wire::diagnostic_response_uds(&response)?;
        debug!(len = uds.len(), "RX diagnostic");
        Ok(uds.to_vec())
    }

    /// Send RoutineControl (0x31) start for `routine_id` and check the
    /// positive response `0x71 [sub] [rid] [status=0x00]`.
    async fn routine_control_start(&mut self, routine_id: u16) -> Result<Vec<u8>, DoipError> {
        let rid = routine_id.to_be_bytes();
        let data = [wire::ROUTINE_START, rid[0], rid[1]];
        let response = self.send_diagnostic_message(0x31, &data).await?;

        let uds = expect_positive(0x31, &response)?;
        if uds.len() < 5 {
            return Err(DoipError::Protocol(format!(
                "routine control response too short: {} bytes",
                uds.len()
            )));
        }
        if uds[4] != 0x00 {
            return Err(DoipError::Protocol(format!(
                "routine 0x{:04X} failed with status 0x{:02X}",
                routine_id, uds[4]
            )));
        }
        Ok(uds.to_vec())
    }

    /// Start VCI collection on the gateway (RID 0xF001).
    pub async fn request_vci_collection(&mut self) -> Result<(), DoipError> {
        info!("requesting VCI collection (RID 0xF001)");
        self.routine_control_start(wire::routine_id::VCI_COLLECTION_START)
            .await?;
        Ok(())
    }

    /// Request the VCI report (RID 0xF002). After the positive routine
    /// response the gateway pushes a second DoIP frame of type 0x9000
    /// carrying the records.
    pub async fn request_vci_report(&mut self) -> Result<Vec<VciInfo>, DoipError> {
        info!("requesting VCI report (RID 0xF002)");
        self.routine_control_start(wire::routine_id::VCI_SEND_REPORT)
            .await?;

        let (payload_type, payload) = self.recv_message(DIAGNOSTIC_TIMEOUT).await?;
        if payload_type != PayloadType::VciReport {
            return Err(DoipError::Protocol(format!(
                "expected VCI report (0x9000), got {:?}",
                payload_type
            )));
        }

        let records = parse_report(&payload, VciInfo::WIRE_LEN, VciInfo::decode)?;
        info!(ecus = records.len(), "VCI report received");
        Ok(records)
    }

    /// Start the readiness check on the gateway (RID 0xF003).
    pub async fn request_readiness_check(&mut self) -> Result<(), DoipError> {
        info!("requesting readiness check (RID 0xF003)");
        self.routine_control_start(wire::routine_id::READINESS_CHECK)
            .await?;
        Ok(())
    }

    /// Request the readiness report (RID 0xF004), followed by a 0x9001 frame.
    pub async fn request_readiness_report(&mut self) -> Result<Vec<ReadinessInfo>, DoipError> {
        info!("requesting readiness report (RID 0xF004)");
        self.routine_control_start(wire::routine_id::READINESS_SEND_REPORT)
            .await?;

        let (payload_type, payload) = self.recv_message(DIAGNOSTIC_TIMEOUT).await?;
        if payload_type != PayloadType::ReadinessReport {
            return Err(DoipError::Protocol(format!(
                "expected readiness report (0x9001), got {:?}",
                payload_type
            )));
        }

        let records = parse_report(&payload, ReadinessInfo::WIRE_LEN, ReadinessInfo::decode)?;
        info!(ecus = records.len(), "readiness report received");
        Ok(records)
    }

    /// Push firmware to the gateway with the UDS block-transfer sequence
    /// 0x34 (RequestDownload) / 0x36 (TransferData) / 0x37 (TransferExit).
    ///
    /// The gateway addresses the individual ECU from the metadata embedded in
    /// the transferred package; `ecu_id` is logged for traceability only.
    /// Cancellation is honored between block transfers; a cancelled transfer
    /// is abandoned without a 0x37 and must be re-driven from the start.
    pub async fn send_firmware(
        &mut self,
        ecu_id: &str,
        data: &[u8],
        cancel: &CancelToken,
    ) -> Result<(), DoipError> {
        info!(ecu_id, bytes = data.len(), "starting firmware transfer");

        // RequestDownload with the total size, 4 bytes big-endian
        let size = (data.len() as u32).to_be_bytes();
        let response = self.send_diagnostic_message(0x34, &size).await?;
        expect_positive(0x34, &response)?;
        debug!("request download accepted");

        // TransferData: sequence counter starts at 1 and wraps mod 256
        let mut counter: u8 = 1;
        for (index, chunk) in data.chunks(TRANSFER_BLOCK_LEN).enumerate() {
            if cancel.is_cancelled() {
                warn!(ecu_id, blocks_sent = index, "firmware transfer cancelled");
                return Err(DoipError::Cancelled);
            }

            let mut block = Vec::with_capacity(1 + chunk.len());
            block.push(counter);
            block.extend_from_slice(chunk);

            let response = self.send_diagnostic_message(0x36, &block).await?;
            expect_positive(0x36, &response).map_err(|e| {
                warn!(block = index, counter, "transfer data rejected");
                e
            })?;

            counter = counter.wrapping_add(1);
        }

        // TransferExit with empty data
        let response = self.send_diagnostic_message(0x37, &[]).await?;
        expect_positive(0x37, &response)?;

        info!(ecu_id, "firmware transfer completed");
        Ok(())
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), DoipError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(DoipError::ClosedByPeer);
        };
        if let Err(e) = stream.write_all(bytes).await {
            self.fail();
            return Err(DoipError::Io(e));
        }
        Ok(())
    }

    /// Read exactly one DoIP message: 8 header bytes, then exactly the
    /// declared payload length. A short read is connection-closed.
    async fn recv_message(
        &mut self,
        deadline: Duration,
    ) -> Result<(PayloadType, Vec<u8>), DoipError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(DoipError::ClosedByPeer);
        };

        let mut header_bytes = [0u8; wire::HEADER_LEN];
        match timeout(deadline, stream.read_exact(&mut header_bytes)).await {
            Err(_) => {
                self.fail();
                return Err(DoipError::Timeout("DoIP header"));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.fail();
                return Err(DoipError::ClosedByPeer);
            }
            Ok(Err(e)) => {
                self.fail();
                return Err(DoipError::Io(e));
            }
            Ok(Ok(_)) => {}
        }

        let header = Header::parse(&header_bytes)?;
        let mut payload = vec![0u8; header.payload_len as usize];
        if header.payload_len > 0 {
            let stream = self.stream.as_mut().expect("stream checked above");
            match timeout(deadline, stream.read_exact(&mut payload)).await {
                Err(_) => {
                    self.fail();
                    return Err(DoipError::Timeout("DoIP payload"));
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.fail();
                    return Err(DoipError::ClosedByPeer);
                }
                Ok(Err(e)) => {
                    self.fail();
                    return Err(DoipError::Io(e));
                }
                Ok(Ok(_)) => {}
            }
        }

        Ok((header.payload_type, payload))
    }

    fn fail(&mut self) {
        self.stream = None;
        self.state = DoipClientState::Error;
    }
}

/// Check a UDS response for the positive-response SID of `request_sid`.
/// A 0x7F negative response is surfaced with its NRC.
fn expect_positive<'a>(request_sid: u8, uds: &'a [u8]) -> Result<&'a [u8], DoipError> {
    match uds.first() {
        None => Err(DoipError::Protocol("empty UDS response".into())),
        Some(&wire::UDS_NEGATIVE_RESPONSE) => Err(DoipError::Uds {
            service: uds.get(1).copied().unwrap_or(request_sid),
            code: uds.get(2).copied().unwrap_or(0),
        }),
        Some(&sid) if sid == request_sid.wrapping_add(wire::UDS_POSITIVE_OFFSET) => Ok(uds),
        Some(&sid) => Err(DoipError::Protocol(format!(
            "unexpected response SID 0x{:02X} to request 0x{:02X}",
            sid, request_sid
        ))),
    }
}
