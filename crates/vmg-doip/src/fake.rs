//! In-process fake Zone Gateway for tests
//!
//! Listens on an ephemeral localhost port, answers routing activation with a
//! configurable code, and services the UDS subset the VMG client speaks:
//! RoutineControl (0x31) with the VCI/readiness report push, and the
//! 0x34/0x36/0x37 block-transfer sequence. Every received TransferData block
//! counter is recorded for assertions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use vmg_core::ZgwEndpoint;

use crate::records::{encode_report, ReadinessInfo, VciInfo};
use crate::wire::{self, Header, PayloadType};

/// Scripted behavior of the fake gateway
#[derive(Debug, Clone)]
pub struct FakeZgwOptions {
    /// Routing activation response code (0x10 = success)
    pub routing_code: u8,
    /// Status byte returned for routine control requests
    pub routine_status: u8,
    /// Records pushed as the 0x9000 frame after a 0xF002 routine
    pub vci_records: Vec<VciInfo>,
    /// Records pushed as the 0x9001 frame after a 0xF004 routine
    pub readiness_records: Vec<ReadinessInfo>,
    /// Reject the n-th TransferData block (0-based) with NRC 0x31
    pub reject_block: Option<u64>,
}

impl Default for FakeZgwOptions {
    fn default() -> Self {
        Self {
            routing_code: wire::ACTIVATION_SUCCESS,
            routine_status: 0x00,
            vci_records: Vec::new(),
            readiness_records: Vec::new(),
            reject_block: None,
        }
    }
}

#[derive(Default)]
struct SharedState {
    block_counters: Mutex<Vec<u8>>,
    firmware_bytes: AtomicU64,
    declared_size: AtomicU64,
}

/// Handle to a running fake gateway; the listener task stops on drop.
pub struct FakeZgw {
    addr: SocketAddr,
    state: Arc<SharedState>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeZgw {
    /// Bind an ephemeral port and start serving connections.
    pub async fn spawn(options: FakeZgwOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(SharedState::default());

        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    break;
                };
                debug!(%peer, "fake ZGW accepted connection");
                let state = task_state.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, state, options).await;
                });
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn endpoint(&self) -> ZgwEndpoint {
        ZgwEndpoint::new("127.0.0.1", self.addr.port())
    }

    /// Sequence counters seen in 0x36 blocks, in arrival order.
    pub fn block_counters(&self) -> Vec<u8> {
        self.state.block_counters.lock().clone()
    }

    /// Total firmware payload bytes received via 0x36.
    pub fn firmware_bytes(&self) -> u64 {
        self.state.firmware_bytes.load(Ordering::SeqCst)
    }

    /// Size announced by the last RequestDownload (0x34).
    pub fn declared_size(&self) -> u64 {
        self.state.declared_size.load(Ordering::SeqCst)
    }
}

impl Drop for FakeZgw {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    state: Arc<SharedState>,
    options: FakeZgwOptions,
) -> std::io::Result<()> {
    loop {
        let mut header_bytes = [0u8; wire::HEADER_LEN];
        if stream.read_exact(&mut header_bytes).await.is_err() {
            return Ok(()); // peer went away
        }
        let Ok(header) = Header::parse(&header_bytes) else {
            return Ok(());
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        stream.read_exact(&mut payload).await?;

        match header.payload_type {
            PayloadType::RoutingActivationRequest if payload.len() >= 2 => {
                // SA (echoed) + TA + code + reserved
                let mut response = Vec::with_capacity(9);
                response.extend_from_slice(&payload[0..2]);
                response.extend_from_slice(&wire::ZGW_ADDRESS.to_be_bytes());
                response.push(options.routing_code);
                response.extend_from_slice(&[0x00; 4]);
                let frame = wire::encode_message(PayloadType::RoutingActivationResponse, &response);
                stream.write_all(&frame).await?;
            }
            PayloadType::DiagnosticMessage => {
                handle_diagnostic(&mut stream, &payload, &state, &options).await?;
            }
            _ => {
                debug!(?header.payload_type, "fake ZGW ignoring frame");
            }
        }
    }
}

async fn handle_diagnostic(
    stream: &mut TcpStream,
    payload: &[u8],
    state: &SharedState,
    options: &FakeZgwOptions,
) -> std::io::Result<()> {
    if payload.len() < 5 {
        return Ok(());
    }
    let sid = payload[4];
    let data = &payload[5..];

    let mut followup: Option<Vec<u8>> = None;
    let uds_response: Vec<u8> = match sid {
        0x31 if data.len() >= 3 => {
            let sub = data[0];
            let rid = u16::from_be_bytes([data[1], data[2]]);
            match rid {
                wire::routine_id::VCI_SEND_REPORT => {
                    let report = encode_report(&options.vci_records, VciInfo::encode);
                    followup = Some(wire::encode_message(PayloadType::VciReport, &report));
                }
                wire::routine_id::READINESS_SEND_REPORT => {
                    let report = encode_report(&options.readiness_records, ReadinessInfo::encode);
                    followup = Some(wire::encode_message(PayloadType::ReadinessReport, &report));
                }
                _ => {}
            }
            vec![0x71, sub, data[1], data[2], options.routine_status]
        }
        0x34 if data.len() >= 4 => {
            let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            state.declared_size.store(size as u64, Ordering::SeqCst);
            state.block_counters.lock().clear();
            state.firmware_bytes.store(0, Ordering::SeqCst);
            vec![0x74, 0x20, 0x04, 0x02]
        }
        0x36 if !data.is_empty() => {
            let counter = data[0];
            let index = {
                let mut counters = state.block_counters.lock();
                counters.push(counter);
                counters.len() as u64 - 1
            };
            if options.reject_block == Some(index) {
                vec![0x7F, 0x36, 0x31]
            } else {
                state
                    .firmware_bytes
                    .fetch_add(data.len() as u64 - 1, Ordering::SeqCst);
                vec![0x76, counter]
            }
        }
        0x37 => vec![0x77],
        other => vec![0x7F, other, 0x11], // service not supported
    };

    let mut response = Vec::with_capacity(4 + uds_response.len());
    response.extend_from_slice(&wire::ZGW_ADDRESS.to_be_bytes());
    response.extend_from_slice(&wire::VMG_ADDRESS.to_be_bytes());
    response.extend_from_slice(&uds_response);
    let frame = wire::encode_message(PayloadType::DiagnosticMessage, &response);
    stream.write_all(&frame).await?;

    if let Some(frame) = followup {
        stream.write_all(&frame).await?;
    }
    Ok(())
}
