//! vmg-doip - DoIP/UDS client for VMG → ZGW communication
//!
//! Implements the tester side of ISO 13400 (DoIP) carrying ISO 14229 (UDS)
//! payloads over TCP, plus the two gateway-specific report payload types
//! (VCI report `0x9000`, readiness report `0x9001`).
//!
//! The client is a strict state machine:
//!
//! ```text
//! IDLE ──connect()──► CONNECTING ──tcp ok──► CONNECTED ──activation ok──► ACTIVE
//!   ▲                     │                      │                          │
//!   │                     └──────────► ERROR ◄───┘◄────── i/o failure ──────┘
//!   └───────────────── disconnect() ◄──┘
//! ```
//!
//! Diagnostic operations are legal only in `Active`. Any I/O failure closes
//! the socket and parks the client in `Error`; callers recover with
//! `disconnect()` + `connect()`.

pub mod client;
pub mod error;
pub mod fake;
pub mod records;
pub mod wire;

pub use client::{DoipClient, DoipClientState};
pub use error::DoipError;
pub use fake::FakeZgw;
pub use records::{ReadinessInfo, VciInfo};
pub use wire::PayloadType;
