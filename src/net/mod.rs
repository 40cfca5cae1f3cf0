//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, active-connection tracking)
//!     → hijack.rs (read first head: CONNECT or plain HTTP?)
//!         CONNECT → tunnel.rs (raw byte relay to host:port)
//!         other   → hand off to HTTP layer (hyper + axum)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked so shutdown can drain
//! - CONNECT sockets never pass through hyper; the proxy owns them outright

pub mod connection;
pub mod hijack;
pub mod listener;
pub mod tunnel;
