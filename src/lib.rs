//! # can-bridge
//!
//! Bidirectional bridge between a CAN bus and a single TCP peer.
//!
//! Frames received on the bus are sent to the connected peer as
//! newline-delimited JSON records; records sent by the peer are transmitted
//! on the bus. One fixed frame can additionally be sent periodically.
//!
//! ## Architecture
//!
//! ```text
//! Bus ─► InboundRelay ─► FrameCodec ─► PeerSlot ─► writer task ─► peer
//! peer ─► OutboundRelay ─► LineBuffer ─► FrameCodec ─► Bus
//! CyclicController ─► Bus
//! ```
//!
//! - **Bus side**: anything implementing [`bus::CanBus`]. [`bus::VirtualBus`]
//!   is always available; `bus::SocketCanBus` needs the `socketcan` feature
//! - **Peer side**: TCP, one connection at a time; a new connection
//!   replaces the old one
//!
//! ## Wire format
//!
//! ```text
//! {"Time":1700000000000,"ID":256,"DLC":8,"Data":[0,1,2,3,4,5,6,7]}
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use can_bridge::bus::VirtualBus;
//! use can_bridge::BridgeBuilder;
//!
//! #[tokio::main]
//! async fn main() -> can_bridge::Result<()> {
//!     let bridge = BridgeBuilder::new(Arc::new(VirtualBus::new()))
//!         .listen_addr("127.0.0.1:5000")
//!         .start()
//!         .await?;
//!
//!     bridge.transmit(&can_bridge::console::test_frame())?;
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod bus;
pub mod codec;
pub mod config;
pub mod console;
pub mod cyclic;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod shutdown;
pub mod writer;

mod bridge;

pub use bridge::{Bridge, BridgeBuilder};
pub use config::BridgeConfig;
pub use cyclic::{CyclicController, CyclicState};
pub use error::{BridgeError, Result};
pub use protocol::Frame;
pub use shutdown::ShutdownSignal;
