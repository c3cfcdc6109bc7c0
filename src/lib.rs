//! cmdlink — host-side driver framework for microcontroller peripherals.
//!
//! Commands steppers, servos, and sensors attached to a microcontroller over
//! a line-oriented ASCII protocol, transported via serial or TCP/UDP links.
//! The crate is the command/transport engine: it frames a continuous byte
//! stream into discrete commands, correlates requests with asynchronous
//! replies through gated waits with timeouts, and identifies which physical
//! device sits behind which logical address with a bonjour handshake.
//!
//! # Architecture
//!
//! ```text
//! raw bytes ──► StreamDecoder ──► Dispatcher ──► device callback
//!                 (codec)       (session scope)  (cache + Gate release)
//!                                      │                 ▲
//!                                      │ relay           │ private scope
//!                                      ▼                 │
//!                               DeviceCore dispatcher ───┘
//!
//! caller ──► get_xxx(): acquire Gate ─► send request ─► wait ─► cached
//!            value, or a reply-timeout error
//! ```
//!
//! The [`CommandManager`] ties it together: it opens every configured link,
//! runs the `ISINIT`/`INIT` readiness handshake, probes each configured
//! logical address with `BONJOUR`, and instantiates the proxy type the
//! device registry maps to the reported kind string.
//!
//! # Quick start
//!
//! ```no_run
//! use cmdlink::devices::Servo;
//! use cmdlink::CommandManager;
//!
//! #[tokio::main]
//! async fn main() -> cmdlink::Result<()> {
//!     let manager = CommandManager::from_config_file("config/cmdlink.yaml").await?;
//!
//!     if let Some(servo) = manager.typed_device::<Servo>("servo_head") {
//!         servo.set_angle(45).await?;
//!         let angle = servo.get_angle().await?;
//!         println!("angle is now {angle}");
//!     }
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Wire format
//!
//! `<header><id><delim><arg1><delim>...<term>`, default `delim=','` and
//! `term=';'`, floats rendered with a fixed decimal precision (default 2).
//! There is no escaping: argument text must not contain the delimiter or
//! terminator — a protocol invariant, not a bug.

pub mod codec;
pub mod config;
pub mod devices;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod manager;
pub mod transport;

pub use codec::{CmdArg, FrameCodec, FramingConfig, StreamDecoder};
pub use config::{DeviceEntry, LinkEntry, LinkKind, ManagerConfig};
pub use devices::{Device, DeviceCore, DeviceRegistry};
pub use discovery::{DiscoveryService, ProbeOutcome};
pub use dispatch::Dispatcher;
pub use error::{CmdLinkError, Result};
pub use gate::Gate;
pub use manager::CommandManager;
pub use transport::{Link, Session};
