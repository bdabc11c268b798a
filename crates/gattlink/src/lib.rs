//! Serialized command queue over a single-outstanding-operation GATT link
//!
//! A BLE GATT connection can only correctly handle one in-flight request at
//! a time: completions arrive out-of-band on a platform callback thread,
//! the link disconnects without warning, and the radio stack occasionally
//! wedges itself. This crate turns that transport into a safe, composable
//! interface: callers issue any sequence of operations, awaitable or
//! callback-style, and the driver guarantees strict FIFO ordering, one
//! outstanding request, drain-on-disconnect, and transparent reconnection
//! for long-lived subscribers.
//!
//! ## Architecture
//!
//! - [`protocol`] - GATT vocabulary: status codes, attribute handles, CCC constants
//! - [`error`] - Error taxonomy surfaced through operation continuations
//! - [`config`] - Link configuration and timeouts
//! - [`continuation`] - Single-fire result handles (channel and callback flavors)
//! - [`queue`] - FIFO operation queue with a single in-flight slot
//! - [`transport`] - The downstream transport trait and its event stream
//! - [`driver`] - The driver task: event adapter, state machine, reconnection
//! - [`link`] - Public facade with typed entry points per operation family
//! - [`monitoring`] - Operational counters
//!
//! All shared state lives in a single driver task fed by two unbounded
//! channels: commands from facade handles and events from the platform
//! glue. No operation reaches the transport except from that task, which is
//! what upholds "one outstanding request" across any number of callers.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gattlink::{GattLink, LinkConfig, GattTransport};
//!
//! # async fn example(transport: impl GattTransport + 'static) -> gattlink::Result<()> {
//! let (link, events, _task) = GattLink::spawn(transport, LinkConfig::default());
//! // Wire `events` into the platform's GATT callbacks, then:
//! link.connect(true).await?;
//! let services = link.discover_services().await?;
//! let battery = &services[0].characteristics[0];
//! let level = link.read_characteristic(battery).await?;
//! # let _ = level;
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod continuation;
pub mod driver;
pub mod error;
pub mod link;
pub mod monitoring;
pub mod protocol;
mod queue;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::LinkConfig;
pub use continuation::Continuation;
pub use driver::{LinkDriver, LostHandler, NotifyHandler};
pub use error::{LinkError, Result};
pub use link::GattLink;
pub use monitoring::{LinkStats, StatsSnapshot};
pub use protocol::{
    Characteristic, CharacteristicId, Descriptor, GattStatus, Service, WriteType,
    CLIENT_CHARACTERISTIC_CONFIG_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
pub use transport::{
    event_channel, ConnectionState, EventReceiver, EventSender, GattEvent, GattTransport,
};
