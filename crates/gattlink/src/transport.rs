//! Transport seam: the downstream GATT collaborator and its event stream

use tokio::sync::mpsc;

use crate::protocol::{Characteristic, CharacteristicId, Descriptor, GattStatus, Service, WriteType};

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Link state, mutated only in response to transport events, never
/// speculatively by the facade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// The platform GATT object this crate serializes access to.
///
/// Issue calls return whether the platform accepted the request; the actual
/// outcome arrives later as a [`GattEvent`] on the event channel handed out
/// by the driver. The contract is strictly one outstanding request: the
/// driver never issues a second call before the first one's completion event
/// has been consumed.
pub trait GattTransport: Send {
    /// Begin connecting. With `auto_connect` the platform keeps retrying in
    /// the background after failures.
    fn connect(&mut self, auto_connect: bool) -> bool;

    /// Tear down the link; completion arrives as a `Disconnected` state event
    fn disconnect(&mut self) -> bool;

    /// Release all platform resources; no further events are expected
    fn close(&mut self);

    fn discover_services(&mut self) -> bool;

    fn read_characteristic(&mut self, characteristic: &Characteristic) -> bool;

    fn write_characteristic(
        &mut self,
        characteristic: &Characteristic,
        value: &[u8],
        write_type: WriteType,
    ) -> bool;

    /// Open a reliable-write transaction
    fn begin_reliable_write(&mut self) -> bool;

    /// Commit the open reliable-write transaction
    fn execute_reliable_write(&mut self) -> bool;

    /// Roll back the open reliable-write transaction
    fn abort_reliable_write(&mut self) -> bool;

    fn read_descriptor(&mut self, descriptor: &Descriptor) -> bool;

    fn write_descriptor(&mut self, descriptor: &Descriptor, value: &[u8]) -> bool;

    fn request_mtu(&mut self, mtu: u16) -> bool;

    /// Local notification routing toggle; does not touch the peripheral
    fn set_characteristic_notification(
        &mut self,
        characteristic: &Characteristic,
        enable: bool,
    ) -> bool;

    /// Hang recovery: power the adapter down. Best effort.
    fn reset_adapter(&mut self) -> bool;

    /// Hang recovery: power the adapter back up. Best effort.
    fn enable_adapter(&mut self) -> bool;

    /// Current adapter power state, polled during recovery
    fn adapter_enabled(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Asynchronous completions and out-of-band signals from the platform.
///
/// Platform glue translates its native callbacks into these variants and
/// pushes them through the unbounded event channel; the sender never blocks,
/// so the platform callback thread is never held up.
#[derive(Debug, Clone)]
pub enum GattEvent {
    /// Link state changed; `status` is non-zero when the transition was
    /// caused by a failure
    ConnectionStateChanged {
        status: GattStatus,
        state: ConnectionState,
    },
    /// Service discovery finished; carries the discovered layout
    ServicesDiscovered {
        status: GattStatus,
        services: Vec<Service>,
    },
    CharacteristicRead {
        status: GattStatus,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    /// Characteristic write finished; `value` is the value the stack reports
    /// having written (checked against the shadow copy for reliable writes)
    CharacteristicWrite {
        status: GattStatus,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    DescriptorRead {
        status: GattStatus,
        descriptor: Descriptor,
        value: Vec<u8>,
    },
    DescriptorWrite {
        status: GattStatus,
        descriptor: Descriptor,
    },
    MtuChanged { status: GattStatus, mtu: u16 },
    /// Commit of a reliable-write transaction finished
    ReliableWriteCompleted { status: GattStatus },
    /// Unsolicited notification from the peripheral
    CharacteristicChanged {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    /// Radio power state broadcast; disable while connected is treated as a
    /// link loss, re-enable retriggers a registered reconnect policy
    AdapterStateChanged { enabled: bool },
}

pub type EventSender = mpsc::UnboundedSender<GattEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<GattEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
