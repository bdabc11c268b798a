//! Test utilities: a scripted mock transport and a harness for driving the
//! link driver deterministically.
//!
//! The mock records every issuance on a channel the test can await, so
//! ordering assertions are exact; completions are injected through the
//! driver's event sender exactly like platform glue would.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use gattlink::{
    Characteristic, ConnectionState, Descriptor, EventSender, GattEvent, GattLink, GattStatus,
    GattTransport, LinkConfig, Service, WriteType, CLIENT_CHARACTERISTIC_CONFIG_UUID,
};

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB);
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);

/// A characteristic carrying the client-configuration descriptor
pub fn characteristic() -> Characteristic {
    Characteristic::new(SERVICE_UUID, BATTERY_LEVEL_UUID)
        .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG_UUID)
}

/// A characteristic on a nonconforming peripheral: no CCC descriptor
pub fn bare_characteristic() -> Characteristic {
    Characteristic::new(SERVICE_UUID, BATTERY_LEVEL_UUID)
}

/// Distinct characteristics for ordering tests
pub fn numbered_characteristic(n: u128) -> Characteristic {
    Characteristic::new(SERVICE_UUID, Uuid::from_u128(0x2A00 + n))
        .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG_UUID)
}

pub fn discovered_services() -> Vec<Service> {
    vec![Service {
        uuid: SERVICE_UUID,
        characteristics: vec![characteristic()],
    }]
}

// ----------------------------------------------------------------------------
// Event Constructors
// ----------------------------------------------------------------------------

pub fn connected() -> GattEvent {
    GattEvent::ConnectionStateChanged {
        status: GattStatus::SUCCESS,
        state: ConnectionState::Connected,
    }
}

pub fn disconnected(status: GattStatus) -> GattEvent {
    GattEvent::ConnectionStateChanged {
        status,
        state: ConnectionState::Disconnected,
    }
}

pub fn services_discovered(services: Vec<Service>) -> GattEvent {
    GattEvent::ServicesDiscovered {
        status: GattStatus::SUCCESS,
        services,
    }
}

pub fn characteristic_read(characteristic: &Characteristic, value: Vec<u8>) -> GattEvent {
    GattEvent::CharacteristicRead {
        status: GattStatus::SUCCESS,
        characteristic: characteristic.id(),
        value,
    }
}

pub fn characteristic_written(characteristic: &Characteristic, value: Vec<u8>) -> GattEvent {
    GattEvent::CharacteristicWrite {
        status: GattStatus::SUCCESS,
        characteristic: characteristic.id(),
        value,
    }
}

pub fn descriptor_written(descriptor: Descriptor) -> GattEvent {
    GattEvent::DescriptorWrite {
        status: GattStatus::SUCCESS,
        descriptor,
    }
}

pub fn notification(characteristic: &Characteristic, value: Vec<u8>) -> GattEvent {
    GattEvent::CharacteristicChanged {
        characteristic: characteristic.id(),
        value,
    }
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// One request the mock transport accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuedOp {
    Connect { auto_connect: bool },
    Disconnect,
    DiscoverServices,
    ReadCharacteristic(Uuid),
    WriteCharacteristic(Uuid, Vec<u8>, WriteType),
    BeginReliableWrite,
    ExecuteReliableWrite,
    AbortReliableWrite,
    ReadDescriptor(Uuid),
    WriteDescriptor(Uuid, Vec<u8>),
    RequestMtu(u16),
    SetNotification(Uuid, bool),
    ResetAdapter,
    EnableAdapter,
    Close,
}

pub struct MockTransport {
    issued_tx: mpsc::UnboundedSender<IssuedOp>,
    refuse: Arc<Mutex<HashSet<&'static str>>>,
    adapter_enabled: Arc<AtomicBool>,
}

impl MockTransport {
    fn issue(&self, kind: &'static str, op: IssuedOp) -> bool {
        if self.refuse.lock().unwrap().contains(kind) {
            return false;
        }
        let _ = self.issued_tx.send(op);
        true
    }
}

impl GattTransport for MockTransport {
    fn connect(&mut self, auto_connect: bool) -> bool {
        self.issue("connect", IssuedOp::Connect { auto_connect })
    }
    fn disconnect(&mut self) -> bool {
        self.issue("disconnect", IssuedOp::Disconnect)
    }
    fn close(&mut self) {
        let _ = self.issued_tx.send(IssuedOp::Close);
    }
    fn discover_services(&mut self) -> bool {
        self.issue("discover-services", IssuedOp::DiscoverServices)
    }
    fn read_characteristic(&mut self, characteristic: &Characteristic) -> bool {
        self.issue(
            "read-characteristic",
            IssuedOp::ReadCharacteristic(characteristic.uuid),
        )
    }
    fn write_characteristic(
        &mut self,
        characteristic: &Characteristic,
        value: &[u8],
        write_type: WriteType,
    ) -> bool {
        self.issue(
            "write-characteristic",
            IssuedOp::WriteCharacteristic(characteristic.uuid, value.to_vec(), write_type),
        )
    }
    fn begin_reliable_write(&mut self) -> bool {
        self.issue("begin-reliable-write", IssuedOp::BeginReliableWrite)
    }
    fn execute_reliable_write(&mut self) -> bool {
        self.issue("execute-reliable-write", IssuedOp::ExecuteReliableWrite)
    }
    fn abort_reliable_write(&mut self) -> bool {
        self.issue("abort-reliable-write", IssuedOp::AbortReliableWrite)
    }
    fn read_descriptor(&mut self, descriptor: &Descriptor) -> bool {
        self.issue("read-descriptor", IssuedOp::ReadDescriptor(descriptor.uuid))
    }
    fn write_descriptor(&mut self, descriptor: &Descriptor, value: &[u8]) -> bool {
        self.issue(
            "write-descriptor",
            IssuedOp::WriteDescriptor(descriptor.uuid, value.to_vec()),
        )
    }
    fn request_mtu(&mut self, mtu: u16) -> bool {
        self.issue("request-mtu", IssuedOp::RequestMtu(mtu))
    }
    fn set_characteristic_notification(
        &mut self,
        characteristic: &Characteristic,
        enable: bool,
    ) -> bool {
        self.issue(
            "set-notification",
            IssuedOp::SetNotification(characteristic.uuid, enable),
        )
    }
    fn reset_adapter(&mut self) -> bool {
        self.adapter_enabled.store(false, Ordering::SeqCst);
        self.issue("reset-adapter", IssuedOp::ResetAdapter)
    }
    fn enable_adapter(&mut self) -> bool {
        self.adapter_enabled.store(true, Ordering::SeqCst);
        self.issue("enable-adapter", IssuedOp::EnableAdapter)
    }
    fn adapter_enabled(&self) -> bool {
        self.adapter_enabled.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// A spawned driver plus everything needed to script it from a test
pub struct Harness {
    pub link: GattLink,
    pub events: EventSender,
    pub issued: mpsc::UnboundedReceiver<IssuedOp>,
    pub refuse: Arc<Mutex<HashSet<&'static str>>>,
    pub adapter_enabled: Arc<AtomicBool>,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn spawn(config: LinkConfig) -> Self {
        let (issued_tx, issued) = mpsc::unbounded_channel();
        let refuse = Arc::new(Mutex::new(HashSet::new()));
        let adapter_enabled = Arc::new(AtomicBool::new(true));
        let transport = MockTransport {
            issued_tx,
            refuse: refuse.clone(),
            adapter_enabled: adapter_enabled.clone(),
        };
        let (link, events, task) = GattLink::spawn(transport, config);
        Self {
            link,
            events,
            issued,
            refuse,
            adapter_enabled,
            task,
        }
    }

    /// Make the transport refuse issuance of the given operation kind
    pub fn refuse_kind(&self, kind: &'static str) {
        self.refuse.lock().unwrap().insert(kind);
    }

    pub fn send(&self, event: GattEvent) {
        self.events.send(event).expect("driver stopped");
    }

    /// Await the next accepted issuance
    pub async fn expect_issued(&mut self) -> IssuedOp {
        tokio::time::timeout(Duration::from_secs(2), self.issued.recv())
            .await
            .expect("timed out waiting for an issuance")
            .expect("transport dropped")
    }

    /// Assert that nothing reaches the transport within a grace window
    pub async fn expect_no_issuance(&mut self) {
        let outcome = tokio::time::timeout(Duration::from_millis(50), self.issued.recv()).await;
        if let Ok(Some(op)) = outcome {
            panic!("unexpected issuance: {op:?}");
        }
    }

    /// Connect (awaitable flavor) and drive the transport side to success
    pub async fn establish(&mut self, auto_connect: bool) {
        let link = self.link.clone();
        let events = self.events.clone();
        let drive = async {
            let op = tokio::time::timeout(Duration::from_secs(2), self.issued.recv())
                .await
                .expect("timed out waiting for connect issuance")
                .expect("transport dropped");
            assert_eq!(op, IssuedOp::Connect { auto_connect });
            events.send(connected()).expect("driver stopped");
        };
        let (result, ()) = tokio::join!(link.connect(auto_connect), drive);
        result.expect("connect failed");
    }

    /// Poll until `condition` holds, failing after a bounded wait
    pub async fn wait_until(&self, what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held: {what}");
    }
}
