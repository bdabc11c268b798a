//! Walkthrough against an in-process loopback transport.
//!
//! The loopback acknowledges every request instantly, which makes the
//! serialization visible in the logs: each operation is issued only after
//! the previous one resolved, no matter how they are submitted.

use std::sync::{Arc, Mutex};

use gattlink::{
    Characteristic, ConnectionState, Descriptor, EventSender, GattEvent, GattLink, GattStatus,
    GattTransport, LinkConfig, Service, WriteType, CLIENT_CHARACTERISTIC_CONFIG_UUID,
};
use uuid::Uuid;

const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB);
const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);

/// Transport that completes every request immediately with canned data
struct LoopbackTransport {
    events: Arc<Mutex<Option<EventSender>>>,
    battery_level: u8,
}

impl LoopbackTransport {
    fn emit(&self, event: GattEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    fn layout(&self) -> Vec<Service> {
        let level = Characteristic::new(BATTERY_SERVICE, BATTERY_LEVEL)
            .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG_UUID);
        vec![Service {
            uuid: BATTERY_SERVICE,
            characteristics: vec![level],
        }]
    }
}

impl GattTransport for LoopbackTransport {
    fn connect(&mut self, _auto_connect: bool) -> bool {
        self.emit(GattEvent::ConnectionStateChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Connected,
        });
        true
    }

    fn disconnect(&mut self) -> bool {
        self.emit(GattEvent::ConnectionStateChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Disconnected,
        });
        true
    }

    fn close(&mut self) {}

    fn discover_services(&mut self) -> bool {
        let services = self.layout();
        self.emit(GattEvent::ServicesDiscovered {
            status: GattStatus::SUCCESS,
            services,
        });
        true
    }

    fn read_characteristic(&mut self, characteristic: &Characteristic) -> bool {
        self.emit(GattEvent::CharacteristicRead {
            status: GattStatus::SUCCESS,
            characteristic: characteristic.id(),
            value: vec![self.battery_level],
        });
        true
    }

    fn write_characteristic(
        &mut self,
        characteristic: &Characteristic,
        value: &[u8],
        _write_type: WriteType,
    ) -> bool {
        self.emit(GattEvent::CharacteristicWrite {
            status: GattStatus::SUCCESS,
            characteristic: characteristic.id(),
            value: value.to_vec(),
        });
        true
    }

    fn begin_reliable_write(&mut self) -> bool {
        true
    }

    fn execute_reliable_write(&mut self) -> bool {
        self.emit(GattEvent::ReliableWriteCompleted {
            status: GattStatus::SUCCESS,
        });
        true
    }

    fn abort_reliable_write(&mut self) -> bool {
        true
    }

    fn read_descriptor(&mut self, descriptor: &Descriptor) -> bool {
        self.emit(GattEvent::DescriptorRead {
            status: GattStatus::SUCCESS,
            descriptor: descriptor.clone(),
            value: vec![0x00, 0x00],
        });
        true
    }

    fn write_descriptor(&mut self, descriptor: &Descriptor, _value: &[u8]) -> bool {
        self.emit(GattEvent::DescriptorWrite {
            status: GattStatus::SUCCESS,
            descriptor: descriptor.clone(),
        });
        true
    }

    fn request_mtu(&mut self, mtu: u16) -> bool {
        self.emit(GattEvent::MtuChanged {
            status: GattStatus::SUCCESS,
            mtu,
        });
        true
    }

    fn set_characteristic_notification(
        &mut self,
        _characteristic: &Characteristic,
        _enable: bool,
    ) -> bool {
        true
    }

    fn reset_adapter(&mut self) -> bool {
        true
    }

    fn enable_adapter(&mut self) -> bool {
        true
    }

    fn adapter_enabled(&self) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> gattlink::Result<()> {
    tracing_subscriber::fmt::init();

    let events_slot: Arc<Mutex<Option<EventSender>>> = Arc::default();
    let transport = LoopbackTransport {
        events: events_slot.clone(),
        battery_level: 73,
    };

    let (link, events, _task) = GattLink::spawn(transport, LinkConfig::default());
    *events_slot.lock().unwrap() = Some(events.clone());

    link.connect(false).await?;

    let services = link.discover_services().await?;
    let battery = services[0].characteristics[0].clone();
    tracing::info!(service = %services[0].uuid, "discovered battery service");

    let level = link.read_characteristic(&battery).await?;
    tracing::info!(level = level[0], "battery level");

    let mtu = link.request_mtu(247).await?;
    tracing::info!(mtu, "negotiated mtu");

    link.write_reliable(&battery, vec![0x01]).await?;
    tracing::info!("reliable write committed");

    link.set_notify(&battery, |value| {
        tracing::info!(level = value[0], "battery notification");
    })
    .await?;

    // Fake an unsolicited notification from the peripheral.
    let _ = events.send(GattEvent::CharacteristicChanged {
        characteristic: battery.id(),
        value: vec![72],
    });

    link.close_connection().await?;
    link.close().await?;
    Ok(())
}
