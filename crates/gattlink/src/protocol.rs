//! GATT protocol vocabulary: status codes, attribute handles, and the
//! client-characteristic-configuration constants

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Well-Known UUIDs and Magic Values
// ----------------------------------------------------------------------------

/// Client Characteristic Configuration descriptor (Bluetooth SIG, 0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// Value written to the CCC descriptor to enable notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Value written to the CCC descriptor to disable notifications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// ----------------------------------------------------------------------------
// Transport Status
// ----------------------------------------------------------------------------

/// Raw status code reported by the transport for a completed operation.
///
/// Zero is success; everything else is a transport-specific failure code that
/// is threaded verbatim into the error returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub u16);

impl GattStatus {
    /// Operation completed successfully
    pub const SUCCESS: GattStatus = GattStatus(0);

    /// Status code the platform radio stack emits when it has wedged itself;
    /// triggers the out-of-band adapter power-cycle recovery
    pub const STACK_ERROR: GattStatus = GattStatus(0x85);

    /// Generic failure; also used as the synthetic status when a reliable
    /// write's echoed value does not match what was sent
    pub const FAILURE: GattStatus = GattStatus(0x101);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl core::fmt::Display for GattStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Attribute Handles
// ----------------------------------------------------------------------------

/// Write mode for a characteristic write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteType {
    /// Write with response; completion carries the peripheral's status
    WithResponse,
    /// Write without response; the stack still reports local completion
    WithoutResponse,
}

/// Identity of a characteristic, unique within one device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicId {
    pub service: Uuid,
    pub uuid: Uuid,
}

impl core::fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.service, self.uuid)
    }
}

/// A characteristic handle as discovered on the remote peripheral.
///
/// The payload it carries is opaque to this crate; callers interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    /// Owning service UUID
    pub service: Uuid,
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Descriptors discovered under this characteristic
    pub descriptors: SmallVec<[Descriptor; 2]>,
}

impl Characteristic {
    pub fn new(service: Uuid, uuid: Uuid) -> Self {
        Self {
            service,
            uuid,
            descriptors: SmallVec::new(),
        }
    }

    /// Attach a descriptor handle
    pub fn with_descriptor(mut self, uuid: Uuid) -> Self {
        self.descriptors.push(Descriptor {
            service: self.service,
            characteristic: self.uuid,
            uuid,
        });
        self
    }

    pub fn id(&self) -> CharacteristicId {
        CharacteristicId {
            service: self.service,
            uuid: self.uuid,
        }
    }

    /// Find the client-characteristic-configuration descriptor, if the
    /// peripheral exposes one. Nonconforming peripherals omit it.
    pub fn client_config_descriptor(&self) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .find(|d| d.uuid == CLIENT_CHARACTERISTIC_CONFIG_UUID)
    }
}

/// A descriptor handle under a characteristic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub uuid: Uuid,
}

/// A service and its characteristics, as reported by service discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(GattStatus::SUCCESS.is_success());
        assert!(!GattStatus::STACK_ERROR.is_success());
        assert!(!GattStatus(1).is_success());
    }

    #[test]
    fn test_client_config_lookup() {
        let service = Uuid::from_u128(0x1800);
        let chr = Characteristic::new(service, Uuid::from_u128(0x2A00))
            .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG_UUID);

        let cccd = chr.client_config_descriptor().expect("descriptor present");
        assert_eq!(cccd.characteristic, chr.uuid);
        assert_eq!(cccd.uuid, CLIENT_CHARACTERISTIC_CONFIG_UUID);

        let bare = Characteristic::new(service, Uuid::from_u128(0x2A01));
        assert!(bare.client_config_descriptor().is_none());
    }
}
