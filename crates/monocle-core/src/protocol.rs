//! Device protocol constants: GATT layout and REPL control sequences

use uuid::Uuid;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Nordic secure DFU service (16-bit `0xFE59` on the Bluetooth base UUID)
pub const DFU_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FE59_0000_1000_8000_00805F9B34FB);

/// DFU control point, written with response and notifying responses
pub const DFU_CONTROL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x8EC90001_F315_4F60_9FB8_838830DAEA50);

/// DFU packet characteristic, written without response
pub const DFU_PACKET_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x8EC90002_F315_4F60_9FB8_838830DAEA50);

/// REPL service (Nordic UART layout)
pub const REPL_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Host → device REPL bytes
pub const REPL_RX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Device → host REPL notifications
pub const REPL_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Raw data service
pub const RAW_DATA_SERVICE_UUID: Uuid = Uuid::from_u128(0xE5700001_7BAC_429A_B4CE_57FF900F479D);

/// Host → device raw data bytes
pub const RAW_DATA_RX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xE5700002_7BAC_429A_B4CE_57FF900F479D);

/// Device → host raw data notifications
pub const RAW_DATA_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xE5700003_7BAC_429A_B4CE_57FF900F479D);

// ----------------------------------------------------------------------------
// REPL Control Sequences
// ----------------------------------------------------------------------------

/// Ctrl-C Ctrl-A: interrupt and enter the raw REPL
pub const ENTER_RAW_MODE: &str = "\x03\x01";

/// Ctrl-C Ctrl-B: interrupt and return to the friendly REPL
pub const EXIT_RAW_MODE: &str = "\x03\x02";

/// Ctrl-C Ctrl-D: soft reset, used to resynchronize the prompt after mutations
pub const SOFT_RESET: &str = "\x03\x04";

/// Ctrl-B alone: print the friendly banner and prompt
pub const FRIENDLY_PROMPT: &str = "\x02";

/// Ctrl-D: end of a raw REPL command
pub const END_OF_TRANSMISSION: char = '\x04';

/// Raw REPL acknowledgement preceding command output
pub const OK_MARKER: &str = "OK";

/// Friendly REPL prompt
pub const FRIENDLY_PROMPT_MARKER: &str = ">>> ";

/// Echoed prompt used to trim terminal output during internal operations
pub const ECHO_PROMPT_MARKER: &str = ">>>";

/// Raw REPL prompt
pub const RAW_PROMPT_MARKER: &str = ">";

/// Banner printed by the device when the raw REPL starts
pub const RAW_REPL_BANNER: &str = "raw REPL";

// ----------------------------------------------------------------------------
// Service Layout
// ----------------------------------------------------------------------------

/// The three GATT services a Monocle may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceService {
    FirmwareUpdate,
    Repl,
    RawData,
}

impl DeviceService {
    pub fn uuid(&self) -> Uuid {
        match self {
            DeviceService::FirmwareUpdate => DFU_SERVICE_UUID,
            DeviceService::Repl => REPL_SERVICE_UUID,
            DeviceService::RawData => RAW_DATA_SERVICE_UUID,
        }
    }

    /// Characteristic the host writes to (control point for DFU)
    pub fn rx_characteristic(&self) -> Uuid {
        match self {
            DeviceService::FirmwareUpdate => DFU_CONTROL_CHARACTERISTIC_UUID,
            DeviceService::Repl => REPL_RX_CHARACTERISTIC_UUID,
            DeviceService::RawData => RAW_DATA_RX_CHARACTERISTIC_UUID,
        }
    }

    /// Characteristic the host subscribes to
    pub fn tx_characteristic(&self) -> Uuid {
        match self {
            DeviceService::FirmwareUpdate => DFU_CONTROL_CHARACTERISTIC_UUID,
            DeviceService::Repl => REPL_TX_CHARACTERISTIC_UUID,
            DeviceService::RawData => RAW_DATA_TX_CHARACTERISTIC_UUID,
        }
    }
}

impl core::fmt::Display for DeviceService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceService::FirmwareUpdate => write!(f, "firmware-update"),
            DeviceService::Repl => write!(f, "repl"),
            DeviceService::RawData => write!(f, "raw-data"),
        }
    }
}
