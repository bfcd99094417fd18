//! # CAN MUX Core
//!
//! Crate compartilhado com o protocolo de telegramas, o protocolo de
//! configuração JSON, o store de settings de rede e a configuração TOML do
//! firmware do CAN MUX.
//!
//! ## Módulos
//! - [`telegram`] – Deframing, CRC32, despacho e telegramas de erro
//! - [`config_protocol`] – Requisições JSON por linha sobre os settings
//! - [`settings`] – Registro de rede persistente (MAC, IP, máscara…)
//! - [`eeprom`] – Adaptador dos offsets históricos da EEPROM
//! - [`hardware`] – Interface com port extenders e LED de status
//! - [`config`] – Configuração do processo via TOML

pub mod telegram;
pub mod config_protocol;
pub mod settings;
pub mod eeprom;
pub mod hardware;
pub mod config;

// Re-exports convenientes
pub use config::AppConfig;
pub use config_protocol::{ConfigResponse, ConfigService};
pub use hardware::{ChannelHardware, NullHardware, SimulatedHardware};
pub use settings::{NetworkSettings, SettingsField, SettingsStore};
pub use telegram::{Deframer, TelegramEngine};

/// Versão de firmware reportada pelos dois protocolos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub const FIRMWARE_VERSION: FirmwareVersion = FirmwareVersion { major: 1, minor: 4 };
