//! Adaptador de endereços da antiga EEPROM.
//!
//! O menu de console trabalha byte a byte com os offsets históricos do
//! firmware Arduino. Este módulo traduz esses endereços para campos do
//! [`NetworkSettings`]; internamente nada mais usa offsets.
//!
//! ```text
//!  0..=3   IP
//! 10..=15  MAC
//! 20..=23  máscara de sub-rede
//! 30..=33  DNS
//! 40..=43  gateway
//! ```

use crate::settings::{SettingsError, SettingsField, SettingsStore};

pub const EEPROM_IP_ADDRESS_OFFSET: usize = 0;
pub const EEPROM_MAC_ADDRESS_OFFSET: usize = 10;
pub const EEPROM_SUBNET_MASK_ADDRESS_OFFSET: usize = 20;
pub const EEPROM_DNS_ADDRESS_OFFSET: usize = 30;
pub const EEPROM_GATEWAY_ADDRESS_OFFSET: usize = 40;

/// Valor lido em endereços fora dos campos (EEPROM apagada).
pub const ERASED_BYTE: u8 = 0xFF;

/// Offset base de cada campo.
pub const fn base_offset(field: SettingsField) -> usize {
    match field {
        SettingsField::Ip => EEPROM_IP_ADDRESS_OFFSET,
        SettingsField::Mac => EEPROM_MAC_ADDRESS_OFFSET,
        SettingsField::SubnetMask => EEPROM_SUBNET_MASK_ADDRESS_OFFSET,
        SettingsField::Dns => EEPROM_DNS_ADDRESS_OFFSET,
        SettingsField::Gateway => EEPROM_GATEWAY_ADDRESS_OFFSET,
    }
}

/// Campo e índice do byte dentro dele, se o endereço pertence a algum campo.
pub fn resolve(address: usize) -> Option<(SettingsField, usize)> {
    SettingsField::ALL.into_iter().find_map(|field| {
        let base = base_offset(field);
        (base..base + field.len())
            .contains(&address)
            .then(|| (field, address - base))
    })
}

impl SettingsStore {
    /// Lê `count` bytes a partir de `offset`; endereços sem campo leem `0xFF`.
    pub fn get_by_offset(&self, offset: usize, count: usize) -> Vec<u8> {
        let snapshot = self.snapshot();
        (offset..offset.saturating_add(count))
            .map(|address| match resolve(address) {
                Some((field, i)) => snapshot.field(field)[i],
                None => ERASED_BYTE,
            })
            .collect()
    }

    /// Grava um byte. Endereços sem campo são ignorados (sem persistência).
    pub fn set_byte(&self, offset: usize, value: u8) -> Result<(), SettingsError> {
        match resolve(offset) {
            Some((field, i)) => self.update(|s| s.field_mut(field)[i] = value),
            None => Ok(()),
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
