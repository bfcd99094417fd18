//! Settings de rede persistentes (MAC, IP, máscara, gateway, DNS).
//!
//! Fonte única de verdade para os dois protocolos. O registro é gravado em
//! JSON no mesmo layout do antigo `can_mux_config.json` (arrays de bytes),
//! de forma síncrona: quando `set_field` retorna `Ok`, o dado já está no disco.
//! A gravação usa arquivo temporário + `fsync` + `rename`, seguido de `fsync`
//! do diretório pai para que a troca de nome sobreviva a uma queda de energia.
//!
//! Escritas são serializadas por um único mutex (read-modify-write-persist);
//! leituras pegam apenas uma cópia do último registro gravado.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Nome padrão do arquivo de settings.
pub const DEFAULT_SETTINGS_FILE: &str = "can_mux_config.json";

pub const MAC_LEN: usize = 6;
pub const IPV4_LEN: usize = 4;

/// Erros do settings store.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Tamanho inválido para {field}: {actual} bytes (esperado {expected})")]
    InvalidLength {
        field: SettingsField,
        expected: usize,
        actual: usize,
    },

    #[error("Erro de I/O em {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Erro de serialização: {0}")]
    Encode(String),
}

// ──────────────────────────────────────────────
// Campos
// ──────────────────────────────────────────────

/// Campo do registro de rede.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsField {
    Mac,
    Ip,
    SubnetMask,
    Gateway,
    Dns,
}

impl SettingsField {
    pub const ALL: [SettingsField; 5] = [
        SettingsField::Mac,
        SettingsField::Ip,
        SettingsField::SubnetMask,
        SettingsField::Gateway,
        SettingsField::Dns,
    ];

    /// Tamanho fixo do campo em bytes.
    pub const fn len(self) -> usize {
        match self {
            SettingsField::Mac => MAC_LEN,
            _ => IPV4_LEN,
        }
    }

    /// Chave usada no protocolo JSON e no arquivo.
    pub const fn key(self) -> &'static str {
        match self {
            SettingsField::Mac => "mac",
            SettingsField::Ip => "ip",
            SettingsField::SubnetMask => "subnet_mask",
            SettingsField::Gateway => "gateway",
            SettingsField::Dns => "dns",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }
}

impl std::fmt::Display for SettingsField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ──────────────────────────────────────────────
// Registro
// ──────────────────────────────────────────────

/// Identidade de rede do dispositivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub mac: [u8; MAC_LEN],
    pub ip: [u8; IPV4_LEN],
    pub subnet_mask: [u8; IPV4_LEN],
    pub gateway: [u8; IPV4_LEN],
    pub dns: [u8; IPV4_LEN],
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            mac: [0x60, 0x6D, 0x3C, 0xF1, 0x7E, 0xA0],
            ip: [192, 168, 5, 11],
            subnet_mask: [255, 255, 0, 0],
            gateway: [192, 168, 0, 1],
            dns: [192, 168, 0, 1],
        }
    }
}

impl NetworkSettings {
    pub fn field(&self, field: SettingsField) -> &[u8] {
        match field {
            SettingsField::Mac => &self.mac,
            SettingsField::Ip => &self.ip,
            SettingsField::SubnetMask => &self.subnet_mask,
            SettingsField::Gateway => &self.gateway,
            SettingsField::Dns => &self.dns,
        }
    }

    pub fn field_mut(&mut self, field: SettingsField) -> &mut [u8] {
        match field {
            SettingsField::Mac => &mut self.mac,
            SettingsField::Ip => &mut self.ip,
            SettingsField::SubnetMask => &mut self.subnet_mask,
            SettingsField::Gateway => &mut self.gateway,
            SettingsField::Dns => &mut self.dns,
        }
    }

    /// Valor do campo formatado para humanos (MAC em hex, demais em decimal).
    pub fn display(&self, field: SettingsField) -> String {
        match field {
            SettingsField::Mac => format_mac(&self.mac),
            other => format_ipv4(self.field(other)),
        }
    }
}

/// `aa:bb:cc:dd:ee:ff`
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// `192.168.5.11`
pub fn format_ipv4(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

// ──────────────────────────────────────────────
// Store
// ──────────────────────────────────────────────

/// Store compartilhado (via `Arc`) pelos dois servidores.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<NetworkSettings>,
    writer: Mutex<()>,
}

impl SettingsStore {
    /// Abre o registro em `path`. Nunca falha: arquivo ausente ou corrompido
    /// resulta nos valores padrão.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = if path.exists() {
            match load_record(&path) {
                Ok(settings) => {
                    info!("Settings carregados de {}", path.display());
                    settings
                }
                Err(e) => {
                    warn!("{e}. Usando settings padrão");
                    NetworkSettings::default()
                }
            }
        } else {
            info!(
                "{} não encontrado, criando settings padrão",
                path.display()
            );
            let defaults = NetworkSettings::default();
            if let Err(e) = persist(&path, &defaults) {
                warn!("Não foi possível gravar settings padrão: {e}");
            }
            defaults
        };

        Self {
            path: Some(path),
            current: RwLock::new(settings),
            writer: Mutex::new(()),
        }
    }

    /// Store sem arquivo de apoio (testes, modo volátil).
    pub fn in_memory() -> Self {
        Self::with_settings(NetworkSettings::default())
    }

    pub fn with_settings(settings: NetworkSettings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cópia do último registro gravado.
    pub fn snapshot(&self) -> NetworkSettings {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes atuais do campo.
    pub fn get(&self, field: SettingsField) -> Vec<u8> {
        self.snapshot().field(field).to_vec()
    }

    /// Grava um campo inteiro. O tamanho precisa ser exatamente o do campo.
    pub fn set_field(&self, field: SettingsField, bytes: &[u8]) -> Result<(), SettingsError> {
        if bytes.len() != field.len() {
            return Err(SettingsError::InvalidLength {
                field,
                expected: field.len(),
                actual: bytes.len(),
            });
        }
        self.update(|s| s.field_mut(field).copy_from_slice(bytes))?;
        debug!("Settings: {field} = {bytes:?}");
        Ok(())
    }

    /// Read-modify-write do registro completo, persistido uma única vez.
    ///
    /// O snapshot visível só muda depois da gravação em disco; se ela falhar
    /// o estado anterior permanece.
    pub fn update<F>(&self, f: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut NetworkSettings),
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = self.snapshot();
        f(&mut next);

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }
}

fn load_record(path: &Path) -> Result<NetworkSettings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content)
        .map_err(|e| SettingsError::Encode(format!("{}: {e}", path.display())))
}

/// Escrita durável: arquivo temporário, fsync e rename atômico.
fn persist(path: &Path, settings: &NetworkSettings) -> Result<(), SettingsError> {
    let content =
        serde_json::to_string_pretty(settings).map_err(|e| SettingsError::Encode(e.to_string()))?;

    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };

    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(content.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_err)?;
    sync_parent(path).map_err(io_err)
}

/// `fsync` do diretório que contém `path` (torna o `rename` durável).
#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

// Windows não abre diretórios com `File::open`; o rename já é journaled pelo NTFS.
#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
