//! Configuração do processo via TOML.
//!
//! Portas, endereços de bind, arquivo de settings e backend de hardware.
//! Os settings de rede do dispositivo (MAC, IP…) não ficam aqui: eles vivem
//! no [`SettingsStore`](crate::settings::SettingsStore).

use crate::config_protocol::CONFIG_PORT;
use crate::settings::{DEFAULT_SETTINGS_FILE, NetworkSettings, format_ipv4};
use crate::telegram::TELEGRAM_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Nome padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_FILE: &str = "canmux.toml";

/// Um listener TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// IP local para bind (vazio = IP gravado nos settings)
    pub bind_ip: String,
    /// Porta TCP
    pub port: u16,
}

impl ListenerConfig {
    fn with_port(port: u16) -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            port,
        }
    }

    /// Endereço de bind, resolvendo o IP vazio para o IP dos settings.
    pub fn bind_addr(&self, settings: &NetworkSettings) -> String {
        let ip = if self.bind_ip.is_empty() {
            format_ipv4(&settings.ip)
        } else {
            self.bind_ip.clone()
        };
        format!("{ip}:{}", self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::with_port(TELEGRAM_PORT)
    }
}

/// Onde o registro de rede é persistido.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub path: PathBuf,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SETTINGS_FILE),
        }
    }
}

/// Backend de hardware.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// "simulated" ou "null"
    pub backend: String,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: "simulated".into(),
        }
    }
}

/// Configuração raiz do firmware.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: ListenerConfig,
    pub config_server: ListenerConfig,
    pub settings: SettingsConfig,
    pub hardware: HardwareConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram: ListenerConfig::with_port(TELEGRAM_PORT),
            config_server: ListenerConfig::with_port(CONFIG_PORT),
            settings: SettingsConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// `canmux.toml` ao lado do executável.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join(DEFAULT_CONFIG_FILE)
    }

    /// Caminho dos settings; relativo ao diretório do arquivo de configuração.
    pub fn settings_path(&self, config_path: &Path) -> PathBuf {
        if self.settings.path.is_absolute() {
            return self.settings.path.clone();
        }
        config_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(&self.settings.path)
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.telegram.port == 0 {
            errors.push("Porta de telegramas não pode ser 0".into());
        }
        if self.config_server.port == 0 {
            errors.push("Porta de configuração não pode ser 0".into());
        }
        if self.telegram.port == self.config_server.port
            && self.telegram.bind_ip == self.config_server.bind_ip
        {
            errors.push(format!(
                "Telegramas e configuração usam a mesma porta ({})",
                self.telegram.port
            ));
        }
        if !matches!(self.hardware.backend.as_str(), "simulated" | "null") {
            errors.push(format!(
                "Backend de hardware inválido: {} (simulated | null)",
                self.hardware.backend
            ));
        }
        if self.settings.path.as_os_str().is_empty() {
            errors.push("Caminho dos settings não pode ser vazio".into());
        }

        errors
    }
}
