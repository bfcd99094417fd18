//! Protocolo de configuração (porta 3364).
//!
//! Uma requisição JSON por linha (`\n`), uma resposta JSON por linha:
//!
//! ```text
//! → {"command": "update_config", "data": {"ip": "10.0.0.5"}}
//! ← {"status": "success", "message": "ip updated successfully"}
//! ```
//!
//! Comandos: `get_config`, `get_firmware`, `update_config`,
//! `update_all_config`. As mensagens em inglês fazem parte do protocolo
//! (o cliente GUI as exibe) e não devem ser traduzidas.

use crate::FirmwareVersion;
use crate::settings::{MAC_LEN, IPV4_LEN, SettingsField, SettingsStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Porta TCP histórica do servidor de configuração.
pub const CONFIG_PORT: u16 = 3364;

/// Resposta enviada ao cliente.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConfigResponse {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ConfigResponse {
    pub fn data(data: Value) -> Self {
        ConfigResponse::Success {
            data: Some(data),
            message: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        ConfigResponse::Success {
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ConfigResponse::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConfigResponse::Success { .. })
    }

    /// Um objeto JSON terminado em `\n`.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","message":"Failed to encode response: {e}"}}"#)
        });
        line.push('\n');
        line
    }
}

/// Valor inválido para um campo.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("Invalid MAC address format: {0}")]
    InvalidMac(String),

    #[error("Invalid IP address format: {0}")]
    InvalidIpv4(String),

    #[error("value must be a string, got {0}")]
    NotAString(Value),
}

// ──────────────────────────────────────────────
// Parsing de valores
// ──────────────────────────────────────────────

/// Aceita `AA:BB:CC:DD:EE:FF`, `AA-BB-..`, `AA.BB..` ou `AABBCCDDEEFF`.
pub fn parse_mac(input: &str) -> Result<[u8; MAC_LEN], FieldError> {
    let cleaned: String = input.chars().filter(|c| *c != ' ').collect();

    let separator = ['.', ':', '-'].into_iter().find(|s| cleaned.contains(*s));
    let parts: Vec<&str> = if let Some(sep) = separator {
        cleaned.split(sep).collect()
    } else if cleaned.len() == MAC_LEN * 2 && cleaned.is_ascii() {
        (0..MAC_LEN).map(|i| &cleaned[i * 2..i * 2 + 2]).collect()
    } else {
        return Err(FieldError::InvalidMac("Invalid MAC format".into()));
    };

    if parts.len() != MAC_LEN {
        return Err(FieldError::InvalidMac("MAC address must have 6 parts".into()));
    }

    let mut mac = [0u8; MAC_LEN];
    for (slot, part) in mac.iter_mut().zip(&parts) {
        let valid = (1..=2).contains(&part.len()) && part.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(FieldError::InvalidMac(format!("MAC byte {part} out of range")));
        }
        *slot = u8::from_str_radix(part, 16)
            .map_err(|_| FieldError::InvalidMac(format!("MAC byte {part} out of range")))?;
    }
    Ok(mac)
}

/// Exatamente quatro octetos decimais 0–255 separados por ponto.
pub fn parse_ipv4(input: &str) -> Result<[u8; IPV4_LEN], FieldError> {
    let parts: Vec<&str> = input.split('.').collect();
    if parts.len() != IPV4_LEN {
        return Err(FieldError::InvalidIpv4("IP address must have 4 parts".into()));
    }

    let mut ip = [0u8; IPV4_LEN];
    for (slot, part) in ip.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FieldError::InvalidIpv4(format!("IP octet '{part}' is not a number")));
        }
        *slot = part
            .parse::<u8>()
            .map_err(|_| FieldError::InvalidIpv4(format!("IP octet {part} out of range (0-255)")))?;
    }
    Ok(ip)
}

/// Converte o valor JSON nos bytes do campo.
pub fn parse_field_value(field: SettingsField, value: &Value) -> Result<Vec<u8>, FieldError> {
    let text = value
        .as_str()
        .ok_or_else(|| FieldError::NotAString(value.clone()))?;
    match field {
        SettingsField::Mac => parse_mac(text).map(|b| b.to_vec()),
        _ => parse_ipv4(text).map(|b| b.to_vec()),
    }
}

// ──────────────────────────────────────────────
// Serviço
// ──────────────────────────────────────────────

/// Estado de `get_config`.
#[derive(Debug, Serialize)]
struct ConfigView {
    mac: String,
    ip: String,
    subnet_mask: String,
    gateway: String,
    dns: String,
    firmware: String,
}

#[derive(Debug, Serialize)]
struct FirmwareView {
    major: u8,
    minor: u8,
    version: String,
}

/// Despacha requisições de configuração sobre o [`SettingsStore`].
pub struct ConfigService {
    store: Arc<SettingsStore>,
    firmware: FirmwareVersion,
}

impl ConfigService {
    pub fn new(store: Arc<SettingsStore>, firmware: FirmwareVersion) -> Self {
        Self { store, firmware }
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    /// Processa uma linha recebida (sem o `\n`).
    pub fn handle_line(&self, line: &str) -> ConfigResponse {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!("JSON inválido: {e}");
                return ConfigResponse::error("Invalid JSON message");
            }
        };

        let Some(object) = request.as_object() else {
            return ConfigResponse::error("Invalid request: expected a JSON object");
        };
        let Some(command) = object.get("command").and_then(Value::as_str) else {
            return ConfigResponse::error("Invalid request: missing 'command'");
        };
        let empty = Map::new();
        let data = match object.get("data") {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return ConfigResponse::error("Invalid request: 'data' must be an object"),
        };

        info!("Comando recebido: {command}");
        let response = self.dispatch(command, data);
        debug!("Resposta: {response:?}");
        response
    }

    fn dispatch(&self, command: &str, data: &Map<String, Value>) -> ConfigResponse {
        match command {
            "get_config" => self.get_config(),
            "get_firmware" => self.get_firmware(),
            "update_config" => self.update_config(data),
            "update_all_config" => self.update_all_config(data),
            other => ConfigResponse::error(format!("Unknown command: {other}")),
        }
    }

    fn get_config(&self) -> ConfigResponse {
        let s = self.store.snapshot();
        let view = ConfigView {
            mac: s.display(SettingsField::Mac),
            ip: s.display(SettingsField::Ip),
            subnet_mask: s.display(SettingsField::SubnetMask),
            gateway: s.display(SettingsField::Gateway),
            dns: s.display(SettingsField::Dns),
            firmware: self.firmware.to_string(),
        };
        to_data(&view)
    }

    fn get_firmware(&self) -> ConfigResponse {
        to_data(&FirmwareView {
            major: self.firmware.major,
            minor: self.firmware.minor,
            version: self.firmware.to_string(),
        })
    }

    fn update_config(&self, data: &Map<String, Value>) -> ConfigResponse {
        if data.len() != 1 {
            return ConfigResponse::error("Expected exactly one configuration parameter");
        }
        let Some((key, value)) = data.iter().next() else {
            return ConfigResponse::error("Expected exactly one configuration parameter");
        };
        let Some(field) = SettingsField::from_key(key) else {
            return ConfigResponse::error(format!("Unknown configuration type: {key}"));
        };

        match self.apply(field, value) {
            Ok(()) => ConfigResponse::ok(format!("{key} updated successfully")),
            Err(message) => ConfigResponse::error(message),
        }
    }

    /// Aplica em ordem; o primeiro erro aborta, mantendo o que já foi gravado.
    fn update_all_config(&self, data: &Map<String, Value>) -> ConfigResponse {
        let mut updated = Vec::new();

        for (key, value) in data {
            let Some(field) = SettingsField::from_key(key) else {
                warn!("Tipo de configuração desconhecido ignorado: {key}");
                continue;
            };
            if let Err(message) = self.apply(field, value) {
                return ConfigResponse::error(message);
            }
            updated.push(key.as_str());
        }

        if updated.is_empty() {
            return ConfigResponse::error("No valid configuration items provided");
        }
        ConfigResponse::ok(format!(
            "Updated {} configuration items: {}",
            updated.len(),
            updated.join(", ")
        ))
    }

    fn apply(&self, field: SettingsField, value: &Value) -> Result<(), String> {
        let fail = |reason: String| {
            warn!("Falha ao atualizar {field}: {reason}");
            format!("Failed to update {field}: {reason}")
        };

        let bytes = parse_field_value(field, value).map_err(|e| fail(e.to_string()))?;
        self.store
            .set_field(field, &bytes)
            .map_err(|e| fail(e.to_string()))?;

        info!("{field} atualizado: {}", self.store.snapshot().display(field));
        Ok(())
    }
}

fn to_data<T: Serialize>(view: &T) -> ConfigResponse {
    match serde_json::to_value(view) {
        Ok(data) => ConfigResponse::data(data),
        Err(e) => ConfigResponse::error(format!("Failed to read configuration: {e}")),
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FIRMWARE_VERSION;
    use crate::settings::NetworkSettings;
    use serde_json::json;

    fn service() -> ConfigService {
        ConfigService::new(Arc::new(SettingsStore::in_memory()), FIRMWARE_VERSION)
    }

    fn send(service: &ConfigService, request: Value) -> Value {
        let line = service.handle_line(&request.to_string()).to_line();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        serde_json::from_str(&line).unwrap()
    }

    fn current(service: &ConfigService, key: &str) -> String {
        let r = send(service, json!({"command": "get_config"}));
        r["data"][key].as_str().unwrap().to_string()
    }

    #[test]
    fn get_config_reports_defaults_and_firmware() {
        let r = send(&service(), json!({"command": "get_config", "data": {}}));
        assert_eq!(r["status"], "success");
        assert_eq!(r["data"]["mac"], "60:6d:3c:f1:7e:a0");
        assert_eq!(r["data"]["ip"], "192.168.5.11");
        assert_eq!(r["data"]["subnet_mask"], "255.255.0.0");
        assert_eq!(r["data"]["gateway"], "192.168.0.1");
        assert_eq!(r["data"]["dns"], "192.168.0.1");
        assert_eq!(r["data"]["firmware"], "1.4");
    }

    #[test]
    fn get_firmware() {
        let r = send(&service(), json!({"command": "get_firmware"}));
        let data = json!({"major": 1, "minor": 4, "version": "1.4"});
        assert_eq!(r, json!({"status": "success", "data": data}));
    }

    #[test]
    fn update_ip_roundtrip() {
        let s = service();
        for ip in ["10.0.0.5", "0.0.0.0", "255.255.255.255", "172.16.254.1"] {
            let r = send(&s, json!({"command": "update_config", "data": {"ip": ip}}));
            assert_eq!(r, json!({"status": "success", "message": "ip updated successfully"}));
            assert_eq!(current(&s, "ip"), ip);
        }
    }

    #[test]
    fn update_mac_normalizes_case() {
        let s = service();
        send(&s, json!({"command": "update_config", "data": {"mac": "AA:BB:CC:DD:EE:FF"}}));
        assert_eq!(current(&s, "mac"), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_separator_styles_are_equivalent() {
        let expected = [0xDE, 0xCD, 0xAE, 0x0F, 0xFE, 0xED];
        for input in [
            "DE:CD:AE:0F:FE:ED",
            "DE.CD.AE.0F.FE.ED",
            "de-cd-ae-0f-fe-ed",
            "DECDAE0FFEED",
            "DE CD AE 0F FE ED",
        ] {
            assert_eq!(parse_mac(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn rejects_malformed_mac() {
        let inputs = [
            "",
            "DE:CD:AE:0F:FE",
            "DECDAE0FFE",
            "GG:00:00:00:00:00",
            "100:0:0:0:0:0",
            "::::::",
        ];
        for input in inputs {
            assert!(parse_mac(input).is_err(), "{input}");
        }
    }

    #[test]
    fn rejects_malformed_ipv4() {
        let inputs = [
            "", "10.0.0", "10.0.0.0.1", "256.0.0.1", "a.b.c.d", "10..0.1", "-1.0.0.0", "+1.0.0.0",
        ];
        for input in inputs {
            assert!(parse_ipv4(input).is_err(), "{input}");
        }
        assert_eq!(parse_ipv4("010.0.0.1").unwrap(), [10, 0, 0, 1]);
    }

    #[test]
    fn update_config_requires_single_entry() {
        let s = service();
        for data in [json!({}), json!({"ip": "10.0.0.1", "dns": "1.1.1.1"})] {
            let r = send(&s, json!({"command": "update_config", "data": data}));
            assert_eq!(r["status"], "error");
            assert_eq!(r["message"], "Expected exactly one configuration parameter");
        }
        assert_eq!(s.store().snapshot(), NetworkSettings::default());
    }

    #[test]
    fn update_config_unknown_field() {
        let r = send(&service(), json!({"command": "update_config", "data": {"hostname": "mux"}}));
        assert_eq!(r["message"], "Unknown configuration type: hostname");
    }

    #[test]
    fn update_config_invalid_value_names_field() {
        let s = service();
        let r = send(&s, json!({"command": "update_config", "data": {"gateway": "1.2.3"}}));
        assert_eq!(r["status"], "error");
        assert!(r["message"].as_str().unwrap().starts_with("Failed to update gateway:"));
        let r = send(&s, json!({"command": "update_config", "data": {"dns": 8888}}));
        assert!(r["message"].as_str().unwrap().starts_with("Failed to update dns:"));
        assert_eq!(s.store().snapshot(), NetworkSettings::default());
    }

    #[test]
    fn update_all_config_applies_in_order() {
        let s = service();
        let r = send(
            &s,
            json!({"command": "update_all_config", "data": {
                "mac": "01-02-03-04-05-06",
                "ip": "10.1.1.2",
                "subnet_mask": "255.255.255.0",
                "gateway": "10.1.1.1",
                "dns": "9.9.9.9"
            }}),
        );
        assert_eq!(
            r["message"],
            "Updated 5 configuration items: mac, ip, subnet_mask, gateway, dns"
        );
        let snap = s.store().snapshot();
        assert_eq!(snap.mac, [1, 2, 3, 4, 5, 6]);
        assert_eq!(snap.dns, [9, 9, 9, 9]);
    }

    #[test]
    fn update_all_config_partial_apply_then_abort() {
        let s = service();
        let r = send(
            &s,
            json!({"command": "update_all_config", "data": {
                "ip": "10.9.9.9",
                "subnet_mask": "255.0.300.0",
                "dns": "1.1.1.1"
            }}),
        );
        assert_eq!(r["status"], "error");
        assert!(r["message"].as_str().unwrap().starts_with("Failed to update subnet_mask:"));
        let snap = s.store().snapshot();
        assert_eq!(snap.ip, [10, 9, 9, 9], "entrada anterior permanece aplicada");
        assert_eq!(snap.dns, NetworkSettings::default().dns, "entrada posterior não aplicada");
    }

    #[test]
    fn update_all_config_skips_unknown_keys() {
        let s = service();
        let data = json!({"foo": 1, "dns": "8.8.4.4"});
        let r = send(&s, json!({"command": "update_all_config", "data": data}));
        assert_eq!(r["message"], "Updated 1 configuration items: dns");
        let r = send(&s, json!({"command": "update_all_config", "data": {"foo": 1}}));
        assert_eq!(r["message"], "No valid configuration items provided");
    }

    #[test]
    fn invalid_json_and_unknown_command() {
        let s = service();
        assert_eq!(
            s.handle_line("{not json"),
            ConfigResponse::error("Invalid JSON message")
        );
        let r = send(&s, json!({"command": "reboot"}));
        assert_eq!(r, json!({"status": "error", "message": "Unknown command: reboot"}));
    }

    #[test]
    fn malformed_requests() {
        let s = service();
        assert!(!s.handle_line("[1, 2]").is_success());
        assert!(!s.handle_line(r#"{"data": {}}"#).is_success());
        assert!(!s.handle_line(r#"{"command": "update_config", "data": [1]}"#).is_success());
        assert!(s.handle_line(r#"{"command": "get_firmware", "data": null}"#).is_success());
    }
}
