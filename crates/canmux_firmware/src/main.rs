//! # CAN MUX Firmware
//!
//! Plano de controle do multiplexador CAN: servidor de telegramas binários
//! (seleção de canal, status, versão) e servidor de configuração JSON
//! (settings de rede persistentes).
//!
//! ## Uso
//! ```bash
//! canmux                          # canmux.toml ao lado do executável
//! canmux --config /etc/canmux.toml
//! canmux --print-settings         # mostra os settings de rede e sai
//! ```

mod config_server;
mod server;
mod telegram_server;

use canmux_core::config::AppConfig;
use canmux_core::config_protocol::ConfigService;
use canmux_core::hardware::{ChannelHardware, NullHardware, SimulatedHardware, StatusColor};
use canmux_core::settings::{SettingsField, SettingsStore};
use canmux_core::telegram::TelegramEngine;
use canmux_core::FIRMWARE_VERSION;
use config_server::ConfigHandler;
use server::{Listener, ListenerExit, ServerHandle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use telegram_server::TelegramHandler;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("Configuração inválida: {p}");
        }
        return ExitCode::from(2);
    }

    // ── Settings ──
    let store = Arc::new(SettingsStore::open(config.settings_path(&config_path)));

    if args.iter().any(|a| a == "--print-settings") {
        print_settings(&store);
        return ExitCode::SUCCESS;
    }

    // ── Hardware ──
    let hardware: Arc<dyn ChannelHardware> = match config.hardware.backend.as_str() {
        "null" => Arc::new(NullHardware),
        _ => Arc::new(SimulatedHardware::new()),
    };
    info!("Backend de hardware: {}", config.hardware.backend);
    indicate(hardware.as_ref(), StatusColor::Off);

    // ── Listeners ──
    let snapshot = store.snapshot();
    let telegram_addr = config.telegram.bind_addr(&snapshot);
    let config_addr = config.config_server.bind_addr(&snapshot);

    let (exit_tx, exit_rx) = crossbeam_channel::bounded::<ListenerExit>(2);

    let telegram = Listener::bind("telegram", &telegram_addr).and_then(|l| {
        let engine = TelegramEngine::new(Arc::clone(&hardware), FIRMWARE_VERSION);
        l.serve(Arc::new(TelegramHandler::new(engine)), Some(exit_tx.clone()))
    });
    let telegram = match telegram {
        Ok(handle) => handle,
        Err(e) => return fatal(hardware.as_ref(), &e.to_string(), Vec::new()),
    };

    let configuration = Listener::bind("config", &config_addr).and_then(|l| {
        let service = ConfigService::new(Arc::clone(&store), FIRMWARE_VERSION);
        l.serve(Arc::new(ConfigHandler::new(service)), Some(exit_tx.clone()))
    });
    let configuration = match configuration {
        Ok(handle) => handle,
        Err(e) => return fatal(hardware.as_ref(), &e.to_string(), vec![telegram]),
    };
    drop(exit_tx);

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   CAN MUX – ATIVO (firmware {FIRMWARE_VERSION})");
    println!("══════════════════════════════════════════════");
    println!("  Telegramas:   {}", telegram.local_addr());
    println!("  Configuração: {}", configuration.local_addr());
    println!("  Settings:     {}", display_path(&store));
    println!("══════════════════════════════════════════════");
    println!();

    // Inicialização ok: LED verde
    indicate(hardware.as_ref(), StatusColor::Green);

    // ── Supervisor ──
    // Os listeners só terminam por erro de accept; o primeiro derruba o processo.
    let mut handles = vec![telegram, configuration];
    match exit_rx.recv() {
        Ok(ListenerExit { name, error }) => {
            handles.retain(|h| h.name() != name);
            let reason = error.unwrap_or_else(|| "parado inesperadamente".into());
            fatal(hardware.as_ref(), &format!("Listener {name}: {reason}"), handles)
        }
        Err(_) => fatal(hardware.as_ref(), "Canal de supervisão fechado", handles),
    }
}

/// Falha fatal de um listener: LED vermelho, para os demais e sai com erro.
fn fatal(hardware: &dyn ChannelHardware, reason: &str, others: Vec<ServerHandle>) -> ExitCode {
    error!("{reason}");
    indicate(hardware, StatusColor::Red);
    for handle in others {
        let name = handle.name();
        if let Err(e) = handle.shutdown() {
            warn!("Erro ao parar {name}: {e}");
        }
    }
    ExitCode::FAILURE
}

fn indicate(hardware: &dyn ChannelHardware, color: StatusColor) {
    if let Err(e) = hardware.set_status_indicator(color) {
        warn!("Falha ao ajustar LED ({color:?}): {e}");
    }
}

fn display_path(store: &SettingsStore) -> String {
    store
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(memória)".into())
}

fn print_settings(store: &SettingsStore) {
    let settings = store.snapshot();
    println!("Configuração de rede atual ({}):", display_path(store));
    for field in SettingsField::ALL {
        println!("  {:<12} {}", field.key(), settings.display(field));
    }
    println!("  {:<12} {}", "firmware", FIRMWARE_VERSION);
}
