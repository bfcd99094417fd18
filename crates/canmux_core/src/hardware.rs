//! Interface de capacidades de hardware consumida pelo núcleo.
//!
//! A implementação real (port extenders PCAL6408 via I2C e LED RGB via GPIO)
//! fica fora deste crate. O núcleo só conhece o trait [`ChannelHardware`] e
//! precisa funcionar mesmo com o stub [`NullHardware`].

use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Número de canais por lado (IO0..IO7 do PCAL6408).
pub const CHANNELS_PER_SIDE: u8 = 8;

/// Grupo de canais endereçável (cada um é um port extender).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Master,
    Slave,
}

impl Side {
    /// Índice estável para tabelas por lado.
    pub const fn index(self) -> usize {
        match self {
            Side::Master => 0,
            Side::Slave => 1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Master => f.write_str("master"),
            Side::Slave => f.write_str("slave"),
        }
    }
}

/// Cor do LED de status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusColor {
    #[default]
    Off,
    Red,
    Green,
    /// Vermelho + verde: último telegrama terminou em erro.
    Yellow,
}

/// Erros da camada de hardware.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Port extender {0} indisponível")]
    Unavailable(Side),

    #[error("Erro de barramento: {0}")]
    Bus(String),
}

/// Capacidades físicas usadas pelo motor de telegramas.
pub trait ChannelHardware: Send + Sync {
    /// Limpa todos os canais do lado e ativa `channel` (0 = nenhum).
    fn select_channel(&self, side: Side, channel: u8) -> Result<(), HardwareError>;

    /// Lê o registrador de saída do port extender do lado.
    fn read_output_register(&self, side: Side) -> Result<u8, HardwareError>;

    /// Ajusta o LED de status.
    fn set_status_indicator(&self, color: StatusColor) -> Result<(), HardwareError>;
}

// ──────────────────────────────────────────────
// Stub sem efeito
// ──────────────────────────────────────────────

/// Hardware ausente: aceita tudo e lê sempre 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHardware;

impl ChannelHardware for NullHardware {
    fn select_channel(&self, _side: Side, _channel: u8) -> Result<(), HardwareError> {
        Ok(())
    }

    fn read_output_register(&self, _side: Side) -> Result<u8, HardwareError> {
        Ok(0)
    }

    fn set_status_indicator(&self, _color: StatusColor) -> Result<(), HardwareError> {
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Simulação em memória
// ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimState {
    output: [u8; 2],
    status: StatusColor,
    select_calls: usize,
}

/// Port extenders simulados: o canal `n` corresponde ao bit `n - 1` do
/// registrador de saída, como no PCAL6408.
#[derive(Debug, Default)]
pub struct SimulatedHardware {
    state: Mutex<SimState>,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cor atual do LED.
    pub fn status(&self) -> StatusColor {
        self.lock().status
    }

    /// Quantas vezes `select_channel` foi chamado.
    pub fn select_calls(&self) -> usize {
        self.lock().select_calls
    }

    /// Força o valor do registrador (útil em testes).
    pub fn set_output_register(&self, side: Side, value: u8) {
        self.lock().output[side.index()] = value;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChannelHardware for SimulatedHardware {
    fn select_channel(&self, side: Side, channel: u8) -> Result<(), HardwareError> {
        if channel > CHANNELS_PER_SIDE {
            return Err(HardwareError::Bus(format!("canal {channel} fora do port extender")));
        }
        let mut state = self.lock();
        state.select_calls += 1;
        state.output[side.index()] = match channel {
            0 => 0,
            n => 1 << (n - 1),
        };
        debug!("[sim] {side}: canal {channel} → 0b{:08b}", state.output[side.index()]);
        Ok(())
    }

    fn read_output_register(&self, side: Side) -> Result<u8, HardwareError> {
        Ok(self.lock().output[side.index()])
    }

    fn set_status_indicator(&self, color: StatusColor) -> Result<(), HardwareError> {
        self.lock().status = color;
        debug!("[sim] LED {color:?}");
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
