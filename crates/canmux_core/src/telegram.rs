//! Protocolo binário de telegramas (porta 3363).
//!
//! Não há campo de tamanho: o comprimento total vem do primeiro byte.
//!
//! ```text
//! ┌────────┬─────────────┬──────────────────┐
//! │ ID (1) │ Payload (N) │ CRC32 BE (4)     │
//! └────────┴─────────────┴──────────────────┘
//! ```
//!
//! | ID | Comando | Requisição | Resposta |
//! |----|---------|-----------|----------|
//! | `0x01` | `SELECT_CHANNEL` | 6 | eco (6) |
//! | `0x02` | `GET_CHANNEL_STATUS` | 6 | 6 |
//! | `0x03` | `GET_FIRMWARE_VERSION` | 5 | 7 |
//!
//! Erros: `[0xFF, código, CRC32 BE]` (6 bytes).

use crate::FirmwareVersion;
use crate::hardware::{ChannelHardware, CHANNELS_PER_SIDE, HardwareError, Side, StatusColor};
use std::sync::Arc;
use tracing::{debug, warn};

/// Porta TCP histórica do protocolo de telegramas.
pub const TELEGRAM_PORT: u16 = 3363;

pub const SELECT_CHANNEL: u8 = 0x01;
pub const GET_CHANNEL_STATUS: u8 = 0x02;
pub const GET_FIRMWARE_VERSION: u8 = 0x03;

/// ID dos telegramas de erro.
pub const ERROR_TELEGRAM_ID: u8 = 0xFF;

pub const ERROR_CHECKSUM_NOK: u8 = 0x01;
pub const ERROR_PAYLOAD_NOK: u8 = 0x02;
pub const ERROR_TELEGRAM_ID_NOK: u8 = 0x03;
pub const ERROR_SLAVE_NOT_FOUND: u8 = 0x04;
pub const ERROR_MASTER_NOT_FOUND: u8 = 0x05;

/// Tamanho do trailer CRC32.
pub const CHECKSUM_SIZE: usize = 4;

/// Capacidade do buffer de recepção.
pub const BUFFER_CAPACITY: usize = 10;

/// Menor telegrama conhecido; usado para IDs desconhecidos.
pub const SHORTEST_FRAME: usize = 5;

const LENGTH_TABLE: [(u8, usize); 3] = [
    (SELECT_CHANNEL, 6),
    (GET_CHANNEL_STATUS, 6),
    (GET_FIRMWARE_VERSION, 5),
];

/// Comprimento total do telegrama a partir do primeiro byte.
pub fn frame_length(command_id: u8) -> usize {
    LENGTH_TABLE
        .iter()
        .find(|(id, _)| *id == command_id)
        .map_or(SHORTEST_FRAME, |(_, len)| *len)
}

/// CRC32 IEEE (o mesmo do zlib).
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// `content` seguido do CRC32 big-endian de `content`.
pub fn seal(content: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(content.len() + CHECKSUM_SIZE);
    frame.extend_from_slice(content);
    frame.extend_from_slice(&crc32(content).to_be_bytes());
    frame
}

/// Telegrama de erro `[0xFF, code, crc]`.
pub fn error_frame(code: u8) -> Vec<u8> {
    seal(&[ERROR_TELEGRAM_ID, code])
}

/// Erros de processamento de um telegrama.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Checksum inválido: calculado 0x{computed:08X}, recebido 0x{received:08X}")]
    ChecksumMismatch { computed: u32, received: u32 },

    #[error("ID de telegrama desconhecido: 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Payload inválido 0x{payload:02X} para comando 0x{command:02X}")]
    InvalidPayload { command: u8, payload: u8 },

    #[error("Hardware indisponível ({side}): {source}")]
    HardwareUnavailable {
        side: Side,
        #[source]
        source: HardwareError,
    },
}

impl TelegramError {
    /// Código de erro transmitido no telegrama de erro.
    pub fn code(&self) -> u8 {
        match self {
            TelegramError::ChecksumMismatch { .. } => ERROR_CHECKSUM_NOK,
            TelegramError::UnknownCommand(_) => ERROR_TELEGRAM_ID_NOK,
            TelegramError::InvalidPayload { .. } => ERROR_PAYLOAD_NOK,
            TelegramError::HardwareUnavailable { side: Side::Master, .. } => ERROR_MASTER_NOT_FOUND,
            TelegramError::HardwareUnavailable { side: Side::Slave, .. } => ERROR_SLAVE_NOT_FOUND,
        }
    }
}

// ──────────────────────────────────────────────
// Telegrama
// ──────────────────────────────────────────────

/// Um telegrama completo, ainda não validado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    bytes: [u8; BUFFER_CAPACITY],
    len: usize,
}

impl Telegram {
    /// Constrói a partir de um frame completo (testes e clientes).
    ///
    /// O tamanho precisa bater com a tabela para o ID do primeiro byte.
    pub fn from_bytes(frame: &[u8]) -> Option<Self> {
        let &id = frame.first()?;
        if frame.len() != frame_length(id) {
            return None;
        }
        let mut bytes = [0u8; BUFFER_CAPACITY];
        bytes[..frame.len()].copy_from_slice(frame);
        Some(Self {
            bytes,
            len: frame.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn command_id(&self) -> u8 {
        self.bytes[0]
    }

    /// Bytes cobertos pelo CRC (ID + payload).
    pub fn content(&self) -> &[u8] {
        &self.bytes[..self.len - CHECKSUM_SIZE]
    }

    pub fn payload(&self) -> &[u8] {
        &self.content()[1..]
    }

    /// CRC recebido, reconstruído em big-endian.
    pub fn received_checksum(&self) -> u32 {
        let trailer = &self.bytes[self.len - CHECKSUM_SIZE..self.len];
        u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]])
    }

    pub fn verify(&self) -> Result<(), TelegramError> {
        let computed = crc32(self.content());
        let received = self.received_checksum();
        if computed == received {
            Ok(())
        } else {
            Err(TelegramError::ChecksumMismatch { computed, received })
        }
    }
}

// ──────────────────────────────────────────────
// Deframer
// ──────────────────────────────────────────────

/// Estado da máquina de recepção.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingFirst,
    Accumulating,
    Complete,
}

/// Separa o fluxo de bytes de uma conexão em telegramas.
///
/// Estado privado de cada conexão. Fica em `Complete` depois de entregar um
/// telegrama, válido ou não; o próximo byte recomeça do zero como
/// `AwaitingFirst` faria.
#[derive(Debug)]
pub struct Deframer {
    buffer: [u8; BUFFER_CAPACITY],
    index: usize,
    expected: usize,
    state: ParseState,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            buffer: [0; BUFFER_CAPACITY],
            index: 0,
            expected: 0,
            state: ParseState::AwaitingFirst,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Bytes acumulados do telegrama em andamento.
    pub fn pending(&self) -> usize {
        match self.state {
            ParseState::Accumulating => self.index,
            _ => 0,
        }
    }

    /// Consome um byte; retorna o telegrama quando completo.
    pub fn push(&mut self, byte: u8) -> Option<Telegram> {
        if self.state != ParseState::Accumulating {
            self.reset();
            self.expected = frame_length(byte);
            self.state = ParseState::Accumulating;
        }

        self.buffer[self.index] = byte;
        self.index += 1;

        if self.index < self.expected {
            return None;
        }

        self.state = ParseState::Complete;
        Some(Telegram {
            bytes: self.buffer,
            len: self.expected,
        })
    }

    /// Consome um bloco recebido do socket.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Telegram> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn reset(&mut self) {
        self.buffer = [0; BUFFER_CAPACITY];
        self.index = 0;
        self.expected = 0;
        self.state = ParseState::AwaitingFirst;
    }
}

// ──────────────────────────────────────────────
// Engine
// ──────────────────────────────────────────────

/// Valida e despacha telegramas para o hardware.
pub struct TelegramEngine {
    hardware: Arc<dyn ChannelHardware>,
    firmware: FirmwareVersion,
}

impl TelegramEngine {
    pub fn new(hardware: Arc<dyn ChannelHardware>, firmware: FirmwareVersion) -> Self {
        Self { hardware, firmware }
    }

    /// Processa um telegrama completo e retorna os bytes da resposta.
    ///
    /// Sempre há resposta: erros viram telegramas de erro. O LED é
    /// atualizado em todos os casos (verde = ok, amarelo = erro).
    pub fn respond(&self, telegram: &Telegram) -> Vec<u8> {
        match self.process(telegram) {
            Ok(response) => {
                self.indicate(StatusColor::Green);
                response
            }
            Err(e) => {
                debug!("Telegrama {:02X?} rejeitado: {e}", telegram.as_bytes());
                self.indicate(StatusColor::Yellow);
                error_frame(e.code())
            }
        }
    }

    fn process(&self, telegram: &Telegram) -> Result<Vec<u8>, TelegramError> {
        telegram.verify()?;

        match telegram.command_id() {
            SELECT_CHANNEL => self.select_channel(telegram),
            GET_CHANNEL_STATUS => self.channel_status(telegram),
            GET_FIRMWARE_VERSION => Ok(seal(&[
                GET_FIRMWARE_VERSION,
                self.firmware.major,
                self.firmware.minor,
            ])),
            other => Err(TelegramError::UnknownCommand(other)),
        }
    }

    /// Nibble alto = lado (0 master, 1 slave), nibble baixo = canal 0..=8.
    fn select_channel(&self, telegram: &Telegram) -> Result<Vec<u8>, TelegramError> {
        let payload = telegram.payload()[0];
        let invalid = || TelegramError::InvalidPayload {
            command: SELECT_CHANNEL,
            payload,
        };

        let side = match payload >> 4 {
            0 => Side::Master,
            1 => Side::Slave,
            _ => return Err(invalid()),
        };
        let channel = payload & 0x0F;
        if channel > CHANNELS_PER_SIDE {
            return Err(invalid());
        }

        if let Err(e) = self.hardware.select_channel(side, channel) {
            warn!("Falha ao selecionar canal {channel} ({side}): {e}");
        }

        // Payload inalterado: o CRC recebido continua válido.
        Ok(telegram.as_bytes().to_vec())
    }

    fn channel_status(&self, telegram: &Telegram) -> Result<Vec<u8>, TelegramError> {
        let payload = telegram.payload()[0];
        let side = match payload {
            0 => Side::Master,
            1 => Side::Slave,
            _ => {
                return Err(TelegramError::InvalidPayload {
                    command: GET_CHANNEL_STATUS,
                    payload,
                })
            }
        };

        let register = self.hardware.read_output_register(side).map_err(|source| {
            warn!("Falha ao ler registrador de saída ({side}): {source}");
            TelegramError::HardwareUnavailable { side, source }
        })?;

        Ok(seal(&[GET_CHANNEL_STATUS, register]))
    }

    fn indicate(&self, color: StatusColor) {
        if let Err(e) = self.hardware.set_status_indicator(color) {
            warn!("Falha ao ajustar LED ({color:?}): {e}");
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
