//! Conexões da porta de telegramas (3363).

use crate::server::{ConnectionHandler, StopSignal, is_timeout};
use canmux_core::telegram::{Deframer, TelegramEngine};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::debug;

/// Uma instância compartilhada; o estado de parsing é criado por conexão.
pub struct TelegramHandler {
    engine: TelegramEngine,
}

impl TelegramHandler {
    pub fn new(engine: TelegramEngine) -> Self {
        Self { engine }
    }
}

impl ConnectionHandler for TelegramHandler {
    fn handle(&self, mut stream: TcpStream, peer: SocketAddr, stop: &StopSignal) -> io::Result<()> {
        let mut deframer = Deframer::new();
        let mut buf = [0u8; 1024];

        while !stop.is_stopped() {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if is_timeout(e) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            for telegram in deframer.feed(&buf[..n]) {
                let response = self.engine.respond(&telegram);
                debug!("{peer}: {:02X?} → {response:02X?}", telegram.as_bytes());
                stream.write_all(&response)?;
            }
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Listener;
    use canmux_core::hardware::{Side, SimulatedHardware, StatusColor};
    use canmux_core::telegram::*;
    use canmux_core::{ChannelHardware, FIRMWARE_VERSION};
    use std::sync::Arc;
    use std::time::Duration;

    fn start(hw: Arc<SimulatedHardware>) -> crate::server::ServerHandle {
        let engine = TelegramEngine::new(hw, FIRMWARE_VERSION);
        Listener::bind("telegram", "127.0.0.1:0")
            .unwrap()
            .serve(Arc::new(TelegramHandler::new(engine)), None)
            .unwrap()
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let s = TcpStream::connect(addr).unwrap();
        s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        s
    }

    fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        stream.read_exact(&mut out).unwrap();
        out
    }

    #[test]
    fn select_then_status_over_tcp() {
        let hw = Arc::new(SimulatedHardware::new());
        let server = start(hw.clone());
        let mut client = connect(server.local_addr());

        let select = seal(&[SELECT_CHANNEL, 0x07]);
        client.write_all(&select).unwrap();
        assert_eq!(read_n(&mut client, 6), select);

        client.write_all(&seal(&[GET_CHANNEL_STATUS, 0])).unwrap();
        assert_eq!(read_n(&mut client, 6), seal(&[GET_CHANNEL_STATUS, 0b0100_0000]));
        assert_eq!(hw.read_output_register(Side::Master).unwrap(), 0b0100_0000);
        assert_eq!(hw.status(), StatusColor::Green);

        drop(client);
        server.shutdown().unwrap();
    }

    #[test]
    fn bad_telegram_keeps_connection_open() {
        let server = start(Arc::new(SimulatedHardware::new()));
        let mut client = connect(server.local_addr());

        let mut corrupted = seal(&[SELECT_CHANNEL, 0x01]);
        corrupted[5] ^= 0x80;
        client.write_all(&corrupted).unwrap();
        assert_eq!(read_n(&mut client, 6), error_frame(ERROR_CHECKSUM_NOK));

        // Telegrama enviado byte a byte na mesma conexão.
        for b in seal(&[GET_FIRMWARE_VERSION]) {
            client.write_all(&[b]).unwrap();
        }
        assert_eq!(read_n(&mut client, 7), seal(&[GET_FIRMWARE_VERSION, 1, 4]));

        drop(client);
        server.shutdown().unwrap();
    }

    #[test]
    fn connections_are_independent() {
        let server = start(Arc::new(SimulatedHardware::new()));
        let mut a = connect(server.local_addr());
        let mut b = connect(server.local_addr());

        // `a` deixa um telegrama pela metade; `b` não é afetado.
        a.write_all(&[SELECT_CHANNEL, 0x02]).unwrap();
        b.write_all(&seal(&[GET_FIRMWARE_VERSION])).unwrap();
        assert_eq!(read_n(&mut b, 7), seal(&[GET_FIRMWARE_VERSION, 1, 4]));

        let rest = seal(&[SELECT_CHANNEL, 0x02]);
        a.write_all(&rest[2..]).unwrap();
        assert_eq!(read_n(&mut a, 6), rest);

        drop((a, b));
        server.shutdown().unwrap();
    }

    #[test]
    fn shutdown_stops_open_connections() {
        let server = start(Arc::new(SimulatedHardware::new()));
        let mut client = connect(server.local_addr());
        client.write_all(&seal(&[GET_FIRMWARE_VERSION])).unwrap();
        read_n(&mut client, 7);

        server.shutdown().unwrap();

        // A conexão é fechada pelo servidor após a parada.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
