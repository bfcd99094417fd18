//! Conexões da porta de configuração (3364): JSON delimitado por `\n`.

use crate::server::{ConnectionHandler, StopSignal, is_timeout};
use canmux_core::config_protocol::{ConfigResponse, ConfigService};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::debug;

pub struct ConfigHandler {
    service: ConfigService,
}

impl ConfigHandler {
    pub fn new(service: ConfigService) -> Self {
        Self { service }
    }

    fn respond(&self, raw: &[u8]) -> ConfigResponse {
        match std::str::from_utf8(raw) {
            Ok(line) => self.service.handle_line(line),
            Err(_) => ConfigResponse::error("Invalid JSON message"),
        }
    }
}

impl ConnectionHandler for ConfigHandler {
    fn handle(&self, mut stream: TcpStream, peer: SocketAddr, stop: &StopSignal) -> io::Result<()> {
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];

        while !stop.is_stopped() {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if is_timeout(e) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            pending.extend_from_slice(&buf[..n]);

            // Linhas completas; o resto fica para a próxima leitura.
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = &raw[..pos];
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let reply = self.respond(line).to_line();
                debug!("{peer}: {}", reply.trim_end());
                stream.write_all(reply.as_bytes())?;
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
    use canmux_core::{FIRMWARE_VERSION, SettingsStore};
    use serde_json::{Value, json};
    use std::io::{BufRead, BufReader};
    use std::sync::Arc;
    use std::time::Duration;

    struct Client {
        writer: TcpStream,
        reader: BufReader<TcpStream>,
    }

    impl Client {
        fn connect(addr: SocketAddr) -> Self {
            let writer = TcpStream::connect(addr).unwrap();
            writer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let reader = BufReader::new(writer.try_clone().unwrap());
            Self { writer, reader }
        }

        fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).unwrap();
        }

        fn recv(&mut self) -> Value {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            assert!(line.ends_with('\n'));
            serde_json::from_str(&line).unwrap()
        }

        fn request(&mut self, request: Value) -> Value {
            self.send_raw(format!("{request}\n").as_bytes());
            self.recv()
        }
    }

    fn start(store: Arc<SettingsStore>) -> crate::server::ServerHandle {
        let service = ConfigService::new(store, FIRMWARE_VERSION);
        Listener::bind("config", "127.0.0.1:0")
            .unwrap()
            .serve(Arc::new(ConfigHandler::new(service)), None)
            .unwrap()
    }

    #[test]
    fn update_then_get_over_tcp() {
        let store = Arc::new(SettingsStore::in_memory());
        let server = start(store.clone());
        let mut client = Client::connect(server.local_addr());

        let r = client.request(json!({"command": "update_config", "data": {"ip": "10.0.0.5"}}));
        assert_eq!(r["status"], "success");
        let r = client.request(json!({"command": "get_config", "data": {}}));
        assert_eq!(r["data"]["ip"], "10.0.0.5");
        assert_eq!(store.snapshot().ip, [10, 0, 0, 5]);

        drop(client);
        server.shutdown().unwrap();
    }

    #[test]
    fn partial_lines_and_batches() {
        let server = start(Arc::new(SettingsStore::in_memory()));
        let mut client = Client::connect(server.local_addr());

        client.send_raw(br#"{"command": "get_fi"#);
        std::thread::sleep(Duration::from_millis(50));
        client.send_raw(b"rmware\"}\n\n{\"command\": \"nope\"}\n");

        assert_eq!(client.recv()["data"]["version"], "1.4");
        assert_eq!(client.recv()["message"], "Unknown command: nope");

        drop(client);
        server.shutdown().unwrap();
    }

    #[test]
    fn invalid_json_keeps_connection_open() {
        let server = start(Arc::new(SettingsStore::in_memory()));
        let mut client = Client::connect(server.local_addr());

        client.send_raw(b"hello\n");
        assert_eq!(
            client.recv(),
            json!({"status": "error", "message": "Invalid JSON message"})
        );
        client.send_raw(&[0xFF, 0xFE, b'\n']);
        assert_eq!(client.recv()["message"], "Invalid JSON message");
        let r = client.request(json!({"command": "get_firmware"}));
        assert_eq!(r["status"], "success");

        drop(client);
        server.shutdown().unwrap();
    }

    #[test]
    fn concurrent_clients_update_distinct_fields() {
        let store = Arc::new(SettingsStore::in_memory());
        let server = start(store.clone());
        let addr = server.local_addr();

        let updates = [
            ("ip", "10.0.0.9"),
            ("subnet_mask", "255.255.255.128"),
            ("gateway", "10.0.0.1"),
            ("dns", "1.0.0.1"),
            ("mac", "02:00:00:00:00:09"),
        ];
        let workers: Vec<_> = updates
            .into_iter()
            .map(|(key, last)| {
                std::thread::spawn(move || {
                    let mut client = Client::connect(addr);
                    for i in 0..10 {
                        let value = if i == 9 {
                            last.to_string()
                        } else if key == "mac" {
                            format!("02:00:00:00:00:{i:02x}")
                        } else {
                            format!("10.0.{i}.{i}")
                        };
                        let request = json!({"command": "update_config", "data": {key: value}});
                        let r = client.request(request);
                        assert_eq!(r["status"], "success");
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let s = store.snapshot();
        assert_eq!(s.ip, [10, 0, 0, 9]);
        assert_eq!(s.subnet_mask, [255, 255, 255, 128]);
        assert_eq!(s.gateway, [10, 0, 0, 1]);
        assert_eq!(s.dns, [1, 0, 0, 1]);
        assert_eq!(s.mac, [2, 0, 0, 0, 0, 9]);

        server.shutdown().unwrap();
    }
}
