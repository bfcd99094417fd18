//! Listener TCP genérico: thread de accept + uma thread por conexão.
//!
//! Cada listener tem seu próprio flag de parada. `shutdown` fecha o socket
//! de escuta e pede às conexões abertas que parem na próxima volta do loop
//! de leitura (a mensagem em andamento é concluída antes).

use crossbeam_channel::Sender;
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timeout de leitura usado só para observar o flag de parada.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Falhas que encerram um listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Falha ao fazer bind em {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Falha no accept: {0}")]
    Accept(#[source] io::Error),

    #[error("Falha ao criar thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Flag de parada compartilhado entre o listener e suas conexões.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Tratamento de uma conexão aceita.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr, stop: &StopSignal) -> io::Result<()>;
}

/// Aviso enviado ao supervisor quando um listener termina.
#[derive(Debug)]
pub struct ListenerExit {
    pub name: &'static str,
    /// `None` quando o listener parou a pedido.
    pub error: Option<String>,
}

/// Socket de escuta já ligado, ainda sem thread de accept.
pub struct Listener {
    name: &'static str,
    socket: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub fn bind(name: &'static str, addr: &str) -> Result<Self, ServerError> {
        let bind_err = |source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };
        let socket = TcpListener::bind(addr).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        Ok(Self {
            name,
            socket,
            local_addr,
        })
    }

    /// Inicia a thread de accept. `exits` recebe o resultado quando ela termina.
    pub fn serve<H: ConnectionHandler>(
        self,
        handler: Arc<H>,
        exits: Option<Sender<ListenerExit>>,
    ) -> Result<ServerHandle, ServerError> {
        let stop = StopSignal::default();
        let name = self.name;
        let local_addr = self.local_addr;
        let loop_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name(format!("{name}-listener"))
            .spawn(move || {
                let result = accept_loop(name, &self.socket, handler, &loop_stop);
                if let Err(e) = &result {
                    error!("Listener {name} encerrado: {e}");
                }
                if let Some(tx) = exits {
                    let _ = tx.send(ListenerExit {
                        name,
                        error: result.as_ref().err().map(ToString::to_string),
                    });
                }
                result
            })
            .map_err(ServerError::Spawn)?;

        info!("{name} escutando em {local_addr}");
        Ok(ServerHandle {
            name,
            local_addr,
            stop,
            thread,
        })
    }
}

fn accept_loop<H: ConnectionHandler>(
    name: &'static str,
    socket: &TcpListener,
    handler: Arc<H>,
    stop: &StopSignal,
) -> Result<(), ServerError> {
    loop {
        let accepted = socket.accept();
        if stop.is_stopped() {
            debug!("{name}: parada solicitada");
            return Ok(());
        }

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ServerError::Accept(e)),
        };

        info!("{name}: cliente conectado de {peer}");
        let handler = Arc::clone(&handler);
        let conn_stop = stop.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{name}-{peer}"))
            .spawn(move || {
                if let Err(e) = stream.set_read_timeout(Some(POLL_INTERVAL)) {
                    warn!("{name}: timeout de leitura indisponível para {peer}: {e}");
                }
                if let Err(e) = handler.handle(stream, peer, &conn_stop) {
                    warn!("{name}: erro na conexão {peer}: {e}");
                }
                info!("{name}: cliente {peer} desconectado");
            });
        if let Err(e) = spawned {
            // Só esta conexão é perdida; o listener continua.
            error!("{name}: não foi possível atender {peer}: {e}");
        }
    }
}

/// Handle de um listener em execução.
pub struct ServerHandle {
    name: &'static str,
    local_addr: SocketAddr,
    stop: StopSignal,
    thread: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Para o listener e aguarda a thread de accept.
    pub fn shutdown(self) -> Result<(), ServerError> {
        self.stop.stop();

        // Acorda o accept bloqueante com uma conexão local.
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        match TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            Ok(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Err(e) => debug!("{}: conexão de wake-up falhou: {e}", self.name),
        }

        match self.thread.join() {
            Ok(result) => {
                info!("{} parado", self.name);
                result
            }
            Err(_) => Err(ServerError::Accept(io::Error::other(
                "thread do listener entrou em pânico",
            ))),
        }
    }
}

/// `true` para os erros de leitura que só indicam timeout.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
