//! TCP server: accept loop, worker pool, frame dispatch.

pub mod pool;
pub mod session;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use tracing::{error, info};

use crate::error::Result;
use crate::tbm::TableManager;
use crate::transport::{Frame, Transport};

use pool::WorkerPool;
use session::Session;

pub const DEFAULT_PORT: u16 = 9999;

const POOL_WORKERS: usize = 10;
const POOL_QUEUE: usize = 100;

pub struct Server {
    listener: TcpListener,
    tbm: Arc<TableManager>,
}

impl Server {
    pub fn bind(port: u16, tbm: Arc<TableManager>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(Self { listener, tbm })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, one session per connection.
    pub fn serve(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, "server listening");

        let pool = WorkerPool::new(POOL_WORKERS, POOL_QUEUE);
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let tbm = Arc::clone(&self.tbm);
                    pool.execute(move || handle_connection(stream, tbm));
                }
                Err(err) => error!(%err, "accept failed"),
            }
        }
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, tbm: Arc<TableManager>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".into());
    info!(%peer, "connection established");

    let mut transport = match Transport::new(stream) {
        Ok(transport) => transport,
        Err(err) => {
            error!(%peer, %err, "transport setup failed");
            return;
        }
    };

    let mut session = Session::new(tbm);
    loop {
        let statement = match transport.receive() {
            Ok(Some(Frame::Data(statement))) => statement,
            // EOF or an error frame from a client closes the session.
            Ok(Some(Frame::Err(_))) | Ok(None) => break,
            Err(err) => {
                let _ = transport.send(&Frame::Err(err.to_string()));
                continue;
            }
        };

        let reply = match session.execute(&statement) {
            Ok(result) => Frame::Data(result),
            Err(err) => Frame::Err(err.to_string()),
        };
        if transport.send(&reply).is_err() {
            break;
        }
    }

    session.close();
    info!(%peer, "connection closed");
}
