//! TCP task client.
//!
//! One persistent connection per client; requests go out sequentially and
//! each reply is matched by construction (one in flight at a time, ids still
//! attached for cross-checking). The submit surface mirrors the local pool:
//! callers get a [`TaskHandle`] either way and need not care where the work
//! runs.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::error::{Error, Result, TaskError};
use crate::net::protocol::{read_message, write_message, Message, MessageType};
use crate::task::TaskHandle;

/// Client for a remote [`TaskServer`](crate::net::server::TaskServer).
pub struct TaskClient {
    stream: TcpStream,
    next_id: AtomicU32,
}

impl TaskClient {
    /// Connect to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        debug!(peer = %stream.peer_addr()?, "connected");
        Ok(Self {
            stream,
            next_id: AtomicU32::new(1),
        })
    }

    /// Submit a task payload and return a handle to its result.
    ///
    /// The exchange is synchronous on the connection, so the handle is
    /// already resolved when this returns: with the RESPONSE payload, or
    /// with a [`TaskError`] carrying the server's ERROR text.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the connection drops, [`Error::Protocol`] when the
    /// server replies with an unexpected frame kind.
    pub fn submit(&mut self, payload: impl Into<Vec<u8>>) -> Result<TaskHandle<Vec<u8>>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Message::new(MessageType::Request, id, payload);
        write_message(&mut self.stream, &request)?;

        let reply = read_message(&mut self.stream)?;
        let (handle, completion) = TaskHandle::new();
        match reply.kind {
            MessageType::Response => completion.complete(Ok(reply.payload)),
            MessageType::Error => {
                completion.complete(Err(TaskError::new(reply.payload_str())));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected RESPONSE or ERROR, got {other:?}"
                )))
            }
        }
        Ok(handle)
    }

    /// Close the connection in both directions.
    ///
    /// Subsequent submits fail with an I/O error. Dropping the client closes
    /// the socket too; this is for callers that want the close to be
    /// explicit and checked.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both)?;
        debug!("disconnected");
        Ok(())
    }

    /// Liveness check: true when the server answers PING with PONG.
    pub fn ping(&mut self) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ping = Message::new(MessageType::Ping, id, Vec::new());
        if write_message(&mut self.stream, &ping).is_err() {
            return false;
        }
        match read_message(&mut self.stream) {
            Ok(reply) => reply.kind == MessageType::Pong,
            Err(_) => false,
        }
    }
}
