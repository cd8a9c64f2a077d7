//! Line-delimited TCP transport for direct calls.
//!
//! One task owns the socket. In server mode it accepts exactly one peer;
//! otherwise it connects out. Outgoing lines are queued through an mpsc
//! channel and dropping the [`TcpChannel`] ends the task without a `Closed`
//! event.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::params::DirectEndpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpEvent {
    Connected { is_server: bool },
    Message(String),
    Error(String),
    Closed,
}

pub struct TcpChannel {
    outgoing: mpsc::UnboundedSender<String>,
}

impl TcpChannel {
    /// Start the socket task. Must be called within a tokio runtime.
    pub fn open(endpoint: DirectEndpoint) -> (Self, mpsc::UnboundedReceiver<TcpEvent>) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let worker = TcpWorker {
            events: events_tx,
            errored: false,
        };
        tokio::spawn(worker.run(endpoint, outgoing_rx));
        (Self { outgoing }, events)
    }

    /// Queue one message; the worker appends the line terminator.
    pub fn send(&self, message: &str) {
        if self.outgoing.send(message.to_string()).is_err() {
            tracing::warn!("TCP worker has stopped, dropping: {message}");
        }
    }
}

struct TcpWorker {
    events: mpsc::UnboundedSender<TcpEvent>,
    errored: bool,
}

impl TcpWorker {
    async fn run(mut self, endpoint: DirectEndpoint, mut outgoing: mpsc::UnboundedReceiver<String>) {
        let is_server = endpoint.is_server();
        let Some(stream) = self.establish(endpoint, &mut outgoing).await else {
            return;
        };
        tracing::info!("TCP connection established, server: {is_server}");
        self.emit(TcpEvent::Connected { is_server });

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        tracing::debug!("TCP->C: {line}");
                        self.emit(TcpEvent::Message(line));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        self.report_error(format!("Failed to receive from rawSocket: {e}"));
                        break;
                    }
                },
                message = outgoing.recv() => match message {
                    Some(message) => {
                        tracing::debug!("C->TCP: {message}");
                        let line = format!("{message}\n");
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            self.report_error(format!("Failed to send: {e}"));
                        }
                    }
                    None => {
                        tracing::debug!("TCP channel dropped locally");
                        return;
                    }
                },
            }
        }

        tracing::info!("TCP connection closed");
        self.emit(TcpEvent::Closed);
    }

    async fn establish(
        &mut self,
        endpoint: DirectEndpoint,
        outgoing: &mut mpsc::UnboundedReceiver<String>,
    ) -> Option<TcpStream> {
        let addr = SocketAddr::new(endpoint.ip, endpoint.port);

        let listener = if endpoint.is_server() {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    tracing::info!("listening for TCP peer on {addr}");
                    Some(listener)
                }
                Err(e) => {
                    self.report_error(format!("Failed to open server socket: {e}"));
                    return None;
                }
            }
        } else {
            None
        };

        loop {
            let attempt = async {
                match &listener {
                    Some(listener) => listener
                        .accept()
                        .await
                        .map(|(stream, peer)| {
                            tracing::info!("TCP peer connected from {peer}");
                            stream
                        })
                        .map_err(|e| format!("Failed to receive from rawSocket: {e}")),
                    None => TcpStream::connect(addr)
                        .await
                        .map_err(|e| format!("Failed to connect: {e}")),
                }
            };
            tokio::select! {
                result = attempt => match result {
                    Ok(stream) => return Some(stream),
                    Err(description) => {
                        self.report_error(description);
                        return None;
                    }
                },
                message = outgoing.recv() => match message {
                    Some(message) => {
                        tracing::error!("dropping message sent before connect: {message}");
                        self.report_error("Sending data on closed socket.".to_string());
                    }
                    None => return None,
                },
            }
        }
    }

    fn emit(&self, event: TcpEvent) {
        let _ = self.events.send(event);
    }

    fn report_error(&mut self, description: String) {
        tracing::error!("TCP error: {description}");
        if !self.errored {
            self.errored = true;
            self.emit(TcpEvent::Error(description));
        }
    }
}
