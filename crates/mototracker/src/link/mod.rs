//! Device link listener.
//!
//! The sensor device connects over a stream socket and writes JSON frames.
//! One peer is served at a time: a newly accepted connection replaces the
//! current one. Every frame handed to the ingest channel is acknowledged
//! with [`ACK`]. When the active peer disconnects or fails, [`DeviceLink::run`]
//! returns and the hosting service stops; there is no reconnect loop.

mod framing;

pub use framing::{Framer, JsonFramer};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{Error, Result};

/// Reply written to the device after each accepted frame.
pub const ACK: &str = "Confirmado";

/// One frame of text received from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Raw frame text.
    pub text: String,
    /// Device that sent it.
    pub peer: SocketAddr,
    /// When the frame was read.
    pub received_at: DateTime<Utc>,
}

/// Why the link stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkExit {
    /// Stop was requested through a [`LinkHandle`].
    Stopped,
    /// The device closed the connection.
    PeerClosed(SocketAddr),
    /// Reading from or writing to the device failed.
    PeerFailed {
        /// The device.
        peer: SocketAddr,
        /// What went wrong.
        message: String,
    },
    /// The listener could not accept connections.
    AcceptFailed(String),
    /// The ingest side of the channel went away.
    IngestClosed,
}

impl fmt::Display for LinkExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::PeerClosed(peer) => write!(f, "device {peer} disconnected"),
            Self::PeerFailed { peer, message } => write!(f, "device {peer} failed: {message}"),
            Self::AcceptFailed(message) => write!(f, "accept failed: {message}"),
            Self::IngestClosed => write!(f, "ingest channel closed"),
        }
    }
}

/// A cloneable handle to stop a running link from another task.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    stop_signal: Arc<watch::Sender<bool>>,
}

impl LinkHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            stop_signal: Arc::new(tx),
        }
    }

    /// Signal the link to stop.
    pub fn stop(&self) {
        self.stop_signal.send_replace(true);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        *self.stop_signal.borrow()
    }

    /// Resolve once the stop signal has been sent.
    pub async fn stopped(&self) {
        let mut rx = self.stop_signal.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for LinkHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The bound device listener.
#[derive(Debug)]
pub struct DeviceLink {
    listener: TcpListener,
    config: LinkConfig,
}

impl DeviceLink {
    /// Open the listening endpoint at `config.bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LinkBind`] if the address cannot be bound.
    pub async fn bind(config: &LinkConfig) -> Result<Self> {
        let listener =
            TcpListener::bind(&config.bind_addr)
                .await
                .map_err(|source| Error::LinkBind {
                    addr: config.bind_addr.clone(),
                    source,
                })?;
        info!(addr = %config.bind_addr, "Device link listening");
        Ok(Self {
            listener,
            config: config.clone(),
        })
    }

    /// The address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve devices until the active peer goes away or a stop is requested.
    pub async fn run(self, sender: mpsc::Sender<InboundFrame>, handle: LinkHandle) -> LinkExit {
        let mut current: Option<(SocketAddr, JoinHandle<LinkExit>)> = None;

        let exit = loop {
            if handle.should_stop() {
                break LinkExit::Stopped;
            }

            tokio::select! {
                () = handle.stopped() => break LinkExit::Stopped,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Some((old_peer, task)) = current.take() {
                            info!(old = %old_peer, new = %peer, "Replacing device connection");
                            task.abort();
                        } else {
                            info!(%peer, "Device connected");
                        }
                        let framer = Framer::from_config(&self.config);
                        let task = tokio::spawn(serve_peer(
                            stream,
                            peer,
                            framer,
                            self.config.read_buffer_bytes,
                            sender.clone(),
                        ));
                        current = Some((peer, task));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept device connection");
                        break LinkExit::AcceptFailed(e.to_string());
                    }
                },

                finished = wait_for_peer(&mut current) => {
                    current = None;
                    break finished;
                }
            }
        };

        if let Some((_, task)) = current.take() {
            task.abort();
        }
        info!(reason = %exit, "Device link closed");
        exit
    }
}

async fn wait_for_peer(current: &mut Option<(SocketAddr, JoinHandle<LinkExit>)>) -> LinkExit {
    match current {
        Some((peer, task)) => match task.await {
            Ok(exit) => exit,
            Err(e) => LinkExit::PeerFailed {
                peer: *peer,
                message: e.to_string(),
            },
        },
        None => std::future::pending().await,
    }
}

async fn serve_peer(
    stream: TcpStream,
    peer: SocketAddr,
    mut framer: Framer,
    buffer_bytes: usize,
    sender: mpsc::Sender<InboundFrame>,
) -> LinkExit {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; buffer_bytes];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(%peer, "Device closed connection");
                return LinkExit::PeerClosed(peer);
            }
            Ok(n) => n,
            Err(e) => {
                warn!(%peer, error = %e, "Failed to read from device");
                return LinkExit::PeerFailed {
                    peer,
                    message: e.to_string(),
                };
            }
        };

        for text in framer.push(&buf[..n]) {
            let frame = InboundFrame {
                text,
                peer,
                received_at: Utc::now(),
            };
            if sender.send(frame).await.is_err() {
                debug!("Ingest channel closed, stopping link");
                return LinkExit::IngestClosed;
            }
            if let Err(e) = writer.write_all(ACK.as_bytes()).await {
                warn!(%peer, error = %e, "Failed to acknowledge frame");
                return LinkExit::PeerFailed {
                    peer,
                    message: e.to_string(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const FRAME: &str = r#"{"timestamp":1,"location":{"lat":1,"lng":2},"sensors":{"accel":{"x":0,"y":0,"z":0},"gyro":{"x":0,"y":0,"z":0},"speed":0}}"#;

    fn test_config() -> LinkConfig {
        LinkConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..LinkConfig::default()
        }
    }

    async fn start_link(
        config: LinkConfig,
    ) -> (
        SocketAddr,
        mpsc::Receiver<InboundFrame>,
        LinkHandle,
        JoinHandle<LinkExit>,
    ) {
        let link = DeviceLink::bind(&config).await.unwrap();
        let addr = link.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let handle = LinkHandle::new();
        let task = tokio::spawn(link.run(tx, handle.clone()));
        (addr, rx, handle, task)
    }

    async fn read_ack(stream: &mut TcpStream) -> String {
        let mut buf = [0u8; ACK.len()];
        stream.read_exact(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[test]
    fn test_link_handle_stop() {
        let handle = LinkHandle::new();
        let clone = handle.clone();
        assert!(!handle.should_stop());

        clone.stop();
        assert!(handle.should_stop());
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = LinkConfig {
            bind_addr: "not-an-address".to_string(),
            ..LinkConfig::default()
        };
        let err = DeviceLink::bind(&config).await.unwrap_err();
        assert!(matches!(err, Error::LinkBind { .. }));
    }

    #[tokio::test]
    async fn test_frames_are_forwarded_and_acknowledged() {
        let (addr, mut rx, _handle, task) = start_link(test_config()).await;

        let mut device = TcpStream::connect(addr).await.unwrap();
        device.write_all(FRAME.as_bytes()).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.text, FRAME);
        assert_eq!(read_ack(&mut device).await, ACK);

        drop(device);
        let exit = task.await.unwrap();
        assert!(matches!(exit, LinkExit::PeerClosed(_)));
    }

    #[tokio::test]
    async fn test_split_frame_is_reassembled() {
        let (addr, mut rx, handle, task) = start_link(test_config()).await;

        let mut device = TcpStream::connect(addr).await.unwrap();
        let (a, b) = FRAME.split_at(30);
        device.write_all(a.as_bytes()).await.unwrap();
        device.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        device.write_all(b.as_bytes()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().text, FRAME);

        handle.stop();
        assert_eq!(task.await.unwrap(), LinkExit::Stopped);
    }

    #[tokio::test]
    async fn test_new_connection_replaces_current() {
        let (addr, mut rx, handle, task) = start_link(test_config()).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"{\"n\":1}").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "{\"n\":1}");

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"{\"n\":2}").await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.text, "{\"n\":2}");
        assert_eq!(frame.peer, second.local_addr().unwrap());

        // The replaced connection no longer ends the link.
        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        handle.stop();
        assert_eq!(task.await.unwrap(), LinkExit::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_any_peer() {
        let (_addr, _rx, handle, task) = start_link(test_config()).await;
        handle.stop();
        assert_eq!(task.await.unwrap(), LinkExit::Stopped);
    }

    #[tokio::test]
    async fn test_ingest_closed_stops_link() {
        let (addr, rx, _handle, task) = start_link(test_config()).await;
        drop(rx);

        let mut device = TcpStream::connect(addr).await.unwrap();
        device.write_all(FRAME.as_bytes()).await.unwrap();

        assert_eq!(task.await.unwrap(), LinkExit::IngestClosed);
    }
}
