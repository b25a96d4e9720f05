//! Reconnecting client of the alert stream.
//!
//! The connection tries each streaming host in order, frames the received
//! bytes into alert messages, persists each raw message and hands the parsed
//! alert to the processor intake. Any transport error closes the connection
//! and a new one is attempted after a pause; nothing here is ever fatal.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{
    io::AsyncReadExt,
    net::{TcpStream, UdpSocket},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    cap::Alert,
    config::{Feed, Transport},
    feed::{FeedLink, FrameBuffer},
    processor::IntakeQueue,
};

/// Size of a single socket read.
const READ_SIZE: usize = 4096;
/// Time allowed to establish a TCP connection to one host.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Port used when a streaming host does not name one.
const DEFAULT_PORT: u16 = 80;

/// Errors ending a feed connection.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by remote end ({0})")]
    Closed(String),
    #[error("connection reset")]
    Reset,
}

/// Pauses between connection attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Between two hosts of the list
    pub between_hosts: Duration,
    /// After every host of the list failed
    pub after_list: Duration,
    /// After an established connection failed
    pub after_error: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            between_hosts: Duration::from_secs(1),
            after_list: Duration::from_secs(20),
            after_error: Duration::from_secs(5),
        }
    }
}

enum FeedSocket {
    Tcp { stream: TcpStream, peer: String },
    Udp(UdpSocket),
}

impl FeedSocket {
    /// Reads the next chunk of the stream.
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, FeedError> {
        match self {
            FeedSocket::Tcp { stream, peer } => match stream.read(buffer).await? {
                0 => Err(FeedError::Closed(peer.clone())),
                read => Ok(read),
            },
            FeedSocket::Udp(socket) => Ok(socket.recv(buffer).await?),
        }
    }
}

/// The alert stream client.
pub struct FeedConnection {
    transport: Transport,
    hosts: Vec<String>,
    udp_bind: String,
    alerts_dir: PathBuf,
    backoff: Backoff,
    link: Arc<FeedLink>,
    intake: Arc<IntakeQueue>,
}

impl FeedConnection {
    /// Create a new [FeedConnection].
    ///
    /// # Arguments
    ///
    /// * `feed` - Transport and hosts of the stream
    /// * `alerts_dir` - Directory receiving the raw XML of every message
    /// * `link` - Connection handle shared with the watchdog
    /// * `intake` - Queue receiving the parsed alerts
    pub fn new(
        feed: &Feed,
        alerts_dir: impl Into<PathBuf>,
        link: Arc<FeedLink>,
        intake: Arc<IntakeQueue>,
    ) -> Self {
        FeedConnection {
            transport: feed.transport,
            hosts: feed.streaming_hosts.clone(),
            udp_bind: feed.udp_bind.clone(),
            alerts_dir: alerts_dir.into(),
            backoff: Backoff::default(),
            link,
            intake,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs until `cancel` is triggered, reconnecting after every failure.
    pub async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let Some(socket) = self.connect(&cancel).await else {
                if !pause(self.backoff.after_list, &cancel).await {
                    break;
                }
                continue;
            };

            let connection = self.link.open();
            match self.read_frames(socket, &connection, &cancel).await {
                Ok(()) => debug!("alert feed stopped"),
                Err(e) => error!("alert feed error: {}", e),
            }
            self.link.close();

            if !pause(self.backoff.after_error, &cancel).await {
                break;
            }
        }
        info!("alert feed connection stopped");
    }

    async fn connect(&self, cancel: &CancellationToken) -> Option<FeedSocket> {
        match self.transport {
            Transport::Udp => match UdpSocket::bind(&self.udp_bind).await {
                Ok(socket) => {
                    info!("listening for alerts on udp {}", self.udp_bind);
                    Some(FeedSocket::Udp(socket))
                }
                Err(e) => {
                    error!("error binding alert socket {}: {}", self.udp_bind, e);
                    None
                }
            },
            Transport::Tcp => {
                for host in &self.hosts {
                    let address = socket_address(host);
                    match timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
                        Ok(Ok(stream)) => {
                            info!("connected to alert broadcaster at {}", address);
                            return Some(FeedSocket::Tcp {
                                stream,
                                peer: address,
                            });
                        }
                        Ok(Err(e)) => {
                            error!("error connecting to alert broadcaster at {}: {}", address, e)
                        }
                        Err(_) => error!("timeout connecting to alert broadcaster at {}", address),
                    }

                    if !pause(self.backoff.between_hosts, cancel).await {
                        return None;
                    }
                }
                None
            }
        }
    }

    async fn read_frames(
        &self,
        mut socket: FeedSocket,
        connection: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<(), FeedError> {
        let mut framer = FrameBuffer::new();
        let mut buffer = [0u8; READ_SIZE];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = connection.cancelled() => return Err(FeedError::Reset),
                read = socket.receive(&mut buffer) => read?,
            };

            framer.extend(&buffer[..read]);
            while let Some(frame) = framer.next_frame() {
                self.link.mark_received();
                self.handle_frame(&frame).await;
            }
        }
    }

    /// Parses one frame, persists it and queues the alert.
    async fn handle_frame(&self, frame: &[u8]) {
        let alert = match Alert::parse(frame) {
            Ok(alert) => alert,
            Err(e) => {
                error!("error parsing alert from feed: {}", e);
                return;
            }
        };
        debug!("received alert {} ({})", alert.identifier, alert.sent);

        let path = self.alerts_dir.join(format!("{}.xml", alert.reference()));
        if let Err(e) = persist(&path, frame).await {
            warn!("error saving alert {}: {}", path.display(), e);
        }

        self.intake.push(alert);
    }
}

/// Turns a configured host (`host:port`, optionally with a scheme) into a
/// socket address.
///
/// # Examples
///
/// ```
/// # use alertcast::feed::socket_address;
/// assert_eq!(socket_address("http://streaming1.example.com:8080/"), "streaming1.example.com:8080");
/// assert_eq!(socket_address("streaming1.example.com"), "streaming1.example.com:80");
/// ```
pub fn socket_address(host: &str) -> String {
    let host = host.trim();
    let host = host.split_once("://").map_or(host, |(_, rest)| rest);
    let host = host.trim_end_matches('/');
    if host.contains(':') {
        host.to_owned()
    } else {
        format!("{}:{}", host, DEFAULT_PORT)
    }
}

async fn persist(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, data).await
}

/// Sleeps for `duration`; returns `false` if cancelled meanwhile.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncWriteExt, net::TcpListener};

    use super::*;
    use crate::cap::AlertXml;

    fn feed(hosts: Vec<String>) -> Feed {
        Feed {
            streaming_hosts: hosts,
            ..Default::default()
        }
    }

    fn fast_backoff() -> Backoff {
        Backoff {
            between_hosts: Duration::from_millis(10),
            after_list: Duration::from_millis(10),
            after_error: Duration::from_millis(10),
        }
    }

    async fn wait_for(intake: &IntakeQueue, count: usize) {
        timeout(Duration::from_secs(10), async {
            while intake.len() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_socket_address() {
        assert_eq!(socket_address("tcp://127.0.0.1:9000"), "127.0.0.1:9000");
        assert_eq!(socket_address(" host:1 "), "host:1");
        assert_eq!(socket_address("host"), "host:80");
    }

    #[tokio::test]
    async fn test_frames_are_queued_in_order_and_persisted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let first = AlertXml::new("A1").xml();
        let second = AlertXml::new("A2").xml();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let stream = format!("junk{}\n{}", first, second);
            for chunk in stream.as_bytes().chunks(100) {
                socket.write_all(chunk).await.unwrap();
            }
            socket.flush().await.unwrap();
            // keep the connection open until the client is done
            sleep(Duration::from_secs(5)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let link = Arc::new(FeedLink::new());
        let intake = Arc::new(IntakeQueue::new());
        let connection = FeedConnection::new(
            &feed(vec![address]),
            dir.path(),
            link.clone(),
            intake.clone(),
        );
        let cancel = CancellationToken::new();
        let client = {
            let cancel = cancel.clone();
            tokio::spawn(async move { connection.run(cancel).await })
        };

        wait_for(&intake, 2).await;
        assert!(link.is_open());
        assert!(link.last_received().is_some());

        let alerts: Vec<Alert> = std::iter::from_fn(|| intake.pop()).collect();
        assert_eq!(alerts[0].identifier, "A1");
        assert_eq!(alerts[1].identifier, "A2");
        assert!(dir
            .path()
            .join(format!("{}.xml", alerts[0].reference()))
            .exists());

        cancel.cancel();
        client.await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_reconnects_after_remote_close_and_skips_bad_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"<?xml version=\"1.0\"?><alert><broken></alert>")
                .await
                .unwrap();
            drop(socket);

            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(AlertXml::new("B1").xml().as_bytes())
                .await
                .unwrap();
            sleep(Duration::from_secs(5)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let intake = Arc::new(IntakeQueue::new());
        let connection = FeedConnection::new(
            &feed(vec!["127.0.0.1:1".to_owned(), address]),
            dir.path(),
            Arc::new(FeedLink::new()),
            intake.clone(),
        )
        .with_backoff(fast_backoff());
        let cancel = CancellationToken::new();
        let client = {
            let cancel = cancel.clone();
            tokio::spawn(async move { connection.run(cancel).await })
        };

        wait_for(&intake, 1).await;
        assert_eq!(intake.pop().unwrap().identifier, "B1");

        cancel.cancel();
        client.await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_watchdog_close_resets_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (_first, _) = listener.accept().await.unwrap();
            let (mut second, _) = listener.accept().await.unwrap();
            second
                .write_all(AlertXml::new("C1").xml().as_bytes())
                .await
                .unwrap();
            sleep(Duration::from_secs(5)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let link = Arc::new(FeedLink::new());
        let intake = Arc::new(IntakeQueue::new());
        let connection = FeedConnection::new(
            &feed(vec![address]),
            dir.path(),
            link.clone(),
            intake.clone(),
        )
        .with_backoff(fast_backoff());
        let cancel = CancellationToken::new();
        let client = {
            let cancel = cancel.clone();
            tokio::spawn(async move { connection.run(cancel).await })
        };

        timeout(Duration::from_secs(10), async {
            while !link.is_open() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(link.close());

        wait_for(&intake, 1).await;
        assert_eq!(intake.pop().unwrap().identifier, "C1");

        cancel.cancel();
        client.await.unwrap();
        server.abort();
    }
}
