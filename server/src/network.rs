//! WebSocket transport
//!
//! Every accepted connection runs two tasks: a receive loop that feeds text
//! frames to the router, and a send loop that drains the connection's
//! outbound queue and pings the peer at a fixed interval. When the receive
//! loop ends, the connection is dropped from every room it joined (running
//! the topics' unsubscribe handlers) and removed from the roster.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::client_manager::ClientManager;
use crate::error::ServerResult;
use crate::router::Router;

/// Time the send loop gets to flush queued frames after its connection closes.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub ping_interval: Duration,
    pub max_clients: usize,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            ping_interval: Duration::from_secs(30),
            max_clients: 1024,
            send_queue: 256,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    clients: Arc<RwLock<ClientManager>>,
    ping_interval: Duration,
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

impl Server {
    pub async fn new(config: &ServerConfig, router: Arc<Router>) -> ServerResult<Self> {
        let listener = TcpListener::bind(&config.addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.send_queue,
            ))),
            ping_interval: config.ping_interval,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn clients(&self) -> Arc<RwLock<ClientManager>> {
        Arc::clone(&self.clients)
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> ServerResult<()> {
        info!("Server started successfully");
        loop {
            let (stream, addr) = self.listener.accept().await?;
            self.spawn_connection(stream, addr);
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let router = Arc::clone(&self.router);
        let clients = Arc::clone(&self.clients);
        let ping_interval = self.ping_interval;

        tokio::spawn(async move {
            handle_connection(stream, addr, router, clients, ping_interval).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: Arc<Router>,
    clients: Arc<RwLock<ClientManager>>,
    ping_interval: Duration,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let registered = {
        let mut manager = clients.write().await;
        manager.add_client(addr).ok_or(manager.max_clients())
    };
    let (client, outbound) = match registered {
        Ok(registered) => registered,
        Err(limit) => {
            warn!("Server full ({} clients), rejecting connection from {}", limit, addr);
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    };

    let mut send_task = spawn_sender(write, outbound, ping_interval, client.id);

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = router.handle_ws_message(&client, &text).await {
                    error!("Closing client {} after internal error: {}", client.id, e);
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                debug!("Ignoring binary frame from client {}", client.id);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Receive error from client {}: {}", client.id, e);
                break;
            }
        }
    }

    router.disconnect(&client).await;
    clients.write().await.remove_client(&client.id);

    // The send loop ends once the last queue handle is gone.
    drop(client);
    if timeout(SEND_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
}

fn spawn_sender(
    mut write: WsSink,
    mut outbound: mpsc::Receiver<String>,
    ping_interval: Duration,
    client_id: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);

        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            debug!("Failed to send to client {}: {}", client_id, e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = write.close().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio_tungstenite::connect_async;

    async fn start(max_clients: usize) -> (SocketAddr, Arc<RwLock<ClientManager>>) {
        let config = ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            max_clients,
            ..ServerConfig::default()
        };
        let server = Server::new(&config, Arc::new(Router::new())).await.unwrap();
        let addr = server.local_addr().unwrap();
        let clients = server.clients();
        tokio::spawn(server.run());
        (addr, clients)
    }

    async fn wait_for_clients(clients: &RwLock<ClientManager>, expected: usize) {
        for _ in 0..100 {
            if clients.read().await.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} clients", expected);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.send_queue, 256);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_answered() {
        let (addr, _clients) = start(4).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(Message::Text(r#"{"topic":"chat","event":"subscribe"}"#.into()))
            .await
            .unwrap();

        let reply = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => text,
            other => panic!("unexpected frame {:?}", other),
        };
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["topic"], "chat");
    }

    #[tokio::test]
    async fn test_connection_limit_and_cleanup() {
        let (addr, clients) = start(1).await;

        let (mut first, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        wait_for_clients(&clients, 1).await;

        let (mut second, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        match second.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            Some(Ok(other)) => panic!("rejected connection got {:?}", other),
        }
        assert_eq!(clients.read().await.len(), 1);

        first.close(None).await.unwrap();
        wait_for_clients(&clients, 0).await;
    }
}
