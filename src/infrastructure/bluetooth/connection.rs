//! flicd Connection Module
//!
//! Owns the TCP connection to the Flic daemon. A background task reads
//! events and routes them to the per-button channel they belong to.

use crate::domain::models::{BdAddr, EdgeEvent, LatencyMode};
use crate::infrastructure::bluetooth::protocol::{
    self, Command, Event, AUTO_DISCONNECT_DISABLED, HEADER_LEN,
};
use crate::infrastructure::bluetooth::{ButtonClient, EdgeStream, FlicError};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

struct Channel {
    addr: BdAddr,
    edges: mpsc::UnboundedSender<EdgeEvent>,
    opened: Option<oneshot::Sender<Result<(), FlicError>>>,
}

#[derive(Default)]
struct Routes {
    channels: HashMap<u32, Channel>,
    info_waiters: VecDeque<oneshot::Sender<Vec<BdAddr>>>,
    closed: bool,
}

fn lock(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

async fn write_command(writer: &SharedWriter, command: Command) -> Result<(), FlicError> {
    trace!("Sending {:?}", command);
    let packet = command.encode();
    let mut writer = writer.lock().await;
    writer
        .write_all(&packet)
        .await
        .map_err(FlicError::TransportUnavailable)
}

/// Client for a running flicd instance
pub struct FlicClient {
    writer: SharedWriter,
    routes: Arc<Mutex<Routes>>,
    next_conn_id: AtomicU32,
    reader: JoinHandle<()>,
}

impl FlicClient {
    /// Connect to flicd, e.g. `("localhost", 5551)`
    pub async fn open<A: ToSocketAddrs>(addr: A) -> Result<Self, FlicError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(FlicError::TransportUnavailable)?;
        stream
            .set_nodelay(true)
            .map_err(FlicError::TransportUnavailable)?;
        info!("Connected to flicd at {:?}", stream.peer_addr().ok());

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(write_half));
        let routes = Arc::new(Mutex::new(Routes::default()));
        let reader = tokio::spawn(read_loop(read_half, writer.clone(), routes.clone()));

        Ok(Self {
            writer,
            routes,
            next_conn_id: AtomicU32::new(1),
            reader,
        })
    }

    async fn send(&self, command: Command) -> Result<(), FlicError> {
        write_command(&self.writer, command).await
    }

    fn forget_channel(&self, conn_id: u32) {
        lock(&self.routes).channels.remove(&conn_id);
    }
}

impl ButtonClient for FlicClient {
    async fn get_device_list(&self) -> Result<Vec<BdAddr>, FlicError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = lock(&self.routes);
            if routes.closed {
                return Err(FlicError::Closed);
            }
            routes.info_waiters.push_back(tx);
        }

        if let Err(e) = self.send(Command::GetInfo).await {
            // Leave no stale waiter to swallow the next response
            drop(rx);
            lock(&self.routes)
                .info_waiters
                .retain(|waiter| !waiter.is_closed());
            return Err(e);
        }
        let buttons = rx.await.map_err(|_| FlicError::Closed)?;
        info!("flicd reports {} verified button(s)", buttons.len());
        Ok(buttons)
    }

    async fn connect(&self, addr: BdAddr, latency_mode: LatencyMode) -> Result<EdgeStream, FlicError> {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (edge_tx, edge_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = oneshot::channel();
        {
            let mut routes = lock(&self.routes);
            if routes.closed {
                return Err(FlicError::Closed);
            }
            routes.channels.insert(
                conn_id,
                Channel {
                    addr,
                    edges: edge_tx,
                    opened: Some(opened_tx),
                },
            );
        }

        info!("Opening connection channel {} for {}", conn_id, addr);
        let opened = match self
            .send(Command::CreateConnectionChannel {
                conn_id,
                bd_addr: addr,
                latency_mode,
                auto_disconnect_time: AUTO_DISCONNECT_DISABLED,
            })
            .await
        {
            Ok(()) => opened_rx.await.unwrap_or(Err(FlicError::Closed)),
            Err(e) => Err(e),
        };

        if let Err(e) = opened {
            self.forget_channel(conn_id);
            return Err(e);
        }
        Ok(edge_rx)
    }
}

impl Drop for FlicClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, writer: SharedWriter, routes: Arc<Mutex<Routes>>) {
    match read_events(&mut reader, &writer, &routes).await {
        Ok(()) => info!("flicd closed the connection"),
        Err(e) => error!("flicd connection lost: {}", e),
    }

    // Dropping the senders ends every edge stream and pending request
    let mut routes = lock(&routes);
    routes.closed = true;
    routes.channels.clear();
    routes.info_waiters.clear();
}

async fn read_events(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    routes: &Mutex<Routes>,
) -> Result<(), FlicError> {
    loop {
        let mut header = [0u8; HEADER_LEN];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(FlicError::TransportUnavailable(e)),
        }

        let mut body = vec![0u8; protocol::decode_length(header)];
        reader
            .read_exact(&mut body)
            .await
            .map_err(FlicError::TransportUnavailable)?;
        if body.is_empty() {
            continue;
        }

        // Framing is intact even when a body fails to decode
        let reply = match protocol::decode_event(&body) {
            Ok(event) => dispatch(routes, event),
            Err(e) => {
                warn!("Skipping flicd packet: {}", e);
                None
            }
        };
        if let Some(command) = reply {
            write_command(writer, command).await?;
        }
    }
}

/// Route one event. Returns a command to send back to flicd, if any.
fn dispatch(routes: &Mutex<Routes>, event: Event) -> Option<Command> {
    let mut routes = lock(routes);
    match event {
        Event::ButtonUpOrDown {
            conn_id,
            edge,
            was_queued,
            time_diff,
        } => {
            if was_queued {
                trace!("Queued {:?} on channel {} ({}s old)", edge, conn_id, time_diff);
            }
            let delivered = routes
                .channels
                .get(&conn_id)
                .map(|channel| channel.edges.send(edge).is_ok());
            match delivered {
                Some(true) => {}
                Some(false) => {
                    debug!("Listener for channel {} is gone, removing channel", conn_id);
                    routes.channels.remove(&conn_id);
                    return Some(Command::RemoveConnectionChannel { conn_id });
                }
                None => trace!("Edge for unknown channel {}", conn_id),
            }
        }
        Event::CreateConnectionChannelResponse {
            conn_id,
            error,
            status,
        } => {
            let Some(channel) = routes.channels.get_mut(&conn_id) else {
                return None;
            };
            let result = if error == 0 {
                info!("Channel {} for {} open ({:?})", conn_id, channel.addr, status);
                Ok(())
            } else {
                warn!("flicd rejected channel for {} (error {})", channel.addr, error);
                Err(FlicError::ChannelRejected {
                    addr: channel.addr,
                    code: error,
                })
            };
            let rejected = result.is_err();
            if let Some(opened) = channel.opened.take() {
                let _ = opened.send(result);
            }
            if rejected {
                routes.channels.remove(&conn_id);
            }
        }
        Event::ConnectionStatusChanged {
            conn_id,
            status,
            disconnect_reason,
        } => {
            if let Some(channel) = routes.channels.get(&conn_id) {
                info!(
                    "Button {} is now {:?} (reason {})",
                    channel.addr, status, disconnect_reason
                );
            }
        }
        Event::ConnectionChannelRemoved { conn_id, reason } => {
            if let Some(channel) = routes.channels.remove(&conn_id) {
                info!("flicd removed channel for {} (reason {})", channel.addr, reason);
            }
        }
        Event::GetInfoResponse {
            my_bd_addr,
            max_pending_connections,
            max_concurrently_connected_buttons,
            verified_buttons,
        } => {
            debug!(
                "flicd controller {}: {} pending connections, {} connected buttons max",
                my_bd_addr, max_pending_connections, max_concurrently_connected_buttons
            );
            // Skip waiters whose caller already gave up
            while let Some(waiter) = routes.info_waiters.pop_front() {
                if !waiter.is_closed() {
                    let _ = waiter.send(verified_buttons);
                    break;
                }
            }
        }
        Event::Unhandled(opcode) => trace!("Ignoring flicd event opcode {}", opcode),
    }
    None
}
