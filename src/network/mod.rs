// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TCP transport. The core thread only ever sees [`Network::send`],
//! [`Network::broadcast`], and [`Network::try_recv`] — all non-blocking.
//! Accept and per-connection read/write run on their own threads, exactly
//! like the teacher's `protocols::wprs` transport, but with a single
//! message type and plain TCP instead of rkyv-over-{unix,tcp,ssh}.

pub mod framing;
pub mod protocol;

use std::collections::HashMap;
use std::net::Shutdown;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::geometry::Direction;
use crate::network::framing::Framed;
use crate::network::protocol::Message;
use crate::prelude::*;

/// Something the core thread observes from the network layer at the next
/// tick boundary.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Connected { name: String },
    Disconnected { name: String },
    Message { name: String, message: Message },
}

struct ClientRecord {
    write_tx: crossbeam_channel::Sender<Message>,
    connected: Arc<AtomicBool>,
    stream: TcpStream,
}

#[derive(Default)]
struct Registry {
    by_name: HashMap<String, ClientRecord>,
}

/// The core's handle onto the network layer. Cheap to clone; all state is
/// behind `Arc`.
#[derive(Clone)]
pub struct Network {
    local_addr: std::net::SocketAddr,
    registry: Arc<Mutex<Registry>>,
    incoming_rx: crossbeam_channel::Receiver<NetworkEvent>,
    position_for_name: Arc<HashMap<String, Direction>>,
}

impl Network {
    /// Binds `host:port` and starts the accept loop on a background thread.
    /// `position_for_name` is the config-time binding of client names to
    /// cardinal directions; duplicate positions are rejected at config load,
    /// not here (see [`crate::config`]).
    pub fn bind(host: &str, port: u16, position_for_name: HashMap<String, Direction>) -> Result<Self> {
        let listener =
            TcpListener::bind((host, port)).with_context(loc!(), || format!("binding {host}:{port}"))?;
        let local_addr = listener.local_addr().location(loc!())?;

        let registry = Arc::new(Mutex::new(Registry::default()));
        let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();
        let position_for_name = Arc::new(position_for_name);

        {
            let registry = registry.clone();
            let position_for_name = position_for_name.clone();
            thread::spawn(move || accept_loop(listener, registry, incoming_tx, position_for_name));
        }

        Ok(Self {
            local_addr,
            registry,
            incoming_rx,
            position_for_name,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Non-blocking; returns `None` once the queue is drained for this tick.
    pub fn try_recv(&self) -> Option<NetworkEvent> {
        self.incoming_rx.try_recv().ok()
    }

    /// Enqueues `msg` for delivery to the named client. Silently drops if
    /// the client is not currently connected; the forwarder does not treat
    /// this as an error (the client may simply have disconnected this tick).
    pub fn send(&self, name: &str, msg: Message) {
        let registry = self.registry.lock().unwrap();
        match registry.by_name.get(name) {
            Some(record) => {
                if record.write_tx.send(msg).is_err() {
                    debug!("send to {name:?} dropped: write channel closed");
                }
            },
            None => debug!("send to unknown or disconnected client {name:?} dropped"),
        }
    }

    pub fn broadcast(&self, msg: Message) {
        let registry = self.registry.lock().unwrap();
        for record in registry.by_name.values() {
            let _ = record.write_tx.send(msg.clone());
        }
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.registry.lock().unwrap().by_name.contains_key(name)
    }

    /// The client name bound to `dir` at config load time, if one is
    /// currently connected's binding — this looks up the static config
    /// binding, independent of live connection state.
    pub fn client_for_position(&self, dir: Direction) -> Option<String> {
        self.position_for_name
            .iter()
            .find(|(_, p)| **p == dir)
            .map(|(name, _)| name.clone())
    }
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<Mutex<Registry>>,
    incoming_tx: crossbeam_channel::Sender<NetworkEvent>,
    position_for_name: Arc<HashMap<String, Direction>>,
) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e:?}");
                continue;
            },
        };
        info!("client connected from {peer:?}");
        let registry = registry.clone();
        let incoming_tx = incoming_tx.clone();
        let position_for_name = position_for_name.clone();
        thread::spawn(move || handle_connection(stream, registry, incoming_tx, position_for_name));
    }
}

fn handle_connection(
    stream: TcpStream,
    registry: Arc<Mutex<Registry>>,
    incoming_tx: crossbeam_channel::Sender<NetworkEvent>,
    position_for_name: Arc<HashMap<String, Direction>>,
) {
    let _ = stream.set_nodelay(true);

    let name = match do_handshake(&stream) {
        Ok(name) => name,
        Err(e) => {
            debug!("handshake failed from {:?}: {e:?}", stream.peer_addr());
            return;
        },
    };

    let (write_tx, write_rx) = crossbeam_channel::unbounded();
    let connected = Arc::new(AtomicBool::new(true));

    let own_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to clone stream for {name}: {e:?}");
            return;
        },
    };

    // Zombie eviction (S6): a later connection with a duplicate name evicts
    // the earlier record.
    {
        let mut registry = registry.lock().unwrap();
        if let Some(old) = registry.by_name.remove(&name) {
            info!("evicting prior connection for client {name:?}");
            old.connected.store(false, Ordering::Release);
            let _ = old.stream.shutdown(Shutdown::Both);
            let _ = incoming_tx.send(NetworkEvent::Disconnected { name: name.clone() });
        }
        registry.by_name.insert(
            name.clone(),
            ClientRecord {
                write_tx,
                connected: connected.clone(),
                stream: own_stream,
            },
        );
    }
    let _ = incoming_tx.send(NetworkEvent::Connected { name: name.clone() });

    thread::scope(|scope| {
        let read_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to clone stream for read loop ({name}): {e:?}");
                return;
            },
        };
        let write_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to clone stream for write loop ({name}): {e:?}");
                return;
            },
        };

        let read_handle = {
            let name = name.clone();
            let incoming_tx = incoming_tx.clone();
            scope.spawn(move || read_loop(read_stream, name, incoming_tx))
        };
        let write_handle = {
            let connected = connected.clone();
            scope.spawn(move || write_loop(write_stream, write_rx, connected))
        };

        let read_result = crate::utils::join_unwrap(read_handle);
        debug!("read loop for {name} ended: {read_result:?}");
        connected.store(false, Ordering::Release);
        let write_result = crate::utils::join_unwrap(write_handle);
        debug!("write loop for {name} ended: {write_result:?}");
    });

    // Remove the record only if it's still the one we installed (a newer
    // connection for the same name may already have evicted and replaced it).
    {
        let mut registry = registry.lock().unwrap();
        let still_ours = matches!(
            registry.by_name.get(&name),
            Some(record) if Arc::ptr_eq(&record.connected, &connected)
        );
        if still_ours {
            registry.by_name.remove(&name);
        }
    }
    let _ = incoming_tx.send(NetworkEvent::Disconnected { name });
    let _ = stream.shutdown(Shutdown::Both);
}

fn do_handshake(stream: &TcpStream) -> Result<String> {
    stream.set_read_timeout(Some(Duration::from_secs(10))).location(loc!())?;
    let mut handshake_stream = stream.try_clone().location(loc!())?;
    let hello = Message::framed_read(&mut handshake_stream).location(loc!())?;
    let name = match hello {
        Message::Hello { name, .. } => name,
        other => bail!("expected hello as first message, got {other:?}"),
    };
    Message::hello("tx2tx-server", None)
        .framed_write(&mut handshake_stream)
        .location(loc!())?;
    stream.set_read_timeout(None).location(loc!())?;
    Ok(name)
}

fn read_loop(mut stream: TcpStream, name: String, incoming_tx: crossbeam_channel::Sender<NetworkEvent>) -> Result<()> {
    loop {
        let message = Message::framed_read(&mut stream).location(loc!())?;
        incoming_tx
            .send(NetworkEvent::Message {
                name: name.clone(),
                message,
            })
            .map_err(|e| anyhow!("{e}"))
            .location(loc!())?;
    }
}

fn write_loop(
    mut stream: TcpStream,
    rx: crossbeam_channel::Receiver<Message>,
    connected: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(msg) => msg.framed_write(&mut stream).location(loc!())?,
            Err(RecvTimeoutError::Timeout) => {
                if !connected.load(Ordering::Acquire) {
                    break;
                }
            },
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;
    use std::time::Instant;

    fn connect_and_hello(addr: std::net::SocketAddr, name: &str) -> StdTcpStream {
        let mut stream = StdTcpStream::connect(addr).unwrap();
        Message::hello(name, None).framed_write(&mut stream).unwrap();
        let _ = Message::framed_read(&mut stream).unwrap();
        stream
    }

    fn wait_for<F: FnMut() -> bool>(mut pred: F) {
        let start = Instant::now();
        while !pred() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for condition");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn handshake_registers_and_connects_event_fires() {
        let mut positions = HashMap::new();
        positions.insert("C_west".to_string(), Direction::Left);
        let network = Network::bind("127.0.0.1", 0, positions).unwrap();
        let _client = connect_and_hello(network.local_addr(), "C_west");

        wait_for(|| network.is_connected("C_west"));
        assert_eq!(network.client_for_position(Direction::Left), Some("C_west".to_string()));

        let event = network.try_recv();
        assert!(matches!(event, Some(NetworkEvent::Connected { name }) if name == "C_west"));
    }

    #[test]
    fn duplicate_name_evicts_prior_connection() {
        let network = Network::bind("127.0.0.1", 0, HashMap::new()).unwrap();
        let first = connect_and_hello(network.local_addr(), "C_west");
        wait_for(|| network.is_connected("C_west"));

        let _second = connect_and_hello(network.local_addr(), "C_west");
        wait_for(|| network.is_connected("C_west"));

        // The first connection's socket should have been shut down by the
        // eviction; a blocking read on it now returns EOF/error rather than
        // hanging forever.
        use std::io::Read;
        let mut buf = [0u8; 1];
        let mut first = first;
        let _ = first.set_read_timeout(Some(Duration::from_secs(2)));
        let n = first.read(&mut buf);
        assert!(matches!(n, Ok(0) | Err(_)));
    }
}
