//! Process-wide registries and the accept loop (spec §4.7, 9% of the core).
//! Generalizes the teacher's `Broker`-less singleton registries (the source
//! spec explicitly calls for replacing static class registries with owned
//! composition, spec §9) into one struct everything borrows through an
//! `Arc`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use rand::Rng;
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::config::RelayConfig;
use crate::map::MapCatalog;
use crate::net::connection::{Connection, WebSocketConnection};
use crate::net::handler::Handler;
use crate::net::room::{HandlerId, Room, RoomHandle};
use crate::pixel::PixelConverter;
use crate::wire::{GameMode, PublicRoomInfo};

pub struct Broker {
    pub config: RelayConfig,
    pub pixel_converter: Arc<PixelConverter>,
    pub map_catalog: Arc<MapCatalog>,
    pub rsa_private: Arc<RsaPrivateKey>,
    pub jwk_public_key: String,
    rooms: RwLock<HashMap<String, RoomHandle>>,
    handlers: RwLock<HashMap<HandlerId, Arc<dyn Connection>>>,
    next_handler_id: AtomicU64,
    recent_connects_per_ip: Mutex<HashMap<String, u32>>,
    ip_kicked: Mutex<HashSet<String>>,
    crashed: AtomicBool,
    active: AtomicBool,
    shutdown: Notify,
}

impl Broker {
    pub fn new(config: RelayConfig, pixel_converter: PixelConverter, map_catalog: MapCatalog) -> Arc<Self> {
        let mut rng = rand::thread_rng();
        let rsa_private = RsaPrivateKey::new(&mut rng, 1024).expect("RSA keygen");
        let public: RsaPublicKey = (&rsa_private).into();
        let jwk_public_key = public
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .expect("encode RSA public key");

        Arc::new(Self {
            config,
            pixel_converter: Arc::new(pixel_converter),
            map_catalog: Arc::new(map_catalog),
            rsa_private: Arc::new(rsa_private),
            jwk_public_key,
            rooms: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
            recent_connects_per_ip: Mutex::new(HashMap::new()),
            ip_kicked: Mutex::new(HashSet::new()),
            crashed: AtomicBool::new(false),
            active: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    pub fn next_handler_id(&self) -> HandlerId {
        self.next_handler_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn register_handler(&self, id: HandlerId, conn: Arc<dyn Connection>) {
        self.handlers.write().await.insert(id, conn);
    }

    async fn deregister_handler(&self, id: HandlerId) {
        self.handlers.write().await.remove(&id);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            active: self.active.load(Ordering::Relaxed),
            starting: !self.active.load(Ordering::Relaxed) && !self.crashed.load(Ordering::Relaxed),
            crashed: self.is_crashed(),
            time_ms: now_ms(),
        }
    }

    /// Spawns a new room for `host` with a random 8-hex code, retrying on
    /// (astronomically unlikely) collision.
    pub async fn create_room(self: &Arc<Self>, host: HandlerId) -> RoomHandle {
        loop {
            let code = random_room_code();
            let mut rooms = self.rooms.write().await;
            if rooms.contains_key(&code) {
                continue;
            }
            let broker = Arc::clone(self);
            let handle = Room::spawn(
                code.clone(),
                host,
                self.config.room.clone(),
                Arc::clone(&self.pixel_converter),
                move |closed_code| {
                    let broker = Arc::clone(&broker);
                    let closed_code = closed_code.to_string();
                    tokio::spawn(async move {
                        broker.rooms.write().await.remove(&closed_code);
                    });
                },
            );
            rooms.insert(code, handle.clone());
            return handle;
        }
    }

    pub async fn find_room(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(code).cloned()
    }

    pub async fn public_rooms(&self, mode: Option<GameMode>) -> Vec<PublicRoomInfo> {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for handle in handles {
            if let Some(info) = handle.snapshot().await {
                if mode.map(|m| m == info.mode).unwrap_or(true) {
                    out.push(info);
                }
            }
        }
        out
    }

    /// Per-IP admission check (spec §4.7): more than 3 accepted connections
    /// from one IP within a rolling 1s window drops the connection. A
    /// background decay task clears the counter and the per-window "already
    /// warned" flag once a second.
    pub async fn admit(&self, ip: &str) -> bool {
        let mut counts = self.recent_connects_per_ip.lock().await;
        let count = counts.entry(ip.to_string()).or_insert(0);
        *count += 1;
        if *count > self.config.admission.max_connects_per_ip_per_sec {
            let mut kicked = self.ip_kicked.lock().await;
            if kicked.insert(ip.to_string()) {
                warn!("connection spam from {ip}");
            }
            return false;
        }
        true
    }

    async fn decay_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let mut counts = self.recent_connects_per_ip.lock().await;
            counts.retain(|_, c| {
                *c = c.saturating_sub(1);
                *c > 0
            });
            self.ip_kicked.lock().await.clear();
        }
    }

    /// Runs the accept loop until the listener fails or `close` is called.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = match TcpListener::bind(&self.config.bind_addr).await {
            Ok(l) => l,
            Err(err) => {
                self.close().await;
                return Err(err);
            }
        };
        self.active.store(true, Ordering::Relaxed);
        info!("pixsim relay listening on {}", self.config.bind_addr);

        tokio::spawn(Arc::clone(&self).decay_loop());

        loop {
            if self.is_crashed() {
                break;
            }
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!("accept failed: {err}");
                        continue;
                    }
                },
                _ = self.shutdown.notified() => break,
            };

            let ip = peer.ip().to_string();
            if !self.admit(&ip).await {
                continue;
            }

            let broker = Arc::clone(&self);
            tokio::spawn(async move {
                let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let (conn, inbound) = WebSocketConnection::spawn(ws_stream);
                let conn = Arc::new(conn);
                let id = broker.next_handler_id();
                broker.register_handler(id, Arc::clone(&conn) as Arc<dyn Connection>).await;
                Handler::run(id, ip, conn, inbound, Arc::clone(&broker)).await;
                broker.deregister_handler(id).await;
            });
        }

        Ok(())
    }

    /// Destroys every live handler (which disconnects their socket and
    /// causes each to leave its room) and stops the accept loop.
    pub async fn close(&self) {
        self.crashed.store(true, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
        self.shutdown.notify_waiters();
        for conn in self.handlers.write().await.drain().map(|(_, conn)| conn) {
            conn.disconnect();
        }
    }
}

pub struct StatusSnapshot {
    pub active: bool,
    pub starting: bool,
    pub crashed: bool,
    pub time_ms: u64,
}

fn random_room_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08x}", rng.gen::<u32>())
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
