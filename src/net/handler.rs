//! Per-connection session (spec §4.5, 10% of the core): handshake,
//! admission guards, and routing of client events to the Broker/Room. Runs
//! as its own task with a single mailbox per connection, so at most one
//! inbound frame for this connection is ever being processed at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use log::warn;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{interval, timeout};

use crate::dialect::DialectId;
use crate::net::broker::Broker;
use crate::net::connection::Connection;
use crate::net::room::{HandlerId, JoinRequest, RoomHandle, RoomNotice};
use crate::wire::json::{decode_client_event, encode_server_event};
use crate::wire::{ClientEvent, ServerEvent};

const KNOWN_DIALECTS: &[&str] = &["rps", "bps", "psp"];

pub struct Handler {
    id: HandlerId,
    ip: String,
    username: String,
    client_type: DialectId,
    conn: Arc<dyn Connection>,
    current_room: Option<RoomHandle>,
    last_create_game: Option<Instant>,
    last_event: Instant,
    event_count: u32,
}

impl Handler {
    /// Runs the full per-connection lifecycle to completion: handshake,
    /// admission guards, and the event routing loop. Returns once the
    /// connection is destroyed for any reason.
    pub async fn run(
        id: HandlerId,
        ip: String,
        conn: Arc<dyn Connection>,
        mut inbound: UnboundedReceiver<Result<Vec<u8>, ()>>,
        broker: Arc<Broker>,
    ) {
        let admission = broker.config.admission.clone();

        conn.send(encode_server_event(&ServerEvent::RequestClientInfo {
            jwk_public_key: broker.jwk_public_key.clone(),
        }));

        let Some((username, client_type, password)) =
            await_handshake(&mut inbound, admission.upgrade_timeout_secs).await
        else {
            warn!("handler {id} ({ip}): invalid connection handshake data");
            conn.disconnect();
            return;
        };

        if let Some(password) = password {
            if verify_password(&broker.rsa_private, &password).is_err() {
                warn!("handler {id} ({ip}): kicked, password decode failed");
                conn.disconnect();
                return;
            }
        }

        conn.send(encode_server_event(&ServerEvent::ClientInfoRecieved));

        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<RoomNotice>();
        let mut handler = Handler {
            id,
            ip,
            username,
            client_type,
            conn,
            current_room: None,
            last_create_game: None,
            last_event: Instant::now(),
            event_count: 0,
        };

        let mut idle_flood_tick = interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(Ok(bytes)) => {
                            handler.last_event = Instant::now();
                            handler.event_count += 1;
                            match decode_client_event(&bytes) {
                                Ok(event) => handler.route(event, &broker, &notice_tx).await,
                                Err(_) => {
                                    warn!("handler {}: malformed frame", handler.id);
                                    break;
                                }
                            }
                        }
                        _ => break,
                    }
                }
                notice = notice_rx.recv() => {
                    match notice {
                        Some(RoomNotice::Left) | Some(RoomNotice::Kicked) => {
                            handler.current_room = None;
                        }
                        Some(RoomNotice::HostMisbehavior { reason }) => {
                            warn!("handler {}: destroyed, host misbehavior: {reason}", handler.id);
                            handler.current_room = None;
                        }
                        None => {}
                    }
                }
                _ = idle_flood_tick.tick() => {
                    if handler.last_event.elapsed() > Duration::from_secs(admission.idle_timeout_secs) {
                        warn!("handler {}: timed out", handler.id);
                        break;
                    }
                    if handler.event_count > admission.flood_events_per_sec {
                        warn!("handler {}: socketio spam", handler.id);
                        break;
                    }
                    handler.event_count = 0;
                }
            }
        }

        if let Some(room) = handler.current_room.take() {
            room.leave(handler.id);
        }
        handler.conn.disconnect();
    }

    async fn route(&mut self, event: ClientEvent, broker: &Arc<Broker>, notice_tx: &mpsc::UnboundedSender<RoomNotice>) {
        let room_config = &broker.config.room;
        match event {
            ClientEvent::ClientInfo(_) => {}
            ClientEvent::CreateGame => self.create_game(broker, notice_tx).await,
            ClientEvent::CancelCreateGame => {
                if let Some(room) = self.current_room.take() {
                    room.leave(self.id);
                }
            }
            ClientEvent::GetPublicRooms { mode, spectating } => {
                let mut rooms = broker.public_rooms(mode).await;
                if spectating {
                    rooms.retain(|r| r.allows_spectators);
                }
                self.send(ServerEvent::PublicRooms(rooms));
            }
            ClientEvent::JoinGame { code, spectating } => self.join_game(broker, notice_tx, code, spectating).await,
            ClientEvent::LeaveGame => {
                if let Some(room) = self.current_room.take() {
                    room.leave(self.id);
                }
            }
            ClientEvent::ChangeTeam(team) => self.with_room(|r| r.change_team(self.id, team)),
            ClientEvent::GameType(mode) => self.with_room(|r| r.set_game_type(self.id, mode)),
            ClientEvent::AllowSpectators(allow) => self.with_room(|r| r.set_allow_spectators(self.id, allow)),
            ClientEvent::IsPublic(public) => self.with_room(|r| r.set_public(self.id, public)),
            ClientEvent::TeamSize(size) => {
                if (room_config.min_team_size..=room_config.max_team_size).contains(&size) {
                    self.with_room(|r| r.set_team_size(self.id, size));
                }
            }
            ClientEvent::KickPlayer { username } => self.with_room(|r| r.kick(self.id, username)),
            ClientEvent::MovePlayer { username, team, username2 } => {
                self.with_room(|r| r.move_player(self.id, username, team, username2))
            }
            ClientEvent::StartGame => self.with_room(|r| r.start(self.id)),
            ClientEvent::Ready => self.with_room(|r| r.ready(self.id)),
            ClientEvent::GridSize { width, height } => self.with_room(|r| r.grid_size_set(self.id, width, height)),
            ClientEvent::Tick(frame) => self.with_room(|r| r.tick(self.id, frame)),
            ClientEvent::Input(frame) => self.with_room(|r| r.input(self.id, frame)),
            ClientEvent::InputBatch(frames) => self.with_room(|r| r.input_batch(self.id, frames)),
            ClientEvent::Ping => self.send(ServerEvent::Pong),
        }
    }

    fn with_room(&self, f: impl FnOnce(&RoomHandle)) {
        if let Some(room) = &self.current_room {
            f(room);
        }
    }

    async fn create_game(&mut self, broker: &Arc<Broker>, notice_tx: &mpsc::UnboundedSender<RoomNotice>) {
        if let Some(last) = self.last_create_game {
            if last.elapsed() < Duration::from_secs(broker.config.room.create_game_cooldown_secs) {
                warn!("handler {}: createGame spam", self.id);
                self.conn.disconnect();
                return;
            }
        }
        self.last_create_game = Some(Instant::now());

        if self.current_room.is_some() {
            return;
        }

        let room = broker.create_room(self.id).await;
        self.send(ServerEvent::GameCode(room.code.clone()));
        room.join(JoinRequest {
            id: self.id,
            username: self.username.clone(),
            dialect: self.client_type.clone(),
            conn: Arc::clone(&self.conn),
            notice_tx: notice_tx.clone(),
            spectating: false,
            is_host: true,
        });
        self.current_room = Some(room);
    }

    async fn join_game(&mut self, broker: &Arc<Broker>, notice_tx: &mpsc::UnboundedSender<RoomNotice>, code: String, spectating: bool) {
        if self.current_room.is_some() {
            return;
        }
        match broker.find_room(&code).await {
            Some(room) => {
                room.join(JoinRequest {
                    id: self.id,
                    username: self.username.clone(),
                    dialect: self.client_type.clone(),
                    conn: Arc::clone(&self.conn),
                    notice_tx: notice_tx.clone(),
                    spectating,
                    is_host: false,
                });
                self.current_room = Some(room);
            }
            None => self.send(ServerEvent::JoinFail { reason: "no such room".to_string() }),
        }
    }

    fn send(&self, event: ServerEvent) {
        self.conn.send(encode_server_event(&event));
    }
}

/// Waits for a valid `clientInfo` frame, ignoring any other frame that
/// arrives first (spec.md:199). A `clientInfo` frame with a bad shape still
/// destroys the connection (spec.md:138), as does the overall deadline
/// elapsing or the channel closing.
async fn await_handshake(
    inbound: &mut UnboundedReceiver<Result<Vec<u8>, ()>>,
    timeout_secs: u64,
) -> Option<(String, DialectId, Option<String>)> {
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let frame = timeout(remaining, inbound.recv()).await.ok()??.ok()?;
        let Ok(event) = decode_client_event(&frame) else {
            continue;
        };
        match event {
            ClientEvent::ClientInfo(payload) => {
                if payload.username.is_empty() || !KNOWN_DIALECTS.contains(&payload.client.as_str()) {
                    return None;
                }
                return Some((payload.username, payload.client, payload.password));
            }
            _ => continue,
        }
    }
}

fn verify_password(private_key: &RsaPrivateKey, encoded: &str) -> Result<Vec<u8>, ()> {
    let ciphertext = base64::engine::general_purpose::STANDARD.decode(encoded).map_err(|_| ())?;
    let padding = Oaep::new::<Sha256>();
    private_key.decrypt(padding, &ciphertext).map_err(|_| ())
}
