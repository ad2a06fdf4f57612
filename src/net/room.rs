//! Game room state machine (spec §4.6, 20% of the core): team rosters,
//! lifecycle transitions, and the tick/input relay. Each room is a
//! dedicated-actor task draining a single mpsc mailbox, the async analogue
//! of the teacher's `SyncRuntime` thread-per-room loop — this is what
//! guarantees two ticks from the same host never interleave (spec §5).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use tokio::sync::{mpsc, oneshot};

use crate::config::RoomConfig;
use crate::dialect::DialectId;
use crate::net::connection::Connection;
use crate::pixel::PixelConverter;
use crate::wire::{GameMode, InputFrame, PublicRoomInfo, ServerEvent, TeamLists, TickFrame};

pub type HandlerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Open,
    Starting,
    Running,
    Closed,
}

/// Sent back to a Handler so it can update its own `currentRoom`/kicked
/// state without the Room reaching into Handler's private fields.
#[derive(Debug, Clone)]
pub enum RoomNotice {
    Left,
    Kicked,
    HostMisbehavior { reason: String },
}

struct Member {
    username: String,
    dialect: DialectId,
    conn: Arc<dyn Connection>,
    notice_tx: mpsc::UnboundedSender<RoomNotice>,
}

enum Slot {
    TeamA,
    TeamB,
    Spectator,
}

#[derive(Clone)]
pub struct RoomHandle {
    pub code: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn join(&self, member: JoinRequest) {
        let _ = self.tx.send(RoomCommand::Join(member));
    }

    pub fn change_team(&self, id: HandlerId, team: u8) {
        let _ = self.tx.send(RoomCommand::ChangeTeam { id, team });
    }

    pub fn move_player(&self, requester: HandlerId, username_a: String, team: u8, username_b: Option<String>) {
        let _ = self.tx.send(RoomCommand::Move { requester, username_a, team, username_b });
    }

    pub fn kick(&self, requester: HandlerId, username: String) {
        let _ = self.tx.send(RoomCommand::Kick { requester, username });
    }

    pub fn leave(&self, id: HandlerId) {
        let _ = self.tx.send(RoomCommand::Leave { id });
    }

    pub fn set_game_type(&self, id: HandlerId, mode: GameMode) {
        let _ = self.tx.send(RoomCommand::SetGameType { id, mode });
    }

    pub fn set_allow_spectators(&self, id: HandlerId, allow: bool) {
        let _ = self.tx.send(RoomCommand::SetAllowSpectators { id, allow });
    }

    pub fn set_public(&self, id: HandlerId, public: bool) {
        let _ = self.tx.send(RoomCommand::SetPublic { id, public });
    }

    pub fn set_team_size(&self, id: HandlerId, size: u8) {
        let _ = self.tx.send(RoomCommand::SetTeamSize { id, size });
    }

    pub fn start(&self, id: HandlerId) {
        let _ = self.tx.send(RoomCommand::Start { id });
    }

    pub fn ready(&self, id: HandlerId) {
        let _ = self.tx.send(RoomCommand::Ready { id });
    }

    pub fn tick(&self, id: HandlerId, frame: TickFrame) {
        let _ = self.tx.send(RoomCommand::Tick { id, frame });
    }

    pub fn input(&self, id: HandlerId, frame: InputFrame) {
        let _ = self.tx.send(RoomCommand::Input { id, frame });
    }

    pub fn input_batch(&self, id: HandlerId, frames: Vec<InputFrame>) {
        let _ = self.tx.send(RoomCommand::InputBatch { id, frames });
    }

    pub async fn snapshot(&self) -> Option<PublicRoomInfo> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(RoomCommand::Snapshot(reply_tx));
        reply_rx.await.ok().flatten()
    }

    pub fn grid_size_set(&self, id: HandlerId, width: u32, height: u32) {
        let _ = self.tx.send(RoomCommand::GridSize { id, width, height });
    }
}

pub struct JoinRequest {
    pub id: HandlerId,
    pub username: String,
    pub dialect: DialectId,
    pub conn: Arc<dyn Connection>,
    pub notice_tx: mpsc::UnboundedSender<RoomNotice>,
    pub spectating: bool,
    pub is_host: bool,
}

enum RoomCommand {
    Join(JoinRequest),
    ChangeTeam { id: HandlerId, team: u8 },
    Move { requester: HandlerId, username_a: String, team: u8, username_b: Option<String> },
    Kick { requester: HandlerId, username: String },
    Leave { id: HandlerId },
    SetGameType { id: HandlerId, mode: GameMode },
    SetAllowSpectators { id: HandlerId, allow: bool },
    SetPublic { id: HandlerId, public: bool },
    SetTeamSize { id: HandlerId, size: u8 },
    GridSize { id: HandlerId, width: u32, height: u32 },
    Start { id: HandlerId },
    Ready { id: HandlerId },
    Tick { id: HandlerId, frame: TickFrame },
    Input { id: HandlerId, frame: InputFrame },
    InputBatch { id: HandlerId, frames: Vec<InputFrame> },
    Snapshot(oneshot::Sender<Option<PublicRoomInfo>>),
}

pub struct Room {
    code: String,
    host: HandlerId,
    mode: GameMode,
    team_size: u8,
    config: RoomConfig,
    team_a: Vec<HandlerId>,
    team_b: Vec<HandlerId>,
    spectators: Vec<HandlerId>,
    members: std::collections::HashMap<HandlerId, Member>,
    allow_spectators: bool,
    public: bool,
    state: RoomState,
    banned: HashSet<String>,
    ready_count: usize,
    created_at: u64,
    converter: Arc<PixelConverter>,
    on_closed: Box<dyn FnOnce(&str) + Send>,
}

impl Room {
    /// Spawns the dedicated actor task and returns a handle to it plus the
    /// code it was assigned. `on_closed` is invoked once, from inside the
    /// actor, so the Broker can remove the room from its registry.
    pub fn spawn(
        code: String,
        host: HandlerId,
        config: RoomConfig,
        converter: Arc<PixelConverter>,
        on_closed: impl FnOnce(&str) + Send + 'static,
    ) -> RoomHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<RoomCommand>();
        let handle = RoomHandle { code: code.clone(), tx };

        let mut room = Room {
            code,
            host,
            mode: GameMode::Pixelcrash,
            team_size: config.default_team_size,
            config,
            team_a: Vec::new(),
            team_b: Vec::new(),
            spectators: Vec::new(),
            members: std::collections::HashMap::new(),
            allow_spectators: true,
            public: true,
            state: RoomState::Open,
            banned: HashSet::new(),
            ready_count: 0,
            created_at: now_ms(),
            converter,
            on_closed: Box::new(on_closed),
        };

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                room.handle_command(cmd);
                if matches!(room.state, RoomState::Closed) {
                    break;
                }
            }
        });

        handle
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join(req) => self.join(req),
            RoomCommand::ChangeTeam { id, team } => self.change_team(id, team),
            RoomCommand::Move { requester, username_a, team, username_b } => {
                if requester == self.host {
                    self.move_player(username_a, team, username_b);
                }
            }
            RoomCommand::Kick { requester, username } => {
                if requester == self.host {
                    self.kick(&username);
                }
            }
            RoomCommand::Leave { id } => self.leave(id),
            RoomCommand::SetGameType { id, mode } => {
                if id == self.host && matches!(self.state, RoomState::Open) {
                    self.mode = mode;
                    self.send_to_all(ServerEvent::GameType(mode));
                }
            }
            RoomCommand::SetAllowSpectators { id, allow } => {
                if id == self.host {
                    self.allow_spectators = allow;
                }
            }
            RoomCommand::SetPublic { id, public } => {
                if id == self.host {
                    self.public = public;
                }
            }
            RoomCommand::SetTeamSize { id, size } => {
                let bounds = self.config.min_team_size..=self.config.max_team_size;
                if id == self.host && matches!(self.state, RoomState::Open) && bounds.contains(&size) {
                    self.team_size = size;
                }
            }
            RoomCommand::GridSize { id, width, height } => {
                if id == self.host {
                    self.send_to_all(ServerEvent::GridSize { width, height });
                }
            }
            RoomCommand::Start { id } => self.start(id),
            RoomCommand::Ready { id } => self.ready(id),
            RoomCommand::Tick { id, frame } => self.relay_tick(id, frame),
            RoomCommand::Input { id, frame } => self.relay_input(id, frame),
            RoomCommand::InputBatch { id, frames } => self.relay_input_batch(id, frames),
            RoomCommand::Snapshot(reply) => {
                let _ = reply.send(self.public_room_info());
            }
        }
    }

    fn join(&mut self, req: JoinRequest) {
        let full = self.team_a.len() >= self.team_size as usize && self.team_b.len() >= self.team_size as usize;
        let forced_spectator = !req.spectating && (full || self.banned.contains(&req.username));
        let slot = if req.spectating || forced_spectator {
            Slot::Spectator
        } else if self.team_a.len() <= self.team_b.len() {
            Slot::TeamA
        } else {
            Slot::TeamB
        };

        let was_running = !matches!(self.state, RoomState::Open);

        self.members.insert(
            req.id,
            Member {
                username: req.username,
                dialect: req.dialect,
                conn: req.conn,
                notice_tx: req.notice_tx,
            },
        );

        match slot {
            Slot::Spectator => {
                self.spectators.push(req.id);
                if forced_spectator {
                    self.send_to(req.id, ServerEvent::ForcedSpectator);
                }
                self.send_to(req.id, ServerEvent::JoinSuccess(2));
                self.send_to(req.id, ServerEvent::GameType(self.mode));
                self.broadcast_rosters();
                if was_running && req.spectating {
                    self.send_to(req.id, ServerEvent::GameStart);
                }
            }
            Slot::TeamA => {
                self.team_a.push(req.id);
                self.send_to(req.id, ServerEvent::JoinSuccess(0));
                self.send_to(req.id, ServerEvent::GameType(self.mode));
                self.broadcast_rosters();
            }
            Slot::TeamB => {
                self.team_b.push(req.id);
                self.send_to(req.id, ServerEvent::JoinSuccess(1));
                self.send_to(req.id, ServerEvent::GameType(self.mode));
                self.broadcast_rosters();
            }
        }
    }

    fn change_team(&mut self, id: HandlerId, team: u8) {
        if !matches!(self.state, RoomState::Open) || team > 1 {
            return;
        }
        let on_a = self.team_a.contains(&id);
        let on_b = self.team_b.contains(&id);
        if !on_a && !on_b {
            return;
        }
        let (from, to) = if team == 0 { (&mut self.team_b, &mut self.team_a) } else { (&mut self.team_a, &mut self.team_b) };
        if to.len() >= self.team_size as usize {
            return;
        }
        if let Some(pos) = from.iter().position(|m| *m == id) {
            from.remove(pos);
            to.push(id);
            self.send_to(id, ServerEvent::Team(team));
            self.broadcast_rosters();
        }
    }

    fn move_player(&mut self, username_a: String, team: u8, username_b: Option<String>) {
        let id_a = self.find_by_username(&username_a);
        let id_b = username_b.as_deref().and_then(|u| self.find_by_username(u));

        match (id_a, id_b) {
            (Some(a), Some(b)) => {
                let team_of_a = self.team_of(a);
                let team_of_b = self.team_of(b);
                if let (Some(ta), Some(tb)) = (team_of_a, team_of_b) {
                    if ta != tb {
                        self.swap_teams(a, ta, b, tb);
                    }
                }
            }
            (Some(a), None) => self.change_team(a, team),
            _ => {}
        }
    }

    fn swap_teams(&mut self, a: HandlerId, ta: u8, b: HandlerId, tb: u8) {
        self.remove_from_team(a, ta);
        self.remove_from_team(b, tb);
        self.add_to_team(a, tb);
        self.add_to_team(b, ta);
        self.send_to(a, ServerEvent::Team(tb));
        self.send_to(b, ServerEvent::Team(ta));
        self.broadcast_rosters();
    }

    fn remove_from_team(&mut self, id: HandlerId, team: u8) {
        let list = if team == 0 { &mut self.team_a } else { &mut self.team_b };
        if let Some(pos) = list.iter().position(|m| *m == id) {
            list.remove(pos);
        }
    }

    fn add_to_team(&mut self, id: HandlerId, team: u8) {
        if team == 0 { self.team_a.push(id) } else { self.team_b.push(id) }
    }

    fn team_of(&self, id: HandlerId) -> Option<u8> {
        if self.team_a.contains(&id) {
            Some(0)
        } else if self.team_b.contains(&id) {
            Some(1)
        } else {
            None
        }
    }

    fn find_by_username(&self, username: &str) -> Option<HandlerId> {
        self.members.iter().find(|(_, m)| m.username == username).map(|(id, _)| *id)
    }

    fn kick(&mut self, username: &str) {
        if let Some(id) = self.find_by_username(username) {
            self.send_to(id, ServerEvent::GameKicked);
            if let Some(member) = self.members.get(&id) {
                let _ = member.notice_tx.send(RoomNotice::Kicked);
            }
            self.leave(id);
        }
    }

    fn leave(&mut self, id: HandlerId) {
        self.team_a.retain(|m| *m != id);
        self.team_b.retain(|m| *m != id);
        self.spectators.retain(|m| *m != id);
        self.members.remove(&id);

        if id == self.host {
            self.destroy();
            return;
        }
        self.broadcast_rosters();
    }

    fn destroy(&mut self) {
        self.send_to_all(ServerEvent::GameEnd);
        for (_, member) in self.members.drain() {
            let _ = member.notice_tx.send(RoomNotice::Left);
        }
        self.state = RoomState::Closed;
        let code = std::mem::take(&mut self.code);
        let on_closed = std::mem::replace(&mut self.on_closed, Box::new(|_| {}));
        on_closed(&code);
        self.code = code;
    }

    fn start(&mut self, id: HandlerId) {
        if id != self.host || !matches!(self.state, RoomState::Open) {
            return;
        }
        if self.team_a.len() != self.team_size as usize || self.team_b.len() != self.team_size as usize {
            return;
        }
        self.state = RoomState::Starting;
        self.ready_count = 0;
        for member_id in self.team_a.iter().chain(self.team_b.iter()) {
            self.send_to(*member_id, ServerEvent::GameStart);
        }
    }

    fn ready(&mut self, id: HandlerId) {
        if !matches!(self.state, RoomState::Starting) {
            return;
        }
        if !self.team_a.contains(&id) && !self.team_b.contains(&id) {
            return;
        }
        self.ready_count += 1;
        if self.ready_count >= 2 * self.team_size as usize {
            self.state = RoomState::Running;
        }
    }

    /// Validates and fans out a host tick, computing each distinct receiver
    /// dialect's translated frame exactly once (spec §4.6).
    fn relay_tick(&mut self, id: HandlerId, frame: TickFrame) {
        if id != self.host || !matches!(self.state, RoomState::Running) {
            return;
        }
        if frame.team_grid.is_empty() {
            self.kick_host("Invalid game tick data".to_string());
            return;
        }

        let Some(host_dialect) = self.members.get(&self.host).map(|m| m.dialect.clone()) else {
            return;
        };

        let mut cache: std::collections::HashMap<DialectId, TickFrame> = std::collections::HashMap::new();

        let receivers: Vec<HandlerId> = self
            .team_a
            .iter()
            .chain(self.team_b.iter())
            .chain(self.spectators.iter())
            .filter(|m| **m != self.host)
            .cloned()
            .collect();

        for receiver in receivers {
            let Some(dialect) = self.members.get(&receiver).map(|m| m.dialect.clone()) else {
                continue;
            };
            if dialect == host_dialect {
                self.send_to(receiver, ServerEvent::Tick(frame.clone()));
                continue;
            }
            let translated = cache
                .entry(dialect.clone())
                .or_insert_with(|| self.translate_tick(&frame, &host_dialect, &dialect))
                .clone();
            self.send_to(receiver, ServerEvent::Tick(translated));
        }
    }

    fn translate_tick(&self, frame: &TickFrame, from: &DialectId, to: &DialectId) -> TickFrame {
        let grid = self.converter.convert_grid(&frame.grid, from, to);
        let mut data = frame.data.clone();
        data.team_pixel_amounts = data
            .team_pixel_amounts
            .iter()
            .map(|amounts| {
                amounts
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, amount)| {
                        let translated = self.converter.convert_single(idx as u8, from, to);
                        if translated == crate::dialect::UNKNOWN_PIXEL {
                            None
                        } else {
                            Some((translated, *amount))
                        }
                    })
                    .fold(Vec::new(), |mut acc, (idx, amount)| {
                        let needed = idx as usize + 1;
                        if acc.len() < needed {
                            acc.resize(needed, 0);
                        }
                        acc[idx as usize] = amount;
                        acc
                    })
            })
            .collect();

        TickFrame {
            grid,
            team_grid: frame.team_grid.clone(),
            boolean_grids: frame.boolean_grids.clone(),
            origin: frame.origin.clone(),
            data,
        }
    }

    fn relay_input(&mut self, id: HandlerId, mut frame: InputFrame) {
        if !matches!(self.state, RoomState::Running) || id == self.host {
            return;
        }
        let Some(sender_dialect) = self.members.get(&id).map(|m| m.dialect.clone()) else {
            return;
        };
        let Some(host_dialect) = self.members.get(&self.host).map(|m| m.dialect.clone()) else {
            return;
        };

        let valid = match frame.kind {
            0 => frame.data.len() == 6,
            1 => !frame.data.is_empty(),
            _ => false,
        };
        if !valid {
            self.leave(id);
            return;
        }

        if frame.kind == 0 {
            if frame.data[5] != crate::dialect::UNKNOWN_PIXEL {
                frame.data[5] = self.converter.convert_single(frame.data[5], &sender_dialect, &host_dialect);
            }
        } else {
            let header = frame.data[0];
            let translated = self.converter.convert_grid(&frame.data[1..], &sender_dialect, &host_dialect);
            frame.data = std::iter::once(header).chain(translated).collect();
        }

        self.send_to(self.host, ServerEvent::Input(frame));
    }

    fn relay_input_batch(&mut self, id: HandlerId, frames: Vec<InputFrame>) {
        if !matches!(self.state, RoomState::Running) || id == self.host {
            return;
        }
        let Some(sender_dialect) = self.members.get(&id).map(|m| m.dialect.clone()) else {
            return;
        };
        let Some(host_dialect) = self.members.get(&self.host).map(|m| m.dialect.clone()) else {
            return;
        };

        let mut translated = Vec::with_capacity(frames.len());
        for mut frame in frames {
            let valid = match frame.kind {
                0 => frame.data.len() == 6,
                1 => !frame.data.is_empty(),
                _ => false,
            };
            if !valid {
                self.leave(id);
                return;
            }
            if frame.kind == 0 {
                if frame.data[5] != crate::dialect::UNKNOWN_PIXEL {
                    frame.data[5] = self.converter.convert_single(frame.data[5], &sender_dialect, &host_dialect);
                }
            } else {
                let header = frame.data[0];
                let grid = self.converter.convert_grid(&frame.data[1..], &sender_dialect, &host_dialect);
                frame.data = std::iter::once(header).chain(grid).collect();
            }
            translated.push(frame);
        }
        self.send_to(self.host, ServerEvent::InputBatch(translated));
    }

    fn kick_host(&mut self, reason: String) {
        if let Some(member) = self.members.get(&self.host) {
            let _ = member.notice_tx.send(RoomNotice::HostMisbehavior { reason: reason.clone() });
        }
        warn!("room {}: host misbehavior: {reason}", self.code);
        self.destroy();
    }

    fn broadcast_rosters(&self) {
        let rosters = self.team_lists();
        self.send_to_all(ServerEvent::UpdateTeamLists(rosters));
    }

    fn team_lists(&self) -> TeamLists {
        TeamLists {
            team_a: self.names(&self.team_a),
            team_b: self.names(&self.team_b),
            spectators: self.names(&self.spectators),
            team_size: self.team_size,
        }
    }

    fn names(&self, ids: &[HandlerId]) -> Vec<String> {
        ids.iter().filter_map(|id| self.members.get(id).map(|m| m.username.clone())).collect()
    }

    fn public_room_info(&self) -> Option<PublicRoomInfo> {
        if !matches!(self.state, RoomState::Open) {
            return None;
        }
        Some(PublicRoomInfo {
            code: self.code.clone(),
            mode: self.mode,
            host_name: self.members.get(&self.host).map(|m| m.username.clone()).unwrap_or_default(),
            open: self.public,
            team_size: self.team_size,
            allows_spectators: self.allow_spectators,
        })
    }

    fn send_to(&self, id: HandlerId, event: ServerEvent) {
        if let Some(member) = self.members.get(&id) {
            member.conn.send(crate::wire::json::encode_server_event(&event));
        }
    }

    fn send_to_all(&self, event: ServerEvent) {
        let frame = crate::wire::json::encode_server_event(&event);
        for member in self.members.values() {
            member.conn.send(frame.clone());
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
