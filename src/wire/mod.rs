//! The event-framed wire protocol described in spec §6. Transport-agnostic:
//! `json` (de)serializes an event to/from a flat JSON envelope, the way the
//! teacher framework's `api::schema::json` module serializes `InputMessage`/
//! `OutputMessage`. Binary payloads (grids) are base64-encoded fields rather
//! than raw frames, since a single JSON envelope carries both the event name
//! and its data.

pub mod json;

use serde::{Deserialize, Serialize};

use crate::dialect::DialectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Pixelcrash,
    Resourcerace,
}

impl Default for GameMode {
    fn default() -> Self {
        GameMode::Pixelcrash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoomInfo {
    pub code: String,
    #[serde(rename = "type")]
    pub mode: GameMode,
    pub host_name: String,
    pub open: bool,
    pub team_size: u8,
    pub allows_spectators: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamLists {
    pub team_a: Vec<String>,
    pub team_b: Vec<String>,
    pub spectators: Vec<String>,
    pub team_size: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickData {
    pub tick: u64,
    pub team_pixel_amounts: Vec<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixelite_counts: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_shake: Option<f32>,
}

/// A host-produced tick frame, as validated by `net::room`'s tick relay
/// (spec §4.6). `grid`/`team_grid`/`boolean_grids` are base64 in the wire
/// envelope and raw bytes once decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickFrame {
    #[serde(with = "base64_bytes")]
    pub grid: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub team_grid: Vec<u8>,
    #[serde(with = "base64_bytes_vec")]
    pub boolean_grids: Vec<Vec<u8>>,
    pub origin: String,
    pub data: TickData,
}

/// A single-cell ("type 0") or region-paint ("type 1") input frame relayed
/// team-member -> host (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFrame {
    #[serde(rename = "type")]
    pub kind: u8,
    pub team: u8,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfoPayload {
    pub username: String,
    pub client: DialectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Client -> server events (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "clientInfo")]
    ClientInfo(ClientInfoPayload),
    #[serde(rename = "createGame")]
    CreateGame,
    #[serde(rename = "cancelCreateGame")]
    CancelCreateGame,
    #[serde(rename = "getPublicRooms")]
    GetPublicRooms {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        mode: Option<GameMode>,
        #[serde(default)]
        spectating: bool,
    },
    #[serde(rename = "joinGame")]
    JoinGame { code: String, spectating: bool },
    #[serde(rename = "leaveGame")]
    LeaveGame,
    #[serde(rename = "changeTeam")]
    ChangeTeam(u8),
    #[serde(rename = "gameType")]
    GameType(GameMode),
    #[serde(rename = "allowSpectators")]
    AllowSpectators(bool),
    #[serde(rename = "isPublic")]
    IsPublic(bool),
    #[serde(rename = "teamSize")]
    TeamSize(u8),
    #[serde(rename = "kickPlayer")]
    KickPlayer { username: String },
    #[serde(rename = "movePlayer")]
    MovePlayer {
        username: String,
        team: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username2: Option<String>,
    },
    #[serde(rename = "startGame")]
    StartGame,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "gridSize")]
    GridSize { width: u32, height: u32 },
    #[serde(rename = "tick")]
    Tick(TickFrame),
    #[serde(rename = "input")]
    Input(InputFrame),
    #[serde(rename = "inputBatch")]
    InputBatch(Vec<InputFrame>),
    #[serde(rename = "ping")]
    Ping,
}

/// Server -> client events (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "requestClientInfo")]
    RequestClientInfo { jwk_public_key: String },
    #[serde(rename = "clientInfoRecieved")]
    ClientInfoRecieved,
    #[serde(rename = "gameCode")]
    GameCode(String),
    /// 0 = teamA, 1 = teamB, 2 = spectator.
    #[serde(rename = "joinSuccess")]
    JoinSuccess(u8),
    #[serde(rename = "joinFail")]
    JoinFail { reason: String },
    #[serde(rename = "forcedSpectator")]
    ForcedSpectator,
    #[serde(rename = "gameType")]
    GameType(GameMode),
    #[serde(rename = "updateTeamLists")]
    UpdateTeamLists(TeamLists),
    #[serde(rename = "publicRooms")]
    PublicRooms(Vec<PublicRoomInfo>),
    #[serde(rename = "gameStart")]
    GameStart,
    #[serde(rename = "team")]
    Team(u8),
    #[serde(rename = "gameKicked")]
    GameKicked,
    #[serde(rename = "gameEnd")]
    GameEnd,
    #[serde(rename = "tick")]
    Tick(TickFrame),
    #[serde(rename = "inputBatch")]
    InputBatch(Vec<InputFrame>),
    #[serde(rename = "input")]
    Input(InputFrame),
    #[serde(rename = "gridSize")]
    GridSize { width: u32, height: u32 },
    #[serde(rename = "pong")]
    Pong,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_vec {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(grids: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = s.serialize_seq(Some(grids.len()))?;
        for g in grids {
            seq.serialize_element(&base64::engine::general_purpose::STANDARD.encode(g))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(d)?;
        raw.into_iter()
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
