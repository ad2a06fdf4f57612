//! Flat JSON envelope codec: `{"event": "...", "data": ...}`. Mirrors the
//! teacher's `api::schema::json` module, minus the hand-rolled streaming
//! `Visitor` (our event set is closed and serde's internally-tagged enum
//! support covers it directly).

use super::{ClientEvent, ServerEvent};

#[derive(Debug)]
pub struct DeserializationFailure;

pub fn encode_server_event(event: &ServerEvent) -> Vec<u8> {
    serde_json::to_vec(event).expect("ServerEvent is always serializable")
}

pub fn decode_client_event(buf: &[u8]) -> Result<ClientEvent, DeserializationFailure> {
    serde_json::from_slice(buf).map_err(|_| DeserializationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ClientEvent, ClientInfoPayload};

    #[test]
    fn round_trips_client_info() {
        let raw = br#"{"event":"clientInfo","data":{"username":"alice","client":"rps"}}"#;
        let decoded = decode_client_event(raw).unwrap();
        match decoded {
            ClientEvent::ClientInfo(ClientInfoPayload { username, client, password }) => {
                assert_eq!(username, "alice");
                assert_eq!(client.as_str(), "rps");
                assert!(password.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_event_fails() {
        let raw = br#"{"event":"notARealEvent","data":{}}"#;
        assert!(decode_client_event(raw).is_err());
    }

    #[test]
    fn encodes_tick_grid_as_base64() {
        let event = ServerEvent::Tick(crate::wire::TickFrame {
            grid: vec![1, 2, 3],
            team_grid: vec![9],
            boolean_grids: vec![vec![0, 1]],
            origin: "host".to_string(),
            data: crate::wire::TickData {
                tick: 1,
                team_pixel_amounts: vec![],
                pixelite_counts: None,
                camera_shake: None,
            },
        });
        let buf = encode_server_event(&event);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"grid\":\"AQID\""));
    }
}
