//! Wire types for the debate backend: REST bodies, REST responses, and the
//! live WebSocket frames.
//!
//! The backend is loose in a few places: `result` arrives as a string or a
//! number depending on the path, timestamps are named `timestamp` on one
//! endpoint and `created_at` on another, and list columns sometimes leak as
//! JSON-encoded strings. The deserializers here absorb those shapes so the
//! rest of the crate sees one canonical model.

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Chat + debate records
// ---------------------------------------------------------------------------

/// One chat message as stored by the backend.
///
/// `id` is server-assigned and opaque; it is the deduplication key for the
/// message log, so it is required on every inbound shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub discussion_id: u64,
    pub user_address: String,
    pub username: String,
    pub message: String,
    /// Side name the author aligned with; absent or empty means neutral.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance: Option<String>,
    /// Message id this one replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,
    /// RFC 3339 creation time. The history endpoint calls this `timestamp`,
    /// the submit response calls it `created_at`.
    #[serde(alias = "created_at")]
    pub timestamp: String,
}

/// One juror's evaluation of one chat message.
///
/// Uniquely keyed by `(juror_id, latest_msg_id)`. `result` is kept raw here;
/// interpretation against the debate's side list happens in the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurorVerdict {
    pub juror_id: u32,
    #[serde(default)]
    pub discussion_id: u64,
    /// The chat message this verdict responds to.
    pub latest_msg_id: u64,
    /// Raw side index as the backend stored it: a decimal index, "-1" for
    /// undecided, or garbage. Accepted as JSON string or number.
    #[serde(deserialize_with = "de_string_or_number")]
    pub result: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(alias = "timestamp")]
    pub created_at: String,
}

/// A judge broadcast for the whole courtroom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeAnnouncement {
    #[serde(default)]
    pub discussion_id: u64,
    pub message: String,
    #[serde(default)]
    pub created_at: String,
}

/// Debate metadata. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub discussion_id: u64,
    pub topic: String,
    /// Ordered side names; index positions are what verdicts refer to.
    #[serde(deserialize_with = "de_inline_list")]
    pub sides: Vec<String>,
    #[serde(default, deserialize_with = "de_inline_list_opt")]
    pub juror_ids: Vec<u32>,
    #[serde(default)]
    pub funding: f64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub creator_address: String,
    #[serde(default)]
    pub created_at: String,
}

/// One juror persona row from the debate-info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurorPersona {
    pub juror_id: u32,
    #[serde(default)]
    pub discussion_id: u64,
    pub persona: String,
}

/// Envelope returned by `GET /debate/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateInfo {
    pub debate: Debate,
    #[serde(default)]
    pub jurors: Vec<JurorPersona>,
}

/// Row returned by `POST /user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub id: u64,
    pub username: String,
    pub user_address: String,
}

// ---------------------------------------------------------------------------
// REST request bodies
// ---------------------------------------------------------------------------

/// Body for `POST /user`: upsert a display name for a wallet address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUser {
    pub username: String,
    pub user_address: String,
}

/// Body for `POST /debate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDebateRequest {
    pub discussion_id: u64,
    pub topic: String,
    pub sides: Vec<String>,
    /// Persona texts; the backend assigns juror ids by position.
    pub jurors: Vec<String>,
    pub funding: f64,
    pub action: String,
    pub creator_address: String,
}

/// Body for `POST /msg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub discussion_id: u64,
    pub user_address: String,
    pub username: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,
}

// ---------------------------------------------------------------------------
// Live frames
// ---------------------------------------------------------------------------

/// Inbound frame on the live channel: `{"type": ..., "data": ...}`.
///
/// The set is closed: a frame with any other `type` fails to parse, and the
/// connection manager drops it with a warning instead of guessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(ChatMessage),
    JurorResponse(JurorVerdict),
    JudgeAnnouncement(JudgeAnnouncement),
    Pong,
}

/// Outbound frame on the live channel. Only the keep-alive ping exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Ping,
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

/// Accept a JSON string or number and normalize to the string form.
fn de_string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(match Raw::deserialize(de)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

/// Accept a JSON array or a JSON-encoded string of an array.
///
/// The backend stores list columns as JSON text and one code path returns
/// them without decoding first.
fn de_inline_list<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        List(Vec<T>),
        Encoded(String),
    }
    match Raw::<T>::deserialize(de)? {
        Raw::List(v) => Ok(v),
        Raw::Encoded(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
    }
}

/// Same as [`de_inline_list`] but tolerates the field being null.
fn de_inline_list_opt<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        List(Vec<T>),
        Encoded(String),
        Missing(()),
    }
    match Raw::<T>::deserialize(de)? {
        Raw::List(v) => Ok(v),
        Raw::Encoded(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        Raw::Missing(()) => Ok(Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- ChatMessage ----

    #[test]
    fn test_chat_message_full_row() {
        let json = r#"{
            "id": 42,
            "discussion_id": 7,
            "user_address": "0xabc123",
            "username": "alice",
            "message": "I disagree",
            "stance": "No",
            "timestamp": "2025-03-01T12:00:00"
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, 42);
        assert_eq!(msg.discussion_id, 7);
        assert_eq!(msg.username, "alice");
        assert_eq!(msg.stance.as_deref(), Some("No"));
        assert!(msg.reply_to.is_none());
    }

    #[test]
    fn test_chat_message_created_at_alias() {
        let json = r#"{
            "id": 1,
            "discussion_id": 7,
            "user_address": "0xabc",
            "username": "bob",
            "message": "hi",
            "created_at": "2025-03-01T12:00:01"
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.timestamp, "2025-03-01T12:00:01");
    }

    #[test]
    fn test_chat_message_missing_id_is_error() {
        let json = r#"{
            "discussion_id": 7,
            "user_address": "0xabc",
            "username": "bob",
            "message": "hi",
            "timestamp": "2025-03-01T12:00:01"
        }"#;
        assert!(serde_json::from_str::<ChatMessage>(json).is_err());
    }

    #[test]
    fn test_chat_message_stance_omitted_when_none() {
        let msg = ChatMessage {
            id: 1,
            discussion_id: 2,
            user_address: "0x1".into(),
            username: "a".into(),
            message: "m".into(),
            stance: None,
            reply_to: None,
            timestamp: "t".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("stance"));
        assert!(!json.contains("reply_to"));
    }

    // -- JurorVerdict ----

    #[test]
    fn test_verdict_result_as_string() {
        let json = r#"{
            "juror_id": 0,
            "discussion_id": 7,
            "latest_msg_id": 42,
            "result": "1",
            "reasoning": "side two was sharper",
            "created_at": "2025-03-01T12:00:05"
        }"#;
        let v: JurorVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(v.result, "1");
        assert_eq!(v.latest_msg_id, 42);
    }

    #[test]
    fn test_verdict_result_as_number() {
        let json = r#"{"juror_id": 2, "latest_msg_id": 9, "result": -1, "created_at": "t"}"#;
        let v: JurorVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(v.result, "-1");
        assert_eq!(v.discussion_id, 0);
        assert!(v.reasoning.is_empty());
    }

    #[test]
    fn test_verdict_result_float_normalizes() {
        let json = r#"{"juror_id": 1, "latest_msg_id": 3, "result": 1.0, "created_at": "t"}"#;
        let v: JurorVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(v.result, "1");
    }

    #[test]
    fn test_verdict_timestamp_alias() {
        let json = r#"{"juror_id": 1, "latest_msg_id": 3, "result": "0", "timestamp": "2025-01-01T00:00:00"}"#;
        let v: JurorVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(v.created_at, "2025-01-01T00:00:00");
    }

    // -- Debate ----

    #[test]
    fn test_debate_sides_as_array() {
        let json = r#"{
            "discussion_id": 7,
            "topic": "Pineapple on pizza",
            "sides": ["Yes", "No"],
            "juror_ids": [0, 1, 2],
            "funding": 1.5,
            "action": "",
            "creator_address": "0xme",
            "created_at": "2025-03-01T11:00:00"
        }"#;
        let d: Debate = serde_json::from_str(json).unwrap();
        assert_eq!(d.sides, vec!["Yes", "No"]);
        assert_eq!(d.juror_ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_debate_sides_as_encoded_string() {
        // The create-debate response leaks the raw JSON text columns.
        let json = r#"{
            "discussion_id": 7,
            "topic": "t",
            "sides": "[\"Yes\", \"No\"]",
            "juror_ids": "[0, 1]"
        }"#;
        let d: Debate = serde_json::from_str(json).unwrap();
        assert_eq!(d.sides, vec!["Yes", "No"]);
        assert_eq!(d.juror_ids, vec![0, 1]);
    }

    #[test]
    fn test_debate_missing_juror_ids_defaults_empty() {
        let json = r#"{"discussion_id": 1, "topic": "t", "sides": ["A", "B"]}"#;
        let d: Debate = serde_json::from_str(json).unwrap();
        assert!(d.juror_ids.is_empty());
        assert_eq!(d.funding, 0.0);
    }

    #[test]
    fn test_debate_info_envelope() {
        let json = r#"{
            "debate": {"discussion_id": 7, "topic": "t", "sides": ["Yes", "No"]},
            "jurors": [
                {"juror_id": 0, "discussion_id": 7, "persona": "a skeptical economist"},
                {"juror_id": 1, "discussion_id": 7, "persona": "a retired judge"}
            ]
        }"#;
        let info: DebateInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.debate.discussion_id, 7);
        assert_eq!(info.jurors.len(), 2);
        assert_eq!(info.jurors[1].persona, "a retired judge");
    }

    // -- ServerEvent dispatch ----

    #[test]
    fn test_server_event_new_message() {
        let json = r#"{
            "type": "new_message",
            "data": {
                "id": 5,
                "discussion_id": 7,
                "user_address": "0xabc",
                "username": "carol",
                "message": "opening statement",
                "timestamp": "2025-03-01T12:00:00"
            }
        }"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::NewMessage(m) => assert_eq!(m.id, 5),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_juror_response() {
        let json = r#"{
            "type": "juror_response",
            "data": {"juror_id": 3, "latest_msg_id": 5, "result": "0", "created_at": "t"}
        }"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::JurorResponse(v) => {
                assert_eq!(v.juror_id, 3);
                assert_eq!(v.result, "0");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_judge_announcement() {
        let json = r#"{"type": "judge_announcement", "data": {"message": "order!"}}"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::JudgeAnnouncement(a) => assert_eq!(a.message, "order!"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_pong_without_data() {
        let ev: ServerEvent = serde_json::from_str(r#"{"type": "pong"}"#).unwrap();
        assert!(matches!(ev, ServerEvent::Pong));
    }

    #[test]
    fn test_server_event_unknown_type_is_error() {
        let err = serde_json::from_str::<ServerEvent>(r#"{"type": "surprise", "data": {}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_client_event_ping_shape() {
        let json = serde_json::to_string(&ClientEvent::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    // -- request bodies ----

    #[test]
    fn test_post_message_request_skips_empty_optionals() {
        let req = PostMessageRequest {
            discussion_id: 7,
            user_address: "0xabc".into(),
            username: "alice".into(),
            message: "hello".into(),
            stance: None,
            reply_to: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"discussion_id\":7"));
        assert!(!json.contains("stance"));
    }

    #[test]
    fn test_post_message_request_with_stance() {
        let req = PostMessageRequest {
            discussion_id: 7,
            user_address: "0xabc".into(),
            username: "alice".into(),
            message: "hello".into(),
            stance: Some("Yes".into()),
            reply_to: Some(3),
        };
        let v: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(v["stance"], "Yes");
        assert_eq!(v["reply_to"], 3);
    }

    #[test]
    fn test_create_debate_request_roundtrip() {
        let req = CreateDebateRequest {
            discussion_id: 99,
            topic: "cats vs dogs".into(),
            sides: vec!["Cats".into(), "Dogs".into()],
            jurors: vec!["a vet".into(), "a mailman".into()],
            funding: 0.0,
            action: String::new(),
            creator_address: "0xme".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: CreateDebateRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sides, req.sides);
        assert_eq!(back.jurors.len(), 2);
    }
}
