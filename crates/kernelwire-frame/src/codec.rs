use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::Authentication;
use crate::error::{FrameError, Result};
use crate::message::{Header, Message, MessageBody, PubMessage};

/// Sentinel frame separating routing frames from the signed payload.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Signature + header + parent header + metadata + content.
pub const SIGNED_FRAME_COUNT: usize = 5;

/// A multipart wire message, one `Vec<u8>` per zmq frame.
pub type Multipart = Vec<Vec<u8>>;

/// How JSON frames that are not valid UTF-8 are treated on decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JsonErrorPolicy {
    /// Reject the frame.
    #[default]
    Strict,
    /// Substitute U+FFFD for invalid sequences and parse the result.
    Replace,
}

/// Converts messages to and from the multipart wire format.
///
/// Wire format (addressed):
/// ```text
/// [identity]* <IDS|MSG> signature header parent_header metadata content [buffer]*
/// ```
/// Wire format (broadcast):
/// ```text
/// topic <IDS|MSG> signature header parent_header metadata content [buffer]*
/// ```
#[derive(Debug, Clone)]
pub struct Serializer {
    auth: Authentication,
    policy: JsonErrorPolicy,
}

impl Serializer {
    pub fn new(auth: Authentication) -> Self {
        Self::with_policy(auth, JsonErrorPolicy::default())
    }

    pub fn with_policy(auth: Authentication, policy: JsonErrorPolicy) -> Self {
        Self { auth, policy }
    }

    pub fn auth(&self) -> &Authentication {
        &self.auth
    }

    pub fn policy(&self) -> JsonErrorPolicy {
        self.policy
    }

    /// Encode an addressed message.
    pub fn serialize(&self, message: &Message) -> Result<Multipart> {
        let prefix = message.identities.iter().map(|id| id.to_vec()).collect();
        self.encode_body(prefix, &message.body)
    }

    /// Encode a broadcast message.
    pub fn serialize_pub(&self, message: &PubMessage) -> Result<Multipart> {
        self.encode_body(vec![message.topic.as_bytes().to_vec()], &message.body)
    }

    /// Decode an addressed message.
    ///
    /// Every frame before the delimiter is a routing identity.
    pub fn deserialize(&self, frames: Multipart) -> Result<Message> {
        let delimiter = frames
            .iter()
            .position(|frame| frame.as_slice() == DELIMITER)
            .ok_or(FrameError::MissingDelimiter)?;

        let mut frames = frames.into_iter();
        let identities = frames.by_ref().take(delimiter).map(Bytes::from).collect();
        frames.next(); // delimiter
        let body = self.decode_body(frames.collect())?;
        Ok(Message { identities, body })
    }

    /// Decode a broadcast message.
    ///
    /// The first frame is the topic and the second must be the delimiter.
    pub fn deserialize_pub(&self, frames: Multipart) -> Result<PubMessage> {
        if frames.len() < 2 || frames[1].as_slice() != DELIMITER {
            return Err(FrameError::MissingDelimiter);
        }

        let mut frames = frames.into_iter();
        let topic = frames.next().unwrap_or_default();
        frames.next(); // delimiter
        let topic = self.text(&topic)?;
        let body = self.decode_body(frames.collect())?;
        Ok(PubMessage { topic, body })
    }

    fn encode_body(&self, mut frames: Multipart, body: &MessageBody) -> Result<Multipart> {
        let header = serde_json::to_vec(&body.header)?;
        let parent_header = match &body.parent_header {
            Some(parent) => serde_json::to_vec(parent)?,
            None => b"{}".to_vec(),
        };
        let metadata = serde_json::to_vec(&body.metadata)?;
        let content = serde_json::to_vec(&body.content)?;
        let signature = self.auth.sign(&header, &parent_header, &metadata, &content);

        frames.reserve(1 + SIGNED_FRAME_COUNT + body.buffers.len());
        frames.push(DELIMITER.to_vec());
        frames.push(signature.into_bytes());
        frames.push(header);
        frames.push(parent_header);
        frames.push(metadata);
        frames.push(content);
        frames.extend(body.buffers.iter().map(|buffer| buffer.to_vec()));
        Ok(frames)
    }

    fn decode_body(&self, frames: Multipart) -> Result<MessageBody> {
        if frames.len() < SIGNED_FRAME_COUNT {
            return Err(FrameError::Incomplete {
                expected: SIGNED_FRAME_COUNT,
                actual: frames.len(),
            });
        }

        let mut frames = frames.into_iter();
        let mut next = || frames.next().unwrap_or_default();
        let signature = next();
        let header = next();
        let parent_header = next();
        let metadata = next();
        let content = next();

        // Signature is checked on the received bytes before any JSON is trusted.
        if !self
            .auth
            .verify(&signature, &header, &parent_header, &metadata, &content)
        {
            return Err(FrameError::SignatureMismatch);
        }

        let header: Header = self.parse(&header)?;
        let parent_header = match self.parse::<Value>(&parent_header)? {
            Value::Object(map) if map.is_empty() => None,
            Value::Null => None,
            other => Some(serde_json::from_value(other)?),
        };
        let metadata = self.parse(&metadata)?;
        let content = self.parse(&content)?;
        let buffers = frames.map(Bytes::from).collect();

        Ok(MessageBody {
            header,
            parent_header,
            metadata,
            content,
            buffers,
        })
    }

    fn text(&self, raw: &[u8]) -> Result<String> {
        match self.policy {
            JsonErrorPolicy::Strict => Ok(std::str::from_utf8(raw)?.to_string()),
            JsonErrorPolicy::Replace => Ok(String::from_utf8_lossy(raw).into_owned()),
        }
    }

    fn parse<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T> {
        Ok(serde_json::from_str(&self.text(raw)?)?)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::auth::SignatureScheme;

    fn sample_body(msg_type: &str) -> MessageBody {
        let parent = Header::new("execute_request", "client-session", "client");
        MessageBody::new(
            Header::new(msg_type, "kernel-session", "kernel"),
            Some(parent),
            json!({ "started": "2024-01-01T00:00:00.000000Z" }),
            json!({ "status": "ok", "execution_count": 3 }),
        )
    }

    fn keyed() -> Serializer {
        Serializer::new(Authentication::keyed(SignatureScheme::Sha256, b"secret"))
    }

    #[test]
    fn addressed_layout_matches_wire_format() {
        let message = Message::new(
            vec![Bytes::from_static(b"id-1"), Bytes::from_static(b"id-2")],
            sample_body("execute_reply").with_buffers(vec![Bytes::from_static(b"\x00\x01")]),
        );
        let frames = keyed().serialize(&message).expect("message should serialize");

        assert_eq!(frames.len(), 2 + 1 + SIGNED_FRAME_COUNT + 1);
        assert_eq!(frames[0], b"id-1");
        assert_eq!(frames[1], b"id-2");
        assert_eq!(frames[2], DELIMITER);
        assert_eq!(frames[3].len(), 64, "sha256 hex signature");
        assert_eq!(frames[8], b"\x00\x01");
    }

    #[test]
    fn broadcast_layout_starts_with_topic() {
        let message = PubMessage::new("kernel_core.abc.status", sample_body("status"));
        let frames = keyed().serialize_pub(&message).expect("message should serialize");
        assert_eq!(frames[0], b"kernel_core.abc.status");
        assert_eq!(frames[1], DELIMITER);
    }

    #[test]
    fn empty_parent_encodes_as_empty_object() {
        let mut body = sample_body("status");
        body.parent_header = None;
        let frames = keyed()
            .serialize(&Message::new(Vec::new(), body))
            .expect("message should serialize");
        assert_eq!(frames[3], b"{}");

        let decoded = keyed().deserialize(frames).expect("message should decode");
        assert!(decoded.body.parent_header.is_none());
    }

    #[test]
    fn missing_delimiter_is_a_framing_error() {
        let message = Message::new(vec![Bytes::from_static(b"id")], sample_body("x"));
        let mut frames = keyed().serialize(&message).expect("message should serialize");
        frames.retain(|frame| frame.as_slice() != DELIMITER);

        let err = keyed().deserialize(frames).expect_err("delimiter is mandatory");
        assert!(matches!(err, FrameError::MissingDelimiter));
    }

    #[test]
    fn broadcast_without_delimiter_is_a_framing_error() {
        let message = PubMessage::new("topic", sample_body("status"));
        let mut frames = keyed().serialize_pub(&message).expect("message should serialize");
        frames.remove(1);

        let err = keyed().deserialize_pub(frames).expect_err("delimiter is mandatory");
        assert!(matches!(err, FrameError::MissingDelimiter));
    }

    #[test]
    fn truncated_payload_is_incomplete() {
        let frames = vec![DELIMITER.to_vec(), b"sig".to_vec(), b"{}".to_vec()];
        let err = keyed().deserialize(frames).expect_err("too few frames should fail");
        assert!(matches!(err, FrameError::Incomplete { expected: 5, actual: 2 }));
    }

    #[test]
    fn tampered_content_is_an_auth_error() {
        let message = Message::new(Vec::new(), sample_body("execute_reply"));
        let mut frames = keyed().serialize(&message).expect("message should serialize");
        let content = frames.len() - 1;
        frames[content] = br#"{"status":"error"}"#.to_vec();

        let err = keyed().deserialize(frames).expect_err("tampering should be detected");
        assert!(matches!(err, FrameError::SignatureMismatch));
    }

    #[test]
    fn wrong_key_is_an_auth_error() {
        let message = Message::new(Vec::new(), sample_body("execute_reply"));
        let frames = keyed().serialize(&message).expect("message should serialize");
        let other = Serializer::new(Authentication::keyed(SignatureScheme::Sha256, b"other"));
        assert!(matches!(other.deserialize(frames), Err(FrameError::SignatureMismatch)));
    }

    #[test]
    fn strict_policy_rejects_invalid_utf8_and_replace_accepts_it() {
        let serializer = Serializer::new(Authentication::disabled());
        let frames = vec![
            DELIMITER.to_vec(),
            Vec::new(),
            serde_json::to_vec(&Header::new("comm_msg", "s", "u")).expect("header should encode"),
            b"{}".to_vec(),
            b"{}".to_vec(),
            b"{\"text\":\"caf\xE9\"}".to_vec(),
        ];

        let err = serializer
            .deserialize(frames.clone())
            .expect_err("strict policy should reject invalid utf-8");
        assert!(matches!(err, FrameError::InvalidUtf8(_)));

        let lenient = Serializer::with_policy(Authentication::disabled(), JsonErrorPolicy::Replace);
        let message = lenient.deserialize(frames).expect("replace policy should decode");
        assert_eq!(message.content()["text"], "caf\u{FFFD}");
    }

    fn header_strategy() -> impl Strategy<Value = Header> {
        (
            "[a-f0-9]{32}",
            "[a-z]{0,8}",
            "[a-f0-9]{8}",
            "[a-z_]{1,20}",
            proptest::option::of("[a-z]{1,6}"),
        )
            .prop_map(|(msg_id, username, session, msg_type, extra)| {
                let mut header = Header::new(msg_type, session, username);
                header.msg_id = msg_id;
                if let Some(value) = extra {
                    header.extra.insert("x_trace".to_string(), Value::String(value));
                }
                header
            })
    }

    fn json_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            ".{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    fn body_strategy() -> impl Strategy<Value = MessageBody> {
        (
            header_strategy(),
            proptest::option::of(header_strategy()),
            json_strategy(),
            json_strategy(),
            prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..3),
        )
            .prop_map(|(header, parent, metadata, content, buffers)| {
                MessageBody::new(header, parent, metadata, content)
                    .with_buffers(buffers.into_iter().map(Bytes::from).collect())
            })
    }

    proptest! {
        #[test]
        fn addressed_roundtrip_keyed_and_disabled(
            body in body_strategy(),
            identities in prop::collection::vec(prop::collection::vec(1u8..=255, 1..8), 0..3),
            signed in any::<bool>(),
        ) {
            let serializer = if signed { keyed() } else { Serializer::new(Authentication::disabled()) };
            let message = Message::new(identities.into_iter().map(Bytes::from).collect(), body);
            let frames = serializer.serialize(&message).expect("message should serialize");
            let decoded = serializer.deserialize(frames).expect("message should decode");
            prop_assert_eq!(decoded, message);
        }

        #[test]
        fn broadcast_roundtrip_keyed_and_disabled(
            body in body_strategy(),
            topic in "[a-z_.]{1,40}",
            signed in any::<bool>(),
        ) {
            let serializer = if signed { keyed() } else { Serializer::new(Authentication::disabled()) };
            let message = PubMessage::new(topic, body);
            let frames = serializer.serialize_pub(&message).expect("message should serialize");
            let decoded = serializer.deserialize_pub(frames).expect("message should decode");
            prop_assert_eq!(decoded, message);
        }
    }
}
