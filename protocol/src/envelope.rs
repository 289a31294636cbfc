use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

/// `system` subtype announcing that the vendor summarized the context window.
pub const COMPACT_BOUNDARY_SUBTYPE: &str = "compact_boundary";

/// One decoded output line. Kinds outside the closed set land in
/// [`Envelope::Unrecognized`] and carry no data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    System(SystemEnvelope),
    Assistant(AssistantEnvelope),
    Result(ResultEnvelope),
    StreamEvent(StreamEventEnvelope),
    CompactBoundary,
    #[serde(other)]
    Unrecognized,
}

impl Envelope {
    /// Decodes a single line. Returns `None` for anything that is not a JSON
    /// object of a known shape; callers treat that as diagnostic noise.
    ///
    /// A `result` object is never dropped: if a field has an unexpected shape
    /// the envelope is rebuilt from the fields that can still be read.
    pub fn from_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str(trimmed) {
            Ok(envelope) => Some(envelope),
            Err(_) => {
                let value: Value = serde_json::from_str(trimmed).ok()?;
                (value.get("type").and_then(Value::as_str) == Some("result"))
                    .then(|| Envelope::Result(ResultEnvelope::salvaged(&value)))
            }
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Envelope::System(SystemEnvelope { session_id, .. })
            | Envelope::Assistant(AssistantEnvelope { session_id, .. })
            | Envelope::Result(ResultEnvelope { session_id, .. }) => session_id.as_deref(),
            Envelope::StreamEvent(_) | Envelope::CompactBoundary | Envelope::Unrecognized => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SystemEnvelope {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SystemEnvelope {
    pub fn is_compact_boundary(&self) -> bool {
        self.subtype.as_deref() == Some(COMPACT_BOUNDARY_SUBTYPE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssistantEnvelope {
    #[serde(default)]
    pub message: AssistantMessage,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl AssistantMessage {
    pub fn text_blocks(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Terminal event of a turn. Older binaries report `cost_usd`, newer ones
/// `total_cost_usd`; both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub cost_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ResultEnvelope {
    pub fn reported_cost(&self) -> Option<f64> {
        self.total_cost_usd.or(self.cost_usd)
    }

    fn salvaged(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(ToString::to_string);
        Self {
            subtype: text("subtype"),
            is_error: value.get("is_error").and_then(Value::as_bool),
            result: text("result"),
            session_id: text("session_id"),
            cost_usd: value.get("cost_usd").and_then(amount_from_value),
            total_cost_usd: value.get("total_cost_usd").and_then(amount_from_value),
            duration_ms: value.get("duration_ms").and_then(count_from_value),
            usage: value
                .get("usage")
                .and_then(|usage| Usage::deserialize(usage).ok()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEventEnvelope {
    pub event: StreamEvent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: MessageStart,
    },
    ContentBlockDelta {
        delta: StreamDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<Usage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageStart {
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Token counters as reported by the vendor. Every field is optional: a
/// partial report only replaces the counters it carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_tokens: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub output_tokens: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_read_input_tokens: Option<u64>,
}

/// Non-negative integer, or a non-negative float truncated toward zero.
/// Anything else reads as absent.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count_from_value))
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(amount_from_value))
}

fn count_from_value(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as u64)
    })
}

fn amount_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_result_line() {
        let line = r#"{"type":"result","result":"the answer is 4","session_id":"sess-abc-123","cost_usd":0.003,"duration_ms":1234}"#;
        let Some(Envelope::Result(result)) = Envelope::from_line(line) else {
            panic!("expected result envelope");
        };
        assert_eq!(result.result.as_deref(), Some("the answer is 4"));
        assert_eq!(result.session_id.as_deref(), Some("sess-abc-123"));
        assert_eq!(result.reported_cost(), Some(0.003));
        assert_eq!(result.duration_ms, Some(1234));
    }

    #[test]
    fn total_cost_wins_over_legacy_cost() {
        let line = r#"{"type":"result","cost_usd":0.1,"total_cost_usd":0.25}"#;
        let Some(Envelope::Result(result)) = Envelope::from_line(line) else {
            panic!("expected result envelope");
        };
        assert_eq!(result.reported_cost(), Some(0.25));
    }

    #[test]
    fn assistant_keeps_only_text_blocks() {
        let line = r#"{"type":"assistant","session_id":"s1","message":{"content":[{"type":"text","text":"hi "},{"type":"tool_use","id":"t","name":"Read","input":{}},{"type":"text","text":"there"}],"usage":{"input_tokens":7,"output_tokens":3}}}"#;
        let Some(Envelope::Assistant(assistant)) = Envelope::from_line(line) else {
            panic!("expected assistant envelope");
        };
        let text: String = assistant.message.text_blocks().collect();
        assert_eq!(text, "hi there");
        assert_eq!(
            assistant.message.usage,
            Some(Usage {
                input_tokens: Some(7),
                output_tokens: Some(3),
                ..Usage::default()
            })
        );
    }

    #[test]
    fn nested_stream_events() {
        let delta = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"abc"}}}"#;
        assert_eq!(
            Envelope::from_line(delta),
            Some(Envelope::StreamEvent(StreamEventEnvelope {
                event: StreamEvent::ContentBlockDelta {
                    delta: StreamDelta::TextDelta {
                        text: "abc".to_string()
                    }
                }
            }))
        );

        let ping = r#"{"type":"stream_event","event":{"type":"ping"}}"#;
        assert_eq!(
            Envelope::from_line(ping),
            Some(Envelope::StreamEvent(StreamEventEnvelope {
                event: StreamEvent::Other
            }))
        );
    }

    #[test]
    fn compact_boundary_in_both_positions() {
        let top = r#"{"type":"compact_boundary","trigger":"auto"}"#;
        assert_eq!(Envelope::from_line(top), Some(Envelope::CompactBoundary));

        let system = r#"{"type":"system","subtype":"compact_boundary","session_id":"s"}"#;
        let Some(Envelope::System(system)) = Envelope::from_line(system) else {
            panic!("expected system envelope");
        };
        assert!(system.is_compact_boundary());
    }

    #[test]
    fn odd_numeric_fields_do_not_drop_a_result() {
        let line = r#"{"type":"result","result":"done","session_id":"s","duration_ms":1234.5,"total_cost_usd":"0.02","usage":{"input_tokens":-1,"output_tokens":9}}"#;
        let Some(Envelope::Result(result)) = Envelope::from_line(line) else {
            panic!("expected result envelope");
        };
        assert_eq!(result.result.as_deref(), Some("done"));
        assert_eq!(result.duration_ms, Some(1234));
        assert_eq!(result.reported_cost(), Some(0.02));
        assert_eq!(
            result.usage,
            Some(Usage {
                output_tokens: Some(9),
                ..Usage::default()
            })
        );
    }

    #[test]
    fn malformed_result_is_salvaged() {
        let line = r#"{"type":"result","result":"done","session_id":"s","is_error":"maybe","duration_ms":12}"#;
        let Some(Envelope::Result(result)) = Envelope::from_line(line) else {
            panic!("expected result envelope");
        };
        assert_eq!(result.result.as_deref(), Some("done"));
        assert_eq!(result.session_id.as_deref(), Some("s"));
        assert_eq!(result.is_error, None);
        assert_eq!(result.duration_ms, Some(12));

        // Only `result` lines are salvaged; other malformed kinds stay noise.
        let system = r#"{"type":"system","subtype":7}"#;
        assert_eq!(Envelope::from_line(system), None);
    }

    #[test]
    fn noise_is_rejected_and_unknown_kinds_fall_through() {
        assert_eq!(Envelope::from_line("warning: something odd"), None);
        assert_eq!(Envelope::from_line("   "), None);
        assert_eq!(Envelope::from_line(r#""quoted""#), None);
        assert_eq!(
            Envelope::from_line(r#"{"type":"user","message":{}}"#),
            Some(Envelope::Unrecognized)
        );
    }
}
