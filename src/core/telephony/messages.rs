//! Twilio Media Streams wire messages.
//!
//! Inbound events arrive as JSON text frames tagged by `event`. Outbound
//! messages (`media`, `mark`, `clear`) are addressed by `streamSid`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Events sent by the telephony provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioInbound {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMetadata,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Dtmf {
        dtmf: DtmfPayload,
    },
    Stop {
        #[serde(default)]
        stop: Option<StopMetadata>,
    },
    /// Events this relay does not act on.
    #[serde(other)]
    Unknown,
}

impl TwilioInbound {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub call_sid: String,
    pub stream_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    /// Base64 μ-law audio.
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MediaPayload {
    /// Whether this chunk carries the caller's audio.
    pub fn is_inbound(&self) -> bool {
        self.track.as_deref().is_none_or(|track| track == "inbound")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMetadata {
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
}

/// Messages sent to the telephony provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioOutbound {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl TwilioOutbound {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        TwilioOutbound::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    pub fn mark(stream_sid: &str, name: impl Into<String>) -> Self {
        TwilioOutbound::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        TwilioOutbound::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start() {
        let text = json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ123",
            "start": {
                "accountSid": "AC123",
                "streamSid": "MZ123",
                "callSid": "CA123",
                "tracks": ["inbound"],
                "customParameters": {"campaign": "spring"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        })
        .to_string();

        match TwilioInbound::parse(&text).unwrap() {
            TwilioInbound::Start { stream_sid, start } => {
                assert_eq!(stream_sid.as_deref(), Some("MZ123"));
                assert_eq!(start.call_sid, "CA123");
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.custom_parameters["campaign"], "spring");
                let format = start.media_format.unwrap();
                assert_eq!(format.encoding, "audio/x-mulaw");
                assert_eq!(format.sample_rate, 8000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_mark_dtmf_stop() {
        let media = TwilioInbound::parse(
            r#"{"event":"media","sequenceNumber":"3","streamSid":"MZ1","media":{"track":"inbound","chunk":"1","timestamp":"5","payload":"//8="}}"#,
        )
        .unwrap();
        match media {
            TwilioInbound::Media { media } => {
                assert_eq!(media.payload, "//8=");
                assert!(media.is_inbound());
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            TwilioInbound::parse(r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"turn-1"}}"#)
                .unwrap(),
            TwilioInbound::Mark {
                mark: MarkPayload {
                    name: "turn-1".to_string()
                }
            }
        );

        assert!(matches!(
            TwilioInbound::parse(r#"{"event":"dtmf","dtmf":{"track":"inbound_track","digit":"5"}}"#)
                .unwrap(),
            TwilioInbound::Dtmf { dtmf } if dtmf.digit == "5"
        ));

        assert!(matches!(
            TwilioInbound::parse(r#"{"event":"stop","stop":{"callSid":"CA1"}}"#).unwrap(),
            TwilioInbound::Stop { .. }
        ));
    }

    #[test]
    fn test_unknown_event_tolerated() {
        assert_eq!(
            TwilioInbound::parse(r#"{"event":"something_new","foo":1}"#).unwrap(),
            TwilioInbound::Unknown
        );
        assert!(TwilioInbound::parse("not json").is_err());
    }

    #[test]
    fn test_outbound_track_ignored() {
        let media = MediaPayload {
            payload: String::new(),
            track: Some("outbound".to_string()),
            chunk: None,
            timestamp: None,
        };
        assert!(!media.is_inbound());
    }

    #[test]
    fn test_outbound_serialization() {
        let media: serde_json::Value =
            serde_json::from_str(&TwilioOutbound::media("MZ1", "AAAA".to_string()).to_json().unwrap())
                .unwrap();
        assert_eq!(
            media,
            json!({"event": "media", "streamSid": "MZ1", "media": {"payload": "AAAA"}})
        );

        let clear: serde_json::Value =
            serde_json::from_str(&TwilioOutbound::clear("MZ1").to_json().unwrap()).unwrap();
        assert_eq!(clear, json!({"event": "clear", "streamSid": "MZ1"}));

        let mark: serde_json::Value =
            serde_json::from_str(&TwilioOutbound::mark("MZ1", "turn-2").to_json().unwrap())
                .unwrap();
        assert_eq!(
            mark,
            json!({"event": "mark", "streamSid": "MZ1", "mark": {"name": "turn-2"}})
        );
    }
}
