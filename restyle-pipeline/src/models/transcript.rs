//! Time-aligned transcript
//!
//! The transcriber prints JSON on stdout, either a bare array of segments or
//! a Whisper-style `{ "segments": [...] }` object. Start/end times are in
//! seconds.

use serde::{Deserialize, Serialize};

/// One transcript line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    pub text: String,
}

/// Ordered list of segments, serialized as a bare array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Deserialize)]
struct RawSegment {
    #[serde(alias = "startTime", alias = "start_time")]
    start: f64,
    #[serde(default, alias = "endTime", alias = "end_time")]
    end: Option<f64>,
    text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTranscript {
    List(Vec<RawSegment>),
    Wrapped { segments: Vec<RawSegment> },
}

impl Transcript {
    /// Parse transcriber output
    ///
    /// Segments are sorted by start time and blank lines are dropped. Returns
    /// a human-readable reason on malformed input.
    pub fn parse_json(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err("transcriber produced no output".to_string());
        }

        let raw: RawTranscript = serde_json::from_str(trimmed)
            .map_err(|e| format!("transcriber output is not a valid transcript: {}", e))?;

        let raw_segments = match raw {
            RawTranscript::List(segments) => segments,
            RawTranscript::Wrapped { segments } => segments,
        };

        let mut segments = Vec::with_capacity(raw_segments.len());
        for (index, raw) in raw_segments.into_iter().enumerate() {
            if !raw.start.is_finite() || raw.start < 0.0 {
                return Err(format!(
                    "segment {} has invalid start time {}",
                    index, raw.start
                ));
            }
            let end = raw.end.filter(|e| e.is_finite() && *e >= raw.start);
            let text = raw.text.trim();
            if text.is_empty() {
                continue;
            }
            segments.push(TranscriptSegment {
                start_time: raw.start,
                end_time: end,
                text: text.to_string(),
            });
        }

        segments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        Ok(Self { segments })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}
