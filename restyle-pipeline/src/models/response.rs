//! Caller-facing result shapes
//!
//! A terminal job maps onto exactly one of the response shapes below. The
//! styled audio URL is present iff every required stage succeeded.

use super::{
    ErrorKind, JobStatus, StageErrorRecord, StageName, StageStatus, Transcript,
    TransformationJob,
};
use serde::Serialize;
use uuid::Uuid;

/// Result body of a terminal job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransformationResponse {
    #[serde(rename_all = "camelCase")]
    Succeeded {
        styled_audio_url: String,
        transcript: Transcript,
        caption_url: String,
    },

    /// Transcription failed, so caption was never attempted
    #[serde(rename_all = "camelCase")]
    TranscriptionFailed {
        styled_audio_url: String,
        transcription_error: StageErrorRecord,
    },

    /// Only captioning failed; `captionUrl` is serialized as `null`
    #[serde(rename_all = "camelCase")]
    CaptionFailed {
        styled_audio_url: String,
        transcript: Transcript,
        caption_url: Option<String>,
        caption_error: StageErrorRecord,
    },

    /// A required stage failed; no audio URL
    #[serde(rename_all = "camelCase")]
    Failed {
        failed_stage: Option<StageName>,
        error: StageErrorRecord,
    },

    #[serde(rename_all = "camelCase")]
    Cancelled { error: StageErrorRecord },
}

impl TransformationResponse {
    /// Build the response of a terminal job, `None` while it is still running
    pub fn from_job(job: &TransformationJob) -> Option<Self> {
        match job.status {
            JobStatus::Pending | JobStatus::Running => None,
            JobStatus::Cancelled => Some(Self::Cancelled {
                error: StageErrorRecord::new(ErrorKind::Cancelled, "Job cancelled"),
            }),
            JobStatus::Failed => {
                let error = job
                    .failed_stage
                    .and_then(|stage| job.stage(stage).error.clone())
                    .unwrap_or_else(|| {
                        StageErrorRecord::new(ErrorKind::Storage, "Job failed")
                    });
                Some(Self::Failed {
                    failed_stage: job.failed_stage,
                    error,
                })
            }
            JobStatus::Succeeded | JobStatus::PartiallySucceeded => {
                let styled_audio_url = job.styled_audio_url.clone()?;
                let transcribe = job.stage(StageName::Transcribe);
                let caption = job.stage(StageName::Caption);

                let transcript = match (&job.transcript, transcribe.status) {
                    (Some(transcript), StageStatus::Succeeded) => transcript.clone(),
                    _ => {
                        let transcription_error = transcribe.error.clone().unwrap_or_else(|| {
                            StageErrorRecord::new(
                                ErrorKind::Transcription,
                                "Transcript unavailable",
                            )
                        });
                        return Some(Self::TranscriptionFailed {
                            styled_audio_url,
                            transcription_error,
                        });
                    }
                };

                match (&job.caption_url, caption.status) {
                    (Some(caption_url), StageStatus::Succeeded) => Some(Self::Succeeded {
                        styled_audio_url,
                        transcript,
                        caption_url: caption_url.clone(),
                    }),
                    _ => {
                        let caption_error = caption.error.clone().unwrap_or_else(|| {
                            StageErrorRecord::new(ErrorKind::Caption, "Caption unavailable")
                        });
                        Some(Self::CaptionFailed {
                            styled_audio_url,
                            transcript,
                            caption_url: None,
                            caption_error,
                        })
                    }
                }
            }
        }
    }

    pub fn styled_audio_url(&self) -> Option<&str> {
        match self {
            Self::Succeeded {
                styled_audio_url, ..
            }
            | Self::TranscriptionFailed {
                styled_audio_url, ..
            }
            | Self::CaptionFailed {
                styled_audio_url, ..
            } => Some(styled_audio_url),
            Self::Failed { .. } | Self::Cancelled { .. } => None,
        }
    }
}

/// `GET /jobs/{id}/result` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(flatten)]
    pub body: TransformationResponse,
}

impl JobResultResponse {
    pub fn from_job(job: &TransformationJob) -> Option<Self> {
        TransformationResponse::from_job(job).map(|body| Self {
            job_id: job.id,
            status: job.status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TranscriptSegment, TransformationRequest};
    use crate::orchestrator::state_machine::PipelineState;

    fn job() -> TransformationJob {
        TransformationJob::new(TransformationRequest {
            source_reference: "ref-A".to_string(),
            target_style: "rock".to_string(),
        })
    }

    fn transcript() -> Transcript {
        Transcript {
            segments: vec![TranscriptSegment {
                start_time: 0.0,
                end_time: None,
                text: "la".to_string(),
            }],
        }
    }

    #[test]
    fn test_running_job_has_no_response() {
        let mut job = job();
        job.set_state(PipelineState::Separating);
        assert!(JobResultResponse::from_job(&job).is_none());
    }

    #[test]
    fn test_full_success_shape() {
        let mut job = job();
        job.styled_audio_url = Some("http://h/a.wav".to_string());
        job.caption_url = Some("http://h/a.lrc".to_string());
        job.transcript = Some(transcript());
        job.complete_stage(StageName::Transcribe, None);
        job.complete_stage(StageName::Caption, None);
        job.set_state(PipelineState::Succeeded);

        let json = serde_json::to_value(JobResultResponse::from_job(&job).unwrap()).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["styledAudioUrl"], "http://h/a.wav");
        assert_eq!(json["captionUrl"], "http://h/a.lrc");
        assert_eq!(json["transcript"][0]["text"], "la");
    }

    #[test]
    fn test_transcription_failure_shape_omits_caption_url() {
        let mut job = job();
        job.styled_audio_url = Some("http://h/a.wav".to_string());
        job.fail_stage(
            StageName::Transcribe,
            StageErrorRecord::new(ErrorKind::Transcription, "exit 1"),
        );
        job.skip_stage(StageName::Caption, "no transcript");
        job.set_state(PipelineState::PartiallySucceeded);

        let json = serde_json::to_value(JobResultResponse::from_job(&job).unwrap()).unwrap();
        assert_eq!(json["styledAudioUrl"], "http://h/a.wav");
        assert_eq!(json["transcriptionError"]["kind"], "TRANSCRIPTION");
        assert!(json.get("captionUrl").is_none());
        assert!(json.get("transcript").is_none());
    }

    #[test]
    fn test_caption_failure_shape_has_null_caption_url() {
        let mut job = job();
        job.styled_audio_url = Some("http://h/a.wav".to_string());
        job.transcript = Some(transcript());
        job.complete_stage(StageName::Transcribe, None);
        job.fail_stage(
            StageName::Caption,
            StageErrorRecord::new(ErrorKind::Caption, "disk full"),
        );
        job.set_state(PipelineState::PartiallySucceeded);

        let json = serde_json::to_value(JobResultResponse::from_job(&job).unwrap()).unwrap();
        assert!(json["captionUrl"].is_null());
        assert_eq!(json["captionError"]["kind"], "CAPTION");
        assert_eq!(json["transcript"][0]["text"], "la");
    }

    #[test]
    fn test_failed_shape_has_no_audio_url() {
        let mut job = job();
        job.fail_stage(
            StageName::Fetch,
            StageErrorRecord::new(ErrorKind::InvalidReference, "unresolvable"),
        );
        job.set_state(PipelineState::Failed);

        let response = JobResultResponse::from_job(&job).unwrap();
        assert!(response.body.styled_audio_url().is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["failedStage"], "fetch");
        assert_eq!(json["error"]["kind"], "INVALID_REFERENCE");
        assert!(json.get("styledAudioUrl").is_none());
    }
}
