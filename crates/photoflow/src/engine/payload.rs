use serde::Deserialize;

use crate::engine::{EngineError, EngineState};
use crate::error::ExternalErrorKind;

/// Job object as the engine reports it, from either a status response or a
/// completion callback.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineJobPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default, alias = "output_url")]
    pub output: Option<EngineOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Some engines return a single URL, others a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EngineOutput {
    One(String),
    Many(Vec<String>),
}

impl EngineOutput {
    fn first(self) -> Option<String> {
        match self {
            EngineOutput::One(url) => Some(url),
            EngineOutput::Many(urls) => urls.into_iter().next(),
        }
        .filter(|u| !u.trim().is_empty())
    }
}

impl EngineJobPayload {
    pub fn into_state(self) -> Result<EngineState, EngineError> {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "starting" | "queued" | "processing" | "running" => Ok(EngineState::Pending),
            "succeeded" | "completed" => {
                let output_url = self.output.and_then(EngineOutput::first).ok_or_else(|| {
                    EngineError::new(
                        ExternalErrorKind::MalformedResponse,
                        "succeeded without an output url",
                    )
                })?;
                Ok(EngineState::Succeeded { output_url })
            }
            "failed" | "canceled" | "cancelled" | "error" => Ok(EngineState::Failed {
                error: self.error,
            }),
            other => Err(EngineError::new(
                ExternalErrorKind::MalformedResponse,
                format!("unknown engine status {other:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Result<EngineState, EngineError> {
        serde_json::from_value::<EngineJobPayload>(v)
            .unwrap()
            .into_state()
    }

    #[test]
    fn in_progress_states_are_pending() {
        for s in ["starting", "processing", "QUEUED"] {
            assert_eq!(parse(json!({ "status": s })).unwrap(), EngineState::Pending);
        }
    }

    #[test]
    fn success_takes_first_output() {
        let state = parse(json!({
            "status": "succeeded",
            "output": ["https://engine/out/1.png", "https://engine/out/2.png"]
        }))
        .unwrap();
        assert_eq!(
            state,
            EngineState::Succeeded {
                output_url: "https://engine/out/1.png".into()
            }
        );

        let state = parse(json!({ "status": "completed", "output_url": "https://e/o.mp4" })).unwrap();
        assert!(matches!(state, EngineState::Succeeded { .. }));
    }

    #[test]
    fn success_without_output_is_malformed() {
        let err = parse(json!({ "status": "succeeded" })).unwrap_err();
        assert_eq!(err.kind, ExternalErrorKind::MalformedResponse);
    }

    #[test]
    fn canceled_counts_as_failed() {
        let state = parse(json!({ "status": "canceled" })).unwrap();
        assert_eq!(state, EngineState::Failed { error: None });
    }

    #[test]
    fn unknown_status_is_malformed() {
        let err = parse(json!({ "status": "exploded" })).unwrap_err();
        assert!(!err.is_retryable());
    }
}
