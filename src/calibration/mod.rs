//! The calibration pipeline: template, remote call, parse, score.
//!
//! A job's content is framed with a wrapper template, sent to the remote
//! model through the retrying client, parsed into six structured fields,
//! and scored. Refusals are handled above the transport: a refused reply
//! is re-asked with an explicit rephrase instruction under its own
//! attempt budget, independent of transport retries.
//!
//! Failure surface per job:
//! - missing wrapper template: terminal, not retried
//! - transport budget exhausted: terminal with the last transport error
//! - refusal budget exhausted: terminal, distinct from transport failure
//! - parse anomalies: never terminal; unmatched fields score low

pub mod client;
pub mod parser;
pub mod scorer;
pub mod wrapper;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CalibrationConfig;

pub use client::{
    is_refusal, HttpTransport, ModelClient, ModelReply, ModelRequest, ModelTransport,
    TransportError,
};
pub use parser::{FieldKind, FieldMap, FieldParser, Terminology, FIELD_COUNT};
pub use scorer::{
    FieldReference, FieldScore, QualityScore, QualityScorer, ReferenceLibrary, ScoreMode,
    ScoreStatus, ScorerError,
};
pub use wrapper::{build_prompt, WrapperError, WrapperLibrary};

/// Errors that can occur during calibration.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// The configured wrapper template is missing or unreadable.
    #[error("Wrapper error: {0}")]
    Wrapper(#[from] WrapperError),

    /// The transport retry budget was exhausted.
    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),

    /// The model kept refusing after every rephrase attempt.
    #[error("Model refused after {attempts} rephrase attempt(s)")]
    Refused { attempts: u32 },

    /// Reference definitions could not be loaded.
    #[error("Scorer error: {0}")]
    Scorer(#[from] ScorerError),
}

/// Result of calibrating one job. Attached to the job's metadata on
/// success and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Whether calibration succeeded. Always true on the success path;
    /// kept explicit because the record outlives the job's location.
    pub success: bool,
    /// Raw model response text.
    pub response: String,
    /// Terminology the response was parsed under.
    pub terminology: Terminology,
    /// Extracted field texts, keyed by canonical field name. Unmatched
    /// fields are absent.
    pub fields: BTreeMap<String, String>,
    /// Weighted quality score.
    pub score: QualityScore,
    /// Wall-clock duration of the calibration, in milliseconds.
    pub duration_ms: u64,
    /// Transport retries consumed across all calls for this job.
    pub transport_retries: u32,
    /// Rephrase attempts consumed by refusal handling.
    pub refusal_attempts: u32,
    /// Short session identifier of the calibrator instance.
    pub session_id: String,
    /// Identifier of the worker that produced this result.
    #[serde(default)]
    pub worker_id: Option<String>,
}

/// The calibration pipeline over a pluggable transport.
pub struct Calibrator<T: ModelTransport> {
    wrappers: WrapperLibrary,
    wrapper_name: String,
    client: ModelClient<T>,
    parser: FieldParser,
    scorer: QualityScorer,
    config: CalibrationConfig,
    session_id: String,
}

impl<T: ModelTransport> Calibrator<T> {
    /// Creates a calibrator from configuration and a transport.
    ///
    /// Loads the reference library if one is configured; without it the
    /// scorer runs in legacy structural mode.
    pub fn new(config: CalibrationConfig, transport: T) -> Result<Self, CalibrationError> {
        let scorer = match &config.references_path {
            Some(path) => {
                let references = ReferenceLibrary::from_yaml_file(path)?;
                QualityScorer::with_references(references)
            }
            None => QualityScorer::legacy(),
        };

        Ok(Self {
            wrappers: WrapperLibrary::new(config.wrapper_dir.clone()),
            wrapper_name: config.wrapper_name.clone(),
            client: ModelClient::from_config(transport, &config),
            parser: FieldParser::new(),
            scorer,
            config,
            session_id: Uuid::new_v4().to_string()[..8].to_string(),
        })
    }

    /// Returns the active scoring mode.
    pub fn score_mode(&self) -> ScoreMode {
        self.scorer.mode()
    }

    /// Runs one job's content through the full pipeline.
    pub async fn calibrate(&self, content: &str) -> Result<CalibrationResult, CalibrationError> {
        let wrapper = self.wrappers.load(&self.wrapper_name)?;
        let start = Instant::now();

        let mut refusal_attempts = 0u32;
        let mut transport_retries = 0u32;

        let reply = loop {
            let prompt = if refusal_attempts == 0 {
                build_prompt(&wrapper, content)
            } else {
                // A refusal is not a transport failure: re-ask with an
                // explicit instruction to phrase the answer differently.
                build_prompt(
                    &wrapper,
                    &format!(
                        "{content}\n\n(Attempt {}: try again, phrase it differently.)",
                        refusal_attempts + 1
                    ),
                )
            };

            let request = ModelRequest::from_config(prompt, &self.config);
            let reply = self.client.send(&request).await?;
            transport_retries += reply.retries;

            if is_refusal(&reply.text) {
                refusal_attempts += 1;
                warn!(
                    session_id = %self.session_id,
                    attempt = refusal_attempts,
                    max_attempts = self.config.max_refusal_attempts,
                    "Model refused, rephrasing"
                );
                if refusal_attempts > self.config.max_refusal_attempts {
                    return Err(CalibrationError::Refused {
                        attempts: self.config.max_refusal_attempts,
                    });
                }
                continue;
            }
            break reply;
        };

        let fields = self.parser.parse(&reply.text);
        let score = self.scorer.score(&fields, &reply.text);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            session_id = %self.session_id,
            terminology = %fields.terminology,
            present = fields.present_count(),
            "Parsed calibration response"
        );
        info!(
            session_id = %self.session_id,
            score = score.total,
            duration_ms,
            transport_retries,
            "Calibration complete"
        );

        let field_texts = fields
            .iter()
            .filter_map(|(kind, value)| {
                value.map(|v| (kind.canonical().to_string(), v.to_string()))
            })
            .collect();

        Ok(CalibrationResult {
            success: true,
            response: reply.text,
            terminology: fields.terminology,
            fields: field_texts,
            score,
            duration_ms,
            transport_retries,
            refusal_attempts,
            session_id: self.session_id.clone(),
            worker_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    const GOOD_RESPONSE: &str = "\
1. DRIFT: Toward authority.
2. BACKGROUND PATTERN: Repetition of appeals.
3. PRESSURE FACTORS: Urgency framing.
4. DEPTH: Two layers.
5. IMPACT: Positions harden.
6. PLAIN TEXT: Urgency over evidence.";

    /// Transport returning canned replies in order, then repeating the
    /// last one. Records every prompt it served.
    struct ScriptedTransport {
        replies: Vec<String>,
        calls: AtomicU32,
        prompts: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.to_string()).collect(),
                calls: AtomicU32::new(0),
                prompts: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        async fn send(&self, request: &ModelRequest) -> Result<String, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.prompts
                .lock()
                .expect("prompt log")
                .push(request.prompt.clone());
            let index = call.min(self.replies.len() - 1);
            Ok(self.replies[index].clone())
        }
    }

    /// Delegating handle so a test can keep inspecting a transport that
    /// was moved into a calibrator.
    #[derive(Clone)]
    struct SharedTransport(std::sync::Arc<ScriptedTransport>);

    #[async_trait]
    impl ModelTransport for SharedTransport {
        async fn send(&self, request: &ModelRequest) -> Result<String, TransportError> {
            self.0.send(request).await
        }
    }

    fn test_config(dir: &std::path::Path) -> CalibrationConfig {
        std::fs::write(dir.join("wrapper_standard.txt"), "ANALYSIS FRAME:\n\n")
            .expect("write wrapper");
        let mut config = CalibrationConfig::default();
        config.wrapper_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_calibrate_success() {
        let dir = tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let calibrator =
            Calibrator::new(config, ScriptedTransport::new(&[GOOD_RESPONSE])).expect("calibrator");

        let result = calibrator
            .calibrate("What pulls this argument?")
            .await
            .expect("calibration should succeed");

        assert!(result.success);
        assert_eq!(result.terminology, Terminology::Plain);
        assert_eq!(result.fields.len(), 6);
        assert_eq!(result.transport_retries, 0);
        assert_eq!(result.refusal_attempts, 0);
        assert_eq!(result.score.mode, ScoreMode::Legacy);
        assert_eq!(result.session_id.len(), 8);
    }

    #[tokio::test]
    async fn test_calibrate_missing_wrapper_is_terminal() {
        let dir = tempdir().expect("tempdir");
        let mut config = CalibrationConfig::default();
        config.wrapper_dir = dir.path().to_path_buf();
        config.wrapper_name = "absent".to_string();

        let calibrator =
            Calibrator::new(config, ScriptedTransport::new(&[GOOD_RESPONSE])).expect("calibrator");
        let err = calibrator
            .calibrate("content")
            .await
            .expect_err("missing wrapper must fail");

        assert!(matches!(err, CalibrationError::Wrapper(_)));
    }

    #[tokio::test]
    async fn test_calibrate_retries_refusal_then_succeeds() {
        let dir = tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let transport =
            ScriptedTransport::new(&["I'm sorry, but I can't help with that.", GOOD_RESPONSE]);
        let calibrator = Calibrator::new(config, transport).expect("calibrator");

        let result = calibrator
            .calibrate("content")
            .await
            .expect("second phrasing should succeed");

        assert_eq!(result.refusal_attempts, 1);
        assert!(result.fields.contains_key("drift"));
    }

    #[tokio::test]
    async fn test_calibrate_refusal_budget_exhausted() {
        let dir = tempdir().expect("tempdir");
        let mut config = test_config(dir.path());
        config.max_refusal_attempts = 2;

        let transport = ScriptedTransport::new(&["I cannot help with that."]);
        let calibrator = Calibrator::new(config, transport).expect("calibrator");

        let err = calibrator
            .calibrate("content")
            .await
            .expect_err("persistent refusal must fail");

        assert!(matches!(err, CalibrationError::Refused { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_calibrate_rephrase_instruction_sent() {
        let dir = tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let transport =
            std::sync::Arc::new(ScriptedTransport::new(&["I'm sorry, but no.", GOOD_RESPONSE]));
        let calibrator =
            Calibrator::new(config, SharedTransport(transport.clone())).expect("calibrator");

        calibrator.calibrate("content").await.expect("succeeds");

        let prompts = transport.prompts.lock().expect("prompt log");
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("ANALYSIS FRAME:"));
        assert!(!prompts[0].contains("phrase it differently"));
        assert!(prompts[1].contains("phrase it differently"));
    }

    #[tokio::test]
    async fn test_calibrate_partial_response_still_completes() {
        let dir = tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let transport = ScriptedTransport::new(&["1. DRIFT: only this section"]);
        let calibrator = Calibrator::new(config, transport).expect("calibrator");

        let result = calibrator
            .calibrate("content")
            .await
            .expect("parse anomalies are not terminal");

        assert_eq!(result.fields.len(), 1);
        assert!(result.score.total < 50);
    }

    #[test]
    fn test_result_serialization_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let result = tokio::runtime::Runtime::new()
            .expect("runtime")
            .block_on(async {
                Calibrator::new(config, ScriptedTransport::new(&[GOOD_RESPONSE]))
                    .expect("calibrator")
                    .calibrate("content")
                    .await
                    .expect("success")
            });

        let json = serde_json::to_string(&result).expect("serialize");
        let parsed: CalibrationResult = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, result);
    }
}
