//! Speech provider running long-running recognition operations

use crate::error::{TranscriptionError, TranscriptionResult};
use crate::types::{AudioEncoding, RecognitionOptions};
use async_trait::async_trait;
use chunkscribe_core::ProviderConfig;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Handle of a submitted provider operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// Provider-assigned operation name
    pub name: String,
}

/// One recognized segment with its alternatives, best first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Alternative transcripts
    pub alternatives: Vec<String>,
}

impl RecognitionResult {
    /// Result with a single alternative
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            alternatives: vec![text.into()],
        }
    }
}

/// Join the best alternative of each result with single spaces
///
/// Results without alternatives are skipped.
pub fn join_transcript(results: &[RecognitionResult]) -> String {
    results
        .iter()
        .filter_map(|result| result.alternatives.first())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// External speech-to-text provider
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Start recognition of the audio at `uri`
    async fn submit(
        &self,
        uri: &str,
        options: &RecognitionOptions,
    ) -> TranscriptionResult<OperationHandle>;

    /// Wait for the operation to finish, failing with
    /// [`TranscriptionError::ProviderTimeout`] after `timeout`
    async fn await_result(
        &self,
        handle: &OperationHandle,
        timeout: Duration,
    ) -> TranscriptionResult<Vec<RecognitionResult>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: AudioEncoding,
    sample_rate_hertz: u32,
    language_code: &'a str,
    enable_automatic_punctuation: bool,
    model: &'a str,
    use_enhanced: bool,
    enable_word_time_offsets: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    diarization_config: Option<DiarizationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiarizationConfig {
    enable_speaker_diarization: bool,
    min_speaker_count: u32,
    max_speaker_count: u32,
}

#[derive(Debug, Serialize)]
struct RecognitionAudio<'a> {
    uri: &'a str,
}

impl<'a> RecognizeRequest<'a> {
    fn new(uri: &'a str, options: &'a RecognitionOptions) -> Self {
        Self {
            config: RecognitionConfig {
                encoding: options.encoding,
                sample_rate_hertz: options.sample_rate_hertz,
                language_code: &options.language_code,
                enable_automatic_punctuation: options.enable_automatic_punctuation,
                model: &options.model,
                use_enhanced: options.use_enhanced,
                enable_word_time_offsets: options.enable_word_time_offsets,
                diarization_config: options.diarization_speaker_count.map(|count| {
                    DiarizationConfig {
                        enable_speaker_diarization: true,
                        min_speaker_count: count,
                        max_speaker_count: count,
                    }
                }),
            },
            audio: RecognitionAudio { uri },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<RecognizeResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<SpeechResult>,
}

#[derive(Debug, Deserialize)]
struct SpeechResult {
    #[serde(default)]
    alternatives: Vec<SpeechAlternative>,
}

#[derive(Debug, Deserialize)]
struct SpeechAlternative {
    #[serde(default)]
    transcript: String,
}

/// Google Cloud Speech-to-Text over its REST API
#[derive(Debug, Clone)]
pub struct GoogleSpeechProvider {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
    poll_interval: Duration,
}

impl GoogleSpeechProvider {
    /// Create a provider from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &ProviderConfig) -> TranscriptionResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            TranscriptionError::configuration(format!(
                "invalid provider base_url {}: {e}",
                config.base_url
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TranscriptionError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> TranscriptionResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TranscriptionError::configuration("provider base_url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_operation(&self, name: &str) -> TranscriptionResult<Operation> {
        let url = self.endpoint(&["v1p1beta1", "operations", name])?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| TranscriptionError::provider_failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::provider_failure(format!(
                "operation {name} returned HTTP {status}: {}",
                body.trim()
            )));
        }

        response.json().await.map_err(|e| {
            TranscriptionError::provider_failure(format!("malformed operation {name}: {e}"))
        })
    }

    async fn poll_until_done(
        &self,
        handle: &OperationHandle,
    ) -> TranscriptionResult<Vec<RecognitionResult>> {
        loop {
            let operation = self.fetch_operation(&handle.name).await?;

            if !operation.done {
                debug!("Operation {} still running", operation.name);
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            if let Some(error) = operation.error {
                return Err(TranscriptionError::provider_failure(format!(
                    "operation {} failed with code {}: {}",
                    operation.name, error.code, error.message
                )));
            }

            let results = operation
                .response
                .unwrap_or_default()
                .results
                .into_iter()
                .map(|result| RecognitionResult {
                    alternatives: result
                        .alternatives
                        .into_iter()
                        .map(|alternative| alternative.transcript)
                        .collect(),
                })
                .collect::<Vec<_>>();

            info!(
                "Operation {} finished with {} result(s)",
                operation.name,
                results.len()
            );
            return Ok(results);
        }
    }
}

#[async_trait]
impl SpeechProvider for GoogleSpeechProvider {
    async fn submit(
        &self,
        uri: &str,
        options: &RecognitionOptions,
    ) -> TranscriptionResult<OperationHandle> {
        let url = self.endpoint(&["v1p1beta1", "speech:longrunningrecognize"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&RecognizeRequest::new(uri, options))
            .send()
            .await
            .map_err(|e| TranscriptionError::provider_failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::provider_failure(format!(
                "recognize returned HTTP {status}: {}",
                body.trim()
            )));
        }

        let operation: Operation = response.json().await.map_err(|e| {
            TranscriptionError::provider_failure(format!("malformed recognize response: {e}"))
        })?;
        info!("Submitted {uri} as operation {}", operation.name);
        Ok(OperationHandle {
            name: operation.name,
        })
    }

    async fn await_result(
        &self,
        handle: &OperationHandle,
        timeout: Duration,
    ) -> TranscriptionResult<Vec<RecognitionResult>> {
        tokio::time::timeout(timeout, self.poll_until_done(handle))
            .await
            .map_err(|_| TranscriptionError::provider_timeout(timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> GoogleSpeechProvider {
        let config = ProviderConfig {
            base_url: server.uri(),
            poll_interval_ms: 10,
            ..ProviderConfig::default()
        };
        GoogleSpeechProvider::new(&config).unwrap()
    }

    fn handle(name: &str) -> OperationHandle {
        OperationHandle {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_join_transcript() {
        let results = vec![
            RecognitionResult::single("hello"),
            RecognitionResult::default(),
            RecognitionResult {
                alternatives: vec!["world".to_string(), "word".to_string()],
            },
        ];
        assert_eq!(join_transcript(&results), "hello world");
        assert_eq!(join_transcript(&[]), "");
    }

    #[test]
    fn test_chunk_request_has_no_diarization() {
        let provider = ProviderConfig::default();
        let options = RecognitionOptions::chunk(&provider);
        let body = serde_json::to_value(RecognizeRequest::new("gs://b/c.flac", &options)).unwrap();
        assert_eq!(body["config"]["encoding"], "FLAC");
        assert_eq!(body["config"]["sampleRateHertz"], 16_000);
        assert_eq!(body["config"]["enableWordTimeOffsets"], false);
        assert!(body["config"].get("diarizationConfig").is_none());
        assert_eq!(body["audio"]["uri"], "gs://b/c.flac");
    }

    #[tokio::test]
    async fn test_submit_returns_operation_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1p1beta1/speech:longrunningrecognize"))
            .and(body_partial_json(json!({
                "config": {
                    "encoding": "MP3",
                    "languageCode": "en-US",
                    "model": "video",
                    "useEnhanced": true,
                    "diarizationConfig": {"enableSpeakerDiarization": true, "minSpeakerCount": 2}
                },
                "audio": {"uri": "gs://autoquiz/job.mp3"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "op-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let options = RecognitionOptions::capture(&ProviderConfig::default());
        let handle = provider_for(&server)
            .submit("gs://autoquiz/job.mp3", &options)
            .await
            .unwrap();
        assert_eq!(handle.name, "op-1");
    }

    #[tokio::test]
    async fn test_await_polls_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1p1beta1/operations/op-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "op-2"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1p1beta1/operations/op-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "op-2",
                "done": true,
                "response": {"results": [
                    {"alternatives": [{"transcript": "hello"}]},
                    {"alternatives": []},
                    {"alternatives": [{"transcript": "world"}]}
                ]}
            })))
            .mount(&server)
            .await;

        let results = provider_for(&server)
            .await_result(&handle("op-2"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(join_transcript(&results), "hello world");
    }

    #[tokio::test]
    async fn test_operation_error_is_provider_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1p1beta1/operations/op-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "op-3",
                "done": true,
                "error": {"code": 3, "message": "bad audio"}
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .await_result(&handle("op-3"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::ProviderFailure { .. }));
        assert!(err.to_string().contains("bad audio"));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1p1beta1/operations/op-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "op-4"})))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .await_result(&handle("op-4"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::ProviderTimeout { .. }));
    }

    #[tokio::test]
    async fn test_submit_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthenticated"))
            .mount(&server)
            .await;

        let options = RecognitionOptions::whole_file(&ProviderConfig::default());
        let err = provider_for(&server)
            .submit("gs://autoquiz/job.flac", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::ProviderFailure { .. }));
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_provider_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1p1beta1/speech:longrunningrecognize"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1p1beta1/operations/op-5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": "yes"})))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let options = RecognitionOptions::whole_file(&ProviderConfig::default());
        let err = provider
            .submit("gs://autoquiz/job.flac", &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);

        let err = provider
            .await_result(&handle("op-5"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
        assert!(err.to_string().contains("malformed operation op-5"), "{err}");
    }
}
