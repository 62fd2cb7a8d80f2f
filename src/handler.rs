use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::{Config, FormatTarget},
    error::{ErrorBody, ResolveError},
    extractor::{MediaExtractor, MediaResponse, YtDlpExtractor, extract_best},
    proxy::ProxyAcquirer,
};

/// The `{statusCode, body}` envelope returned for every invocation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationOutput {
    pub status_code: u16,
    pub body: OutputBody,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutputBody {
    Media(MediaResponse),
    Error(ErrorBody),
}

impl InvocationOutput {
    fn success(media: MediaResponse) -> Self {
        Self {
            status_code: StatusCode::OK.as_u16(),
            body: OutputBody::Media(media),
        }
    }

    fn failure(error: &ResolveError) -> Self {
        Self {
            status_code: error.status().as_u16(),
            body: OutputBody::Error(error.body()),
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// The `uri` field of an event, if it is a non-blank string.
pub fn requested_uri(event: &Value) -> Option<&str> {
    event
        .get("uri")?
        .as_str()
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
}

/// Runs one invocation: validate, acquire a proxy, extract, shape the reply.
pub struct Resolver {
    acquirer: Option<ProxyAcquirer>,
    extractor: Arc<dyn MediaExtractor>,
    target: FormatTarget,
}

impl Resolver {
    /// `acquirer: None` extracts without a proxy.
    pub fn new(
        acquirer: Option<ProxyAcquirer>,
        extractor: Arc<dyn MediaExtractor>,
        target: FormatTarget,
    ) -> Self {
        Self {
            acquirer,
            extractor,
            target,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let acquirer = config
            .proxy
            .enabled
            .then(|| ProxyAcquirer::from_config(&config.proxy));
        let extractor = YtDlpExtractor::new(config.extractor.clone());
        Self::new(acquirer, Arc::new(extractor), config.target.clone())
    }

    pub async fn handle(&self, event: &Value) -> InvocationOutput {
        let span = info_span!("invocation", request_id = %Uuid::new_v4());

        async move {
            debug!(%event, "event");
            match self.resolve(event).await {
                Ok(media) => {
                    info!("Resolved {}", media.video_url.as_deref().unwrap_or("<no url>"));
                    InvocationOutput::success(media)
                }
                Err(error) => {
                    warn!(code = error.code(), "Invocation failed: {error}");
                    InvocationOutput::failure(&error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn resolve(&self, event: &Value) -> Result<MediaResponse, ResolveError> {
        let uri = requested_uri(event).ok_or(ResolveError::MissingUri)?;

        let proxy = match &self.acquirer {
            Some(acquirer) => Some(acquirer.acquire().await?),
            None => None,
        };

        extract_best(self.extractor.as_ref(), uri, proxy.as_ref(), &self.target).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        extractor::ExtractionResult,
        proxy::{ProxyCandidate, ProxyListSource, ProxyProbe},
    };

    const FIXTURE: &str = include_str!("../fixtures/youtube_info.json");

    struct StaticList(&'static str);

    #[async_trait]
    impl ProxyListSource for StaticList {
        async fn fetch(&self) -> Result<String, ResolveError> {
            Ok(self.0.to_string())
        }
    }

    struct AcceptOnly(&'static str);

    #[async_trait]
    impl ProxyProbe for AcceptOnly {
        async fn probe(&self, candidate: &ProxyCandidate) -> bool {
            candidate.as_str() == self.0
        }
    }

    struct RecordingExtractor {
        output: Result<&'static str, &'static str>,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl RecordingExtractor {
        fn returning(json: &'static str) -> Arc<Self> {
            Arc::new(Self {
                output: Ok(json),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                output: Err(message),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaExtractor for RecordingExtractor {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn extract(
            &self,
            uri: &str,
            proxy: Option<&ProxyCandidate>,
        ) -> Result<ExtractionResult, ResolveError> {
            self.calls
                .lock()
                .unwrap()
                .push((uri.to_string(), proxy.map(ToString::to_string)));
            match self.output {
                Ok(json) => Ok(serde_json::from_str(json).unwrap()),
                Err(message) => Err(ResolveError::Extraction(message.to_string())),
            }
        }
    }

    fn acquirer(list: &'static str, healthy: &'static str) -> ProxyAcquirer {
        ProxyAcquirer::new(Arc::new(StaticList(list)), Arc::new(AcceptOnly(healthy)))
            .with_delay(tokio::time::Duration::ZERO)
    }

    fn resolver(acquirer: Option<ProxyAcquirer>, extractor: Arc<RecordingExtractor>) -> Resolver {
        Resolver::new(acquirer, extractor, FormatTarget::default())
    }

    #[tokio::test]
    async fn missing_uri_is_rejected_before_any_work() {
        let extractor = RecordingExtractor::returning(FIXTURE);
        let resolver = resolver(
            Some(acquirer("http://a:1\n", "http://a:1")),
            extractor.clone(),
        );

        for event in [
            json!({}),
            json!({"url": "https://www.youtube.com/watch?v=4ZmGmryMKI4"}),
            json!({"uri": null, "extra": true}),
            json!({"uri": 42}),
            json!({"uri": "   "}),
            json!("https://www.youtube.com/watch?v=4ZmGmryMKI4"),
        ] {
            let output = resolver.handle(&event).await;
            assert_eq!(
                serde_json::to_value(&output).unwrap(),
                json!({
                    "statusCode": 400,
                    "body": {"message": "uri is required", "code": "INVALID_INPUT"}
                })
            );
        }
        assert!(extractor.calls().is_empty());
    }

    #[tokio::test]
    async fn resolves_through_acquired_proxy() {
        let extractor = RecordingExtractor::returning(FIXTURE);
        let resolver = resolver(
            Some(acquirer("http://dead:1\r\nhttp://alive:2\r\n", "http://alive:2")),
            extractor.clone(),
        );

        let output = resolver
            .handle(&json!({"uri": "https://www.youtube.com/watch?v=4ZmGmryMKI4"}))
            .await;

        assert_eq!(output.status(), StatusCode::OK);
        let body = serde_json::to_value(&output).unwrap()["body"].clone();
        assert_eq!(body["videoId"], "4ZmGmryMKI4");
        assert_eq!(
            body["videoUrl"],
            "https://rr1.googlevideo.com/videoplayback?itag=136"
        );
        assert_eq!(body["mimeType"], "video/mp4");
        assert_eq!(
            extractor.calls(),
            vec![(
                "https://www.youtube.com/watch?v=4ZmGmryMKI4".to_string(),
                Some("http://alive:2".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn disabled_proxy_extracts_directly() {
        let extractor = RecordingExtractor::returning(FIXTURE);
        let resolver = resolver(None, extractor.clone());

        let output = resolver.handle(&json!({"uri": "https://example.com/v"})).await;

        assert_eq!(output.status(), StatusCode::OK);
        assert_eq!(extractor.calls()[0].1, None);
    }

    #[tokio::test]
    async fn proxy_failures_become_explicit_responses() {
        let extractor = RecordingExtractor::returning(FIXTURE);

        let output = resolver(Some(acquirer("http://a:1\n", "http://b:2")), extractor.clone())
            .handle(&json!({"uri": "https://example.com/v"}))
            .await;
        assert_eq!(output.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(matches!(
            &output.body,
            OutputBody::Error(body) if body.message == "no proxies available"
        ));

        let output = resolver(Some(acquirer("", "http://b:2")), extractor.clone())
            .handle(&json!({"uri": "https://example.com/v"}))
            .await;
        assert_eq!(output.status(), StatusCode::BAD_GATEWAY);
        assert!(matches!(
            &output.body,
            OutputBody::Error(body) if body.code == "PROXY_LIST_FAILURE"
        ));

        assert!(extractor.calls().is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_is_not_silent() {
        let extractor = RecordingExtractor::failing("ERROR: Unsupported URL: https://example.com/v");
        let output = resolver(None, extractor)
            .handle(&json!({"uri": "https://example.com/v"}))
            .await;

        assert_eq!(output.status(), StatusCode::BAD_GATEWAY);
        assert!(matches!(
            &output.body,
            OutputBody::Error(body) if body.code == "EXTRACTION_FAILURE" && body.message.contains("Unsupported URL")
        ));
    }

    #[tokio::test]
    async fn missing_mp4_https_format_is_explicit() {
        let extractor = RecordingExtractor::returning(
            r#"{"id": "x", "formats": [
                {"ext": "webm", "protocol": "https", "url": "https://cdn/1"},
                {"ext": "mp4", "protocol": "m3u8_native", "url": "https://cdn/2.m3u8"}
            ]}"#,
        );
        let output = resolver(None, extractor)
            .handle(&json!({"uri": "https://example.com/v"}))
            .await;

        assert_eq!(
            serde_json::to_value(&output).unwrap(),
            json!({
                "statusCode": 422,
                "body": {"message": "no mp4/https format available", "code": "NO_SUITABLE_FORMAT"}
            })
        );
    }

    #[tokio::test]
    async fn null_formats_are_a_missing_format_not_an_extraction_failure() {
        let extractor = RecordingExtractor::returning(r#"{"id": "x", "title": "t", "formats": null}"#);
        let output = resolver(None, extractor)
            .handle(&json!({"uri": "https://example.com/v"}))
            .await;

        assert_eq!(output.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(matches!(
            &output.body,
            OutputBody::Error(body) if body.code == "NO_SUITABLE_FORMAT"
        ));
    }

    #[test]
    fn requested_uri_is_trimmed() {
        assert_eq!(
            requested_uri(&json!({"uri": " https://example.com/v "})),
            Some("https://example.com/v")
        );
        assert_eq!(requested_uri(&json!({"uri": ""})), None);
    }
}
