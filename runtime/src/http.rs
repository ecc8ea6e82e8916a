//! reqwest implementation of the backend collaborators.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use coursegate_core::assessment::{AssessmentDefinition, Attempt};
use coursegate_core::catalog::Course;
use coursegate_core::completion::CompletionKey;
use coursegate_core::error::ApiError;
use coursegate_core::gate::ReviewStatus;
use coursegate_core::reconcile::AggregateProgress;
use coursegate_core::{CertificateId, CourseId, LearnerCourse};

use crate::config::RuntimeConfig;
use crate::error::BackendError;
use crate::ports::{
    AssessmentStore, CatalogSource, CertificateIssuer, CompletionStore, ReviewStore,
    ReviewSubmission, SetCompletionEcho, SubmitAttemptResponse,
};

#[derive(Debug, Serialize, Deserialize)]
struct ItemCompletion {
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct ReviewStatusResponse {
    status: ReviewStatus,
}

#[derive(Debug, Deserialize)]
struct CertificateResponse {
    certificate_id: CertificateId,
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &RuntimeConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {e}", config.api_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(config.api_url.clone()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn learner_endpoint(&self, scope: &LearnerCourse, tail: &[&str]) -> Result<Url, BackendError> {
        let mut segments = vec![
            "v1",
            "users",
            scope.user_id.as_str(),
            "courses",
            scope.course_id.as_str(),
        ];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        tracing::debug!(%method, %url, "backend request");
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn send_optional<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<Option<T>, BackendError> {
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// Like `send`, but an empty success body yields `T::default()`.
    async fn send_or_default<T: DeserializeOwned + Default>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, BackendError> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let body = resp.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn send_empty(&self, req: RequestBuilder) -> Result<(), BackendError> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(())
    }

    fn completion_endpoint(&self, course_id: &CourseId, key: &CompletionKey) -> Result<Url, BackendError> {
        let index = key.content_index.to_string();
        self.endpoint(&[
            "v1",
            "courses",
            course_id.as_str(),
            "modules",
            key.module_id.as_str(),
            "contents",
            &index,
            "completion",
        ])
    }
}

/// Structured error codes take precedence over the status class, so a 403
/// carrying `assessment_not_passed` is a guard violation, not an auth failure.
async fn error_from_response(resp: Response) -> BackendError {
    let status = resp.status();
    let body: Option<ApiError> = resp.json().await.ok();
    let message = body
        .as_ref()
        .map(|b| b.message.clone())
        .unwrap_or_else(|| status.to_string());

    if let Some(body) = &body {
        match BackendError::from_code(status.as_u16(), &body.error, message.clone()) {
            BackendError::Rejected { .. } => {}
            mapped => return mapped,
        }
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Network(format!("{status}: {message}"))
        }
        s if s.is_server_error() => BackendError::Network(format!("{status}: {message}")),
        _ => BackendError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl CatalogSource for HttpBackend {
    async fn get_catalog(&self, course_id: &CourseId) -> Result<Course, BackendError> {
        let url = self.endpoint(&["v1", "courses", course_id.as_str()])?;
        let course: Course = self.send(self.request(Method::GET, url)).await?;
        Ok(course.normalized())
    }
}

#[async_trait]
impl CompletionStore for HttpBackend {
    async fn get_aggregate_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<AggregateProgress, BackendError> {
        let url = self.endpoint(&["v1", "courses", course_id.as_str(), "progress"])?;
        self.send(self.request(Method::GET, url)).await
    }

    async fn get_item_completion(
        &self,
        course_id: &CourseId,
        key: &CompletionKey,
    ) -> Result<bool, BackendError> {
        let url = self.completion_endpoint(course_id, key)?;
        let item: ItemCompletion = self.send(self.request(Method::GET, url)).await?;
        Ok(item.completed)
    }

    async fn set_item_completion(
        &self,
        course_id: &CourseId,
        key: &CompletionKey,
        complete: bool,
    ) -> Result<SetCompletionEcho, BackendError> {
        let url = self.completion_endpoint(course_id, key)?;
        let req = self
            .request(Method::PUT, url)
            .json(&ItemCompletion { completed: complete });
        self.send_or_default(req).await
    }
}

#[async_trait]
impl AssessmentStore for HttpBackend {
    async fn get_assessment_definition(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<AssessmentDefinition>, BackendError> {
        let url = self.endpoint(&["v1", "courses", course_id.as_str(), "assessment"])?;
        self.send_optional(self.request(Method::GET, url)).await
    }

    async fn get_latest_attempt(
        &self,
        scope: &LearnerCourse,
    ) -> Result<Option<Attempt>, BackendError> {
        let url = self.learner_endpoint(scope, &["attempts", "latest"])?;
        self.send_optional(self.request(Method::GET, url)).await
    }

    async fn submit_attempt(
        &self,
        scope: &LearnerCourse,
        attempt: &Attempt,
    ) -> Result<SubmitAttemptResponse, BackendError> {
        let url = self.learner_endpoint(scope, &["attempts"])?;
        let req = self
            .request(Method::POST, url)
            .header("Idempotency-Key", attempt.id.to_string())
            .json(attempt);
        match self.send(req).await {
            Err(BackendError::AlreadyPassed) => Ok(SubmitAttemptResponse {
                accepted: false,
                already_passed: true,
            }),
            other => other,
        }
    }
}

#[async_trait]
impl ReviewStore for HttpBackend {
    async fn review_status(&self, scope: &LearnerCourse) -> Result<ReviewStatus, BackendError> {
        let url = self.learner_endpoint(scope, &["review"])?;
        let resp: Option<ReviewStatusResponse> =
            self.send_optional(self.request(Method::GET, url)).await?;
        Ok(resp.map_or(ReviewStatus::Pending, |r| r.status))
    }

    async fn submit_review(
        &self,
        scope: &LearnerCourse,
        review: &ReviewSubmission,
    ) -> Result<(), BackendError> {
        let url = self.learner_endpoint(scope, &["review"])?;
        self.send_empty(self.request(Method::POST, url).json(review))
            .await
    }

    async fn skip_review(&self, scope: &LearnerCourse) -> Result<(), BackendError> {
        let url = self.learner_endpoint(scope, &["review", "skip"])?;
        self.send_empty(self.request(Method::POST, url).json(&json!({})))
            .await
    }
}

#[async_trait]
impl CertificateIssuer for HttpBackend {
    async fn issue_certificate(&self, scope: &LearnerCourse) -> Result<CertificateId, BackendError> {
        let url = self.learner_endpoint(scope, &["certificate"])?;
        let resp: CertificateResponse = self.send(self.request(Method::POST, url)).await?;
        Ok(resp.certificate_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn backend(server: &MockServer) -> HttpBackend {
        let config = RuntimeConfig::new(server.uri())
            .with_token("secret")
            .with_timeout(Duration::from_millis(300));
        HttpBackend::new(&config).unwrap()
    }

    fn scope() -> LearnerCourse {
        LearnerCourse::new("u1", "c1")
    }

    #[tokio::test]
    async fn aggregate_progress_is_fetched_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/courses/c1/progress"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "completed_count": 3,
                "total_count": 10,
                "per_module_completed": { "m1": 3 }
            })))
            .mount(&server)
            .await;

        let aggregate = backend(&server)
            .get_aggregate_progress(&CourseId::new("c1"))
            .await
            .unwrap();
        assert_eq!(aggregate.completed_count, 3);
        assert_eq!(aggregate.per_module_completed.len(), 1);
    }

    #[tokio::test]
    async fn item_completion_is_addressed_by_position() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/courses/c1/modules/m1/contents/4/completion"))
            .and(body_json(json!({ "completed": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let echo = backend(&server)
            .set_item_completion(&CourseId::new("c1"), &CompletionKey::new("m1", 4), true)
            .await
            .unwrap();
        assert_eq!(echo.aggregate, None);
    }

    #[tokio::test]
    async fn completion_write_accepts_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/courses/c1/modules/m2/contents/0/completion"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let echo = backend(&server)
            .set_item_completion(&CourseId::new("c1"), &CompletionKey::new("m2", 0), false)
            .await
            .unwrap();
        assert_eq!(echo, SetCompletionEcho::default());
    }

    #[tokio::test]
    async fn missing_assessment_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/courses/c1/assessment"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let def = backend(&server)
            .get_assessment_definition(&CourseId::new("c1"))
            .await
            .unwrap();
        assert!(def.is_none());
    }

    #[tokio::test]
    async fn status_and_codes_map_to_backend_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/courses/c1/progress"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "unauthorized",
                "message": "token expired"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/users/u1/courses/c1/certificate"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": "assessment_not_passed",
                "message": "final exam not passed"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/courses/c1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = backend(&server);
        assert_eq!(
            backend.get_aggregate_progress(&CourseId::new("c1")).await,
            Err(BackendError::Unauthorized("token expired".to_string()))
        );
        assert_eq!(
            backend.issue_certificate(&scope()).await,
            Err(BackendError::AssessmentNotPassed)
        );
        assert!(matches!(
            backend.get_catalog(&CourseId::new("c1")).await,
            Err(BackendError::Network(_))
        ));
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/courses/c1/modules/m1/contents/0/completion"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "completed": true }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let result = backend(&server)
            .get_item_completion(&CourseId::new("c1"), &CompletionKey::new("m1", 0))
            .await;
        assert_eq!(result, Err(BackendError::Timeout));
    }

    #[tokio::test]
    async fn already_passed_conflict_becomes_submission_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/users/u1/courses/c1/attempts"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": "already_passed",
                "message": "a passed attempt exists"
            })))
            .mount(&server)
            .await;

        let attempt = Attempt {
            id: uuid::Uuid::now_v7(),
            attempt_number: 2,
            answers: Default::default(),
            score: 80.0,
            passed: true,
            submitted_at: chrono::Utc::now(),
        };
        let resp = backend(&server).submit_attempt(&scope(), &attempt).await.unwrap();
        assert!(resp.already_passed);
        assert!(!resp.accepted);
    }

    #[tokio::test]
    async fn review_status_defaults_to_pending_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/users/u1/courses/c1/review"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let status = backend(&server).review_status(&scope()).await.unwrap();
        assert_eq!(status, ReviewStatus::Pending);
    }
}
