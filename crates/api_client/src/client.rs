//! Typed client for the authenticated application endpoints

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use auth_manager::SessionManager;

use crate::error::{ApiError, Result};
use crate::middleware::AuthMiddleware;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct FeedbackRequest<'a> {
    rating: u8,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct FeedbackResponse {
    #[allow(dead_code)]
    message: String,
}

#[derive(Debug, Serialize)]
struct CompletedQuizzesRequest<'a> {
    quiz_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletedQuizzesResponse {
    completed_quizzes: Vec<QuizSummary>,
}

/// One completed quiz as listed by the results endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct QuizSummary {
    pub quiz_id: i64,
    #[serde(default)]
    pub date_completed: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub total_questions: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
struct QuizDetailsRequest<'a> {
    quiz_id: i64,
    quiz_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct QuizDetailsResponse {
    quiz_data: serde_json::Value,
}

/// Client for the learning API. Every request goes through the retry and
/// credential middleware stack; callers never see a transient 401 for a
/// merely expired access token.
pub struct ApiClient {
    base_url: String,
    http: ClientWithMiddleware,
}

impl ApiClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        let base_url = session.config().api_base.clone();
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("http client");
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let http = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .with(AuthMiddleware::new(session))
            .build();

        Self { base_url, http }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn submit_feedback(&self, rating: u8, message: &str) -> Result<()> {
        let _: FeedbackResponse = self
            .post("/feedback/send-feedback", &FeedbackRequest { rating, message })
            .await?;
        Ok(())
    }

    pub async fn completed_quizzes(&self, quiz_type: &str) -> Result<Vec<QuizSummary>> {
        let response: CompletedQuizzesResponse = self
            .post(
                "/quiz/get-completed-quizzes",
                &CompletedQuizzesRequest { quiz_type },
            )
            .await?;
        Ok(response.completed_quizzes)
    }

    pub async fn quiz_details(&self, quiz_id: i64, quiz_type: &str) -> Result<serde_json::Value> {
        let response: QuizDetailsResponse = self
            .post(
                "/quiz/get-quiz-details",
                &QuizDetailsRequest { quiz_id, quiz_type },
            )
            .await?;
        Ok(response.quiz_data)
    }
}
