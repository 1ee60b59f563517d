//! Outbound HTTP to the compute service.
//!
//! The dispatcher only sees [`HttpClient`]. [`ReqwestHttpClient`] is what runs in
//! production; [`MockHttpClient`] scripts responses for tests.

use crate::error::{Result, SalvorError};
use async_trait::async_trait;
use std::time::Duration;

/// Status and body of a completed POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends calculation payloads.
///
/// # Example
/// ```ignore
/// let client = ReqwestHttpClient::new();
/// let response = client.post_json("http://localhost:8001/calculate", &body, 5000).await?;
/// if !response.is_success() {
///     tracing::warn!(status = response.status, "compute service refused payload");
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync + Clone {
    /// POST `body` as `application/json` to `url`, giving up after `timeout_ms`.
    ///
    /// Only transport failures (connect, timeout, bad URL) are errors. Any
    /// status the server answers with comes back as a response.
    async fn post_json(&self, url: &str, body: &str, timeout_ms: u64) -> Result<HttpResponse>;
}

// ---------------------------------------------------------------------------
// reqwest
// ---------------------------------------------------------------------------

/// [`HttpClient`] over a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already configured client (proxies, TLS roots, pooling).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, body), fields(url = %url, body_len = body.len()))]
    async fn post_json(&self, url: &str, body: &str, timeout_ms: u64) -> Result<HttpResponse> {
        tracing::debug!(timeout_ms, "Executing HTTP request");

        let response = self
            .client
            .post(url)
            .timeout(Duration::from_millis(timeout_ms))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "HTTP request failed");
                e
            })?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(status, response_len = body.len(), "HTTP request completed");

        Ok(HttpResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Scripted client for tests
// ---------------------------------------------------------------------------

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Scripted [`HttpClient`] that records every call.
///
/// Responses are queued per URL and handed out in FIFO order.
///
/// # Example
/// ```ignore
/// let mock = MockHttpClient::new();
/// mock.add_response(
///     "http://localhost:8001/calculate",
///     Ok(HttpResponse {
///         status: 200,
///         body: "{}".to_string(),
///     }),
/// );
/// ```
#[derive(Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// One scripted answer, optionally held back until its trigger fires.
enum MockResponse {
    Immediate(Result<HttpResponse>),
    Triggered {
        response: Result<HttpResponse>,
        trigger: oneshot::Receiver<()>,
    },
}

/// A POST the mock received.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub url: String,
    pub body: String,
    pub timeout_ms: u64,
}

impl MockCall {
    /// The body parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `url`.
    pub fn add_response(&self, url: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(url.to_string())
            .or_default()
            .push(MockResponse::Immediate(response));
    }

    /// Queue a response that only completes once the returned sender fires
    /// (or is dropped).
    ///
    /// Lets a test hold sends open to observe concurrency.
    pub fn add_response_with_trigger(
        &self,
        url: &str,
        response: Result<HttpResponse>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .lock()
            .entry(url.to_string())
            .or_default()
            .push(MockResponse::Triggered {
                response,
                trigger: rx,
            });
        tx
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of requests currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were ever executing at once.
    pub fn peak_in_flight_count(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn post_json(&self, url: &str, body: &str, timeout_ms: u64) -> Result<HttpResponse> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        // Decrement even if the caller is cancelled
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(MockCall {
            url: url.to_string(),
            body: body.to_string(),
            timeout_ms,
        });

        let mock_response = {
            let mut responses = self.responses.lock();
            responses
                .get_mut(url)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };

        match mock_response {
            Some(MockResponse::Immediate(response)) => response,
            Some(MockResponse::Triggered { response, trigger }) => {
                // Sent or dropped, either way we proceed
                let _ = trigger.await;
                response
            }
            None => Err(SalvorError::Other(anyhow::anyhow!(
                "No mock response configured for POST {}",
                url
            ))),
        }
    }
}

/// Decrements the in-flight count on drop.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://compute.test/calculate";

    fn ok(body: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    #[tokio::test]
    async fn test_records_calls_and_returns_scripted_response() {
        let mock = MockHttpClient::new();
        mock.add_response(URL, ok("accepted"));

        let response = mock.post_json(URL, r#"{"requestId":7}"#, 5000).await.unwrap();
        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert_eq!(response.body, "accepted");

        let calls = mock.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, URL);
        assert_eq!(calls[0].timeout_ms, 5000);
        assert_eq!(calls[0].json()["requestId"], 7);
    }

    #[tokio::test]
    async fn test_responses_are_fifo_per_url() {
        let mock = MockHttpClient::new();
        mock.add_response(URL, ok("first"));
        mock.add_response(URL, ok("second"));

        assert_eq!(mock.post_json(URL, "{}", 5000).await.unwrap().body, "first");
        assert_eq!(mock.post_json(URL, "{}", 5000).await.unwrap().body, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unscripted_url_is_an_error() {
        let mock = MockHttpClient::new();
        assert!(mock.post_json(URL, "{}", 5000).await.is_err());
    }

    #[tokio::test]
    async fn test_triggered_response_holds_the_call_open() {
        let mock = MockHttpClient::new();
        let trigger = mock.add_response_with_trigger(URL, ok("released"));

        let client = mock.clone();
        let pending = tokio::spawn(async move { client.post_json(URL, "{}", 5000).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert_eq!(mock.in_flight_count(), 1);

        trigger.send(()).unwrap();

        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.body, "released");
        assert_eq!(mock.in_flight_count(), 0);
        assert_eq!(mock.peak_in_flight_count(), 1);
    }

    #[test]
    fn test_response_success_range() {
        let response = |status| HttpResponse {
            status,
            body: String::new(),
        };
        assert!(response(204).is_success());
        assert!(!response(302).is_success());
        assert!(!response(500).is_success());
    }
}
