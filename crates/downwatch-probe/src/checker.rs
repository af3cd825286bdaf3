//! Probe logic: retry transport failures, then judge the response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use downwatch_core::{Outcome, ProbeConfig, Target, epoch_millis};
use tracing::{debug, warn};

use crate::client::{HttpClient, HttpResponse, ReqwestClient, TransportError};
use crate::retry::RetryPolicy;

/// Boxed future returned by [`Probe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

/// Anything that can turn a target into an outcome. Never fails.
pub trait Probe: Send + Sync {
    fn probe<'a>(&'a self, target: &'a Target) -> ProbeFuture<'a>;
}

/// HTTP prober with a bounded retry budget.
#[derive(Clone)]
pub struct Prober {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
    /// Hard limit for each attempt, enforced here regardless of the client.
    attempt_timeout: Duration,
}

impl Prober {
    pub fn new(client: Arc<dyn HttpClient>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            client,
            policy,
            attempt_timeout,
        }
    }

    /// A reqwest-backed prober with timing taken from configuration.
    pub fn from_config(config: &ProbeConfig) -> reqwest::Result<Self> {
        let client = ReqwestClient::new(config.timeout)?;
        Ok(Self::new(
            Arc::new(client),
            RetryPolicy::from(config),
            config.timeout,
        ))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Probe `target` and classify the result.
    pub async fn check(&self, target: &Target) -> Outcome {
        let timestamp = epoch_millis();
        match self.fetch(target).await {
            Ok(response) => evaluate(target, &response, timestamp),
            Err(err) => Outcome::exceptional(target, timestamp, transport_message(target, &err)),
        }
    }

    /// GET with retries. Only transport failures get here as errors.
    async fn fetch(&self, target: &Target) -> Result<HttpResponse, TransportError> {
        let mut attempt = 1;
        loop {
            debug!(target_name = %target.name, attempt, "attempting request");

            let result = match tokio::time::timeout(self.attempt_timeout, self.client.get(&target.url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(format!(
                    "no response within {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            match self.policy.delay_after(attempt) {
                Some(delay) => {
                    debug!(
                        target_name = %target.name,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!(
                        target_name = %target.name,
                        attempts = attempt,
                        error = %err,
                        "giving up after exhausting retries"
                    );
                    return Err(err);
                }
            }
        }
    }
}

impl Probe for Prober {
    fn probe<'a>(&'a self, target: &'a Target) -> ProbeFuture<'a> {
        Box::pin(self.check(target))
    }
}

/// Judge a response against the target's expectations.
pub fn evaluate(target: &Target, response: &HttpResponse, timestamp: u64) -> Outcome {
    if response.status != target.expected_status_code {
        let message = format!(
            "Expected HTTP {} connecting to {}; got {} instead.",
            target.expected_status_code, target.name, response.status
        );
        return Outcome::exceptional(target, timestamp, message);
    }

    if let Some(text) = &target.expected_body_text {
        if !response.body.contains(text.as_str()) {
            let message = format!(
                "Expected to find \"{}\" in request to {}; was missing",
                text, target.name
            );
            return Outcome::exceptional(target, timestamp, message);
        }
    }

    let message = format!(
        "Successfully connected to {}; got response {}!",
        target.name, target.expected_status_code
    );
    Outcome::healthy(target, timestamp, message)
}

fn transport_message(target: &Target, err: &TransportError) -> String {
    match err {
        TransportError::Connect(e) => format!(
            "Failed to connect to {} due to a network problem; result: {e}",
            target.name
        ),
        TransportError::Timeout(e) => {
            format!("Timed out connecting to {}; result: {e}", target.name)
        }
        TransportError::Other(e) => format!(
            "Got an unspecified error connecting to {}; result: {e}",
            target.name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::client::FetchFuture;

    /// Replays a fixed script of results, repeating the last one.
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpClient for ScriptedClient {
        fn get<'a>(&'a self, _url: &'a str) -> FetchFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            Box::pin(async move { next })
        }
    }

    /// Never answers.
    struct HangingClient {
        calls: AtomicU32,
    }

    impl HttpClient for HangingClient {
        fn get<'a>(&'a self, _url: &'a str) -> FetchFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(HttpResponse::new(200, ""))
            })
        }
    }

    fn target() -> Target {
        Target::new("api", "http://api.internal/health")
    }

    fn prober(client: Arc<dyn HttpClient>) -> Prober {
        Prober::new(client, RetryPolicy::default(), Duration::from_secs(10))
    }

    #[test]
    fn evaluate_matching_status_is_healthy() {
        let outcome = evaluate(&target(), &HttpResponse::new(200, "hi"), 7);
        assert!(!outcome.is_exceptional);
        assert_eq!(outcome.timestamp, 7);
        assert_eq!(outcome.message(), "Successfully connected to api; got response 200!");
    }

    #[test]
    fn evaluate_status_mismatch() {
        let outcome = evaluate(&target(), &HttpResponse::new(503, ""), 7);
        assert!(outcome.is_exceptional);
        assert_eq!(
            outcome.message(),
            "Expected HTTP 200 connecting to api; got 503 instead."
        );
    }

    #[test]
    fn evaluate_redirect_is_compared_as_is() {
        let outcome = evaluate(&target(), &HttpResponse::new(301, ""), 7);
        assert!(outcome.is_exceptional);
        assert!(outcome.message().contains("got 301 instead"));
    }

    #[test]
    fn evaluate_expected_redirect_is_healthy() {
        let target = target().with_expected_status(301);
        let outcome = evaluate(&target, &HttpResponse::new(301, ""), 7);
        assert!(!outcome.is_exceptional);
    }

    #[test]
    fn evaluate_missing_body_text() {
        let target = target().with_expected_text("\"status\":\"up\"");
        let outcome = evaluate(&target, &HttpResponse::new(200, "{\"status\":\"down\"}"), 7);
        assert!(outcome.is_exceptional);
        assert_eq!(
            outcome.message(),
            "Expected to find \"\"status\":\"up\"\" in request to api; was missing"
        );
    }

    #[test]
    fn evaluate_status_checked_before_body() {
        let target = target().with_expected_text("ok");
        let outcome = evaluate(&target, &HttpResponse::new(500, "not ok"), 7);
        assert!(outcome.message().starts_with("Expected HTTP 200"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let client = ScriptedClient::new(vec![Ok(HttpResponse::new(200, "ok"))]);
        let outcome = prober(client.clone()).check(&target()).await;

        assert!(!outcome.is_exceptional);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_mismatch_is_not_retried() {
        let client = ScriptedClient::new(vec![Ok(HttpResponse::new(500, ""))]);
        let outcome = prober(client.clone()).check(&target()).await;

        assert!(outcome.is_exceptional);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_then_recovery() {
        let client = ScriptedClient::new(vec![
            Err(TransportError::Connect("connection refused".into())),
            Err(TransportError::Connect("connection refused".into())),
            Ok(HttpResponse::new(200, "")),
        ]);
        let start = tokio::time::Instant::now();
        let outcome = prober(client.clone()).check(&target()).await;

        assert!(!outcome.is_exceptional);
        assert_eq!(client.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_timeout_makes_five_attempts() {
        let client = ScriptedClient::new(vec![Err(TransportError::Timeout("deadline".into()))]);
        let start = tokio::time::Instant::now();
        let outcome = prober(client.clone()).check(&target()).await;

        assert_eq!(client.calls(), 5);
        assert_eq!(start.elapsed(), Duration::from_millis(500 + 1000 + 2000 + 4000));
        assert!(outcome.is_exceptional);
        assert_eq!(
            outcome.message(),
            "Timed out connecting to api; result: deadline"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_endpoint_is_bounded_by_attempt_timeout() {
        let client = Arc::new(HangingClient {
            calls: AtomicU32::new(0),
        });
        let prober = prober(client.clone());
        let start = tokio::time::Instant::now();
        let outcome = prober.check(&target()).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            start.elapsed(),
            prober.policy().worst_case(Duration::from_secs(10))
        );
        assert!(outcome.is_exceptional);
        assert!(outcome.message().starts_with("Timed out connecting to api"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_classes_have_distinct_messages() {
        let connect = ScriptedClient::new(vec![Err(TransportError::Connect("dns".into()))]);
        let outcome = prober(connect).check(&target()).await;
        assert_eq!(
            outcome.message(),
            "Failed to connect to api due to a network problem; result: dns"
        );

        let other = ScriptedClient::new(vec![Err(TransportError::Other("bad body".into()))]);
        let outcome = prober(other).check(&target()).await;
        assert_eq!(
            outcome.message(),
            "Got an unspecified error connecting to api; result: bad body"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn probe_trait_delegates_to_check() {
        let client = ScriptedClient::new(vec![Ok(HttpResponse::new(200, ""))]);
        let prober: Arc<dyn Probe> = Arc::new(prober(client));
        let outcome = prober.probe(&target()).await;
        assert_eq!(outcome.target_name, "api");
        assert_eq!(outcome.target_url, "http://api.internal/health");
    }
}
