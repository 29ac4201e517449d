//! HTTP execution with per-attempt timeout, retry and cancellation.

use std::time::Duration;

use conduit_api::{HttpTransport, OutboundRequest, TransportError, TransportResponse};
use conduit_types::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why no vendor answer was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SendFailure {
    Transport(TransportError),
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct SendOutcome {
    pub result: Result<TransportResponse, SendFailure>,
    /// Attempts started, including the one that was cancelled.
    pub attempts: u32,
}

/// Sends `request` until a vendor answer arrives, a non-retryable failure
/// occurs, the retry budget runs out or `cancel` fires.
///
/// Any HTTP status counts as an answer; only transport failures are retried.
pub(crate) async fn send_with_retry(
    transport: &dyn HttpTransport,
    request: &OutboundRequest,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> SendOutcome {
    let max_attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(attempt, max_attempts, method = %request.method, url = %request.url, "sending request");

        let call = tokio::time::timeout(timeout, transport.send(request));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return SendOutcome { result: Err(SendFailure::Cancelled), attempts: attempt };
            }
            result = call => result.unwrap_or_else(|_| Err(TransportError::Timeout { after_ms: millis(timeout) })),
        };

        let error = match result {
            Ok(response) => {
                debug!(attempt, status = response.status, "vendor responded");
                return SendOutcome {
                    result: Ok(response),
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            warn!(attempt, max_attempts, error = %error, "transport failure; giving up");
            return SendOutcome {
                result: Err(SendFailure::Transport(error)),
                attempts: attempt,
            };
        }

        let delay = policy.backoff_after(attempt);
        warn!(attempt, max_attempts, delay_ms = millis(delay), error = %error, "transport failure; retrying");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return SendOutcome { result: Err(SendFailure::Cancelled), attempts: attempt };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug)]
    enum Step {
        Respond(u16),
        Fail(TransportError),
        Hang,
    }

    #[derive(Debug, Default)]
    struct Script {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl HttpTransport for Script {
        async fn send(&self, _request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Respond(200));
            match step {
                Step::Respond(status) => Ok(TransportResponse::new(status, "{}")),
                Step::Fail(error) => Err(error),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(TransportResponse::new(200, "{}"))
                }
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 1_000,
        }
    }

    fn request() -> OutboundRequest {
        OutboundRequest::new("POST", "https://api.vendor.test/v1/things")
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_failures_until_success() {
        let script = Script::new(vec![Step::Fail(TransportError::Connect("refused".into())), Step::Respond(201)]);
        let outcome = send_with_retry(&script, &request(), &policy(3), Duration::from_secs(5), &CancellationToken::new()).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.unwrap().status, 201);
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_errors_are_not_retried() {
        let script = Script::new(vec![Step::Respond(500)]);
        let outcome = send_with_retry(&script, &request(), &policy(3), Duration::from_secs(5), &CancellationToken::new()).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(script.calls(), 1);
        assert_eq!(outcome.result.unwrap().status, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_transport_failures() {
        let script = Script::new(vec![Step::Hang, Step::Hang]);
        let outcome = send_with_retry(&script, &request(), &policy(2), Duration::from_millis(250), &CancellationToken::new()).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.result.unwrap_err(),
            SendFailure::Transport(TransportError::Timeout { after_ms: 250 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_requests_fail_immediately() {
        let script = Script::new(vec![Step::Fail(TransportError::InvalidRequest("bad header".into()))]);
        let outcome = send_with_retry(&script, &request(), &policy(5), Duration::from_secs(5), &CancellationToken::new()).await;
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(SendFailure::Transport(TransportError::InvalidRequest(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_call() {
        let script = Script::new(vec![Step::Hang]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let outcome = send_with_retry(&script, &request(), &policy(3), Duration::from_secs(60), &cancel).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.unwrap_err(), SendFailure::Cancelled);
    }
}
