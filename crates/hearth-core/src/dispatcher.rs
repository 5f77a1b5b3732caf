//! Throttle-aware request queue.
//!
//! All authenticated portal calls go through a [`Dispatcher`]. A single worker
//! task drains an mpsc channel, so requests are served strictly in submission
//! order and at most one is ever in flight. The worker absorbs throttling
//! responses with bounded exponential backoff and drives one re-authentication
//! through the [`SessionHandle`] seam when the session expires mid-queue.
//! Non-idempotent requests are never replayed after an ambiguous server
//! error; only explicit throttle statuses earn them a retry.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    http::{PortalRequest, PortalResponse, ResponseSignal, Transport},
    session::SessionHandle,
};

/// Tuning knobs for the dispatcher's throttle handling.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Wait before the first retry after a throttling response.
    pub initial_backoff: Duration,
    /// Ceiling on any single backoff wait.
    pub max_backoff: Duration,
    /// Consecutive throttling responses tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(21),
            max_attempts: 5,
        }
    }
}

/// Consecutive-throttle tracking, shared by every request the worker serves.
///
/// The counter is process-wide by design: the remote rate limit applies to the
/// account, not to an individual request, so a throttle observed while serving
/// one request must slow down the next one too.
#[derive(Debug, Default)]
struct ThrottleState {
    consecutive: u32,
}

impl ThrottleState {
    /// Record a throttling response and return how long to wait before the
    /// retry, or `None` once the ceiling is reached.
    fn register_throttle(&mut self, config: &DispatcherConfig) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= config.max_attempts {
            return None;
        }
        // 1x, 2x, 4x... the initial interval, capped. Strictly increasing
        // until the cap so repeated throttles keep widening the gap.
        let wait = config
            .initial_backoff
            .saturating_mul(1 << (self.consecutive - 1).min(16));
        Some(wait.min(config.max_backoff))
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

struct Job {
    request: PortalRequest,
    cancel: Option<CancellationToken>,
    reply: oneshot::Sender<Result<PortalResponse, Error>>,
}

/// Serializes authenticated portal calls for one account session.
///
/// Cloning is cheap; all clones feed the same queue. Dropping every handle
/// closes the queue and the worker task exits after draining it.
#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn the worker task and return a handle to its queue.
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionHandle>,
        config: DispatcherConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, transport, session, config));
        Self { queue: tx }
    }

    /// Submit a request and wait for its terminal outcome.
    ///
    /// Resolves once the request succeeded, exhausted its retries, or was
    /// cancelled. Requests ahead of it in the queue are served first.
    pub async fn enqueue(&self, request: PortalRequest) -> Result<PortalResponse, Error> {
        self.submit(request, None).await
    }

    /// Like [`enqueue`](Self::enqueue), but the request is abandoned with
    /// [`Error::Cancelled`] if the token fires while it is waiting on a
    /// backoff interval or a network call. Other queued requests are not
    /// affected.
    pub async fn enqueue_cancellable(
        &self,
        request: PortalRequest,
        cancel: CancellationToken,
    ) -> Result<PortalResponse, Error> {
        self.submit(request, Some(cancel)).await
    }

    async fn submit(
        &self,
        request: PortalRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<PortalResponse, Error> {
        let (reply, outcome) = oneshot::channel();
        self.queue
            .send(Job {
                request,
                cancel,
                reply,
            })
            .map_err(|_| Error::Cancelled)?;
        // The worker only drops the reply sender if it is shutting down.
        outcome.await.map_err(|_| Error::Cancelled)?
    }
}

async fn run_worker(
    mut queue: mpsc::UnboundedReceiver<Job>,
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionHandle>,
    config: DispatcherConfig,
) {
    let mut throttle = ThrottleState::default();

    while let Some(job) = queue.recv().await {
        let result = serve(
            transport.as_ref(),
            session.as_ref(),
            &config,
            &mut throttle,
            &job.request,
            job.cancel.as_ref(),
        )
        .await;

        // The caller may have stopped waiting; nothing to do about it.
        let _ = job.reply.send(result);
    }
}

/// Drive one request to a terminal outcome.
async fn serve(
    transport: &dyn Transport,
    session: &dyn SessionHandle,
    config: &DispatcherConfig,
    throttle: &mut ThrottleState,
    request: &PortalRequest,
    cancel: Option<&CancellationToken>,
) -> Result<PortalResponse, Error> {
    let mut reauthenticated = false;

    // A valid session must exist before the call goes out; this triggers the
    // initial login or a token refresh when needed.
    session.current().await?;

    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        let response = send_cancellable(transport, request, cancel).await?;

        match response.signal() {
            ResponseSignal::Ok => {
                throttle.reset();
                return Ok(response);
            }
            ResponseSignal::Throttled => {
                // A 5xx may have reached the handler before failing; replaying
                // a non-idempotent request on that ambiguity could repeat the
                // device action. 429/503 are explicit not-processed signals.
                if !request.idempotent && response.status.is_server_error() {
                    return Err(response.into_failure());
                }
                let Some(wait) = throttle.register_throttle(config) else {
                    tracing::warn!(
                        url = %request.url,
                        attempts = throttle.consecutive,
                        "throttle retry ceiling reached"
                    );
                    return Err(Error::Throttled {
                        attempts: throttle.consecutive,
                    });
                };
                tracing::debug!(
                    url = %request.url,
                    wait_secs = wait.as_secs_f64(),
                    "throttled by the portal, backing off"
                );
                wait_cancellable(wait, cancel).await?;
            }
            ResponseSignal::AuthExpired => {
                if reauthenticated {
                    return Err(Error::SessionExpired);
                }
                reauthenticated = true;
                tracing::info!(url = %request.url, "session rejected, re-authenticating");
                session.invalidate_and_relogin().await?;
            }
            ResponseSignal::Failed => return Err(response.into_failure()),
        }
    }
}

async fn send_cancellable(
    transport: &dyn Transport,
    request: &PortalRequest,
    cancel: Option<&CancellationToken>,
) -> Result<PortalResponse, Error> {
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                result = transport.send(request) => result,
            }
        }
        None => transport.send(request).await,
    }
}

async fn wait_cancellable(
    wait: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), Error> {
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(wait).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use reqwest::StatusCode;
    use tokio::time::Instant;

    use super::*;
    use crate::session::SessionState;

    /// Scripted transport: pops one status per call and records when each
    /// call happened (in paused-clock time).
    struct ScriptedTransport {
        script: Mutex<Vec<StatusCode>>,
        calls: Mutex<Vec<(Instant, String)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<StatusCode>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls
                .lock()
                .expect("Mutex is not poisoned")
                .iter()
                .map(|(t, _)| *t)
                .collect()
        }

        fn called_urls(&self) -> Vec<String> {
            self.calls
                .lock()
                .expect("Mutex is not poisoned")
                .iter()
                .map(|(_, u)| u.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &PortalRequest) -> Result<PortalResponse, Error> {
            let status = {
                let mut script = self.script.lock().expect("Mutex is not poisoned");
                if script.is_empty() {
                    StatusCode::OK
                } else {
                    script.remove(0)
                }
            };
            self.calls
                .lock()
                .expect("Mutex is not poisoned")
                .push((Instant::now(), request.url.clone()));
            Ok(PortalResponse {
                status,
                final_url: request.url.clone(),
                body: String::new(),
            })
        }
    }

    /// Counts re-authentication calls.
    #[derive(Default)]
    struct CountingSession {
        relogins: Mutex<u32>,
    }

    impl CountingSession {
        fn relogin_count(&self) -> u32 {
            *self.relogins.lock().expect("Mutex is not poisoned")
        }
    }

    #[async_trait::async_trait]
    impl SessionHandle for CountingSession {
        async fn current(&self) -> Result<SessionState, Error> {
            Ok(SessionState::default())
        }

        async fn invalidate_and_relogin(&self) -> Result<SessionState, Error> {
            *self.relogins.lock().expect("Mutex is not poisoned") += 1;
            Ok(SessionState::default())
        }
    }

    fn dispatcher(transport: Arc<ScriptedTransport>) -> (Dispatcher, Arc<CountingSession>) {
        let session = Arc::new(CountingSession::default());
        let dispatcher = Dispatcher::new(
            transport,
            session.clone(),
            DispatcherConfig::default(),
        );
        (dispatcher, session)
    }

    #[tokio::test]
    async fn requests_are_served_in_submission_order() {
        let transport = ScriptedTransport::new(vec![]);
        let (dispatcher, _session) = dispatcher(transport.clone());

        let request = |i: u32| dispatcher.enqueue(PortalRequest::get(format!("https://portal.test/{i}")));

        // join! polls left to right on the first pass, so the five requests
        // enter the queue in this order even though they run concurrently.
        let (a, b, c, d, e) = tokio::join!(request(0), request(1), request(2), request(3), request(4));
        for result in [a, b, c, d, e] {
            result.expect("request succeeds");
        }

        assert_eq!(
            transport.called_urls(),
            (0..5)
                .map(|i| format!("https://portal.test/{i}"))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_grow_strictly_until_success() {
        let throttled = StatusCode::TOO_MANY_REQUESTS;
        let transport = ScriptedTransport::new(vec![throttled, throttled, throttled]);
        let (dispatcher, _session) = dispatcher(transport.clone());

        dispatcher
            .enqueue(PortalRequest::get("https://portal.test/api"))
            .await
            .expect("fourth attempt succeeds");

        let times = transport.call_times();
        assert_eq!(times.len(), 4);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn backoff_is_capped_at_the_configured_maximum() {
        let mut state = ThrottleState::default();
        let config = DispatcherConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(21),
            max_attempts: 10,
        };

        let mut waits = Vec::new();
        while let Some(wait) = state.register_throttle(&config) {
            waits.push(wait);
        }

        assert_eq!(waits.len(), 9);
        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*waits.last().expect("non-empty"), Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_ceiling_fails_the_request() {
        let throttled = StatusCode::SERVICE_UNAVAILABLE;
        let transport = ScriptedTransport::new(vec![throttled; 8]);
        let (dispatcher, _session) = dispatcher(transport.clone());

        let err = dispatcher
            .enqueue(PortalRequest::get("https://portal.test/api"))
            .await
            .expect_err("ceiling reached");

        assert!(matches!(err, Error::Throttled { attempts: 5 }));
        // Five throttled responses observed, four backoff waits between them.
        assert_eq!(transport.call_times().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_counter_resets_after_a_success() {
        let throttled = StatusCode::TOO_MANY_REQUESTS;
        // Four throttles, success, then four more throttles, success. With a
        // shared non-resetting counter the second request would hit the
        // ceiling of five.
        let transport = ScriptedTransport::new(vec![
            throttled,
            throttled,
            throttled,
            throttled,
            StatusCode::OK,
            throttled,
            throttled,
            throttled,
            throttled,
            StatusCode::OK,
        ]);
        let (dispatcher, _session) = dispatcher(transport.clone());

        dispatcher
            .enqueue(PortalRequest::get("https://portal.test/a"))
            .await
            .expect("first request succeeds");
        dispatcher
            .enqueue(PortalRequest::get("https://portal.test/b"))
            .await
            .expect("second request succeeds");

        assert_eq!(transport.call_times().len(), 10);
    }

    #[tokio::test]
    async fn session_expiry_triggers_one_relogin_and_one_retry() {
        let transport = ScriptedTransport::new(vec![StatusCode::UNAUTHORIZED]);
        let (dispatcher, session) = dispatcher(transport.clone());

        dispatcher
            .enqueue(PortalRequest::get("https://portal.test/api"))
            .await
            .expect("retry after relogin succeeds");

        assert_eq!(session.relogin_count(), 1);
        assert_eq!(transport.call_times().len(), 2);
    }

    #[tokio::test]
    async fn second_session_expiry_fails_the_request() {
        let transport = ScriptedTransport::new(vec![
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
        ]);
        let (dispatcher, session) = dispatcher(transport.clone());

        let err = dispatcher
            .enqueue(PortalRequest::get("https://portal.test/api"))
            .await
            .expect_err("second rejection is terminal");

        assert!(matches!(err, Error::SessionExpired));
        assert_eq!(session.relogin_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_aborts_only_that_request() {
        let throttled = StatusCode::TOO_MANY_REQUESTS;
        let transport = ScriptedTransport::new(vec![throttled; 3]);
        let (dispatcher, _session) = dispatcher(transport.clone());

        let token = CancellationToken::new();
        let cancelled = {
            let d = dispatcher.clone();
            let token = token.clone();
            tokio::spawn(async move {
                d.enqueue_cancellable(
                    PortalRequest::get("https://portal.test/slow"),
                    token,
                )
                .await
            })
        };
        let follower = {
            let d = dispatcher.clone();
            tokio::spawn(async move {
                d.enqueue(PortalRequest::get("https://portal.test/next"))
                    .await
            })
        };

        // Let the first request hit its initial throttle and start waiting.
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let err = cancelled
            .await
            .expect("task completes")
            .expect_err("request was cancelled");
        assert!(matches!(err, Error::Cancelled));

        follower
            .await
            .expect("task completes")
            .expect("queued request unaffected by the cancellation");
    }

    #[tokio::test]
    async fn server_error_on_non_idempotent_request_is_not_retried() {
        let transport = ScriptedTransport::new(vec![StatusCode::INTERNAL_SERVER_ERROR]);
        let (dispatcher, _session) = dispatcher(transport.clone());

        let err = dispatcher
            .enqueue(PortalRequest::post_json(
                "https://portal.test/command",
                serde_json::json!({}),
            ))
            .await
            .expect_err("ambiguous server error is terminal");

        assert!(matches!(
            err,
            Error::Network(crate::NetworkError::ResponseContent { .. })
        ));
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_throttle_still_retries_non_idempotent_requests() {
        let transport = ScriptedTransport::new(vec![StatusCode::TOO_MANY_REQUESTS]);
        let (dispatcher, _session) = dispatcher(transport.clone());

        dispatcher
            .enqueue(PortalRequest::post_json(
                "https://portal.test/command",
                serde_json::json!({}),
            ))
            .await
            .expect("second attempt succeeds");

        assert_eq!(transport.call_times().len(), 2);
    }

    #[tokio::test]
    async fn non_throttle_failures_propagate_unchanged() {
        let transport = ScriptedTransport::new(vec![StatusCode::NOT_FOUND]);
        let (dispatcher, session) = dispatcher(transport.clone());

        let err = dispatcher
            .enqueue(PortalRequest::get("https://portal.test/missing"))
            .await
            .expect_err("hard failure");

        assert!(matches!(
            err,
            Error::Network(crate::NetworkError::ResponseContent { .. })
        ));
        assert_eq!(session.relogin_count(), 0);
        assert_eq!(transport.call_times().len(), 1);
    }
}
