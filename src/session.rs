use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{debug, info, info_span, warn};

use crate::config::{ClientSettings, DecodePolicy};
use crate::error::{SessionError, SessionResult};
use crate::model::{ResultSnapshot, TestReference};
use crate::transport::{BlockingTransport, Credentials, HttpReply, Transport, join_endpoint};

/// Cadence and budget for [`TestSession::wait_for_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub overall_timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            overall_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Cloneable handle that aborts a running wait loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.wakeup.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
    ///
    /// A duration too large to represent as a deadline sleeps until cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            cancelled = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.inner
                        .wakeup
                        .wait_timeout(cancelled, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .inner
                    .wakeup
                    .wait(cancelled)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        true
    }
}

/// Drives the submit → poll → resolve lifecycle of GTmetrix tests.
///
/// The session keeps no per-test state; independent tests may be driven
/// from the same session on different threads when `T: Sync`.
#[derive(Debug, Clone)]
pub struct TestSession<T = BlockingTransport> {
    transport: T,
    credentials: Credentials,
    base_url: String,
    decode_policy: DecodePolicy,
}

impl TestSession<BlockingTransport> {
    /// Build a session with a `reqwest` transport from loaded settings.
    pub fn from_settings(settings: &ClientSettings) -> SessionResult<Self> {
        settings.validate()?;
        let credentials = settings.credentials()?;
        let transport = BlockingTransport::new(&settings.user_agent, settings.request_timeout())?;
        Ok(Self::new(transport, credentials, settings.base_url.clone())
            .with_decode_policy(settings.decode_policy))
    }
}

impl<T: Transport> TestSession<T> {
    pub fn new(transport: T, credentials: Credentials, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            credentials,
            base_url: base_url.into(),
            decode_policy: DecodePolicy::default(),
        }
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        self.decode_policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queue a test of `target_url`.
    ///
    /// A non-empty `error` in the response becomes [`SessionError::Remote`],
    /// which still carries the decoded reference.
    pub fn submit(&self, target_url: &str) -> SessionResult<TestReference> {
        let url = join_endpoint(&self.base_url, "test");
        let reply = self
            .transport
            .post_form(&url, &self.credentials, &[("url", target_url)])?;
        let reference: TestReference = self.decode("test reference", reply)?;

        if let Some(message) = reference.remote_error().map(str::to_string) {
            warn!(
                target_url,
                credits_left = reference.credits_left,
                error = %message,
                "GTmetrix rejected test"
            );
            return Err(SessionError::Remote {
                message,
                reference: Box::new(reference),
            });
        }

        info!(
            target_url,
            test_id = %reference.test_id,
            credits_left = reference.credits_left,
            "queued GTmetrix test"
        );
        Ok(reference)
    }

    /// Fetch the current state of a test. Does not rate-limit; callers
    /// should stay at or below one call per second.
    pub fn poll(&self, reference: &TestReference) -> SessionResult<ResultSnapshot> {
        let url = self.poll_url(reference)?;
        let reply = self.transport.get(&url, &self.credentials)?;
        self.decode("test result", reply)
    }

    /// Poll until the test reaches `completed` or `error`, or the budget runs out.
    ///
    /// A remote `error` state is returned as `Ok`; only the local timeout is an error.
    pub fn wait_for_completion(
        &self,
        reference: &TestReference,
        options: WaitOptions,
    ) -> SessionResult<ResultSnapshot> {
        self.wait_for_completion_with_cancel(reference, options, &CancelToken::new())
    }

    pub fn wait_for_completion_with_cancel(
        &self,
        reference: &TestReference,
        options: WaitOptions,
        cancel: &CancelToken,
    ) -> SessionResult<ResultSnapshot> {
        let span = info_span!("gtmetrix.wait", test_id = %reference.test_id);
        let _guard = span.enter();

        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                info!(attempts, "wait cancelled");
                return Err(SessionError::Cancelled { attempts });
            }

            let snapshot = self.poll(reference)?;
            attempts += 1;
            debug!(attempts, state = %snapshot.test_state(), "polled test state");

            if snapshot.is_terminal() {
                info!(
                    attempts,
                    state = %snapshot.test_state(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "test reached terminal state"
                );
                return Ok(snapshot);
            }

            let waited = started.elapsed();
            if waited >= options.overall_timeout {
                warn!(
                    attempts,
                    waited_ms = waited.as_millis() as u64,
                    "gave up waiting for results"
                );
                return Err(SessionError::Timeout { waited, attempts });
            }

            // Never sleep past the budget; the poll after it is the last one.
            let remaining = options.overall_timeout - waited;
            if cancel.sleep(options.poll_interval.min(remaining)) {
                info!(attempts, "wait cancelled");
                return Err(SessionError::Cancelled { attempts });
            }
        }
    }

    /// `submit` followed by `wait_for_completion`; no poll happens if submission fails.
    pub fn submit_and_wait(
        &self,
        target_url: &str,
        options: WaitOptions,
    ) -> SessionResult<ResultSnapshot> {
        self.submit_and_wait_with_cancel(target_url, options, &CancelToken::new())
    }

    pub fn submit_and_wait_with_cancel(
        &self,
        target_url: &str,
        options: WaitOptions,
        cancel: &CancelToken,
    ) -> SessionResult<ResultSnapshot> {
        let reference = self.submit(target_url)?;
        self.wait_for_completion_with_cancel(&reference, options, cancel)
    }

    fn poll_url(&self, reference: &TestReference) -> SessionResult<String> {
        if !reference.test_id.is_empty() {
            return Ok(join_endpoint(
                &self.base_url,
                &format!("test/{}", reference.test_id),
            ));
        }
        if !reference.poll_state_url.is_empty() {
            return Ok(reference.poll_state_url.clone());
        }
        Err(SessionError::InvalidReference(
            "test reference has neither test_id nor poll_state_url".into(),
        ))
    }

    fn decode<D>(&self, what: &'static str, reply: HttpReply) -> SessionResult<D>
    where
        D: DeserializeOwned + Default,
    {
        match serde_json::from_str(&reply.body) {
            Ok(value) => Ok(value),
            Err(source) => match self.decode_policy {
                DecodePolicy::Permissive => {
                    warn!(
                        what,
                        status = reply.status,
                        error = %source,
                        "malformed payload, using empty value"
                    );
                    Ok(D::default())
                }
                DecodePolicy::Strict => Err(SessionError::Decode { what, source }),
            },
        }
    }
}
