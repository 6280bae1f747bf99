//! Resilient service-to-service client.

use axum::http::{header, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::error::CallError;
use crate::client::transport::{OutboundRequest, OutboundResponse, Transport, TransportError};
use crate::config::MeshConfig;
use crate::load_balancer::LoadBalancer;
use crate::observability::{metrics, TraceContext};
use crate::registry::ServiceInstance;
use crate::resilience::timeouts::Deadline;
use crate::resilience::{CircuitBreakers, RetryPolicy};

/// Per-call options beyond the basic `call` arguments.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Caller credential, forwarded as `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    /// Per-attempt timeout. Falls back to the client default.
    pub timeout: Option<Duration>,
    /// Budget for the whole call including retries and backoff.
    pub deadline: Option<Duration>,
    /// Trace to continue. A new root is minted when absent.
    pub trace: Option<TraceContext>,
    /// Affinity key for key-based balancing (client IP at the gateway).
    pub affinity_key: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn affinity_key(mut self, key: impl Into<String>) -> Self {
        self.affinity_key = Some(key.into());
        self
    }
}

/// Outcome of a single attempt.
enum Attempt {
    Done(OutboundResponse),
    /// Worth retrying on the same instance.
    Transient(CallError),
    /// Surface right away.
    Fatal(CallError),
}

/// Issues calls to a named service through load balancing, the target's
/// circuit breaker, per-attempt timeouts and retries.
///
/// One instance is selected per call and all retries stay on it; the
/// breaker sees exactly one outcome per call.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakers>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    call_timeout: Duration,
    breaker_enabled: bool,
}

impl ServiceClient {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakers>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            balancer,
            breakers,
            transport,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
            breaker_enabled: true,
        }
    }

    pub fn from_config(
        config: &MeshConfig,
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakers>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(balancer, breakers, transport)
            .with_retry_policy(RetryPolicy::from(&config.retries))
            .with_call_timeout(Duration::from_millis(config.timeouts.call_ms))
            .with_breaker_enabled(config.circuit_breaker.enabled)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_breaker_enabled(mut self, enabled: bool) -> Self {
        self.breaker_enabled = enabled;
        self
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Call `service` with an optional bearer token and per-attempt timeout.
    pub async fn call(
        &self,
        service: &str,
        request: OutboundRequest,
        auth_token: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<OutboundResponse, CallError> {
        let options = CallOptions {
            auth_token: auth_token.map(str::to_string),
            timeout,
            ..CallOptions::default()
        };
        self.call_with(service, request, options).await
    }

    pub async fn call_with(
        &self,
        service: &str,
        request: OutboundRequest,
        options: CallOptions,
    ) -> Result<OutboundResponse, CallError> {
        let start = Instant::now();
        let instance = self
            .balancer
            .select_with_key(service, options.affinity_key.as_deref())?;
        let instance_id = instance.instance_id();

        // Held across the await so a cancelled call still releases its slot.
        let permit = if self.breaker_enabled {
            match self.breakers.for_instance(service, &instance_id).try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    tracing::debug!(service = %service, instance = %instance_id, "Circuit open, failing fast");
                    metrics::record_call(service, "circuit_open", start);
                    return Err(CallError::CircuitOpen {
                        service: service.to_string(),
                        instance: instance_id,
                    });
                }
            }
        } else {
            None
        };

        let _guard = instance.connection_guard();
        let result = self
            .attempt_loop(service, &instance, request, &options)
            .await;

        if let Some(permit) = permit {
            permit.settle(result.is_ok());
        }
        let outcome = match &result {
            Ok(_) => "success",
            Err(CallError::Timeout { .. }) => "timeout",
            Err(CallError::Client(_)) => "client_error",
            Err(_) => "failure",
        };
        metrics::record_call(service, outcome, start);
        result
    }

    /// GET `path` and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
        auth_token: Option<&str>,
    ) -> Result<T, CallError> {
        let response = self
            .call(service, OutboundRequest::get(path), auth_token, None)
            .await?;
        response.json().map_err(|e| CallError::Decode(e.to_string()))
    }

    /// POST `body` as JSON to `path` and decode the JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
        body: &B,
        auth_token: Option<&str>,
    ) -> Result<T, CallError> {
        let request = OutboundRequest::post_json(path, body)?;
        let response = self.call(service, request, auth_token, None).await?;
        response.json().map_err(|e| CallError::Decode(e.to_string()))
    }

    async fn attempt_loop(
        &self,
        service: &str,
        instance: &Arc<ServiceInstance>,
        request: OutboundRequest,
        options: &CallOptions,
    ) -> Result<OutboundResponse, CallError> {
        let per_attempt = options.timeout.unwrap_or(self.call_timeout);
        let deadline = options.deadline.map(Deadline::after);
        let trace = options.trace.clone().unwrap_or_else(TraceContext::new_root);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let limit = deadline.map_or(per_attempt, |d| d.clip(per_attempt));
            let outcome = if limit.is_zero() {
                Attempt::Transient(CallError::Timeout {
                    service: service.to_string(),
                    attempts: attempt,
                })
            } else {
                let mut req = request.clone();
                self.decorate(&mut req, options.auth_token.as_deref(), &trace)?;
                self.attempt(service, instance, req, limit, attempt).await
            };

            let err = match outcome {
                Attempt::Done(response) => return Ok(response),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Transient(err) => err,
            };

            let out_of_time = deadline.is_some_and(|d| d.is_expired());
            if out_of_time || !self.retry.should_retry(attempt, err.is_retryable()) {
                tracing::warn!(
                    service = %service,
                    instance = %instance.instance_id(),
                    attempts = attempt,
                    error = %err,
                    "Call failed"
                );
                return Err(err);
            }

            let mut backoff = self.retry.delay(attempt);
            if let Some(deadline) = deadline {
                backoff = deadline.clip(backoff);
            }
            tracing::info!(
                service = %service,
                attempt = attempt,
                delay = ?backoff,
                error = %err,
                "Retrying call"
            );
            metrics::record_retry(service);
            tokio::time::sleep(backoff).await;
        }
    }

    /// Headers carried by every attempt.
    fn decorate(
        &self,
        req: &mut OutboundRequest,
        auth_token: Option<&str>,
        trace: &TraceContext,
    ) -> Result<(), CallError> {
        if let Some(token) = auth_token {
            let value = if token.starts_with("Bearer ") {
                token.to_string()
            } else {
                format!("Bearer {token}")
            };
            let value = HeaderValue::from_str(&value)
                .map_err(|e| CallError::Request(format!("invalid auth token: {e}")))?;
            req.headers.insert(header::AUTHORIZATION, value);
        }
        trace.inject(&mut req.headers);
        Ok(())
    }

    async fn attempt(
        &self,
        service: &str,
        instance: &Arc<ServiceInstance>,
        req: OutboundRequest,
        limit: Duration,
        attempt: u32,
    ) -> Attempt {
        let started = Instant::now();
        let sent = tokio::time::timeout(limit, self.transport.send(instance, req)).await;
        let elapsed = started.elapsed();

        match sent {
            Ok(Ok(response)) => {
                let status = response.status;
                if status.is_server_error() {
                    instance.record_call(false, elapsed);
                    Attempt::Transient(CallError::Unavailable {
                        service: service.to_string(),
                        attempts: attempt,
                        reason: format!("upstream returned {status}"),
                    })
                } else if status.is_client_error() {
                    instance.record_call(false, elapsed);
                    Attempt::Fatal(CallError::Client(Box::new(response)))
                } else {
                    instance.record_call(true, elapsed);
                    Attempt::Done(response)
                }
            }
            Ok(Err(TransportError::InvalidRequest(reason))) => {
                Attempt::Fatal(CallError::Request(reason))
            }
            Ok(Err(e)) => {
                instance.record_call(false, elapsed);
                Attempt::Transient(CallError::Unavailable {
                    service: service.to_string(),
                    attempts: attempt,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                instance.record_call(false, elapsed);
                tracing::debug!(service = %service, attempt = attempt, timeout = ?limit, "Attempt timed out");
                Attempt::Transient(CallError::Timeout {
                    service: service.to_string(),
                    attempts: attempt,
                })
            }
        }
    }
}
