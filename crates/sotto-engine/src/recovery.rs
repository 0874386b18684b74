//! Bounded retry and fault recovery
//!
//! Wraps fallible operations in a per-operation state machine:
//! `Idle -> Attempting(n) -> {Succeeded | Attempting(n+1) | ExhaustedFallback}`.
//! Strategies are dispatched by error classification; every operation is
//! bounded by a retry budget, a per-attempt timeout, and a global
//! concurrency cap. An attempt's failure never aborts the operation early,
//! and bookkeeping is freed only when the operation concludes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sotto_core::{
    Error, ErrorKind, Result, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, GENERIC_RETRY_PAUSE_MS,
    MAX_BACKOFF_DELAY_MS, MAX_CONCURRENT_RECOVERIES, RECOVERY_ATTEMPT_TIMEOUT_MS,
};

use crate::clock::Clock;

/// Options governing one recovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOptions {
    /// Whether the operation may be retried at all
    pub can_retry: bool,

    /// Retry budget
    pub max_retries: u32,

    /// Base delay between attempts
    pub retry_delay_ms: u64,

    /// Double the delay on each attempt, capped
    pub exponential_backoff: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            can_retry: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            exponential_backoff: true,
        }
    }
}

/// Identity and caller context for a recovery run
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    /// Identity of the failed operation; one recovery per id at a time
    pub operation_id: String,

    /// Subsystem the failure came from
    pub component: String,

    /// Free-form detail for logs
    pub detail: Option<String>,
}

impl RecoveryContext {
    pub fn new(operation_id: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            component: component.into(),
            detail: None,
        }
    }

    /// Context with a fresh unique operation id
    pub fn anonymous(component: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), component)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Outcome reported to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    pub success: bool,

    /// Attempts consumed by the operation
    pub retry_count: u32,

    /// Time from the operation's original start to its conclusion
    pub elapsed_ms: u64,

    /// Classification of the failure, absent on success
    pub error: Option<ErrorKind>,
}

/// Per-operation bookkeeping while a recovery is in flight
#[derive(Debug, Clone)]
struct RecoveryOperation {
    attempts: u32,
    start_ms: u64,
    last_attempt_ms: u64,
    strategy_name: &'static str,
}

/// Capability bundle registered per error classification
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Whether this strategy can act on the error
    fn can_recover(&self, error: &Error) -> bool;

    /// One remediation attempt
    async fn recover(&self, error: &Error, ctx: &RecoveryContext) -> Result<()>;

    /// Best-effort last resort once retries are exhausted
    async fn fallback(&self, _error: &Error, _ctx: &RecoveryContext) -> Result<()> {
        Ok(())
    }
}

/// Generic retry/backoff/fallback state machine for transient failures
pub struct RecoveryEngine {
    clock: Arc<dyn Clock>,
    strategies: Mutex<HashMap<ErrorKind, Arc<dyn RecoveryStrategy>>>,
    operations: Mutex<HashMap<String, RecoveryOperation>>,
    max_concurrent: usize,
    attempt_timeout_ms: u64,
}

impl RecoveryEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, MAX_CONCURRENT_RECOVERIES, RECOVERY_ATTEMPT_TIMEOUT_MS)
    }

    pub fn with_limits(clock: Arc<dyn Clock>, max_concurrent: usize, attempt_timeout_ms: u64) -> Self {
        Self {
            clock,
            strategies: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            max_concurrent,
            attempt_timeout_ms,
        }
    }

    /// Register the strategy dispatched for one error classification
    pub fn register_strategy(&self, kind: ErrorKind, strategy: Arc<dyn RecoveryStrategy>) {
        self.lock_strategies().insert(kind, strategy);
    }

    /// Number of operations currently in flight
    pub fn tracked_operations(&self) -> usize {
        self.lock_operations().len()
    }

    /// Attempt to recover from `error`, bounded by `options`.
    ///
    /// Guards, in order: a non-retryable submission fails immediately with
    /// zero retries; an operation whose identity already exhausted its
    /// budget fails immediately reusing the accumulated count; a submission
    /// past the concurrency cap fails immediately as resource exhaustion
    /// without consuming a slot.
    pub async fn recover(
        &self,
        error: &Error,
        ctx: &RecoveryContext,
        options: &RecoveryOptions,
    ) -> RecoveryResult {
        let now = self.clock.now_ms();

        if !options.can_retry {
            debug!(op = %ctx.operation_id, "submission not retryable");
            return RecoveryResult {
                success: false,
                retry_count: 0,
                elapsed_ms: 0,
                error: Some(error.kind()),
            };
        }

        let strategy = self.lock_strategies().get(&error.kind()).cloned();
        let strategy_name = strategy.as_ref().map(|s| s.name()).unwrap_or("generic");

        {
            let mut ops = self.lock_operations();
            if let Some(op) = ops.get(&ctx.operation_id) {
                if op.attempts >= options.max_retries {
                    warn!(
                        op = %ctx.operation_id,
                        attempts = op.attempts,
                        strategy = op.strategy_name,
                        last_attempt_ms = op.last_attempt_ms,
                        "retry budget already exhausted"
                    );
                    return RecoveryResult {
                        success: false,
                        retry_count: op.attempts,
                        elapsed_ms: now.saturating_sub(op.start_ms),
                        error: Some(error.kind()),
                    };
                }
            } else {
                if ops.len() >= self.max_concurrent {
                    warn!(
                        op = %ctx.operation_id,
                        tracked = ops.len(),
                        "concurrent recovery cap reached"
                    );
                    return RecoveryResult {
                        success: false,
                        retry_count: 0,
                        elapsed_ms: 0,
                        error: Some(ErrorKind::ResourceExhausted),
                    };
                }
                ops.insert(
                    ctx.operation_id.clone(),
                    RecoveryOperation {
                        attempts: 0,
                        start_ms: now,
                        last_attempt_ms: now,
                        strategy_name,
                    },
                );
            }
        }

        // The operation is freed when this run concludes, whatever the
        // strategy or fallback does
        let _guard = OpGuard {
            engine: self,
            operation_id: ctx.operation_id.clone(),
        };

        info!(
            op = %ctx.operation_id,
            component = %ctx.component,
            kind = ?error.kind(),
            strategy = strategy_name,
            "recovery started"
        );

        let mut success = false;
        loop {
            let attempt = {
                let mut ops = self.lock_operations();
                let Some(op) = ops.get_mut(&ctx.operation_id) else {
                    error!(op = %ctx.operation_id, "operation record vanished mid-recovery");
                    break;
                };
                if op.attempts >= options.max_retries {
                    break;
                }
                op.attempts += 1;
                op.last_attempt_ms = self.clock.now_ms();
                op.attempts
            };

            if attempt > 1 {
                let delay = self.attempt_delay(attempt, options);
                debug!(op = %ctx.operation_id, attempt, delay_ms = delay, "delaying before attempt");
                self.clock.sleep_ms(delay).await;
            }

            if self.run_attempt(strategy.as_ref(), error, ctx, attempt).await {
                success = true;
                break;
            }
        }

        let (retry_count, start_ms) = {
            let ops = self.lock_operations();
            ops.get(&ctx.operation_id)
                .map(|op| (op.attempts, op.start_ms))
                .unwrap_or((0, now))
        };

        if !success {
            if let Some(strategy) = &strategy {
                match strategy.fallback(error, ctx).await {
                    Ok(()) => debug!(op = %ctx.operation_id, strategy = strategy.name(), "fallback executed"),
                    // Best effort only
                    Err(e) => warn!(op = %ctx.operation_id, error = %e, "fallback failed"),
                }
            }
        }

        let elapsed_ms = self.clock.now_ms().saturating_sub(start_ms);
        info!(
            op = %ctx.operation_id,
            success,
            retry_count,
            elapsed_ms,
            "recovery concluded"
        );
        RecoveryResult {
            success,
            retry_count,
            elapsed_ms,
            error: if success { None } else { Some(error.kind()) },
        }
    }

    /// Delay before the given 1-based attempt. With backoff enabled the
    /// delay doubles per attempt, capped.
    fn attempt_delay(&self, attempt: u32, options: &RecoveryOptions) -> u64 {
        if options.exponential_backoff {
            let exponent = attempt.saturating_sub(2).min(16);
            options
                .retry_delay_ms
                .saturating_mul(1u64 << exponent)
                .min(MAX_BACKOFF_DELAY_MS)
        } else {
            options.retry_delay_ms
        }
    }

    /// Run one attempt. A timeout or error here fails the attempt, never
    /// the engine.
    async fn run_attempt(
        &self,
        strategy: Option<&Arc<dyn RecoveryStrategy>>,
        error: &Error,
        ctx: &RecoveryContext,
        attempt: u32,
    ) -> bool {
        match strategy {
            Some(strategy) => {
                if !strategy.can_recover(error) {
                    debug!(strategy = strategy.name(), "strategy declined error");
                    return false;
                }
                let timeout = Duration::from_millis(self.attempt_timeout_ms);
                match tokio::time::timeout(timeout, strategy.recover(error, ctx)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(
                            op = %ctx.operation_id,
                            strategy = strategy.name(),
                            attempt,
                            error = %e,
                            "recovery attempt failed"
                        );
                        false
                    }
                    Err(_) => {
                        warn!(
                            op = %ctx.operation_id,
                            strategy = strategy.name(),
                            attempt,
                            "recovery attempt timed out"
                        );
                        false
                    }
                }
            }
            // No strategy registered: a retryable error is assumed to clear
            // after a short pause, anything else fails the attempt
            None => {
                if error.is_retryable() {
                    self.clock.sleep_ms(GENERIC_RETRY_PAUSE_MS).await;
                    true
                } else {
                    debug!(kind = ?error.kind(), "no strategy and error not retryable");
                    false
                }
            }
        }
    }

    fn lock_strategies(&self) -> MutexGuard<'_, HashMap<ErrorKind, Arc<dyn RecoveryStrategy>>> {
        self.strategies.lock().unwrap_or_else(|poisoned| {
            error!("strategy registry lock poisoned");
            poisoned.into_inner()
        })
    }

    fn lock_operations(&self) -> MutexGuard<'_, HashMap<String, RecoveryOperation>> {
        self.operations.lock().unwrap_or_else(|poisoned| {
            error!("operation table lock poisoned");
            poisoned.into_inner()
        })
    }
}

/// Frees an operation's identity when its recovery run concludes, even if a
/// strategy or fallback panicked out of the run.
struct OpGuard<'a> {
    engine: &'a RecoveryEngine,
    operation_id: String,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.engine.lock_operations().remove(&self.operation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedStrategy {
        succeed_on: Option<u32>,
        attempts: AtomicUsize,
        fallbacks: AtomicUsize,
        fallback_fails: bool,
    }

    impl ScriptedStrategy {
        fn failing() -> Self {
            Self {
                succeed_on: None,
                attempts: AtomicUsize::new(0),
                fallbacks: AtomicUsize::new(0),
                fallback_fails: false,
            }
        }

        fn succeeding_on(attempt: u32) -> Self {
            Self {
                succeed_on: Some(attempt),
                ..Self::failing()
            }
        }
    }

    #[async_trait]
    impl RecoveryStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn can_recover(&self, _error: &Error) -> bool {
            true
        }

        async fn recover(&self, _error: &Error, _ctx: &RecoveryContext) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            match self.succeed_on {
                Some(n) if attempt >= n => Ok(()),
                _ => Err(Error::Network("still down".to_string())),
            }
        }

        async fn fallback(&self, _error: &Error, _ctx: &RecoveryContext) -> Result<()> {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
            if self.fallback_fails {
                Err(Error::UnexpectedState("fallback broke".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Blocks until released; used to hold operations in flight
    struct BlockingStrategy {
        release: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RecoveryStrategy for BlockingStrategy {
        fn name(&self) -> &'static str {
            "blocking"
        }

        fn can_recover(&self, _error: &Error) -> bool {
            true
        }

        async fn recover(&self, _error: &Error, _ctx: &RecoveryContext) -> Result<()> {
            while !self.release.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
            Ok(())
        }
    }

    fn engine() -> (Arc<MockClock>, RecoveryEngine) {
        let clock = Arc::new(MockClock::new());
        let engine = RecoveryEngine::new(clock.clone());
        (clock, engine)
    }

    fn options(max_retries: u32, backoff: bool) -> RecoveryOptions {
        RecoveryOptions {
            can_retry: true,
            max_retries,
            retry_delay_ms: 100,
            exponential_backoff: backoff,
        }
    }

    #[tokio::test]
    async fn test_exhausts_exact_retry_budget() {
        let (_clock, engine) = engine();
        let strategy = Arc::new(ScriptedStrategy::failing());
        engine.register_strategy(ErrorKind::Network, strategy.clone());

        let result = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(3, false),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.retry_count, 3);
        assert_eq!(result.error, Some(ErrorKind::Network));
        assert_eq!(strategy.attempts.load(Ordering::SeqCst), 3);
        // Fallback ran once, after exhaustion
        assert_eq!(strategy.fallbacks.load(Ordering::SeqCst), 1);
        // Identity freed for a fresh budget
        assert_eq!(engine.tracked_operations(), 0);
    }

    #[tokio::test]
    async fn test_success_stops_the_loop() {
        let (_clock, engine) = engine();
        let strategy = Arc::new(ScriptedStrategy::succeeding_on(2));
        engine.register_strategy(ErrorKind::Network, strategy.clone());

        let result = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(5, false),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.retry_count, 2);
        assert_eq!(result.error, None);
        assert_eq!(strategy.fallbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_can_retry_false_fails_immediately() {
        let (_clock, engine) = engine();
        let result = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &RecoveryOptions {
                    can_retry: false,
                    ..RecoveryOptions::default()
                },
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.retry_count, 0);
        assert_eq!(result.elapsed_ms, 0);
    }

    #[tokio::test]
    async fn test_generic_rule_retryable_succeeds_after_pause() {
        let (clock, engine) = engine();
        let result = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(3, false),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.retry_count, 1);
        assert_eq!(clock.now_ms(), GENERIC_RETRY_PAUSE_MS);
    }

    #[tokio::test]
    async fn test_generic_rule_non_retryable_exhausts() {
        let (clock, engine) = engine();
        let result = engine
            .recover(
                &Error::KeyDerivation("corrupt".to_string()),
                &RecoveryContext::new("op-1", "kdf"),
                &options(3, false),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.retry_count, 3);
        // Two inter-attempt delays, no generic pauses
        assert_eq!(clock.now_ms(), 200);
    }

    #[tokio::test]
    async fn test_exponential_backoff_delays() {
        let (clock, engine) = engine();
        let strategy = Arc::new(ScriptedStrategy::failing());
        engine.register_strategy(ErrorKind::Network, strategy);

        engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(3, true),
            )
            .await;

        // Delays before attempts 2 and 3: 100, 200
        assert_eq!(clock.now_ms(), 300);
    }

    #[tokio::test]
    async fn test_backoff_delay_is_capped() {
        let (_clock, engine) = engine();
        let options = RecoveryOptions {
            can_retry: true,
            max_retries: 40,
            retry_delay_ms: 10_000,
            exponential_backoff: true,
        };
        assert_eq!(engine.attempt_delay(2, &options), 10_000);
        assert_eq!(engine.attempt_delay(3, &options), 20_000);
        assert_eq!(engine.attempt_delay(4, &options), MAX_BACKOFF_DELAY_MS);
        assert_eq!(engine.attempt_delay(30, &options), MAX_BACKOFF_DELAY_MS);
    }

    #[tokio::test]
    async fn test_concurrency_cap_rejects_eleventh() {
        let clock = Arc::new(MockClock::new());
        let engine = Arc::new(RecoveryEngine::new(clock));
        let release = Arc::new(AtomicBool::new(false));
        engine.register_strategy(
            ErrorKind::Network,
            Arc::new(BlockingStrategy {
                release: release.clone(),
            }),
        );

        let mut handles = Vec::new();
        for i in 0..MAX_CONCURRENT_RECOVERIES {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .recover(
                        &Error::Network("down".to_string()),
                        &RecoveryContext::new(format!("op-{}", i), "sync"),
                        &options(3, false),
                    )
                    .await
            }));
        }
        while engine.tracked_operations() < MAX_CONCURRENT_RECOVERIES {
            tokio::task::yield_now().await;
        }

        let rejected = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-overflow", "sync"),
                &options(3, false),
            )
            .await;
        assert!(!rejected.success);
        assert_eq!(rejected.retry_count, 0);
        assert_eq!(rejected.error, Some(ErrorKind::ResourceExhausted));

        release.store(true, Ordering::SeqCst);
        for handle in handles {
            assert!(handle.await.unwrap().success);
        }
        assert_eq!(engine.tracked_operations(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_identity_rejected_with_accumulated_count() {
        let clock = Arc::new(MockClock::new());
        let engine = Arc::new(RecoveryEngine::new(clock));
        let release = Arc::new(AtomicBool::new(false));
        engine.register_strategy(
            ErrorKind::Network,
            Arc::new(BlockingStrategy {
                release: release.clone(),
            }),
        );

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .recover(
                        &Error::Network("down".to_string()),
                        &RecoveryContext::new("op-1", "sync"),
                        &options(1, false),
                    )
                    .await
            })
        };
        while engine.tracked_operations() < 1 {
            tokio::task::yield_now().await;
        }

        // The in-flight attempt already consumed the whole budget
        let second = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(1, false),
            )
            .await;
        assert!(!second.success);
        assert_eq!(second.retry_count, 1);

        release.store(true, Ordering::SeqCst);
        assert!(first.await.unwrap().success);
    }

    #[tokio::test]
    async fn test_attempt_timeout_fails_attempt_not_engine() {
        struct SlowStrategy;

        #[async_trait]
        impl RecoveryStrategy for SlowStrategy {
            fn name(&self) -> &'static str {
                "slow"
            }
            fn can_recover(&self, _error: &Error) -> bool {
                true
            }
            async fn recover(&self, _error: &Error, _ctx: &RecoveryContext) -> Result<()> {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
        }

        let clock = Arc::new(MockClock::new());
        let engine = RecoveryEngine::with_limits(clock, MAX_CONCURRENT_RECOVERIES, 10);
        engine.register_strategy(ErrorKind::Network, Arc::new(SlowStrategy));

        let result = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(1, false),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_swallowed() {
        let (_clock, engine) = engine();
        let strategy = Arc::new(ScriptedStrategy {
            fallback_fails: true,
            ..ScriptedStrategy::failing()
        });
        engine.register_strategy(ErrorKind::Network, strategy.clone());

        let result = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(2, false),
            )
            .await;

        assert!(!result.success);
        assert_eq!(strategy.fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(engine.tracked_operations(), 0);
    }

    #[tokio::test]
    async fn test_declining_strategy_fails_attempts() {
        struct DecliningStrategy;

        #[async_trait]
        impl RecoveryStrategy for DecliningStrategy {
            fn name(&self) -> &'static str {
                "declining"
            }
            fn can_recover(&self, _error: &Error) -> bool {
                false
            }
            async fn recover(&self, _error: &Error, _ctx: &RecoveryContext) -> Result<()> {
                panic!("must not be dispatched");
            }
        }

        let (_clock, engine) = engine();
        engine.register_strategy(ErrorKind::Network, Arc::new(DecliningStrategy));

        let result = engine
            .recover(
                &Error::Network("down".to_string()),
                &RecoveryContext::new("op-1", "sync"),
                &options(2, false),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 2);
    }
}
