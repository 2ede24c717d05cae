//! Submission & Confirmation Engine
//!
//! Submits a signed call, watches its status stream until inclusion, a
//! subscription failure or the deadline, and then confirms the call against
//! the event log of the including block. The status subscription is released
//! on every exit path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bucket_core::{decode_events, AccountId32, DecodedEvents, Value, H256};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::builder::{AccountIdentity, Call, CallBuilder, SignOptions, SignedCall};
use super::error::{ChainError, Result};
use super::session::Session;
use super::transport::{SubscriptionGuard, TxStatus};
use super::types::DEFAULT_TX_TIMEOUT_SECS;
use crate::metrics as node_metrics;

/// Event that proves a call took effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventExpectation {
    pub module: String,
    pub event: String,
    /// Field that must carry a specific value, e.g. the submitting account
    pub correlation: Option<(String, Value)>,
}

impl EventExpectation {
    pub fn new(module: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            event: event.into(),
            correlation: None,
        }
    }

    pub fn where_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.correlation = Some((field.into(), value));
        self
    }

    /// Whether any record in `events` satisfies the expectation
    pub fn matches(&self, events: &DecodedEvents) -> bool {
        events.iter().any(|record| {
            record.is(&self.module, &self.event)
                && match &self.correlation {
                    Some((field, value)) => record.field(field) == Some(value),
                    None => true,
                }
        })
    }
}

/// How a call is confirmed once included
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationRule {
    /// Inclusion alone counts as success
    InclusionOnly,
    /// The including block must carry a matching event
    Event(EventExpectation),
}

/// Final result of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed(H256),
    /// Included, but the expected event is missing
    SemanticFailure(H256),
    /// Rejected by the node or the pool, or the event log was unreadable
    ConnectionError(String),
    /// The status stream failed; the call may or may not have been included
    SubscriptionError(String),
    /// No inclusion before the deadline; the call may still be included
    Timeout,
}

impl ConfirmationOutcome {
    /// Whether the call may or may not have taken effect
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            ConfirmationOutcome::SubscriptionError(_) | ConfirmationOutcome::Timeout
        )
    }

    pub fn block_hash(&self) -> Option<H256> {
        match self {
            ConfirmationOutcome::Confirmed(h) | ConfirmationOutcome::SemanticFailure(h) => Some(*h),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfirmationOutcome::Confirmed(_) => "confirmed",
            ConfirmationOutcome::SemanticFailure(_) => "semantic_failure",
            ConfirmationOutcome::ConnectionError(_) => "connection_error",
            ConfirmationOutcome::SubscriptionError(_) => "subscription_error",
            ConfirmationOutcome::Timeout => "timeout",
        }
    }

    pub fn into_result(self) -> Result<H256> {
        match self {
            ConfirmationOutcome::Confirmed(h) => Ok(h),
            ConfirmationOutcome::SemanticFailure(h) => Err(ChainError::SemanticFailure(h.to_string())),
            ConfirmationOutcome::ConnectionError(msg) => Err(ChainError::Connection(msg)),
            ConfirmationOutcome::SubscriptionError(msg) => Err(ChainError::Subscription(msg)),
            ConfirmationOutcome::Timeout => Err(ChainError::Timeout),
        }
    }
}

impl fmt::Display for ConfirmationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationOutcome::Confirmed(h) => write!(f, "confirmed in {}", h),
            ConfirmationOutcome::SemanticFailure(h) => {
                write!(f, "included in {} without the expected event", h)
            }
            ConfirmationOutcome::ConnectionError(msg) => write!(f, "connection error: {}", msg),
            ConfirmationOutcome::SubscriptionError(msg) => write!(f, "subscription error: {}", msg),
            ConfirmationOutcome::Timeout => write!(f, "timed out"),
        }
    }
}

/// A call together with how to sign and confirm it
#[derive(Debug, Clone)]
pub struct Operation {
    pub call: Call,
    pub rule: ConfirmationRule,
    /// Overrides the engine default
    pub timeout: Option<Duration>,
    /// Overrides the engine default
    pub options: Option<SignOptions>,
}

impl Operation {
    pub fn new(call: Call, rule: ConfirmationRule) -> Self {
        Self {
            call,
            rule,
            timeout: None,
            options: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_options(mut self, options: SignOptions) -> Self {
        self.options = Some(options);
        self
    }
}

enum Wait {
    Included(H256),
    Rejected(TxStatus),
    SubscriptionFailed(String),
    TimedOut,
}

/// Builds, submits and confirms operations
///
/// Operations from the same account are serialized from the sequence-number
/// read until their outcome is known, so concurrent callers never sign with
/// the same sequence number.
pub struct SubmissionEngine {
    session: Arc<Session>,
    builder: CallBuilder,
    default_timeout: Duration,
    default_options: SignOptions,
    account_locks: Mutex<HashMap<AccountId32, Arc<AsyncMutex<()>>>>,
}

impl SubmissionEngine {
    pub fn new(session: Arc<Session>) -> Self {
        Self::with_timeout(session, Duration::from_secs(DEFAULT_TX_TIMEOUT_SECS))
    }

    pub fn with_timeout(session: Arc<Session>, default_timeout: Duration) -> Self {
        Self {
            builder: CallBuilder::new(session.clone()),
            session,
            default_timeout,
            default_options: SignOptions::default(),
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Era and tip used when an operation does not set its own
    pub fn with_sign_options(mut self, options: SignOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn builder(&self) -> &CallBuilder {
        &self.builder
    }

    fn account_lock(&self, account: &AccountId32) -> Arc<AsyncMutex<()>> {
        self.account_locks
            .lock()
            .entry(*account)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Sign `op` as `identity`, submit it and wait for the outcome
    ///
    /// Errors before submission (no signing key, unknown call or account,
    /// unreachable node) are returned as `Err`; everything after submission
    /// is reported as a [`ConfirmationOutcome`].
    pub async fn execute(
        &self,
        identity: &AccountIdentity,
        op: Operation,
    ) -> Result<ConfirmationOutcome> {
        if !identity.is_signer() {
            return Err(ChainError::NotASigner);
        }

        let lock = self.account_lock(identity.account());
        let _held = lock.lock().await;

        let options = op.options.unwrap_or(self.default_options);
        let signed = self.builder.build(identity, op.call, &options).await?;
        let timeout = op.timeout.unwrap_or(self.default_timeout);
        Ok(self.submit(signed, &op.rule, timeout).await)
    }

    /// Submit an already signed call and wait for the outcome
    pub async fn submit(
        &self,
        signed: SignedCall,
        rule: &ConfirmationRule,
        timeout: Duration,
    ) -> ConfirmationOutcome {
        let started = Instant::now();
        let name = signed.call().name();
        let tx = signed.hash();
        let nonce = signed.nonce();

        let outcome = self.submit_inner(signed, rule, timeout).await;
        node_metrics::record_submission(outcome.label(), started.elapsed());

        match &outcome {
            ConfirmationOutcome::Confirmed(block) => {
                info!(call = %name, tx = %tx, nonce, block = %block, "Transaction confirmed")
            }
            other => {
                warn!(call = %name, tx = %tx, nonce, outcome = %other, "Transaction not confirmed")
            }
        }
        outcome
    }

    async fn submit_inner(
        &self,
        signed: SignedCall,
        rule: &ConfirmationRule,
        timeout: Duration,
    ) -> ConfirmationOutcome {
        let transport = self.session.transport();
        let mut subscription = match transport.submit_and_watch(signed.into_extrinsic()).await {
            Ok(sub) => sub,
            Err(e) => return ConfirmationOutcome::ConnectionError(error_message(e)),
        };
        let guard = SubscriptionGuard::new(transport.clone(), subscription.id.clone());

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut errors_open = true;

        let wait = loop {
            tokio::select! {
                status = subscription.statuses.recv() => match status {
                    Some(status) => {
                        if let Some(block) = status.included_in() {
                            break Wait::Included(block);
                        }
                        if status.is_rejection() {
                            break Wait::Rejected(status);
                        }
                        debug!(status = ?status, "Transaction status");
                    }
                    None => break Wait::SubscriptionFailed("status stream closed".to_string()),
                },
                err = subscription.errors.recv(), if errors_open => match err {
                    Some(msg) => break Wait::SubscriptionFailed(msg),
                    None => errors_open = false,
                },
                _ = &mut deadline => break Wait::TimedOut,
            }
        };
        guard.release().await;

        match wait {
            Wait::Included(block) => self.confirm(block, rule).await,
            Wait::Rejected(status) => {
                ConfirmationOutcome::ConnectionError(format!("transaction {:?}", status))
            }
            Wait::SubscriptionFailed(msg) => ConfirmationOutcome::SubscriptionError(msg),
            Wait::TimedOut => ConfirmationOutcome::Timeout,
        }
    }

    async fn confirm(&self, block: H256, rule: &ConfirmationRule) -> ConfirmationOutcome {
        let expectation = match rule {
            ConfirmationRule::InclusionOnly => return ConfirmationOutcome::Confirmed(block),
            ConfirmationRule::Event(expectation) => expectation,
        };

        let facts = self.session.facts();
        let raw = match self
            .session
            .transport()
            .storage(&facts.event_log_key, Some(block))
            .await
        {
            Ok(raw) => raw.unwrap_or_default(),
            Err(e) => {
                return ConfirmationOutcome::ConnectionError(format!(
                    "reading events of {}: {}",
                    block,
                    error_message(e)
                ))
            }
        };

        let events = decode_events(&facts.metadata, &raw);
        if let Some(e) = &events.error {
            warn!(
                block = %block,
                decoded = events.records.len(),
                error = %e,
                "Event log only partially decoded"
            );
        }

        if expectation.matches(&events) {
            ConfirmationOutcome::Confirmed(block)
        } else {
            debug!(
                block = %block,
                module = %expectation.module,
                event = %expectation.event,
                "Expected event not found"
            );
            ConfirmationOutcome::SemanticFailure(block)
        }
    }
}

fn error_message(err: ChainError) -> String {
    match err {
        ChainError::Connection(msg) => msg,
        other => other.to_string(),
    }
}

impl fmt::Debug for SubmissionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionEngine")
            .field("default_timeout", &self.default_timeout)
            .field("default_options", &self.default_options)
            .finish()
    }
}
