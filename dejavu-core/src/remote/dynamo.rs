//! DynamoDB-backed signature store.
//!
//! One table keyed by `hash` (S) with a `firstSeen` RFC-3339 attribute.
//! Writes use `attribute_not_exists` conditional puts, so first-writer-wins
//! needs no prior read and concurrent writers for the same key are safe.
//!
//! The SDK's own retry machinery is disabled; transient errors (throttling,
//! 5xx, timeouts, connection resets) are retried here with jittered
//! exponential backoff, and permanent errors (authorization, validation)
//! fail immediately at `error!` severity since they indicate a
//! configuration problem rather than load.
//!
//! Credentials come from the ambient provider chain and rotate without
//! surfacing as call failures; chain construction is deferred to the first
//! call so constructing the store has no side effects.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::config::retry::RetryConfig as SdkRetryConfig;
use aws_sdk_dynamodb::config::timeout::TimeoutConfig;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use backoff::{future::retry_notify, ExponentialBackoff};
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use super::SignatureStore;
use crate::config::RemoteConfig;
use crate::error::{DejavuError, Result};

/// Partition key attribute. `hash` is a DynamoDB reserved word, so the
/// condition expression goes through an expression attribute name.
const KEY_ATTR: &str = "hash";

/// First-seen timestamp attribute (RFC-3339 UTC).
const FIRST_SEEN_ATTR: &str = "firstSeen";

/// Multiplicative retry jitter (±25%).
const RETRY_JITTER: f64 = 0.25;

/// DynamoDB client for the shared signature table.
pub struct DynamoSignatureStore {
    client: OnceCell<Client>,
    config: RemoteConfig,
}

impl DynamoSignatureStore {
    /// Create a store for the configured table. No network or credential
    /// work happens until the first call.
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: OnceCell::new(),
            config,
        }
    }

    /// Create a store around an existing SDK client (tests, local
    /// endpoints).
    pub fn with_client(client: Client, config: RemoteConfig) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            config,
        }
    }

    /// The SDK client, initialized lazily on first use.
    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.config.region.clone()))
                    .load()
                    .await;

                let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared)
                    // Retries are owned by the backoff layer in this module.
                    .retry_config(SdkRetryConfig::disabled())
                    .timeout_config(
                        TimeoutConfig::builder()
                            .operation_attempt_timeout(self.config.timeout)
                            .build(),
                    );

                if let Some(endpoint) = &self.config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }

                info!(
                    table = %self.config.table,
                    region = %self.config.region,
                    "remote signature store client created"
                );
                Client::from_conf(builder.build())
            })
            .await
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            randomization_factor: RETRY_JITTER,
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries),
            ..Default::default()
        }
    }

    async fn get_once(
        &self,
        content_fp: &str,
    ) -> std::result::Result<bool, backoff::Error<DejavuError>> {
        let start = Instant::now();

        let output = self
            .client()
            .await
            .get_item()
            .table_name(&self.config.table)
            .key(KEY_ATTR, AttributeValue::S(content_fp.to_string()))
            .send()
            .await
            .map_err(|e| classify(e, "GetItem"))?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            seen = output.item().is_some(),
            "remote lookup completed"
        );
        Ok(output.item().is_some())
    }

    async fn put_once(
        &self,
        content_fp: &str,
        first_seen: &str,
    ) -> std::result::Result<(), backoff::Error<DejavuError>> {
        let start = Instant::now();

        let result = self
            .client()
            .await
            .put_item()
            .table_name(&self.config.table)
            .item(KEY_ATTR, AttributeValue::S(content_fp.to_string()))
            .item(FIRST_SEEN_ATTR, AttributeValue::S(first_seen.to_string()))
            .condition_expression("attribute_not_exists(#h)")
            .expression_attribute_names("#h", KEY_ATTR)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    "remote signature recorded"
                );
                Ok(())
            }
            // First writer wins; a repeat write is a silent success.
            Err(e)
                if e.as_service_error()
                    .is_some_and(|s| s.is_conditional_check_failed_exception()) =>
            {
                debug!("fingerprint already recorded remotely");
                Ok(())
            }
            Err(e) => Err(classify(e, "PutItem")),
        }
    }
}

#[async_trait]
impl SignatureStore for DynamoSignatureStore {
    #[instrument(level = "debug", skip(self, content_fp))]
    async fn contains(&self, content_fp: &str) -> Result<bool> {
        retry_notify(
            self.build_backoff(),
            || async { self.get_once(content_fp).await },
            log_retry,
        )
        .await
    }

    #[instrument(level = "debug", skip(self, content_fp))]
    async fn store(&self, content_fp: &str) -> Result<()> {
        // Stable across retries: the first attempt's timestamp is the one
        // that lands.
        let first_seen = Utc::now().to_rfc3339();

        retry_notify(
            self.build_backoff(),
            || async { self.put_once(content_fp, &first_seen).await },
            log_retry,
        )
        .await
    }
}

fn log_retry(err: DejavuError, duration: Duration) {
    warn!(
        error = %err,
        retry_after_ms = duration.as_millis() as u64,
        "retry scheduled"
    );
}

/// Split SDK failures into transient (retried) and permanent (surfaced
/// immediately) classes.
fn classify<E>(err: SdkError<E>, operation: &str) -> backoff::Error<DejavuError>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => is_transient_code(err.meta().code()),
        _ => false,
    };

    let wrapped = match err.meta().code() {
        Some(code) => DejavuError::Remote(format!("{operation} failed: {code}")),
        None => DejavuError::Remote(format!("{operation} failed: {err}")),
    };

    if transient {
        warn!(error = %wrapped, "transient remote error, will retry");
        backoff::Error::transient(wrapped)
    } else {
        error!(error = %wrapped, "permanent remote error, not retrying");
        backoff::Error::permanent(wrapped)
    }
}

/// Service error codes that indicate load rather than misconfiguration.
fn is_transient_code(code: Option<&str>) -> bool {
    matches!(
        code,
        Some(
            "ThrottlingException"
                | "ProvisionedThroughputExceededException"
                | "RequestLimitExceeded"
                | "InternalServerError"
                | "ServiceUnavailable"
                | "TransactionConflictException"
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_codes() {
        assert!(is_transient_code(Some("ThrottlingException")));
        assert!(is_transient_code(Some(
            "ProvisionedThroughputExceededException"
        )));
        assert!(is_transient_code(Some("InternalServerError")));
        assert!(!is_transient_code(Some("AccessDeniedException")));
        assert!(!is_transient_code(Some("ValidationException")));
        assert!(!is_transient_code(None));
    }

    #[test]
    fn test_backoff_shape() {
        let store = DynamoSignatureStore::new(RemoteConfig::default());
        let backoff = store.build_backoff();

        assert_eq!(backoff.initial_interval, Duration::from_millis(100));
        assert_eq!(backoff.max_interval, Duration::from_secs(2));
        assert_eq!(backoff.randomization_factor, RETRY_JITTER);
        assert!(backoff.max_elapsed_time.is_some());
    }
}
