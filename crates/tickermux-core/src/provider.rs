//! Provider client contract and request/response types.
//!
//! Every external source is wrapped in an adapter implementing
//! [`ProviderClient`]: a name, a declared capability set, a cheap health
//! self-test, and a single `query` entry point. The trait uses boxed futures
//! so adapters stay object-safe behind `Arc<dyn ProviderClient>`.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::{DataType, ProviderId};

/// Raw payload returned by a provider. The gateway does not interpret it
/// beyond merging JSON objects during enhancement.
pub type Payload = Value;

/// Query parameters with canonical (key-sorted) serialization.
///
/// Backed by a `BTreeMap` so two parameter sets built in different insertion
/// orders serialize identically, which keeps cache keys order-invariant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(BTreeMap<String, Value>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for the single-ticker parameter set used by most routes.
    pub fn ticker(symbol: impl Into<String>) -> Self {
        Self::new().with("ticker", Value::String(symbol.into()))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic serialization; `BTreeMap` iteration order makes this
    /// independent of how the parameters were assembled.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("{}"))
    }
}

/// One provider call: which operation, with which parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub data_type: DataType,
    pub params: QueryParams,
}

impl QueryRequest {
    pub fn new(data_type: DataType, params: QueryParams) -> Self {
        Self { data_type, params }
    }
}

/// Supported operation matrix for a provider, one bit per [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, data_type: DataType) -> Self {
        Self(self.0 | data_type.bit())
    }

    pub const fn supports(self, data_type: DataType) -> bool {
        self.0 & data_type.bit() != 0
    }

    pub fn supported(self) -> Vec<DataType> {
        DataType::ALL
            .into_iter()
            .filter(|data_type| self.supports(*data_type))
            .collect()
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    UnsupportedOperation,
    Unavailable,
    RateLimited,
    Timeout,
    InvalidRequest,
    Upstream,
    Internal,
}

/// Structured error raised by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unsupported_operation(source: ProviderId, data_type: DataType) -> Self {
        Self {
            kind: SourceErrorKind::UnsupportedOperation,
            message: format!("operation '{data_type}' is not supported by source '{source}'"),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    /// Upstream failure whose retryability is decided by message
    /// classification (timeout, network, and rate-limit wording retry).
    pub fn upstream(message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = crate::error::retryable_message(&message);
        Self {
            kind: SourceErrorKind::Upstream,
            message,
            retryable,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::UnsupportedOperation => "source.unsupported_operation",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Upstream => "source.upstream",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Provider adapter contract.
///
/// Implementations must be `Send + Sync`; the gateway shares them across
/// spawned dispatch tasks.
pub trait ProviderClient: Send + Sync {
    /// Unique source identifier.
    fn id(&self) -> ProviderId;

    /// Operations this source can serve.
    fn capabilities(&self) -> CapabilitySet;

    /// Cheap self-test used by the gateway's background probe.
    fn is_healthy<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Executes one operation against the upstream source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the operation is unsupported, the
    /// source's own rate budget is exhausted, or the upstream call fails.
    fn query<'a>(
        &'a self,
        req: QueryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, SourceError>> + Send + 'a>>;
}
