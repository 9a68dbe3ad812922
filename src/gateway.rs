//! Remote item store contract consumed by the detector.

use crate::item::{Item, ItemKind, ItemState, Label, LabelSpec, StateFilter};
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Store unreachable or credentials rejected.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    /// One listed record could not be turned into an [`Item`].
    #[error("malformed item{}: {reason}", .number.map(|n| format!(" #{}", n)).unwrap_or_default())]
    MalformedItem { number: Option<u64>, reason: String },
}

impl GatewayError {
    /// Errors that only affect a single listed record.
    pub fn is_per_item(&self) -> bool {
        matches!(self, GatewayError::MalformedItem { .. })
    }
}

/// Operations the detector needs from the remote store.
///
/// Each call is independent: a failure never rolls back earlier calls.
pub trait ItemGateway {
    /// Check the repository is reachable with the configured credentials.
    fn verify_access(&self) -> GatewayFuture<'_, ()>;

    /// Return the label, creating it from `spec` when it does not exist.
    fn ensure_label<'a>(&'a self, spec: &'a LabelSpec) -> GatewayFuture<'a, Label>;

    fn add_label<'a>(&'a self, number: u64, label: &'a str) -> GatewayFuture<'a, ()>;

    fn add_comment<'a>(&'a self, number: u64, body: &'a str) -> GatewayFuture<'a, ()>;

    fn set_state(&self, number: u64, state: ItemState) -> GatewayFuture<'_, ()>;

    /// Lazily list items of `kind` in the store's default order.
    ///
    /// Issue listings may include pull requests; callers filter by `kind`.
    fn list_items(
        &self,
        kind: ItemKind,
        filter: StateFilter,
    ) -> BoxStream<'_, Result<Item, GatewayError>>;
}
