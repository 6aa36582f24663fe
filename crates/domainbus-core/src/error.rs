//! Error handling for domainbus
//!
//! The bus itself never fails: publishing, subscribing and disposing are
//! infallible by contract. Errors only exist at the edges of a single
//! subscription:
//! - Stream errors (a filter or transform stage failed)
//! - Handler errors (a subscriber callback returned an error or panicked)
//!
//! Both stay local to the subscription that produced them.

use thiserror::Error;

use crate::types::BoxedSendError;

/// Error surfaced through a derived stream.
///
/// Delivered as an `Err` item to the one stream whose stage failed. The
/// stream keeps running afterwards and the shared channel is untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A user-supplied stage (predicate, transform) panicked
    #[error("Stream stage '{stage}' panicked: {message}")]
    StagePanicked {
        /// Name of the operator stage.
        stage: &'static str,
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// Error raised while delivering one event to a subscriber callback.
///
/// Handler errors are caught at the delivery boundary, logged, and passed to
/// the subscription's optional handler-error callback. They never terminate
/// the subscription and never reach other subscribers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler returned an error
    #[error("Handler '{subscription}' failed: {source}")]
    Failed {
        /// Subscription name, or its id when unnamed.
        subscription: String,
        /// The error returned by the handler.
        #[source]
        source: BoxedSendError,
    },

    /// The handler panicked
    #[error("Handler '{subscription}' panicked: {message}")]
    Panicked {
        /// Subscription name, or its id when unnamed.
        subscription: String,
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl HandlerError {
    /// Name of the subscription whose handler failed.
    pub fn subscription(&self) -> &str {
        match self {
            HandlerError::Failed { subscription, .. } => subscription,
            HandlerError::Panicked { subscription, .. } => subscription,
        }
    }

    /// Whether the handler panicked rather than returning an error.
    pub fn is_panic(&self) -> bool {
        matches!(self, HandlerError::Panicked { .. })
    }
}

/// Extract a readable message from a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
