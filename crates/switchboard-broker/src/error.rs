//! Broker error types.

use thiserror::Error;

/// Errors raised by registration calls and by firing.
///
/// Registration errors are returned synchronously to the caller performing
/// the mutation and leave the affected topic unchanged. They are never
/// retried by the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The publisher already has a publication for this event on the topic.
    #[error("duplicate publication '{event_name}' on topic '{topic}'")]
    DuplicatePublication {
        /// Topic URI.
        topic: String,
        /// Event source name.
        event_name: String,
    },

    /// The subscriber already has a subscription for this handler on the topic.
    #[error("duplicate subscription '{handler}' on topic '{topic}'")]
    DuplicateSubscription {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
    },

    /// A subscription's declared payload type cannot accept a publication's payload type.
    #[error(
        "incompatible payload on topic '{topic}': subscription expects {expected}, publication raises {actual}"
    )]
    IncompatiblePayload {
        /// Topic URI.
        topic: String,
        /// Payload type declared by the subscription.
        expected: String,
        /// Payload type raised by the publication.
        actual: String,
    },

    /// A subscription's strategy kind conflicts with a publication's handler restriction.
    #[error(
        "handler restriction violated on topic '{topic}': publication requires {required}, subscription uses {actual}"
    )]
    HandlerRestrictionViolation {
        /// Topic URI.
        topic: String,
        /// Strategy kind required by the publication.
        required: String,
        /// Strategy kind used by the subscription.
        actual: String,
    },

    /// The handler method has a parameter list no handler shape supports.
    #[error("invalid handler signature for '{handler}': {reason}")]
    InvalidHandlerSignature {
        /// Handler method name.
        handler: String,
        /// Why the signature was rejected.
        reason: String,
    },

    /// The handler method is bound on a type rather than an instance.
    #[error("handler '{handler}' is static; only instance handlers can subscribe")]
    StaticHandler {
        /// Handler method name.
        handler: String,
    },

    /// No live publication matches the given publisher and event name.
    #[error("unknown publication '{event_name}' on topic '{topic}'")]
    UnknownPublication {
        /// Topic URI.
        topic: String,
        /// Event source name.
        event_name: String,
    },

    /// No strategy constructor is registered for the requested kind.
    #[error("unknown execution strategy '{kind}'")]
    UnknownStrategy {
        /// The requested strategy kind.
        kind: String,
    },

    /// No matcher constructor is registered under the requested name.
    #[error("unknown matcher '{name}'")]
    UnknownMatcher {
        /// The requested matcher name.
        name: String,
    },

    /// An object's self-registration hook failed.
    #[error("self-registration of {type_name} failed: {error:#}")]
    SelfRegistration {
        /// Type name of the object being registered.
        type_name: String,
        /// The failure reported by the hook.
        error: anyhow::Error,
    },

    /// A subscriber handler failed and no extension marked the failure handled.
    #[error("subscriber '{handler}' failed on topic '{topic}': {error:#}")]
    Subscriber {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
        /// The failure raised by the handler.
        error: anyhow::Error,
    },

    /// The background worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] std::io::Error),
}

impl BrokerError {
    /// The original handler failure, if this error came from a subscriber.
    #[must_use]
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Subscriber { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Consume the error and return the original handler failure, if any.
    #[must_use]
    pub fn into_handler_error(self) -> Option<anyhow::Error> {
        match self {
            Self::Subscriber { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether this error was raised by a registration call.
    #[must_use]
    pub fn is_registration_error(&self) -> bool {
        !matches!(self, Self::Subscriber { .. } | Self::WorkerPool(_))
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
