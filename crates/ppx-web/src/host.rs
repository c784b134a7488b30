#![forbid(unsafe_code)]

//! Host-side delivery of messages to the page runtime.
//!
//! The page runtime may not be injected yet (first click on a tab, or the
//! page was reloaded). [`HostBridge::send`] probes with `ping`; if that
//! fails it injects the runtime, waits for it to settle and resends the
//! original message once. A second failure is reported as
//! [`MessagingError::CouldNotOpen`] and never retried.
//!
//! # Failure Modes
//!
//! | Step | Failure | Result |
//! |---|---|---|
//! | ping | unreachable | inject, settle, resend |
//! | inject | any error | `CouldNotOpen(Injection)` |
//! | resend | any error | `CouldNotOpen(..)` |
//! | any reply | `unknown_action` | `Rejected` |

use std::fmt;
use std::time::Duration;

use ppx_runtime::logging::LOG_TARGET;
use tracing::{debug, warn};

use crate::capability::TabId;
use crate::protocol::{Message, Response};

/// Browser messaging surface used by the host.
#[allow(async_fn_in_trait)]
pub trait MessagingGateway {
    /// Send `message` to the runtime in `tab` and wait for its reply.
    async fn send(&self, tab: TabId, message: &Message) -> Result<Response, MessagingError>;

    /// Inject the page runtime into `tab`.
    async fn inject(&self, tab: TabId) -> Result<(), MessagingError>;

    /// Let injected code initialise.
    async fn sleep(&self, duration: Duration);
}

/// Messaging failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// No receiver in the tab (runtime not injected, tab closed).
    Unreachable(String),
    /// Script injection was refused.
    Injection(String),
    /// The runtime answered but did not understand the message.
    Rejected(Response),
    /// Delivery failed after the inject-and-retry attempt.
    CouldNotOpen(Box<MessagingError>),
}

impl fmt::Display for MessagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(msg) => write!(f, "page runtime unreachable: {msg}"),
            Self::Injection(msg) => write!(f, "script injection failed: {msg}"),
            Self::Rejected(response) => write!(f, "message rejected with {response:?}"),
            Self::CouldNotOpen(_) => write!(f, "could not open the overlay on this page"),
        }
    }
}

impl std::error::Error for MessagingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CouldNotOpen(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

/// Retry-once-after-inject delivery.
#[derive(Debug)]
pub struct HostBridge<G> {
    gateway: G,
    settle: Duration,
}

impl<G: MessagingGateway> HostBridge<G> {
    pub fn new(gateway: G, settle: Duration) -> Self {
        Self { gateway, settle }
    }

    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Deliver `message`, injecting the runtime first if it does not answer.
    pub async fn send(&self, tab: TabId, message: &Message) -> Result<Response, MessagingError> {
        if let Err(e) = self.gateway.send(tab, &Message::Ping).await {
            debug!(target: LOG_TARGET, tab = tab.0, error = %e, "ping failed, injecting runtime");
            if let Err(e) = self.gateway.inject(tab).await {
                warn!(target: LOG_TARGET, tab = tab.0, error = %e, "failed to inject page runtime");
                return Err(MessagingError::CouldNotOpen(Box::new(e)));
            }
            self.gateway.sleep(self.settle).await;
        }

        match self.gateway.send(tab, message).await {
            Ok(Response::UnknownAction) => {
                warn!(target: LOG_TARGET, action = message.action(), "page runtime rejected message");
                Err(MessagingError::Rejected(Response::UnknownAction))
            }
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(target: LOG_TARGET, tab = tab.0, action = message.action(), error = %e, "failed to open menu");
                Err(MessagingError::CouldNotOpen(Box::new(e)))
            }
        }
    }

    /// Toolbar click: toggle the page's main menu.
    pub async fn toggle_main_menu(&self, tab: TabId) -> Result<Response, MessagingError> {
        self.send(tab, &Message::ToggleMainMenu).await
    }
}
