use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    authentication::IdentityProvider,
    client::bounded,
    entities::{Credentials, Identity},
    error::AuthError,
};

/// Identity session flow: observe who is signed in, sign in and out.
#[derive(Clone)]
pub struct IdentitySession {
    provider: Arc<dyn IdentityProvider>,
    request_timeout: Duration,
}

impl IdentitySession {
    pub fn new(provider: Arc<dyn IdentityProvider>, request_timeout: Duration) -> Self {
        Self {
            provider,
            request_timeout,
        }
    }

    /// Fresh subscription. The first emission is the identity current at the
    /// time of the call.
    pub fn observe_identity(&self) -> IdentityStream {
        IdentityStream::new(self.provider.subscribe())
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        bounded(
            self.request_timeout,
            self.provider.sign_in(credentials),
            AuthError::Timeout,
        )
        .await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        bounded(
            self.request_timeout,
            self.provider.sign_out(),
            AuthError::Timeout,
        )
        .await
        .inspect_err(|err| tracing::warn!(error = %err, "sign-out failed"))
    }
}

/// Owned subscription to identity changes. Dropping it detaches the listener.
///
/// Emissions coalesce: a consumer that falls behind sees only the latest
/// identity, never a backlog.
#[derive(Debug)]
pub struct IdentityStream {
    receiver: watch::Receiver<Option<Identity>>,
    primed: bool,
}

impl IdentityStream {
    fn new(receiver: watch::Receiver<Option<Identity>>) -> Self {
        Self {
            receiver,
            primed: false,
        }
    }

    /// Waits for the next identity event. `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<Option<Identity>> {
        if !self.primed {
            self.primed = true;
            return Some(self.receiver.borrow_and_update().clone());
        }

        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Latest identity, without consuming an emission.
    pub fn current(&self) -> Option<Identity> {
        self.receiver.borrow().clone()
    }

    /// Explicit release; same effect as dropping.
    pub fn close(self) {}
}

impl Drop for IdentityStream {
    fn drop(&mut self) {
        tracing::debug!("identity subscription released");
    }
}
