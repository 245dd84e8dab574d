use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    authentication::{IdentityProvider, SqliteAuthBackend},
    config::{BackendKind, Settings},
    error::{ConfigError, ConnectError},
    firebase::FirebaseClient,
    navigation::Navigator,
    records::{HomeScreen, RecordsFlow},
    registration::{RegisterScreen, RegistrationFlow},
    session::IdentitySession,
    store::{connect_sqlite, DocumentStore, SqliteDocumentStore},
};

/// The two backend collaborators plus the timeout applied to every call.
#[derive(Clone)]
pub struct TodoClient {
    identity: Arc<dyn IdentityProvider>,
    documents: Arc<dyn DocumentStore>,
    request_timeout: Duration,
}

impl TodoClient {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        documents: Arc<dyn DocumentStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            documents,
            request_timeout,
        }
    }

    /// Builds the backend selected by `settings`.
    pub async fn connect(settings: &Settings) -> Result<Self, ConnectError> {
        let timeout = settings.request_timeout();
        match settings.backend {
            BackendKind::Sqlite => {
                let sqlite_pool = connect_sqlite(&settings.database_url).await?;
                tracing::info!(database_url = %settings.database_url, "using sqlite backend");
                Ok(Self::new(
                    Arc::new(SqliteAuthBackend::new(sqlite_pool.clone())),
                    Arc::new(SqliteDocumentStore::new(sqlite_pool)),
                    timeout,
                ))
            }
            BackendKind::Firebase => {
                let firebase = settings
                    .firebase
                    .clone()
                    .ok_or(ConfigError::MissingFirebase("api_key"))?;
                tracing::info!(project_id = %firebase.project_id, "using firebase backend");
                let client = Arc::new(FirebaseClient::new(firebase));
                Ok(Self::new(client.clone(), client, timeout))
            }
        }
    }

    pub fn session(&self) -> IdentitySession {
        IdentitySession::new(self.identity.clone(), self.request_timeout)
    }

    pub fn records(&self) -> RecordsFlow {
        RecordsFlow::new(self.documents.clone(), self.request_timeout)
    }

    pub fn registration(&self) -> RegistrationFlow {
        RegistrationFlow::new(self.identity.clone(), self.request_timeout)
    }

    pub fn home_screen(&self) -> HomeScreen {
        HomeScreen::mount(self.session(), self.records())
    }

    pub fn register_screen(&self, navigator: Arc<dyn Navigator>) -> RegisterScreen {
        RegisterScreen::new(self.registration(), navigator)
    }
}

/// Runs `request`, giving up with `on_timeout` once `limit` has passed.
pub(crate) async fn bounded<T, E, F>(limit: Duration, request: F, on_timeout: E) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout),
    }
}
