use std::{sync::Arc, time::Duration};

use crate::{
    authentication::IdentityProvider,
    client::bounded,
    entities::{Credentials, Identity},
    error::{AuthError, RegistrationError, ValidationError},
    navigation::{Navigator, Screen},
    validation::validate_registration,
};

/// Registration flow: local checks first, then account creation.
#[derive(Clone)]
pub struct RegistrationFlow {
    provider: Arc<dyn IdentityProvider>,
    request_timeout: Duration,
}

impl RegistrationFlow {
    pub fn new(provider: Arc<dyn IdentityProvider>, request_timeout: Duration) -> Self {
        Self {
            provider,
            request_timeout,
        }
    }

    /// Runs every local check before contacting the provider; any failure
    /// there returns without a request.
    pub async fn register(&self, credentials: &Credentials) -> Result<Identity, RegistrationError> {
        validate_registration(credentials)?;

        let identity = bounded(
            self.request_timeout,
            self.provider.create_account(credentials),
            AuthError::Timeout,
        )
        .await
        .inspect_err(|err| tracing::warn!(error = %err, "registration failed"))?;

        tracing::info!(uid = %identity.uid, "registration succeeded");
        Ok(identity)
    }
}

/// Where the register form is. Both failure states keep the form editable;
/// the next edit returns it to `Editing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Editing,
    /// A local check failed; nothing was sent.
    ValidationFailed(ValidationError),
    Submitting,
    /// The provider refused the account, with its message.
    RemoteFailed(String),
    Registered,
}

/// Register screen state: the two inputs, the inline error and a busy flag.
pub struct RegisterScreen {
    flow: RegistrationFlow,
    navigator: Arc<dyn Navigator>,
    email: String,
    password: String,
    error_message: Option<String>,
    state: RegistrationState,
}

impl RegisterScreen {
    pub fn new(flow: RegistrationFlow, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            flow,
            navigator,
            email: String::new(),
            password: String::new(),
            error_message: None,
            state: RegistrationState::Editing,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    /// Inputs are locked while a request is in flight.
    pub fn is_loading(&self) -> bool {
        self.state == RegistrationState::Submitting
    }

    /// Typing in the email field clears the previous error.
    pub fn set_email(&mut self, email: impl Into<String>) {
        if self.is_loading() {
            return;
        }
        self.email = email.into();
        self.error_message = None;
        self.resume_editing();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        if self.is_loading() {
            return;
        }
        self.password = password.into();
        self.resume_editing();
    }

    fn resume_editing(&mut self) {
        if matches!(
            self.state,
            RegistrationState::ValidationFailed(_) | RegistrationState::RemoteFailed(_)
        ) {
            self.state = RegistrationState::Editing;
        }
    }

    /// Validates, creates the account and moves to the home screen. Local
    /// checks run before the form is marked busy. On failure the message is
    /// kept for display and the form stays editable.
    pub async fn submit(&mut self) -> Result<Identity, RegistrationError> {
        let credentials = Credentials::new(self.email.clone(), self.password.clone());

        if let Err(err) = validate_registration(&credentials) {
            self.error_message = Some(err.to_string());
            self.state = RegistrationState::ValidationFailed(err.clone());
            return Err(err.into());
        }

        self.state = RegistrationState::Submitting;
        match self.flow.register(&credentials).await {
            Ok(identity) => {
                self.state = RegistrationState::Registered;
                self.error_message = None;
                self.navigator.navigate(Screen::Home);
                Ok(identity)
            }
            Err(err) => {
                let message = err.to_string();
                self.state = match &err {
                    RegistrationError::Validation(local) => {
                        RegistrationState::ValidationFailed(local.clone())
                    }
                    RegistrationError::Auth(_) => RegistrationState::RemoteFailed(message.clone()),
                };
                self.error_message = Some(message);
                Err(err)
            }
        }
    }

    pub fn go_back(&self) {
        self.navigator.go_back();
    }
}
