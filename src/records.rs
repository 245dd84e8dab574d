use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};

use crate::{
    client::bounded,
    entities::{Document, EqualityFilter, Identity, OwnerId, Record, RecordId},
    error::{AuthError, RecordsError, StoreError},
    session::{IdentitySession, IdentityStream},
    store::DocumentStore,
    validation::validate_record_text,
};

pub const RECORDS_COLLECTION: &str = "records";
const TEXT_FIELD: &str = "text";
const OWNER_FIELD: &str = "user_id";

/// Records flow: list and create the to-do entries of one owner.
///
/// The owner is always passed in. Nothing here caches or reloads on its own;
/// callers decide when to call [`RecordsFlow::load_records`] again.
#[derive(Clone)]
pub struct RecordsFlow {
    store: Arc<dyn DocumentStore>,
    request_timeout: Duration,
}

impl RecordsFlow {
    pub fn new(store: Arc<dyn DocumentStore>, request_timeout: Duration) -> Self {
        Self {
            store,
            request_timeout,
        }
    }

    /// Every record owned by `owner`, in whatever order the backend returns.
    pub async fn load_records(&self, owner: &OwnerId) -> Result<Vec<Record>, RecordsError> {
        let filter = EqualityFilter::new(OWNER_FIELD, owner.as_str());
        let documents = bounded(
            self.request_timeout,
            self.store.query(RECORDS_COLLECTION, &filter),
            StoreError::Timeout,
        )
        .await
        .map_err(RecordsError::Query)?;

        let mut records = Vec::with_capacity(documents.len());
        for document in documents {
            let record = match record_from_document(document) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed record");
                    continue;
                }
            };
            if &record.owner != owner {
                tracing::warn!(id = %record.id, "skipping record owned by another identity");
                continue;
            }
            records.push(record);
        }

        tracing::debug!(owner = %owner, count = records.len(), "records loaded");
        Ok(records)
    }

    /// Creates one record and returns its id. Blank text is refused before any
    /// request is made.
    pub async fn add_record(&self, owner: &OwnerId, text: &str) -> Result<RecordId, RecordsError> {
        let text = validate_record_text(text).inspect_err(|_| {
            tracing::debug!("refusing to add a record with empty text");
        })?;

        let mut fields = Map::new();
        fields.insert(TEXT_FIELD.to_string(), Value::String(text.to_string()));
        fields.insert(
            OWNER_FIELD.to_string(),
            Value::String(owner.as_str().to_string()),
        );

        let id = bounded(
            self.request_timeout,
            self.store.insert(RECORDS_COLLECTION, fields),
            StoreError::Timeout,
        )
        .await
        .map_err(RecordsError::Write)?;

        tracing::debug!(owner = %owner, id = %id, "record added");
        Ok(RecordId(id))
    }
}

fn record_from_document(document: Document) -> Result<Record, RecordsError> {
    let Document {
        id,
        fields,
        created_at,
    } = document;

    let Some(text) = fields.get(TEXT_FIELD).and_then(Value::as_str) else {
        return Err(RecordsError::Malformed {
            id,
            field: TEXT_FIELD,
        });
    };
    let owner = fields
        .get(OWNER_FIELD)
        .and_then(Value::as_str)
        .and_then(|owner| OwnerId::new(owner).ok());
    let Some(owner) = owner else {
        return Err(RecordsError::Malformed {
            id,
            field: OWNER_FIELD,
        });
    };

    Ok(Record {
        id: RecordId(id),
        text: text.to_string(),
        owner,
        created_at,
    })
}

/// What the home screen is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordsState {
    Idle,
    Loading,
    Submitting,
    Loaded(Vec<Record>),
    Failed(String),
}

/// Home screen state: the signed-in identity, its records and the input box.
///
/// Owns its identity subscription; dropping the screen (or calling
/// [`HomeScreen::unmount`]) releases it.
pub struct HomeScreen {
    session: IdentitySession,
    records: RecordsFlow,
    identity_events: IdentityStream,
    identity: Option<Identity>,
    /// Owner of the list held in `state`, if any.
    loaded_for: Option<OwnerId>,
    input: String,
    state: RecordsState,
    error_message: Option<String>,
}

impl HomeScreen {
    pub fn mount(session: IdentitySession, records: RecordsFlow) -> Self {
        let identity_events = session.observe_identity();
        Self {
            session,
            records,
            identity_events,
            identity: None,
            loaded_for: None,
            input: String::new(),
            state: RecordsState::Idle,
            error_message: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn state(&self) -> &RecordsState {
        &self.state
    }

    /// Records currently on screen; empty unless loaded.
    pub fn records(&self) -> &[Record] {
        match &self.state {
            RecordsState::Loaded(records) => records,
            _ => &[],
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Waits for the next identity event and reacts to it: a new identity
    /// triggers a reload, no identity clears the list. Returns `false` once
    /// the subscription has ended.
    pub async fn next_identity_event(&mut self) -> bool {
        let Some(identity) = self.identity_events.next().await else {
            return false;
        };
        self.apply_identity(identity).await;
        true
    }

    async fn apply_identity(&mut self, identity: Option<Identity>) {
        if identity != self.identity {
            self.clear_list();
        }
        self.identity = identity;

        let Some(identity) = &self.identity else {
            return;
        };

        let stale = match identity.owner_id() {
            Ok(owner) => self.loaded_for.as_ref() != Some(&owner),
            Err(_) => true,
        };
        if stale {
            // failure is kept in `state` and `error_message`
            let _ = self.reload().await;
        }
    }

    /// Picks up identity changes that arrived without waiting on the stream.
    /// A list loaded for another identity is never kept.
    fn sync_identity(&mut self) {
        let current = self.identity_events.current();
        if current != self.identity {
            self.clear_list();
            self.identity = current;
        }
    }

    fn clear_list(&mut self) {
        self.state = RecordsState::Idle;
        self.loaded_for = None;
    }

    fn owner(&mut self) -> Result<OwnerId, RecordsError> {
        self.sync_identity();
        let identity = self.identity.as_ref().ok_or(RecordsError::NoIdentity)?;
        Ok(identity.owner_id()?)
    }

    /// Reloads the list for the current identity.
    pub async fn reload(&mut self) -> Result<(), RecordsError> {
        let owner = match self.owner() {
            Ok(owner) => owner,
            Err(err) => {
                self.error_message = Some(err.to_string());
                return Err(err);
            }
        };

        self.state = RecordsState::Loading;
        self.loaded_for = None;
        match self.records.load_records(&owner).await {
            Ok(records) => {
                self.state = RecordsState::Loaded(records);
                self.loaded_for = Some(owner);
                self.error_message = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load records");
                self.state = RecordsState::Failed(err.to_string());
                self.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Adds the input text as a record, clears the input and reloads. Once the
    /// record is written the id is returned even if the reload fails; that
    /// failure stays in `state` and `error_message`.
    pub async fn submit(&mut self) -> Result<RecordId, RecordsError> {
        let owner = match self.owner() {
            Ok(owner) => owner,
            Err(err) => {
                self.error_message = Some(err.to_string());
                return Err(err);
            }
        };

        let previous = std::mem::replace(&mut self.state, RecordsState::Submitting);
        let id = match self.records.add_record(&owner, &self.input).await {
            Ok(id) => id,
            Err(err) => {
                self.state = match &err {
                    RecordsError::Validation(_) => previous,
                    _ => {
                        self.loaded_for = None;
                        RecordsState::Failed(err.to_string())
                    }
                };
                self.error_message = Some(err.to_string());
                return Err(err);
            }
        };

        self.input.clear();
        // failure is kept in `state` and `error_message`
        let _ = self.reload().await;
        Ok(id)
    }

    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        match self.session.sign_out().await {
            Ok(()) => {
                self.sync_identity();
                Ok(())
            }
            Err(err) => {
                self.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Tears the screen down and releases the identity subscription.
    pub fn unmount(self) {
        self.identity_events.close();
    }
}
