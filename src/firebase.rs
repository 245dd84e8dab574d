//! Firebase REST adapter.
//!
//! Accounts go through the Identity Toolkit API, records through Firestore.
//! Firestore wraps every value in a type tag (`{"stringValue": "x"}`); the
//! rest of the crate works on plain JSON, so values are converted both ways
//! at this boundary. Id tokens are refreshed through the Secure Token API
//! when they are about to expire or get rejected.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::watch;

use crate::{
    authentication::{IdentityProvider, IdentityState},
    config::FirebaseSettings,
    entities::{Credentials, Document, EqualityFilter, Identity},
    error::{AuthError, StoreError},
    store::DocumentStore,
};

pub const DEFAULT_AUTH_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_TOKEN_BASE_URL: &str = "https://securetoken.googleapis.com/v1";

/// Id tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug)]
pub struct FirebaseClient {
    http: reqwest::Client,
    settings: FirebaseSettings,
    state: IdentityState,
    tokens: Mutex<Option<TokenSet>>,
}

#[derive(Debug, Clone)]
struct TokenSet {
    id_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    fn new(id_token: String, refresh_token: Option<String>, expires_in: Option<&str>) -> Self {
        let expires_at = expires_in
            .and_then(|secs| secs.trim().parse::<i64>().ok())
            .and_then(TimeDelta::try_seconds)
            .map(|lifetime| Utc::now() + lifetime);
        Self {
            id_token,
            refresh_token,
            expires_at,
        }
    }

    fn needs_refresh(&self) -> bool {
        let margin = TimeDelta::seconds(REFRESH_MARGIN_SECS);
        self.refresh_token.is_some()
            && self
                .expires_at
                .is_some_and(|expires_at| expires_at - margin <= Utc::now())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

/// Secure Token API answers in snake_case.
#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    create_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RunQueryItem {
    document: Option<FirestoreDocument>,
}

impl FirebaseClient {
    pub fn new(settings: FirebaseSettings) -> Self {
        Self::with_http(settings, reqwest::Client::new())
    }

    pub fn with_http(settings: FirebaseSettings, http: reqwest::Client) -> Self {
        Self {
            http,
            settings,
            state: IdentityState::new(),
            tokens: Mutex::new(None),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.listener_count()
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            self.settings.firestore_base_url.trim_end_matches('/'),
            self.settings.project_id
        )
    }

    fn tokens(&self) -> Option<TokenSet> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_session(&self, identity: Option<Identity>, tokens: Option<TokenSet>) {
        *self.tokens.lock().unwrap_or_else(|e| e.into_inner()) = tokens;
        self.state.set(identity);
    }

    async fn password_request(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Identity, AuthError> {
        let url = format!(
            "{}/accounts:{endpoint}?key={}",
            self.settings.auth_base_url.trim_end_matches('/'),
            self.settings.api_key
        );
        let response = self
            .http
            .post(url)
            .json(&PasswordRequest {
                email: &credentials.email,
                password: &credentials.password,
                return_secure_token: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await?;
            return Err(auth_error(&error_message(&body)));
        }

        let account: AccountResponse = response.json().await?;
        let identity = Identity {
            uid: account.local_id,
            email: account.email.or_else(|| Some(credentials.email.clone())),
        };
        let tokens = account.id_token.map(|id_token| {
            TokenSet::new(id_token, account.refresh_token, account.expires_in.as_deref())
        });
        self.set_session(Some(identity.clone()), tokens);
        Ok(identity)
    }

    /// Id token to send, refreshed first when it is about to expire.
    async fn current_id_token(&self) -> Result<Option<String>, StoreError> {
        let Some(tokens) = self.tokens() else {
            return Ok(None);
        };
        match (&tokens.refresh_token, tokens.needs_refresh()) {
            (Some(refresh_token), true) => self.refresh(refresh_token).await.map(Some),
            _ => Ok(Some(tokens.id_token)),
        }
    }

    /// Trades `refresh_token` for a new id token. A refused refresh token ends
    /// the session: the identity becomes `None`.
    async fn refresh(&self, refresh_token: &str) -> Result<String, StoreError> {
        let url = format!(
            "{}/token?key={}",
            self.settings.token_base_url.trim_end_matches('/'),
            self.settings.api_key
        );
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await?;
            tracing::warn!(reason = %error_message(&body), "refresh token refused, signing out");
            self.set_session(None, None);
            return Err(StoreError::SessionExpired);
        }
        let response = check_store_response(response).await?;

        let refreshed: RefreshResponse = response.json().await?;
        let tokens = TokenSet::new(
            refreshed.id_token,
            refreshed
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            refreshed.expires_in.as_deref(),
        );
        let id_token = tokens.id_token.clone();

        let mut current = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        // a sign-out or new sign-in while refreshing wins
        let same_session = current
            .as_ref()
            .is_some_and(|held| held.refresh_token.as_deref() == Some(refresh_token));
        if same_session {
            *current = Some(tokens);
        }
        drop(current);

        tracing::debug!("id token refreshed");
        Ok(id_token)
    }

    /// Sends the request built by `build` with the current id token. A 401 is
    /// answered by one refresh and one retry.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, StoreError>
    where
        F: Fn() -> reqwest::RequestBuilder + Send,
    {
        let token = self.current_id_token().await?;
        let response = with_token(build(), token.as_deref()).send().await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(refresh_token) = self.tokens().and_then(|tokens| tokens.refresh_token) else {
            return Ok(response);
        };
        tracing::debug!("id token rejected, refreshing");
        let token = self.refresh(&refresh_token).await?;
        Ok(build().bearer_auth(token).send().await?)
    }
}

fn with_token(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

#[async_trait]
impl IdentityProvider for FirebaseClient {
    async fn create_account(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        self.password_request("signUp", credentials).await
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        self.password_request("signInWithPassword", credentials)
            .await
    }

    /// Sessions are client-side tokens; signing out forgets them.
    async fn sign_out(&self) -> Result<(), AuthError> {
        self.set_session(None, None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

#[async_trait]
impl DocumentStore for FirebaseClient {
    async fn query(
        &self,
        collection: &str,
        filter: &EqualityFilter,
    ) -> Result<Vec<Document>, StoreError> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": filter.field },
                        "op": "EQUAL",
                        "value": { "stringValue": filter.value },
                    }
                }
            }
        });

        let url = format!("{}:runQuery", self.documents_url());
        let response = self
            .send_authorized(|| self.http.post(&url).json(&body))
            .await?;
        let response = check_store_response(response).await?;

        let items: Vec<RunQueryItem> = response.json().await?;
        items
            .into_iter()
            .filter_map(|item| item.document)
            .map(document_from_firestore)
            .collect()
    }

    async fn insert(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<String, StoreError> {
        let typed: Map<String, Value> = fields
            .into_iter()
            .map(|(key, value)| (key, to_firestore_value(value)))
            .collect();

        let url = format!("{}/{collection}", self.documents_url());
        let body = json!({ "fields": typed });
        let response = self
            .send_authorized(|| self.http.post(&url).json(&body))
            .await?;
        let response = check_store_response(response).await?;

        let created: FirestoreDocument = response.json().await?;
        Ok(document_id(&created.name))
    }
}

async fn check_store_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    Err(StoreError::Remote {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string())
}

/// Identity Toolkit answers with codes like `EMAIL_EXISTS` or
/// `WEAK_PASSWORD : Password should be at least 6 characters`.
fn auth_error(raw: &str) -> AuthError {
    let (code, detail) = match raw.split_once(" : ") {
        Some((code, detail)) => (code.trim(), Some(detail.trim())),
        None => (raw.trim(), None),
    };

    let message = match code {
        "EMAIL_EXISTS" => "The email address is already in use by another account.",
        "INVALID_EMAIL" => "The email address is badly formatted.",
        "WEAK_PASSWORD" => detail.unwrap_or("The password is too weak."),
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "The email or password is incorrect."
        }
        "USER_DISABLED" => "This account has been disabled.",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts. Try again later.",
        "OPERATION_NOT_ALLOWED" => "Email and password sign-in is disabled for this project.",
        _ => detail.unwrap_or(raw),
    };

    AuthError::rejected(code, message)
}

fn document_id(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

fn document_from_firestore(document: FirestoreDocument) -> Result<Document, StoreError> {
    let fields = document
        .fields
        .into_iter()
        .map(|(key, value)| Ok((key, from_firestore_value(value)?)))
        .collect::<Result<Map<String, Value>, StoreError>>()?;

    Ok(Document {
        id: document_id(&document.name),
        fields,
        created_at: document.create_time,
    })
}

fn to_firestore_value(value: Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.into_iter().map(to_firestore_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, to_firestore_value(value)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

fn from_firestore_value(value: Value) -> Result<Value, StoreError> {
    let Value::Object(mut tagged) = value else {
        return Err(decode_error("firestore value is not an object"));
    };
    if tagged.len() != 1 {
        return Err(decode_error("firestore value must carry exactly one type tag"));
    }
    let Some((tag, inner)) = tagged.iter_mut().next().map(|(k, v)| (k.clone(), v.take())) else {
        return Err(decode_error("empty firestore value"));
    };

    match tag.as_str() {
        "nullValue" => Ok(Value::Null),
        "integerValue" => {
            let parsed = match &inner {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            parsed
                .map(Value::from)
                .ok_or_else(|| decode_error("integerValue is not an integer"))
        }
        "arrayValue" => {
            let values = match inner {
                Value::Object(mut array) => array.remove("values").unwrap_or(Value::Null),
                _ => return Err(decode_error("arrayValue is not an object")),
            };
            match values {
                Value::Null => Ok(Value::Array(Vec::new())),
                Value::Array(items) => items
                    .into_iter()
                    .map(from_firestore_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => Err(decode_error("arrayValue.values is not an array")),
            }
        }
        "mapValue" => {
            let fields = match inner {
                Value::Object(mut map) => map.remove("fields").unwrap_or(Value::Null),
                _ => return Err(decode_error("mapValue is not an object")),
            };
            match fields {
                Value::Null => Ok(Value::Object(Map::new())),
                Value::Object(fields) => fields
                    .into_iter()
                    .map(|(key, value)| Ok((key, from_firestore_value(value)?)))
                    .collect::<Result<Map<String, Value>, StoreError>>()
                    .map(Value::Object),
                _ => Err(decode_error("mapValue.fields is not an object")),
            }
        }
        // stringValue, booleanValue, doubleValue, timestampValue, referenceValue,
        // bytesValue and geoPointValue are already plain JSON
        _ => Ok(inner),
    }
}

fn decode_error(message: &str) -> StoreError {
    StoreError::Decode(<serde_json::Error as serde::de::Error>::custom(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode, Uri},
        response::{IntoResponse, Response},
        Json, Router,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct MockState {
        // (collection, id, typed fields)
        documents: Arc<Mutex<Vec<(String, String, Value)>>>,
        valid_token: Arc<Mutex<String>>,
        refreshes: Arc<AtomicUsize>,
    }

    impl MockState {
        fn new() -> Self {
            Self {
                documents: Arc::default(),
                valid_token: Arc::new(Mutex::new("token-1".into())),
                refreshes: Arc::default(),
            }
        }

        fn token(&self) -> String {
            self.valid_token.lock().unwrap().clone()
        }
    }

    fn firebase_error(status: StatusCode, message: &str) -> Response {
        (
            status,
            Json(json!({ "error": { "code": status.as_u16(), "message": message } })),
        )
            .into_response()
    }

    /// `expiring@` accounts get a token that is already stale, `revoked@`
    /// accounts additionally get a refresh token the server refuses.
    fn account(state: &MockState, email: &Value) -> Response {
        let email = email.as_str().unwrap_or_default();
        let expires_in = if email.starts_with("expiring@") || email.starts_with("revoked@") {
            "0"
        } else {
            "3600"
        };
        let refresh_token = if email.starts_with("revoked@") {
            "revoked"
        } else {
            "refresh-1"
        };
        Json(json!({
            "localId": "uid-1",
            "email": email,
            "idToken": state.token(),
            "refreshToken": refresh_token,
            "expiresIn": expires_in,
        }))
        .into_response()
    }

    async fn mock_firebase(
        State(state): State<MockState>,
        uri: Uri,
        headers: HeaderMap,
        raw: String,
    ) -> Response {
        let path = uri.path().to_string();
        let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);

        if path.ends_with("accounts:signUp") {
            if !uri.query().unwrap_or_default().contains("key=test-key") {
                return firebase_error(StatusCode::BAD_REQUEST, "API key not valid.");
            }
            if body["email"] == "taken@b.com" {
                return firebase_error(StatusCode::BAD_REQUEST, "EMAIL_EXISTS");
            }
            return account(&state, &body["email"]);
        }

        if path.ends_with("accounts:signInWithPassword") {
            if body["password"] != "Abcdef1!" {
                return firebase_error(StatusCode::BAD_REQUEST, "INVALID_LOGIN_CREDENTIALS");
            }
            return account(&state, &body["email"]);
        }

        if path.ends_with("/token") {
            let refused = raw.contains("refresh_token=revoked");
            if refused || !raw.contains("grant_type=refresh_token") {
                return firebase_error(StatusCode::BAD_REQUEST, "TOKEN_EXPIRED");
            }
            let n = state.refreshes.fetch_add(1, Ordering::SeqCst) + 2;
            let token = format!("token-{n}");
            *state.valid_token.lock().unwrap() = token.clone();
            return Json(json!({
                "id_token": token,
                "refresh_token": "refresh-1",
                "expires_in": "3600",
                "token_type": "Bearer",
                "user_id": "uid-1",
            }))
            .into_response();
        }

        let Some(bearer) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
            return firebase_error(
                StatusCode::FORBIDDEN,
                "Missing or insufficient permissions.",
            );
        };
        if bearer != format!("Bearer {}", state.token()) {
            return firebase_error(
                StatusCode::UNAUTHORIZED,
                "Request had invalid authentication credentials.",
            );
        }

        if path.ends_with("documents:runQuery") {
            let query = &body["structuredQuery"];
            let collection = query["from"][0]["collectionId"].clone();
            let filter = &query["where"]["fieldFilter"];
            let field = filter["field"]["fieldPath"].as_str().unwrap_or_default();
            let wanted = filter["value"].clone();

            let documents = state.documents.lock().unwrap();
            let mut items: Vec<Value> = documents
                .iter()
                .filter(|(c, _, fields)| collection == c.as_str() && fields[field] == wanted)
                .map(|(c, id, fields)| {
                    json!({
                        "document": {
                            "name": format!("projects/demo/databases/(default)/documents/{c}/{id}"),
                            "fields": fields,
                            "createTime": "2024-05-01T12:00:00.123456Z",
                        },
                        "readTime": "2024-05-01T12:00:01Z",
                    })
                })
                .collect();
            if items.is_empty() {
                items.push(json!({ "readTime": "2024-05-01T12:00:01Z" }));
            }
            return Json(Value::Array(items)).into_response();
        }

        if let Some((_, collection)) = path.rsplit_once("/documents/") {
            let mut documents = state.documents.lock().unwrap();
            let id = format!("doc-{}", documents.len() + 1);
            documents.push((collection.to_string(), id.clone(), body["fields"].clone()));
            return Json(json!({
                "name": format!("projects/demo/databases/(default)/documents/{collection}/{id}"),
                "fields": body["fields"],
                "createTime": "2024-05-01T12:00:00Z",
            }))
            .into_response();
        }

        StatusCode::NOT_FOUND.into_response()
    }

    async fn spawn_mock() -> (MockState, FirebaseClient) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = MockState::new();
        let app = Router::new()
            .fallback(mock_firebase)
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let base = format!("http://{addr}/v1");
        let settings = FirebaseSettings {
            api_key: "test-key".into(),
            project_id: "demo".into(),
            auth_base_url: base.clone(),
            firestore_base_url: base.clone(),
            token_base_url: base,
        };
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("http client");
        (state, FirebaseClient::with_http(settings, http))
    }

    fn record_fields(text: &str, owner: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("text".into(), Value::from(text));
        fields.insert("user_id".into(), Value::from(owner));
        fields
    }

    #[tokio::test]
    async fn sign_up_makes_the_account_current() {
        let (_, client) = spawn_mock().await;
        let rx = client.subscribe();

        let identity = client
            .create_account(&Credentials::new("a@b.com", "Abcdef1!"))
            .await
            .expect("sign up");

        assert_eq!(identity.uid, "uid-1");
        assert_eq!(identity.email.as_deref(), Some("a@b.com"));
        assert_eq!(rx.borrow().as_ref(), Some(&identity));
    }

    #[tokio::test]
    async fn provider_codes_become_readable_messages() {
        let (_, client) = spawn_mock().await;

        let err = client
            .create_account(&Credentials::new("taken@b.com", "Abcdef1!"))
            .await
            .unwrap_err();
        match err {
            AuthError::Rejected { code, message } => {
                assert_eq!(code, "EMAIL_EXISTS");
                assert_eq!(
                    message,
                    "The email address is already in use by another account."
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = client
            .sign_in(&Credentials::new("a@b.com", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "The email or password is incorrect.");
    }

    #[tokio::test]
    async fn records_round_trip_through_firestore() {
        let (state, client) = spawn_mock().await;
        client
            .sign_in(&Credentials::new("a@b.com", "Abcdef1!"))
            .await
            .expect("sign in");

        let id = client
            .insert("records", record_fields("Buy milk", "uid-1"))
            .await
            .expect("insert");
        client
            .insert("records", record_fields("Not mine", "uid-2"))
            .await
            .expect("insert");

        let stored = state.documents.lock().unwrap()[0].2.clone();
        assert_eq!(stored["text"], json!({ "stringValue": "Buy milk" }));

        let docs = client
            .query("records", &EqualityFilter::new("user_id", "uid-1"))
            .await
            .expect("query");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(docs[0].fields["text"], "Buy milk");
        assert!(docs[0].created_at.is_some());

        let none = client
            .query("records", &EqualityFilter::new("user_id", "uid-3"))
            .await
            .expect("query");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn store_errors_carry_status_and_message() {
        let (_, client) = spawn_mock().await;

        let err = client
            .query("records", &EqualityFilter::new("user_id", "uid-1"))
            .await
            .unwrap_err();

        match err {
            StoreError::Remote { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Missing or insufficient permissions.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sign_out_drops_the_token() {
        let (_, client) = spawn_mock().await;
        client
            .sign_in(&Credentials::new("a@b.com", "Abcdef1!"))
            .await
            .expect("sign in");
        client.sign_out().await.expect("sign out");

        assert_eq!(*client.subscribe().borrow(), None);
        assert!(client
            .query("records", &EqualityFilter::new("user_id", "uid-1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn stale_id_token_is_refreshed_before_use() {
        let (state, client) = spawn_mock().await;
        client
            .sign_in(&Credentials::new("expiring@b.com", "Abcdef1!"))
            .await
            .expect("sign in");

        client
            .insert("records", record_fields("Buy milk", "uid-1"))
            .await
            .expect("insert after refresh");
        let docs = client
            .query("records", &EqualityFilter::new("user_id", "uid-1"))
            .await
            .expect("query");

        assert_eq!(docs.len(), 1);
        assert_eq!(state.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(client.tokens().expect("tokens").id_token, "token-2");
    }

    #[tokio::test]
    async fn rejected_id_token_is_refreshed_and_retried_once() {
        let (state, client) = spawn_mock().await;
        client
            .sign_in(&Credentials::new("a@b.com", "Abcdef1!"))
            .await
            .expect("sign in");
        *state.valid_token.lock().unwrap() = "rotated".into();

        let docs = client
            .query("records", &EqualityFilter::new("user_id", "uid-1"))
            .await
            .expect("query after retry");

        assert!(docs.is_empty());
        assert_eq!(state.refreshes.load(Ordering::SeqCst), 1);
        let current = client.subscribe().borrow().clone();
        assert_eq!(current.map(|identity| identity.uid), Some("uid-1".to_string()));
    }

    #[tokio::test]
    async fn refused_refresh_token_signs_the_identity_out() {
        let (state, client) = spawn_mock().await;
        let rx = client.subscribe();
        client
            .sign_in(&Credentials::new("revoked@b.com", "Abcdef1!"))
            .await
            .expect("sign in");
        assert!(rx.borrow().is_some());

        let err = client
            .query("records", &EqualityFilter::new("user_id", "uid-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::SessionExpired));
        assert_eq!(*rx.borrow(), None);
        assert!(client.tokens().is_none());
        assert_eq!(state.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn typed_values_convert_both_ways() {
        let plain = json!({
            "n": 3,
            "f": 1.5,
            "b": true,
            "z": null,
            "list": ["a", 1],
            "nested": { "k": "v" },
        });

        let typed = to_firestore_value(plain.clone());
        assert_eq!(typed["mapValue"]["fields"]["n"], json!({ "integerValue": "3" }));
        assert_eq!(
            typed["mapValue"]["fields"]["list"]["arrayValue"]["values"][0],
            json!({ "stringValue": "a" })
        );

        assert_eq!(from_firestore_value(typed).expect("decode"), plain);
    }

    #[test]
    fn untagged_values_are_rejected() {
        assert!(from_firestore_value(json!("bare")).is_err());
        assert!(from_firestore_value(json!({ "stringValue": "a", "booleanValue": true })).is_err());
    }

    #[test]
    fn weak_password_keeps_the_provider_detail() {
        let err = auth_error("WEAK_PASSWORD : Password should be at least 6 characters");
        assert_eq!(err.to_string(), "Password should be at least 6 characters");
    }
}
