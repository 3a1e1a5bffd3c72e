// REST client for the RPdb API.
//
// One configured `reqwest::Client` is reused for every call; responses
// are shaped into typed values or a structured `Error`. No retries
// happen at this layer.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::error::{Error, RemoteErrorEnvelope};
use crate::model::time::{format_server, local_now};
use crate::model::{
    Attribute, BulkResponse, BulkStatus, Entry, EntryFilter, ResponseMessage,
    ResponseMessageWrapper, Update, UpdateRequest,
};
use crate::transport::{ApiConfig, CLIENT_VERSION};

/// Body wrapper for the bulk endpoints.
#[derive(Serialize)]
struct BulkRequest<T> {
    bulk: Vec<T>,
}

/// Result of a filter-based bulk deletion.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct EntryDeleteFiltered {
    /// How many entries were deleted.
    pub count: i64,

    /// The ids of the deleted entries.
    pub ids: Vec<i64>,

    pub message: ResponseMessage,
}

/// Authenticated client for the RPdb REST API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    language: String,
    config: ApiConfig,
}

impl ApiClient {
    /// Build a client from the given configuration. Validates the base
    /// URL and constructs the shared HTTP client.
    pub fn new(config: ApiConfig) -> Result<Self, Error> {
        let base_url = config.effective_base_url();
        Url::parse(&base_url)
            .map_err(|e| Error::local(&base_url, format!("invalid base url: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("rpdb-rs/{CLIENT_VERSION}"))
            .build()
            .map_err(|e| Error::local(&base_url, format!("failed to build HTTP client: {e}")))?;

        let language = config.effective_language();
        Ok(ApiClient {
            http,
            base_url,
            language,
            config,
        })
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    // ── Request plumbing ─────────────────────────────────────────────

    /// Method and path of a request, as carried inside errors.
    fn label(method: &Method, path: &str) -> String {
        format!("{method} {path:?}")
    }

    /// Build an authenticated request for a path relative to the base
    /// URL, e.g. `/entry/123`.
    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        debug!(%method, path, "executing request");

        let mut api_key = HeaderValue::from_str(self.config.api_key.expose_secret())
            .unwrap_or_else(|_| HeaderValue::from_static(""));
        api_key.set_sensitive(true);

        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Api-Key", api_key)
            .header("Java-Client", self.config.treat_as_java_client.to_string())
            .header("Language", &self.language)
            .header("Multi-Instance", self.config.multi_instance.to_string())
            .header("Client-Version", CLIENT_VERSION);

        // Entry instants are normalized to the client's zone, so the
        // server needs to know the client's current local date.
        if path.starts_with("/entry") {
            builder = builder.header("Client-Date", format_server(local_now()));
        }

        builder.header(CONTENT_TYPE, "application/json;charset=UTF-8")
    }

    /// Execute a request and pre-handle the error statuses: 5xx is an
    /// opaque server error, 3xx/4xx is decoded into a remote error.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, Error> {
        let label = Self::label(&method, path);

        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder
                .json(body)
                .header(CONTENT_TYPE, "application/json;charset=UTF-8");
        }

        let response = builder.send().await.map_err(|e| Error::local(&label, e))?;
        let status = response.status();

        if status.is_server_error() {
            error!(request = %label, code = status.as_u16(), "server failed to answer");
            return Err(Error::Server {
                code: status.as_u16(),
                path: label,
            });
        }

        if status.as_u16() >= 300 {
            let body = response
                .text()
                .await
                .map_err(|e| Error::local(&label, e))?;
            return Err(self.decode_error(&body, status, label));
        }

        Ok(response)
    }

    /// Decode the error body of a failed request (status 300-499).
    fn decode_error(&self, body: &str, status: StatusCode, label: String) -> Error {
        match serde_json::from_str::<RemoteErrorEnvelope>(body) {
            Ok(envelope) if !envelope.error.message.is_empty() => {
                debug!(request = %label, id = %envelope.error.id, "request rejected by server");
                envelope.error.into_error(status.as_u16(), label)
            }
            _ => {
                error!(request = %label, code = status.as_u16(), body, "unrecognized error response");
                Error::local(
                    label,
                    format!("unrecognized error response (HTTP {})", status.as_u16()),
                )
            }
        }
    }

    /// Decode a JSON response body.
    async fn json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        label: &str,
    ) -> Result<T, Error> {
        response
            .json::<T>()
            .await
            .map_err(|e| Error::local(label, e))
    }

    /// Execute a bulk request. Bulk endpoints may answer with an error
    /// status while still delivering a valid per-element body, so the
    /// body is tried as a bulk response first and only then as an
    /// error.
    async fn send_bulk<T: DeserializeOwned + Default, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<BulkResponse<T>, Error> {
        let label = Self::label(&method, path);

        let response = self
            .request(method, path)
            .json(body)
            .header(CONTENT_TYPE, "application/json;charset=UTF-8")
            .send()
            .await
            .map_err(|e| Error::local(&label, e))?;

        let status = response.status();
        if status.is_server_error() {
            error!(request = %label, code = status.as_u16(), "server failed to answer");
            return Err(Error::Server {
                code: status.as_u16(),
                path: label,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::local(&label, e))?;

        match serde_json::from_str::<BulkResponse<T>>(&body) {
            Ok(bulk) => {
                if !bulk.was_successful() {
                    debug!(request = %label, overview = ?bulk.overview, "bulk request partially failed");
                }
                Ok(bulk)
            }
            Err(e) => {
                debug!(request = %label, error = %e, "response is not a bulk body");
                if status.as_u16() >= 300 {
                    Err(self.decode_error(&body, status, label))
                } else {
                    Err(Error::local(label, e))
                }
            }
        }
    }

    // ── Entries ──────────────────────────────────────────────────────

    pub async fn get_entry(&self, id: i64) -> Result<Entry, Error> {
        let path = format!("/entry/{id}");
        let response = self.send::<()>(Method::GET, &path, None).await?;
        self.json(response, &path).await
    }

    /// Query entries by filter. The server answers 204 when nothing
    /// matches.
    pub async fn get_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>, Error> {
        let method = Method::from_bytes(b"PROPFIND").expect("static method name");
        let response = self.send(method, "/entry", Some(filter)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        self.json(response, "/entry").await
    }

    pub async fn create_entry(&self, entry: &Entry) -> Result<Entry, Error> {
        let response = self.send(Method::POST, "/entry", Some(entry)).await?;
        self.json(response, "/entry").await
    }

    pub async fn update_entry(&self, entry: &Entry) -> Result<Entry, Error> {
        let path = format!("/entry/{}", entry.id);
        let response = self.send(Method::PUT, &path, Some(entry)).await?;
        self.json(response, &path).await
    }

    pub async fn delete_entry(&self, id: i64) -> Result<ResponseMessageWrapper, Error> {
        let path = format!("/entry/{id}");
        let response = self.send::<()>(Method::DELETE, &path, None).await?;
        self.json(response, &path).await
    }

    pub async fn create_entries(
        &self,
        entries: &[Entry],
    ) -> Result<(Vec<Entry>, BulkResponse<Entry>), Error> {
        self.bulk_create_or_update(Method::POST, entries).await
    }

    pub async fn update_entries(
        &self,
        entries: &[Entry],
    ) -> Result<(Vec<Entry>, BulkResponse<Entry>), Error> {
        self.bulk_create_or_update(Method::PUT, entries).await
    }

    pub async fn patch_entries(
        &self,
        entries: &[Entry],
    ) -> Result<(Vec<Entry>, BulkResponse<Entry>), Error> {
        self.bulk_create_or_update(Method::PATCH, entries).await
    }

    async fn bulk_create_or_update(
        &self,
        method: Method,
        entries: &[Entry],
    ) -> Result<(Vec<Entry>, BulkResponse<Entry>), Error> {
        let body = BulkRequest {
            bulk: entries.to_vec(),
        };
        let bulk: BulkResponse<Entry> = self.send_bulk(method, "/entry", &body).await?;

        let touched = bulk
            .response_data
            .iter()
            .filter(|row| matches!(row.status, BulkStatus::Created | BulkStatus::Updated))
            .map(|row| row.data.clone())
            .collect();

        Ok((touched, bulk))
    }

    /// Delete entries by id. Returns the ids the server confirmed as
    /// deleted together with the full bulk response.
    pub async fn delete_entries(
        &self,
        ids: &[i64],
    ) -> Result<(Vec<i64>, BulkResponse<i64>), Error> {
        let body = BulkRequest { bulk: ids.to_vec() };
        let bulk: BulkResponse<i64> = self
            .send_bulk(Method::PATCH, "/entry/delete", &body)
            .await?;

        let deleted = bulk
            .response_data
            .iter()
            .filter(|row| row.status == BulkStatus::Deleted)
            .map(|row| row.data)
            .collect();

        Ok((deleted, bulk))
    }

    pub async fn delete_entries_filtered(
        &self,
        filter: &EntryFilter,
    ) -> Result<EntryDeleteFiltered, Error> {
        let response = self
            .send(Method::PATCH, "/entry/delete", Some(filter))
            .await?;
        self.json(response, "/entry/delete").await
    }

    /// Register an entry as executed. Only meaningful for attributes
    /// with the `execute_always` flag.
    pub async fn mark_entry_executed(&self, id: i64) -> Result<(), Error> {
        let path = format!("/api-key/execution/{id}");
        self.send::<()>(Method::POST, &path, None).await?;
        Ok(())
    }

    // ── Attributes ───────────────────────────────────────────────────

    pub async fn get_attribute(&self, id: i64) -> Result<Attribute, Error> {
        let path = format!("/attribute/{id}");
        let response = self.send::<()>(Method::GET, &path, None).await?;
        self.json(response, &path).await
    }

    pub async fn get_attribute_by_name(&self, name: &str) -> Result<Attribute, Error> {
        let query =
            url::form_urlencoded::Serializer::new(String::new()).append_pair("name", name).finish();
        let path = format!("/attribute?{query}");

        let response = self.send::<()>(Method::GET, &path, None).await?;
        let mut attributes: Vec<Attribute> = self.json(response, &path).await?;

        if attributes.len() != 1 {
            return Err(Error::attribute_not_found(name));
        }
        Ok(attributes.remove(0))
    }

    /// Fetch all attributes. The server answers 204 when none exist.
    pub async fn get_attributes(&self) -> Result<Vec<Attribute>, Error> {
        let response = self.send::<()>(Method::GET, "/attribute", None).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        self.json(response, "/attribute").await
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Fetch the changes that occurred after the given version.
    pub async fn get_update(&self, request: &UpdateRequest) -> Result<Update, Error> {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("only_version", &request.only_version.to_string());
        if request.later_than.is_set() {
            query.append_pair("later_than", &request.later_than.format());
        }
        if request.max_version != 0 {
            query.append_pair("max_version", &request.max_version.to_string());
        }

        let path = format!("/update/{}?{}", request.latest_version, query.finish());
        let response = self.send::<()>(Method::GET, &path, None).await?;
        self.json(response, &path).await
    }
}
