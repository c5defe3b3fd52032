//! REST client for a hosted corpus service.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/corpora` | - |
//! | POST | `/corpora` | `{"display_name": ...}` |
//! | DELETE | `/corpora/{corpus}` | - |
//! | GET | `/corpora/{corpus}/documents` | - |
//! | POST | `/corpora/{corpus}/documents` | multipart `file`, `display_name`, `description` |
//! | DELETE | `/corpora/{corpus}/documents/{document}` | - |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CorpusInfo, CorpusStore, DocumentHandle, UploadDocument};
use crate::error::{transport_message, CorpusError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct CorpusList {
    #[serde(default)]
    corpora: Vec<CorpusInfo>,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<DocumentHandle>,
}

#[derive(Debug, Serialize)]
struct CreateCorpusRequest<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// `CorpusStore` backed by a JSON REST service.
#[derive(Debug, Clone)]
pub struct HttpCorpusClient {
    api_base: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpCorpusClient {
    /// # Errors
    ///
    /// Returns `CorpusError::ClientBuild` if the HTTP client cannot be built.
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Result<Self, CorpusError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CorpusError::ClientBuild(e.to_string()))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Accepts either a bare id or a full `corpora/{id}` resource name.
    fn corpus_url(&self, corpus: &str) -> String {
        let id = corpus.strip_prefix("corpora/").unwrap_or(corpus);
        format!("{}/corpora/{}", self.api_base, urlencoding::encode(id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CorpusError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| CorpusError::RequestFailed(transport_message(&e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Err(error_from_status(status.as_u16(), &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CorpusError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| CorpusError::ParseError(e.to_string()))
    }
}

fn error_from_status(code: u16, body: &str) -> CorpusError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());

    match code {
        404 => CorpusError::CorpusNotFound(message),
        _ => CorpusError::ApiError { code, message },
    }
}

#[async_trait]
impl CorpusStore for HttpCorpusClient {
    async fn list_corpora(&self) -> Result<Vec<CorpusInfo>, CorpusError> {
        let url = format!("{}/corpora", self.api_base);
        let list: CorpusList = self.send_json(self.http_client.get(&url)).await?;
        Ok(list.corpora)
    }

    async fn create_corpus(&self, display_name: &str) -> Result<CorpusInfo, CorpusError> {
        let url = format!("{}/corpora", self.api_base);
        debug!(display_name, "Creating corpus");
        self.send_json(
            self.http_client
                .post(&url)
                .json(&CreateCorpusRequest { display_name }),
        )
        .await
    }

    async fn delete_corpus(&self, name: &str) -> Result<(), CorpusError> {
        self.send(self.http_client.delete(self.corpus_url(name)))
            .await
            .map(|_| ())
    }

    async fn upload(
        &self,
        corpus: &str,
        document: &UploadDocument,
    ) -> Result<DocumentHandle, CorpusError> {
        let bytes = tokio::fs::read(&document.path).await?;

        let file = multipart::Part::bytes(bytes)
            .file_name(document.display_name.clone())
            .mime_str("text/plain")
            .map_err(|e| CorpusError::RequestFailed(e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", file)
            .text("display_name", document.display_name.clone())
            .text("description", document.description.clone());

        let url = format!("{}/documents", self.corpus_url(corpus));
        debug!(corpus, document = %document.display_name, "Uploading document");
        self.send_json(self.http_client.post(&url).multipart(form))
            .await
    }

    async fn list_documents(&self, corpus: &str) -> Result<Vec<DocumentHandle>, CorpusError> {
        let url = format!("{}/documents", self.corpus_url(corpus));
        let list: DocumentList = self.send_json(self.http_client.get(&url)).await?;
        Ok(list.documents)
    }

    async fn delete_document(&self, corpus: &str, document: &str) -> Result<(), CorpusError> {
        let url = format!(
            "{}/documents/{}",
            self.corpus_url(corpus),
            urlencoding::encode(document.rsplit('/').next().unwrap_or(document))
        );
        self.send(self.http_client.delete(&url)).await.map(|_| ())
    }
}
