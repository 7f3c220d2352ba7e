//! Document store over HTTP.
//!
//! - upsert: `PUT {base}/{collection}/{id}` with the document as JSON body
//! - add: `POST {base}/{collection}`, answered with `{"id": "..."}`

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::DocumentStore;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct AddResponse {
    id: String,
}

/// HTTP client for the remote document store.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpDocumentStore {
    /// Create a client for the store at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| Error::ConfigValidation {
            message: format!("remote.base_url {base_url}: {e}"),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::ConfigValidation {
                message: format!("remote.base_url cannot be a base: {base_url}"),
            });
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// URL of a collection, or of one document in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot carry path segments.
    pub fn url(&self, collection: &str, id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Error::internal("base URL cannot carry path segments"))?;
            segments.pop_if_empty().push(collection);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, collection: &str, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    operation: format!("write to {collection}"),
                }
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(Error::remote(collection, format!("store returned status {status}")))
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<()> {
        let url = self.url(collection, Some(id))?;
        debug!(%url, "Upserting document");
        self.send(collection, self.http.put(url).json(document))
            .await?;
        Ok(())
    }

    async fn add(&self, collection: &str, document: &Value) -> Result<String> {
        let url = self.url(collection, None)?;
        debug!(%url, "Adding document");
        let response = self
            .send(collection, self.http.post(url).json(document))
            .await?;
        let body: AddResponse = response
            .json()
            .await
            .map_err(|e| Error::remote(collection, format!("unexpected response: {e}")))?;
        Ok(body.id)
    }
}
