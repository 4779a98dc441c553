//! OpenStack Swift blob store backend over the Swift HTTP API.
//!
//! Authenticates with TempAuth (v1) or Keystone v3, refreshes the session
//! token when Swift answers 401, and signs URLs with the TempURL middleware.

use std::{io, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Span, debug};
use url::Url;

use crate::{
    BlobError,
    BlobOrRedirect,
    BlobResult,
    BlobStore,
    BlobStream,
    ByteSource,
    HttpMethod,
    Operation,
    PutResult,
    SignedUrl,
    classify::{ErrorClass, Failure, classify_status, resolve_not_found},
    config::{RetrySettings, SwiftConfig},
    presign,
    retry::{RetryPolicy, execute_with_retry},
};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Objects returned per listing page.
const LIST_PAGE_SIZE: usize = 10_000;

/// Authenticated session: token plus the account's storage URL.
#[derive(Debug, Clone)]
struct Session {
    token: String,
    storage_url: Url,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct KeystoneTokenResponse {
    token: KeystoneToken,
}

#[derive(Debug, Deserialize)]
struct KeystoneToken {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

/// Swift blob store.
pub struct SwiftBlobStore {
    client: Client,
    config: SwiftConfig,
    session: RwLock<Option<Session>>,
    retry: RetryPolicy,
    span: Span,
}

impl SwiftBlobStore {
    /// Create a Swift blob store. Authentication happens on first use.
    pub fn new(config: &SwiftConfig, retry: &RetrySettings, span: Span) -> BlobResult<Self> {
        Url::parse(&config.auth_url).map_err(|e| {
            BlobError::invalid_config(format!("invalid swift auth_url {}: {e}", config.auth_url))
        })?;

        if let Some(storage_url) = &config.storage_url {
            Url::parse(storage_url).map_err(|e| {
                BlobError::invalid_config(format!("invalid swift storage_url {storage_url}: {e}"))
            })?;
        }

        // No whole-request timeout: bodies may stream for longer than an attempt.
        let mut client = Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(secs) = retry.attempt_timeout_secs {
            client = client
                .connect_timeout(Duration::from_secs(secs))
                .read_timeout(Duration::from_secs(secs));
        }
        let client = client.build().map_err(|e| {
            BlobError::invalid_config(format!("failed to create swift client: {e}"))
        })?;

        debug!(parent: &span, container = %config.container_name, "created swift blob store");
        Ok(Self {
            client,
            config: config.clone(),
            session: RwLock::new(None),
            retry: retry.policy(),
            span,
        })
    }

    async fn session(&self) -> Result<Session, Failure> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        self.authenticate().await
    }

    async fn authenticate(&self) -> Result<Session, Failure> {
        let mut guard = self.session.write().await;
        let session = match self.config.auth_version {
            3 => self.authenticate_v3().await?,
            _ => self.authenticate_v1().await?,
        };
        debug!(
            parent: &self.span,
            storage_url = %session.storage_url,
            "authenticated with swift"
        );
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn authenticate_v1(&self) -> Result<Session, Failure> {
        let response = self
            .client
            .get(&self.config.auth_url)
            .header("X-Auth-User", &self.config.username)
            .header("X-Auth-Key", &self.config.api_key)
            .send()
            .await?;
        let response = check_status(response, "swift authentication")?;

        let token = header(&response, "X-Auth-Token")?;
        let storage_url = header(&response, "X-Storage-Url")?;
        Ok(Session {
            token,
            storage_url: parse_storage_url(&storage_url)?,
        })
    }

    async fn authenticate_v3(&self) -> Result<Session, Failure> {
        let domain = self.config.domain_name.as_deref().unwrap_or("Default");
        let mut body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": domain },
                            "password": self.config.api_key,
                        }
                    }
                }
            }
        });
        if let Some(project) = &self.config.project_name {
            body["auth"]["scope"] = json!({
                "project": { "name": project, "domain": { "name": domain } }
            });
        }

        let response = self
            .client
            .post(keystone_tokens_url(&self.config.auth_url))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, "keystone authentication")?;

        let token = header(&response, "X-Subject-Token")?;
        let parsed: KeystoneTokenResponse = response.json().await?;
        let region = self.config.region.as_deref();
        let endpoint = select_object_store_endpoint(&parsed.token.catalog, region).ok_or_else(|| {
            Failure::permanent(anyhow::anyhow!(
                "keystone catalog has no public object-store endpoint"
            ))
        })?;
        Ok(Session {
            token,
            storage_url: parse_storage_url(endpoint)?,
        })
    }

    fn container_url(&self, storage_url: &Url) -> Url {
        let mut url = storage_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.config.container_name);
        }
        url
    }

    fn object_url(&self, storage_url: &Url, path: &str) -> Url {
        let mut url = self.container_url(storage_url);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(path.trim_start_matches('/').split('/'));
        }
        url
    }

    /// Sends an authenticated request, re-authenticating once on 401.
    async fn send<F>(&self, build: F, what: &str) -> Result<Response, Failure>
    where
        F: Fn(&Session) -> RequestBuilder,
    {
        let session = self.session().await?;
        let response = build(&session)
            .header(AUTH_TOKEN_HEADER, &session.token)
            .send()
            .await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            debug!(parent: &self.span, "swift token rejected, re-authenticating");
            let session = self.authenticate().await?;
            build(&session)
                .header(AUTH_TOKEN_HEADER, &session.token)
                .send()
                .await?
        } else {
            response
        };
        check_status(response, what)
    }

    async fn send_with_retry<F>(
        &self,
        op: Operation,
        build: F,
        what: &str,
    ) -> Result<Response, Failure>
    where
        F: Fn(&Session) -> RequestBuilder,
    {
        let build = &build;
        execute_with_retry(&self.retry, &self.span, op, move || self.send(build, what)).await
    }

    async fn check_container(&self) -> anyhow::Result<()> {
        self.send(|s| self.client.head(self.container_url(&s.storage_url)), "container check")
            .await
            .map(|_| ())
            .map_err(|failure| failure.source)
    }

    async fn failed(&self, failure: Failure, op: Operation, path: &str) -> BlobError {
        if failure.is_not_found() {
            resolve_not_found(op, &self.config.container_name, path, self.check_container()).await
        } else {
            failure.into_blob_error(op, &self.config.container_name, path)
        }
    }

    /// Account URL signed URLs point at. Without a configured `storage_url`
    /// this authenticates once and reuses the session's URL.
    async fn signing_base(&self, path: &str) -> BlobResult<Url> {
        if let Some(storage_url) = &self.config.storage_url {
            return Url::parse(storage_url).map_err(|e| {
                BlobError::invalid_config(format!("invalid swift storage_url {storage_url}: {e}"))
            });
        }
        self.session().await.map(|session| session.storage_url).map_err(|failure| {
            BlobError::permanent(Operation::Sign, &self.config.container_name, path, failure.source)
        })
    }

    fn put_failed(&self, path: &str, source: impl Into<anyhow::Error>) -> BlobError {
        BlobError::permanent(Operation::Put, &self.config.container_name, path, source)
    }

    async fn list_page(&self, prefix: &str, marker: &str) -> Result<Vec<ListedObject>, Failure> {
        let limit = LIST_PAGE_SIZE.to_string();
        let response = self
            .send_with_retry(
                Operation::List,
                |s| {
                    self.client.get(self.container_url(&s.storage_url)).query(&[
                        ("format", "json"),
                        ("prefix", prefix),
                        ("marker", marker),
                        ("limit", limit.as_str()),
                    ])
                },
                "list",
            )
            .await?;
        Ok(response.json().await?)
    }
}

fn check_status(response: Response, what: &str) -> Result<Response, Failure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(Failure::new(
        classify_status(status),
        anyhow::anyhow!("{what} returned {status} for {}", response.url()),
    ))
}

fn header(response: &Response, name: &str) -> Result<String, Failure> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            Failure::permanent(anyhow::anyhow!("swift auth response lacks {name} header"))
        })
}

fn parse_storage_url(url: &str) -> Result<Url, Failure> {
    Url::parse(url).map_err(|e| {
        let context = format!("invalid swift storage url {url}");
        Failure::permanent(anyhow::Error::new(e).context(context))
    })
}

fn keystone_tokens_url(auth_url: &str) -> String {
    let base = auth_url.trim_end_matches('/');
    if base.ends_with("/auth/tokens") {
        base.to_string()
    } else {
        format!("{base}/auth/tokens")
    }
}

fn select_object_store_endpoint<'a>(
    catalog: &'a [CatalogEntry],
    region: Option<&str>,
) -> Option<&'a str> {
    catalog
        .iter()
        .filter(|entry| entry.kind == "object-store")
        .flat_map(|entry| entry.endpoints.iter())
        .filter(|endpoint| endpoint.interface == "public")
        .find(|endpoint| match region {
            Some(region) => endpoint.region.as_deref() == Some(region),
            None => true,
        })
        .map(|endpoint| endpoint.url.as_str())
}

/// TempURL signature: hex HMAC-SHA256 over `METHOD\nexpires\npath`.
fn temp_url_signature(
    key: &str,
    method: HttpMethod,
    expires: i64,
    path: &str,
) -> BlobResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| BlobError::invalid_config(format!("invalid swift temp_url_key: {e}")))?;
    mac.update(format!("{}\n{}\n{}", method.as_str(), expires, path).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl BlobStore for SwiftBlobStore {
    fn provider(&self) -> &'static str {
        "swift"
    }

    fn bucket(&self) -> &str {
        &self.config.container_name
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        let result = self
            .send_with_retry(
                Operation::Exists,
                |s| self.client.head(self.object_url(&s.storage_url, path)),
                "head",
            )
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(failure) => {
                let err = self.failed(failure, Operation::Exists, path).await;
                if err.is_not_found() { Ok(false) } else { Err(err) }
            }
        }
    }

    async fn get(&self, path: &str) -> BlobResult<BlobStream> {
        match self
            .send_with_retry(
                Operation::Get,
                |s| self.client.get(self.object_url(&s.storage_url, path)),
                "get",
            )
            .await
        {
            Ok(response) => Ok(BlobStream::from_transport(
                response.bytes_stream(),
                &self.config.container_name,
                path,
            )),
            Err(failure) => Err(self.failed(failure, Operation::Get, path).await),
        }
    }

    async fn get_or_redirect(
        &self,
        path: &str,
        expires_in: Duration,
    ) -> BlobResult<BlobOrRedirect> {
        let url = self
            .sign(path, HttpMethod::Get, presign::expires_at(expires_in))
            .await?;
        Ok(BlobOrRedirect::Redirect(url))
    }

    async fn put(&self, path: &str, mut source: ByteSource) -> BlobResult<PutResult> {
        // The streamed body cannot be replayed, so an expired token is
        // refreshed by an authenticated container HEAD before uploading.
        self.check_container()
            .await
            .map_err(|err| self.put_failed(path, err))?;
        let session = self
            .session()
            .await
            .map_err(|failure| self.put_failed(path, failure.source))?;

        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);
        // Err(None) means the request stopped reading before the source ended.
        let pump = tokio::spawn(async move {
            let mut hasher = Sha256::new();
            let mut size_bytes = 0u64;
            while let Some(chunk) = source.next().await {
                match chunk {
                    Ok(chunk) => {
                        hasher.update(&chunk);
                        size_bytes += chunk.len() as u64;
                        if tx.send(Ok(chunk)).await.is_err() {
                            return Err(None);
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(io::Error::new(err.kind(), err.to_string()))).await;
                        return Err(Some(err));
                    }
                }
            }
            Ok(PutResult {
                size_bytes,
                sha256_hash: format!("{:x}", hasher.finalize()),
            })
        });

        let response = self
            .client
            .put(self.object_url(&session.storage_url, path))
            .header(AUTH_TOKEN_HEADER, &session.token)
            .body(Body::wrap_stream(ReceiverStream::new(rx)))
            .send()
            .await;

        let result = match pump.await.map_err(|e| self.put_failed(path, e))? {
            Ok(result) => Some(result),
            Err(Some(err)) => {
                return Err(self.put_failed(
                    path,
                    anyhow::Error::new(err).context("failed to read upload source"),
                ));
            }
            Err(None) => None,
        };
        let response = response.map_err(|e| self.put_failed(path, e))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // Refresh now so the caller's next attempt carries a valid token.
            let _ = self.authenticate().await;
        }
        check_status(response, "put").map_err(|failure| self.put_failed(path, failure.source))?;
        let result = result.ok_or_else(|| {
            self.put_failed(path, anyhow::anyhow!("upload ended before the source was drained"))
        })?;

        debug!(parent: &self.span, path, size_bytes = result.size_bytes, "stored blob");
        Ok(result)
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        let copy_from =
            format!("/{}/{}", self.config.container_name, src.trim_start_matches('/'));
        let result = self
            .send_with_retry(
                Operation::Copy,
                |s| {
                    self.client
                        .put(self.object_url(&s.storage_url, dest))
                        .header("X-Copy-From", &copy_from)
                        .header(reqwest::header::CONTENT_LENGTH, "0")
                },
                "copy",
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(failure) => Err(self.failed(failure, Operation::Copy, src).await),
        }
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        match self
            .send_with_retry(
                Operation::Delete,
                |s| self.client.delete(self.object_url(&s.storage_url, path)),
                "delete",
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(failure) => Err(self.failed(failure, Operation::Delete, path).await),
        }
    }

    async fn list(&self, prefix: &str) -> BlobResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut marker = String::new();
        loop {
            let page = match self.list_page(prefix, &marker).await {
                Ok(page) => page,
                // A missing container is never an empty listing.
                Err(failure) if failure.class == ErrorClass::NotFound => {
                    return Err(BlobError::permanent(
                        Operation::List,
                        &self.config.container_name,
                        prefix,
                        failure.source.context("container does not exist"),
                    ));
                }
                Err(failure) => {
                    return Err(failure.into_blob_error(
                        Operation::List,
                        &self.config.container_name,
                        prefix,
                    ));
                }
            };
            let Some(last) = page.last() else {
                break;
            };
            marker = last.name.clone();
            let full_page = page.len() >= LIST_PAGE_SIZE;
            keys.extend(page.into_iter().map(|object| object.name));
            if !full_page {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete_listed(&self, key: &str) -> BlobResult<()> {
        self.send_with_retry(
            Operation::Delete,
            |s| self.client.delete(self.object_url(&s.storage_url, key)),
            "delete",
        )
        .await
        .map(|_| ())
        .map_err(|failure| {
            failure.into_blob_error(Operation::Delete, &self.config.container_name, key)
        })
    }

    async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl> {
        let mut url = self.object_url(&self.signing_base(path).await?, path);
        let expires = expires_at.timestamp();
        let signature = temp_url_signature(&self.config.temp_url_key, method, expires, url.path())?;
        url.query_pairs_mut()
            .append_pair("temp_url_sig", &signature)
            .append_pair("temp_url_expires", &expires.to_string());
        Ok(SignedUrl::new(url.to_string(), method, expires_at))
    }
}
