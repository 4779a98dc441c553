//! Azure Blob Storage backend using object_store for data I/O and
//! shared-key service SAS for presigning.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use sha2::Sha256;
use tracing::Span;
use url::Url;

use super::cloud::ObjectStoreBackend;
use crate::{
    BlobError,
    BlobResult,
    HttpMethod,
    Operation,
    SignedUrl,
    UrlSigner,
    config::{AzureConfig, RetrySettings},
};

/// Storage service version the SAS is signed for.
const SAS_VERSION: &str = "2018-11-09";

/// Builds the Azure blob store.
pub fn build(
    config: &AzureConfig,
    retry: &RetrySettings,
    span: Span,
) -> BlobResult<ObjectStoreBackend> {
    let endpoint = endpoint(config);
    let signer = AzureSasSigner::new(
        &config.account_name,
        &config.account_key,
        &config.container_name,
        &endpoint,
    )?;

    let mut builder = MicrosoftAzureBuilder::new()
        .with_account(&config.account_name)
        .with_access_key(&config.account_key)
        .with_container_name(&config.container_name)
        .with_retry(retry.transport_retry())
        .with_client_options(retry.client_options());
    if config.endpoint.is_some() {
        let key: AzureConfigKey = "azure_storage_endpoint".parse().map_err(|e| {
            BlobError::invalid_config(format!(
                "unsupported Azure setting azure_storage_endpoint: {e}"
            ))
        })?;
        builder = builder
            .with_config(key, &endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    let azure = builder
        .build()
        .map_err(|e| BlobError::invalid_config(format!("failed to create Azure client: {e}")))?;

    Ok(ObjectStoreBackend::new(
        "azure",
        &config.container_name,
        Arc::new(azure),
        Arc::new(signer),
        retry.policy(),
        span,
    ))
}

fn endpoint(config: &AzureConfig) -> String {
    match &config.endpoint {
        Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
        None => format!("https://{}.blob.core.windows.net", config.account_name),
    }
}

/// Signs blob URLs with a service SAS derived from the account key.
pub struct AzureSasSigner {
    account: String,
    key: Vec<u8>,
    container: String,
    endpoint: Url,
}

impl AzureSasSigner {
    pub fn new(
        account: &str,
        account_key: &str,
        container: &str,
        endpoint: &str,
    ) -> BlobResult<Self> {
        let key = STANDARD.decode(account_key).map_err(|e| {
            BlobError::invalid_config(format!("Azure account_key is not valid base64: {e}"))
        })?;
        let endpoint = Url::parse(endpoint).map_err(|e| {
            BlobError::invalid_config(format!("invalid Azure endpoint {endpoint}: {e}"))
        })?;
        Ok(Self {
            account: account.to_string(),
            key,
            container: container.to_string(),
            endpoint,
        })
    }

    fn permissions(method: HttpMethod) -> &'static str {
        match method {
            HttpMethod::Get => "r",
            HttpMethod::Put => "cw",
        }
    }

    fn protocol(&self) -> &'static str {
        if self.endpoint.scheme() == "https" {
            "https"
        } else {
            "https,http"
        }
    }

    fn string_to_sign(&self, blob: &str, permissions: &str, expiry: &str) -> String {
        let resource = format!("/blob/{}/{}/{}", self.account, self.container, blob);
        [
            permissions,
            "", // start
            expiry,
            &resource,
            "", // identifier
            "", // ip
            self.protocol(),
            SAS_VERSION,
            "b",
            "", // snapshot time
            "", // cache-control
            "", // content-disposition
            "", // content-encoding
            "", // content-language
            "", // content-type
        ]
        .join("\n")
    }

    fn signature(&self, string_to_sign: &str) -> BlobResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).map_err(|e| {
            BlobError::permanent(Operation::Sign, &self.container, "", anyhow::anyhow!("{e}"))
        })?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl UrlSigner for AzureSasSigner {
    async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl> {
        let blob = path.trim_start_matches('/');
        let permissions = Self::permissions(method);
        let expiry = expires_at.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let signature = self.signature(&self.string_to_sign(blob, permissions, &expiry))?;

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                BlobError::permanent(
                    Operation::Sign,
                    &self.container,
                    path,
                    anyhow::anyhow!("Azure endpoint cannot be a base URL"),
                )
            })?
            .pop_if_empty()
            .push(&self.container)
            .extend(blob.split('/'));
        url.query_pairs_mut()
            .append_pair("sv", SAS_VERSION)
            .append_pair("sr", "b")
            .append_pair("sp", permissions)
            .append_pair("se", &expiry)
            .append_pair("spr", self.protocol())
            .append_pair("sig", &signature);

        let signed = SignedUrl::new(url.to_string(), method, expires_at);
        Ok(match method {
            HttpMethod::Put => signed.with_header("x-ms-blob-type", "BlockBlob"),
            HttpMethod::Get => signed,
        })
    }
}
