//! Alibaba Cloud OSS backend over its S3-compatible API.

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use tracing::Span;
use url::Url;

use super::cloud::{ObjectStoreBackend, ObjectStoreSigner};
use crate::{
    BlobError,
    BlobResult,
    config::{OssConfig, RetrySettings},
};

/// Builds the OSS blob store.
pub fn build(
    config: &OssConfig,
    retry: &RetrySettings,
    span: Span,
) -> BlobResult<ObjectStoreBackend> {
    let endpoint = bucket_endpoint(&config.endpoint, &config.bucket_name)?;
    let oss = AmazonS3Builder::new()
        .with_bucket_name(&config.bucket_name)
        .with_region(&config.region)
        .with_access_key_id(&config.access_key_id)
        .with_secret_access_key(&config.access_key_secret)
        .with_endpoint(endpoint)
        .with_virtual_hosted_style_request(true)
        .with_retry(retry.transport_retry())
        .with_client_options(retry.client_options())
        .build()
        .map_err(|e| BlobError::invalid_config(format!("failed to create OSS client: {e}")))?;
    let oss = Arc::new(oss);

    Ok(ObjectStoreBackend::new(
        "oss",
        &config.bucket_name,
        oss.clone(),
        Arc::new(ObjectStoreSigner::new(&config.bucket_name, oss)),
        retry.policy(),
        span,
    ))
}

/// OSS only serves virtual-hosted requests, so the bucket moves into the host.
fn bucket_endpoint(endpoint: &str, bucket: &str) -> BlobResult<String> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| BlobError::invalid_config(format!("invalid OSS endpoint {endpoint}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| BlobError::invalid_config(format!("OSS endpoint {endpoint} has no host")))?;
    if !host.starts_with(&format!("{bucket}.")) {
        let bucket_host = format!("{bucket}.{host}");
        url.set_host(Some(&bucket_host)).map_err(|e| {
            BlobError::invalid_config(format!("invalid OSS endpoint {endpoint}: {e}"))
        })?;
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{BlobStore, HttpMethod, presign};

    #[test]
    fn test_bucket_endpoint() {
        assert_eq!(
            bucket_endpoint("https://oss-cn-hangzhou.aliyuncs.com", "droplets").unwrap(),
            "https://droplets.oss-cn-hangzhou.aliyuncs.com"
        );
        assert_eq!(
            bucket_endpoint("https://droplets.oss-cn-hangzhou.aliyuncs.com/", "droplets").unwrap(),
            "https://droplets.oss-cn-hangzhou.aliyuncs.com"
        );
        assert!(bucket_endpoint("not a url", "droplets").is_err());
    }

    #[tokio::test]
    async fn test_sign_uses_bucket_host() {
        let config = OssConfig {
            bucket_name: "droplets".to_string(),
            region: "oss-cn-hangzhou".to_string(),
            endpoint: "https://oss-cn-hangzhou.aliyuncs.com".to_string(),
            access_key_id: "key".to_string(),
            access_key_secret: "secret".to_string(),
        };
        let store = build(&config, &RetrySettings::default(), Span::none()).unwrap();
        let url = store
            .sign("a/b", HttpMethod::Get, presign::expires_at(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(url.url.starts_with("https://droplets.oss-cn-hangzhou.aliyuncs.com/a/b?"));
    }
}
