//! Blob storage configuration.

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult, presign, retry::RetryPolicy};

/// Environment variables with this prefix override file settings. `__`
/// separates nested keys, e.g. `BLOBSTORE_RETRY__TIMEOUT_SECS=10`.
pub const ENV_PREFIX: &str = "BLOBSTORE_";

/// Configuration for a blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Provider and its credentials, tagged by the `provider` key.
    #[serde(flatten)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Lifetime of URLs handed out by `get_or_redirect`.
    #[serde(default = "default_redirect_expiry_secs")]
    pub redirect_expiry_secs: u64,

    /// Parallel deletes issued by `delete_dir`.
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,
}

fn default_redirect_expiry_secs() -> u64 {
    presign::DEFAULT_REDIRECT_EXPIRY.as_secs()
}

fn default_delete_concurrency() -> usize {
    crate::prefix::DEFAULT_DELETE_CONCURRENCY
}

/// The closed set of supported providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Swift(SwiftConfig),
    Oss(OssConfig),
    Local(LocalConfig),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Falls back to the ambient AWS credential chain when unset.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Custom endpoint, e.g. a MinIO server.
    #[serde(default)]
    pub host: Option<String>,
    /// `AES256` or `aws:kms`.
    #[serde(default)]
    pub server_side_encryption: Option<String>,
    #[serde(default)]
    pub sse_kms_key_id: Option<String>,
    /// Only SigV4 is supported.
    #[serde(default)]
    pub signature_version: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,
    pub email: String,
    pub private_key: String,
    pub private_key_id: String,
    /// OAuth token endpoint, usually `https://oauth2.googleapis.com/token`.
    pub token_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    pub account_name: String,
    /// Base64 encoded shared key.
    pub account_key: String,
    pub container_name: String,
    /// Custom endpoint, e.g. Azurite. Defaults to
    /// `https://{account_name}.blob.core.windows.net`.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwiftConfig {
    pub auth_url: String,
    pub username: String,
    pub api_key: String,
    pub container_name: String,
    pub temp_url_key: String,
    /// Account URL, e.g. `https://swift.example.com/v1/AUTH_account`. When
    /// set, URLs are signed without contacting the auth endpoint; otherwise
    /// signing authenticates once to learn it.
    #[serde(default)]
    pub storage_url: Option<String>,
    /// `1` for TempAuth, `3` for Keystone v3.
    #[serde(default = "default_swift_auth_version")]
    pub auth_version: u8,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

fn default_swift_auth_version() -> u8 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OssConfig {
    pub bucket_name: String,
    pub region: String,
    /// e.g. `https://oss-cn-hangzhou.aliyuncs.com`.
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    pub root: String,
}

/// Retry and timeout budget shared by the executor and the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Deadline for a whole operation, retries included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Deadline for a single attempt, enforced by the executor. The transport
    /// only uses it as connect timeout so long body transfers are not cut.
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_max_attempts() -> usize {
    5
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_jitter_ms() -> u64 {
    100
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_ms: default_jitter_ms(),
            attempt_timeout_secs: None,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay_ms: self.initial_backoff_ms,
            max_delay_ms: self.max_backoff_ms,
            jitter_ms: self.jitter_ms,
            deadline: Duration::from_secs(self.timeout_secs),
            attempt_timeout: self.attempt_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Native retry of the `object_store` transport, bounded by the same
    /// time budget as the executor.
    pub fn transport_retry(&self) -> object_store::RetryConfig {
        object_store::RetryConfig {
            backoff: object_store::BackoffConfig {
                init_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                base: 2.0,
            },
            max_retries: self.max_attempts.saturating_sub(1),
            retry_timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// HTTP client options for the transport. There is no whole-request
    /// timeout: it would also cover streaming the body of `get` and `put`.
    pub fn client_options(&self) -> object_store::ClientOptions {
        let options = object_store::ClientOptions::new().with_timeout_disabled();
        match self.attempt_timeout_secs {
            Some(secs) => options.with_connect_timeout(Duration::from_secs(secs)),
            None => options,
        }
    }
}

impl ProviderConfig {
    /// Provider name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::S3(_) => "s3",
            ProviderConfig::Gcs(_) => "gcs",
            ProviderConfig::Azure(_) => "azure",
            ProviderConfig::Swift(_) => "swift",
            ProviderConfig::Oss(_) => "oss",
            ProviderConfig::Local(_) => "local",
        }
    }

    /// Bucket, container or root directory the store is bound to.
    pub fn bucket(&self) -> &str {
        match self {
            ProviderConfig::S3(c) => &c.bucket,
            ProviderConfig::Gcs(c) => &c.bucket,
            ProviderConfig::Azure(c) => &c.container_name,
            ProviderConfig::Swift(c) => &c.container_name,
            ProviderConfig::Oss(c) => &c.bucket_name,
            ProviderConfig::Local(c) => &c.root,
        }
    }

    fn required_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            ProviderConfig::S3(c) => vec![("bucket", &c.bucket), ("region", &c.region)],
            ProviderConfig::Gcs(c) => vec![
                ("bucket", &c.bucket),
                ("email", &c.email),
                ("private_key", &c.private_key),
                ("private_key_id", &c.private_key_id),
                ("token_url", &c.token_url),
            ],
            ProviderConfig::Azure(c) => vec![
                ("account_name", &c.account_name),
                ("account_key", &c.account_key),
                ("container_name", &c.container_name),
            ],
            ProviderConfig::Swift(c) => vec![
                ("auth_url", &c.auth_url),
                ("username", &c.username),
                ("api_key", &c.api_key),
                ("container_name", &c.container_name),
                ("temp_url_key", &c.temp_url_key),
            ],
            ProviderConfig::Oss(c) => vec![
                ("bucket_name", &c.bucket_name),
                ("region", &c.region),
                ("endpoint", &c.endpoint),
                ("access_key_id", &c.access_key_id),
                ("access_key_secret", &c.access_key_secret),
            ],
            ProviderConfig::Local(c) => vec![("root", &c.root)],
        }
    }

    fn validate(&self) -> BlobResult<()> {
        for (field, value) in self.required_fields() {
            if value.trim().is_empty() {
                return Err(BlobError::invalid_config(format!(
                    "{} provider requires a non-empty '{field}'",
                    self.name()
                )));
            }
        }

        match self {
            ProviderConfig::S3(c) => {
                if let Some(version) = c.signature_version {
                    if version != 4 {
                        return Err(BlobError::invalid_config(format!(
                            "unsupported S3 signature_version {version}, only 4 is supported"
                        )));
                    }
                }
                if c.access_key_id.is_some() != c.secret_access_key.is_some() {
                    return Err(BlobError::invalid_config(
                        "access_key_id and secret_access_key must be set together",
                    ));
                }
                match c.server_side_encryption.as_deref() {
                    None | Some("AES256") => {
                        if c.sse_kms_key_id.is_some() {
                            return Err(BlobError::invalid_config(
                                "sse_kms_key_id requires server_side_encryption 'aws:kms'",
                            ));
                        }
                    }
                    Some("aws:kms") => {}
                    Some(other) => {
                        return Err(BlobError::invalid_config(format!(
                            "unsupported server_side_encryption '{other}', \
                             expected 'AES256' or 'aws:kms'"
                        )));
                    }
                }
            }
            ProviderConfig::Swift(c) => {
                if c.auth_version != 1 && c.auth_version != 3 {
                    return Err(BlobError::invalid_config(format!(
                        "unsupported swift auth_version {}, expected 1 or 3",
                        c.auth_version
                    )));
                }
                if let Some(storage_url) = &c.storage_url {
                    url::Url::parse(storage_url).map_err(|e| {
                        BlobError::invalid_config(format!(
                            "invalid swift storage_url {storage_url}: {e}"
                        ))
                    })?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl BlobStoreConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            retry: RetrySettings::default(),
            redirect_expiry_secs: default_redirect_expiry_secs(),
            delete_concurrency: default_delete_concurrency(),
        }
    }

    /// Local filesystem store rooted at `root`.
    pub fn local(root: impl Into<String>) -> Self {
        Self::new(ProviderConfig::Local(LocalConfig { root: root.into() }))
    }

    /// Load from a YAML file, with `BLOBSTORE_` environment overrides.
    pub fn from_path(path: impl AsRef<Path>) -> BlobResult<Self> {
        let config: BlobStoreConfig = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(BlobError::invalid_config)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without environment overrides.
    pub fn from_yaml(yaml: &str) -> BlobResult<Self> {
        let config: BlobStoreConfig = Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(BlobError::invalid_config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BlobResult<()> {
        self.provider.validate()?;
        presign::validate_expiry(self.redirect_expiry())
            .map_err(|e| BlobError::invalid_config(format!("redirect_expiry_secs: {e}")))?;
        if self.delete_concurrency == 0 {
            return Err(BlobError::invalid_config("delete_concurrency must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(BlobError::invalid_config("retry.max_attempts must be at least 1"));
        }
        if self.retry.timeout_secs == 0 {
            return Err(BlobError::invalid_config("retry.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn redirect_expiry(&self) -> Duration {
        Duration::from_secs(self.redirect_expiry_secs)
    }
}

#[cfg(test)]
mod tests {
    use object_store::ClientConfigKey;

    use super::*;

    #[test]
    fn test_s3_config_with_defaults() {
        let config = BlobStoreConfig::from_yaml(
            r#"
provider: s3
bucket: my-bucket
region: us-east-1
access_key_id: key
secret_access_key: secret
server_side_encryption: aws:kms
sse_kms_key_id: arn:aws:kms:us-east-1:123:key/abc
"#,
        )
        .unwrap();

        let ProviderConfig::S3(s3) = &config.provider else {
            panic!("expected s3 provider");
        };
        assert_eq!(s3.bucket, "my-bucket");
        assert_eq!(s3.server_side_encryption.as_deref(), Some("aws:kms"));
        assert_eq!(config.provider.name(), "s3");
        assert_eq!(config.redirect_expiry_secs, 3600);
        assert_eq!(config.delete_concurrency, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.policy().deadline, Duration::from_secs(5));
    }

    #[test]
    fn test_retry_settings_override() {
        let config = BlobStoreConfig::from_yaml(
            r#"
provider: local
root: /tmp/blobs
retry:
  timeout_secs: 30
  attempt_timeout_secs: 2
delete_concurrency: 1
"#,
        )
        .unwrap();
        let policy = config.retry.policy();
        assert_eq!(policy.deadline, Duration::from_secs(30));
        assert_eq!(policy.attempt_timeout, Some(Duration::from_secs(2)));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(config.retry.transport_retry().max_retries, 4);
        assert_eq!(config.delete_concurrency, 1);
    }

    #[test]
    fn test_swift_config() {
        let config = BlobStoreConfig::from_yaml(
            r#"
provider: swift
auth_url: https://auth.example.com/v3
username: user
api_key: key
container_name: droplets
temp_url_key: secret
auth_version: 3
domain_name: default
project_name: bits
"#,
        )
        .unwrap();
        assert_eq!(config.provider.bucket(), "droplets");
    }

    #[test]
    fn test_empty_required_field_is_rejected() {
        let err = BlobStoreConfig::from_yaml(
            r#"
provider: azure
account_name: account
account_key: ""
container_name: c
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("account_key"));
    }

    #[test]
    fn test_gcs_requires_key_id_and_token_url() {
        let base = "provider: gcs\nbucket: b\nemail: sa@example.com\nprivate_key: pem\n";

        let err = BlobStoreConfig::from_yaml(&format!(
            "{base}private_key_id: ''\ntoken_url: https://oauth2.googleapis.com/token\n"
        ))
        .unwrap_err();
        assert!(err.to_string().contains("private_key_id"));

        let err =
            BlobStoreConfig::from_yaml(&format!("{base}private_key_id: abc\ntoken_url: ' '\n"))
                .unwrap_err();
        assert!(err.to_string().contains("token_url"));

        let err = BlobStoreConfig::from_yaml(&format!("{base}private_key_id: abc\n")).unwrap_err();
        assert!(matches!(err, BlobError::InvalidConfig { .. }));

        assert!(BlobStoreConfig::from_yaml(&format!(
            "{base}private_key_id: abc\ntoken_url: https://oauth2.googleapis.com/token\n"
        ))
        .is_ok());
    }

    #[test]
    fn test_swift_storage_url_must_parse() {
        let base = "provider: swift\nauth_url: https://auth.example.com/auth/v1.0\n\
                    username: u\napi_key: k\ncontainer_name: c\ntemp_url_key: t\n";
        assert!(BlobStoreConfig::from_yaml(&format!("{base}storage_url: not a url\n")).is_err());
        let config = BlobStoreConfig::from_yaml(&format!(
            "{base}storage_url: https://swift.example.com/v1/AUTH_x\n"
        ))
        .unwrap();
        let ProviderConfig::Swift(swift) = &config.provider else {
            panic!("expected swift provider");
        };
        assert_eq!(
            swift.storage_url.as_deref(),
            Some("https://swift.example.com/v1/AUTH_x")
        );
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = BlobStoreConfig::from_yaml("provider: ftp\nbucket: b\n").unwrap_err();
        assert!(matches!(err, BlobError::InvalidConfig { .. }));
    }

    #[test]
    fn test_invalid_s3_settings_are_rejected() {
        let base = |extra: &str| {
            format!("provider: s3\nbucket: b\nregion: us-east-1\n{extra}")
        };
        assert!(BlobStoreConfig::from_yaml(&base("signature_version: 2\n")).is_err());
        assert!(BlobStoreConfig::from_yaml(&base("server_side_encryption: rot13\n")).is_err());
        assert!(BlobStoreConfig::from_yaml(&base("sse_kms_key_id: k\n")).is_err());
        assert!(BlobStoreConfig::from_yaml(&base("access_key_id: only-half\n")).is_err());
        assert!(BlobStoreConfig::from_yaml(&base("signature_version: 4\n")).is_ok());
    }

    #[test]
    fn test_attempt_timeout_only_bounds_connect() {
        let config = BlobStoreConfig::from_yaml(
            "provider: local\nroot: /tmp/blobs\nretry:\n  attempt_timeout_secs: 1\n",
        )
        .unwrap();
        let options = config.retry.client_options();
        assert_eq!(options.get_config_value(&ClientConfigKey::Timeout), None);
        assert_eq!(
            options.get_config_value(&ClientConfigKey::ConnectTimeout),
            Some("1s".to_string())
        );
    }

    #[test]
    fn test_invalid_redirect_expiry_is_rejected() {
        let err = BlobStoreConfig::from_yaml(
            "provider: local\nroot: /tmp/blobs\nredirect_expiry_secs: 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("redirect_expiry_secs"));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "blobstore.yml",
                "provider: local\nroot: /tmp/from-file\ndelete_concurrency: 4\n",
            )?;
            jail.set_env("BLOBSTORE_ROOT", "/tmp/from-env");
            jail.set_env("BLOBSTORE_RETRY__TIMEOUT_SECS", "12");

            let config = BlobStoreConfig::from_path("blobstore.yml").unwrap();
            assert_eq!(config.provider.bucket(), "/tmp/from-env");
            assert_eq!(config.retry.timeout_secs, 12);
            assert_eq!(config.delete_concurrency, 4);
            Ok(())
        });
    }
}
