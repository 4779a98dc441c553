//! Provider adapters against in-process fake Swift and S3 servers.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, head},
};
use bits_blobstore::{
    BlobError,
    BlobStorage,
    BlobStoreConfig,
    Operation,
    config::{ProviderConfig, S3Config, SwiftConfig},
};
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpListener;

// ============================================================================
// Test Servers
// ============================================================================

/// Body of the `slow` object, sent one chunk at a time.
const SLOW_CHUNKS: [&str; 3] = ["one ", "two ", "three"];
const SLOW_CHUNK_DELAY: Duration = Duration::from_millis(600);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    (listener, base_url)
}

fn serve(listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
}

fn slow_body() -> Body {
    Body::from_stream(futures::stream::iter(SLOW_CHUNKS).then(|chunk| async move {
        tokio::time::sleep(SLOW_CHUNK_DELAY).await;
        Ok::<_, std::io::Error>(Bytes::from(chunk))
    }))
}

fn slow_body_len() -> usize {
    SLOW_CHUNKS.iter().map(|chunk| chunk.len()).sum()
}

/// Swift account `AUTH_test` with one container, `droplets`. Only the most
/// recently issued token is accepted.
struct FakeSwift {
    base_url: String,
    issued: AtomicUsize,
    valid_token: Mutex<Option<String>>,
    objects: Mutex<HashMap<String, Bytes>>,
}

impl FakeSwift {
    async fn start() -> Arc<Self> {
        let (listener, base_url) = bind().await;
        let swift = Arc::new(Self {
            base_url,
            issued: AtomicUsize::new(0),
            valid_token: Mutex::new(None),
            objects: Mutex::new(HashMap::new()),
        });
        let router = Router::new()
            .route("/auth/v1.0", get(swift_auth))
            .route("/v1/AUTH_test/{container}", head(swift_head_container))
            .route(
                "/v1/AUTH_test/{container}/{*key}",
                get(swift_get_object).put(swift_put_object),
            )
            .with_state(swift.clone());
        serve(listener, router);
        swift
    }

    /// Server-side token expiry: every issued token stops working.
    fn revoke_tokens(&self) {
        *self.valid_token.lock().unwrap() = None;
    }

    fn auth_calls(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let token = headers.get("x-auth-token").and_then(|v| v.to_str().ok());
        token.is_some() && token == self.valid_token.lock().unwrap().as_deref()
    }

    fn config(&self, container: &str) -> BlobStoreConfig {
        let mut config = BlobStoreConfig::new(ProviderConfig::Swift(SwiftConfig {
            auth_url: format!("{}/auth/v1.0", self.base_url),
            username: "test:tester".to_string(),
            api_key: "testing".to_string(),
            container_name: container.to_string(),
            temp_url_key: "tempkey".to_string(),
            storage_url: None,
            auth_version: 1,
            domain_name: None,
            project_name: None,
            region: None,
        }));
        config.retry.timeout_secs = 10;
        config.retry.attempt_timeout_secs = Some(1);
        config
    }
}

async fn swift_auth(State(swift): State<Arc<FakeSwift>>) -> impl IntoResponse {
    let token = format!("token-{}", swift.issued.fetch_add(1, Ordering::SeqCst) + 1);
    *swift.valid_token.lock().unwrap() = Some(token.clone());
    (
        StatusCode::OK,
        [
            ("x-auth-token", token),
            ("x-storage-url", format!("{}/v1/AUTH_test", swift.base_url)),
        ],
    )
}

async fn swift_head_container(
    State(swift): State<Arc<FakeSwift>>,
    Path(container): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    if !swift.authorized(&headers) {
        StatusCode::UNAUTHORIZED
    } else if container != "droplets" {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn swift_put_object(
    State(swift): State<Arc<FakeSwift>>,
    Path((container, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !swift.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if container != "droplets" {
        return StatusCode::NOT_FOUND;
    }
    swift.objects.lock().unwrap().insert(key, body);
    StatusCode::CREATED
}

async fn swift_get_object(
    State(swift): State<Arc<FakeSwift>>,
    Path((container, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !swift.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if container != "droplets" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if key == "slow" {
        return slow_body().into_response();
    }
    match swift.object(&key) {
        Some(body) => body.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// S3 endpoint serving one bucket, `droplets`, in path style. Records the
/// headers of every PUT by key.
struct FakeS3 {
    objects: Mutex<HashMap<String, Bytes>>,
    put_headers: Mutex<HashMap<String, HeaderMap>>,
}

impl FakeS3 {
    async fn start() -> (Arc<Self>, String) {
        let (listener, base_url) = bind().await;
        let s3 = Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            put_headers: Mutex::new(HashMap::new()),
        });
        let router = Router::new()
            .route("/{bucket}", get(s3_list))
            .route("/{bucket}/{*key}", get(s3_get_object).put(s3_put_object))
            .with_state(s3.clone());
        serve(listener, router);
        (s3, base_url)
    }

    fn put_header(&self, key: &str, name: &str) -> Option<String> {
        self.put_headers
            .lock()
            .unwrap()
            .get(key)
            .and_then(|headers| headers.get(name))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

fn s3_config(base_url: &str, bucket: &str) -> S3Config {
    S3Config {
        bucket: bucket.to_string(),
        region: "us-east-1".to_string(),
        access_key_id: Some("AKIDEXAMPLE".to_string()),
        secret_access_key: Some("secret".to_string()),
        host: Some(base_url.to_string()),
        ..Default::default()
    }
}

fn s3_storage(config: S3Config) -> BlobStorage {
    let mut config = BlobStoreConfig::new(ProviderConfig::S3(config));
    config.retry.timeout_secs = 10;
    config.retry.attempt_timeout_secs = Some(1);
    BlobStorage::new(config).unwrap()
}

fn no_such_bucket(bucket: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message>\
         <BucketName>{bucket}</BucketName></Error>"
    );
    (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn object_headers(len: usize) -> [(header::HeaderName, String); 3] {
    [
        (header::CONTENT_LENGTH, len.to_string()),
        (header::ETAG, "\"5d41402abc4b2a76b9719d911017c592\"".to_string()),
        (header::LAST_MODIFIED, "Tue, 15 Nov 1994 12:45:26 GMT".to_string()),
    ]
}

async fn s3_list(Path(bucket): Path<String>) -> Response {
    if bucket != "droplets" {
        return no_such_bucket(&bucket);
    }
    let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                <ListBucketResult><Name>droplets</Name><Prefix></Prefix><KeyCount>0</KeyCount>\
                <MaxKeys>1000</MaxKeys><IsTruncated>false</IsTruncated></ListBucketResult>";
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

async fn s3_put_object(
    State(s3): State<Arc<FakeS3>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if bucket != "droplets" {
        return no_such_bucket(&bucket);
    }
    let copy_source = headers
        .get("x-amz-copy-source")
        .and_then(|value| value.to_str().ok())
        .map(|source| source.trim_start_matches('/').trim_start_matches("droplets/").to_string());
    s3.put_headers.lock().unwrap().insert(key.clone(), headers);

    let mut objects = s3.objects.lock().unwrap();
    match copy_source {
        Some(source) => {
            let Some(data) = objects.get(&source).cloned() else {
                return StatusCode::NOT_FOUND.into_response();
            };
            objects.insert(key, data);
            let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                        <CopyObjectResult><LastModified>2030-01-01T00:00:00.000Z</LastModified>\
                        <ETag>\"5d41402abc4b2a76b9719d911017c592\"</ETag></CopyObjectResult>";
            (StatusCode::OK, body).into_response()
        }
        None => {
            objects.insert(key, body);
            (StatusCode::OK, [(header::ETAG, "\"5d41402abc4b2a76b9719d911017c592\"")])
                .into_response()
        }
    }
}

async fn s3_get_object(
    State(s3): State<Arc<FakeS3>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    if bucket != "droplets" {
        return no_such_bucket(&bucket);
    }
    if key == "slow" {
        return (object_headers(slow_body_len()), slow_body()).into_response();
    }
    match s3.objects.lock().unwrap().get(&key).cloned() {
        Some(body) => (object_headers(body.len()), body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Swift
// ============================================================================

#[tokio::test]
async fn test_swift_put_refreshes_expired_token() {
    let swift = FakeSwift::start().await;
    let storage = BlobStorage::new(swift.config("droplets")).unwrap();

    storage.put_bytes("ab/one", "first").await.unwrap();
    assert_eq!(swift.auth_calls(), 1);

    swift.revoke_tokens();
    let result = storage.put_bytes("ab/two", "second").await.unwrap();
    assert_eq!(result.size_bytes, 6);
    assert_eq!(swift.object("ab/two"), Some(Bytes::from("second")));
    assert_eq!(swift.auth_calls(), 2);

    assert_eq!(storage.read_bytes("ab/one").await.unwrap(), Bytes::from("first"));
    assert_eq!(swift.auth_calls(), 2);
}

#[tokio::test]
async fn test_swift_missing_container_is_permanent() {
    let swift = FakeSwift::start().await;
    let storage = BlobStorage::new(swift.config("missing")).unwrap();

    let err = storage.get("ab/one").await.unwrap_err();
    assert!(matches!(err, BlobError::Permanent { op: Operation::Get, .. }), "{err}");

    let err = storage.put_bytes("ab/one", "first").await.unwrap_err();
    assert!(matches!(err, BlobError::Permanent { op: Operation::Put, .. }), "{err}");
}

#[tokio::test]
async fn test_swift_slow_body_outlives_attempt_timeout() {
    let swift = FakeSwift::start().await;
    let storage = BlobStorage::new(swift.config("droplets")).unwrap();

    let body = storage.read_bytes("slow").await.unwrap();
    assert_eq!(body, Bytes::from("one two three"));
}

// ============================================================================
// S3
// ============================================================================

#[tokio::test]
async fn test_s3_copy_carries_server_side_encryption() {
    let (s3, base_url) = FakeS3::start().await;
    let storage = s3_storage(S3Config {
        server_side_encryption: Some("aws:kms".to_string()),
        sse_kms_key_id: Some("arn:aws:kms:us-east-1:123:key/abc".to_string()),
        ..s3_config(&base_url, "droplets")
    });

    storage.put_bytes("ab/src", "payload").await.unwrap();
    storage.copy("ab/src", "ab/dest").await.unwrap();
    assert_eq!(storage.read_bytes("ab/dest").await.unwrap(), Bytes::from("payload"));

    for key in ["ab/src", "ab/dest"] {
        assert_eq!(
            s3.put_header(key, "x-amz-server-side-encryption").as_deref(),
            Some("aws:kms"),
            "{key}"
        );
        assert_eq!(
            s3.put_header(key, "x-amz-server-side-encryption-aws-kms-key-id").as_deref(),
            Some("arn:aws:kms:us-east-1:123:key/abc"),
            "{key}"
        );
    }
    assert!(s3.put_header("ab/dest", "x-amz-copy-source").is_some());
}

#[tokio::test]
async fn test_s3_missing_bucket_is_permanent() {
    let (_s3, base_url) = FakeS3::start().await;
    let storage = s3_storage(s3_config(&base_url, "missing"));

    let err = storage.get("ab/one").await.unwrap_err();
    assert!(matches!(err, BlobError::Permanent { op: Operation::Get, .. }), "{err}");
    let err = storage.exists("ab/one").await.unwrap_err();
    assert!(matches!(err, BlobError::Permanent { op: Operation::Exists, .. }), "{err}");
}

#[tokio::test]
async fn test_s3_missing_key_is_not_found() {
    let (_s3, base_url) = FakeS3::start().await;
    let storage = s3_storage(s3_config(&base_url, "droplets"));

    assert!(storage.get("ab/none").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_s3_slow_body_outlives_attempt_timeout() {
    let (_s3, base_url) = FakeS3::start().await;
    let storage = s3_storage(s3_config(&base_url, "droplets"));

    let body = storage.read_bytes("slow").await.unwrap();
    assert_eq!(body, Bytes::from("one two three"));
}
