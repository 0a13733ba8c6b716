//! Registry v2 client: token exchange, manifest and blob fetches
//!
//! Every request goes through the configured [`RetryPolicy`] and carries the
//! full `Accept` list. Only status 200 counts as success; any other status is
//! surfaced as [`ExportError::HttpStatus`] so the caller sees the code.

use crate::config::ExportConfig;
use crate::digest::DigestUtils;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{ExportError, Result};
use crate::image::manifest::{self, ManifestType};
use crate::image::{ManifestList, PlatformManifest};
use crate::logging::Logger;
use crate::registry::auth::{self, TokenGrant};
use crate::registry::retry::RetryPolicy;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub struct RegistryClientBuilder {
    registry_url: String,
    auth_realm: String,
    auth_service: String,
    namespace: String,
    timeout: Duration,
    retry: RetryPolicy,
    verify_digests: bool,
    output: Logger,
}

impl RegistryClientBuilder {
    pub fn new(registry_url: &str) -> Self {
        let defaults = ExportConfig::default();
        let timeout = defaults.request_timeout();
        Self {
            registry_url: registry_url.trim_end_matches('/').to_string(),
            auth_realm: defaults.auth_realm,
            auth_service: defaults.auth_service,
            namespace: defaults.namespace,
            timeout,
            retry: RetryPolicy::default(),
            verify_digests: true,
            output: Logger::default(),
        }
    }

    pub fn with_auth_realm(mut self, realm: &str, service: &str) -> Self {
        self.auth_realm = realm.to_string();
        self.auth_service = service.to_string();
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.trim_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    pub fn with_output(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "client setup"))?;

        Ok(RegistryClient {
            client,
            registry_url: self.registry_url,
            auth_realm: self.auth_realm,
            auth_service: self.auth_service,
            namespace: self.namespace,
            accept: manifest::accept_header(),
            retry: self.retry,
            verify_digests: self.verify_digests,
            output: self.output,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    registry_url: String,
    auth_realm: String,
    auth_service: String,
    namespace: String,
    accept: String,
    retry: RetryPolicy,
    verify_digests: bool,
    output: Logger,
}

impl RegistryClient {
    pub fn builder(registry_url: &str) -> RegistryClientBuilder {
        RegistryClientBuilder::new(registry_url)
    }

    pub fn from_config(config: &ExportConfig, output: Logger) -> Result<Self> {
        Self::builder(&config.registry_url)
            .with_auth_realm(&config.auth_realm, &config.auth_service)
            .with_namespace(&config.namespace)
            .with_timeout(config.request_timeout())
            .with_retry(RetryPolicy::new(
                config.retry_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
            ))
            .with_verify_digests(config.verify_digests)
            .with_output(output)
            .build()
    }

    fn repository_path(&self, repository: &str) -> String {
        if self.namespace.is_empty() {
            format!("{}/v2/{}", self.registry_url, repository)
        } else {
            format!("{}/v2/{}/{}", self.registry_url, self.namespace, repository)
        }
    }

    pub fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!("{}/manifests/{}", self.repository_path(repository), reference)
    }

    pub fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!("{}/blobs/{}", self.repository_path(repository), digest)
    }

    /// Request an anonymous pull token from the auth realm
    pub async fn fetch_token(&self, repository: &str) -> Result<TokenGrant> {
        let scope = auth::pull_scope(&self.namespace, repository);
        self.output
            .detail(&format!("Requesting token for {} from {}", scope, self.auth_realm));

        let body = self
            .retry
            .run(&self.output, "token fetch", move || {
                let scope = scope.clone();
                async move {
                    let response = self
                        .client
                        .get(&self.auth_realm)
                        .query(&[("service", self.auth_service.as_str()), ("scope", scope.as_str())])
                        .send()
                        .await
                        .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token fetch"))?;

                    if response.status() != StatusCode::OK {
                        return Err(self.status_error(response.status(), "token fetch"));
                    }
                    response
                        .bytes()
                        .await
                        .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token fetch"))
                }
            })
            .await?;

        TokenGrant::parse(&body)
    }

    /// Fetch the manifest list / image index for `reference`
    ///
    /// A 200 whose `Content-Type` is not a list type yields
    /// [`ExportError::NotMultiPlatform`], which callers treat as a branch rather than a failure.
    pub async fn fetch_manifest_list(
        &self,
        repository: &str,
        reference: &str,
        token: Option<&str>,
    ) -> Result<(ManifestList, Vec<u8>)> {
        let url = self.manifest_url(repository, reference);
        let (content_type, body) = self.get(&url, token, false, "manifest list fetch").await?;

        if !ManifestType::from_media_type(&content_type).is_multi_platform() {
            return Err(ExportError::NotMultiPlatform { content_type });
        }
        if self.verify_digests && DigestUtils::is_valid_digest(reference) {
            DigestUtils::verify_data_integrity(&body, reference)?;
        }

        let list = manifest::parse_manifest_list(&body)?;
        self.output.verbose(&format!(
            "Manifest list for {}:{} has {} entries",
            repository,
            reference,
            list.manifests.len()
        ));
        Ok((list, body))
    }

    /// Fetch a single-platform manifest by tag or digest
    pub async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
        token: Option<&str>,
    ) -> Result<(PlatformManifest, Vec<u8>)> {
        let url = self.manifest_url(repository, reference);
        let (_, body) = self.get(&url, token, false, "manifest fetch").await?;

        if self.verify_digests && DigestUtils::is_valid_digest(reference) {
            DigestUtils::verify_data_integrity(&body, reference)?;
        }

        let manifest = manifest::parse_platform_manifest(&body)?;
        Ok((manifest, body))
    }

    /// Fetch a config or layer blob; the body is returned exactly as served
    pub async fn fetch_blob(
        &self,
        repository: &str,
        digest: &str,
        token: Option<&str>,
        layer: bool,
    ) -> Result<Vec<u8>> {
        DigestUtils::split(digest)?;
        let url = self.blob_url(repository, digest);
        let operation = if layer { "layer fetch" } else { "config fetch" };
        let (_, body) = self.get(&url, token, layer, operation).await?;

        if self.verify_digests {
            DigestUtils::verify_data_integrity(&body, digest)?;
        }
        Ok(body)
    }

    /// `HEAD` the manifest endpoint; used to check whether a cached token still works
    pub async fn probe_manifest(
        &self,
        repository: &str,
        reference: &str,
        token: &str,
    ) -> Result<()> {
        let response = self
            .client
            .head(self.manifest_url(repository, reference))
            .header(ACCEPT, &self.accept)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token probe"))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(HttpErrorHandler::handle_registry_status(
                response.status(),
                "token probe",
            ))
        }
    }

    async fn get(
        &self,
        url: &str,
        token: Option<&str>,
        gzip: bool,
        operation: &str,
    ) -> Result<(String, Vec<u8>)> {
        self.output.detail(&format!("GET {}", url));

        self.retry
            .run(&self.output, operation, move || async move {
                let mut request = self.client.get(url).header(ACCEPT, &self.accept);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                if gzip {
                    request = request.header(ACCEPT_ENCODING, "gzip");
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;

                if response.status() != StatusCode::OK {
                    return Err(self.status_error(response.status(), operation));
                }

                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;

                Ok((content_type, body.to_vec()))
            })
            .await
    }

    fn status_error(&self, status: StatusCode, operation: &str) -> ExportError {
        self.output.detail(&format!(
            "{} returned {} ({})",
            operation,
            status.as_u16(),
            HttpErrorHandler::describe_status(status.as_u16())
        ));
        HttpErrorHandler::handle_registry_status(status, operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> RegistryClient {
        RegistryClient::builder(&server.uri())
            .with_auth_realm(&format!("{}/token", server.uri()), "registry.test")
            .with_retry(RetryPolicy::none())
            .with_output(Logger::new_quiet())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_token_sends_scope_and_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("service", "registry.test"))
            .and(query_param("scope", "repository:library/busybox:pull"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"t0k"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client_for(&server).await.fetch_token("busybox").await.unwrap();
        assert_eq!(grant.token, "t0k");
    }

    #[tokio::test]
    async fn test_fetch_token_non_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server).await.fetch_token("busybox").await.unwrap_err();
        assert!(matches!(err, ExportError::HttpStatus { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_single_manifest_is_not_multi_platform() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/hello/manifests/latest"))
            .and(header("authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"schemaVersion":2,"config":{"digest":"sha256:aa","size":1},"layers":[]}"#,
                manifest::DOCKER_MANIFEST_V2,
            ))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_manifest_list("hello", "latest", Some("t0k"))
            .await
            .unwrap_err();
        assert!(err.is_not_multi_platform());
    }

    #[tokio::test]
    async fn test_fetch_manifest_list_by_content_type() {
        let server = MockServer::start().await;
        let body = r#"{"schemaVersion":2,"manifests":[{"digest":"sha256:1111111111111111111111111111111111111111111111111111111111111111","platform":{"os":"linux","architecture":"amd64"}}]}"#;
        Mock::given(method("GET"))
            .and(path("/v2/library/busybox/manifests/1.36"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, manifest::OCI_IMAGE_INDEX_V1),
            )
            .mount(&server)
            .await;

        let (list, raw) = client_for(&server)
            .await
            .fetch_manifest_list("busybox", "1.36", None)
            .await
            .unwrap();
        assert_eq!(raw, body.as_bytes());
        assert_eq!(list.manifests[0].platform_label(), "linux/amd64");
    }

    #[tokio::test]
    async fn test_fetch_blob_verifies_digest() {
        let server = MockServer::start().await;
        let data = b"layer bytes".to_vec();
        let digest = DigestUtils::compute_docker_digest(&data);
        let bogus = DigestUtils::compute_docker_digest(b"something else");

        Mock::given(method("GET"))
            .and(path(format!("/v2/library/busybox/blobs/{}", digest)))
            .and(header("accept-encoding", "gzip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v2/library/busybox/blobs/{}", bogus)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let fetched = client.fetch_blob("busybox", &digest, None, true).await.unwrap();
        assert_eq!(fetched, data);

        let err = client.fetch_blob("busybox", &bogus, None, true).await.unwrap_err();
        assert!(matches!(err, ExportError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_manifest_list_by_digest_is_verified() {
        let server = MockServer::start().await;
        let body = r#"{"schemaVersion":2,"manifests":[]}"#;
        let good = DigestUtils::compute_docker_digest(body.as_bytes());
        let wrong = format!("sha256:{}", "0".repeat(64));

        for reference in [&good, &wrong] {
            Mock::given(method("GET"))
                .and(path(format!("/v2/library/busybox/manifests/{}", reference)))
                .respond_with(
                    ResponseTemplate::new(200).set_body_raw(body, manifest::OCI_IMAGE_INDEX_V1),
                )
                .mount(&server)
                .await;
        }

        let client = client_for(&server).await;
        assert!(client.fetch_manifest_list("busybox", &good, None).await.is_ok());

        let err = client
            .fetch_manifest_list("busybox", &wrong, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::DigestMismatch { .. }));

        let unverified = RegistryClient::builder(&server.uri())
            .with_retry(RetryPolicy::none())
            .with_verify_digests(false)
            .with_output(Logger::new_quiet())
            .build()
            .unwrap();
        assert!(unverified.fetch_manifest_list("busybox", &wrong, None).await.is_ok());
    }

    #[test]
    fn test_builder_defaults_follow_config() {
        let client = RegistryClient::builder("https://registry.example.com/")
            .build()
            .unwrap();
        let defaults = ExportConfig::default();
        assert_eq!(
            client.manifest_url("busybox", "latest"),
            "https://registry.example.com/v2/library/busybox/manifests/latest"
        );
        assert_eq!(client.auth_realm, defaults.auth_realm);
        assert_eq!(client.auth_service, defaults.auth_service);
        assert!(client.verify_digests);
    }

    #[tokio::test]
    async fn test_fetch_blob_rejects_malformed_digest() {
        let server = MockServer::start().await;
        let err = client_for(&server)
            .await
            .fetch_blob("busybox", "sha256:../../etc/passwd", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidDigest(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        let data = b"config".to_vec();
        let digest = DigestUtils::compute_docker_digest(&data);
        let blob_path = format!("/v2/library/busybox/blobs/{}", digest);

        Mock::given(method("GET"))
            .and(path(blob_path.clone()))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(blob_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;

        let client = RegistryClient::builder(&server.uri())
            .with_retry(RetryPolicy::new(
                2,
                Duration::from_millis(1),
                Duration::from_millis(5),
            ))
            .with_output(Logger::new_quiet())
            .build()
            .unwrap();

        let fetched = client.fetch_blob("busybox", &digest, None, false).await.unwrap();
        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn test_head_manifest_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/library/busybox/manifests/latest"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/v2/library/busybox/manifests/latest"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.probe_manifest("busybox", "latest", "good").await.is_ok());
        assert!(client.probe_manifest("busybox", "latest", "stale").await.is_err());
    }
}
