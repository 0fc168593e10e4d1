//! gRPC client for KMS v1beta1 plugins
//!
//! Plugins listen on a unix socket (`unix:///path/to/kms.sock`, or
//! `unix:///@name` for the Linux abstract namespace) and serve the
//! `v1beta1.KeyManagementService` unary methods. Messages are declared here
//! with prost derives, matching the plugin contract field-for-field.

use super::service::{KmsConnector, KmsService, KMS_API_VERSION};
use crate::config::encryption::KmsProviderConfig;
use crate::errors::KmsError;
use async_trait::async_trait;
use http::uri::PathAndQuery;
use http::Uri;
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, instrument};

const ENCRYPT_PATH: &str = "/v1beta1.KeyManagementService/Encrypt";
const DECRYPT_PATH: &str = "/v1beta1.KeyManagementService/Decrypt";
const VERSION_PATH: &str = "/v1beta1.KeyManagementService/Version";

#[derive(Clone, PartialEq, prost::Message)]
pub struct VersionRequest {
    #[prost(string, tag = "1")]
    pub version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VersionResponse {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(string, tag = "2")]
    pub runtime_name: String,
    #[prost(string, tag = "3")]
    pub runtime_version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EncryptRequest {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(bytes = "vec", tag = "2")]
    pub plain: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EncryptResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub cipher: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DecryptRequest {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(bytes = "vec", tag = "2")]
    pub cipher: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DecryptResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub plain: Vec<u8>,
}

/// Where a plugin socket lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    /// Filesystem socket path
    Path(PathBuf),
    /// Linux abstract namespace name (without the leading `@`)
    Abstract(String),
}

/// Parse a `unix://` endpoint into a socket address.
pub fn parse_endpoint(endpoint: &str) -> Result<SocketAddress, KmsError> {
    let invalid = |reason: &str| KmsError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let parsed = url::Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    if parsed.scheme() != "unix" {
        return Err(invalid("only the unix scheme is supported"));
    }
    if parsed.host_str().is_some_and(|h| !h.is_empty()) {
        return Err(invalid("unix endpoints must not name a host"));
    }
    let path = parsed.path();
    if let Some(name) = path.strip_prefix("/@") {
        if name.is_empty() {
            return Err(invalid("abstract socket name is empty"));
        }
        return Ok(SocketAddress::Abstract(name.to_string()));
    }
    if path.is_empty() || path == "/" {
        return Err(invalid("socket path is empty"));
    }
    Ok(SocketAddress::Path(PathBuf::from(path)))
}

async fn connect_socket(address: SocketAddress) -> std::io::Result<tokio::net::UnixStream> {
    match address {
        SocketAddress::Path(path) => tokio::net::UnixStream::connect(path).await,
        SocketAddress::Abstract(name) => connect_abstract(&name),
    }
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> std::io::Result<tokio::net::UnixStream> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    tokio::net::UnixStream::from_std(stream)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(name: &str) -> std::io::Result<tokio::net::UnixStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("abstract socket @{} requires Linux", name),
    ))
}

/// KMS plugin reached over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcKmsService {
    endpoint: String,
    channel: Channel,
}

impl GrpcKmsService {
    /// Create a client for `endpoint`. The socket is dialled lazily on the
    /// first call, so a plugin that is down does not block configuration.
    pub fn connect_lazy(endpoint: &str) -> Result<Self, KmsError> {
        let address = parse_endpoint(endpoint)?;

        // The URI is ignored by the connector; tonic only needs a valid authority.
        let channel = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| KmsError::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?
            .connect_with_connector_lazy(tower::service_fn(move |_: Uri| {
                let address = address.clone();
                async move { Ok::<_, std::io::Error>(TokioIo::new(connect_socket(address).await?)) }
            }));

        Ok(Self { endpoint: endpoint.to_string(), channel })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, KmsError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| KmsError::Connect {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })?;
        let codec = tonic_prost::ProstCodec::<Req, Resp>::default();
        let response = grpc
            .unary(tonic::Request::new(request), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }

    /// Ask the plugin which API version it serves.
    pub async fn version(&self) -> Result<VersionResponse, KmsError> {
        let response: VersionResponse = self
            .unary(VERSION_PATH, VersionRequest { version: KMS_API_VERSION.to_string() })
            .await?;
        check_version(response)
    }
}

#[async_trait]
impl KmsService for GrpcKmsService {
    #[instrument(skip(self, plaintext), fields(endpoint = %self.endpoint))]
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let response: EncryptResponse = self
            .unary(
                ENCRYPT_PATH,
                EncryptRequest { version: KMS_API_VERSION.to_string(), plain: plaintext.to_vec() },
            )
            .await?;
        if response.cipher.is_empty() {
            return Err(KmsError::InvalidResponse("empty ciphertext from encrypt".to_string()));
        }
        debug!(wrapped_len = response.cipher.len(), "KMS encrypt completed");
        Ok(response.cipher)
    }

    #[instrument(skip(self, ciphertext), fields(endpoint = %self.endpoint))]
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let response: DecryptResponse = self
            .unary(
                DECRYPT_PATH,
                DecryptRequest { version: KMS_API_VERSION.to_string(), cipher: ciphertext.to_vec() },
            )
            .await?;
        debug!(plain_len = response.plain.len(), "KMS decrypt completed");
        Ok(response.plain)
    }
}

fn check_version(response: VersionResponse) -> Result<VersionResponse, KmsError> {
    if response.version != KMS_API_VERSION {
        return Err(KmsError::InvalidResponse(format!(
            "plugin serves API version {}, expected {}",
            response.version, KMS_API_VERSION
        )));
    }
    Ok(response)
}

/// Connector producing lazily-dialled gRPC clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrpcConnector;

impl KmsConnector for GrpcConnector {
    fn connect(&self, provider: &KmsProviderConfig) -> Result<Arc<dyn KmsService>, KmsError> {
        Ok(Arc::new(GrpcKmsService::connect_lazy(&provider.endpoint)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_parse_abstract_endpoint() {
        assert_eq!(
            parse_endpoint("unix:///@kms-provider.sock").unwrap(),
            SocketAddress::Abstract("kms-provider.sock".to_string())
        );
    }

    #[test]
    fn test_parse_path_endpoint() {
        assert_eq!(
            parse_endpoint("unix:///var/run/kms/plugin.sock").unwrap(),
            SocketAddress::Path(PathBuf::from("/var/run/kms/plugin.sock"))
        );
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(parse_endpoint("tcp://127.0.0.1:9000").is_err());
        assert!(parse_endpoint("https://kms.example.com").is_err());
        assert!(parse_endpoint("not a url").is_err());
        assert!(parse_endpoint("unix://").is_err());
        assert!(parse_endpoint("unix:///@").is_err());
    }

    #[test]
    fn test_encrypt_request_wire_format() {
        let request = EncryptRequest { version: "v1beta1".to_string(), plain: vec![1, 2, 3] };
        let bytes = request.encode_to_vec();
        // field 1 (string) then field 2 (bytes)
        assert_eq!(bytes[0], 0x0a);
        assert_eq!(&bytes[2..9], b"v1beta1");
        assert_eq!(bytes[9], 0x12);
        assert_eq!(DecryptRequest::decode(
            DecryptRequest { version: "v1beta1".into(), cipher: vec![9] }.encode_to_vec().as_slice()
        ).unwrap().cipher, vec![9]);
    }

    #[tokio::test]
    async fn test_unreachable_plugin_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = format!("unix://{}", dir.path().join("missing.sock").display());
        let service = GrpcKmsService::connect_lazy(&endpoint).unwrap();
        assert!(service.encrypt(b"dek").await.is_err());
        assert!(service.version().await.is_err());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let served = |version: &str| VersionResponse {
            version: version.to_string(),
            runtime_name: "mock".to_string(),
            runtime_version: "0.1".to_string(),
        };
        assert_eq!(check_version(served("v1beta1")).unwrap().runtime_name, "mock");
        let err = check_version(served("v2")).unwrap_err();
        assert!(err.to_string().contains("expected v1beta1"), "{}", err);
    }
}
