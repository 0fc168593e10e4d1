//! KMS plugin clients
//!
//! The engine consumes a KMS plugin through [`KmsService`]: wrap a DEK with
//! `encrypt`, unwrap it with `decrypt`. Real plugins are reached over gRPC on
//! a unix socket ([`GrpcKmsService`]); [`Base64Kms`] is an in-process stand-in
//! used for local development and tests.

pub mod grpc;
pub mod mock;
pub mod service;

pub use grpc::{GrpcConnector, GrpcKmsService};
pub use mock::{Base64Kms, MockConnector};
pub use service::{KmsConnector, KmsService, KMS_API_VERSION};
