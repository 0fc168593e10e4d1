//! # Envelope Transform Engine
//!
//! Bottom-up: [`codec`] frames records, [`cipher`] seals payloads, [`cache`]
//! holds unwrapped DEKs, [`envelope`] combines them for one KMS provider and
//! [`chain`] orders providers for one resource.

pub mod cache;
pub mod chain;
pub mod cipher;
pub mod codec;
pub mod envelope;

pub use cache::{DekCache, PlainDek};
pub use chain::{ChainEntry, TransformerChain, IDENTITY_PROVIDER};
pub use cipher::PayloadCipher;
pub use codec::Envelope;
pub use envelope::EnvelopeTransformer;
