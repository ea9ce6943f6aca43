//! Request signing for providers that authenticate with derived-key HMACs.

pub mod volc;

pub use volc::{
    SignTimestamp, SignedEnvelope, VolcCredentials, VolcSigner, canonical_query, encode_rfc3986,
};
