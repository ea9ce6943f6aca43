//! HTTP relay surface (feature-gated).

mod http;
pub mod logging;

pub use http::{PortraitHttpState, router};
