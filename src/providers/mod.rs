//! One adapter per image provider, each normalizing its response into a
//! [`ProviderResult`](crate::types::ProviderResult).

pub mod ark;
pub mod degraded;
pub mod extract;
pub mod jimeng;
pub mod nano_banana;
pub mod relay;

pub use ark::ArkImages;
pub use degraded::DegradedFallback;
pub use extract::{extract_image, extract_inline_image};
pub use jimeng::{AsyncTask, JimengTasks, PollOutcome, PollPolicy, TaskImages, TaskStatus};
pub use nano_banana::NanoBanana;
pub use relay::RelayImages;
