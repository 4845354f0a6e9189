pub mod base;
pub mod capability;
mod errors;
pub mod lm_studio;
pub mod ollama;
pub mod sse;

pub use base::ProviderAdapter;
pub use capability::CapabilityRegistry;
