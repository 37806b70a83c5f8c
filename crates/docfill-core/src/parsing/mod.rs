pub mod placeholder;
pub(crate) mod xml;

pub use placeholder::{has_placeholder, substitute, MIN_PLACEHOLDER_RUN};
