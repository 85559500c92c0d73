use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream of raw byte chunks, used for proxy response
/// forwarding. The proxy never decodes provider streaming formats — it
/// forwards bytes through while skimming them for analytics.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token usage parsed out of a provider's streamed response, when one is
/// found in the accumulated analytics window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
