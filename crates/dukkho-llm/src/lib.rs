// Upstream model access: the Gemini streaming client, the persona it is
// configured with, and the `ChatModel` seam the relay depends on.

pub mod client;
pub mod persona;

pub use client::{ChatModel, GeminiClient, LlmClient, LlmError, ModelInfo, TextStream};
