//! LLM integration for corpus-forge.
//!
//! Document generation goes through the [`LlmProvider`] trait so the
//! pipeline can run against a real OpenAI-compatible endpoint or a scripted
//! provider in tests.
//!
//! ```ignore
//! use corpus_forge::llm::{
//!     GenerationRequest, LiteLlmClient, LlmProvider, Message, DEFAULT_API_BASE, DEFAULT_MODEL,
//! };
//!
//! let client = LiteLlmClient::new(DEFAULT_API_BASE, Some(api_key), DEFAULT_MODEL)?;
//! let request = GenerationRequest::new("", vec![Message::user("Describe the spa")]);
//! let response = client.generate(request).await?;
//! println!("{}", response.first_content().unwrap_or_default());
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_API_BASE, DEFAULT_MODEL,
};
