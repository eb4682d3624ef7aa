pub mod converter;
pub mod mock;
pub mod provider;
pub mod reliable;
pub mod sse;

pub use mock::{MockProvider, MockResponse};
pub use provider::{AnthropicProvider, UnconfiguredProvider};
pub use reliable::{ReliableConfig, ReliableProvider};
