pub mod context;
pub mod domain;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod security;
pub mod signals;
pub mod stream;
pub mod tools;
