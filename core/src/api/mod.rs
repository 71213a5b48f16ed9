//! Typed wrappers over the triage backend endpoints.

pub mod auth;
pub mod chat;

pub use auth::{AuthApi, LoginResponse, SessionGate, UserProfile};
pub use chat::{ChatApi, ChatMessage, ChatMode, ChatSession, MessageRole};
