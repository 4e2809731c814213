//! # Wayfarer Core
//!
//! Domain types, traits, and error definitions for the Wayfarer agent
//! orchestration runtime. It defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every external capability (model calls, tools, session storage) is a trait
//! here. Implementations live in their respective crates, so:
//! - workflows can be tested offline with scripted providers
//! - session backends swap between in-memory and durable storage
//! - all crates depend inward on core

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod schema;
pub mod session;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, Event, EventActions, EventBus, EventKind};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use schema::OutputSchema;
pub use session::{Session, SessionService, SessionSummary};
pub use state::{State, StateDelta};
pub use tool::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
