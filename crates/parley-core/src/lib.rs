//! # parley-core
//!
//! The connection/topic hub of the Parley relay.
//!
//! This crate provides the stateful building blocks:
//!
//! - **Topic** - Named room holding members and recent messages
//! - **TopicRegistry** - Concurrent map of topics with join/leave/list
//! - **MessageStore** / **ExpiryQueue** - Bounded retention with TTL expiry
//! - **Broadcast** - Fan-out to members with eviction of dead ones
//! - **Session** - Per-connection protocol state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │   Session   │────▶│     Hub     │────▶│ TopicRegistry │
//! └─────────────┘     └─────────────┘     └───────────────┘
//!        ▲                   │                    ▲
//!        │ MemberInbox       ▼                    │
//!        └────────────  ExpiryQueue  ─────────────┘
//! ```

pub mod broadcast;
pub mod error;
pub mod expiry;
pub mod hub;
pub mod member;
pub mod message;
pub mod registry;
pub mod session;
pub mod store;
pub mod topic;
pub mod username;

pub use broadcast::BroadcastReport;
pub use error::HubError;
pub use expiry::ExpiryQueue;
pub use hub::{Hub, HubConfig, HubStats, Joined, Published};
pub use member::{member_channel, DeliveryError, MemberHandle, MemberInbox, WeakMemberHandle};
pub use message::{Message, MessageId};
pub use registry::{RegistryConfig, RegistryError, RegistryStats, TopicRegistry};
pub use session::{Session, SessionState};
pub use store::MessageStore;
pub use topic::Topic;
pub use username::allocate_username;
