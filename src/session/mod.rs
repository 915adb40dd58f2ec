//! Chat session management
//!
//! This module provides the `ChatSession` abstraction that manages:
//! - Push-to-talk capture streamed to the service
//! - Typed messages
//! - Ordering of user and assistant output into turns
//! - Playback of assistant audio
//! - Session statistics

mod config;
mod coordinator;
mod renderer;
mod session;
mod stats;

pub use config::SessionConfig;
pub use coordinator::{FragmentQueue, PendingAssistant, TurnCoordinator};
pub use renderer::{Bubble, BubbleRef, ConsoleRenderer, MemoryRenderer, Renderer, Speaker, Transcript};
pub use session::{ChatSession, SessionCommand};
pub use stats::SessionStats;
