//! Legion: a multi-persona conversational router.
//!
//! One HTTP chat endpoint fronts several LLM personas. Each user message is
//! checked by two stateless router agents (persona hand-off and external
//! search), the resulting tool invocations are executed against the
//! session's conversation state, the active persona's history is augmented
//! with search results or corpus snippets, and the answer is streamed back
//! with cooperative cancellation.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod memory;
pub mod providers;

pub mod personas;
pub mod session;
pub mod status;

pub mod dispatch;
pub mod tools;

pub mod api;
