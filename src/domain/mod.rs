//! Domain layer - Core business objects and the seams to the outside world
//! 
//! This layer contains:
//! - Entities: Module descriptors, users, messages, manager verbs
//! - Traits: Abstractions for the plugin runtime, hub, switches and transport

pub mod entities;
pub mod traits;
