//! Application layer - Use cases and business logic
//! 
//! This layer contains:
//! - Modules: catalog, lifecycle and install engine of bot modules
//! - Services: command-level orchestration
//! - Errors: Domain-specific errors
//! - Messaging: Message parsing and dispatching

pub mod errors;
pub mod messaging;
pub mod modules;
pub mod services;
