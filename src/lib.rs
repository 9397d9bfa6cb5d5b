//! modhub - module lifecycle and package manager for a chat bot host

pub mod application;
pub mod domain;
pub mod infrastructure;
