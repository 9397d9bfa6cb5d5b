//! Domain entities - Core business objects with no external dependencies

pub mod user;
pub mod message;
pub mod command;
pub mod module;

pub use user::{User, UserPerm};
pub use message::{Message, Content};
pub use command::ModuleVerb;
pub use module::{Category, ModuleDescriptor, SearchCriteria};
