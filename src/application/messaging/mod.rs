//! Message handling - parsing and permission-gated dispatch of commands

pub mod dispatcher;
pub mod parser;

pub use dispatcher::MessageDispatcher;
pub use parser::{MessageParser, ModuleCommand};
