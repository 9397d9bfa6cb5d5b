//! Application services - Business logic orchestration

pub mod module_service;

pub use module_service::ModuleService;
