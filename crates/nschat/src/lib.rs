pub mod completion;
pub mod confirm;
pub mod dispatch;
pub mod errors;
pub mod kernel;
pub mod models;
pub mod orchestrator;
pub mod persist;
pub mod prompt_template;
pub mod providers;
pub mod status;
pub mod store;
pub mod tools;
