// Crate root library declaration and module exports.
pub mod cli;
pub mod config;
pub mod context;
pub mod history;
pub mod import;
pub mod model;
pub mod storage;
pub mod store;
pub mod tabular;
