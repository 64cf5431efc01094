pub mod agent;
pub mod auth;
pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod tools;
