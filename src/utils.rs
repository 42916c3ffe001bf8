pub mod config;
pub mod errors;
pub mod greeter_utils;
pub mod shutdown;
