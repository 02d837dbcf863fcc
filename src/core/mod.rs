pub mod error;
pub mod events;
pub mod hub;
pub mod logging;
pub mod settings;
