//! Inbound router: turns inbound mail and webhook events into service
//! desk requests, comments and participants.

pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod logging;
pub mod mailer;
pub mod message;
pub mod routing;
pub mod scanner;
pub mod service;
pub mod store;
pub mod ticketing;
pub mod topology;
