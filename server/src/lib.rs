//! Ticket sales core: quota reservation, payment finalization and order expiry.
//!
//! The request path reserves quota inside a single database transaction and
//! hands every payment outcome to the [`jobs::JobQueue`]. The
//! [`scheduler::ExpirationScheduler`] runs beside it and releases the quota of
//! orders whose payment deadline passed.

pub mod bus;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod jobs;
pub mod lock;
pub mod models;
pub mod repository;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod utils;
