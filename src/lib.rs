//! Client for the HPInet host-pathogen interaction backend.
//!
//! Layers, bottom-up: [`http`] performs JSON requests with retries, timeouts
//! and cancellation; [`cache`] shares fresh results and in-flight requests by
//! key; [`query`] binds one consumer to a keyed fetch; [`api`] maps the
//! backend's endpoints onto all of the above.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod output;
pub mod query;
