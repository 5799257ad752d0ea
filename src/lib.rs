#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod diversity;
pub mod observability;
pub mod scheduler;
pub(crate) mod schema;
pub mod selection;
pub mod topic;
pub mod util;
