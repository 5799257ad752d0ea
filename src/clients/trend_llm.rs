mod client;
mod models;
mod prompt;

pub use client::TrendLlmClient;
