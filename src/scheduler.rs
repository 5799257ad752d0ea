pub mod janitor;

pub use janitor::spawn_janitor;
