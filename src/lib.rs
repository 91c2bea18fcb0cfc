pub mod app;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod locker;
pub mod permissions;
pub mod protocol;
pub mod queue;
pub mod recipe;
pub mod runtime;
pub mod shared;
