pub mod event;
pub mod message;
pub mod thread;
pub mod tier;
