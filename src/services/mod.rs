pub mod auth;
pub mod messaging_service;
pub mod moderation;
pub mod notifier;
pub mod quota;
pub mod rate_limit_service;
