//! # Hookclock Core
//!
//! Shared configuration, error type and cron trigger definitions.
//! The scheduler engine only ever reads triggers through [`TriggerSource`];
//! whoever owns the definitions swaps in a fresh [`TriggerSnapshot`].

pub mod config;
pub mod error;
pub mod trigger;

pub use config::HookclockConfig;
pub use error::{CoreError, Result};
pub use trigger::{
    CronTrigger, HeaderConf, RetryConf, SharedTriggers, TriggerFile, TriggerSnapshot,
    TriggerSource, WebhookRef,
};
