//! Router configuration. Hosts deserialize it from their own config file (see toxhook-host).

use serde::Deserialize;

/// Queue sizes and session retention.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Events the trampoline may queue before callbacks fail with QueueFull (default 1024).
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Transfer commands queued from other threads (default 256).
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    /// Drains a finished transfer stays in the table after the application saw it (default 2).
    #[serde(default = "default_terminal_retention_drains")]
    pub terminal_retention_drains: u32,
    /// Cancel a friend's transfers when the friend goes offline (default true).
    #[serde(default = "default_cancel_on_friend_offline")]
    pub cancel_on_friend_offline: bool,
}

fn default_event_queue_capacity() -> usize {
    1024
}
fn default_command_queue_capacity() -> usize {
    256
}
fn default_terminal_retention_drains() -> u32 {
    2
}
fn default_cancel_on_friend_offline() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            command_queue_capacity: default_command_queue_capacity(),
            terminal_retention_drains: default_terminal_retention_drains(),
            cancel_on_friend_offline: default_cancel_on_friend_offline(),
        }
    }
}
