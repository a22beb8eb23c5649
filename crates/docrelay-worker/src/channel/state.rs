//! Channel lifecycle as a pure state machine.
//!
//! [`transition`] maps the current [`MonitorState`] and an input event to
//! the next state plus the side effects to perform, in order. It performs
//! no I/O; [`ChannelMonitor`](super::monitor::ChannelMonitor) interprets the
//! commands.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use docrelay_core::config::channel::ChannelConfig;
use docrelay_core::types::{AccountId, ChannelId};

/// Lifecycle status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Being opened.
    Starting,
    /// Receiving notifications.
    Active,
    /// A replacement is being opened; still receiving notifications.
    Renewing,
    /// Closed.
    Stopped,
}

/// An open push-notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Locally generated id, echoed in every notification.
    pub channel_id: ChannelId,
    /// Storage-assigned id of the watched resource.
    pub resource_id: String,
    /// Account the channel belongs to.
    pub owner: AccountId,
    /// When the storage service stops delivering notifications.
    pub expiration: DateTime<Utc>,
    /// Current status.
    pub status: ChannelStatus,
}

/// State of one account's monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    /// Not started yet.
    Idle,
    /// The first channel is being opened.
    Starting,
    /// One channel is open.
    Active(Channel),
    /// `current` is still open while its replacement is being opened.
    Renewing {
        /// The channel being replaced.
        current: Channel,
    },
    /// Terminal.
    Stopped,
}

impl MonitorState {
    /// The channel currently receiving notifications, if any.
    pub fn channel(&self) -> Option<&Channel> {
        match self {
            Self::Active(channel) | Self::Renewing { current: channel } => Some(channel),
            _ => None,
        }
    }

    /// Whether the monitor reached its terminal state.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Open the first channel.
    Start,
    /// The storage service confirmed a new channel.
    Opened(Channel),
    /// Opening a channel failed.
    OpenFailed,
    /// The renewal task fired.
    RenewalDue,
    /// Shut the monitor down.
    Stop,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the storage service for a new channel.
    OpenChannel,
    /// Make a channel visible for webhook correlation.
    RegisterChannel(Channel),
    /// Update a registered channel's status.
    MarkChannel(ChannelId, ChannelStatus),
    /// Remove a channel from webhook correlation.
    UnregisterChannel(ChannelId),
    /// Ask the storage service to close a channel.
    CloseChannel(Channel),
    /// Register the renewal task.
    ScheduleRenewal {
        /// When the renewal runs.
        at: DateTime<Utc>,
        /// How long the renewal may take.
        timeout: Duration,
    },
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The next state.
    pub state: MonitorState,
    /// Side effects, in execution order.
    pub commands: Vec<Command>,
}

impl Transition {
    fn to(state: MonitorState, commands: Vec<Command>) -> Self {
        Self { state, commands }
    }

    fn unchanged(state: &MonitorState) -> Self {
        Self::to(state.clone(), Vec::new())
    }
}

/// Renewal timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// How long before expiry a replacement is opened. Also the renewal
    /// task's timeout.
    pub renew_offset: Duration,
    /// Delay before retrying a failed renewal.
    pub retry_delay: Duration,
}

impl RenewalPolicy {
    /// Build the policy from configuration.
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            renew_offset: Duration::from_secs(config.renew_offset_seconds),
            retry_delay: Duration::from_secs(config.renewal_retry_seconds),
        }
    }

    fn schedule_for(&self, channel: &Channel) -> Command {
        Command::ScheduleRenewal {
            at: channel.expiration - delta(self.renew_offset),
            timeout: self.renew_offset,
        }
    }
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::from_config(&ChannelConfig::default())
    }
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Compute the next state and the commands to run.
///
/// Events that do not apply to the current state (a renewal firing after
/// stop, a second start) leave the state unchanged and produce no commands.
pub fn transition(
    state: &MonitorState,
    event: MonitorEvent,
    policy: &RenewalPolicy,
    now: DateTime<Utc>,
) -> Transition {
    use MonitorEvent as E;
    use MonitorState as S;

    match (state, event) {
        (S::Idle, E::Start) => Transition::to(S::Starting, vec![Command::OpenChannel]),

        (S::Starting, E::Opened(channel)) => {
            let channel = Channel {
                status: ChannelStatus::Active,
                ..channel
            };
            Transition::to(
                S::Active(channel.clone()),
                vec![
                    Command::RegisterChannel(channel.clone()),
                    policy.schedule_for(&channel),
                ],
            )
        }

        (S::Starting, E::OpenFailed) => Transition::to(S::Stopped, Vec::new()),

        (S::Active(current), E::RenewalDue) => {
            let current = Channel {
                status: ChannelStatus::Renewing,
                ..current.clone()
            };
            Transition::to(
                S::Renewing {
                    current: current.clone(),
                },
                vec![
                    Command::MarkChannel(current.channel_id, ChannelStatus::Renewing),
                    Command::OpenChannel,
                ],
            )
        }

        // The replacement is registered before the old channel is closed so
        // that notifications are matched throughout.
        (S::Renewing { current }, E::Opened(channel)) => {
            let channel = Channel {
                status: ChannelStatus::Active,
                ..channel
            };
            Transition::to(
                S::Active(channel.clone()),
                vec![
                    Command::RegisterChannel(channel.clone()),
                    policy.schedule_for(&channel),
                    Command::UnregisterChannel(current.channel_id),
                    Command::CloseChannel(current.clone()),
                ],
            )
        }

        (S::Renewing { current }, E::OpenFailed) => {
            let retry_at = now + delta(policy.retry_delay);
            if retry_at < current.expiration {
                let current = Channel {
                    status: ChannelStatus::Active,
                    ..current.clone()
                };
                Transition::to(
                    S::Active(current.clone()),
                    vec![
                        Command::MarkChannel(current.channel_id, ChannelStatus::Active),
                        Command::ScheduleRenewal {
                            at: retry_at,
                            timeout: policy.renew_offset,
                        },
                    ],
                )
            } else {
                Transition::to(
                    S::Stopped,
                    vec![
                        Command::UnregisterChannel(current.channel_id),
                        Command::CloseChannel(current.clone()),
                    ],
                )
            }
        }

        (S::Active(current) | S::Renewing { current }, E::Stop) => Transition::to(
            S::Stopped,
            vec![
                Command::UnregisterChannel(current.channel_id),
                Command::CloseChannel(current.clone()),
            ],
        ),

        (S::Idle | S::Starting, E::Stop) => Transition::to(S::Stopped, Vec::new()),

        // An open that completes after stop leaves an orphan behind.
        (S::Stopped, E::Opened(channel)) => {
            Transition::to(S::Stopped, vec![Command::CloseChannel(channel)])
        }

        (state, _) => Transition::unchanged(state),
    }
}
