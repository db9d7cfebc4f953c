//! Stateright model of the connection lifecycle
//!
//! Explores every interleaving of handle requests, connect outcomes, socket
//! loss, background reconnects and explicit disconnects, and checks:
//! - a reported `Ready` state always has a ready link behind it
//! - `Connecting`, `Errored` and `Disconnected` never hold a link
//! - reconnect attempts stop at the strategy's cap and close the link
//! - generations only grow, once per successful initialization

use super::{ConnectionState, LinkStatus};
use crate::config::ReconnectStrategy;
use stateright::{Model, Property};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LifecycleState {
    pub manager: ConnectionState,
    pub link: Option<LinkStatus>,
    pub generation: u64,
    /// Reconnect attempts made since the link was last ready
    pub attempts: u32,
}

impl LifecycleState {
    pub fn new() -> Self {
        LifecycleState {
            manager: ConnectionState::Uninitialized,
            link: None,
            generation: 0,
            attempts: 0,
        }
    }

    /// Mirrors `ConnectionManager::state`
    pub fn observed(&self) -> ConnectionState {
        match (self.manager, self.link) {
            (ConnectionState::Ready, Some(LinkStatus::Ready)) => ConnectionState::Ready,
            (ConnectionState::Ready, _) => ConnectionState::Disconnected,
            (state, _) => state,
        }
    }

    fn has_live_link(&self) -> bool {
        matches!(self.link, Some(LinkStatus::Ready | LinkStatus::Reconnecting))
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    /// `handle()` with no live link: start a fresh initialization
    RequestHandle,
    ConnectSucceeded,
    ConnectFailed,
    SocketLost,
    ReconnectSucceeded,
    ReconnectFailed,
    Disconnect,
}

pub struct LifecycleModel {
    pub strategy: ReconnectStrategy,
    pub max_retries: u32,
    /// Bound on initializations explored
    pub max_generations: u64,
}

impl LifecycleModel {
    pub fn new() -> Self {
        LifecycleModel {
            strategy: ReconnectStrategy::LinearBackoff,
            max_retries: 2,
            max_generations: 3,
        }
    }

    pub fn with_strategy(strategy: ReconnectStrategy, max_retries: u32) -> Self {
        LifecycleModel {
            strategy,
            max_retries,
            max_generations: 3,
        }
    }
}

impl Default for LifecycleModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for LifecycleModel {
    type State = LifecycleState;
    type Action = LifecycleAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![LifecycleState::new()]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        if state.manager == ConnectionState::Connecting {
            // Lifecycle lock is held; only the connect outcome can happen
            if state.generation < self.max_generations {
                actions.push(LifecycleAction::ConnectSucceeded);
            }
            actions.push(LifecycleAction::ConnectFailed);
            return;
        }

        if !state.has_live_link() && state.generation < self.max_generations {
            actions.push(LifecycleAction::RequestHandle);
        }
        match state.link {
            Some(LinkStatus::Ready) => actions.push(LifecycleAction::SocketLost),
            Some(LinkStatus::Reconnecting) => {
                actions.push(LifecycleAction::ReconnectSucceeded);
                actions.push(LifecycleAction::ReconnectFailed);
            }
            Some(LinkStatus::Closed) | None => {}
        }
        actions.push(LifecycleAction::Disconnect);
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            LifecycleAction::RequestHandle => {
                next.link = None;
                next.attempts = 0;
                next.manager = ConnectionState::Connecting;
            }
            LifecycleAction::ConnectSucceeded => {
                next.generation += 1;
                next.link = Some(LinkStatus::Ready);
                next.manager = ConnectionState::Ready;
            }
            LifecycleAction::ConnectFailed => {
                next.manager = ConnectionState::Errored;
            }
            LifecycleAction::SocketLost => {
                next.attempts = 0;
                next.link = Some(if self.strategy.is_disabled() {
                    LinkStatus::Closed
                } else {
                    LinkStatus::Reconnecting
                });
                // The first delay may already be refused
                if self.strategy.next_delay(1, self.max_retries).is_none() {
                    next.link = Some(LinkStatus::Closed);
                }
            }
            LifecycleAction::ReconnectSucceeded => {
                next.link = Some(LinkStatus::Ready);
                next.attempts = 0;
            }
            LifecycleAction::ReconnectFailed => {
                next.attempts += 1;
                if self
                    .strategy
                    .next_delay(next.attempts + 1, self.max_retries)
                    .is_none()
                {
                    next.link = Some(LinkStatus::Closed);
                }
            }
            LifecycleAction::Disconnect => {
                if next.manager == ConnectionState::Uninitialized {
                    return None;
                }
                next.link = None;
                next.attempts = 0;
                next.manager = ConnectionState::Disconnected;
            }
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always(
                "ready_means_ready_link",
                |_: &LifecycleModel, state: &LifecycleState| {
                    state.observed() != ConnectionState::Ready
                        || state.link == Some(LinkStatus::Ready)
                },
            ),
            Property::always(
                "no_link_outside_ready",
                |_: &LifecycleModel, state: &LifecycleState| {
                    state.manager == ConnectionState::Ready || state.link.is_none()
                },
            ),
            Property::always(
                "attempts_within_cap",
                |model: &LifecycleModel, state: &LifecycleState| {
                    state.attempts <= model.max_retries
                },
            ),
            Property::always(
                "generation_bounded",
                |model: &LifecycleModel, state: &LifecycleState| {
                    state.generation <= model.max_generations
                },
            ),
            Property::sometimes(
                "ready_again_after_reinit",
                |_: &LifecycleModel, state: &LifecycleState| {
                    state.generation >= 2 && state.observed() == ConnectionState::Ready
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn step(
        model: &LifecycleModel,
        state: &LifecycleState,
        action: LifecycleAction,
    ) -> LifecycleState {
        let mut actions = Vec::new();
        model.actions(state, &mut actions);
        assert!(actions.contains(&action), "{:?} not enabled in {:?}", action, state);
        model.next_state(state, action).unwrap()
    }

    #[test]
    fn test_lost_link_reports_disconnected() {
        let model = LifecycleModel::new();
        let mut state = LifecycleState::new();
        state = step(&model, &state, LifecycleAction::RequestHandle);
        state = step(&model, &state, LifecycleAction::ConnectSucceeded);
        assert_eq!(state.observed(), ConnectionState::Ready);

        state = step(&model, &state, LifecycleAction::SocketLost);
        assert_eq!(state.link, Some(LinkStatus::Reconnecting));
        assert_eq!(state.observed(), ConnectionState::Disconnected);

        state = step(&model, &state, LifecycleAction::ReconnectSucceeded);
        assert_eq!(state.observed(), ConnectionState::Ready);
        assert_eq!(state.generation, 1);
    }

    #[test]
    fn test_reconnect_abandoned_after_cap() {
        let model = LifecycleModel::new();
        let mut state = LifecycleState::new();
        state = step(&model, &state, LifecycleAction::RequestHandle);
        state = step(&model, &state, LifecycleAction::ConnectSucceeded);
        state = step(&model, &state, LifecycleAction::SocketLost);
        state = step(&model, &state, LifecycleAction::ReconnectFailed);
        assert_eq!(state.link, Some(LinkStatus::Reconnecting));
        state = step(&model, &state, LifecycleAction::ReconnectFailed);
        assert_eq!(state.link, Some(LinkStatus::Closed));

        // Only a new handle request brings it back, as a new generation
        state = step(&model, &state, LifecycleAction::RequestHandle);
        state = step(&model, &state, LifecycleAction::ConnectSucceeded);
        assert_eq!(state.generation, 2);
    }

    #[test]
    fn test_disabled_strategy_closes_immediately() {
        let model = LifecycleModel::with_strategy(ReconnectStrategy::Disabled, 10);
        let mut state = LifecycleState::new();
        state = step(&model, &state, LifecycleAction::RequestHandle);
        state = step(&model, &state, LifecycleAction::ConnectSucceeded);
        state = step(&model, &state, LifecycleAction::SocketLost);
        assert_eq!(state.link, Some(LinkStatus::Closed));
    }

    #[test]
    fn test_disconnect_before_connect_not_enabled_as_change() {
        let model = LifecycleModel::new();
        assert!(model
            .next_state(&LifecycleState::new(), LifecycleAction::Disconnect)
            .is_none());
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_lifecycle -- --ignored --nocapture
    fn stateright_lifecycle_model_check() {
        use stateright::Checker;

        for model in [
            LifecycleModel::new(),
            LifecycleModel::with_strategy(ReconnectStrategy::Disabled, 3),
            LifecycleModel::with_strategy(
                ReconnectStrategy::FixedDelay(Duration::from_millis(50)),
                3,
            ),
        ] {
            let checker = model.checker().spawn_bfs().join();
            println!("States explored: {}", checker.unique_state_count());
            checker.assert_properties();
        }

        println!("Model check passed! All lifecycle invariants hold.");
    }
}
