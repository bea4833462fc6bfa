//! Name-based construction of [`SchedulingPolicy`] instances.
use std::{collections::BTreeMap, time::Duration};

use thiserror::Error;

use super::{Fcfs, PriorityPolicy, RoundRobin, SchedulingPolicy, ShortestJobFirst};

type Factory = Box<dyn Fn() -> Box<dyn SchedulingPolicy> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid policy '{name}', must be one of: {valid}")]
    InvalidPolicy { name: String, valid: String },
}

/// Maps policy names to constructors.
///
/// The default registry knows `fcfs`, `sjf`, `priority` and `round_robin`. Further policies can
/// be added with [`PolicyRegistry::register`].
pub struct PolicyRegistry {
    factories: BTreeMap<&'static str, Factory>,
}

impl PolicyRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register<F>(mut self, name: &'static str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SchedulingPolicy> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
        self
    }

    /// Sets the time quantum used by newly created [`RoundRobin`] policies.
    pub fn with_time_quantum(self, time_quantum: Duration) -> Self {
        self.register(RoundRobin::NAME, move || {
            Box::new(RoundRobin::new(time_quantum))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// The registered policy names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Creates a fresh, empty instance of the named policy.
    pub fn create(&self, name: &str) -> Result<Box<dyn SchedulingPolicy>, PolicyError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| self.invalid(name))
    }

    /// Checks that `name` is registered without constructing it.
    pub fn validate(&self, name: &str) -> Result<(), PolicyError> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(self.invalid(name))
        }
    }

    fn invalid(&self, name: &str) -> PolicyError {
        PolicyError::InvalidPolicy {
            name: name.to_owned(),
            valid: self.names().collect::<Vec<_>>().join(", "),
        }
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::empty()
            .register(Fcfs::NAME, || Box::<Fcfs>::default())
            .register(ShortestJobFirst::NAME, || Box::<ShortestJobFirst>::default())
            .register(PriorityPolicy::NAME, || Box::<PriorityPolicy>::default())
            .register(RoundRobin::NAME, || Box::<RoundRobin>::default())
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
