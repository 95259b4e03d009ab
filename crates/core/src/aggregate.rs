//! Aggregate root traits for versioned, fold-based domain models.

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing revision of the aggregate's persisted state.
    fn version(&self) -> u64;
}

/// Decide/evolve semantics for aggregates that are a running fold over facts.
///
/// - **Decision logic**: `handle(&self, cmd)` validates a command against the
///   current state and returns the facts it produces.
/// - **State mutation**: `apply(&mut self, fact)` folds one fact into state.
///
/// Implementations must not perform IO.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Fold a single fact into in-memory state.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which facts to record given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

