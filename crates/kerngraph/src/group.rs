//! The frozen, executable graph.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::spec::{GraphHandle, ScriptBackend};
use crate::closure::{Arg, ClosureRecord, Future};
use crate::error::{ExecuteError, SlotKind};
use crate::unbound::InputRecord;
use crate::value::Value;

/// A finished graph: fixed topology, fixed input list, fixed output futures.
/// Only input bindings and the resulting output values vary per execution.
///
/// `execute` is synchronous end-to-end and takes `&mut self`; overlapping
/// executions of one group are expressed as impossible rather than detected.
pub struct ScriptGroup<B: ScriptBackend> {
    backend: Arc<B>,
    handle: GraphHandle,
    name: String,
    closures: Vec<ClosureRecord>,
    inputs: Vec<InputRecord>,
    outputs: Vec<Future>,
    executed: bool,
}

impl<B: ScriptBackend> std::fmt::Debug for ScriptGroup<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptGroup")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("closures", &self.closures)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

impl<B: ScriptBackend> ScriptGroup<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        handle: GraphHandle,
        name: String,
        closures: Vec<ClosureRecord>,
        inputs: Vec<InputRecord>,
        outputs: Vec<Future>,
    ) -> Self {
        ScriptGroup {
            backend,
            handle,
            name,
            closures,
            inputs,
            outputs,
            executed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> GraphHandle {
        self.handle
    }

    /// Number of free inputs declared at build time.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Declared output futures, in declaration order.
    pub fn outputs(&self) -> &[Future] {
        &self.outputs
    }

    /// Binds the supplied inputs, runs the graph once, and returns the value
    /// of each declared output future in declaration order.
    ///
    /// Too few inputs fail before anything is bound; extra inputs are
    /// tolerated with a logged notice and ignored. Each input must be a
    /// concrete value — a future or unbound value in an input position fails
    /// that call (inputs before it are already bound; the graph remains
    /// reusable either way). Outputs without a value (e.g. the default
    /// return of an invoke closure) come back as `None`.
    pub fn execute(&mut self, inputs: &[Arg]) -> Result<Vec<Option<Value>>, ExecuteError> {
        if inputs.len() < self.inputs.len() {
            return Err(ExecuteError::NotEnoughInputs {
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }
        if inputs.len() > self.inputs.len() {
            info!(
                graph = %self.name,
                expected = self.inputs.len(),
                actual = inputs.len(),
                "graph received more inputs than declared; ignoring the excess"
            );
        }

        for (index, record) in self.inputs.iter().enumerate() {
            let value = match inputs[index] {
                Arg::Value(value) => value,
                Arg::Unbound(_) => {
                    return Err(ExecuteError::NonConcreteInput {
                        index,
                        kind: SlotKind::Unbound,
                    })
                }
                Arg::Future(_) => {
                    return Err(ExecuteError::NonConcreteInput {
                        index,
                        kind: SlotKind::Future,
                    })
                }
            };
            record.bind(self.backend.as_ref(), &mut self.closures, value)?;
        }

        debug!(graph = %self.name, "executing graph");
        self.backend.execute_graph(self.handle)?;
        self.executed = true;

        Ok(self
            .outputs
            .iter()
            .map(|future| self.future_value(*future))
            .collect())
    }

    /// Reads a future's value: `None` before the first execution, the most
    /// recent run's result afterwards.
    pub fn output(&self, future: Future) -> Option<Value> {
        self.future_value(future)
    }

    fn future_value(&self, future: Future) -> Option<Value> {
        if !self.executed {
            return None;
        }
        self.closures
            .get(future.closure().0)
            .and_then(|closure| closure.construction_value(future.field()))
    }
}
