use std::collections::BTreeSet;

use super::{BoxFuture, Chain, ChainError, ChainValues};
use crate::context::RunContext;

/// Steps with one input and one output each; the output of step *i* is the
/// input of step *i + 1*.
pub struct SimpleSequentialChain {
    name: String,
    steps: Vec<Box<dyn Chain>>,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
}

impl std::fmt::Debug for SimpleSequentialChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleSequentialChain")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl SimpleSequentialChain {
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidConfiguration`] if there are no steps or a
    /// step does not have exactly one input and one output key.
    pub fn new(steps: Vec<Box<dyn Chain>>) -> Result<Self, ChainError> {
        if steps.is_empty() {
            return Err(ChainError::InvalidConfiguration(
                "sequential chain needs at least one step".into(),
            ));
        }
        for (i, step) in steps.iter().enumerate() {
            if step.input_keys().len() != 1 || step.output_keys().len() != 1 {
                return Err(ChainError::InvalidConfiguration(format!(
                    "step {i} ({:?}) must have exactly one input and one output key, has {} and {}",
                    step.name(),
                    step.input_keys().len(),
                    step.output_keys().len()
                )));
            }
        }
        Ok(Self {
            name: "simple_sequential_chain".into(),
            input_keys: vec!["input".into()],
            output_keys: vec!["output".into()],
            steps,
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Chain for SimpleSequentialChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    fn execute<'a>(
        &'a self,
        mut inputs: ChainValues,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<ChainValues, ChainError>> {
        Box::pin(async move {
            let mut value = inputs.remove(&self.input_keys[0]).unwrap_or_default();
            for (index, step) in self.steps.iter().enumerate() {
                let in_key = step.input_keys()[0].clone();
                let out_key = &step.output_keys()[0];
                let mut outputs = step
                    .call(ChainValues::from([(in_key, value)]), ctx)
                    .await
                    .map_err(|e| e.at_step(index, step.name()))?;
                value = outputs.remove(out_key).unwrap_or_default();
                tracing::debug!(chain = %self.name, step = index, name = step.name(), "step done");
            }
            Ok(ChainValues::from([(self.output_keys[0].clone(), value)]))
        })
    }
}

/// Steps that read and write named keys of a shared mapping.
///
/// Every step input must be satisfied by `input_variables` or an earlier
/// step's output; this is checked when the chain is built. The result holds
/// only `output_variables`.
pub struct SequentialChain {
    name: String,
    steps: Vec<Box<dyn Chain>>,
    input_variables: Vec<String>,
    output_variables: Vec<String>,
}

impl std::fmt::Debug for SequentialChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialChain")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("input_variables", &self.input_variables)
            .field("output_variables", &self.output_variables)
            .finish()
    }
}

impl SequentialChain {
    /// # Errors
    ///
    /// Returns [`ChainError::UnresolvedInput`] for the first step input nothing
    /// provides, and [`ChainError::InvalidConfiguration`] when a key is produced
    /// twice or an output variable is never produced.
    pub fn new(
        steps: Vec<Box<dyn Chain>>,
        input_variables: Vec<String>,
        output_variables: Vec<String>,
    ) -> Result<Self, ChainError> {
        if steps.is_empty() {
            return Err(ChainError::InvalidConfiguration(
                "sequential chain needs at least one step".into(),
            ));
        }
        let mut known: BTreeSet<&str> = input_variables.iter().map(String::as_str).collect();
        for (step, chain) in steps.iter().enumerate() {
            if let Some(key) = chain.input_keys().iter().find(|k| !known.contains(k.as_str())) {
                return Err(ChainError::UnresolvedInput {
                    step,
                    chain: chain.name().to_owned(),
                    key: key.clone(),
                });
            }
            for key in chain.output_keys() {
                if !known.insert(key.as_str()) {
                    return Err(ChainError::InvalidConfiguration(format!(
                        "step {step} ({:?}) writes {key:?}, which is already defined",
                        chain.name()
                    )));
                }
            }
        }
        if let Some(key) = output_variables
            .iter()
            .find(|k| !known.contains(k.as_str()))
        {
            return Err(ChainError::InvalidConfiguration(format!(
                "output variable {key:?} is not produced by any step"
            )));
        }
        Ok(Self {
            name: "sequential_chain".into(),
            steps,
            input_variables,
            output_variables,
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Chain for SequentialChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> &[String] {
        &self.input_variables
    }

    fn output_keys(&self) -> &[String] {
        &self.output_variables
    }

    fn execute<'a>(
        &'a self,
        inputs: ChainValues,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<ChainValues, ChainError>> {
        Box::pin(async move {
            let mut known = inputs;
            for (index, step) in self.steps.iter().enumerate() {
                if ctx.is_cancelled() {
                    return Err(ChainError::cancelled(&self.name, "run cancelled"));
                }
                let step_inputs: ChainValues = step
                    .input_keys()
                    .iter()
                    .filter_map(|k| known.get(k).map(|v| (k.clone(), v.clone())))
                    .collect();
                let outputs = step
                    .call(step_inputs, ctx)
                    .await
                    .map_err(|e| e.at_step(index, step.name()))?;
                tracing::debug!(
                    chain = %self.name,
                    step = index,
                    name = step.name(),
                    produced = ?outputs.keys().collect::<Vec<_>>(),
                    "step done"
                );
                known.extend(outputs);
            }
            Ok(self
                .output_variables
                .iter()
                .filter_map(|k| known.remove(k).map(|v| (k.clone(), v)))
                .collect())
        })
    }
}
