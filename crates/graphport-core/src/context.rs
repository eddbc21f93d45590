use std::collections::HashMap;

use tracing::debug;

use crate::{Error, Graph, Result, Tensor};

/// Named tensors, as passed into and returned from an execution.
pub type TensorMap = HashMap<String, Tensor>;

/// Outcome of binding a caller-supplied tensor into a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Bound,
    /// The graph declares no tensor of that name; the value was dropped.
    Ignored,
}

/// Every buffer live during one execution call.
///
/// Created with an entry for every tensor the graph declares. Entries are
/// overwritten as nodes run and are never removed.
#[derive(Clone, Debug, Default)]
pub struct ExecContext {
    tensors: TensorMap,
}

impl ExecContext {
    /// Zero buffers for every declaration, initializer values for constants.
    ///
    /// Fails with `IncompleteSpecification` for a declaration without a
    /// concrete shape that no initializer covers, and with `InvalidModel` for
    /// one whose size overflows.
    pub fn for_graph(graph: &Graph) -> Result<Self> {
        let mut tensors = TensorMap::new();
        for vi in graph.declarations() {
            if graph.initializers.contains_key(&vi.name) {
                continue;
            }
            let shape = vi.shape().ok_or_else(|| Error::IncompleteSpecification {
                tensor: vi.name.clone(),
            })?;
            let zeros = Tensor::try_zeros(vi.dtype, shape).map_err(|_| {
                Error::InvalidModel(format!("declared tensor `{}` is too large", vi.name))
            })?;
            tensors.insert(vi.name.clone(), zeros);
        }
        for (name, value) in &graph.initializers {
            tensors.insert(name.clone(), value.clone());
        }
        Ok(Self { tensors })
    }

    /// Overwrites `name` with `value` if the shapes agree.
    ///
    /// Names the graph does not declare are ignored and reported as
    /// [`Binding::Ignored`]; callers that want strict binding check the result.
    pub fn bind(&mut self, name: &str, value: Tensor) -> Result<Binding> {
        match self.tensors.get_mut(name) {
            None => {
                debug!(tensor = name, "ignoring binding for undeclared tensor");
                Ok(Binding::Ignored)
            }
            Some(slot) => {
                check_shape(name, slot, &value)?;
                *slot = value;
                Ok(Binding::Bound)
            }
        }
    }

    pub fn bind_all<I>(&mut self, inputs: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        for (name, value) in inputs {
            self.bind(&name, value)?;
        }
        Ok(())
    }

    /// Strict write used for computed outputs: the name must already exist.
    pub fn store(&mut self, name: &str, value: Tensor) -> Result<()> {
        let slot = self
            .tensors
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTensor {
                tensor: name.to_string(),
            })?;
        check_shape(name, slot, &value)?;
        *slot = value;
        Ok(())
    }

    /// Writes `value` under `name`, adding the entry if it is new.
    ///
    /// Existing entries keep their shape contract.
    pub fn merge(&mut self, name: &str, value: Tensor) -> Result<()> {
        match self.tensors.get_mut(name) {
            Some(slot) => {
                check_shape(name, slot, &value)?;
                *slot = value;
            }
            None => {
                self.tensors.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.tensors.get(name).ok_or_else(|| Error::UnknownTensor {
            tensor: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.tensors.iter()
    }

    /// Copies out the named entries.
    pub fn project<'a, I>(&self, names: I) -> Result<TensorMap>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .map(|name| Ok((name.to_string(), self.get(name)?.clone())))
            .collect()
    }

    pub fn into_map(self) -> TensorMap {
        self.tensors
    }
}

fn check_shape(name: &str, slot: &Tensor, value: &Tensor) -> Result<()> {
    if slot.shape() != value.shape() {
        return Err(Error::ShapeMismatch {
            tensor: name.to_string(),
            found: value.shape().clone(),
            expected: slot.shape().clone(),
        });
    }
    Ok(())
}
