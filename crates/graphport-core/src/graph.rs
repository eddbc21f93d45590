use std::collections::{BTreeMap, HashSet};

use crate::{DType, Error, Result, Shape, Tensor};

/// Op type of a node that stands in for an entire nested graph.
pub const PARTITION_OP_TYPE: &str = "DataflowPartition";
/// Attribute on a partition node naming the nested graph to load.
pub const PARTITION_MODEL_ATTR: &str = "model";
/// Domain whose nodes are resolved through the custom-op registry.
pub const CUSTOM_DOMAIN: &str = "graphport";
/// Metadata property selecting the execution mode.
pub const EXEC_MODE_KEY: &str = "exec_mode";

/// Declared name, element type and shape of one tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueInfo {
    pub name: String,
    pub dtype: DType,
    /// `None` when the rank is unknown; `Some(None)` entries are symbolic dims.
    pub dims: Option<Vec<Option<usize>>>,
}

impl ValueInfo {
    pub fn new(name: impl Into<String>, dtype: DType, dims: &[usize]) -> Self {
        Self {
            name: name.into(),
            dtype,
            dims: Some(dims.iter().copied().map(Some).collect()),
        }
    }

    /// The concrete shape, if every dimension is known.
    pub fn shape(&self) -> Option<Shape> {
        let dims = self.dims.as_ref()?;
        dims.iter()
            .copied()
            .collect::<Option<Vec<_>>>()
            .map(|d| Shape::from_slice(&d))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(Tensor),
    Graph(Box<Graph>),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Node {
    pub fn new<I, O>(op_type: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            op_type: op_type.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Name used in logs and errors: the node name, or its op type when unnamed.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.op_type
        } else {
            &self.name
        }
    }

    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn attr_int(&self, key: &str) -> Result<i64> {
        match self.attr(key) {
            Some(Attribute::Int(v)) => Ok(*v),
            Some(other) => Err(Error::invalid_node(
                self.label(),
                format!("attribute `{key}` must be an int, found {other:?}"),
            )),
            None => Err(Error::invalid_node(
                self.label(),
                format!("missing attribute `{key}`"),
            )),
        }
    }

    pub fn attr_int_or(&self, key: &str, default: i64) -> Result<i64> {
        match self.attr(key) {
            None => Ok(default),
            Some(_) => self.attr_int(key),
        }
    }

    pub fn attr_float_or(&self, key: &str, default: f32) -> Result<f32> {
        match self.attr(key) {
            None => Ok(default),
            Some(Attribute::Float(v)) => Ok(*v),
            Some(Attribute::Int(v)) => Ok(*v as f32),
            Some(other) => Err(Error::invalid_node(
                self.label(),
                format!("attribute `{key}` must be a float, found {other:?}"),
            )),
        }
    }

    pub fn attr_str(&self, key: &str) -> Result<&str> {
        match self.attr(key) {
            Some(Attribute::String(v)) => Ok(v),
            Some(other) => Err(Error::invalid_node(
                self.label(),
                format!("attribute `{key}` must be a string, found {other:?}"),
            )),
            None => Err(Error::invalid_node(
                self.label(),
                format!("missing attribute `{key}`"),
            )),
        }
    }

    /// Non-empty input names; ONNX uses `""` for omitted optional inputs.
    pub fn present_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    pub fn present_outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .iter()
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpsetImport {
    pub domain: String,
    pub version: i64,
}

/// A static dataflow graph whose nodes are already topologically sorted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    pub value_info: Vec<ValueInfo>,
    pub initializers: BTreeMap<String, Tensor>,
    pub metadata: BTreeMap<String, String>,
    pub opset_imports: Vec<OpsetImport>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Looks a declaration up in inputs, then outputs, then value-info.
    pub fn declaration(&self, name: &str) -> Option<&ValueInfo> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .chain(&self.value_info)
            .find(|vi| vi.name == name)
    }

    /// Every declaration, each name once, in inputs/outputs/value-info order.
    pub fn declarations(&self) -> impl Iterator<Item = &ValueInfo> {
        let mut seen = HashSet::new();
        self.inputs
            .iter()
            .chain(&self.outputs)
            .chain(&self.value_info)
            .filter(move |vi| seen.insert(vi.name.as_str()))
    }

    pub fn metadata_prop(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata_prop(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn set_initializer(&mut self, name: impl Into<String>, value: Tensor) {
        self.initializers.insert(name.into(), value);
    }

    pub fn exec_mode(&self) -> Result<ExecMode> {
        ExecMode::parse(self.metadata_prop(EXEC_MODE_KEY))
    }

    /// Fails on the first tensor whose shape is not known ahead of execution.
    ///
    /// Covers every declaration plus every tensor a node touches; node tensors
    /// must be declared or provided as initializers.
    pub fn check_all_shapes_specified(&self) -> Result<()> {
        for vi in self.declarations() {
            if vi.shape().is_none() && !self.initializers.contains_key(&vi.name) {
                return Err(Error::IncompleteSpecification {
                    tensor: vi.name.clone(),
                });
            }
        }
        for node in &self.nodes {
            for name in node.present_inputs().chain(node.present_outputs()) {
                if self.declaration(name).is_none() && !self.initializers.contains_key(name) {
                    return Err(Error::IncompleteSpecification {
                        tensor: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// How a graph is executed as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    NodeByNode,
    Remote,
    Simulation,
}

impl ExecMode {
    pub const REMOTE: &'static str = "remote";
    pub const SIMULATION: &'static str = "rtlsim";

    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None | Some("") => Ok(ExecMode::NodeByNode),
            Some(Self::REMOTE) => Ok(ExecMode::Remote),
            Some(Self::SIMULATION) => Ok(ExecMode::Simulation),
            Some(other) => Err(Error::UnknownExecutionMode {
                mode: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecMode::NodeByNode => "",
            ExecMode::Remote => Self::REMOTE,
            ExecMode::Simulation => Self::SIMULATION,
        }
    }
}
