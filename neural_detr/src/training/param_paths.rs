//! Parameter paths of a module.
//!
//! Module visitors see parameter ids but not field names. The names come from
//! the module record instead: serialized, every parameter is an object
//! `{"id": ..., "param": ...}` nested under its field path, e.g.
//! `class_head.weight` or `layers.0.bias`.

use std::collections::HashMap;

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, Record};
use serde_json::Value;

use crate::error::{DetrError, Result};
use crate::host::float_values;

/// One parameter read from a module.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamValue {
    pub path: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// `(path, serialized id)` of every float parameter, in module order.
pub(crate) fn parameter_paths<B: Backend, M: Module<B>>(module: &M) -> Result<Vec<(String, String)>> {
    let item = module
        .clone()
        .into_record()
        .into_item::<FullPrecisionSettings>();
    let record = serde_json::to_value(item)?;

    let mut by_id = HashMap::new();
    collect_paths(&record, &mut Vec::new(), &mut by_id);

    let mut order = IdOrder { ids: Vec::new() };
    module.visit(&mut order);

    order
        .ids
        .into_iter()
        .map(|id| {
            let key = id.serialize();
            by_id
                .remove(&key)
                .map(|path| (path, key))
                .ok_or_else(|| DetrError::Checkpoint {
                    message: format!("parameter {:?} does not appear in the module record", id),
                })
        })
        .collect()
}

fn collect_paths(value: &Value, path: &mut Vec<String>, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(fields) => {
            if let (Some(Value::String(id)), true) = (fields.get("id"), fields.contains_key("param")) {
                out.insert(id.clone(), path.join("."));
                return;
            }
            for (name, field) in fields {
                path.push(name.clone());
                collect_paths(field, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(i.to_string());
                collect_paths(item, path, out);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Read every float parameter of `module` with its path.
pub(crate) fn read_parameters<B: Backend, M: Module<B>>(module: &M) -> Result<Vec<ParamValue>> {
    let paths: HashMap<String, String> = parameter_paths(module)?
        .into_iter()
        .map(|(path, id)| (id, path))
        .collect();

    let mut reader = ParamReader {
        paths: &paths,
        params: Vec::new(),
        error: None,
    };
    module.visit(&mut reader);

    match reader.error {
        Some(err) => Err(err),
        None => Ok(reader.params),
    }
}

/// Replace parameters of `module` with host values keyed by serialized id.
///
/// Every parameter must have an entry of the same shape.
pub(crate) fn write_parameters<B: Backend, M: Module<B>>(
    module: M,
    values: HashMap<String, (String, Vec<usize>, Vec<f32>)>,
) -> Result<M> {
    let mut writer = ParamWriter {
        values,
        error: None,
    };
    let module = module.map(&mut writer);

    match writer.error {
        Some(err) => Err(err),
        None => Ok(module),
    }
}

struct IdOrder {
    ids: Vec<ParamId>,
}

impl<B: Backend> ModuleVisitor<B> for IdOrder {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        self.ids.push(id);
    }
}

struct ParamReader<'a> {
    paths: &'a HashMap<String, String>,
    params: Vec<ParamValue>,
    error: Option<DetrError>,
}

impl<B: Backend> ModuleVisitor<B> for ParamReader<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if self.error.is_some() {
            return;
        }
        let Some(path) = self.paths.get(&id.serialize()) else {
            return;
        };
        let shape = tensor.dims().to_vec();
        match float_values(tensor.clone()) {
            Ok(values) => self.params.push(ParamValue {
                path: path.clone(),
                shape,
                values,
            }),
            Err(err) => self.error = Some(err),
        }
    }
}

struct ParamWriter {
    values: HashMap<String, (String, Vec<usize>, Vec<f32>)>,
    error: Option<DetrError>,
}

impl<B: Backend> ModuleMapper<B> for ParamWriter {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        if self.error.is_some() {
            return tensor;
        }
        let Some((path, shape, values)) = self.values.remove(&id.serialize()) else {
            self.error = Some(DetrError::Checkpoint {
                message: format!("no value for parameter {:?}", id),
            });
            return tensor;
        };

        let dims = tensor.dims().to_vec();
        if shape != dims {
            self.error = Some(DetrError::shape(format!("parameter '{}'", path), &dims, &shape));
            return tensor;
        }

        let require_grad = tensor.is_require_grad();
        Tensor::<B, D>::from_data(TensorData::new(values, shape), &tensor.device())
            .set_require_grad(require_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};

    type TestBackend = NdArray;

    #[derive(Module, Debug)]
    struct Stack<B: Backend> {
        input: Linear<B>,
        layers: Vec<Linear<B>>,
    }

    fn stack(device: &<TestBackend as Backend>::Device) -> Stack<TestBackend> {
        Stack {
            input: LinearConfig::new(2, 3).init(device),
            layers: vec![
                LinearConfig::new(3, 3).with_bias(false).init(device),
                LinearConfig::new(3, 1).init(device),
            ],
        }
    }

    #[test]
    fn test_paths_follow_fields_in_module_order() {
        let device = Default::default();
        let paths: Vec<String> = parameter_paths(&stack(&device))
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();

        assert_eq!(
            paths,
            vec![
                "input.weight",
                "input.bias",
                "layers.0.weight",
                "layers.1.weight",
                "layers.1.bias"
            ]
        );
    }

    #[test]
    fn test_read_parameters_shapes() {
        let device = Default::default();
        let params = read_parameters(&stack(&device)).unwrap();

        assert_eq!(params.len(), 5);
        assert_eq!(params[0].path, "input.weight");
        assert_eq!(params[0].shape, vec![2, 3]);
        assert_eq!(params[0].values.len(), 6);
        assert_eq!(params[4].shape, vec![1]);
    }
}
