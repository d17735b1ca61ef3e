use std::collections::HashSet;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};

/// One named parameter tensor, flattened row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Serializable snapshot of every variable in a `VarMap`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsPayload {
    pub tensors: Vec<NamedTensor>,
}

impl WeightsPayload {
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn num_parameters(&self) -> usize {
        self.tensors.iter().map(|t| t.data.len()).sum()
    }
}

pub fn export_weights(varmap: &VarMap) -> Result<WeightsPayload> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| SignalError::poisoned("varmap"))?;

    let mut tensors = data
        .iter()
        .map(|(name, var)| {
            Ok(NamedTensor {
                name: name.clone(),
                shape: var.dims().to_vec(),
                data: var.flatten_all()?.to_vec1::<f32>()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    tensors.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(WeightsPayload { tensors })
}

/// Overwrites every variable in `varmap` from `payload`. The payload must
/// name exactly the same variables, with the same shapes.
pub fn import_weights(varmap: &mut VarMap, payload: &WeightsPayload) -> Result<()> {
    let expected: Vec<(String, Vec<usize>, Device)> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| SignalError::poisoned("varmap"))?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.dims().to_vec(), var.device().clone()))
            .collect()
    };

    let provided: HashSet<&str> = payload.tensors.iter().map(|t| t.name.as_str()).collect();
    if let Some((missing, _, _)) = expected.iter().find(|(name, _, _)| !provided.contains(name.as_str())) {
        return Err(SignalError::input(format!("weights payload is missing {}", missing)));
    }
    if payload.tensors.len() != expected.len() {
        return Err(SignalError::input(format!(
            "weights payload has {} tensors, model expects {}",
            payload.tensors.len(),
            expected.len()
        )));
    }

    for tensor in &payload.tensors {
        let (_, shape, device) = expected
            .iter()
            .find(|(name, _, _)| *name == tensor.name)
            .ok_or_else(|| SignalError::input(format!("unexpected weight {}", tensor.name)))?;
        if *shape != tensor.shape {
            return Err(SignalError::input(format!(
                "shape mismatch for {}: model {:?}, payload {:?}",
                tensor.name, shape, tensor.shape
            )));
        }
        let elems: usize = tensor.shape.iter().product();
        if elems != tensor.data.len() {
            return Err(SignalError::input(format!(
                "{} declares {} values but holds {}",
                tensor.name,
                elems,
                tensor.data.len()
            )));
        }

        let value = Tensor::from_slice(&tensor.data, tensor.shape.as_slice(), device)?;
        varmap.set_one(&tensor.name, value)?;
    }

    Ok(())
}
