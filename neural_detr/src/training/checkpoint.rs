//! Checkpoint storage.
//!
//! Two formats are supported:
//! - networks are saved and loaded whole through burn's binary file recorder;
//! - [`NamedTensors`] is a plain name to tensor mapping (`index.json` plus
//!   little-endian f32 data in `tensors.bin`), used to exchange weights with
//!   other tooling. Names are module field paths such as `class_head.weight`;
//!   checkpoints written from a wrapped network carry a `net.` prefix, which
//!   is stripped on load.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use serde::{Deserialize, Serialize};

use crate::error::{DetrError, Result};
use crate::host::float_values;

use super::param_paths::{parameter_paths, read_parameters, write_parameters};

/// Prefix added to parameter names by wrapped (e.g. data-parallel) modules.
pub const WRAPPED_PREFIX: &str = "net.";

const INDEX_FILE: &str = "index.json";
const DATA_FILE: &str = "tensors.bin";
const CHECKPOINT_STEM: &str = "detr_epoch_";
const RECORDER_EXTENSION: &str = "bin";

/// One named tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    /// Parameter name.
    pub name: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    shape: Vec<usize>,
    offset: usize,
    len: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Index {
    version: u32,
    tensors: Vec<IndexEntry>,
}

/// Ordered mapping from parameter name to tensor value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedTensors {
    tensors: Vec<NamedTensor>,
}

impl NamedTensors {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every float parameter of `module`, named `{prefix}{field path}`.
    pub fn from_module<B: Backend, M: Module<B>>(module: &M, prefix: &str) -> Result<Self> {
        let mut named = Self::new();
        for param in read_parameters(module)? {
            named.insert_values(format!("{}{}", prefix, param.path), param.shape, param.values)?;
        }
        Ok(named)
    }

    /// Copy these tensors into the parameters of `module`.
    ///
    /// Names must match the module's field paths exactly: a parameter with no
    /// tensor, a tensor with no parameter, or a shape mismatch is an error and
    /// `module` is not modified.
    pub fn load_into<B: Backend, M: Module<B>>(&self, module: M) -> Result<M> {
        let paths = parameter_paths(&module)?;

        let expected: HashSet<&str> = paths.iter().map(|(path, _)| path.as_str()).collect();
        let missing: Vec<&str> = paths
            .iter()
            .map(|(path, _)| path.as_str())
            .filter(|path| self.get(path).is_none())
            .collect();
        let unexpected: Vec<&str> = self.names().filter(|name| !expected.contains(name)).collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(DetrError::Checkpoint {
                message: format!(
                    "parameter names do not match: missing {:?}, unexpected {:?}",
                    missing, unexpected
                ),
            });
        }

        let mut values = HashMap::with_capacity(paths.len());
        for (path, id) in paths {
            if let Some(tensor) = self.get(&path) {
                values.insert(id, (path, tensor.shape.clone(), tensor.values.clone()));
            }
        }
        let module = write_parameters(module, values)?;
        log::debug!("Loaded {} named tensors into module", self.len());
        Ok(module)
    }

    /// Insert or replace a tensor read from the device.
    pub fn insert<B: Backend, const D: usize>(
        &mut self,
        name: impl Into<String>,
        tensor: Tensor<B, D>,
    ) -> Result<()> {
        let shape = tensor.dims().to_vec();
        let values = float_values(tensor)?;
        self.insert_values(name, shape, values)
    }

    /// Insert or replace a tensor from host values.
    pub fn insert_values(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        values: Vec<f32>,
    ) -> Result<()> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(DetrError::InvalidData(format!(
                "tensor '{}' has shape {:?} but {} values",
                name,
                shape,
                values.len()
            )));
        }

        let entry = NamedTensor {
            name,
            shape,
            values,
        };
        match self.tensors.iter_mut().find(|t| t.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.tensors.push(entry),
        }
        Ok(())
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&NamedTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Build a device tensor from the entry `name`.
    pub fn tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let entry = self.get(name).ok_or_else(|| DetrError::Checkpoint {
            message: format!("no tensor named '{}'", name),
        })?;
        if entry.shape.len() != D {
            return Err(DetrError::Checkpoint {
                message: format!(
                    "tensor '{}' has rank {}, requested rank {}",
                    name,
                    entry.shape.len(),
                    D
                ),
            });
        }
        Ok(Tensor::from_data(
            TensorData::new(entry.values.clone(), entry.shape.clone()),
            device,
        ))
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(|t| t.name.as_str())
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Remove the wrapped-module prefix from every name.
    ///
    /// Applies only when the first name carries [`WRAPPED_PREFIX`]; names
    /// without it are left alone. Returns whether anything was stripped.
    pub fn strip_wrapped_prefix(&mut self) -> bool {
        let wrapped = self
            .tensors
            .first()
            .is_some_and(|t| t.name.starts_with(WRAPPED_PREFIX));
        if !wrapped {
            return false;
        }
        for tensor in &mut self.tensors {
            if let Some(stripped) = tensor.name.strip_prefix(WRAPPED_PREFIX) {
                tensor.name = stripped.to_string();
            }
        }
        true
    }

    /// Write `index.json` and `tensors.bin` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let mut offset = 0;
        let entries = self
            .tensors
            .iter()
            .map(|t| {
                let entry = IndexEntry {
                    name: t.name.clone(),
                    shape: t.shape.clone(),
                    offset,
                    len: t.values.len(),
                };
                offset += t.values.len();
                entry
            })
            .collect();
        let index = Index {
            version: 1,
            tensors: entries,
        };
        serde_json::to_writer_pretty(BufWriter::new(File::create(dir.join(INDEX_FILE))?), &index)?;

        let mut data = BufWriter::new(File::create(dir.join(DATA_FILE))?);
        for tensor in &self.tensors {
            for v in &tensor.values {
                data.write_all(&v.to_le_bytes())?;
            }
        }
        data.flush()?;

        log::info!("Saved {} tensors to {:?}", self.tensors.len(), dir);
        Ok(())
    }

    /// Read a mapping written by [`save`](Self::save), stripping the
    /// wrapped-module prefix if present.
    pub fn load(dir: &Path) -> Result<Self> {
        let index: Index = serde_json::from_reader(BufReader::new(File::open(dir.join(INDEX_FILE))?))?;

        let mut bytes = Vec::new();
        BufReader::new(File::open(dir.join(DATA_FILE))?).read_to_end(&mut bytes)?;
        if bytes.len() % 4 != 0 {
            return Err(DetrError::Checkpoint {
                message: format!("{} has {} bytes, not a multiple of 4", DATA_FILE, bytes.len()),
            });
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let mut named = Self::new();
        for entry in index.tensors {
            let end = entry.offset + entry.len;
            if end > values.len() {
                return Err(DetrError::Checkpoint {
                    message: format!(
                        "tensor '{}' spans values {}..{} but only {} are stored",
                        entry.name,
                        entry.offset,
                        end,
                        values.len()
                    ),
                });
            }
            named.insert_values(entry.name, entry.shape, values[entry.offset..end].to_vec())?;
        }

        if named.strip_wrapped_prefix() {
            log::debug!("Stripped '{}' prefix from checkpoint names", WRAPPED_PREFIX);
        }
        log::info!("Loaded {} tensors from {:?}", named.len(), dir);
        Ok(named)
    }
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

/// Path of the checkpoint for `epoch`, without the recorder extension.
pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("{}{}", CHECKPOINT_STEM, epoch))
}

/// Save a network's record to `path` (the recorder adds its extension).
pub fn save_network<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    model.clone().save_file(path.to_path_buf(), &recorder())?;
    Ok(())
}

/// Load a record saved by [`save_network`] into `model`.
pub fn load_network<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M> {
    let model = model.load_file(path.to_path_buf(), &recorder(), device)?;
    log::info!("Loaded network from {:?}", path);
    Ok(model)
}

/// Save `model`'s parameters as [`NamedTensors`] in `dir`, every name
/// prefixed with `prefix` (e.g. [`WRAPPED_PREFIX`] or `""`).
pub fn export_network<B: Backend, M: Module<B>>(model: &M, dir: &Path, prefix: &str) -> Result<()> {
    NamedTensors::from_module(model, prefix)?.save(dir)
}

/// Load [`NamedTensors`] from `dir` into `model`, stripping the wrapped prefix.
pub fn import_network<B: Backend, M: Module<B>>(model: M, dir: &Path) -> Result<M> {
    let model = NamedTensors::load(dir)?.load_into(model)?;
    log::info!("Imported network from {:?}", dir);
    Ok(model)
}

/// Whether a network checkpoint exists at `path`.
pub fn checkpoint_exists(path: &Path) -> bool {
    path.with_extension(RECORDER_EXTENSION).is_file()
}

/// The highest-epoch `detr_epoch_N` checkpoint in `dir`, without extension.
pub fn find_latest_checkpoint(dir: &Path) -> Option<(usize, PathBuf)> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORDER_EXTENSION) {
                return None;
            }
            let epoch = path
                .file_stem()?
                .to_str()?
                .strip_prefix(CHECKPOINT_STEM)?
                .parse::<usize>()
                .ok()?;
            Some((epoch, path.with_extension("")))
        })
        .max_by_key(|(epoch, _)| *epoch)
}

/// Per-epoch checkpoint writer keeping the most recent files.
#[derive(Debug, Clone)]
pub struct CheckpointRotation {
    dir: PathBuf,
    keep: usize,
    saved: VecDeque<PathBuf>,
}

impl CheckpointRotation {
    /// Keep at most `keep` checkpoints in `dir`.
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            keep: keep.max(1),
            saved: VecDeque::new(),
        }
    }

    /// Save `model` as the checkpoint of `epoch`, deleting the oldest one
    /// written by this rotation when over capacity.
    pub fn save<B: Backend, M: Module<B>>(&mut self, model: &M, epoch: usize) -> Result<PathBuf> {
        let path = checkpoint_path(&self.dir, epoch);
        save_network(model, &path)?;
        log::info!("Saved checkpoint {:?}", path);

        self.saved.push_back(path.clone());
        while self.saved.len() > self.keep {
            if let Some(old) = self.saved.pop_front() {
                let file = old.with_extension(RECORDER_EXTENSION);
                match fs::remove_file(&file) {
                    Ok(()) => log::info!("Removed old checkpoint {:?}", file),
                    Err(err) => log::warn!("Could not remove old checkpoint {:?}: {}", file, err),
                }
            }
        }
        Ok(path)
    }

    /// Checkpoints currently kept, oldest first.
    pub fn saved(&self) -> impl Iterator<Item = &Path> {
        self.saved.iter().map(PathBuf::as_path)
    }
}
