/// Annotated data container: per-cell fields plus the registry attached at setup
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use candle_core::{Device, Tensor};
use ndarray::{Array1, Array2, Axis};
use ndarray_npy::ReadNpyExt;

use super::registry::{DataRegistry, FieldDType};

/// Name of the serialized registry inside a data directory
pub const REGISTRY_FILE: &str = "registry.json";

/// Column block stored for one field, one row per cell
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Float32(Array2<f32>),
    Int64(Array2<i64>),
}

impl From<Array2<f32>> for FieldData {
    fn from(values: Array2<f32>) -> Self {
        FieldData::Float32(values)
    }
}

impl From<Array2<i64>> for FieldData {
    fn from(values: Array2<i64>) -> Self {
        FieldData::Int64(values)
    }
}

impl FieldData {
    /// Single float column
    pub fn column_f32(values: Vec<f32>) -> Self {
        FieldData::Float32(Array1::from(values).insert_axis(Axis(1)))
    }

    /// Single integer column
    pub fn column_i64(values: Vec<i64>) -> Self {
        FieldData::Int64(Array1::from(values).insert_axis(Axis(1)))
    }

    /// Storage dtype
    pub fn dtype(&self) -> FieldDType {
        match self {
            FieldData::Float32(_) => FieldDType::Float32,
            FieldData::Int64(_) => FieldDType::Int64,
        }
    }

    pub fn n_rows(&self) -> usize {
        match self {
            FieldData::Float32(a) => a.nrows(),
            FieldData::Int64(a) => a.nrows(),
        }
    }

    pub fn n_cols(&self) -> usize {
        match self {
            FieldData::Float32(a) => a.ncols(),
            FieldData::Int64(a) => a.ncols(),
        }
    }

    /// Gather `rows` and cast them to `dtype`
    ///
    /// # Returns
    /// Tensor of shape [rows.len(), n_cols]
    pub fn gather(&self, rows: &[usize], dtype: FieldDType, device: &Device) -> crate::Result<Tensor> {
        let n_rows = self.n_rows();
        if let Some(&bad) = rows.iter().find(|&&r| r >= n_rows) {
            return Err(crate::ScviError::Data(format!(
                "Row {} out of range for field with {} rows",
                bad, n_rows
            )));
        }

        let shape = (rows.len(), self.n_cols());

        // select() returns a standard-layout copy, so iteration order is row-major
        let tensor = match (self, dtype) {
            (FieldData::Float32(a), FieldDType::Float32) => {
                let data: Vec<f32> = a.select(Axis(0), rows).iter().copied().collect();
                Tensor::from_vec(data, shape, device)?
            }
            (FieldData::Float32(a), FieldDType::Int64) => {
                let data: Vec<i64> = a.select(Axis(0), rows).iter().map(|&x| x as i64).collect();
                Tensor::from_vec(data, shape, device)?
            }
            (FieldData::Int64(a), FieldDType::Float32) => {
                let data: Vec<f32> = a.select(Axis(0), rows).iter().map(|&x| x as f32).collect();
                Tensor::from_vec(data, shape, device)?
            }
            (FieldData::Int64(a), FieldDType::Int64) => {
                let data: Vec<i64> = a.select(Axis(0), rows).iter().copied().collect();
                Tensor::from_vec(data, shape, device)?
            }
        };

        Ok(tensor)
    }
}

/// Cells x fields container with an optional attached registry
#[derive(Debug, Clone)]
pub struct AnnotatedData {
    n_obs: usize,
    fields: BTreeMap<String, FieldData>,
    registry: Option<DataRegistry>,
}

impl AnnotatedData {
    /// Create an empty container for `n_obs` cells
    pub fn new(n_obs: usize) -> Self {
        Self {
            n_obs,
            fields: BTreeMap::new(),
            registry: None,
        }
    }

    /// Load from a directory of `<field>.npy` files and an optional `registry.json`
    ///
    /// Arrays are read as float32 first and int64 otherwise. Without a
    /// registry file the container is returned unconfigured.
    pub fn from_directory<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading annotated data from: {:?}", dir);

        let mut npy_paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "npy"))
            .collect();
        npy_paths.sort();

        let mut fields = BTreeMap::new();
        for npy_path in &npy_paths {
            let name = match npy_path.file_stem().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let data = read_field(npy_path)?;
            log::info!("Loaded {}: shape ({}, {}), {:?}", name, data.n_rows(), data.n_cols(), data.dtype());
            fields.insert(name, data);
        }

        let n_obs = fields.values().next().map_or(0, FieldData::n_rows);
        let mut adata = Self::new(n_obs);
        for (name, data) in fields {
            adata.insert_field(name, data)?;
        }

        let registry_path = dir.join(REGISTRY_FILE);
        if registry_path.exists() {
            let reader = BufReader::new(File::open(&registry_path)?);
            let registry: DataRegistry = serde_json::from_reader(reader)?;
            adata.set_registry(registry);
        } else {
            log::warn!("{} not found, data left unconfigured", REGISTRY_FILE);
        }

        log::info!("Annotated data loaded: {} cells, {} fields", adata.n_obs, adata.fields.len());

        Ok(adata)
    }

    /// Number of cells
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn len(&self) -> usize {
        self.n_obs
    }

    pub fn is_empty(&self) -> bool {
        self.n_obs == 0
    }

    /// Store a field, rejecting row-count mismatches
    pub fn insert_field(&mut self, name: impl Into<String>, data: impl Into<FieldData>) -> crate::Result<()> {
        let name = name.into();
        let data = data.into();
        if data.n_rows() != self.n_obs {
            return Err(crate::ScviError::Data(format!(
                "Field {} has {} rows, expected {}",
                name,
                data.n_rows(),
                self.n_obs
            )));
        }
        self.fields.insert(name, data);
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldData> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn registry(&self) -> Option<&DataRegistry> {
        self.registry.as_ref()
    }

    pub fn set_registry(&mut self, registry: DataRegistry) {
        self.registry = Some(registry);
    }

    /// Register every stored field under its storage dtype and attach the registry
    pub fn setup_registry(&mut self) -> &DataRegistry {
        let mut registry = DataRegistry::new();
        for (name, data) in &self.fields {
            registry.register(name.clone(), data.dtype());
        }
        log::debug!("Registered fields: {:?}", registry.keys().collect::<Vec<_>>());
        self.registry.insert(registry)
    }
}

fn read_field(path: &Path) -> crate::Result<FieldData> {
    match Array2::<f32>::read_npy(File::open(path)?) {
        Ok(values) => Ok(FieldData::Float32(values)),
        Err(_) => {
            let values = Array2::<i64>::read_npy(File::open(path)?)?;
            Ok(FieldData::Int64(values))
        }
    }
}
