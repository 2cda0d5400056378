//! Declarative measure/dimension mapping of a panel.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use polars::prelude::Expr;
use quantamatics_core::QmcError;

use crate::measures::{MeasureError, MeasureInputs};

/// Builds the aggregation expression of one measure over a group of rows.
pub type MeasureFn = fn(&MeasureInputs<'_>) -> Result<Expr, MeasureError>;

/// Time resolution of a panel's raw rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    #[default]
    Daily,
}

impl Display for Granularity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => f.write_str("Daily"),
        }
    }
}

/// Which transform of a measure to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureStage {
    /// Row-level transform applied right after loading.
    PreProcess,
    /// Group-level transform used when aggregating.
    Aggregate,
}

impl MeasureStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreProcess => "pre_process",
            Self::Aggregate => "aggregate",
        }
    }
}

/// Capability set of a measure.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasureFunctions {
    pub pre_process: Option<MeasureFn>,
    pub aggregate: Option<MeasureFn>,
}

impl MeasureFunctions {
    pub const fn both(pre_process: MeasureFn, aggregate: MeasureFn) -> Self {
        Self {
            pre_process: Some(pre_process),
            aggregate: Some(aggregate),
        }
    }

    pub const fn aggregate_only(aggregate: MeasureFn) -> Self {
        Self {
            pre_process: None,
            aggregate: Some(aggregate),
        }
    }

    pub const fn for_stage(&self, stage: MeasureStage) -> Option<MeasureFn> {
        match stage {
            MeasureStage::PreProcess => self.pre_process,
            MeasureStage::Aggregate => self.aggregate,
        }
    }
}

/// Registry of measure transforms keyed by measure display name.
#[derive(Debug, Clone, Default)]
pub struct MeasureRegistry {
    functions: HashMap<String, MeasureFunctions>,
}

impl MeasureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, measure: impl Into<String>, functions: MeasureFunctions) {
        self.functions.insert(measure.into(), functions);
    }

    pub fn get(&self, measure: &str) -> Option<&MeasureFunctions> {
        self.functions.get(measure)
    }

    pub fn lookup(&self, measure: &str, stage: MeasureStage) -> Result<MeasureFn, MeasureError> {
        self.get(measure)
            .and_then(|functions| functions.for_stage(stage))
            .ok_or(MeasureError::MissingTransform { stage })
    }
}

/// A measure's request/return field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureSpec {
    pub name: String,
    pub request_field: Option<String>,
    pub request_field_normalized: Option<String>,
    pub return_field: Option<String>,
}

impl MeasureSpec {
    /// A measure fetched from the server under `request`/`normalized`,
    /// returned as `returned`.
    pub fn fetched(name: &str, request: &str, normalized: &str, returned: &str) -> Self {
        Self {
            name: name.to_owned(),
            request_field: Some(request.to_owned()),
            request_field_normalized: Some(normalized.to_owned()),
            return_field: Some(returned.to_owned()),
        }
    }

    /// A measure computed locally from other measures.
    pub fn derived(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            request_field: None,
            request_field_normalized: None,
            return_field: None,
        }
    }

    pub fn request_field_for(&self, normalized: bool) -> Option<&str> {
        if normalized {
            self.request_field_normalized.as_deref()
        } else {
            self.request_field.as_deref()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionSpec {
    pub name: String,
    pub request_field: String,
    pub return_field: String,
}

impl DimensionSpec {
    pub fn new(name: &str, request: &str, returned: &str) -> Self {
        Self {
            name: name.to_owned(),
            request_field: request.to_owned(),
            return_field: returned.to_owned(),
        }
    }
}

/// Measures and dimensions in declaration order plus their transforms.
#[derive(Debug, Clone, Default)]
pub struct PanelMapping {
    pub measures: Vec<MeasureSpec>,
    pub dimensions: Vec<DimensionSpec>,
    pub registry: MeasureRegistry,
    pub granularity: Granularity,
}

impl PanelMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_measure(mut self, spec: MeasureSpec, functions: MeasureFunctions) -> Self {
        self.registry.register(spec.name.clone(), functions);
        self.measures.push(spec);
        self
    }

    pub fn with_dimension(mut self, spec: DimensionSpec) -> Self {
        self.dimensions.push(spec);
        self
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureSpec> {
        self.measures.iter().find(|spec| spec.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionSpec> {
        self.dimensions.iter().find(|spec| spec.name == name)
    }

    pub fn measure_names(&self) -> Vec<String> {
        self.measures.iter().map(|spec| spec.name.clone()).collect()
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|spec| spec.name.clone()).collect()
    }

    /// Returned column name → display name for every measure and dimension.
    ///
    /// Servers answer normalized requests under either the return field or
    /// the normalized request field, so both are mapped. The return field
    /// wins when two specs claim the same column.
    pub fn return_field_renames(&self) -> HashMap<String, String> {
        let mut renames = HashMap::new();
        let mut add = |field: Option<&String>, name: &String| {
            if let Some(field) = field {
                renames.entry(field.clone()).or_insert_with(|| name.clone());
            }
        };
        for spec in &self.measures {
            add(spec.return_field.as_ref(), &spec.name);
        }
        for spec in &self.dimensions {
            add(Some(&spec.return_field), &spec.name);
        }
        for spec in &self.measures {
            add(spec.request_field_normalized.as_ref(), &spec.name);
            add(spec.request_field.as_ref(), &spec.name);
        }
        for spec in &self.dimensions {
            add(Some(&spec.request_field), &spec.name);
        }
        renames
    }

    /// Request field names for `measures`, or for every fetchable measure
    /// when `None`.
    pub fn request_measures(
        &self,
        measures: Option<&[String]>,
        normalized: bool,
    ) -> Result<Vec<String>, QmcError> {
        match measures {
            None => Ok(self
                .measures
                .iter()
                .filter_map(|spec| spec.request_field_for(normalized).map(str::to_owned))
                .collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.measure(name)
                        .and_then(|spec| spec.request_field_for(normalized))
                        .map(str::to_owned)
                        .ok_or_else(|| QmcError::data(format!("Unknown panel measure: {name}")))
                })
                .collect(),
        }
    }

    pub fn request_dimensions(&self, dimensions: &[String]) -> Result<Vec<String>, QmcError> {
        dimensions
            .iter()
            .map(|name| {
                self.dimension(name)
                    .map(|spec| spec.request_field.clone())
                    .ok_or_else(|| QmcError::data(format!("Unknown panel dimension: {name}")))
            })
            .collect()
    }
}
