//! Exports for downstream consumers.
//!
//! - the model summary (yields, uncertainties, links, parameters) as JSON for
//!   the datacard writer
//! - samples of one function over an axis or observable as CSV

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::app::pipeline::{DroppedShift, ModelOutput, RegionTable, SkippedShape};
use crate::domain::ScaleLink;
use crate::error::{ModelError, Result};
use crate::workspace::{EvalContext, FuncHandle, Workspace};

/// One free parameter as exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamExport {
    pub name: String,
    pub value: f64,
    pub lo: f64,
    pub hi: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

/// JSON summary of a model build.
#[derive(Debug, Clone, Serialize)]
pub struct ModelExport<'a> {
    pub tool: &'static str,
    pub created: DateTime<Utc>,
    pub integrals: &'a RegionTable,
    pub uncertainties: &'a RegionTable,
    pub links: &'a [ScaleLink],
    pub parameters: Vec<ParamExport>,
    pub functions: Vec<&'a str>,
    pub dropped_shifts: &'a [DroppedShift],
    pub skipped_shapes: &'a [SkippedShape],
}

impl<'a> ModelExport<'a> {
    pub fn new(out: &'a ModelOutput) -> Self {
        let ws = &out.workspace;
        Self {
            tool: "morph",
            created: Utc::now(),
            integrals: &out.integrals,
            uncertainties: &out.uncertainties,
            links: &out.links,
            parameters: ws
                .parameters()
                .iter()
                .map(|p| ParamExport {
                    name: p.name.clone(),
                    value: p.value,
                    lo: p.lo,
                    hi: p.hi,
                    error: p.error,
                })
                .collect(),
            functions: ws.functions().iter().map(|f| f.name.as_str()).collect(),
            dropped_shifts: &out.dropped_shifts,
            skipped_shapes: &out.skipped_shapes,
        }
    }
}

/// Write the model summary JSON.
pub fn write_model_json(path: &Path, out: &ModelOutput) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &ModelExport::new(out))?;
    Ok(())
}

/// The variable a function is sampled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleAxis {
    /// Morphing coordinate `i`.
    Coord(usize),
    /// Observable `i`.
    Observable(usize),
}

impl SampleAxis {
    /// Look `name` up among the axes, then the observables.
    pub fn find(ws: &Workspace, name: &str) -> Result<Self> {
        if let Some(i) = ws.axes().iter().position(|a| a.name == name) {
            return Ok(SampleAxis::Coord(i));
        }
        if let Some(i) = ws.observables().iter().position(|o| o.name == name) {
            return Ok(SampleAxis::Observable(i));
        }
        Err(ModelError::MissingReference(format!("axis or observable {name}")))
    }

    /// First observable if any, else the first morphing coordinate.
    pub fn default_for(ws: &Workspace) -> Self {
        if ws.observables().is_empty() {
            SampleAxis::Coord(0)
        } else {
            SampleAxis::Observable(0)
        }
    }

    fn range(self, ws: &Workspace) -> Option<(String, f64, f64)> {
        let axis = match self {
            SampleAxis::Coord(i) => ws.axes().get(i),
            SampleAxis::Observable(i) => ws.observables().get(i),
        }?;
        Some((axis.name.clone(), axis.min, axis.max))
    }
}

/// Values of one function along one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    pub function: String,
    pub variable: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Evaluate `f` at `n` evenly spaced points over the full range of `axis`.
///
/// Every other value is taken from `base`. Points are evaluated in parallel;
/// the workspace is only read.
pub fn sample_function(
    ws: &Workspace,
    f: FuncHandle,
    axis: SampleAxis,
    base: &EvalContext,
    n: usize,
) -> Result<Samples> {
    let (variable, lo, hi) = axis
        .range(ws)
        .ok_or_else(|| ModelError::invalid_range(ws.name_of(f), format!("no such axis {axis:?}")))?;
    let n = n.max(2);
    let x: Vec<f64> = (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
        .collect();

    let y = x
        .par_iter()
        .map(|&v| {
            let mut ctx = base.clone();
            match axis {
                SampleAxis::Coord(i) => {
                    if let Some(slot) = ctx.coords.get_mut(i) {
                        *slot = v;
                    }
                }
                SampleAxis::Observable(i) => {
                    ctx.set_observable(i, v);
                }
            }
            ws.eval(f, &ctx)
        })
        .collect();

    Ok(Samples {
        function: ws.name_of(f).to_string(),
        variable,
        x,
        y,
    })
}

/// Write samples as `{variable},{function}` CSV.
pub fn write_samples_csv(path: &Path, samples: &Samples) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{},{}", samples.variable, samples.function)?;
    for (x, y) in samples.x.iter().zip(&samples.y) {
        writeln!(file, "{x:.6},{y:.10}")?;
    }
    file.flush()?;
    Ok(())
}
