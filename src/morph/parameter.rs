//! Continuous shape parameters.
//!
//! A shape parameter is either a constant, an interpolated grid of fitted
//! values (linear spline in 1-D, thin-plate surface in 2-D), or a polynomial
//! that was already fit to such a grid.

use crate::domain::{Grid, GridAxes, ParamFit};
use crate::error::{ModelError, Result};
use crate::math::{LinearSpline, Polynomial, ThinPlateSpline};
use crate::workspace::{FuncHandle, Node, Workspace};

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSource {
    Constant(f64),
    Grid(Grid),
    Fitted(Polynomial),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeParameter {
    pub name: String,
    pub source: ParameterSource,
}

impl ShapeParameter {
    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            source: ParameterSource::Constant(value),
        }
    }

    pub fn from_grid(name: impl Into<String>, grid: Grid) -> Self {
        Self {
            name: name.into(),
            source: ParameterSource::Grid(grid),
        }
    }

    pub fn from_fitted(name: impl Into<String>, poly: Polynomial) -> Self {
        Self {
            name: name.into(),
            source: ParameterSource::Fitted(poly),
        }
    }

    /// The node this parameter registers, checked against the workspace axes.
    pub fn node(&self, ws: &Workspace) -> Result<Node> {
        match &self.source {
            ParameterSource::Constant(v) => {
                if !v.is_finite() {
                    return Err(ModelError::data_shape(&self.name, "non-finite constant"));
                }
                Ok(Node::Constant(*v))
            }
            ParameterSource::Grid(grid) => grid_node(&self.name, grid, ParamFit::Interpolate, ws),
            ParameterSource::Fitted(poly) => Ok(Node::Poly { poly: poly.clone() }),
        }
    }

    /// Register the parameter function under its name.
    pub fn build(&self, ws: &mut Workspace) -> Result<FuncHandle> {
        let node = self.node(ws)?;
        ws.add_function(&self.name, node)
    }
}

/// Build the node that makes `grid` continuous according to `fit`.
pub fn grid_node(name: &str, grid: &Grid, fit: ParamFit, ws: &Workspace) -> Result<Node> {
    grid.validate(name)?;
    if grid.axes.dim() > ws.axes().len() {
        return Err(ModelError::data_shape(
            name,
            format!(
                "{}-D grid in a workspace with {} morphing coordinate(s)",
                grid.axes.dim(),
                ws.axes().len()
            ),
        ));
    }

    match fit {
        ParamFit::Interpolate => match &grid.axes {
            GridAxes::One(coords) => Ok(Node::Spline {
                axis: 0,
                spline: LinearSpline::new(name, coords, &grid.values)?,
            }),
            GridAxes::Two(c1, c2) => Ok(Node::Surface {
                surface: ThinPlateSpline::new(name, c1, c2, &grid.values)?,
            }),
        },
        ParamFit::Polynomial { order } => Ok(Node::Poly {
            poly: Polynomial::fit(name, grid, order)?,
        }),
    }
}
