//! Function nodes stored in the workspace.
//!
//! A node only refers to handles that were registered before it, so the graph
//! of functions is acyclic by construction and a node can be evaluated by a
//! plain recursive walk.

use crate::domain::ShapeKind;
use crate::math::{LinearSpline, Polynomial, ThinPlateSpline};
use crate::workspace::{FuncHandle, ParamHandle};

/// An argument of a node: a free parameter, another function, or a literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    Param(ParamHandle),
    Func(FuncHandle),
    Const(f64),
}

impl From<ParamHandle> for Arg {
    fn from(h: ParamHandle) -> Self {
        Arg::Param(h)
    }
}

impl From<FuncHandle> for Arg {
    fn from(h: FuncHandle) -> Self {
        Arg::Func(h)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Const(v)
    }
}

/// One systematic term of a morphed function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphShift {
    pub nuisance: ParamHandle,
    pub up: FuncHandle,
    pub down: FuncHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Constant(f64),
    /// Linear spline over coordinate `axis`.
    Spline { axis: usize, spline: LinearSpline },
    /// Thin-plate interpolant over coordinates 0 and 1.
    Surface { surface: ThinPlateSpline },
    /// Fitted polynomial over coordinates 0 (and 1 in 2-D).
    Poly { poly: Polynomial },
    /// `central + Σ max(0,ν)(up-central) + Σ min(0,ν)(central-down)`.
    Morph {
        central: FuncHandle,
        shifts: Vec<MorphShift>,
    },
    /// A density over one observable.
    Shape {
        kind: ShapeKind,
        observable: usize,
        params: Vec<Arg>,
    },
    Product(Vec<FuncHandle>),
    /// `f1*c1 + (1-f1)*(f2*c2 + (1-f2)*(... cn))`; one fraction fewer than components.
    RecursiveSum {
        components: Vec<FuncHandle>,
        fractions: Vec<Arg>,
    },
    /// `f*first + (1-f)*second`.
    PairSum {
        first: FuncHandle,
        second: FuncHandle,
        fraction: Arg,
    },
    /// `Σ y_i*c_i`.
    ExtendedSum {
        components: Vec<FuncHandle>,
        yields: Vec<Arg>,
    },
    /// `scale * source`.
    Scaled { scale: Arg, source: FuncHandle },
    /// A fitted weight held inside `[lo, hi]`; `error` gives its uncertainty.
    Bounded {
        value: FuncHandle,
        error: Option<FuncHandle>,
        lo: f64,
        hi: f64,
    },
}

impl Node {
    pub fn label(&self) -> &'static str {
        match self {
            Node::Constant(_) => "constant",
            Node::Spline { .. } => "spline",
            Node::Surface { .. } => "surface",
            Node::Poly { .. } => "polynomial",
            Node::Morph { .. } => "morph",
            Node::Shape { .. } => "shape",
            Node::Product(_) => "product",
            Node::RecursiveSum { .. } => "recursive-sum",
            Node::PairSum { .. } => "pair-sum",
            Node::ExtendedSum { .. } => "extended-sum",
            Node::Scaled { .. } => "scaled",
            Node::Bounded { .. } => "bounded",
        }
    }
}
