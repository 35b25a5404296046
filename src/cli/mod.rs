//! Command-line parsing for the `morph` model builder.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! model-building code: subcommands map onto plain structs that `app` turns
//! into library calls.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::DegeneratePolicy;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "morph",
    version,
    about = "Morphed shape parameters and constrained mixtures from cached fit results"
)]
pub struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the fits a model build reads and which of them the cache lacks.
    Plan(PlanArgs),
    /// Build the model, print a summary and optionally export the yields.
    Build(BuildArgs),
    /// Build the model and sample one function.
    Eval(EvalArgs),
}

/// Inputs shared by every subcommand that builds the model.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Model configuration (JSON).
    #[arg(short = 'c', long)]
    pub config: PathBuf,

    /// Fit-result cache (JSON).
    #[arg(short = 'f', long)]
    pub fits: PathBuf,

    /// Relative deviation below which a systematic shift is dropped
    /// (overrides MORPH_SHIFT_TOLERANCE).
    #[arg(long)]
    pub shift_tolerance: Option<f64>,

    /// What to do when a cross-region scale has a zero source value
    /// (overrides MORPH_DEGENERATE_POLICY).
    #[arg(long, value_enum)]
    pub degenerate_policy: Option<DegeneratePolicy>,
}

#[derive(Debug, Args, Clone)]
pub struct PlanArgs {
    /// Model configuration (JSON).
    #[arg(short = 'c', long)]
    pub config: PathBuf,

    /// Fit-result cache to check (JSON). A missing file counts as empty.
    #[arg(short = 'f', long)]
    pub fits: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Export integrals, uncertainties, links and parameters to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Also list every registered function.
    #[arg(long)]
    pub list: bool,
}

#[derive(Debug, Args, Clone)]
pub struct EvalArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Function to evaluate (workspace name).
    #[arg(long)]
    pub function: String,

    /// Morphing coordinates, one per axis (default: the axis midpoints).
    #[arg(long, num_args = 1..)]
    pub coord: Vec<f64>,

    /// Parameter override `name=value`, repeatable.
    #[arg(long = "param", value_parser = parse_assignment)]
    pub params: Vec<(String, f64)>,

    /// Axis or observable to sample over (default: first observable, else first axis).
    #[arg(long)]
    pub over: Option<String>,

    /// Number of sample points.
    #[arg(long, default_value_t = 11)]
    pub points: usize,

    /// Write the samples to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Parse `name=value`.
pub fn parse_assignment(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value in '{raw}'"))?;
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_command() {
        let cli = Cli::parse_from([
            "morph",
            "--log-level",
            "debug",
            "build",
            "-c",
            "model.json",
            "-f",
            "fits.json",
            "--degenerate-policy",
            "use-target",
        ]);
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.model.config, PathBuf::from("model.json"));
        assert_eq!(args.model.degenerate_policy, Some(DegeneratePolicy::UseTarget));
        assert!(args.export.is_none());
    }

    #[test]
    fn parses_eval_overrides() {
        let cli = Cli::parse_from([
            "morph", "eval", "-c", "m.json", "-f", "f.json", "--function", "mean_sig_PP",
            "--coord", "7.5", "--param", "pileup=0.5", "--param", "isolation=-1",
        ]);
        let Command::Eval(args) = cli.command else {
            panic!("expected eval");
        };
        assert_eq!(args.coord, vec![7.5]);
        assert_eq!(
            args.params,
            vec![("pileup".to_string(), 0.5), ("isolation".to_string(), -1.0)]
        );
        assert_eq!(args.points, 11);
    }

    #[test]
    fn assignment_errors() {
        assert!(parse_assignment("pileup").is_err());
        assert!(parse_assignment("=1").is_err());
        assert!(parse_assignment("pileup=abc").is_err());
    }
}
