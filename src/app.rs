//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - reads the model config and the fit-result cache
//! - builds the model
//! - prints reports and writes optional exports

use std::path::Path;

use clap::Parser;

use crate::cli::{BuildArgs, Command, EvalArgs, ModelArgs, PlanArgs};
use crate::domain::{FitTable, ModelConfig, Settings};
use crate::error::{AppError, ModelError};
use crate::io::export::{SampleAxis, sample_function, write_model_json, write_samples_csv};

pub mod pipeline;

/// Entry point for the `morph` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    match cli.command {
        Command::Plan(args) => handle_plan(args),
        Command::Build(args) => handle_build(args),
        Command::Eval(args) => handle_eval(args),
    }
}

fn handle_plan(args: PlanArgs) -> Result<(), AppError> {
    let config = read_config(&args.config)?;
    let table = match &args.fits {
        Some(path) => crate::io::cache::load_or_default(path)
            .map_err(|e| with_path("Failed to read fit cache", path, e))?,
        None => FitTable::default(),
    };
    let plan = crate::fit::plan_fits(&config);
    let missing = crate::fit::missing_fits(&table, &plan);
    print!("{}", crate::report::format_plan(&plan, &missing));
    Ok(())
}

fn handle_build(args: BuildArgs) -> Result<(), AppError> {
    let out = build_from_args(&args.model)?;
    println!("{}", crate::report::format_build_summary(&out, args.list));

    if let Some(path) = &args.export {
        write_model_json(path, &out).map_err(|e| with_path("Failed to write model export", path, e))?;
    }
    Ok(())
}

fn handle_eval(args: EvalArgs) -> Result<(), AppError> {
    let out = build_from_args(&args.model)?;
    let ws = &out.workspace;
    let f = ws.func(&args.function)?;

    let coords = if args.coord.is_empty() {
        pipeline::reference_coords(ws)
    } else if args.coord.len() == ws.axes().len() {
        args.coord.clone()
    } else {
        return Err(AppError::new(
            2,
            format!(
                "Expected {} coordinate(s), got {}.",
                ws.axes().len(),
                args.coord.len()
            ),
        ));
    };
    let mut ctx = ws.context(&coords);
    for (name, value) in &args.params {
        ctx.set(ws.param(name)?, *value);
    }

    let axis = match &args.over {
        Some(name) => SampleAxis::find(ws, name)?,
        None => SampleAxis::default_for(ws),
    };
    let samples = sample_function(ws, f, axis, &ctx, args.points)?;
    print!("{}", crate::report::format_samples(&samples));

    if let Some(path) = &args.export {
        write_samples_csv(path, &samples).map_err(|e| with_path("Failed to write samples", path, e))?;
    }
    Ok(())
}

/// Read config and cache, resolve settings and build the model.
pub fn build_from_args(args: &ModelArgs) -> Result<pipeline::ModelOutput, AppError> {
    let settings = settings_from_args(args)?;
    let config = read_config(&args.config)?;
    let table = crate::io::cache::read_fit_table(&args.fits)
        .map_err(|e| with_path("Failed to read fit cache", &args.fits, e))?;
    Ok(pipeline::build_model(&config, &table, &settings)?)
}

/// Environment settings, overridden by explicit flags.
pub fn settings_from_args(args: &ModelArgs) -> Result<Settings, AppError> {
    let mut settings = Settings::from_env()?;
    if let Some(tol) = args.shift_tolerance {
        if !(tol.is_finite() && tol >= 0.0) {
            return Err(AppError::new(2, format!("Invalid --shift-tolerance {tol}.")));
        }
        settings.shift_tolerance = tol;
    }
    if let Some(policy) = args.degenerate_policy {
        settings.degenerate_policy = policy;
    }
    Ok(settings)
}

fn read_config(path: &Path) -> Result<ModelConfig, AppError> {
    crate::io::cache::read_model_config(path)
        .map_err(|e| with_path("Failed to read model config", path, e))
}

fn with_path(what: &str, path: &Path, err: ModelError) -> AppError {
    AppError::new(err.exit_code(), format!("{what} '{}': {err}", path.display()))
}
