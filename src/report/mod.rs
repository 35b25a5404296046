//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the model-building code stays free of presentation
//! - output changes are localized

use crate::app::pipeline::ModelOutput;
use crate::domain::FitKey;
use crate::io::export::Samples;

/// Summary of a model build: sizes, yields per region, links and anything dropped.
pub fn format_build_summary(out: &ModelOutput, list_functions: bool) -> String {
    let ws = &out.workspace;
    let mut s = String::new();

    s.push_str("=== morph - model build ===\n");
    let axes: Vec<String> = ws
        .axes()
        .iter()
        .map(|a| format!("{}[{}, {}]", a.name, a.min, a.max))
        .collect();
    s.push_str(&format!("Axes: {}\n", axes.join(" ")));
    s.push_str(&format!(
        "Workspace: {} parameters | {} functions\n",
        ws.n_params(),
        ws.n_functions()
    ));

    for (region, yields) in &out.integrals {
        s.push_str(&format!("\nRegion {region}:\n"));
        s.push_str(&format!("{:<32} {:>14} {:>10}\n", "component", "integral", "rel.unc"));
        s.push_str(&format!("{:-<32} {:-<14} {:-<10}\n", "", "", ""));
        for (component, value) in yields {
            let rel = out
                .uncertainties
                .get(region)
                .and_then(|u| u.get(component))
                .copied()
                .unwrap_or(0.0);
            s.push_str(&format!("{:<32} {value:>14.4} {rel:>10.4}\n", truncate(component, 32)));
        }
    }

    if !out.links.is_empty() {
        s.push_str("\nLinks:\n");
        for l in &out.links {
            s.push_str(&format!(
                "- {} = {:.6} +- {:.6} x ({} -> {})\n",
                l.component, l.scale, l.uncertainty, l.source_region, l.target_region
            ));
        }
    }

    if !out.dropped_shifts.is_empty() {
        s.push_str("\nDropped shifts:\n");
        for d in &out.dropped_shifts {
            s.push_str(&format!("- {} / {}\n", d.function, d.shift));
        }
    }

    for skipped in &out.skipped_shapes {
        s.push_str(&format!(
            "  (skipped {} in {}) {}\n",
            skipped.shape, skipped.region, skipped.reason
        ));
    }

    if list_functions {
        s.push_str("\nFunctions:\n");
        for f in ws.functions() {
            s.push_str(&format!("{:<40} {}\n", f.name, f.node.label()));
        }
    }

    s
}

/// Fits required by the config, marking those absent from the cache.
pub fn format_plan(plan: &[FitKey], missing: &[FitKey]) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "Fits: {} required | {} cached | {} missing\n",
        plan.len(),
        plan.len() - missing.len(),
        missing.len()
    ));
    for key in plan {
        let mark = if missing.contains(key) { "missing" } else { "ok" };
        s.push_str(&format!("{mark:<8} {key}\n"));
    }
    s
}

pub fn format_samples(samples: &Samples) -> String {
    let mut s = String::new();
    s.push_str(&format!("{:>14} {:>18}\n", samples.variable, truncate(&samples.function, 18)));
    for (x, y) in samples.x.iter().zip(&samples.y) {
        s.push_str(&format!("{x:>14.6} {y:>18.10}\n"));
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
