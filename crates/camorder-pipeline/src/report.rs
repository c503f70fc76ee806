//! Run log records
//!
//! Banners and summaries written at the edges of an order run, so a run log
//! reads as one self-contained record.

use camorder_core::{ComponentResult, ComponentStage, Order, OrderResult, RunStatus};
use std::path::Path;

const RULE: &str = "============================================================";

pub fn log_order_start(order: &Order, output_dir: &Path) {
    tracing::info!("{}", RULE);
    tracing::info!("ORDER START: {}", order.order_id);
    tracing::info!("Version: {}", order.version);
    tracing::info!(
        "Components: {} ({} parameter update(s))",
        order.components.len(),
        order.parameter_count()
    );
    tracing::info!("Output directory: {}", output_dir.display());
    tracing::info!("{}", RULE);
}

pub fn log_stage(component: &ComponentResult, from: ComponentStage, to: ComponentStage) {
    if to == ComponentStage::Failed {
        tracing::error!("[{}] {} -> {}", component.component_id, from, to);
    } else {
        tracing::info!("[{}] {} -> {}", component.component_id, from, to);
    }
}

pub fn log_component_end(component: &ComponentResult) {
    let elapsed = component.finished_at - component.started_at;
    match component.status() {
        RunStatus::Success => tracing::info!(
            "{} ({:.1}s)",
            component.describe(),
            elapsed.num_milliseconds() as f64 / 1000.0
        ),
        RunStatus::PartialSuccess => tracing::warn!(
            "{} ({:.1}s)",
            component.describe(),
            elapsed.num_milliseconds() as f64 / 1000.0
        ),
        RunStatus::Failed => tracing::error!(
            "{} ({:.1}s)",
            component.describe(),
            elapsed.num_milliseconds() as f64 / 1000.0
        ),
    }
}

pub fn log_order_end(result: &OrderResult) {
    let s = &result.summary;
    tracing::info!("{}", RULE);
    tracing::info!("ORDER END: {} - {}", result.order_id, result.status);
    tracing::info!(
        "Components: {} succeeded, {} partial, {} failed (of {})",
        s.components_succeeded,
        s.components_partial,
        s.components_failed,
        s.components_total
    );
    tracing::info!(
        "Parameters: {} updated, {} failed",
        s.parameters_updated,
        s.parameters_failed
    );
    tracing::info!(
        "Setups: {} regenerated, {} skipped, {} missing",
        s.setups_regenerated,
        s.setups_skipped,
        s.setups_missing
    );
    tracing::info!(
        "Programs: {} generated, {} failed",
        s.programs_generated,
        s.posts_failed
    );
    for artifact in result.artifacts() {
        tracing::info!("  {}", artifact.display());
    }
    tracing::info!("{}", RULE);
}
