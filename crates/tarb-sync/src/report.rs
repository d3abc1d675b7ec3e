use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tarb_core::TrendRecord;
use tokio::fs;

use crate::RunSummary;

/// Writes `run_summary.json` and `top_trends.md` under `<reports_root>/<run_id>/`.
pub async fn write_run_reports(
    reports_root: &Path,
    summary: &RunSummary,
    top: &[TrendRecord],
) -> Result<PathBuf> {
    let reports_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let summary_json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(reports_dir.join("run_summary.json"), summary_json)
        .await
        .context("writing run_summary.json")?;

    fs::write(reports_dir.join("top_trends.md"), top_trends_markdown(summary, top))
        .await
        .context("writing top_trends.md")?;

    Ok(reports_dir)
}

pub fn top_trends_markdown(summary: &RunSummary, top: &[TrendRecord]) -> String {
    let source_counts = summary
        .per_source_counts
        .iter()
        .map(|(source, n)| {
            let errors = summary.per_source_errors.get(source).map_or(0, Vec::len);
            format!("- {source}: {n} candidates, {errors} errors")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let rows = top
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "| {} | {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {} |",
                i + 1,
                r.source,
                r.title.replace('|', "\\|"),
                r.rising_score,
                r.velocity,
                r.recency,
                r.engagement,
                r.cluster.as_deref().unwrap_or("-"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "# Top Trends\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Processed: {}\n- Duplicate candidates: {}\n- Persist failures: {}\n- Clusters: {}\n\n## Sources\n{}\n\n## Rising\n| # | Source | Title | Rising | Velocity | Recency | Engagement | Cluster |\n|---|---|---|---|---|---|---|---|\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.processed,
        summary.duplicate_candidates,
        summary.persist_failures,
        summary.clusters,
        source_counts,
        rows,
    )
}
