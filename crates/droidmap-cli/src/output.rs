//! Writing run results to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use droidmap_core::catalogue::Catalogue;
use droidmap_core::report::{render_diagram, CoverageReport, DiagramFormat};
use serde::Serialize;
use tracing::info;

use crate::paths::sanitize_package_name;

/// Files written for one run.
#[derive(Debug, Clone, Serialize)]
pub struct WrittenArtifacts {
    pub report: PathBuf,
    pub catalogue: PathBuf,
    pub diagrams: Vec<PathBuf>,
}

/// Write the report, the catalogue export and both diagram renderings.
///
/// Files are named `{package}_report.json`, `{package}_catalogue.json` and
/// `{package}_graph.{mmd,dot}`.
pub async fn write_artifacts(
    dir: &Path,
    catalogue: &Catalogue,
    report: &CoverageReport,
) -> Result<WrittenArtifacts> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let stem = sanitize_package_name(catalogue.app_name());

    let report_path = dir.join(format!("{stem}_report.json"));
    write_json(&report_path, report).await?;

    let catalogue_path = dir.join(format!("{stem}_catalogue.json"));
    write_json(&catalogue_path, &catalogue.export()).await?;

    let mut diagrams = Vec::new();
    for format in [DiagramFormat::Mermaid, DiagramFormat::Dot] {
        let path = dir.join(format!("{stem}_graph.{}", format.extension()));
        let text = render_diagram(catalogue.graph(), format);
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        diagrams.push(path);
    }

    info!(dir = %dir.display(), "Wrote run artifacts");
    Ok(WrittenArtifacts {
        report: report_path,
        catalogue: catalogue_path,
        diagrams,
    })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidmap_core::page::{CaptureInput, Page};

    #[tokio::test]
    async fn writes_all_files() {
        let dir = std::env::temp_dir().join(format!("droidmap-out-{}", uuid::Uuid::new_v4()));
        let mut catalogue = Catalogue::new("com.example.shop");
        catalogue.register_page(Page::from_capture(
            CaptureInput {
                current_app: "com.example.shop/.Main".into(),
                ui_hierarchy: r#"<node text="Home" resource-id="title" />"#.into(),
                ..Default::default()
            },
            chrono::Utc::now(),
        ));
        let report = CoverageReport::generate(&catalogue, false);

        let written = write_artifacts(&dir, &catalogue, &report).await.unwrap();

        assert_eq!(written.report, dir.join("com.example.shop_report.json"));
        let json = std::fs::read_to_string(&written.report).unwrap();
        let parsed: CoverageReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.total_pages, 1);
        assert!(written.catalogue.exists());
        assert_eq!(written.diagrams.len(), 2);
        let mermaid = std::fs::read_to_string(&written.diagrams[0]).unwrap();
        assert!(mermaid.starts_with("graph TD"));
        assert!(written.diagrams[1].to_string_lossy().ends_with("_graph.dot"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
