//! PDF page rasterization via the poppler CLI tools.
//!
//! `pdfinfo` probes the page count and first-page geometry; `pdftoppm`
//! renders one page at a time so the running size budget can stop the
//! conversion early. Binary paths are overridable via `PDFINFO_BIN` /
//! `PDFTOPPM_BIN`. All failures degrade: the caller falls back to shipping
//! the original document when zero pages convert.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

use noticewire_common::{SizeBudget, StagedAttachment};

/// Target render resolution when the page geometry allows it.
const TARGET_DPI: u32 = 150;
/// Upper bound on the largest output dimension. Guards against pathological
/// aspect ratios and oversized scans blowing up the output images.
const MAX_DIMENSION_PX: u32 = 3000;
/// PDF points per inch.
const POINTS_PER_INCH: f64 = 72.0;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of probing a document with `pdfinfo`. Two states only; every
/// downstream branch keys off this rather than nesting its own fallbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    Succeeded {
        pages: u32,
        width_pt: f64,
        height_pt: f64,
    },
    Failed,
}

pub struct RasterOutcome {
    pub pages: Vec<StagedAttachment>,
    pub notes: Vec<String>,
}

/// Rasterize up to `max_pages` pages of `pdf_path` into `workdir`, charging
/// each rendered image against `budget`. Returns zero pages on total failure.
pub async fn rasterize(
    pdf_path: &Path,
    workdir: &Path,
    stem: &str,
    budget: &mut SizeBudget,
    max_pages: u32,
) -> RasterOutcome {
    let mut notes = Vec::new();

    let probe = probe_dimensions(pdf_path).await;
    let (dpi, page_limit, probed) = match probe {
        ProbeOutcome::Succeeded {
            pages,
            width_pt,
            height_pt,
        } => {
            if pages > max_pages {
                notes.push(format!("showing first {max_pages} of {pages} pages"));
            }
            (resolution_for(width_pt, height_pt), pages.min(max_pages), true)
        }
        ProbeOutcome::Failed => {
            warn!(pdf = %pdf_path.display(), "Page probe failed, rendering blind up to the page cap");
            (TARGET_DPI, max_pages, false)
        }
    };

    let mut rendered = Vec::new();
    for page in 1..=page_limit {
        let out = workdir.join(format!("{stem}-{page}"));
        let image = match render_page(pdf_path, page, dpi, &out).await {
            Some(image) => image,
            None if probed => {
                notes.push(format!("page {page} failed to render"));
                continue;
            }
            // Blind rendering: the first failing page is the end of the
            // document as far as we can tell.
            None => break,
        };

        let size = match tokio::fs::metadata(&image).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(image = %image.display(), error = %e, "Rendered page vanished");
                continue;
            }
        };

        if !budget.charge(size) {
            let _ = tokio::fs::remove_file(&image).await;
            notes.push(format!("pages from {page} omitted: size budget reached"));
            break;
        }

        rendered.push(StagedAttachment {
            path: image,
            size_bytes: size,
            display_name: format!("{stem}-{page}.png"),
        });
    }

    RasterOutcome {
        pages: rendered,
        notes,
    }
}

/// Probe page count and first-page geometry with `pdfinfo`.
pub async fn probe_dimensions(pdf_path: &Path) -> ProbeOutcome {
    let bin = std::env::var("PDFINFO_BIN").unwrap_or_else(|_| "pdfinfo".to_string());

    let result = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(&bin).arg(pdf_path).output(),
    )
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => {
            parse_pdfinfo(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(Ok(output)) => {
            warn!(
                pdf = %pdf_path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "pdfinfo exited with error"
            );
            ProbeOutcome::Failed
        }
        Ok(Err(e)) => {
            warn!(pdf = %pdf_path.display(), error = %e, "Failed to run pdfinfo");
            ProbeOutcome::Failed
        }
        Err(_) => {
            warn!(pdf = %pdf_path.display(), "pdfinfo timed out");
            ProbeOutcome::Failed
        }
    }
}

/// Parse `pdfinfo` stdout: needs a `Pages:` line and a `Page size:` line of
/// the form `Page size:      612 x 792 pts (letter)`.
fn parse_pdfinfo(stdout: &str) -> ProbeOutcome {
    let mut pages = None;
    let mut dims = None;

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("Pages:") {
            pages = rest.trim().parse::<u32>().ok();
        } else if let Some(rest) = line.strip_prefix("Page size:") {
            let mut parts = rest.trim().split_whitespace();
            let width = parts.next().and_then(|w| w.parse::<f64>().ok());
            let x = parts.next();
            let height = parts.next().and_then(|h| h.parse::<f64>().ok());
            if let (Some(w), Some("x"), Some(h)) = (width, x, height) {
                dims = Some((w, h));
            }
        }
    }

    match (pages, dims) {
        (Some(pages), Some((width_pt, height_pt))) if pages > 0 && width_pt > 0.0 && height_pt > 0.0 => {
            ProbeOutcome::Succeeded {
                pages,
                width_pt,
                height_pt,
            }
        }
        _ => ProbeOutcome::Failed,
    }
}

/// Resolution that hits ~150 DPI but keeps the largest output dimension under
/// `MAX_DIMENSION_PX`.
fn resolution_for(width_pt: f64, height_pt: f64) -> u32 {
    let largest_inches = width_pt.max(height_pt) / POINTS_PER_INCH;
    let at_target = largest_inches * TARGET_DPI as f64;
    if at_target <= MAX_DIMENSION_PX as f64 {
        return TARGET_DPI;
    }
    let clamped = (MAX_DIMENSION_PX as f64 / largest_inches).floor() as u32;
    clamped.max(36)
}

/// Render one page to PNG. `-singlefile` makes pdftoppm write exactly
/// `<out>.png` with no page-number padding games. Returns the image path, or
/// None on any failure.
async fn render_page(pdf_path: &Path, page: u32, dpi: u32, out: &Path) -> Option<PathBuf> {
    let bin = std::env::var("PDFTOPPM_BIN").unwrap_or_else(|_| "pdftoppm".to_string());

    let result = tokio::time::timeout(
        RENDER_TIMEOUT,
        Command::new(&bin)
            .arg("-png")
            .arg("-singlefile")
            .args(["-f", &page.to_string(), "-l", &page.to_string()])
            .args(["-r", &dpi.to_string()])
            .arg(pdf_path)
            .arg(out)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => {
            let image = out.with_extension("png");
            image.exists().then_some(image)
        }
        Ok(Ok(output)) => {
            warn!(
                pdf = %pdf_path.display(),
                page,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "pdftoppm exited with error"
            );
            None
        }
        Ok(Err(e)) => {
            warn!(pdf = %pdf_path.display(), page, error = %e, "Failed to run pdftoppm");
            None
        }
        Err(_) => {
            warn!(pdf = %pdf_path.display(), page, "pdftoppm timed out");
            None
        }
    }
}
