//! Local diagram rendering.
//!
//! External renderers are used only when their binaries are already present
//! on PATH; nothing is ever fetched. When a renderer is missing or fails,
//! a deterministic fallback emits a simple but byte-stable SVG (or a fixed
//! placeholder PNG), so the run artifact set is complete either way.

use super::template::{DiagramFormat, DiagramTemplate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub renderer: String,
    pub available: bool,
    pub details: String,
}

/// Probe the three external renderers. PATH lookup only, no execution.
pub fn probe_renderers() -> Vec<ProbeResult> {
    [
        ("dot", "Graphviz dot"),
        ("mmdc", "Mermaid CLI"),
        ("plantuml", "PlantUML"),
    ]
    .into_iter()
    .map(|(binary, name)| match find_in_path(binary) {
        Some(path) => ProbeResult {
            renderer: binary.to_string(),
            available: true,
            details: format!("{name} at {}", path.display()),
        },
        None => ProbeResult {
            renderer: binary.to_string(),
            available: false,
            details: format!("{name} not on PATH; fallback renderer in use"),
        },
    })
    .collect()
}

fn renderer_binary(format: DiagramFormat) -> &'static str {
    match format {
        DiagramFormat::Mermaid => "mmdc",
        DiagramFormat::Plantuml => "plantuml",
        DiagramFormat::Graphviz => "dot",
    }
}

/// Locate a binary on PATH.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for directory in std::env::split_paths(&path_var) {
        let candidate = directory.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderResult {
    /// `"cli"` or `"fallback"`.
    pub rendered_with: String,
    /// Set when the CLI renderer failed and the fallback stepped in.
    pub cli_error: Option<String>,
}

/// Render the template source (already on disk) to `target`.
pub fn render(
    template: &DiagramTemplate,
    source_path: &Path,
    target: &Path,
    png: bool,
) -> RenderResult {
    let binary = renderer_binary(template.format);
    if let Some(cli) = find_in_path(binary) {
        match run_cli(template.format, &cli, source_path, target, png) {
            Ok(()) => {
                return RenderResult { rendered_with: "cli".to_string(), cli_error: None }
            }
            Err(error) => {
                write_fallback(template, target, png);
                return RenderResult {
                    rendered_with: "fallback".to_string(),
                    cli_error: Some(error),
                };
            }
        }
    }
    write_fallback(template, target, png);
    RenderResult { rendered_with: "fallback".to_string(), cli_error: None }
}

fn run_cli(
    format: DiagramFormat,
    cli: &Path,
    source_path: &Path,
    target: &Path,
    png: bool,
) -> Result<(), String> {
    let mut command = Command::new(cli);
    match format {
        DiagramFormat::Mermaid => {
            command.arg("-i").arg(source_path).arg("-o").arg(target);
        }
        DiagramFormat::Plantuml => {
            command.arg(if png { "-tpng" } else { "-tsvg" }).arg(source_path);
        }
        DiagramFormat::Graphviz => {
            command
                .arg(if png { "-Tpng" } else { "-Tsvg" })
                .arg(source_path)
                .arg("-o")
                .arg(target);
        }
    }
    let output = command.output().map_err(|err| err.to_string())?;
    if !output.status.success() {
        return Err(format!(
            "{} exited with {}",
            cli.display(),
            output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
        ));
    }
    // PlantUML writes next to the source; move the result into place.
    if format == DiagramFormat::Plantuml {
        let produced = source_path.with_extension(if png { "png" } else { "svg" });
        if produced.exists() && produced != target {
            std::fs::rename(&produced, target).map_err(|err| err.to_string())?;
        }
    }
    if !target.exists() {
        return Err("renderer produced no output file".to_string());
    }
    Ok(())
}

fn write_fallback(template: &DiagramTemplate, target: &Path, png: bool) {
    if png {
        let _ = std::fs::write(target, fallback_png());
    } else {
        let _ = std::fs::write(target, fallback_svg(template));
    }
}

/// Deterministic fallback: the template source typeset as monospace text.
pub fn fallback_svg(template: &DiagramTemplate) -> String {
    let lines: Vec<&str> = if template.content.is_empty() {
        vec!["(empty diagram)"]
    } else {
        template.content.lines().collect()
    };
    let theme = match template.theme_id.as_str() {
        "dark" => &super::theme::DARK,
        _ => &super::theme::LIGHT,
    };
    let padding = 16u32;
    let line_height = theme.font_size_pt + 6;
    let width =
        lines.iter().map(|l| l.len()).max().unwrap_or(1) as u32 * (theme.font_size_pt / 2)
            + padding * 2;
    let height = line_height * lines.len() as u32 + padding * 2;
    let mut svg = vec![
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string(),
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" role=\"img\" aria-label=\"{} {} diagram\">",
            template.preset.as_str(),
            template.format.as_str()
        ),
        format!(
            "  <rect x=\"0\" y=\"0\" width=\"100%\" height=\"100%\" fill=\"{}\"/>",
            theme.background
        ),
    ];
    let mut y = padding + theme.font_size_pt;
    for line in lines {
        svg.push(format!(
            "  <text x=\"{padding}\" y=\"{y}\" font-family=\"monospace\" font-size=\"{}\" fill=\"{}\">{}</text>",
            theme.font_size_pt,
            theme.foreground,
            escape_xml(line)
        ));
        y += line_height;
    }
    svg.push("</svg>".to_string());
    svg.join("\n") + "\n"
}

/// Fixed 1x1 placeholder so PNG output stays deterministic without any
/// raster dependency.
pub fn fallback_png() -> &'static [u8] {
    &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00,
        0x00, 0x90, 0x77, 0x53, 0xde, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, 0x54, 0x08,
        0x1d, 0x63, 0x60, 0x60, 0x60, 0x00, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x02,
        0x42, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ]
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::template::{build_template, project, DiagramPreset};
    use crate::diagram::theme::LIGHT;
    use crate::graph::KnowledgeGraph;

    fn template() -> DiagramTemplate {
        let projection = project(&KnowledgeGraph::default(), DiagramPreset::Tests);
        build_template(&projection, DiagramPreset::Tests, DiagramFormat::Mermaid, &LIGHT)
    }

    #[test]
    fn fallback_svg_is_byte_stable() {
        let template = template();
        assert_eq!(fallback_svg(&template), fallback_svg(&template));
        assert!(fallback_svg(&template).starts_with("<?xml"));
        assert!(fallback_svg(&template).ends_with("</svg>\n"));
    }

    #[test]
    fn fallback_svg_escapes_content() {
        let mut template = template();
        template.content = "a --> b <script>\n".to_string();
        let svg = fallback_svg(&template);
        assert!(svg.contains("a --&gt; b &lt;script&gt;"));
        assert!(!svg.contains("<script>"));
    }

    #[test]
    fn fallback_png_is_a_png() {
        assert_eq!(&fallback_png()[..8], &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn probe_reports_all_three_renderers() {
        let probes = probe_renderers();
        assert_eq!(probes.len(), 3);
        let names: Vec<&str> = probes.iter().map(|p| p.renderer.as_str()).collect();
        assert_eq!(names, vec!["dot", "mmdc", "plantuml"]);
    }

    #[test]
    fn missing_renderer_falls_back() {
        let tmp = tempfile::TempDir::new().unwrap();
        let template = template();
        let source = tmp.path().join(template.source_file_name());
        std::fs::write(&source, &template.content).unwrap();
        let target = tmp.path().join(template.rendered_file_name("svg"));

        // Run with an empty PATH so no CLI can be found.
        let old_path = std::env::var_os("PATH");
        std::env::set_var("PATH", "");
        let result = render(&template, &source, &target, false);
        if let Some(path) = old_path {
            std::env::set_var("PATH", path);
        }

        assert_eq!(result.rendered_with, "fallback");
        assert!(target.exists());
        let svg = std::fs::read_to_string(&target).unwrap();
        assert!(svg.starts_with("<?xml"));
    }
}
