//! Diagram layout engines.

use crate::document::VectorDocument;
use crate::error::RenderError;
use crate::runtime::EngineSettings;

/// Turns a diagram description into SVG markup.
pub trait LayoutEngine {
    fn render(
        &self,
        diagram_id: &str,
        title: &str,
        description: &str,
        settings: &EngineSettings,
    ) -> Result<String, RenderError>;
}

impl<E: LayoutEngine + ?Sized> LayoutEngine for Box<E> {
    fn render(
        &self,
        diagram_id: &str,
        title: &str,
        description: &str,
        settings: &EngineSettings,
    ) -> Result<String, RenderError> {
        (**self).render(diagram_id, title, description, settings)
    }
}

/// Strips an optional fenced Markdown code block (```` ```mermaid ... ``` ````) around a
/// description.
pub fn clean_description(text: &str) -> &str {
    let mut out = text.trim();
    if let Some(rest) = out.strip_prefix("```mermaid") {
        out = rest.trim();
    }
    if let Some(rest) = out.strip_suffix("```") {
        out = rest.trim();
    }
    out
}

/// An engine whose descriptions are already SVG markup: it validates the markup and stamps the
/// diagram id (and title, when given) onto the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgMarkupEngine;

impl LayoutEngine for SvgMarkupEngine {
    fn render(
        &self,
        diagram_id: &str,
        title: &str,
        description: &str,
        _settings: &EngineSettings,
    ) -> Result<String, RenderError> {
        if description.trim().is_empty() {
            return Err(RenderError::EmptyDescription);
        }
        let mut doc = VectorDocument::parse(description)?;
        let root = doc.root_mut();
        if !diagram_id.is_empty() {
            root.set_attr("id", diagram_id);
        }
        if !title.is_empty() && !root.has_attr("aria-label") {
            root.set_attr("aria-label", title);
        }
        Ok(doc.to_svg_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_description_strips_fences() {
        assert_eq!(
            clean_description("  ```mermaid\nflowchart A --> B\n```  "),
            "flowchart A --> B"
        );
        assert_eq!(clean_description("graph TD; A;"), "graph TD; A;");
        assert_eq!(clean_description("```mermaid```"), "");
    }

    #[test]
    fn svg_engine_stamps_id_and_title() {
        let out = SvgMarkupEngine
            .render(
                "d7",
                "Flow",
                r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="1" height="1"/></svg>"#,
                &EngineSettings::default(),
            )
            .unwrap();
        let doc = VectorDocument::parse(&out).unwrap();
        assert_eq!(doc.attr("id"), Some("d7"));
        assert_eq!(doc.attr("aria-label"), Some("Flow"));
    }

    #[test]
    fn svg_engine_rejects_empty_and_non_svg_input() {
        let settings = EngineSettings::default();
        assert!(matches!(
            SvgMarkupEngine.render("d", "", "  ", &settings),
            Err(RenderError::EmptyDescription)
        ));
        assert!(matches!(
            SvgMarkupEngine.render("d", "", "flowchart A --> B", &settings),
            Err(RenderError::InvalidDocument { .. })
        ));
        assert!(matches!(
            SvgMarkupEngine.render("d", "", "<html/>", &settings),
            Err(RenderError::InvalidDocument { .. })
        ));
    }
}
