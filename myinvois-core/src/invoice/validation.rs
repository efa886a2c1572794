//! Pre-flight checks run before an invoice enters the signing pipeline.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The part of an invoice line the pre-flight pass looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub item_code: String,
    pub item_tax_template: Option<String>,
}

impl InvoiceLine {
    pub fn new(item_code: impl Into<String>, item_tax_template: Option<String>) -> Self {
        Self {
            item_code: item_code.into(),
            item_tax_template,
        }
    }

    fn has_tax_template(&self) -> bool {
        self.item_tax_template
            .as_deref()
            .is_some_and(|template| !template.trim().is_empty())
    }
}

/// How taxes are expressed in the generated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxTemplateMode {
    /// Every line carries its own item tax template.
    PerItem,
    /// No line carries one; taxes come from the document-level template.
    DocumentLevel,
}

/// Structured validation error listing every offending line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed with {} issue(s)", issues.len())]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub line_index: usize,
    pub item_code: String,
    pub kind: ValidationKind,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Other lines carry an item tax template but this one does not.
    MissingTaxTemplate,
}

/// Item tax templates must be set on all lines or on none.
///
/// An empty line list counts as "all lines templated".
///
/// # Errors
/// Returns [`ValidationError`] naming each untemplated line when templates are
/// mixed.
pub fn validate_tax_templates(lines: &[InvoiceLine]) -> Result<TaxTemplateMode, ValidationError> {
    let templated = lines.iter().filter(|line| line.has_tax_template()).count();
    if templated == lines.len() {
        return Ok(TaxTemplateMode::PerItem);
    }
    if templated == 0 {
        return Ok(TaxTemplateMode::DocumentLevel);
    }

    let issues = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.has_tax_template())
        .map(|(line_index, line)| ValidationIssue {
            line_index,
            item_code: line.item_code.clone(),
            kind: ValidationKind::MissingTaxTemplate,
        })
        .collect();
    Err(ValidationError::new(issues))
}
