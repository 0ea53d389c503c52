//! Prompt Template Binder.
//!
//! Templates use a small handlebars-like syntax:
//!
//! - `{{field}}` or `{{{field}}}` substitutes a validated text field verbatim
//! - `{{media url=field}}` attaches a data-URI field as a media part
//!
//! Templates are compiled against their flow's input schema when the flow is
//! registered, so every placeholder is known to name a real, required field
//! before any request arrives. Rendering never escapes anything.

use serde::Serialize;
use thiserror::Error;

use crate::schema::{InputSchema, ValidatedValues};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("template '{template}': unterminated placeholder at byte {offset}")]
    Unterminated { template: String, offset: usize },

    #[error("template '{template}': empty placeholder at byte {offset}")]
    EmptyPlaceholder { template: String, offset: usize },

    #[error("template '{template}': malformed placeholder '{placeholder}'")]
    Malformed {
        template: String,
        placeholder: String,
    },

    #[error("template '{template}': placeholder references unknown field '{field}'")]
    UnknownField { template: String, field: String },

    #[error("template '{template}': media placeholder on non data-URI field '{field}'")]
    MediaOnTextField { template: String, field: String },

    #[error("template '{template}': placeholder references optional field '{field}'")]
    OptionalField { template: String, field: String },

    #[error("template '{template}': no value bound for '{field}'")]
    Unbound { template: String, field: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(String),
    Media(String),
}

/// A compiled template: literal segments plus placeholder references.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

/// One part of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPart {
    Text(String),
    /// A `data:` URI, forwarded unmodified.
    Media(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPrompt {
    pub parts: Vec<PromptPart>,
}

impl RenderedPrompt {
    /// Text parts only, joined. Used for logging.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text(t) => Some(t.as_str()),
                PromptPart::Media(_) => None,
            })
            .collect()
    }

    pub fn media_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, PromptPart::Media(_)))
            .count()
    }
}

impl Template {
    pub fn compile(
        name: impl Into<String>,
        source: &str,
        schema: &InputSchema,
    ) -> Result<Self, TemplateError> {
        let name = name.into();
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start..];
            let (open_len, close) = if after_open.starts_with("{{{") {
                (3, "}}}")
            } else {
                (2, "}}")
            };
            let inner_start = start + open_len;
            let inner_len =
                rest[inner_start..]
                    .find(close)
                    .ok_or_else(|| TemplateError::Unterminated {
                        template: name.clone(),
                        offset: offset + start,
                    })?;
            let inner = rest[inner_start..inner_start + inner_len].trim();

            segments.push(parse_placeholder(&name, inner, offset + start, schema)?);

            let consumed = inner_start + inner_len + close.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { name, segments })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of every field the template references, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(f) | Segment::Media(f) => Some(f.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Substitutes `values` into the template. Deterministic.
    pub fn render(&self, values: &ValidatedValues) -> Result<RenderedPrompt, TemplateError> {
        let mut parts = Vec::new();
        let mut text = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => text.push_str(lit),
                Segment::Field(field) => text.push_str(self.lookup(values, field)?),
                Segment::Media(field) => {
                    let url = self.lookup(values, field)?;
                    if !text.is_empty() {
                        parts.push(PromptPart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(PromptPart::Media(url.to_string()));
                }
            }
        }
        if !text.is_empty() {
            parts.push(PromptPart::Text(text));
        }

        Ok(RenderedPrompt { parts })
    }

    fn lookup<'v>(&self, values: &'v ValidatedValues, field: &str) -> Result<&'v str, TemplateError> {
        values.get(field).ok_or_else(|| TemplateError::Unbound {
            template: self.name.clone(),
            field: field.to_string(),
        })
    }
}

fn parse_placeholder(
    template: &str,
    inner: &str,
    offset: usize,
    schema: &InputSchema,
) -> Result<Segment, TemplateError> {
    if inner.is_empty() {
        return Err(TemplateError::EmptyPlaceholder {
            template: template.to_string(),
            offset,
        });
    }

    let malformed = || TemplateError::Malformed {
        template: template.to_string(),
        placeholder: inner.to_string(),
    };

    let (is_media, field) = match inner.strip_prefix("media") {
        Some(args) if args.starts_with(char::is_whitespace) => {
            let field = args
                .trim()
                .strip_prefix("url=")
                .ok_or_else(malformed)?
                .trim();
            (true, field)
        }
        _ => (false, inner),
    };

    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(malformed());
    }

    let declared = schema
        .field(field)
        .ok_or_else(|| TemplateError::UnknownField {
            template: template.to_string(),
            field: field.to_string(),
        })?;

    // Validated values always carry required fields, so rendering can't miss one.
    if !declared.is_required() {
        return Err(TemplateError::OptionalField {
            template: template.to_string(),
            field: field.to_string(),
        });
    }

    if is_media {
        if !declared.is_data_uri() {
            return Err(TemplateError::MediaOnTextField {
                template: template.to_string(),
                field: field.to_string(),
            });
        }
        Ok(Segment::Media(field.to_string()))
    } else {
        Ok(Segment::Field(field.to_string()))
    }
}
