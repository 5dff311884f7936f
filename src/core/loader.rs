//! Document loading
//!
//! Loads a threat model document and, recursively, the child documents its
//! `children` key declares. Loading stops at parsing: no objects are built
//! here, only the raw mappings with enough source context for later error
//! reporting.

use miette::{Diagnostic, NamedSource, SourceSpan};
use serde_yml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::yaml::{find_entry_span, find_key_span, first_line_span, YamlSyntaxError};

/// A parsed document together with its recursively loaded children.
#[derive(Debug)]
pub struct Document {
    pub path: PathBuf,
    pub file_name: String,
    pub text: String,
    pub mapping: Mapping,
    pub children: Vec<Document>,
}

/// Errors raised while reading documents from disk.
#[derive(Debug, Error, Diagnostic)]
pub enum LoaderError {
    #[error("'{path}' is not a .yaml file")]
    #[diagnostic(
        code(tmkit::loader::extension),
        help("threat model documents must use the .yaml extension")
    )]
    Extension { path: PathBuf },

    #[error("failed to read '{path}'")]
    #[diagnostic(code(tmkit::loader::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] YamlSyntaxError),

    #[error("'{path}' does not contain a YAML mapping")]
    #[diagnostic(
        code(tmkit::loader::not_a_mapping),
        help("the top level of a threat model document must be a key/value mapping")
    )]
    NotAMapping {
        path: PathBuf,
        #[source_code]
        src: NamedSource<String>,
        #[label("expected a mapping")]
        span: SourceSpan,
    },

    #[error("child threat model '{child_id}' not found at '{attempted}'")]
    #[diagnostic(
        code(tmkit::loader::missing_child),
        help("a child with ID '<id>' must live at '<dir>/<id>/<id>.yaml', or name a file directly with an ID ending in '.yaml'")
    )]
    MissingChild {
        child_id: String,
        attempted: PathBuf,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("malformed 'children' entry in '{path}'")]
    #[diagnostic(
        code(tmkit::loader::malformed_children),
        help("each 'children' entry must be a mapping with a string 'ID' key")
    )]
    MalformedChildren {
        path: PathBuf,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },
}

/// Load a document and every child document it declares.
pub fn load_document(path: &Path) -> Result<Document, LoaderError> {
    if path.extension().map_or(true, |e| e != "yaml") {
        return Err(LoaderError::Extension {
            path: path.to_path_buf(),
        });
    }

    let text = fs::read_to_string(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let value: Value = serde_yml::from_str(&text)
        .map_err(|e| YamlSyntaxError::from_serde_error(&e, &text, &file_name))?;

    let mapping = match value {
        Value::Mapping(m) => m,
        _ => {
            return Err(LoaderError::NotAMapping {
                path: path.to_path_buf(),
                span: first_line_span(&text),
                src: NamedSource::new(&file_name, text),
            })
        }
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let children = load_children(&mapping, &text, &file_name, path, dir)?;

    Ok(Document {
        path: path.to_path_buf(),
        file_name,
        text,
        mapping,
        children,
    })
}

fn load_children(
    mapping: &Mapping,
    text: &str,
    file_name: &str,
    path: &Path,
    dir: &Path,
) -> Result<Vec<Document>, LoaderError> {
    let entries = match mapping.get("children") {
        Some(Value::Sequence(seq)) => seq,
        Some(_) => {
            return Err(LoaderError::MalformedChildren {
                path: path.to_path_buf(),
                span: find_key_span(text, "children").unwrap_or_else(|| first_line_span(text)),
                src: NamedSource::new(file_name, text.to_string()),
            })
        }
        None => return Ok(Vec::new()),
    };

    let mut children = Vec::with_capacity(entries.len());
    for entry in entries {
        let child_id = entry
            .as_mapping()
            .and_then(|m| m.get("ID"))
            .and_then(Value::as_str)
            .ok_or_else(|| LoaderError::MalformedChildren {
                path: path.to_path_buf(),
                span: find_key_span(text, "children").unwrap_or_else(|| first_line_span(text)),
                src: NamedSource::new(file_name, text.to_string()),
            })?;

        let child_path = child_document_path(dir, child_id);
        if !child_path.is_file() {
            return Err(LoaderError::MissingChild {
                child_id: child_id.to_string(),
                attempted: child_path,
                span: find_entry_span(text, "ID", child_id)
                    .unwrap_or_else(|| first_line_span(text)),
                src: NamedSource::new(file_name, text.to_string()),
            });
        }

        children.push(load_document(&child_path)?);
    }

    Ok(children)
}

/// Resolve the on-disk location of a child document.
///
/// An ID ending in `.yaml` names a file next to the parent document.
/// Any other ID names a directory holding a file of the same name.
fn child_document_path(dir: &Path, child_id: &str) -> PathBuf {
    if child_id.ends_with(".yaml") {
        dir.join(child_id)
    } else {
        dir.join(child_id).join(format!("{child_id}.yaml"))
    }
}
