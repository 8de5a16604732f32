use serde_json::{json, Value};

use super::program::{Program, SectionKind};

/// Render a program as an nbformat 4.4 notebook.
///
/// Cells, in order: markdown title, `%pip install`, imports, models, tools,
/// one per agent or group chat, registrations, one per chat invocation.
pub fn render(program: &Program) -> Result<String, String> {
    let mut cells = Vec::new();

    let mut title = format!("# {}", program.title.replace(['\r', '\n'], " "));
    if !program.description.trim().is_empty() {
        title.push_str("\n\n");
        title.push_str(program.description.trim());
    }
    title.push_str(&format!("\n\nGenerated by flowsmith from flow `{}`.", program.flow_id));
    cells.push(markdown_cell(&title));

    if !program.requirements.is_empty() {
        let packages: Vec<String> = program
            .requirements
            .iter()
            .map(|r| format!("\"{}\"", r.replace('"', "")))
            .collect();
        cells.push(code_cell(&[format!("%pip install -q {}", packages.join(" "))]));
    }

    for kind in [
        SectionKind::Imports,
        SectionKind::Models,
        SectionKind::Tools,
        SectionKind::Agent,
        SectionKind::Registrations,
    ] {
        for section in program.sections(kind) {
            cells.push(code_cell(&section.lines));
        }
    }

    // The run setup opens the first chat cell.
    let mut pending: Vec<String> = program
        .sections(SectionKind::RunSetup)
        .flat_map(|s| s.lines.iter().cloned())
        .collect();
    for section in program.sections(SectionKind::Chat) {
        let mut lines = std::mem::take(&mut pending);
        lines.extend(section.lines.iter().cloned());
        cells.push(code_cell(&lines));
    }

    let notebook = json!({
        "cells": cells,
        "metadata": {
            "kernelspec": {
                "display_name": "Python 3",
                "language": "python",
                "name": "python3"
            },
            "language_info": {
                "name": "python"
            }
        },
        "nbformat": 4,
        "nbformat_minor": 4
    });
    let mut out = serde_json::to_string_pretty(&notebook).map_err(|e| e.to_string())?;
    out.push('\n');
    Ok(out)
}

fn source(lines: &[String]) -> Value {
    let count = lines.len();
    let parts: Vec<Value> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i + 1 < count {
                Value::String(format!("{}\n", line))
            } else {
                Value::String(line.clone())
            }
        })
        .collect();
    Value::Array(parts)
}

fn markdown_cell(text: &str) -> Value {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    json!({
        "cell_type": "markdown",
        "metadata": {},
        "source": source(&lines)
    })
}

fn code_cell(lines: &[String]) -> Value {
    json!({
        "cell_type": "code",
        "execution_count": null,
        "metadata": {},
        "outputs": [],
        "source": source(lines)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_keeps_newlines_between_lines() {
        let value = source(&["a = 1".into(), "".into(), "b = 2".into()]);
        assert_eq!(value, json!(["a = 1\n", "\n", "b = 2"]));
    }
}
