use super::literal::OpaqueLiteral;
use super::program::{Program, SectionKind};

/// Render a program as a standalone Python script.
pub fn render(program: &Program) -> Result<String, String> {
    let mut doc = program.title.clone();
    if !program.description.trim().is_empty() {
        doc.push_str("\n\n");
        doc.push_str(program.description.trim());
    }
    doc.push_str(&format!(
        "\n\nGenerated by flowsmith from flow {}.\n\nRequirements:\n",
        program.flow_id
    ));
    for req in &program.requirements {
        doc.push_str(&format!("    {}\n", req));
    }

    let mut out = String::new();
    out.push_str("#!/usr/bin/env python\n");
    out.push_str("# -*- coding: utf-8 -*-\n");
    out.push_str(&OpaqueLiteral::doc(&doc).render()?);
    out.push('\n');

    let top_level = [
        (SectionKind::Imports, None),
        (SectionKind::Models, Some("# Models")),
        (SectionKind::Tools, Some("# Tools")),
        (SectionKind::Agent, Some("# Agents")),
        (SectionKind::Registrations, Some("# Registrations")),
    ];
    for (kind, heading) in top_level {
        let mut first = true;
        for section in program.sections(kind) {
            out.push('\n');
            if first {
                if let Some(h) = heading {
                    out.push('\n');
                    out.push_str(h);
                    out.push('\n');
                }
                first = false;
            }
            push_lines(&mut out, &section.lines, 0);
        }
    }

    out.push_str("\n\ndef main():\n");
    out.push_str("    \"\"\"Run the flow's chats in order.\"\"\"\n");
    for kind in [SectionKind::RunSetup, SectionKind::Chat] {
        for section in program.sections(kind) {
            push_lines(&mut out, &section.lines, 1);
        }
    }
    out.push_str("    return results\n");
    out.push_str("\n\nif __name__ == \"__main__\":\n    main()\n");
    Ok(out)
}

fn push_lines(out: &mut String, lines: &[String], depth: usize) {
    for line in lines {
        if !line.is_empty() {
            out.push_str(&"    ".repeat(depth));
            out.push_str(line);
        }
        out.push('\n');
    }
}
