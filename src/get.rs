//! Plain-text rendering of defects for `alm show` and `alm list`.

use crate::models::Defect;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// `P1-Critical` → `P1`; anything else unchanged.
fn short_priority(priority: Option<&str>) -> &str {
    match priority {
        Some(p) if p.starts_with('P') && p.contains('-') => p.split('-').next().unwrap_or(p),
        Some(p) => p,
        None => "-",
    }
}

/// Owners often look like `jane.doe_example.com`; keep the part before `_`.
fn short_owner(owner: Option<&str>) -> String {
    let owner = owner.unwrap_or("-");
    let owner = owner.split('_').next().unwrap_or(owner);
    truncate(owner, 15)
}

/// Markdown view of a single defect: heading, status line, metadata table,
/// then description and dev comments when present.
pub fn format_defect(d: &Defect) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("# Defect #{}: {}", d.id, d.name));
    lines.push(String::new());

    let mut status = vec![
        format!("**Status:** {}", d.status.as_deref().unwrap_or("Unknown")),
        format!("**Priority:** {}", d.priority.as_deref().unwrap_or("Unknown")),
    ];
    if let Some(ref owner) = d.owner {
        status.push(format!("**Owner:** {}", owner));
    }
    lines.push(status.join(" | "));
    lines.push(String::new());

    lines.push("| Field | Value |".to_string());
    lines.push("|-------|-------|".to_string());
    let fields = [
        ("Detected by", &d.detected_by),
        ("Created", &d.created),
        ("Modified", &d.modified),
        ("Closed", &d.closed),
        ("Severity", &d.severity),
        ("Application", &d.application),
        ("Workstream", &d.workstream),
        ("Module", &d.module),
        ("Type", &d.defect_type),
        ("Target date", &d.target_date),
        ("Detected in release", &d.detected_in_rel),
        ("Detected in cycle", &d.detected_in_rcyc),
    ];
    for (label, value) in fields {
        if let Some(v) = value {
            lines.push(format!("| {} | {} |", label, v));
        }
    }
    if let Some(t) = d.actual_fix_time {
        lines.push(format!("| Actual fix time | {} |", t));
    }
    lines.push(String::new());

    if let Some(ref desc) = d.description {
        lines.push("## Description".to_string());
        lines.push(String::new());
        lines.push(desc.clone());
        lines.push(String::new());
    }
    if let Some(ref comments) = d.dev_comments {
        lines.push("## Dev Comments".to_string());
        lines.push(String::new());
        lines.push(comments.clone());
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Compact one-line-per-defect table with a count footer.
pub fn format_defect_table(defects: &[Defect], total: Option<usize>) -> String {
    if defects.is_empty() {
        return "No defects found".to_string();
    }

    let rows: Vec<[String; 5]> = defects
        .iter()
        .map(|d| {
            [
                format!("#{}", d.id),
                d.status.clone().unwrap_or_else(|| "-".to_string()),
                short_priority(d.priority.as_deref()).to_string(),
                truncate(&d.name, 45),
                short_owner(d.owner.as_deref()),
            ]
        })
        .collect();

    let header = ["ID", "Status", "Pri", "Name", "Owner"];
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let render = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{}{}", c, " ".repeat(w.saturating_sub(c.chars().count()))))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![render(&header)];
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push(render(&cells));
    }
    out.push(String::new());
    match total {
        Some(total) if total > defects.len() => {
            out.push(format!("Showing {} of {} defects", defects.len(), total))
        }
        _ => out.push(format!("{} defects", defects.len())),
    }
    out.join("\n")
}
