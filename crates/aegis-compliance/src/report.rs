//! Markdown rendering of compliance reports.

use crate::evaluator::{ComplianceReport, Standard};

/// Render a report as Markdown: header, summary, then one block per
/// requirement.
pub fn render_markdown(report: &ComplianceReport) -> String {
    let mut out = String::new();

    out.push_str("# Disaster Recovery Compliance Report\n\n");
    out.push_str(&format!(
        "- Generated: {}\n",
        report.generated_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    ));
    out.push_str(&format!(
        "- Overall compliance: **{}**\n\n",
        if report.compliant { "PASS" } else { "FAIL" }
    ));

    out.push_str("## Summary\n\n");
    let passed = report.requirements.iter().filter(|r| r.passed).count();
    out.push_str(&format!(
        "- Requirements passed: {}/{}\n",
        passed,
        report.requirements.len()
    ));
    for standard in Standard::ALL {
        let (passed, total) = report.by_standard(standard);
        if total > 0 {
            out.push_str(&format!("- {}: {}/{}\n", standard, passed, total));
        }
    }
    out.push('\n');

    out.push_str("## Requirements\n\n");
    for requirement in &report.requirements {
        out.push_str(&format!(
            "### {} — {}\n\n",
            requirement.name,
            if requirement.passed { "PASS" } else { "FAIL" }
        ));
        out.push_str(&format!("- Standard: {}\n", requirement.standard));
        out.push_str(&format!("- Severity: {:?}\n", requirement.severity));
        out.push_str(&format!("- Details: {}\n", requirement.details));
        if !requirement.recommendations.is_empty() {
            out.push_str("- Recommendations:\n");
            for recommendation in &requirement.recommendations {
                out.push_str(&format!("  - {}\n", recommendation));
            }
        }
        out.push('\n');
    }

    out
}
