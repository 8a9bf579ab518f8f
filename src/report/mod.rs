//! HTML report rendering
//!
//! Renders the per-configuration report and the run dashboard. Both are pure
//! functions of the run summary, so regenerating reports from
//! run_summary.json produces identical bytes. Only log-derived text (failure
//! details) is escaped; everything else is generated.

use std::collections::HashMap;
use std::fs;
use std::io;

use crate::aggregate::{ConfigSummary, RunSummary};
use crate::artifact::RunLayout;

const CONFIG_REPORT_CSS: &str = r#"    <style>
        body { font-family: Arial, sans-serif; margin: 20px; }
        table { border-collapse: collapse; width: 100%; }
        th, td { padding: 8px; text-align: left; border: 1px solid #ddd; }
        th { background-color: #f2f2f2; }
        tr.passed td:nth-child(2) { color: green; font-weight: bold; }
        tr.failed td:nth-child(2) { color: red; font-weight: bold; }
        tr.summary { font-weight: bold; background-color: #f2f2f2; }
        .summary-box {
            padding: 10px;
            margin-top: 20px;
            border-radius: 5px;
            text-align: center;
            font-weight: bold;
        }
        .success { background-color: #dff0d8; color: #3c763d; }
        .failure { background-color: #f2dede; color: #a94442; }
        .partial { background-color: #fcf8e3; color: #8a6d3b; }
    </style>
"#;

const DASHBOARD_CSS: &str = r#"    <style>
        body { font-family: Arial, sans-serif; margin: 20px; }
        table { border-collapse: collapse; width: 100%; margin-bottom: 20px; }
        th, td { padding: 8px; text-align: left; border: 1px solid #ddd; }
        th { background-color: #f2f2f2; }
        .dashboard-title { text-align: center; margin-bottom: 20px; }
        .summary { background-color: #f9f9f9; padding: 15px; margin-bottom: 20px; border-radius: 5px; }
        .config-table { margin-top: 30px; }
        .passed { color: green; font-weight: bold; }
        .failed { color: red; font-weight: bold; }
        .highlight { background-color: #ffffd0; }
        .summary-box {
            padding: 10px;
            margin-top: 20px;
            border-radius: 5px;
            text-align: center;
            font-weight: bold;
        }
        .success { background-color: #dff0d8; color: #3c763d; }
        .failure { background-color: #f2dede; color: #a94442; }
        .partial { background-color: #fcf8e3; color: #8a6d3b; }
    </style>
"#;

/// Heat map cell color for an integer pass rate in percent: red at 0,
/// green at 100, blue held constant.
pub fn heat_color(rate: u32) -> (u8, u8, u8) {
    let rate = i64::from(rate);
    let r = (255 - rate * 2).clamp(0, 255) as u8;
    let g = (55 + rate * 2).clamp(0, 255) as u8;
    (r, g, 50)
}

/// Escape text destined for HTML body or attribute positions.
fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn render_date(run: &RunSummary) -> String {
    run.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn partial_banner(run: &RunSummary) -> String {
    if !run.partial {
        return String::new();
    }
    format!(
        "    <div class=\"summary-box partial\">\n        PARTIAL RUN: cancelled with {} of {} tests unresolved\n    </div>\n",
        run.total_unknown(),
        run.total_jobs()
    )
}

/// Render the report page for one configuration.
pub fn render_config_report(run: &RunSummary, config: &ConfigSummary) -> String {
    let title = format!(
        "Test Report: WIDTH={}, PIPE_STAGES={}",
        config.config.width, config.config.pipe_stages
    );

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str(&format!("    <title>{}</title>\n", title));
    html.push_str(CONFIG_REPORT_CSS);
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("    <h1>{}</h1>\n", title));
    html.push_str(&format!(
        "    <p><strong>Date:</strong> {}</p>\n",
        render_date(run)
    ));
    html.push_str(&partial_banner(run));

    html.push_str("\n    <h2>Results</h2>\n    <table>\n");
    html.push_str(
        "        <tr>\n            <th>Module</th>\n            <th>Status</th>\n            <th>Time (sec)</th>\n            <th>Detail</th>\n            <th>Log File</th>\n        </tr>\n",
    );

    for module in &config.modules {
        let detail = module
            .detail
            .as_deref()
            .map(html_escape)
            .unwrap_or_default();
        html.push_str(&format!(
            "        <tr class=\"{}\">\n            <td>Module {}</td>\n            <td>{}</td>\n            <td>{:.1}</td>\n            <td>{}</td>\n            <td><a href=\"{}\" target=\"_blank\">View Log</a></td>\n        </tr>\n",
            module.status.css_class(),
            module.module_id,
            module.status.label(),
            module.duration_ms as f64 / 1000.0,
            detail,
            RunLayout::log_file_name(module.module_id),
        ));
    }

    html.push_str(&format!(
        "        <tr class=\"summary\">\n            <td>TOTAL</td>\n            <td>{} passed, {} failed</td>\n            <td>{:.1}</td>\n            <td></td>\n            <td></td>\n        </tr>\n    </table>\n",
        config.passed,
        config.failed,
        config.duration_ms as f64 / 1000.0,
    ));

    if config.failed == 0 {
        html.push_str("    <div class=\"summary-box success\">\n        ALL TESTS PASSED! 🎉\n    </div>\n");
    } else {
        html.push_str(&format!(
            "    <div class=\"summary-box failure\">\n        SOME TESTS FAILED! ❌ ({} out of {})\n    </div>\n",
            config.failed,
            config.total()
        ));
    }

    html.push_str("    <p><a href=\"../dashboard.html\">Back to Dashboard</a></p>\n</body>\n</html>\n");
    html
}

/// Render the run dashboard: overall summary, per-configuration results,
/// pass-rate heat map.
pub fn render_dashboard(run: &RunSummary) -> String {
    let mut widths: Vec<u32> = run.configs.iter().map(|c| c.config.width).collect();
    widths.sort_unstable();
    widths.dedup();
    let mut stages: Vec<u32> = run.configs.iter().map(|c| c.config.pipe_stages).collect();
    stages.sort_unstable();
    stages.dedup();

    let by_config: HashMap<(u32, u32), &ConfigSummary> = run
        .configs
        .iter()
        .map(|c| ((c.config.width, c.config.pipe_stages), c))
        .collect();

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str("    <title>Simulation Test Dashboard</title>\n");
    html.push_str(DASHBOARD_CSS);
    html.push_str("</head>\n<body>\n");
    html.push_str("    <h1 class=\"dashboard-title\">Simulation Test Dashboard</h1>\n");
    html.push_str(&partial_banner(run));

    html.push_str("\n    <div class=\"summary\">\n        <h2>Overall Summary</h2>\n");
    html.push_str(&format!(
        "        <p><strong>Date:</strong> {}</p>\n",
        render_date(run)
    ));
    html.push_str(&format!(
        "        <p><strong>Configurations Tested:</strong> {}x{} = {}</p>\n",
        widths.len(),
        stages.len(),
        run.configs.len()
    ));
    html.push_str(&format!(
        "        <p><strong>Total Tests:</strong> {}</p>\n",
        run.total_jobs()
    ));
    html.push_str(&format!(
        "        <p><strong>Tests Passed:</strong> <span class=\"passed\">{}</span></p>\n",
        run.total_passed
    ));
    html.push_str(&format!(
        "        <p><strong>Tests Failed:</strong> <span class=\"failed\">{}</span></p>\n",
        run.total_failed
    ));
    if run.partial {
        html.push_str(&format!(
            "        <p><strong>Unresolved:</strong> {}</p>\n",
            run.total_unknown()
        ));
    }
    html.push_str(&format!(
        "        <p><strong>Total Runtime:</strong> {:.1} seconds</p>\n    </div>\n",
        run.wall_ms as f64 / 1000.0
    ));

    html.push_str("\n    <h2>Configuration Results</h2>\n    <table class=\"config-table\">\n");
    html.push_str(
        "        <tr>\n            <th>Width</th>\n            <th>Pipeline Stages</th>\n            <th>Pass</th>\n            <th>Fail</th>\n            <th>Time (sec)</th>\n            <th>Actions</th>\n        </tr>\n",
    );
    for config in &run.configs {
        let row_class = if config.failed > 0 { "highlight" } else { "" };
        html.push_str(&format!(
            "        <tr class=\"{}\">\n            <td>{}</td>\n            <td>{}</td>\n            <td class=\"passed\">{}</td>\n            <td class=\"failed\">{}</td>\n            <td>{:.1}</td>\n            <td><a href=\"{}/report.html\">View Details</a></td>\n        </tr>\n",
            row_class,
            config.config.width,
            config.config.pipe_stages,
            config.passed,
            config.failed,
            config.duration_ms as f64 / 1000.0,
            config.config.dir_name(),
        ));
    }
    html.push_str("    </table>\n");

    html.push_str("\n    <h2>Heat Map: Pass Rate by Configuration</h2>\n    <table class=\"config-table\">\n");
    html.push_str("        <tr>\n            <th>Width / Pipeline Stages</th>\n");
    for stage in &stages {
        html.push_str(&format!("            <th>{}</th>\n", stage));
    }
    html.push_str("        </tr>\n");

    for width in &widths {
        html.push_str(&format!("        <tr>\n            <td>{}</td>\n", width));
        for stage in &stages {
            match by_config.get(&(*width, *stage)) {
                Some(config) => {
                    let rate = config.pass_rate();
                    let (r, g, b) = heat_color(rate);
                    html.push_str(&format!(
                        "            <td style=\"background-color: rgb({}, {}, {}); color: white; text-align: center;\">{}%</td>\n",
                        r, g, b, rate
                    ));
                }
                None => html.push_str("            <td>N/A</td>\n"),
            }
        }
        html.push_str("        </tr>\n");
    }
    html.push_str("    </table>\n");

    let (box_class, box_text) = if run.total_failed == 0 {
        ("success", "ALL TESTS PASSED! 🎉".to_string())
    } else {
        (
            "failure",
            format!(
                "SOME TESTS FAILED! ❌ ({} out of {})",
                run.total_failed,
                run.total_jobs()
            ),
        )
    };
    html.push_str(&format!(
        "\n    <div class=\"summary-box {}\">\n        {}\n    </div>\n</body>\n</html>\n",
        box_class, box_text
    ));
    html
}

/// Write the dashboard and every per-configuration report into the run
/// directory.
pub fn write_reports(run: &RunSummary, layout: &RunLayout) -> io::Result<()> {
    for config in &run.configs {
        let html = render_config_report(run, config);
        fs::write(layout.config_report_path(&config.config), html)?;
    }
    fs::write(layout.dashboard_path(), render_dashboard(run))?;
    Ok(())
}
