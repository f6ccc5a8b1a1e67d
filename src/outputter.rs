use std::fmt::Write;

use assay::model::ExecutionResult;
use assay::model::ExecutionStatus;
use assay::model::SuiteResult;
use assay::model::SuiteStatus;
use assay::runner::RunEvent;
use assay::store::ResultStatistics;
use console::Style;
use flume::Receiver;
use indicatif::ProgressBar;
use indicatif::ProgressStyle;

const BAR_TEMPLATE: &str = "{spinner} [{pos}/{len}] {wide_msg}";

pub struct OutPutter;

impl OutPutter {
    /// Streams one line per finished test until the runner drops its sender,
    /// then prints a summary of everything that did not pass.
    pub async fn start(rx: Receiver<RunEvent>, path: &str) {
        let style = Style::new().bold().cyan();
        println!("{}", style.apply_to(format!("Running workspace: {path}")));

        let mut bar = ProgressBar::hidden();
        let mut failed: Vec<ExecutionResult> = vec![];
        let mut failed_suites: Vec<SuiteResult> = vec![];

        while let Ok(event) = rx.recv_async().await {
            match event {
                RunEvent::SuiteStarted { suite, total } => {
                    bar = new_bar(total as u64);
                    bar.println(format!(
                        "{}",
                        style.apply_to(format!("Suite `{suite}`: {total} tests"))
                    ));
                }
                RunEvent::TestFinished(result) => {
                    bar.inc(1);
                    bar.set_message(result.test_name.clone());
                    bar.println(test_line(bar.position(), bar.length(), &result));
                    if result.status != ExecutionStatus::Passed {
                        failed.push(*result);
                    }
                }
                RunEvent::SuiteFinished(suite) => {
                    bar.finish_and_clear();
                    println!("{}", suite_line(&suite));
                    if suite.status == SuiteStatus::Failed {
                        failed_suites.push(*suite);
                    }
                }
            }
        }

        println!();
        print!("{}", failure_summary(&failed, &failed_suites));
    }
}

fn new_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        bar.set_style(style);
    }
    bar
}

fn test_line(position: u64, total: Option<u64>, result: &ExecutionResult) -> String {
    let total = total.unwrap_or(position);
    let elapsed = result
        .response
        .as_ref()
        .map(|r| format!("{:.1}ms", r.elapsed_ms))
        .unwrap_or_default();

    let (mark, label) = match result.status {
        ExecutionStatus::Passed => (
            console::style("✔").green().bold(),
            console::style("PASS!").green().bold(),
        ),
        ExecutionStatus::Failed => (
            console::style("╳").red().bold(),
            console::style("FAILED!").red().bold(),
        ),
        ExecutionStatus::Error | ExecutionStatus::Running => (
            console::style("!").yellow().bold(),
            console::style("ERROR!").yellow().bold(),
        ),
    };

    format!(
        "[{position}/{total}] {mark}  {} {} {} {}",
        result.test_name,
        console::style(&result.method).dim(),
        console::style(elapsed).dim(),
        label
    )
}

fn suite_line(suite: &SuiteResult) -> String {
    let counts = format!(
        "{} passed, {} failed of {} in {:.1}ms",
        suite.passed_tests, suite.failed_tests, suite.total_tests, suite.total_time_ms
    );

    match (suite.status, &suite.error) {
        (SuiteStatus::Completed, _) => format!(
            "{} {counts}",
            console::style(format!("Suite `{}` completed:", suite.suite_name))
                .green()
                .bold()
        ),
        (_, Some(error)) => format!(
            "{} {counts}\n  {}",
            console::style(format!("Suite `{}` failed:", suite.suite_name))
                .red()
                .bold(),
            console::style(error).red()
        ),
        (_, None) => format!(
            "{} {counts}",
            console::style(format!("Suite `{}` failed:", suite.suite_name))
                .red()
                .bold()
        ),
    }
}

/// Lists failed tests, then suites that failed without a failing test (a
/// persistence fault, for instance).
fn failure_summary(failed: &[ExecutionResult], failed_suites: &[SuiteResult]) -> String {
    let mut out = String::new();

    if failed.is_empty() && failed_suites.is_empty() {
        let _ = writeln!(out, "{}", console::style("All tests passed! 🎉").bold().green());
        return out;
    }

    if !failed.is_empty() {
        let _ = writeln!(out, "{}", console::style("Summary of Failed Tests:").bold().red());
    }
    for (idx, result) in failed.iter().enumerate() {
        let _ = writeln!(out, "\n{}. {}", idx + 1, console::style(&result.test_name).bold());

        if let Some(error) = &result.error_message {
            let _ = writeln!(out, "  {} {error}", console::style("Request failed:").yellow());
            continue;
        }

        let Some(evaluation) = &result.evaluation else {
            continue;
        };
        for outcome in evaluation.assertions.iter().filter(|o| !o.passed) {
            let _ = writeln!(out, "  {outcome}");
        }
        if let Some(script) = evaluation.script.as_ref().filter(|s| !s.passed) {
            let _ = writeln!(out, "  {} {}", console::style("Script:").red(), script.message);
        }
    }

    let aborted: Vec<_> = failed_suites.iter().filter(|s| s.error.is_some()).collect();
    if !aborted.is_empty() {
        let _ = writeln!(out, "\n{}", console::style("Suites aborted:").bold().red());
    }
    for suite in aborted {
        let _ = writeln!(
            out,
            "  {} {}",
            console::style(&suite.suite_name).bold(),
            suite.error.as_deref().unwrap_or_default()
        );
    }

    out
}

pub fn print_statistics(stats: &ResultStatistics) {
    println!();
    println!("{}", console::style("Statistics").bold().cyan());
    println!(
        "  total {}  passed {}  failed {}  error {}",
        stats.total_results,
        console::style(stats.passed_results).green(),
        console::style(stats.failed_results).red(),
        console::style(stats.error_results).yellow(),
    );
    println!(
        "  success rate {:.1}%  average response {:.2}ms",
        stats.success_rate, stats.average_response_time
    );
}
