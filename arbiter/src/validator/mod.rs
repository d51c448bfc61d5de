//! Deterministic validation of generated code blocks.
//!
//! Trust the rule, not the model: fenced code blocks are extracted and
//! checked mechanically before any reviewer sees them. Two layers:
//!
//! 1. A structural syntax scan per block (delimiter balance, string
//!    termination) with line/column positions. Cheap, side-effect free,
//!    always on.
//! 2. An opt-in execution probe through the [`SandboxRuntime`]: run the block
//!    in an isolated interpreter with a hard timeout and report the final
//!    stderr line. Opt-in because it is expensive and has side effects.
//!
//! No code blocks means the response is plain text and trivially valid.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::sandbox::SandboxRuntime;

/// Matches triple-backtick fences with an optional python tag; the body is
/// captured across lines.
static CODE_BLOCK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:python|py)?[ \t]*\n(.*?)```").expect("fence pattern"));

/// Default wall-clock limit for the execution probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Validation outcome for one response.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub valid: bool,
    /// Whether the response contained any code block at all.
    pub has_code: bool,
    /// One entry per failed block, naming the block index and position.
    pub errors: Vec<String>,
    pub code_blocks: Vec<String>,
}

/// A single structural syntax finding with its position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

/// Extracts fenced code blocks. Empty bodies are skipped: a bare fence is
/// not a validation failure.
pub fn extract_code_blocks(text: &str) -> Vec<String> {
    CODE_BLOCK_PATTERN
        .captures_iter(text)
        .filter_map(|cap| {
            let body = cap.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            (!body.is_empty()).then(|| body.to_string())
        })
        .collect()
}

/// Structural syntax scan: balanced `()[]{}` and terminated strings.
///
/// This is a language-light check, not a parser; it catches the mechanical
/// failure shapes a model produces (dangling delimiters, cut-off strings)
/// and reports the first one with its position.
pub fn check_syntax(code: &str) -> Result<(), SyntaxIssue> {
    let mut stack: Vec<(char, usize, usize)> = Vec::new();
    let mut line = 1usize;
    let mut column = 0usize;

    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        column += 1;
        match c {
            '\n' => {
                line += 1;
                column = 0;
            }
            '#' => {
                // Comment until end of line.
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        column = 0;
                        break;
                    }
                }
            }
            '\'' | '"' => {
                let quote = c;
                let (start_line, start_col) = (line, column);
                // Triple-quoted strings may span lines.
                let mut triple = false;
                if chars.peek() == Some(&quote) {
                    let mut ahead = chars.clone();
                    ahead.next();
                    if ahead.peek() == Some(&quote) {
                        triple = true;
                        chars.next();
                        chars.next();
                        column += 2;
                    } else {
                        // Empty string literal: consume the closing quote.
                        chars.next();
                        column += 1;
                        continue;
                    }
                }
                let mut closed = false;
                let mut quote_run = 0usize;
                while let Some(c) = chars.next() {
                    column += 1;
                    match c {
                        '\\' => {
                            quote_run = 0;
                            if chars.next().is_some() {
                                column += 1;
                            }
                        }
                        '\n' => {
                            line += 1;
                            column = 0;
                            quote_run = 0;
                            if !triple {
                                break; // single-line string ran off the line
                            }
                        }
                        c if c == quote => {
                            if triple {
                                quote_run += 1;
                                if quote_run == 3 {
                                    closed = true;
                                    break;
                                }
                            } else {
                                closed = true;
                                break;
                            }
                        }
                        _ => quote_run = 0,
                    }
                }
                if !closed {
                    return Err(SyntaxIssue {
                        line: start_line,
                        column: start_col,
                        message: format!("unterminated string starting with {}", quote),
                    });
                }
            }
            '(' | '[' | '{' => stack.push((c, line, column)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, ..)) if open == expected => {}
                    Some((open, open_line, open_col)) => {
                        return Err(SyntaxIssue {
                            line,
                            column,
                            message: format!(
                                "mismatched '{}' closing '{}' opened at line {}, column {}",
                                c, open, open_line, open_col
                            ),
                        });
                    }
                    None => {
                        return Err(SyntaxIssue {
                            line,
                            column,
                            message: format!("unexpected '{}'", c),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    if let Some((open, open_line, open_col)) = stack.pop() {
        return Err(SyntaxIssue {
            line: open_line,
            column: open_col,
            message: format!("unclosed '{}'", open),
        });
    }
    Ok(())
}

/// Runs the always-on layer over a response.
pub fn validate_response(response: &str) -> ValidationReport {
    let code_blocks = extract_code_blocks(response);
    if code_blocks.is_empty() {
        debug!("no code blocks, validation trivially passes");
        return ValidationReport {
            valid: true,
            has_code: false,
            errors: vec![],
            code_blocks: vec![],
        };
    }

    let mut errors = Vec::new();
    for (i, block) in code_blocks.iter().enumerate() {
        if let Err(issue) = check_syntax(block) {
            let message = format!("[Block {}/Syntax] {}", i + 1, issue);
            warn!(block = i + 1, "syntax issue: {}", issue);
            errors.push(message);
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        has_code: true,
        errors,
        code_blocks,
    }
}

/// Runs both layers: the structural scan, then (only when it passes) the
/// isolated execution probe for each block.
pub async fn validate_with_probe(
    response: &str,
    runtime: &dyn SandboxRuntime,
    timeout: Duration,
) -> ValidationReport {
    let mut report = validate_response(response);
    if !report.has_code || !report.valid {
        return report;
    }

    for (i, block) in report.code_blocks.iter().enumerate() {
        let outcome = runtime.exec_isolated(block, timeout).await;
        if !outcome.success {
            let last_line = outcome
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("unknown error");
            report
                .errors
                .push(format!("[Block {}/Runtime] {}", i + 1, last_line));
        }
    }
    report.valid = report.errors.is_empty();
    report
}

/// Renders the re-prompt feedback for a failed validation.
pub fn format_error_feedback(report: &ValidationReport) -> String {
    let mut lines = vec![
        "[CODE ERROR] The code you produced has mechanical errors.".to_string(),
        "Fix the following and output the corrected code only:".to_string(),
        String::new(),
    ];
    for error in &report.errors {
        lines.push(format!("  - {}", error));
    }
    lines.push(String::new());
    lines.push("Output the corrected code. Do not explain the mistake.".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: plain text passes trivially with has_code=false.
    #[test]
    fn empty_and_plain_text_pass() {
        let report = validate_response("");
        assert!(report.valid && !report.has_code);

        let report = validate_response("The answer is 42.");
        assert!(report.valid && !report.has_code);
    }

    /// **Scenario**: a fence with an empty body is skipped, not failed.
    #[test]
    fn empty_fence_is_skipped() {
        let report = validate_response("look:\n```python\n\n```\ndone");
        assert!(report.valid);
        assert!(!report.has_code);
        assert!(report.code_blocks.is_empty());
    }

    /// **Scenario**: `def x(:` fails with a position (unclosed paren).
    #[test]
    fn unclosed_paren_fails_with_position() {
        let report = validate_response("```python\ndef x(:\n    pass\n```");
        assert!(!report.valid);
        assert!(report.has_code);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("[Block 1/Syntax]"));
        assert!(report.errors[0].contains("unclosed '('"));
        assert!(report.errors[0].contains("Line 1"));
    }

    /// **Scenario**: valid code passes; tagged and untagged fences both
    /// extract; block index names the failing one.
    #[test]
    fn multiple_blocks_and_indexing() {
        let text = "```py\nprint('ok')\n```\nand\n```\nvalues = [1, 2\n```";
        let report = validate_response(text);
        assert_eq!(report.code_blocks.len(), 2);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("[Block 2/Syntax]"));
    }

    /// **Scenario**: string handling — terminated strings with brackets
    /// inside pass, an unterminated string fails.
    #[test]
    fn string_termination() {
        assert!(check_syntax("s = \"a ( b [ c\"\nprint(s)").is_ok());
        assert!(check_syntax("doc = \"\"\"multi\nline\n\"\"\"").is_ok());
        let issue = check_syntax("s = \"cut off").unwrap_err();
        assert!(issue.message.contains("unterminated string"));
    }

    /// **Scenario**: comments do not open strings or brackets.
    #[test]
    fn comments_are_ignored() {
        assert!(check_syntax("x = 1  # don't ( worry [ about it\ny = 2").is_ok());
    }

    /// **Scenario**: mismatched closer names both positions.
    #[test]
    fn mismatched_closer() {
        let issue = check_syntax("a = (1, 2]").unwrap_err();
        assert!(issue.message.contains("mismatched ']'"));
        assert!(issue.message.contains("opened at line 1"));
    }

    /// **Scenario**: feedback message enumerates every error.
    #[test]
    fn feedback_lists_errors() {
        let report = validate_response("```python\ndef x(:\n```");
        let feedback = format_error_feedback(&report);
        assert!(feedback.contains("[CODE ERROR]"));
        assert!(feedback.contains("[Block 1/Syntax]"));
    }

    /// **Scenario**: execution probe records the last stderr line; skipped
    /// when the structural scan already failed.
    #[tokio::test]
    async fn probe_layer() {
        use crate::sandbox::{ExecOutcome, IsolatedOutcome};
        use async_trait::async_trait;

        struct FailingRuntime;

        #[async_trait]
        impl SandboxRuntime for FailingRuntime {
            async fn run(&self, _: &str, _: Duration) -> ExecOutcome {
                unreachable!("probe uses exec_isolated")
            }
            async fn exec_isolated(&self, _: &str, _: Duration) -> IsolatedOutcome {
                IsolatedOutcome {
                    success: false,
                    stderr: "Traceback...\nNameError: name 'x' is not defined\n".into(),
                }
            }
        }

        let report =
            validate_with_probe("```python\nprint(x)\n```", &FailingRuntime, PROBE_TIMEOUT)
                .await;
        assert!(!report.valid);
        assert!(report.errors[0].contains("[Block 1/Runtime] NameError"));

        // Structural failure short-circuits the probe.
        let report =
            validate_with_probe("```python\ndef x(:\n```", &FailingRuntime, PROBE_TIMEOUT).await;
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Syntax"));
    }
}
