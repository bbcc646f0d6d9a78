//! Run a SQL file inside one transaction
//!
//! Command: run

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mariapool_core::{Client, QueryOutput};
use serde::Serialize;
use tracing::{info, warn};

use super::{connect, print_json};
use crate::config::ConnectionArgs;
use crate::ui;

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// File with `;`-separated statements
    pub file: PathBuf,

    /// Commit when every statement succeeds (default)
    #[arg(long, conflicts_with = "dry_run")]
    pub commit: bool,

    /// Run everything, then roll back
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

/// Per-statement line of the printed summary
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatementSummary {
    pub index: usize,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<u64>,
}

impl StatementSummary {
    fn new(index: usize, sql: &str, output: &QueryOutput) -> Self {
        let (rows, affected_rows, insert_id) = match output {
            QueryOutput::Rows(rows) => (Some(rows.len()), None, None),
            QueryOutput::Write(w) => (None, Some(w.affected_rows), Some(w.insert_id)),
        };
        Self {
            index,
            sql: sql.to_string(),
            rows,
            affected_rows,
            insert_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    committed: bool,
    statements: Vec<StatementSummary>,
}

pub async fn run_script(args: RunArgs, conn: &ConnectionArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let statements = split_statements(&content);
    if statements.is_empty() {
        bail!("no statements found in {}", args.file.display());
    }

    let client = connect(conn).await?;
    let dry_run = args.dry_run && !args.commit;
    let result = execute_all(&client, &statements, dry_run).await;
    client.close().await;

    print_json(&result?)
}

async fn execute_all(client: &Client, statements: &[String], dry_run: bool) -> Result<RunReport> {
    client.start().await.context("failed to start transaction")?;

    let pb = ui::progress_bar(statements.len() as u64, "Running statements");
    let mut summaries = Vec::with_capacity(statements.len());

    for (index, sql) in statements.iter().enumerate() {
        match client.query(sql.as_str()).await {
            Ok(output) => summaries.push(StatementSummary::new(index, sql, &output)),
            Err(e) => {
                ui::finish_error(pb, format!("statement {} failed", index + 1));
                if let Err(rollback_err) = client.rollback().await {
                    warn!("rollback after failure also failed: {}", rollback_err);
                }
                return Err(e).with_context(|| format!("statement {} failed: {}", index + 1, sql));
            }
        }
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if dry_run {
        client.rollback().await.context("rollback failed")?;
        ui::finish_success(pb, format!("{} statements rolled back (dry run)", summaries.len()));
        info!("dry run: rolled back {} statements", summaries.len());
    } else {
        client.end().await.context("commit failed")?;
        ui::finish_success(pb, format!("{} statements committed", summaries.len()));
    }

    Ok(RunReport {
        committed: !dry_run,
        statements: summaries,
    })
}

/// Split on `;` outside quotes, backticks and comments; blank pieces are dropped.
///
/// Comments follow MySQL: `#` and `-- ` (dashes then whitespace) run to the
/// end of the line, `/* */` blocks are removed, and `/*! */` / `/*+ */`
/// blocks stay in the statement because the server reads them.
pub fn split_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = content.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' && q != '`' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '-' if starts_line_comment(&chars) => {
                skip_line(&mut chars);
                current.push('\n');
            }
            '#' => {
                skip_line(&mut chars);
                current.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                block_comment(&mut chars, &mut current);
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

// Called on the first `-`: needs a second `-` and then whitespace or EOF
fn starts_line_comment(rest: &Chars<'_>) -> bool {
    let mut ahead = rest.clone();
    ahead.next() == Some('-') && ahead.next().map_or(true, char::is_whitespace)
}

// Called after the opening `/*`
fn block_comment(chars: &mut Chars<'_>, current: &mut String) {
    let keep = matches!(chars.peek(), Some('!') | Some('+'));
    if keep {
        current.push_str("/*");
    }

    let mut prev = '\0';
    for c in chars.by_ref() {
        if keep {
            current.push(c);
        }
        if prev == '*' && c == '/' {
            break;
        }
        prev = c;
    }

    if !keep {
        current.push(' ');
    }
}

fn skip_line(chars: &mut Chars<'_>) {
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use mariapool_core::WriteResult;

    #[test]
    fn splits_and_trims() {
        let sql = "INSERT INTO t VALUES (1);\n\nUPDATE t SET x = 2 ;\n;  ";
        assert_eq!(
            split_statements(sql),
            vec!["INSERT INTO t VALUES (1)", "UPDATE t SET x = 2"]
        );
    }

    #[test]
    fn keeps_semicolons_inside_quotes() {
        let sql = "INSERT INTO t VALUES ('a;b', \"c;d\");SELECT `odd;name` FROM t";
        assert_eq!(
            split_statements(sql),
            vec![
                "INSERT INTO t VALUES ('a;b', \"c;d\")",
                "SELECT `odd;name` FROM t"
            ]
        );
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let sql = r"INSERT INTO t VALUES ('it\'s; fine'); DELETE FROM t";
        assert_eq!(
            split_statements(sql),
            vec![r"INSERT INTO t VALUES ('it\'s; fine')", "DELETE FROM t"]
        );
    }

    #[test]
    fn drops_comments() {
        let sql = "-- setup; ignored\nSELECT 1; # trailing; note\nSELECT 2";
        assert_eq!(split_statements(sql), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn double_dash_without_space_is_an_operator() {
        let sql = "UPDATE t SET x = x--1;\nDELETE FROM t";
        assert_eq!(
            split_statements(sql),
            vec!["UPDATE t SET x = x--1", "DELETE FROM t"]
        );
    }

    #[test]
    fn double_dash_at_line_end_is_a_comment() {
        assert_eq!(
            split_statements("SELECT 1 --\n;SELECT 2 --"),
            vec!["SELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn block_comments_are_removed() {
        let sql = "/* setup; step one */ INSERT INTO t VALUES (1); SELECT/**/1";
        assert_eq!(
            split_statements(sql),
            vec!["INSERT INTO t VALUES (1)", "SELECT 1"]
        );
    }

    #[test]
    fn executable_comments_are_kept() {
        let sql = "/*!40101 SET NAMES utf8mb4; */;SELECT /*+ MAX_EXECUTION_TIME(100) */ 1";
        assert_eq!(
            split_statements(sql),
            vec![
                "/*!40101 SET NAMES utf8mb4; */",
                "SELECT /*+ MAX_EXECUTION_TIME(100) */ 1"
            ]
        );
    }

    #[test]
    fn summary_shapes() {
        let rows = StatementSummary::new(0, "SELECT 1", &QueryOutput::Rows(vec![Default::default()]));
        assert_eq!(rows.rows, Some(1));
        assert_eq!(rows.affected_rows, None);

        let write = StatementSummary::new(
            1,
            "INSERT INTO t VALUES (1)",
            &QueryOutput::Write(WriteResult {
                affected_rows: 1,
                insert_id: 5,
                warning_status: 0,
            }),
        );
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["affectedRows"], 1);
        assert_eq!(json["insertId"], 5);
        assert!(json.get("rows").is_none());
    }
}
