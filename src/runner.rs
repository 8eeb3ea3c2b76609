//! Per-test execution: temp dir, macro seeding, parse, run, verdict (component T1).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ast;
use crate::context::ExecContext;
use crate::logging::{LogEntry, Logger};

/// The outcome of running one `.vtc` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    /// Could not even be set up (missing file, parse error, temp dir failure).
    Error,
}

impl Outcome {
    /// The process exit code for a single verdict, following the automake
    /// test-driver convention (77 means skipped, independent of severity).
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Error => 2,
            Outcome::Fail => 1,
            Outcome::Skip => 77,
            Outcome::Pass => 0,
        }
    }

    /// Severity ranking used when aggregating many verdicts into one
    /// overall result: error beats fail beats skip beats pass. Unlike
    /// `exit_code`, this is a plain ordinal, not a process exit code.
    pub fn severity(self) -> u8 {
        match self {
            Outcome::Error => 3,
            Outcome::Fail => 2,
            Outcome::Skip => 1,
            Outcome::Pass => 0,
        }
    }
}

/// The result of running one test file.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: Outcome,
    pub message: Option<String>,
    pub log: Vec<LogEntry>,
}

/// Run a single `.vtc` file to completion, honouring `deadline` as the
/// test's total wall-clock budget. When `keep_tmp` is set, the per-test
/// temp directory is left on disk instead of being cleaned up on drop.
pub async fn run_file(path: &Path, verbose: bool, deadline: Duration, keep_tmp: bool) -> Verdict {
    let logger = Logger::new(verbose);

    let src = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            return Verdict {
                path: path.to_path_buf(),
                description: None,
                outcome: Outcome::Error,
                message: Some(format!("cannot read {}: {}", path.display(), e)),
                log: logger.entries(),
            }
        }
    };

    let root = match ast::parse(&src) {
        Ok(root) => root,
        Err(e) => {
            return Verdict {
                path: path.to_path_buf(),
                description: None,
                outcome: Outcome::Error,
                message: Some(format!("{}", e)),
                log: logger.entries(),
            }
        }
    };

    let description = description_of(&root);

    let tempdir = match tempfile::Builder::new().prefix("vtc-").tempdir() {
        Ok(d) => d,
        Err(e) => {
            return Verdict {
                path: path.to_path_buf(),
                description,
                outcome: Outcome::Error,
                message: Some(format!("cannot create temp dir: {}", e)),
                log: logger.entries(),
            }
        }
    };

    let tmp_path = tempdir.path().to_path_buf();
    if keep_tmp {
        let _ = tempdir.keep();
    }
    let mut ctx = ExecContext::new(tmp_path.clone(), logger.clone(), deadline);
    seed_macros(&ctx, path, &tmp_path).await;

    if let Err(e) = crate::registry::run_script(&mut ctx, &root).await {
        return Verdict {
            path: path.to_path_buf(),
            description,
            outcome: Outcome::Error,
            message: Some(format!("{}", e)),
            log: logger.entries(),
        };
    }

    let (outcome, message) = if let Some(err) = ctx.failed {
        (Outcome::Fail, Some(format!("{}", err)))
    } else if let Some(reason) = ctx.skip_reason {
        (Outcome::Skip, Some(reason))
    } else {
        (Outcome::Pass, None)
    };

    Verdict {
        path: path.to_path_buf(),
        description,
        outcome,
        message,
        log: logger.entries(),
    }
}

async fn seed_macros(ctx: &ExecContext, path: &Path, tmpdir: &Path) {
    let macros = ctx.macros();
    let testfile = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let testdir = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    macros.set("testfile", testfile).await;
    macros.set("testdir", testdir).await;
    macros.set("tmpdir", tmpdir.to_string_lossy().into_owned()).await;
    macros.set("platform", std::env::consts::OS).await;
    macros.set("os", std::env::consts::OS).await;
}

fn description_of(root: &ast::Node) -> Option<String> {
    match root {
        ast::Node::Root(children) => children.iter().find_map(|n| match n {
            ast::Node::Vtest { description, .. } => Some(description.clone()),
            _ => None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn a_passing_script_yields_pass() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "vtest \"trivial\"\ndelay 0s\n").unwrap();
        let verdict = run_file(file.path(), false, Duration::from_secs(5), false).await;
        assert_eq!(verdict.outcome, Outcome::Pass);
        assert_eq!(verdict.description.as_deref(), Some("trivial"));
    }

    #[tokio::test]
    async fn a_missing_barrier_yields_fail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "vtest \"missing barrier\"\nbarrier b1 sync\n").unwrap();
        let verdict = run_file(file.path(), false, Duration::from_secs(5), false).await;
        assert_eq!(verdict.outcome, Outcome::Fail);
    }

    #[tokio::test]
    async fn unparseable_script_yields_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "txreq -hdr \"unterminated\n").unwrap();
        let verdict = run_file(file.path(), false, Duration::from_secs(5), false).await;
        assert_eq!(verdict.outcome, Outcome::Error);
    }

    #[tokio::test]
    async fn missing_file_yields_error() {
        let verdict = run_file(Path::new("/nonexistent/path.vtc"), false, Duration::from_secs(5), false).await;
        assert_eq!(verdict.outcome, Outcome::Error);
    }

    #[test]
    fn severity_ranks_error_above_fail_above_skip_above_pass() {
        assert!(Outcome::Error.severity() > Outcome::Fail.severity());
        assert!(Outcome::Fail.severity() > Outcome::Skip.severity());
        assert!(Outcome::Skip.severity() > Outcome::Pass.severity());
    }

    #[test]
    fn skip_exit_code_follows_the_automake_convention() {
        assert_eq!(Outcome::Skip.exit_code(), 77);
    }
}
