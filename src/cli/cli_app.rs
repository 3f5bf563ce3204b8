use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

use crate::compiler::{CompilerHarness, CompilerMode};
use crate::config::{load_scenarios, resolve_executable, HarnessConfig};
use crate::discovery::discover_tests;
use crate::report::TestRunResult;
use crate::scenario::{default_scenarios, run_language_server_suite};

/// allium-harness - conformance tests for the allium compiler and language server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run JSON-RPC scenarios against a language server over stdio
    Lsp {
        /// Language server executable
        server: PathBuf,

        /// Arguments passed to the server (after `--`)
        #[arg(last = true)]
        args: Vec<String>,

        /// JSON file with scenarios to run instead of the initialize handshake
        #[arg(long)]
        scenarios: Option<PathBuf>,

        /// Bound on each read from the server, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run compiler tests, checking captured output with a pattern verifier
    Check {
        /// Compiler executable
        subject: PathBuf,

        /// Pattern verifier executable (e.g. FileCheck)
        verifier: PathBuf,

        /// Directory searched recursively for tests
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Test file extension
        #[arg(long)]
        extension: Option<String>,

        /// Bound on each subject and verifier run, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run compiler tests judged by the compiler's exit code alone
    Legacy {
        /// Compiler executable
        subject: PathBuf,

        /// Directory searched (not recursively) for tests
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Test file extension
        #[arg(long)]
        extension: Option<String>,

        /// Bound on each subject run, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// コンパイラ系サブコマンドの共通処理
async fn run_compiler_suite(
    subject: PathBuf,
    mode: CompilerMode,
    dir: Option<PathBuf>,
    extension: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<TestRunResult> {
    let defaults = HarnessConfig::default();
    let config = HarnessConfig {
        test_timeout: timeout_ms.map(Duration::from_millis).unwrap_or(defaults.test_timeout),
        test_dir: dir.unwrap_or(defaults.test_dir),
        extension: extension.unwrap_or(defaults.extension),
        ..defaults
    };
    debug!("Compiler suite config: {:?}", config);

    let tests = discover_tests(&config.test_dir, &config.extension, mode.discovery_mode())
        .with_context(|| format!("failed to discover tests in {}", config.test_dir.display()))?;

    let harness = CompilerHarness::new(resolve_executable(&subject), mode, config.test_timeout);
    Ok(harness.run_all(&tests).await)
}

/// Run a parsed command line and return the process exit code
pub async fn run_with(cli: Cli) -> Result<i32> {
    let result = match cli.command {
        Commands::Lsp {
            server,
            args,
            scenarios,
            timeout_ms,
        } => {
            let scenarios = match scenarios {
                Some(path) => load_scenarios(&path)?,
                None => default_scenarios(),
            };
            let read_timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(HarnessConfig::default().read_timeout);

            run_language_server_suite(resolve_executable(&server), &args, &scenarios, read_timeout).await
        }
        Commands::Check {
            subject,
            verifier,
            dir,
            extension,
            timeout_ms,
        } => {
            let mode = CompilerMode::Verified {
                verifier: resolve_executable(&verifier),
            };
            run_compiler_suite(subject, mode, dir, extension, timeout_ms).await?
        }
        Commands::Legacy {
            subject,
            dir,
            extension,
            timeout_ms,
        } => run_compiler_suite(subject, CompilerMode::Legacy, dir, extension, timeout_ms).await?,
    };

    result.print_summary();
    Ok(result.exit_code())
}

/// CLI実行エントリーポイント
pub async fn run_cli() -> Result<i32> {
    run_with(Cli::parse()).await
}
