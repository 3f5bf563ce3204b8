pub mod error;
pub mod jsonrpc;
pub mod scenario;
pub mod report;
pub mod discovery;
pub mod compiler;
pub mod config;
pub mod cli;

// 公開API
pub use error::{HarnessError, HarnessResult, TransportErrorKind};
pub use jsonrpc::{JsonRpcClient, Transport};
pub use report::TestRunResult;
pub use scenario::{initialize_scenario, run_language_server_suite, TestScenario};
