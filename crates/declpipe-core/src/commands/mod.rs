//! High-level commands called by the CLI.

pub mod deploy;

pub use deploy::{
    ConfirmChanges, DEFAULT_DEPLOYMENT_FILE, DeployCommand, DeployOptions, DeployReport,
    PipelineReport, StageStatus,
};
