//! Package reconstruction and verification engine for cbsgen.
//!
//! This crate ties the manifest model, the image abstraction, and the
//! container codec together: `MacroResolver` turns symbolic manifest paths
//! into partition-relative ones, `Locator` finds the bytes behind them through
//! an ordered strategy chain, `PackageAssembler` hands the result to a codec,
//! and `Verifier` checks built containers against the digests their component
//! manifests declare. `Builder` drives assembly across a whole image,
//! including driver store folders and the image's build inputs.

pub mod assemble;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod locate;
pub mod metadata;
pub mod naming;
pub mod resolve;
pub mod verify;

pub use assemble::{
    assemble, is_wrapper_package, resolve_component, AssembleOutcome, FileResolution,
    PackageAssembler, WrapperBuilder,
};
pub use concurrency::{
    install_signal_handler, run_units, CancelToken, Deadline, DeadlineReader, OutputLock,
    Progress, ProgressFn,
};
pub use config::Config;
pub use engine::{
    BuildReport, Builder, JobKind, PackageBuild, PackageJob, DRIVER_PARTITION, DRIVER_REPOSITORY_DIR,
};
pub use locate::{
    FileSource, LocateRequest, Locator, ResolutionFailure, ResolvedFile, Strategy, StrategyKind,
};
pub use metadata::{export_build_metadata, MetadataReport, OEM_INPUT_FILE, OEM_INPUT_PATH};
pub use naming::{destination_for, driver_destination_for, find_update_history};
pub use resolve::{
    MacroResolver, ResolvedPath, ResolverOptions, SERVICING_PACKAGES_DIR, SXS_MANIFESTS_DIR,
};
pub use verify::{
    BatchReport, ExpectedChecksum, PackageFailure, PackageReport, VerificationResult, Verdict, Verifier,
    VerifyOptions,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] cbsgen_schema::ManifestError),
    #[error("image error: {0}")]
    Image(#[from] cbsgen_image::ImageError),
    #[error("store error: {0}")]
    Store(#[from] cbsgen_store::StoreError),
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionFailure),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("unsupported on this platform: {0}")]
    PlatformUnavailable(String),
}

impl CoreError {
    /// Errors that must stop the current call instead of being retried or
    /// downgraded to a per-file miss.
    pub fn is_platform_unavailable(&self) -> bool {
        matches!(
            self,
            Self::PlatformUnavailable(_)
                | Self::Manifest(cbsgen_schema::ManifestError::PlatformUnavailable(_))
                | Self::Resolution(ResolutionFailure::PlatformUnavailable(_))
        )
    }
}
