//! domshot
//!
//! Render blocks of HTML, CSS and page script to images by driving a
//! scriptable headless browser (PhantomJS or a compatible host).
//!
//! The crate composes a self-contained automation script for every render:
//! text payloads are escaped into script string literals, page geometry is
//! fixed before content is loaded, page script runs before the capture, and
//! the script exits with a status that reflects whether the image was
//! written. The script is then executed by a [`RenderHost`].
//!
//! # Features
//!
//! - **Escaping** ([`escape`]): arbitrary text into double-quoted literals
//! - **Composition** ([`script`]): fixed-order render scripts
//! - **Hosts**: [`PhantomHost`] runs the real browser; `DryRunHost`
//!   (feature `dry-run`, default) executes scripts against a recording mock
//! - **Page builder** ([`DomShot`]) and an async facade ([`AsyncRenderer`])
//!
//! # Example
//!
//! ```no_run
//! use domshot::{compose, PhantomHost, RenderHost, RenderRequest};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = RenderRequest::builder()
//!     .viewport(800, 600)
//!     .css("body{color:red}")
//!     .html("<p>hi</p>")
//!     .output_path("/tmp/out.png")
//!     .build()?;
//!
//! let script = compose(&request);
//! let outcome = PhantomHost::default().execute(&script)?;
//! assert!(outcome.success);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod diagnostics;
pub mod escape;
pub mod host;
pub mod script;
pub mod shot;

// Mock host executing scripts in Boa
#[cfg(feature = "dry-run")]
pub mod dry_run;

// Async-friendly facade over blocking hosts
pub mod async_api;

pub use async_api::AsyncRenderer;
pub use diagnostics::{Diagnostic, DiagnosticKind, RenderOutcome, SourceLocation};
pub use escape::{escape, escape_opt, escape_with, EscapeOptions, EscapedFragment};
pub use host::PhantomHost;
pub use script::{
    compose, compose_with, ComposeOptions, ExitPolicy, RenderRequest, RenderScript, TrustedScript,
};
pub use shot::DomShot;

#[cfg(feature = "dry-run")]
pub use dry_run::{DryRunHost, HostCall, Transcript};

/// Environment variable overriding the host executable
pub const HOST_PROGRAM_ENV: &str = "DOMSHOT_PHANTOMJS";

/// Viewport dimensions, also used as the capture rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Configuration for launching the rendering host
///
/// Defaults mirror what a stock PhantomJS install needs:
/// - `program` is `phantomjs`, or the value of `DOMSHOT_PHANTOMJS` when set
/// - renders time out after 30s (`timeout_ms: 0` disables the limit)
/// - any host output left after filtering `ignored_warnings` fails the render
///   (`strict_output`)
///
/// # Examples
///
/// ```
/// let cfg = domshot::HostConfig::default();
/// assert_eq!(cfg.timeout_ms, 30_000);
/// assert!(cfg.strict_output);
/// ```
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Host executable
    pub program: PathBuf,
    /// Arguments placed before the script path
    pub args: Vec<String>,
    /// Kill the host after this many milliseconds
    pub timeout_ms: u64,
    /// Output lines containing any of these are dropped
    pub ignored_warnings: Vec<String>,
    /// Fail renders that leave any diagnostic behind
    pub strict_output: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        let program = std::env::var_os(HOST_PROGRAM_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("phantomjs"));
        Self {
            program,
            args: Vec::new(),
            timeout_ms: 30000,
            ignored_warnings: diagnostics::DEFAULT_IGNORED_WARNINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            strict_output: true,
        }
    }
}

/// Something that can execute a composed render script
pub trait RenderHost {
    /// Run `script` once and report what happened.
    ///
    /// `Err` means the host could not run at all; a host that ran but did not
    /// produce an image returns `Ok` with `success == false`.
    fn execute(&self, script: &RenderScript) -> Result<RenderOutcome>;
}

impl<H: RenderHost + ?Sized> RenderHost for &H {
    fn execute(&self, script: &RenderScript) -> Result<RenderOutcome> {
        (**self).execute(script)
    }
}

impl<H: RenderHost + ?Sized> RenderHost for Box<H> {
    fn execute(&self, script: &RenderScript) -> Result<RenderOutcome> {
        (**self).execute(script)
    }
}
