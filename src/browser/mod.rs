// src/browser/mod.rs
//
// Browser automation subsystem (spec.md §4.6/§4.7): driver abstraction,
// mock and CDP backends, fingerprinting, anti-detection patches, and the
// session factory/guard that wires them together for a pipeline run.

pub mod antidetect;
pub mod driver;
pub mod factory;
pub mod fingerprint;
pub mod init_script;
pub mod mock;

#[cfg(feature = "live-browser")]
pub mod cdp;

pub use driver::{
    BrowserContext, BrowserDriver, BrowserPage, ContextOptions, DriverError, DriverResult, PageEvent, Viewport,
};
