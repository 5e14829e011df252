//! Kiln plan: compiles a build request into a build pod.
//!
//! The crate is pure: no cluster access, no I/O. Everything it needs comes in
//! through [`BuildRequest`](kiln_core::BuildRequest) and [`BuildContext`], and
//! the only wall-clock read goes through the context's clock.

#![forbid(unsafe_code)]

pub mod bindings;
pub mod cache;
pub mod os;
pub mod platform;
pub mod pod;
pub mod secrets;

pub use bindings::{binding_mounts, BindingMounts};
pub use cache::CacheStrategy;
pub use os::{OsAdapter, StepPass};
pub use platform::{Negotiator, LOWEST_PLATFORM_API, SUPPORTED_PLATFORM_APIS, SUPPORTED_PLATFORM_APIS_WITH_REPORT};
pub use pod::{build_pod, source_date_epoch, BuildContext};
pub use secrets::{classify_credentials, classify_image_pull, classify_signing_keys, CredentialScope, SecretMounts};
