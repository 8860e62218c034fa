//! # confguard-core
//!
//! Trusted configuration distribution and caching engine.
//!
//! A remotely issued configuration document (service endpoints, trust list
//! locations, certificate bundles) is accepted only when its detached
//! signature verifies. The engine keeps the last accepted document in a
//! local cache, falls back to a default bundled with the application, and
//! periodically asks a central service for a newer one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ConfigurationLoader                        │
//! │                                                               │
//! │  ┌───────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │LocalCacheStore│  │ BundledSource │  │CentralRepository │  │
//! │  │ (commit mark) │  │ (dir / static)│  │ (HTTPS, probe)   │  │
//! │  └───────────────┘  └───────────────┘  └──────────────────┘  │
//! │          │                  │                   │             │
//! │          └──────────────────┼───────────────────┘             │
//! │                             ▼                                 │
//! │  ┌─────────────────────────────────────────────────────┐     │
//! │  │               SignatureVerifier                      │     │
//! │  │   (ECDSA P-256 / Ed25519, raw or base64 signature)   │     │
//! │  └─────────────────────────────────────────────────────┘     │
//! │                             │                                 │
//! │                             ▼                                 │
//! │  ┌──────────────────┐  ┌─────────────────────────────────┐   │
//! │  │  MetadataStore   │  │ ConfigurationCell / Handle      │   │
//! │  │ (serial, dates)  │  │ (lock-free latest value, watch) │   │
//! │  └──────────────────┘  └─────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Verified only**: nothing is published or cached without a valid signature
//! - **Anti-rollback**: accepted serials never decrease
//! - **Atomic cache**: a torn commit reads as "no cache", never as a mixed triple
//! - **Always available**: once bootstrapped, a document stays published

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod artifacts;
pub mod bundled;
pub mod cache;
mod cell;
pub mod central;
pub mod config;
pub mod document;
mod durable;
pub mod error;
pub mod loader;
pub mod metadata;
mod properties;
pub mod verifier;

pub use artifacts::{ArtifactSource, ArtifactTriple, VerifiedTriple};
pub use bundled::{write_bundle, BundledSource};
pub use cache::LocalCacheStore;
pub use cell::ConfigurationHandle;
pub use central::{fetch_triple, CentralRepository, HttpsCentralClient, ProxySettings};
pub use config::{BundledProperties, LoaderConfig};
pub use document::{ConfigurationDocument, DocumentMeta, DocumentSummary, ServiceEndpoints};
pub use error::ConfigError;
pub use loader::{ConfigurationLoader, InitReport, LoaderState, UpdateOutcome};
pub use metadata::{EngineMetadata, MetadataStore};
pub use verifier::{normalize_signature, SignatureVerifier};
