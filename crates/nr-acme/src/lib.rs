//! Certificate renewal against an ACME directory
//!
//! Proves control over the configured domains (DNS-01 through nsupdate, or
//! HTTP-01 through a webroot), installs the issued chain into a
//! `live/`/`archive/` tree and publishes matching TLSA records.

mod acme;
pub mod certificate;
pub mod client;
pub mod poller;
pub mod renewal;
pub mod storage;
pub mod strategy;
pub mod tlsa;
pub mod types;

pub use acme::{InstantAcmeOrder, InstantAcmeService};
pub use certificate::{CertificateRecord, TlsaContent};
pub use client::{AcmeService, OrderHandle};
pub use poller::AuthorizationPoller;
pub use renewal::{RenewalController, RenewalDecision, RenewalOutcome, RenewalReason};
pub use storage::CertStorage;
pub use strategy::{Verification, VerificationStrategy};
pub use tlsa::{PortSpec, RotationReport, TrustRecordRotator};
pub use types::{AcmeConfig, AcmeError, AcmeResult, ChallengeKind};
