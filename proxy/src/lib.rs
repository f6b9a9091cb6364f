// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Metadata Proxy
//!
//! A per-node stand-in for the EC2 instance metadata service that hands each
//! pod credentials for its own IAM role instead of the node's.
//!
//! ## Architecture
//!
//! ```text
//! Pod -> HTTP (this crate) -+-> PodFinder (source IP -> pod -> role)
//!                           +-> CredentialsCache -> STS AssumeRole
//!                           +-> Forwarder -> real metadata service (everything else)
//! ```
//!
//! Requests are classified by path:
//!
//! - **IAM paths** (`/{version}/meta-data/iam/security-credentials/...`): the
//!   caller's pod is found by its source address and only that pod's role is
//!   ever listed or issued
//! - **Health**: `/ping` for liveness, `/health` for upstream reachability
//! - **Everything else**: relayed verbatim to the real metadata service
//!
//! ## Modules
//!
//! - [`application`]: Router construction and server lifecycle (build, serve, stop)
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: Configuration constants for the application
//! - [`credentials`]: Credential cache with per-role single-flight issuance
//! - [`errors`]: Application error types with HTTP response mapping
//! - [`forwarder`]: Passthrough to the real metadata service
//! - [`models`]: Pod and credential types
//! - [`pods`]: Pod identity resolution by IP address
//! - [`retry`]: Backoff bounded by maximum elapsed time
//! - [`routes`]: HTTP route handlers
//! - [`sts`]: STS `AssumeRole` credential issuer
//!
//! ## Usage
//!
//! ```bash
//! metadata-proxy --port 8181 --role-base-arn arn:aws:iam::123456789012:role/ --pods-file pods.json
//! ```
//!
//! ## Security Considerations
//!
//! - Identity comes from the network peer address alone; the network must
//!   prevent pods from spoofing each other's addresses
//! - `--allow-ip-query` lets any caller name the pod it acts for and must stay
//!   off unless only trusted callers can reach the proxy
//! - Secrets are zeroized on drop and redacted from `Debug` output

pub mod application;
pub mod configuration;
pub mod constants;
pub mod credentials;
pub mod errors;
pub mod forwarder;
pub mod models;
pub mod pods;
pub mod retry;
pub mod routes;
pub mod sts;
