//! # smartdns-streams
//!
//! Route streaming-service domains through SmartDNS upstream groups and keep
//! sniproxy host tables in sync.
//!
//! Each streaming sub-platform from the domain catalog is written to the
//! SmartDNS config as a sentinel-marked block. The blocks double as the
//! record of which upstream owns which sub-platform: the assignment table is
//! always rebuilt from the file, never stored elsewhere.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use smartdns_streams::{DomainCatalog, ResolverFile, Session, Target};
//!
//! let catalog = DomainCatalog::load("StreamConfig.yaml".as_ref())?;
//! let mut file = ResolverFile::open("/etc/smartdns/smartdns.conf")?;
//!
//! // Start from what the "us" group already owns.
//! let mut session = Session::open(Target::nameserver("us"), file.assignments(), &catalog);
//! session.toggle("USA", "Netflix")?;
//!
//! // Retract deselected platforms, write new ones, save once.
//! let report = session.save(&mut file, &catalog)?;
//! println!("{} platform(s) changed", report.changed);
//! ```
//!
//! ## Ownership
//!
//! A sub-platform belongs to at most one target. Platforms held by another
//! target are reported as conflicts and never overwritten; free them by
//! deselecting them from their owner first.
//!
//! ## Proxy tables
//!
//! [`ProxyFile::merge_domains`] folds domains into named sniproxy tables,
//! collapsing duplicate blocks into one canonical block at the end of the
//! file.
//!
//! ## Permissions
//!
//! Writing under `/etc/` requires root. The caller is responsible for
//! privilege elevation.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod assignment;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod error;
pub mod lines;
pub mod proxy;
pub mod reconcile;
pub mod resolver_file;
pub mod service;
pub mod session;
pub mod upstream;
pub mod util;

pub use assignment::{Assignment, AssignmentTable, Method, Target, parse_assignments};
pub use catalog::DomainCatalog;
pub use config::{Settings, SettingsOverrides};
pub use conflict::{Ownership, classify};
pub use error::{ManagerError, Result};
pub use proxy::{HTTP_HOSTS_TABLE, HTTPS_HOSTS_TABLE, ProxyFile, merge_domains_into_table};
pub use reconcile::{ReconcileReport, Selection, reconcile, reconcile_file};
pub use resolver_file::ResolverFile;
pub use service::{ServiceAction, ServiceManager, Systemctl, restart_if_active};
pub use session::{Mark, Session};
pub use upstream::UpstreamGroup;
