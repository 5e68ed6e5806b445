//! Sloth Core Library
//!
//! This crate provides the core of the sloth slow HTTP tester: the per-socket
//! slow connection state machine, the single-threaded scheduler that paces
//! admissions and trickles follow-up data, descriptor limit negotiation, and
//! the statistics the run reports.
//!
//! ```rust,no_run
//! use sloth_core::{
//!     component_rng, components, AttackMode, FollowUpSource, NullSink, RequestTemplate,
//!     RunConfig, Scheduler, Target,
//! };
//! use sloth_transport::TcpConnectionGroup;
//!
//! let target = Target::parse("http://127.0.0.1:8080/").unwrap();
//! let group = TcpConnectionGroup::new(target.resolve().unwrap()).unwrap();
//! let template = RequestTemplate::build(AttackMode::Headers, "GET", &target, "sloth", 0);
//! let followups =
//!     FollowUpSource::new(AttackMode::Headers, component_rng(None, components::FOLLOWUP_TOKENS));
//!
//! let mut scheduler = Scheduler::new(group, RunConfig::default(), template, followups).unwrap();
//! let summary = scheduler.run(&mut NullSink);
//! println!("{}", summary.outcome);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod followup;
pub mod limits;
pub mod report;
pub mod request;
pub mod scheduler;
pub mod seed;
pub mod stats;
pub mod target;

pub use config::{AttackMode, RunConfig};
pub use connection::{ConnectionState, IoOutcome, SlowConnection};
pub use error::{Error, Result};
pub use followup::FollowUpSource;
pub use limits::{negotiate, DescriptorLimits, FdLimits, Negotiated, ProcessLimits};
pub use report::{NullSink, RecordingSink, ReportSink, StatusSample};
pub use request::{pick_user_agent, RequestTemplate, USER_AGENTS};
pub use scheduler::{RateController, Scheduler, TestRun};
pub use seed::{component_rng, components};
pub use stats::{ConnectionCounts, Outcome, RunSummary};
pub use target::Target;
