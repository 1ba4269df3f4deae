//! Markdown formatting for plans and run results.
//!
//! Domain types implement `Display` directly and produce markdown that the CLI
//! renders through its terminal renderer (or prints as plain text with
//! `--no-color`):
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  Domain Models  │    │ Display impls & │    │   Formatted     │
//! │ (Plan, Report)  │───▶│ wrapper types   │───▶│    Output       │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! - [`models`]: plans, targets, statuses and stored records
//! - [`results`]: dispatcher run reports and agent batch outcomes
//! - [`status`]: one-line confirmations ([`OperationStatus`])
//! - [`datetime`]: local time formatting ([`LocalDateTime`])
//!
//! ```rust
//! use roller_core::display::OperationStatus;
//!
//! let done = OperationStatus::success("Saved plan 'roller-upgrade'");
//! assert!(done.to_string().starts_with("Success:"));
//! ```

pub mod datetime;
pub mod models;
pub mod results;
pub mod status;

pub use datetime::LocalDateTime;
pub use status::OperationStatus;
