//! nettune policy - plan validation and configuration cards
//!
//! Validation never fails with an error; it returns a [`ValidationReport`]
//! listing every schema and policy issue together with the normalized plan
//! when there are none.

pub mod cards;
mod rules;
pub mod validator;

pub use cards::{CardError, CardRegistry, ConfigCard, RiskLevel, SafeRange};
pub use validator::{IssueKind, Severity, ValidationIssue, ValidationReport, Validator};
