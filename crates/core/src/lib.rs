pub mod actions;
pub mod apply;
pub mod audit_trail;
pub mod classifier;
pub mod columns;
pub mod edit;
pub mod grid;
pub mod ledger;
pub mod projection;
pub mod relation;
pub mod selection;
pub mod settings;
pub mod statistics;
pub mod synthesizer;
pub mod value;
pub mod window;
pub mod workspace;

#[must_use]
pub fn domain_name() -> &'static str {
    "gridline-core"
}
