pub mod lease_mutator;
pub mod ledger_entries;
pub mod payment_recorder;
pub mod program_progress;
