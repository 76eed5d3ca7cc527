// Cart reconciliation, checkout orchestration and order finalization
pub mod commerce;

// Hosted payment provider port and adapters
pub mod payments;
