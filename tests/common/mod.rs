//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::collections::BTreeSet;
use stepflow_rs::matching::RowGroup;
use stepflow_rs::step::IterationStep;

/// Contribution sets of a step, in the given slot order, for comparisons.
pub fn contributions(step: &IterationStep, slot_names: &[&str]) -> Vec<BTreeSet<usize>> {
    slot_names
        .iter()
        .map(|name| step.input_rows(name))
        .collect()
}

/// Reduce groups to an order-independent set of row memberships.
pub fn membership(groups: &[RowGroup]) -> BTreeSet<Vec<BTreeSet<usize>>> {
    groups.iter().map(|group| group.rows.clone()).collect()
}
