use crate::listing::{Item, Listing, Origin};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Expected a {expected} listing, got {actual}")]
    WrongOrigin { expected: Origin, actual: Origin },
}

/// Why an item is being uploaded
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadReason {
    /// Not in the destination yet
    New,
    /// In the destination with a different fingerprint
    Changed,
    /// Fingerprints could not be compared
    Unverifiable,
}

/// An item scheduled for upload, carrying the source fingerprint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Upload {
    pub item: Item,
    pub reason: UploadReason,
}

/// The reconciliation plan. Each list is sorted by identity and the three
/// are disjoint.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlan {
    /// Source items absent from the destination or differing from it
    pub to_upload: Vec<Upload>,

    /// Destination items the source no longer has
    pub to_delete: Vec<Item>,

    /// Source items already present with a matching fingerprint
    pub unchanged: Vec<Item>,
}

/// Counts for logging and CLI output
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub to_upload: usize,
    pub to_delete: usize,
    pub unchanged: usize,
}

impl ChangePlan {
    /// Check if applying the plan would touch the destination
    pub fn is_noop(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            to_upload: self.to_upload.len(),
            to_delete: self.to_delete.len(),
            unchanged: self.unchanged.len(),
        }
    }

    pub fn upload_identities(&self) -> BTreeSet<&str> {
        self.to_upload.iter().map(|u| u.item.identity.as_str()).collect()
    }

    pub fn delete_identities(&self) -> BTreeSet<&str> {
        self.to_delete.iter().map(|i| i.identity.as_str()).collect()
    }

    pub fn unchanged_identities(&self) -> BTreeSet<&str> {
        self.unchanged.iter().map(|i| i.identity.as_str()).collect()
    }
}

/// Diff a source listing against a destination listing.
///
/// Pure: the same two listings always give the same plan.
pub fn reconcile(source: &Listing, destination: &Listing) -> Result<ChangePlan, PlanError> {
    if source.origin() != Origin::Source {
        return Err(PlanError::WrongOrigin {
            expected: Origin::Source,
            actual: source.origin(),
        });
    }
    if destination.origin() != Origin::Destination {
        return Err(PlanError::WrongOrigin {
            expected: Origin::Destination,
            actual: destination.origin(),
        });
    }

    let mut plan = ChangePlan::default();

    // Listings iterate in identity order, so the plan comes out sorted
    for item in source.iter() {
        match destination.get(&item.identity) {
            None => plan.to_upload.push(Upload {
                item: item.clone(),
                reason: UploadReason::New,
            }),
            Some(existing) if item.fingerprint.matches(&existing.fingerprint) => {
                plan.unchanged.push(item.clone());
            }
            Some(existing) => {
                let comparable = (item.fingerprint.hash.is_some()
                    && existing.fingerprint.hash.is_some())
                    || (item.fingerprint.token.is_some() && existing.fingerprint.token.is_some());
                plan.to_upload.push(Upload {
                    item: item.clone(),
                    reason: if comparable {
                        UploadReason::Changed
                    } else {
                        UploadReason::Unverifiable
                    },
                });
            }
        }
    }

    for item in destination.iter() {
        if !source.contains(&item.identity) {
            plan.to_delete.push(item.clone());
        }
    }

    Ok(plan)
}
