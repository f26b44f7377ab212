//! Adaptive link collections.
//!
//! A link collection is a bag of record references owned by one record:
//! each member carries a count of how many times it was added, capped by
//! [`LinkOptions::counter_max`]. Small collections are stored inline; large
//! ones move to a tree in `linkbag_<segment>.lbt`, where the segment is the
//! owner's. The [`ConversionPolicy`] decides when a collection switches
//! form.

mod handle;
mod options;
mod policy;
mod representation;

pub use handle::{LinkCollection, LinkIter};
pub use options::LinkOptions;
pub use policy::{ConversionPolicy, Threshold};
pub use representation::{LinkEntry, Representation};

pub(crate) use representation::{
    link_key, link_key_bounds, link_key_count, LinkState, LinkTable, LINK_KEY_LEN,
};
