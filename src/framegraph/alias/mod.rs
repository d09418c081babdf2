mod plan;
mod resolved;

pub use plan::{AliasCandidate, AliasPlan, Bucket, Placement, Region, align_up, plan};
pub use resolved::{FinalResource, ResourceOrigin, SlotViews};

pub(crate) use resolved::{Realized, realize, release};
