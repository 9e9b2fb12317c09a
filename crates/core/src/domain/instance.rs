// Instance Identity

use serde::{Deserialize, Serialize};

/// Identity of one running copy of the service.
///
/// `instance_id` is written into `owner_instance_id`; the fleet numbers are
/// observability labels only and never drive partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub instance_number: u32,
    pub total_instances: u32,
}

impl InstanceIdentity {
    pub fn new(instance_id: impl Into<String>, instance_number: u32, total_instances: u32) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_number,
            total_instances,
        }
    }

    /// Single-instance identity (tests, local runs)
    pub fn standalone(instance_id: impl Into<String>) -> Self {
        Self::new(instance_id, 1, 1)
    }
}
