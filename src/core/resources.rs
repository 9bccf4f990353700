//! Resource quantities and arithmetic on them.
//!
//! Quantities are integers in base units: cpu in millicores, memory and ephemeral storage in
//! bytes, pods as a count. Any other resource name is an extended (scalar) resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";
pub const RESOURCE_PODS: &str = "pods";

/// Map of resource name to quantity as it appears in api objects.
pub type ResourceList = BTreeMap<String, i64>;

/// Structured form of a resource list which is convenient for accounting on nodes.
#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Resource {
    pub milli_cpu: i64,
    pub memory: i64,
    pub ephemeral_storage: i64,
    pub allowed_pod_number: i64,
    #[serde(default)]
    pub scalar_resources: BTreeMap<String, i64>,
}

impl Resource {
    pub fn from_resource_list(list: &ResourceList) -> Self {
        let mut resource = Resource::default();
        resource.add(list);
        resource
    }

    pub fn add(&mut self, list: &ResourceList) {
        for (name, quantity) in list {
            match name.as_str() {
                RESOURCE_CPU => self.milli_cpu += quantity,
                RESOURCE_MEMORY => self.memory += quantity,
                RESOURCE_EPHEMERAL_STORAGE => self.ephemeral_storage += quantity,
                RESOURCE_PODS => self.allowed_pod_number += quantity,
                _ => *self.scalar_resources.entry(name.clone()).or_insert(0) += quantity,
            }
        }
    }

    pub fn sub(&mut self, list: &ResourceList) {
        for (name, quantity) in list {
            match name.as_str() {
                RESOURCE_CPU => self.milli_cpu -= quantity,
                RESOURCE_MEMORY => self.memory -= quantity,
                RESOURCE_EPHEMERAL_STORAGE => self.ephemeral_storage -= quantity,
                RESOURCE_PODS => self.allowed_pod_number -= quantity,
                _ => *self.scalar_resources.entry(name.clone()).or_insert(0) -= quantity,
            }
        }
    }

    pub fn to_resource_list(&self) -> ResourceList {
        let mut list = ResourceList::from([
            (RESOURCE_CPU.to_string(), self.milli_cpu),
            (RESOURCE_MEMORY.to_string(), self.memory),
            (RESOURCE_PODS.to_string(), self.allowed_pod_number),
            (RESOURCE_EPHEMERAL_STORAGE.to_string(), self.ephemeral_storage),
        ]);
        for (name, quantity) in self.scalar_resources.iter() {
            list.insert(name.clone(), *quantity);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_sub_request() {
        let request = ResourceList::from([
            (RESOURCE_CPU.to_string(), 500),
            (RESOURCE_MEMORY.to_string(), 1024),
            ("nvidia.com/gpu".to_string(), 1),
        ]);
        let mut resource = Resource::default();
        resource.add(&request);
        resource.add(&request);
        assert_eq!(1000, resource.milli_cpu);
        assert_eq!(2048, resource.memory);
        assert_eq!(Some(&2), resource.scalar_resources.get("nvidia.com/gpu"));

        resource.sub(&request);
        assert_eq!(500, resource.milli_cpu);
        assert_eq!(Some(&1), resource.scalar_resources.get("nvidia.com/gpu"));
    }

    #[test]
    fn test_to_resource_list_contains_scalars() {
        let mut resource = Resource::from_resource_list(&ResourceList::from([
            (RESOURCE_CPU.to_string(), 2000),
            (RESOURCE_PODS.to_string(), 110),
        ]));
        resource
            .scalar_resources
            .insert("example.com/foo".to_string(), 3);

        let list = resource.to_resource_list();
        assert_eq!(Some(&2000), list.get(RESOURCE_CPU));
        assert_eq!(Some(&0), list.get(RESOURCE_MEMORY));
        assert_eq!(Some(&110), list.get(RESOURCE_PODS));
        assert_eq!(Some(&3), list.get("example.com/foo"));
    }
}
