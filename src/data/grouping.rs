//! Object grouping: contiguous runs of objects that share a group id.
//!
//! Every partitioning decision is made in terms of sampling units. A unit is
//! either a single object or a whole group, and groups are never split
//! across folds.

use serde::{Deserialize, Serialize};

use crate::error::{ensure_config, Result};

/// Atomic entity folds are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SamplingUnit {
    /// Individual records.
    #[default]
    Object,
    /// Groups of records sharing a group id.
    Group,
}

/// Half-open object range `[begin, end)` of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    pub begin: u32,
    pub end: u32,
}

impl Group {
    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == self.begin
    }

    /// Object indices covered by this group.
    #[inline]
    pub fn objects(&self) -> std::ops::Range<u32> {
        self.begin..self.end
    }
}

/// Partition of `n_objects` objects into contiguous groups.
///
/// A trivial grouping has one object per group and stores no bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectsGrouping {
    n_objects: u32,
    /// `None` for the trivial grouping.
    groups: Option<Vec<Group>>,
}

impl ObjectsGrouping {
    /// One object per group.
    pub fn trivial(n_objects: u32) -> Self {
        Self {
            n_objects,
            groups: None,
        }
    }

    /// Build groups from per-object ids. Consecutive equal ids form one group.
    pub fn from_group_ids(group_ids: &[u64]) -> Self {
        let mut groups = Vec::new();
        let mut begin = 0u32;
        for idx in 1..group_ids.len() {
            if group_ids[idx] != group_ids[idx - 1] {
                groups.push(Group {
                    begin,
                    end: idx as u32,
                });
                begin = idx as u32;
            }
        }
        if !group_ids.is_empty() {
            groups.push(Group {
                begin,
                end: group_ids.len() as u32,
            });
        }
        Self {
            n_objects: group_ids.len() as u32,
            groups: Some(groups),
        }
    }

    /// Build from explicit group sizes.
    pub fn from_sizes(sizes: &[u32]) -> Result<Self> {
        let mut groups = Vec::with_capacity(sizes.len());
        let mut begin = 0u32;
        for &size in sizes {
            ensure_config!(size > 0, "group sizes must be positive");
            groups.push(Group {
                begin,
                end: begin + size,
            });
            begin += size;
        }
        Ok(Self {
            n_objects: begin,
            groups: Some(groups),
        })
    }

    #[inline]
    pub fn n_objects(&self) -> u32 {
        self.n_objects
    }

    #[inline]
    pub fn n_groups(&self) -> u32 {
        match &self.groups {
            Some(groups) => groups.len() as u32,
            None => self.n_objects,
        }
    }

    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.groups.is_none()
    }

    /// Object range of group `idx`.
    #[inline]
    pub fn group(&self, idx: u32) -> Group {
        match &self.groups {
            Some(groups) => groups[idx as usize],
            None => Group {
                begin: idx,
                end: idx + 1,
            },
        }
    }

    /// Iterate over all groups in order.
    pub fn groups(&self) -> impl Iterator<Item = Group> + '_ {
        (0..self.n_groups()).map(move |idx| self.group(idx))
    }

    /// Number of sampling units of the given kind.
    pub fn n_units(&self, unit: SamplingUnit) -> u32 {
        match unit {
            SamplingUnit::Object => self.n_objects,
            SamplingUnit::Group => self.n_groups(),
        }
    }

    /// Group containing object `object`.
    pub fn group_of(&self, object: u32) -> u32 {
        match &self.groups {
            None => object,
            Some(groups) => groups.partition_point(|g| g.end <= object) as u32,
        }
    }

    /// Expand group indices into the object indices they cover, in order.
    pub fn expand_groups(&self, group_indices: &[u32]) -> Vec<u32> {
        let mut objects = Vec::new();
        for &idx in group_indices {
            objects.extend(self.group(idx).objects());
        }
        objects
    }

    /// Grouping of the objects selected by `objects`.
    ///
    /// A new group starts whenever the source group changes or the selection
    /// stops being consecutive within a group.
    pub fn subset(&self, objects: &[u32]) -> Self {
        if self.is_trivial() {
            return Self::trivial(objects.len() as u32);
        }
        let mut sizes: Vec<u32> = Vec::new();
        let mut prev: Option<(u32, u32)> = None;
        for &object in objects {
            let group = self.group_of(object);
            match prev {
                Some((prev_group, prev_object))
                    if prev_group == group && prev_object + 1 == object =>
                {
                    if let Some(last) = sizes.last_mut() {
                        *last += 1;
                    }
                }
                _ => sizes.push(1),
            }
            prev = Some((group, object));
        }
        let mut groups = Vec::with_capacity(sizes.len());
        let mut begin = 0u32;
        for size in sizes {
            groups.push(Group {
                begin,
                end: begin + size,
            });
            begin += size;
        }
        Self {
            n_objects: objects.len() as u32,
            groups: Some(groups),
        }
    }
}
