//! Scheduling queue: active pods ordered by the queue sort plugin and pods which failed
//! scheduling and wait for activation or flush.

use std::collections::BTreeMap;

use log::debug;

use crate::core::pod::Pod;

/// Default value (secs) for the maximum time a pod can stay in unschedulablePods. If a pod stays in
/// unschedulablePods for longer than this value, it is moved back to the active queue.
pub const DEFAULT_POD_MAX_IN_UNSCHEDULABLE_PODS_DURATION: f64 = 5.0 * 60.0;

#[derive(Debug, Clone)]
pub struct QueuedPodInfo {
    pub pod: Pod,
    /// The time (secs since scheduler start) pod added to the scheduling queue.
    pub timestamp: f64,
    /// Number of schedule attempts before successfully scheduled.
    pub attempts: usize,
    /// The time when the pod is added to the queue for the first time. The pod may be added
    /// back to the queue multiple times before it's successfully scheduled.
    /// It shouldn't be updated once initialized.
    pub initial_attempt_timestamp: f64,
}

impl QueuedPodInfo {
    pub fn new(pod: Pod, timestamp: f64) -> Self {
        Self {
            pod,
            timestamp,
            attempts: 0,
            initial_attempt_timestamp: timestamp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnschedulablePodKey {
    // Stored as bits so that the key is totally ordered, timestamps are never negative.
    insert_timestamp_bits: u64,
    pub pod_uid: String,
}

impl UnschedulablePodKey {
    pub fn new(pod_uid: &str, insert_timestamp: f64) -> Self {
        Self {
            insert_timestamp_bits: insert_timestamp.max(0.0).to_bits(),
            pod_uid: pod_uid.to_string(),
        }
    }

    pub fn insert_timestamp(&self) -> f64 {
        f64::from_bits(self.insert_timestamp_bits)
    }
}

#[derive(Default)]
pub struct SchedulingQueue {
    active: Vec<QueuedPodInfo>,
    unschedulable: BTreeMap<UnschedulablePodKey, QueuedPodInfo>,
}

impl SchedulingQueue {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, pod: Pod, now: f64) {
        self.active.push(QueuedPodInfo::new(pod, now));
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn unschedulable_len(&self) -> usize {
        self.unschedulable.len()
    }

    /// Pops the pod which goes first according to `less`.
    pub fn pop<F>(&mut self, less: F) -> Option<QueuedPodInfo>
    where
        F: Fn(&QueuedPodInfo, &QueuedPodInfo) -> bool,
    {
        if self.active.is_empty() {
            return None;
        }
        let mut best = 0;
        for idx in 1..self.active.len() {
            if less(&self.active[idx], &self.active[best]) {
                best = idx;
            }
        }
        Some(self.active.swap_remove(best))
    }

    pub fn add_unschedulable(&mut self, mut info: QueuedPodInfo, now: f64) {
        info.timestamp = now;
        self.unschedulable.insert(
            UnschedulablePodKey::new(&info.pod.metadata.uid, now),
            info,
        );
    }

    /// Moves pods with given uids from unschedulable to active queue. Pods which are not
    /// unschedulable (already active, waiting or bound) are left alone.
    pub fn activate(&mut self, uids: &[String], now: f64) -> usize {
        let keys: Vec<UnschedulablePodKey> = self
            .unschedulable
            .keys()
            .filter(|key| uids.contains(&key.pod_uid))
            .cloned()
            .collect();
        for key in keys.iter() {
            if let Some(mut info) = self.unschedulable.remove(key) {
                debug!("Activating pod {:?}", info.pod.namespaced_name());
                info.timestamp = now;
                self.active.push(info);
            }
        }
        keys.len()
    }

    /// Moves pods which stayed in unschedulable queue longer than `max_duration` to active queue.
    pub fn flush_unschedulable_left_over(&mut self, now: f64, max_duration: f64) -> usize {
        let keys: Vec<UnschedulablePodKey> = self
            .unschedulable
            .keys()
            .take_while(|key| now - key.insert_timestamp() > max_duration)
            .cloned()
            .collect();
        for key in keys.iter() {
            if let Some(mut info) = self.unschedulable.remove(key) {
                info.timestamp = now;
                self.active.push(info);
            }
        }
        keys.len()
    }

    /// Drops the pod from both queues, returns whether it was queued.
    pub fn delete(&mut self, uid: &str) -> bool {
        let before = self.active.len() + self.unschedulable.len();
        self.active.retain(|info| info.pod.metadata.uid != uid);
        self.unschedulable.retain(|key, _| key.pod_uid != uid);
        before != self.active.len() + self.unschedulable.len()
    }

    /// Moves every unschedulable pod to active queue, used after cluster state changed.
    pub fn move_all_to_active(&mut self, now: f64) {
        let unschedulable = std::mem::take(&mut self.unschedulable);
        for (_, mut info) in unschedulable.into_iter() {
            info.timestamp = now;
            self.active.push(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn info(name: &str, timestamp: f64) -> QueuedPodInfo {
        QueuedPodInfo::new(Pod::new("default", name, Default::default()), timestamp)
    }

    #[test]
    fn test_pop_respects_less() {
        let mut queue = SchedulingQueue::new();
        queue.active.push(info("b", 1.0));
        queue.active.push(info("a", 5.0));
        queue.active.push(info("c", 0.5));

        let by_timestamp = |a: &QueuedPodInfo, b: &QueuedPodInfo| a.timestamp < b.timestamp;
        assert_eq!("c", queue.pop(by_timestamp).unwrap().pod.metadata.name);
        assert_eq!("b", queue.pop(by_timestamp).unwrap().pod.metadata.name);
        assert_eq!("a", queue.pop(by_timestamp).unwrap().pod.metadata.name);
        assert!(queue.pop(by_timestamp).is_none());
    }

    #[test]
    fn test_unschedulable_queue_order() {
        let mut queue = BTreeMap::<UnschedulablePodKey, QueuedPodInfo>::new();
        for (name, ts) in [("some_pod", 1.0), ("some_pod_2", 10.0), ("some_pod_5", 7.0), ("some_pod_3", 5.0), ("some_pod_4", 7.0)] {
            queue.insert(UnschedulablePodKey::new(&format!("default/{}", name), ts), info(name, ts));
        }

        let entries: Vec<(UnschedulablePodKey, QueuedPodInfo)> = queue.into_iter().collect();

        assert_eq!("default/some_pod", entries[0].0.pod_uid);
        assert_eq!("default/some_pod_3", entries[1].0.pod_uid);
        assert_eq!("default/some_pod_4", entries[2].0.pod_uid);
        assert_eq!("default/some_pod_5", entries[3].0.pod_uid);
        assert_eq!("default/some_pod_2", entries[4].0.pod_uid);
        assert_eq!(1.0, entries[0].0.insert_timestamp());
        assert_eq!(10.0, entries[4].0.insert_timestamp());
    }

    #[test]
    fn test_activate_and_flush() {
        let mut queue = SchedulingQueue::new();
        queue.add_unschedulable(info("a", 0.0), 0.0);
        queue.add_unschedulable(info("b", 0.0), 100.0);
        queue.add_unschedulable(info("c", 0.0), 200.0);

        assert_eq!(1, queue.activate(&["default/b".to_string(), "default/zzz".to_string()], 250.0));
        assert_eq!(1, queue.active_len());
        assert_eq!(2, queue.unschedulable_len());

        let flushed = queue.flush_unschedulable_left_over(350.0, DEFAULT_POD_MAX_IN_UNSCHEDULABLE_PODS_DURATION);
        assert_eq!(1, flushed);
        assert_eq!(2, queue.active_len());

        queue.move_all_to_active(400.0);
        assert_eq!(3, queue.active_len());
        assert_eq!(0, queue.unschedulable_len());

        assert!(queue.delete("default/a"));
        assert!(!queue.delete("default/a"));
        assert_eq!(2, queue.active_len());
    }
}
