//! Animation grouping and coordination
//!
//! Tweens are grouped into named timelines by category. Groups queued within
//! one frame are merged per category before they start, and every group can
//! be cancelled by id or by category.

use crate::config::AnimationConfig;
use carousel_resources::{Animation, AnimationId, ResourceManager};
use carousel_scheduler::{RenderScheduler, UpdateFn, UpdatePriority};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Scheduler task id used for the pending-group flush
pub const FLUSH_TASK_ID: &str = "animation-coordinator:flush";

/// Callback run when a group starts or completes
pub type GroupCallback = Box<dyn FnOnce() + Send + 'static>;

/// Timeline owned by the animation engine
pub trait Timeline: Send + Sync {
    /// Insert a child at `position` seconds
    fn add(&self, animation: Arc<dyn Animation>, position: f64);

    /// Register the completion callback
    fn set_on_complete(&self, callback: GroupCallback);

    /// Start playback
    fn play(&self);

    /// Stop without completing
    fn kill(&self);

    fn is_active(&self) -> bool;
}

/// Factory for timelines
pub trait AnimationEngine: Send + Sync {
    fn create_timeline(&self) -> Arc<dyn Timeline>;
}

/// Animation category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationCategory {
    Transition,
    Interaction,
    Mouse,
    Displacement,
    Filter,
    Text,
    Idle,
}

impl AnimationCategory {
    /// Scheduler priority for frame-synced work of this category
    pub fn priority(self) -> UpdatePriority {
        match self {
            AnimationCategory::Transition => UpdatePriority::Critical,
            AnimationCategory::Interaction | AnimationCategory::Mouse => UpdatePriority::High,
            AnimationCategory::Displacement | AnimationCategory::Filter | AnimationCategory::Text => {
                UpdatePriority::Normal
            }
            AnimationCategory::Idle => UpdatePriority::Low,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AnimationCategory::Transition => "transition",
            AnimationCategory::Interaction => "interaction",
            AnimationCategory::Mouse => "mouse",
            AnimationCategory::Displacement => "displacement",
            AnimationCategory::Filter => "filter",
            AnimationCategory::Text => "text",
            AnimationCategory::Idle => "idle",
        }
    }
}

impl fmt::Display for AnimationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Description of a group to create
pub struct AnimationGroupConfig {
    pub id: String,
    pub category: AnimationCategory,
    /// Overrides the category priority
    pub priority: Option<UpdatePriority>,
    pub animations: Vec<Arc<dyn Animation>>,
    pub on_start: Vec<GroupCallback>,
    pub on_complete: Vec<GroupCallback>,
}

impl AnimationGroupConfig {
    pub fn new(id: impl Into<String>, category: AnimationCategory) -> Self {
        Self {
            id: id.into(),
            category,
            priority: None,
            animations: Vec::new(),
            on_start: Vec::new(),
            on_complete: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: UpdatePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_animation(mut self, animation: Arc<dyn Animation>) -> Self {
        self.animations.push(animation);
        self
    }

    pub fn on_start(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_start.push(Box::new(callback));
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete.push(Box::new(callback));
        self
    }

    /// Explicit priority or the category default
    pub fn effective_priority(&self) -> UpdatePriority {
        self.priority.unwrap_or_else(|| self.category.priority())
    }
}

impl fmt::Debug for AnimationGroupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationGroupConfig")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("animations", &self.animations.len())
            .finish_non_exhaustive()
    }
}

/// Merge queued groups per category
///
/// Categories keep their first-queued order. A category with several groups
/// becomes one group named after the first, with animations and callbacks
/// concatenated in queue order and the highest priority of the bucket.
pub fn merge_groups(pending: Vec<AnimationGroupConfig>) -> Vec<AnimationGroupConfig> {
    let mut buckets: Vec<(AnimationCategory, Vec<AnimationGroupConfig>)> = Vec::new();
    for config in pending {
        match buckets.iter_mut().find(|(category, _)| *category == config.category) {
            Some((_, bucket)) => bucket.push(config),
            None => buckets.push((config.category, vec![config])),
        }
    }

    buckets
        .into_iter()
        .filter_map(|(_, bucket)| {
            let mut groups = bucket.into_iter();
            let mut merged = groups.next()?;
            let mut priority = merged.effective_priority();
            let mut count = 1;
            for group in groups {
                priority = priority.max(group.effective_priority());
                merged.animations.extend(group.animations);
                merged.on_start.extend(group.on_start);
                merged.on_complete.extend(group.on_complete);
                count += 1;
            }
            if count > 1 {
                merged.priority = Some(priority);
                tracing::debug!(id = %merged.id, category = %merged.category, count, "merged animation groups");
            }
            Some(merged)
        })
        .collect()
}

/// Coordinator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub created: u64,
    pub merged: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub active: usize,
    pub pending: usize,
}

struct GroupRecord {
    serial: u64,
    category: AnimationCategory,
    priority: UpdatePriority,
    timeline: Arc<dyn Timeline>,
    members: Vec<Arc<dyn Animation>>,
    started_at: Instant,
    on_complete: Vec<GroupCallback>,
    resource_id: Option<AnimationId>,
}

struct PendingGroup {
    config: AnimationGroupConfig,
    queued_at: Instant,
}

#[derive(Default)]
struct CoordinatorState {
    groups: HashMap<String, GroupRecord>,
    pending: Vec<PendingGroup>,
    serial: u64,
    stats: CoordinatorStats,
}

struct Inner {
    state: Mutex<CoordinatorState>,
    engine: Arc<dyn AnimationEngine>,
    scheduler: Option<Arc<RenderScheduler>>,
    resources: Option<Arc<ResourceManager>>,
    config: AnimationConfig,
}

/// Info about a running group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub id: String,
    pub category: AnimationCategory,
    pub priority: UpdatePriority,
    pub members: usize,
    pub running_ms: u128,
}

/// Exposes a timeline to the resource registry
struct TrackedTimeline(Arc<dyn Timeline>);

impl Animation for TrackedTimeline {
    fn kill(&self) {
        self.0.kill();
    }

    fn is_active(&self) -> bool {
        self.0.is_active()
    }
}

/// Animation coordinator
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AnimationCoordinator {
    inner: Arc<Inner>,
}

impl AnimationCoordinator {
    pub fn new(engine: Arc<dyn AnimationEngine>, config: AnimationConfig) -> Self {
        Self::build(engine, config, None, None)
    }

    /// Coordinator that flushes through `scheduler` and registers timelines
    /// with `resources`
    pub fn with_runtime(
        engine: Arc<dyn AnimationEngine>,
        config: AnimationConfig,
        scheduler: Arc<RenderScheduler>,
        resources: Arc<ResourceManager>,
    ) -> Self {
        Self::build(engine, config, Some(scheduler), Some(resources))
    }

    fn build(
        engine: Arc<dyn AnimationEngine>,
        config: AnimationConfig,
        scheduler: Option<Arc<RenderScheduler>>,
        resources: Option<Arc<ResourceManager>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CoordinatorState::default()),
                engine,
                scheduler,
                resources,
                config,
            }),
        }
    }

    /// Create and start a group immediately
    ///
    /// Every member is placed at offset 0 of one timeline. A running group
    /// with the same id is cancelled first. Returns `None` when the owning
    /// resource manager no longer accepts animations; the members are
    /// killed in that case.
    pub fn create_animation_group(&self, config: AnimationGroupConfig) -> Option<String> {
        create_group(&self.inner, config)
    }

    /// Defer a group to the next frame so same-category groups merge
    pub fn queue_animation_group(&self, config: AnimationGroupConfig) {
        self.queue_animation_group_at(config, Instant::now());
    }

    /// [`queue_animation_group`](Self::queue_animation_group) with an
    /// explicit enqueue time for [`poll`](Self::poll)
    pub fn queue_animation_group_at(&self, config: AnimationGroupConfig, now: Instant) {
        let priority = {
            let mut state = self.inner.state.lock();
            state.pending.push(PendingGroup {
                config,
                queued_at: now,
            });
            state
                .pending
                .iter()
                .map(|p| p.config.effective_priority())
                .max()
                .unwrap_or_default()
        };

        if let Some(scheduler) = &self.inner.scheduler {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            scheduler.schedule_update(
                FLUSH_TASK_ID,
                priority,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        flush(&inner);
                    }
                }),
            );
        }
    }

    /// Merge and create every queued group now
    ///
    /// Returns the ids of the created groups.
    pub fn flush_pending(&self) -> Vec<String> {
        flush(&self.inner)
    }

    /// Flush queued groups once the oldest has waited the batch window
    pub fn poll(&self, now: Instant) -> Vec<String> {
        let due = {
            let state = self.inner.state.lock();
            state.pending.first().is_some_and(|oldest| {
                now.saturating_duration_since(oldest.queued_at) >= self.inner.config.batch_window
            })
        };
        if due {
            flush(&self.inner)
        } else {
            Vec::new()
        }
    }

    /// Cancel every running and queued group of a category
    ///
    /// Returns the number of groups cancelled.
    pub fn cancel_animations_by_type(&self, category: AnimationCategory) -> usize {
        let (records, pending) = {
            let mut state = self.inner.state.lock();
            let ids: Vec<String> = state
                .groups
                .iter()
                .filter(|(_, record)| record.category == category)
                .map(|(id, _)| id.clone())
                .collect();
            let records: Vec<GroupRecord> =
                ids.iter().filter_map(|id| state.groups.remove(id)).collect();
            let (dropped, kept): (Vec<PendingGroup>, Vec<PendingGroup>) =
                std::mem::take(&mut state.pending)
                    .into_iter()
                    .partition(|p| p.config.category == category);
            state.pending = kept;
            state.stats.cancelled += (records.len() + dropped.len()) as u64;
            (records, dropped)
        };

        let count = records.len() + pending.len();
        for record in records {
            stop_group(&self.inner, record);
        }
        if count > 0 {
            tracing::debug!(%category, count, "cancelled animation groups");
        }
        count
    }

    /// Cancel one group by id; unknown ids are a no-op
    pub fn cancel_animation_group(&self, id: &str) -> bool {
        let (record, was_pending) = {
            let mut state = self.inner.state.lock();
            let record = state.groups.remove(id);
            let before = state.pending.len();
            state.pending.retain(|p| p.config.id != id);
            let was_pending = state.pending.len() != before;
            if record.is_some() || was_pending {
                state.stats.cancelled += 1;
            }
            (record, was_pending)
        };

        match record {
            Some(record) => {
                stop_group(&self.inner, record);
                true
            }
            None => was_pending,
        }
    }

    /// Cancel everything; returns the number of groups cancelled
    pub fn cancel_all(&self) -> usize {
        let (records, pending) = {
            let mut state = self.inner.state.lock();
            let records: Vec<GroupRecord> = state.groups.drain().map(|(_, r)| r).collect();
            let pending = std::mem::take(&mut state.pending).len();
            state.stats.cancelled += (records.len() + pending) as u64;
            (records, pending)
        };
        let count = records.len() + pending;
        for record in records {
            stop_group(&self.inner, record);
        }
        count
    }

    /// Route frame-synced work through the scheduler at the category's
    /// priority
    ///
    /// Without a scheduler the callback runs immediately and `false` is
    /// returned.
    pub fn schedule_frame_update(
        &self,
        category: AnimationCategory,
        id: &str,
        callback: UpdateFn,
    ) -> bool {
        match &self.inner.scheduler {
            Some(scheduler) => {
                scheduler.schedule_update(format!("animation:{id}"), category.priority(), callback);
                true
            }
            None => {
                callback();
                false
            }
        }
    }

    pub fn is_group_active(&self, id: &str) -> bool {
        self.inner.state.lock().groups.contains_key(id)
    }

    pub fn active_group_count(&self) -> usize {
        self.inner.state.lock().groups.len()
    }

    pub fn pending_group_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Running groups sorted by id
    pub fn groups(&self) -> Vec<GroupInfo> {
        let state = self.inner.state.lock();
        let mut groups: Vec<GroupInfo> = state
            .groups
            .iter()
            .map(|(id, record)| GroupInfo {
                id: id.clone(),
                category: record.category,
                priority: record.priority,
                members: record.members.len(),
                running_ms: record.started_at.elapsed().as_millis(),
            })
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.inner.state.lock();
        CoordinatorStats {
            active: state.groups.len(),
            pending: state.pending.len(),
            ..state.stats
        }
    }
}

fn flush(inner: &Arc<Inner>) -> Vec<String> {
    let pending: Vec<AnimationGroupConfig> = {
        let mut state = inner.state.lock();
        std::mem::take(&mut state.pending)
            .into_iter()
            .map(|p| p.config)
            .collect()
    };
    if pending.is_empty() {
        return Vec::new();
    }

    let queued = pending.len();
    let merged = merge_groups(pending);
    inner.state.lock().stats.merged += (queued - merged.len()) as u64;

    merged
        .into_iter()
        .filter_map(|config| create_group(inner, config))
        .collect()
}

fn create_group(inner: &Arc<Inner>, config: AnimationGroupConfig) -> Option<String> {
    if let Some(resources) = &inner.resources {
        if !resources.is_active() {
            for animation in &config.animations {
                animation.kill();
            }
            tracing::debug!(id = %config.id, "animation group refused after unmount");
            return None;
        }
    }

    let AnimationGroupConfig {
        id,
        category,
        priority,
        animations,
        on_start,
        on_complete,
    } = config;
    let priority = priority.unwrap_or_else(|| category.priority());

    let replaced = {
        let mut state = inner.state.lock();
        let replaced = state.groups.remove(&id);
        if replaced.is_some() {
            state.stats.cancelled += 1;
        }
        replaced
    };
    if let Some(record) = replaced {
        tracing::debug!(%id, "replacing running animation group");
        stop_group(inner, record);
    }

    let timeline = inner.engine.create_timeline();
    for animation in &animations {
        timeline.add(animation.clone(), 0.0);
    }

    let serial = {
        let mut state = inner.state.lock();
        state.serial += 1;
        state.serial
    };
    let weak = Arc::downgrade(inner);
    let group_id = id.clone();
    timeline.set_on_complete(Box::new(move || {
        if let Some(inner) = weak.upgrade() {
            complete_group(&inner, &group_id, serial);
        }
    }));

    let resource_id = inner
        .resources
        .as_ref()
        .and_then(|resources| resources.track_animation(Arc::new(TrackedTimeline(timeline.clone()))));

    {
        let mut state = inner.state.lock();
        state.groups.insert(
            id.clone(),
            GroupRecord {
                serial,
                category,
                priority,
                timeline: timeline.clone(),
                members: animations,
                started_at: Instant::now(),
                on_complete,
                resource_id,
            },
        );
        state.stats.created += 1;
    }
    tracing::debug!(%id, %category, ?priority, "animation group created");

    for callback in on_start {
        callback();
    }
    timeline.play();
    Some(id)
}

fn complete_group(inner: &Arc<Inner>, id: &str, serial: u64) {
    let record = {
        let mut state = inner.state.lock();
        match state.groups.get(id) {
            Some(record) if record.serial == serial => {
                state.stats.completed += 1;
                state.groups.remove(id)
            }
            _ => None,
        }
    };
    let Some(record) = record else {
        return;
    };

    if let (Some(resources), Some(resource_id)) = (&inner.resources, record.resource_id) {
        resources.release_animation(resource_id);
    }
    tracing::trace!(%id, "animation group completed");
    for callback in record.on_complete {
        callback();
    }
}

/// Stop members first, then the timeline
fn stop_group(inner: &Inner, record: GroupRecord) {
    for member in &record.members {
        member.kill();
    }
    let released = match (&inner.resources, record.resource_id) {
        (Some(resources), Some(resource_id)) => resources.release_animation(resource_id),
        _ => false,
    };
    if !released {
        record.timeline.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessBackend, HeadlessEngine};
    use carousel_resources::{ResourceConfig, ShaderResourceManager};
    use std::time::Duration;

    fn coordinator() -> (AnimationCoordinator, Arc<HeadlessEngine>, HeadlessBackend) {
        let backend = HeadlessBackend::new();
        let engine = Arc::new(backend.engine());
        let coordinator = AnimationCoordinator::new(engine.clone(), AnimationConfig::default());
        (coordinator, engine, backend)
    }

    fn log_into(log: &Arc<Mutex<Vec<&'static str>>>, entry: &'static str) -> impl FnOnce() + Send + 'static {
        let log = log.clone();
        move || log.lock().push(entry)
    }

    #[test]
    fn test_category_priorities() {
        assert_eq!(AnimationCategory::Transition.priority(), UpdatePriority::Critical);
        assert_eq!(AnimationCategory::Interaction.priority(), UpdatePriority::High);
        assert_eq!(AnimationCategory::Mouse.priority(), UpdatePriority::High);
        assert_eq!(AnimationCategory::Displacement.priority(), UpdatePriority::Normal);
        assert_eq!(AnimationCategory::Filter.priority(), UpdatePriority::Normal);
        assert_eq!(AnimationCategory::Text.priority(), UpdatePriority::Normal);
        assert_eq!(AnimationCategory::Idle.priority(), UpdatePriority::Low);
    }

    #[test]
    fn test_group_completes_and_runs_callbacks() {
        let (coordinator, engine, backend) = coordinator();
        let log = Arc::new(Mutex::new(Vec::new()));

        let config = AnimationGroupConfig::new("slide-in", AnimationCategory::Transition)
            .with_animation(backend.tween())
            .with_animation(backend.tween())
            .on_start(log_into(&log, "start"))
            .on_complete(log_into(&log, "done"));
        assert_eq!(coordinator.create_animation_group(config).as_deref(), Some("slide-in"));
        assert!(coordinator.is_group_active("slide-in"));
        assert_eq!(*log.lock(), vec!["start"]);

        let timeline = engine.last_timeline().unwrap();
        assert_eq!(timeline.positions(), vec![0.0, 0.0]);
        assert!(timeline.is_playing());

        timeline.complete();
        assert!(!coordinator.is_group_active("slide-in"));
        assert_eq!(*log.lock(), vec!["start", "done"]);
        assert_eq!(coordinator.stats().completed, 1);
    }

    #[test]
    fn test_cancel_stops_members_and_skips_completion() {
        let (coordinator, engine, backend) = coordinator();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tween = backend.tween();

        coordinator.create_animation_group(
            AnimationGroupConfig::new("hover", AnimationCategory::Mouse)
                .with_animation(tween.clone())
                .on_complete(log_into(&log, "done")),
        );
        assert!(coordinator.cancel_animation_group("hover"));
        assert!(tween.is_killed());
        assert!(engine.last_timeline().unwrap().is_killed());

        // Completion after cancellation is ignored
        engine.last_timeline().unwrap().complete();
        assert!(log.lock().is_empty());
        assert!(!coordinator.cancel_animation_group("hover"));
        assert!(!coordinator.cancel_animation_group("unknown"));
    }

    #[test]
    fn test_cancel_by_type() {
        let (coordinator, _engine, backend) = coordinator();
        for id in ["glitch-a", "glitch-b"] {
            coordinator.create_animation_group(
                AnimationGroupConfig::new(id, AnimationCategory::Filter).with_animation(backend.tween()),
            );
        }
        coordinator.create_animation_group(
            AnimationGroupConfig::new("float", AnimationCategory::Idle).with_animation(backend.tween()),
        );
        coordinator.queue_animation_group(AnimationGroupConfig::new("glitch-c", AnimationCategory::Filter));

        assert_eq!(coordinator.cancel_animations_by_type(AnimationCategory::Filter), 3);
        assert_eq!(coordinator.active_group_count(), 1);
        assert_eq!(coordinator.pending_group_count(), 0);
        assert!(coordinator.is_group_active("float"));
        assert_eq!(backend.snapshot().tweens_killed, 2);
    }

    #[test]
    fn test_merge_groups_per_category() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let backend = HeadlessBackend::new();
        let merged = merge_groups(vec![
            AnimationGroupConfig::new("a", AnimationCategory::Text)
                .with_animation(backend.tween())
                .on_complete(log_into(&log, "a")),
            AnimationGroupConfig::new("b", AnimationCategory::Idle).with_animation(backend.tween()),
            AnimationGroupConfig::new("c", AnimationCategory::Text)
                .with_priority(UpdatePriority::High)
                .with_animation(backend.tween())
                .with_animation(backend.tween())
                .on_complete(log_into(&log, "c")),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[0].animations.len(), 3);
        assert_eq!(merged[0].priority, Some(UpdatePriority::High));
        assert_eq!(merged[1].id, "b");
        assert_eq!(merged[1].priority, None);

        let text = merged.into_iter().next().unwrap();
        for callback in text.on_complete {
            callback();
        }
        assert_eq!(*log.lock(), vec!["a", "c"]);
    }

    #[test]
    fn test_queued_groups_flush_through_scheduler() {
        let backend = HeadlessBackend::new();
        let engine = Arc::new(backend.engine());
        let scheduler = Arc::new(RenderScheduler::default());
        let resources = Arc::new(ResourceManager::new(
            ResourceConfig::default(),
            Arc::new(ShaderResourceManager::default()),
        ));
        let coordinator = AnimationCoordinator::with_runtime(
            engine.clone(),
            AnimationConfig::default(),
            scheduler.clone(),
            resources.clone(),
        );

        coordinator.queue_animation_group(
            AnimationGroupConfig::new("text-1", AnimationCategory::Text).with_animation(backend.tween()),
        );
        coordinator.queue_animation_group(
            AnimationGroupConfig::new("text-2", AnimationCategory::Text).with_animation(backend.tween()),
        );
        assert_eq!(coordinator.active_group_count(), 0);
        assert_eq!(scheduler.pending_updates(), 1);

        scheduler.on_frame(Instant::now());
        assert_eq!(coordinator.active_group_count(), 1);
        assert!(coordinator.is_group_active("text-1"));
        assert_eq!(engine.timeline_count(), 1);
        assert_eq!(coordinator.stats().merged, 1);
        assert_eq!(resources.stats().animations, 1);

        // Completion releases the timeline from the registry
        engine.last_timeline().unwrap().complete();
        assert_eq!(resources.stats().animations, 0);
    }

    #[test]
    fn test_poll_respects_batch_window() {
        let (coordinator, _engine, _backend) = coordinator();
        let now = Instant::now();
        coordinator.queue_animation_group_at(AnimationGroupConfig::new("idle", AnimationCategory::Idle), now);

        assert!(coordinator.poll(now + Duration::from_millis(5)).is_empty());
        assert_eq!(coordinator.poll(now + Duration::from_millis(50)), vec!["idle".to_string()]);
        assert_eq!(coordinator.pending_group_count(), 0);
    }

    #[test]
    fn test_refused_after_unmount() {
        let backend = HeadlessBackend::new();
        let resources = Arc::new(ResourceManager::new(
            ResourceConfig::default(),
            Arc::new(ShaderResourceManager::default()),
        ));
        let coordinator = AnimationCoordinator::with_runtime(
            Arc::new(backend.engine()),
            AnimationConfig::default(),
            Arc::new(RenderScheduler::default()),
            resources.clone(),
        );
        resources.mark_unmounting();

        let tween = backend.tween();
        let created = coordinator.create_animation_group(
            AnimationGroupConfig::new("late", AnimationCategory::Transition).with_animation(tween.clone()),
        );
        assert!(created.is_none());
        assert!(tween.is_killed());
    }

    #[test]
    fn test_recreating_group_replaces_previous() {
        let (coordinator, engine, backend) = coordinator();
        let first = backend.tween();
        coordinator.create_animation_group(
            AnimationGroupConfig::new("tilt", AnimationCategory::Interaction).with_animation(first.clone()),
        );
        let old_timeline = engine.last_timeline().unwrap();
        coordinator.create_animation_group(
            AnimationGroupConfig::new("tilt", AnimationCategory::Interaction).with_animation(backend.tween()),
        );

        assert!(first.is_killed());
        assert!(old_timeline.is_killed());
        assert_eq!(coordinator.active_group_count(), 1);
        assert_eq!(coordinator.stats().cancelled, 1);
        assert_eq!(coordinator.stats().created, 2);

        // A stale completion must not remove the new group
        old_timeline.complete();
        assert!(coordinator.is_group_active("tilt"));
    }

    #[test]
    fn test_schedule_frame_update() {
        let (coordinator, _engine, _backend) = coordinator();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        assert!(!coordinator.schedule_frame_update(
            AnimationCategory::Displacement,
            "wave",
            Box::new(move || *flag.lock() = true),
        ));
        assert!(*ran.lock());

        let backend = HeadlessBackend::new();
        let scheduler = Arc::new(RenderScheduler::default());
        let driven = AnimationCoordinator::with_runtime(
            Arc::new(backend.engine()),
            AnimationConfig::default(),
            scheduler.clone(),
            Arc::new(ResourceManager::new(
                ResourceConfig::default(),
                Arc::new(ShaderResourceManager::default()),
            )),
        );
        assert!(driven.schedule_frame_update(AnimationCategory::Displacement, "wave", Box::new(|| {})));
        assert!(scheduler.is_pending("animation:wave"));
    }

    #[test]
    fn test_cancel_all() {
        let (coordinator, _engine, backend) = coordinator();
        coordinator.create_animation_group(
            AnimationGroupConfig::new("a", AnimationCategory::Idle).with_animation(backend.tween()),
        );
        coordinator.queue_animation_group(AnimationGroupConfig::new("b", AnimationCategory::Text));
        assert_eq!(coordinator.cancel_all(), 2);
        assert_eq!(coordinator.stats().cancelled, 2);
        assert_eq!(coordinator.active_group_count(), 0);
    }
}
