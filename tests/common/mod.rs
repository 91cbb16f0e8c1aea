//! In-memory cluster shared by the integration tests
//!
//! Every capability of the operator's `Context` is backed by a fake that
//! keeps objects in memory, hands out version tokens and records what the
//! reconcilers asked for.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ObjectReference, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::ObjectMeta;
use kube::Resource;

use memcached_operator::adapters::app_binding::AppBindingEnsurer;
use memcached_operator::adapters::data_reclaimer::DataReclaimer;
use memcached_operator::adapters::events::{EventPublisher, Severity};
use memcached_operator::adapters::kube_api::ObjectApi;
use memcached_operator::adapters::monitor_agent::MonitorAgent;
use memcached_operator::config::OperatorConfig;
use memcached_operator::controllers::Context;
use memcached_operator::crd::{
    DatabasePhase, DormantDatabase, Memcached, MemcachedSpec, MonitorSpec, ServiceTemplateSpec,
    TerminationPolicy,
};
use memcached_operator::reconcilers::retry::RetryConfig;
use memcached_operator::reconcilers::validation::DefaultValidator;
use memcached_operator::{Error, Result};

pub const NAMESPACE: &str = "ns";

// ============================================================================
// Object store
// ============================================================================

/// One kind of object kept in memory, keyed by namespace and name
pub struct FakeStore<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    next_version: AtomicU64,
    /// Every version ever stored, oldest first
    history: Mutex<Vec<K>>,
    /// Number of upcoming writes rejected as stale
    conflicts: AtomicUsize,
    /// Deletes are acknowledged but the object stays
    sticky: AtomicBool,
    creates: AtomicUsize,
    replaces: AtomicUsize,
    deletes: Mutex<Vec<String>>,
    /// Fields the API server fills in on every write
    defaults: Mutex<Option<Defaulter<K>>>,
}

type Defaulter<K> = Box<dyn Fn(&mut K) + Send + Sync>;

impl<K> Default for FakeStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
            history: Mutex::new(Vec::new()),
            conflicts: AtomicUsize::new(0),
            sticky: AtomicBool::new(false),
            creates: AtomicUsize::new(0),
            replaces: AtomicUsize::new(0),
            deletes: Mutex::new(Vec::new()),
            defaults: Mutex::new(None),
        }
    }
}

fn key_of<K: Resource>(obj: &K) -> (String, String) {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

fn not_found(name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} not found", name),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

impl<K> FakeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn get_now(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get_now(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn history(&self) -> Vec<K> {
        self.history.lock().unwrap().clone()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn replaces(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn fail_next_writes_with_conflict(&self, count: usize) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    pub fn set_sticky(&self, sticky: bool) {
        self.sticky.store(sticky, Ordering::SeqCst);
    }

    /// Put an object in place as if another client had created it
    pub fn seed(&self, mut obj: K) -> K {
        self.stamp(&mut obj);
        if obj.meta().uid.is_none() {
            let uid = format!("{}-uid", obj.meta().name.clone().unwrap_or_default());
            obj.meta_mut().uid = Some(uid);
        }
        self.objects.lock().unwrap().insert(key_of(&obj), obj.clone());
        self.history.lock().unwrap().push(obj.clone());
        obj
    }

    /// Edit a stored object as a user would, bumping its version token
    pub fn edit(&self, name: &str, edit: impl FnOnce(&mut K)) -> K {
        let key = (NAMESPACE.to_string(), name.to_string());
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(&key).expect("object to edit exists");
        edit(obj);
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        obj.meta_mut().resource_version = Some(version.to_string());
        self.history.lock().unwrap().push(obj.clone());
        obj.clone()
    }

    pub fn set_defaults(&self, defaults: impl Fn(&mut K) + Send + Sync + 'static) {
        *self.defaults.lock().unwrap() = Some(Box::new(defaults));
    }

    fn apply_defaults(&self, obj: &mut K) {
        if let Some(defaults) = self.defaults.lock().unwrap().as_ref() {
            defaults(obj);
        }
    }

    fn stamp(&self, obj: &mut K) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        obj.meta_mut().resource_version = Some(version.to_string());
    }

    fn take_conflict(&self) -> bool {
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn write(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        let conflict = || Error::Conflict {
            kind: K::kind(&()).to_string(),
            name: key.1.clone(),
        };
        if self.take_conflict() {
            return Err(conflict());
        }

        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get(&key) else {
            return Err(not_found(&key.1));
        };
        if obj.meta().resource_version.is_some()
            && obj.meta().resource_version != current.meta().resource_version
        {
            return Err(conflict());
        }

        let mut stored = obj.clone();
        stored.meta_mut().uid = current.meta().uid.clone();
        self.apply_defaults(&mut stored);
        self.stamp(&mut stored);
        objects.insert(key, stored.clone());
        self.history.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl<K> ObjectApi<K> for FakeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: K::kind(&()).to_string(),
                name: key.1,
            });
        }

        let mut stored = obj.clone();
        stored.meta_mut().uid = Some(format!("{}-uid", key.1));
        self.apply_defaults(&mut stored);
        self.stamp(&mut stored);
        objects.insert(key, stored.clone());
        self.history.lock().unwrap().push(stored.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let stored = self.write(obj)?;
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        self.write(obj)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        self.deletes.lock().unwrap().push(name.to_string());
        if self.sticky.load(Ordering::SeqCst) {
            return Ok(true);
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }
}

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub severity: Severity,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn all(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.all().into_iter().filter(|e| e.reason == reason).collect()
    }

    pub fn warnings(&self) -> Vec<RecordedEvent> {
        self.all()
            .into_iter()
            .filter(|e| e.severity == Severity::Warning)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _subject: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: String,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            severity,
            reason: reason.to_string(),
            message,
        });
    }
}

#[derive(Default)]
pub struct FakeMonitorAgent {
    failing: AtomicBool,
    ensured: Mutex<Vec<MonitorSpec>>,
    removed: Mutex<Vec<MonitorSpec>>,
}

impl FakeMonitorAgent {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn ensured(&self) -> Vec<MonitorSpec> {
        self.ensured.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<MonitorSpec> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitorAgent for FakeMonitorAgent {
    async fn ensure(&self, _db: &Memcached, monitor: &MonitorSpec) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::MonitoringError("agent unavailable".to_string()));
        }
        self.ensured.lock().unwrap().push(monitor.clone());
        Ok(())
    }

    async fn remove(&self, _db: &Memcached, monitor: &MonitorSpec) -> Result<()> {
        self.removed.lock().unwrap().push(monitor.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAppBinding {
    ensured: AtomicUsize,
}

impl FakeAppBinding {
    pub fn ensured(&self) -> usize {
        self.ensured.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppBindingEnsurer for FakeAppBinding {
    async fn ensure(&self, _db: &Memcached) -> Result<()> {
        self.ensured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeReclaimer {
    wiped: Mutex<Vec<String>>,
}

impl FakeReclaimer {
    pub fn wiped(&self) -> Vec<String> {
        self.wiped.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataReclaimer for FakeReclaimer {
    async fn wipe_out(&self, db: &Memcached) -> Result<()> {
        self.wiped.lock().unwrap().push(db.offshoot_name());
        Ok(())
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// A whole fake cluster plus the context wired to it
pub struct FakeCluster {
    pub memcacheds: Arc<FakeStore<Memcached>>,
    pub dormant_databases: Arc<FakeStore<DormantDatabase>>,
    pub services: Arc<FakeStore<Service>>,
    pub statefulsets: Arc<FakeStore<StatefulSet>>,
    pub service_accounts: Arc<FakeStore<ServiceAccount>>,
    pub roles: Arc<FakeStore<Role>>,
    pub role_bindings: Arc<FakeStore<RoleBinding>>,
    pub events: Arc<RecordingEvents>,
    pub monitor_agent: Arc<FakeMonitorAgent>,
    pub app_binding: Arc<FakeAppBinding>,
    pub reclaimer: Arc<FakeReclaimer>,
    pub ctx: Context,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let memcacheds = Arc::new(FakeStore::default());
        let dormant_databases = Arc::new(FakeStore::default());
        let services = Arc::new(FakeStore::default());
        let statefulsets = Arc::new(FakeStore::default());
        let service_accounts = Arc::new(FakeStore::default());
        let roles = Arc::new(FakeStore::default());
        let role_bindings = Arc::new(FakeStore::default());
        let events = Arc::new(RecordingEvents::default());
        let monitor_agent = Arc::new(FakeMonitorAgent::default());
        let app_binding = Arc::new(FakeAppBinding::default());
        let reclaimer = Arc::new(FakeReclaimer::default());
        statefulsets.set_defaults(default_statefulset);

        let ctx = Context {
            memcacheds: memcacheds.clone(),
            dormant_databases: dormant_databases.clone(),
            services: services.clone(),
            statefulsets: statefulsets.clone(),
            service_accounts: service_accounts.clone(),
            roles: roles.clone(),
            role_bindings: role_bindings.clone(),
            events: events.clone(),
            validator: Arc::new(DefaultValidator),
            monitor_agent: monitor_agent.clone(),
            app_binding: app_binding.clone(),
            reclaimer: reclaimer.clone(),
            config,
            retry: fast_retry(),
        };

        Self {
            memcacheds,
            dormant_databases,
            services,
            statefulsets,
            service_accounts,
            roles,
            role_bindings,
            events,
            monitor_agent,
            app_binding,
            reclaimer,
            ctx,
        }
    }

    /// Declare a database and return it as stored
    pub fn declare(&self, db: Memcached) -> Memcached {
        self.memcacheds.seed(db)
    }

    /// Latest stored version of a database
    pub fn database(&self, name: &str) -> Memcached {
        self.memcacheds.get_now(name).expect("database exists")
    }

    /// Edit a database spec as a user would, bumping its generation
    pub fn edit_spec(&self, name: &str, edit: impl FnOnce(&mut MemcachedSpec)) -> Memcached {
        self.memcacheds.edit(name, |db| {
            edit(&mut db.spec);
            db.metadata.generation = Some(db.metadata.generation.unwrap_or(1) + 1);
        })
    }

    pub fn phase(&self, name: &str) -> DatabasePhase {
        self.database(name).phase()
    }

    /// Phases a database went through, without repeats
    pub fn phase_history(&self, name: &str) -> Vec<DatabasePhase> {
        let mut phases: Vec<DatabasePhase> = Vec::new();
        for db in self.memcacheds.history() {
            if db.metadata.name.as_deref() != Some(name) {
                continue;
            }
            let phase = db.phase();
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
        }
        phases
    }
}

/// Pod template defaults the API server applies to StatefulSets
fn default_statefulset(sts: &mut StatefulSet) {
    let Some(pod) = sts.spec.as_mut().and_then(|s| s.template.spec.as_mut()) else {
        return;
    };
    pod.scheduler_name
        .get_or_insert_with(|| "default-scheduler".to_string());
    pod.restart_policy.get_or_insert_with(|| "Always".to_string());
    for container in &mut pod.containers {
        container.resources.get_or_insert_with(Default::default);
        container
            .termination_message_path
            .get_or_insert_with(|| "/dev/termination-log".to_string());
    }
}

pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        pause_timeout_secs: 1,
        pause_poll_interval_secs: 0,
        ..Default::default()
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn valid_spec() -> MemcachedSpec {
    MemcachedSpec {
        version: "1.5.4".to_string(),
        replicas: 1,
        resources: None,
        node_selector: BTreeMap::new(),
        affinity: None,
        tolerations: vec![],
        scheduler_name: None,
        monitor: None,
        service_template: ServiceTemplateSpec::default(),
        termination_policy: TerminationPolicy::Halt,
        halted: false,
        do_not_pause: false,
    }
}

pub fn memcached(name: &str) -> Memcached {
    Memcached {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: valid_spec(),
        status: None,
    }
}
