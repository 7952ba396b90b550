use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

use flotilla_core::{
    ClusterSession, FaultInjector, FlotillaError, Instance, Resources, Result, TelemetrySink,
};

use crate::fault_sim::SimFaultInjector;

/// Observable substrate activity, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Created(String),
    Committed(String),
    FolderAdded { instance: String, remote: String },
    StartIssued(String),
    Running(String),
    HostAdded { instance: String, port: u16 },
    ImageSwapped { instance: String, image: String },
    StatusPolled(String),
    Destroyed(String),
    SessionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Preparing,
    Committed,
    Starting,
    Running,
    Failed,
    Destroyed,
}

/// Snapshot of everything declared on a simulated instance.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub name: String,
    pub ip: IpAddr,
    pub status: InstanceStatus,
    pub image: Option<String>,
    pub resources: Option<Resources>,
    pub ports: Vec<u16>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub volume: Option<(String, String)>,
    pub folders: Vec<(PathBuf, String)>,
    pub hosts: BTreeMap<u16, String>,
    pub telemetry: bool,
    pub packet_capture: bool,
    pub fault_injection: bool,
}

#[derive(Debug, Default)]
struct Failures {
    create: HashSet<String>,
    crash_on_start: HashSet<String>,
    hang_on_wait: HashSet<String>,
    destroy: HashSet<String>,
}

struct ClusterInner {
    scope: String,
    instances: DashMap<String, InstanceRecord>,
    injectors: DashMap<String, Arc<SimFaultInjector>>,
    events: Mutex<Vec<SimEvent>>,
    failures: Mutex<Failures>,
    next_ip: AtomicU32,
    next_host_port: AtomicU32,
    closed: AtomicBool,
}

/// In-process [`ClusterSession`] that records every verb and can be told to
/// fail specific instances.
#[derive(Clone)]
pub struct SimCluster {
    inner: Arc<ClusterInner>,
}

impl SimCluster {
    pub fn init(scope: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClusterInner {
                scope: scope.into(),
                instances: DashMap::new(),
                injectors: DashMap::new(),
                events: Mutex::new(Vec::new()),
                failures: Mutex::new(Failures::default()),
                next_ip: AtomicU32::new(2),
                next_host_port: AtomicU32::new(30000),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// `create_instance(name)` will fail.
    pub fn fail_create(&self, name: &str) {
        self.inner.failures.lock().create.insert(name.to_string());
    }

    /// `wait_running` on `name` reports a crash.
    pub fn crash_on_start(&self, name: &str) {
        self.inner.failures.lock().crash_on_start.insert(name.to_string());
    }

    /// `wait_running` on `name` never returns.
    pub fn hang_on_wait(&self, name: &str) {
        self.inner.failures.lock().hang_on_wait.insert(name.to_string());
    }

    /// `destroy` on `name` fails.
    pub fn fail_destroy(&self, name: &str) {
        self.inner.failures.lock().destroy.insert(name.to_string());
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.inner.events.lock().clone()
    }

    /// Index of the first occurrence of `event`.
    pub fn position(&self, event: &SimEvent) -> Option<usize> {
        self.inner.events.lock().iter().position(|e| e == event)
    }

    pub fn count(&self, event: &SimEvent) -> usize {
        self.inner.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn instance(&self, name: &str) -> Option<InstanceRecord> {
        self.inner.instances.get(name).map(|r| r.value().clone())
    }

    /// Names of instances that have not been destroyed, sorted.
    pub fn live_instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .instances
            .iter()
            .filter(|r| r.status != InstanceStatus::Destroyed)
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn instance_count(&self) -> usize {
        self.inner.instances.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn fault_injector(&self, name: &str) -> Option<Arc<SimFaultInjector>> {
        self.inner.injectors.get(name).map(|i| i.value().clone())
    }

    /// Resolves a forwarded address back to its instance.
    pub fn instance_for_host(&self, address: &str) -> Option<String> {
        self.inner
            .instances
            .iter()
            .find(|r| r.hosts.values().any(|h| h == address))
            .map(|r| r.name.clone())
    }

    pub fn status(&self, name: &str) -> Option<InstanceStatus> {
        self.inner.instances.get(name).map(|r| r.status)
    }

    pub(crate) fn record(&self, event: SimEvent) {
        self.inner.events.lock().push(event);
    }
}

#[async_trait]
impl ClusterSession for SimCluster {
    fn scope(&self) -> &str {
        &self.inner.scope
    }

    async fn create_instance(&self, name: &str) -> Result<Box<dyn Instance>> {
        if self.inner.failures.lock().create.contains(name) {
            return Err(FlotillaError::internal(format!("quota exceeded creating {}", name)));
        }
        if self.inner.instances.contains_key(name) {
            return Err(FlotillaError::internal(format!("instance {} already exists", name)));
        }
        let n = self.inner.next_ip.fetch_add(1, Ordering::SeqCst);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, (n / 256) as u8, (n % 256) as u8));
        self.inner.instances.insert(
            name.to_string(),
            InstanceRecord {
                name: name.to_string(),
                ip,
                status: InstanceStatus::Preparing,
                image: None,
                resources: None,
                ports: Vec::new(),
                args: Vec::new(),
                env: BTreeMap::new(),
                volume: None,
                folders: Vec::new(),
                hosts: BTreeMap::new(),
                telemetry: false,
                packet_capture: false,
                fault_injection: false,
            },
        );
        self.record(SimEvent::Created(name.to_string()));
        debug!(scope = %self.inner.scope, instance = %name, %ip, "Simulated instance created");
        Ok(Box::new(SimInstance {
            name: name.to_string(),
            cluster: self.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.record(SimEvent::SessionClosed);
        }
        Ok(())
    }
}

struct SimInstance {
    name: String,
    cluster: SimCluster,
}

impl SimInstance {
    fn update<T>(&self, f: impl FnOnce(&mut InstanceRecord) -> Result<T>) -> Result<T> {
        let mut record = self
            .cluster
            .inner
            .instances
            .get_mut(&self.name)
            .ok_or_else(|| FlotillaError::internal(format!("unknown instance {}", self.name)))?;
        f(&mut record)
    }

    fn configure(&self, verb: &str, f: impl FnOnce(&mut InstanceRecord)) -> Result<()> {
        self.update(|record| {
            if record.status != InstanceStatus::Preparing {
                return Err(FlotillaError::internal(format!(
                    "cannot {} on {} in state {:?}",
                    verb, record.name, record.status
                )));
            }
            f(record);
            Ok(())
        })
    }

    fn is_scripted(&self, pick: impl FnOnce(&Failures) -> &HashSet<String>) -> bool {
        pick(&self.cluster.inner.failures.lock()).contains(&self.name)
    }
}

#[async_trait]
impl Instance for SimInstance {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_image(&mut self, image: &str) -> Result<()> {
        self.configure("set image", |r| r.image = Some(image.to_string()))
    }

    async fn set_resources(&mut self, resources: &Resources) -> Result<()> {
        self.configure("set resources", |r| r.resources = Some(resources.clone()))
    }

    async fn add_volume(&mut self, path: &str, size: &str, _owner_uid: u32) -> Result<()> {
        self.configure("add volume", |r| {
            r.volume = Some((path.to_string(), size.to_string()))
        })
    }

    async fn add_port(&mut self, port: u16) -> Result<()> {
        self.configure("add port", |r| r.ports.push(port))
    }

    async fn set_args(&mut self, args: Vec<String>) -> Result<()> {
        self.configure("set args", |r| r.args = args)
    }

    async fn set_env(&mut self, key: &str, value: &str) -> Result<()> {
        self.update(|r| match r.status {
            InstanceStatus::Preparing | InstanceStatus::Committed => {
                r.env.insert(key.to_string(), value.to_string());
                Ok(())
            }
            other => Err(FlotillaError::internal(format!(
                "cannot set env on {} in state {:?}",
                r.name, other
            ))),
        })
    }

    async fn set_telemetry(&mut self, _sink: &TelemetrySink, _prometheus_port: u16) -> Result<()> {
        self.configure("set telemetry", |r| r.telemetry = true)
    }

    async fn enable_packet_capture(&mut self) -> Result<()> {
        self.configure("enable packet capture", |r| r.packet_capture = true)
    }

    async fn enable_fault_injection(&mut self) -> Result<()> {
        self.configure("enable fault injection", |r| r.fault_injection = true)?;
        self.cluster
            .inner
            .injectors
            .insert(self.name.clone(), Arc::new(SimFaultInjector::new(&self.name)));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.configure("commit", |r| r.status = InstanceStatus::Committed)?;
        self.cluster.record(SimEvent::Committed(self.name.clone()));
        Ok(())
    }

    async fn add_folder(&mut self, local: &Path, remote: &str, _owner: &str) -> Result<()> {
        if !local.is_dir() {
            return Err(FlotillaError::internal(format!(
                "folder {} does not exist",
                local.display()
            )));
        }
        self.update(|r| {
            if r.status != InstanceStatus::Committed {
                return Err(FlotillaError::internal(format!(
                    "cannot add folder to {} in state {:?}",
                    r.name, r.status
                )));
            }
            r.folders.push((local.to_path_buf(), remote.to_string()));
            Ok(())
        })?;
        self.cluster.record(SimEvent::FolderAdded {
            instance: self.name.clone(),
            remote: remote.to_string(),
        });
        Ok(())
    }

    async fn start_async(&mut self) -> Result<()> {
        self.update(|r| {
            if r.status != InstanceStatus::Committed {
                return Err(FlotillaError::internal(format!(
                    "cannot start {} in state {:?}",
                    r.name, r.status
                )));
            }
            r.status = InstanceStatus::Starting;
            Ok(())
        })?;
        self.cluster.record(SimEvent::StartIssued(self.name.clone()));
        Ok(())
    }

    async fn wait_running(&self) -> Result<()> {
        if self.is_scripted(|f| &f.hang_on_wait) {
            std::future::pending::<()>().await;
        }
        let crash = self.is_scripted(|f| &f.crash_on_start);
        self.update(|r| match r.status {
            InstanceStatus::Running => Ok(()),
            InstanceStatus::Starting if crash => {
                r.status = InstanceStatus::Failed;
                Err(FlotillaError::internal(format!("instance {} crashed", r.name)))
            }
            InstanceStatus::Starting => {
                r.status = InstanceStatus::Running;
                Ok(())
            }
            other => Err(FlotillaError::internal(format!(
                "instance {} is {:?}, not starting",
                r.name, other
            ))),
        })?;
        self.cluster.record(SimEvent::Running(self.name.clone()));
        Ok(())
    }

    async fn ip(&self) -> Result<IpAddr> {
        self.update(|r| Ok(r.ip))
    }

    async fn add_host(&mut self, port: u16) -> Result<String> {
        let host_port = self.cluster.inner.next_host_port.fetch_add(1, Ordering::SeqCst);
        let address = format!("http://127.0.0.1:{}", host_port);
        self.update(|r| {
            if r.status != InstanceStatus::Running {
                return Err(FlotillaError::internal(format!(
                    "cannot forward port on {} in state {:?}",
                    r.name, r.status
                )));
            }
            r.hosts.insert(port, address.clone());
            Ok(())
        })?;
        self.cluster.record(SimEvent::HostAdded {
            instance: self.name.clone(),
            port,
        });
        Ok(address)
    }

    async fn set_image_instant(&mut self, image: &str) -> Result<()> {
        self.update(|r| {
            if r.status != InstanceStatus::Running {
                return Err(FlotillaError::internal(format!(
                    "cannot swap image on {} in state {:?}",
                    r.name, r.status
                )));
            }
            r.image = Some(image.to_string());
            Ok(())
        })?;
        self.cluster.record(SimEvent::ImageSwapped {
            instance: self.name.clone(),
            image: image.to_string(),
        });
        Ok(())
    }

    fn fault_injector(&self) -> Option<Arc<dyn FaultInjector>> {
        self.cluster
            .inner
            .injectors
            .get(&self.name)
            .map(|i| i.value().clone() as Arc<dyn FaultInjector>)
    }

    async fn destroy(&mut self) -> Result<()> {
        if self.is_scripted(|f| &f.destroy) {
            return Err(FlotillaError::internal(format!(
                "destroy of {} rejected by cluster",
                self.name
            )));
        }
        let already = self.update(|r| {
            let already = r.status == InstanceStatus::Destroyed;
            r.status = InstanceStatus::Destroyed;
            Ok(already)
        })?;
        if !already {
            self.cluster.record(SimEvent::Destroyed(self.name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_instance_lifecycle_rules() {
        let cluster = SimCluster::init("unit");
        let mut instance = cluster.create_instance("val0").await.unwrap();
        assert!(cluster.create_instance("val0").await.is_err());

        instance.add_port(26657).await.unwrap();
        assert!(instance.start_async().await.is_err());
        instance.commit().await.unwrap();
        assert!(instance.add_port(9090).await.is_err());

        instance.start_async().await.unwrap();
        instance.wait_running().await.unwrap();
        let host = instance.add_host(26657).await.unwrap();
        assert_eq!(cluster.instance_for_host(&host).as_deref(), Some("val0"));

        instance.destroy().await.unwrap();
        instance.destroy().await.unwrap();
        assert_eq!(cluster.count(&SimEvent::Destroyed("val0".to_string())), 1);
        assert!(cluster.live_instances().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let cluster = SimCluster::init("unit");
        cluster.fail_create("bad");
        cluster.crash_on_start("val1");
        cluster.fail_destroy("val1");

        assert!(cluster.create_instance("bad").await.is_err());

        let mut instance = cluster.create_instance("val1").await.unwrap();
        instance.commit().await.unwrap();
        instance.start_async().await.unwrap();
        assert!(instance.wait_running().await.is_err());
        assert_eq!(cluster.status("val1"), Some(InstanceStatus::Failed));
        assert!(instance.destroy().await.is_err());
        assert_eq!(cluster.live_instances(), vec!["val1".to_string()]);
    }

    #[tokio::test]
    async fn test_distinct_ips() {
        let cluster = SimCluster::init("unit");
        let a = cluster.create_instance("a").await.unwrap();
        let b = cluster.create_instance("b").await.unwrap();
        assert_ne!(a.ip().await.unwrap(), b.ip().await.unwrap());
    }
}
