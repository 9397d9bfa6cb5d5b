//! End-to-end tests of the module manager against an in-memory hub

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use modhub::application::errors::{BotError, HubError};
use modhub::application::messaging::MessageDispatcher;
use modhub::application::modules::{
    InstallEngine, InstallStatus, LifecycleController, LifecycleSettings, ModuleCatalog, SharedCatalog,
};
use modhub::application::services::ModuleService;
use modhub::domain::entities::{ModuleDescriptor, SearchCriteria, User, UserPerm};
use modhub::domain::traits::{HubClient, OfflineBot, PluginHost, RequirementInstaller, SwitchStore};
use modhub::infrastructure::plugins::{metadata, LocalPluginHost};
use modhub::infrastructure::storage::JsonSwitchStore;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn archive(dir: &str, descriptor: &ModuleDescriptor, requirements: Option<&str>) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.start_file(format!("{}/metadata.json", dir), options).unwrap();
    writer.write_all(serde_json::to_string(descriptor).unwrap().as_bytes()).unwrap();
    writer.start_file(format!("{}/__init__.py", dir), options).unwrap();
    if let Some(requirements) = requirements {
        writer.start_file(format!("{}/requirements.txt", dir), options).unwrap();
        writer.write_all(requirements.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Put a module straight into the module root
fn place(root: &Path, dir: &str, descriptor: &ModuleDescriptor) {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).unwrap();
    metadata::write(&path, true, descriptor).unwrap();
}

#[derive(Default)]
struct FakeHub {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    listings: Mutex<Vec<ModuleDescriptor>>,
    downloads: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeHub {
    /// Serve `descriptor` under its name and its pack
    fn publish(&self, dir: &str, descriptor: ModuleDescriptor, requirements: Option<&str>) {
        let data = archive(dir, &descriptor, requirements);
        let mut archives = self.archives.lock().unwrap();
        archives.insert(descriptor.name.clone(), data.clone());
        archives.insert(descriptor.pack.clone(), data);

        let mut listings = self.listings.lock().unwrap();
        listings.retain(|m| m.pack != descriptor.pack);
        listings.push(descriptor);
    }

    fn serve_raw(&self, name: &str, data: &[u8]) {
        self.archives.lock().unwrap().insert(name.to_string(), data.to_vec());
    }

    fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    /// Most downloads ever running at the same time
    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HubClient for FakeHub {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ModuleDescriptor>, HubError> {
        let listings = self.listings.lock().unwrap();
        Ok(listings
            .iter()
            .filter(|m| {
                criteria.name.as_deref() == Some("*")
                    || criteria.pack.as_deref() == Some(m.pack.as_str())
                    || criteria.name.as_deref() == Some(m.name.as_str())
            })
            .cloned()
            .collect())
    }

    async fn download(&self, name: &str, _version: &str) -> Result<Option<Vec<u8>>, HubError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        self.downloads.lock().unwrap().push(name.to_string());
        // give other installs a chance to run alongside this one
        tokio::time::sleep(Duration::from_millis(5)).await;
        let data = self.archives.lock().unwrap().get(name).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(data)
    }

    async fn authorize(&self) -> Result<String, HubError> {
        Ok("token".to_string())
    }

    async fn register_bot(&self) -> Result<(), HubError> {
        Ok(())
    }

    async fn heartbeat(&self) -> Result<Vec<OfflineBot>, HubError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingInstaller {
    installed: Mutex<Vec<String>>,
}

#[async_trait]
impl RequirementInstaller for RecordingInstaller {
    async fn install(&self, requirements: &[String]) -> Result<(), BotError> {
        self.installed.lock().unwrap().extend(requirements.iter().cloned());
        Ok(())
    }
}

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    hub: Arc<FakeHub>,
    host: Arc<LocalPluginHost>,
    requirements: Arc<RecordingInstaller>,
    switches: Arc<JsonSwitchStore>,
    catalog: SharedCatalog,
    installer: Arc<InstallEngine>,
    lifecycle: Arc<LifecycleController>,
    service: Arc<ModuleService>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("modules");
        std::fs::create_dir(&root).unwrap();

        let hub = Arc::new(FakeHub::default());
        let host = Arc::new(LocalPluginHost::new(&root));
        let requirements = Arc::new(RecordingInstaller::default());
        let switches = Arc::new(JsonSwitchStore::new(tmp.path().join("switch.json")));
        let catalog = ModuleCatalog::new(&root, "_").shared();

        let installer = Arc::new(InstallEngine::new(
            catalog.clone(),
            host.clone(),
            hub.clone(),
            requirements.clone(),
            &root,
            "__cache__",
        ));
        let lifecycle = Arc::new(LifecycleController::new(
            catalog.clone(),
            host.clone(),
            installer.clone(),
            switches.clone(),
            LifecycleSettings::default(),
        ));
        let service = Arc::new(ModuleService::new(
            lifecycle.clone(),
            installer.clone(),
            hub.clone(),
            switches.clone(),
            true,
        ));

        Self {
            _tmp: tmp,
            root,
            hub,
            host,
            requirements,
            switches,
            catalog,
            installer,
            lifecycle,
            service,
        }
    }

    fn cache_entries(&self) -> usize {
        std::fs::read_dir(self.installer.cache_root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    async fn descriptor(&self, name: &str) -> Option<ModuleDescriptor> {
        self.catalog.read().await.get(name).cloned()
    }
}

#[tokio::test]
async fn test_install_pulls_in_missing_dependency() {
    let h = Harness::new();
    h.hub.publish(
        "foo",
        ModuleDescriptor::new("foo", "module.foo").with_dependencies(vec!["bar".to_string()]),
        None,
    );
    let mut bar = ModuleDescriptor::new("bar", "module.bar");
    bar.has_remote_dependencies = true;
    h.hub.publish("bar", bar, Some("httpx>=0.24\n"));

    let report = h.installer.install("foo", true, "", false).await;

    assert!(report.is_success(), "{}", report);
    assert_eq!(report.dependencies.len(), 1);
    assert!(report.dependencies[0].contains("Installed module bar"));
    assert!(report.render().contains("Installed module foo"));

    for pack in ["module.foo", "module.bar"] {
        let descriptor = h.descriptor(pack).await.unwrap();
        assert!(descriptor.loaded, "{} should be loaded", pack);
        assert!(h.host.handle_of(pack).is_some());
    }
    let order: Vec<String> = h.catalog.read().await.all().iter().map(|m| m.pack.clone()).collect();
    assert_eq!(order, vec!["module.bar", "module.foo"]);

    assert_eq!(*h.requirements.installed.lock().unwrap(), vec!["httpx>=0.24"]);
    assert!(h.root.join("foo").join("metadata.json").is_file());
    assert!(h.root.join("bar").join("metadata.json").is_file());
    assert_eq!(h.cache_entries(), 0);
}

#[tokio::test]
async fn test_reinstall_without_upgrade_is_a_noop() {
    let h = Harness::new();
    h.hub.publish("echo", ModuleDescriptor::new("echo", "module.echo").with_version("1.0"), None);

    let first = h.installer.install("echo", false, "", false).await;
    assert_eq!(first.status, InstallStatus::Installed { version: "1.0".to_string() });

    let before = std::fs::read_to_string(h.root.join("echo").join("metadata.json")).unwrap();
    let second = h.installer.install("echo", false, "", false).await;
    let third = h.installer.install("module.echo", false, "", false).await;

    assert_eq!(second.status, InstallStatus::AlreadyInstalled { version: "1.0".to_string() });
    assert_eq!(second.render(), "Module echo is already installed, nothing changed\nInstalled version: 1.0");
    assert!(matches!(third.status, InstallStatus::AlreadyInstalled { .. }));
    assert_eq!(h.hub.downloads(), vec!["echo"]);
    assert_eq!(std::fs::read_to_string(h.root.join("echo").join("metadata.json")).unwrap(), before);
}

#[tokio::test]
async fn test_unknown_module_is_not_found() {
    let h = Harness::new();

    let report = h.installer.install("ghost", false, "", false).await;

    assert_eq!(report.status, InstallStatus::NotFound);
    assert_eq!(report.render(), "No module matching ghost was found");
    assert!(h.catalog.read().await.is_empty());
    assert_eq!(h.cache_entries(), 0);
}

#[tokio::test]
async fn test_cache_is_cleaned_after_failed_extraction() {
    let h = Harness::new();
    h.hub.serve_raw("broken", b"this is not a zip archive");

    let report = h.installer.install("broken", false, "", false).await;

    assert!(matches!(report.status, InstallStatus::Failed(_)));
    assert!(report.render().starts_with("Error while installing module broken:"));
    assert_eq!(h.cache_entries(), 0);
    assert!(h.catalog.read().await.is_empty());
}

#[tokio::test]
async fn test_repeated_upgrades_keep_one_descriptor() {
    let h = Harness::new();
    h.hub.publish("echo", ModuleDescriptor::new("echo", "module.echo").with_version("1.0"), None);
    h.installer.install("echo", false, "", false).await;

    for version in ["2.0", "3.0", "3.0"] {
        h.hub.publish("echo", ModuleDescriptor::new("echo", "module.echo").with_version(version), None);
        let report = h.installer.install("echo", true, "", false).await;
        assert!(report.is_success(), "{}", report);
    }

    let catalog = h.catalog.read().await;
    let copies: Vec<_> = catalog.all().iter().filter(|m| m.pack == "module.echo").collect();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].version, "3.0");
    assert!(h.host.handle_of("module.echo").is_some());
    assert_eq!(h.host.len(), 1);
}

#[tokio::test]
async fn test_concurrent_installs_are_serialized() {
    let h = Harness::new();
    h.hub.publish(
        "alpha",
        ModuleDescriptor::new("alpha", "module.alpha").with_dependencies(vec!["shared".to_string()]),
        None,
    );
    for name in ["beta", "gamma", "shared"] {
        h.hub.publish(name, ModuleDescriptor::new(name, format!("module.{}", name)), None);
    }

    // a nested install that waited for the held lock would never finish
    let (a, b, c) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            h.installer.install("alpha", false, "", false),
            h.installer.install("beta", false, "", false),
            h.installer.install("gamma", false, "", false),
        )
    })
    .await
    .expect("installs should not deadlock");

    assert!(a.is_success() && b.is_success() && c.is_success(), "{}\n{}\n{}", a, b, c);
    assert!(a.dependencies[0].contains("Installed module shared"), "{}", a);
    assert_eq!(h.hub.peak_in_flight(), 1);

    // the dependency is fetched inside alpha's turn, before any other install
    let downloads = h.hub.downloads();
    assert_eq!(downloads.len(), 4);
    let alpha = downloads.iter().position(|d| d == "alpha").unwrap();
    assert_eq!(downloads[alpha + 1], "shared");

    assert_eq!(h.catalog.read().await.len(), 4);
    assert_eq!(h.cache_entries(), 0);
}

#[tokio::test]
async fn test_dependency_cycle_terminates() {
    let h = Harness::new();
    h.hub.publish(
        "a",
        ModuleDescriptor::new("a", "module.a").with_dependencies(vec!["b".to_string()]),
        None,
    );
    h.hub.publish(
        "b",
        ModuleDescriptor::new("b", "module.b").with_dependencies(vec!["a".to_string()]),
        None,
    );

    let report = tokio::time::timeout(Duration::from_secs(10), h.installer.install("a", false, "", false))
        .await
        .expect("cyclic install should terminate");

    assert!(report.render().contains("dependency cycle"), "{}", report);
    assert_eq!(h.hub.downloads(), vec!["a", "b"]);
    assert_eq!(h.cache_entries(), 0);
    // neither side can activate without the other
    assert!(h.host.handle_of("module.a").is_none());
    assert!(h.host.handle_of("module.b").is_none());
}

#[tokio::test]
async fn test_missing_dependency_is_fetched_once() {
    let h = Harness::new();
    place(
        &h.root,
        "app",
        &ModuleDescriptor::new("app", "module.app").with_dependencies(vec!["lib".to_string()]),
    );

    let reply = h.lifecycle.load("app").await;

    assert!(reply.starts_with("Error while loading module app"), "{}", reply);
    assert_eq!(h.hub.downloads(), vec!["lib"]);
    assert!(h.host.handle_of("module.app").is_none());
}

#[tokio::test]
async fn test_missing_dependency_is_installed_then_retried() {
    let h = Harness::new();
    place(
        &h.root,
        "app",
        &ModuleDescriptor::new("app", "module.app").with_dependencies(vec!["lib".to_string()]),
    );
    h.hub.publish("lib", ModuleDescriptor::new("lib", "module.lib"), None);

    let reply = h.lifecycle.load("app").await;

    assert_eq!(reply, "Loaded module app");
    assert!(h.host.handle_of("module.lib").is_some());
    assert!(h.host.handle_of("module.app").is_some());
    assert!(h.descriptor("module.app").await.unwrap().loaded);
}

#[tokio::test]
async fn test_startup_isolates_broken_modules() {
    let h = Harness::new();
    place(&h.root, "ok", &ModuleDescriptor::new("ok", "module.ok"));
    place(
        &h.root,
        "broken",
        &ModuleDescriptor::new("broken", "module.broken").with_dependencies(vec!["nowhere".to_string()]),
    );
    place(&h.root, "idle", &ModuleDescriptor::new("idle", "module.idle").with_loaded(false));
    std::fs::create_dir(h.root.join("_disabled")).unwrap();

    let report = h.lifecycle.startup().await.unwrap();

    assert_eq!(report.activated, vec!["module.ok"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "module.broken");
    assert!(report.corrupt.is_empty());
    assert!(h.host.handle_of("module.idle").is_none());
    assert!(!h.descriptor("module.broken").await.unwrap().loaded);
}

#[tokio::test]
async fn test_startup_activates_dependencies_found_later() {
    let h = Harness::new();
    // "a_app" sorts first and names its dependency by the short form, so
    // it is attempted before the dependency is live
    place(
        &h.root,
        "a_app",
        &ModuleDescriptor::new("app", "module.a_app").with_dependencies(vec!["z_base".to_string()]),
    );
    place(&h.root, "z_base", &ModuleDescriptor::new("base", "module.z_base"));

    let report = h.lifecycle.startup().await.unwrap();

    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert!(h.host.handle_of("module.a_app").is_some());
    assert!(h.host.handle_of("module.z_base").is_some());
    assert!(h.hub.downloads().is_empty());
}

#[tokio::test]
async fn test_pinned_load_cannot_be_toggled() {
    let h = Harness::new();
    place(&h.root, "core", &ModuleDescriptor::new("core", "module.core").with_pinned_load(true));
    place(
        &h.root,
        "off",
        &ModuleDescriptor::new("off", "module.off").with_loaded(true).with_pinned_load(false),
    );
    h.lifecycle.startup().await.unwrap();
    assert!(h.host.handle_of("module.core").is_some());
    assert!(h.host.handle_of("module.off").is_none());

    let before = std::fs::read_to_string(h.root.join("core").join("metadata.json")).unwrap();
    let unload = h.lifecycle.unload("core").await;
    let reload = h.lifecycle.reload("core").await;
    let load = h.lifecycle.load("off").await;

    assert!(unload.contains("pinned loaded"), "{}", unload);
    assert!(reload.contains("pinned loaded"), "{}", reload);
    assert!(load.contains("pinned unloaded"), "{}", load);
    assert!(h.host.handle_of("module.core").is_some());
    assert!(h.host.handle_of("module.off").is_none());
    assert_eq!(std::fs::read_to_string(h.root.join("core").join("metadata.json")).unwrap(), before);
}

#[tokio::test]
async fn test_unload_and_reload() {
    let h = Harness::new();
    place(&h.root, "echo", &ModuleDescriptor::new("echo", "module.echo"));
    h.lifecycle.startup().await.unwrap();

    assert_eq!(h.lifecycle.reload("echo").await, "Reloaded module echo");
    assert!(h.host.handle_of("module.echo").is_some());

    assert_eq!(h.lifecycle.unload("echo").await, "Unloaded module echo");
    assert_eq!(h.lifecycle.unload("echo").await, "Module echo is not loaded");
    assert!(!h.descriptor("echo").await.unwrap().loaded);
    assert_eq!(h.lifecycle.unload("nothing").await, "Unable to find module nothing");
}

#[tokio::test]
async fn test_switches_respect_pins_and_manager() {
    let h = Harness::new();
    place(&h.root, "echo", &ModuleDescriptor::new("echo", "module.echo"));
    place(&h.root, "fixed", &ModuleDescriptor::new("fixed", "module.fixed").with_pinned_switch(true));
    place(&h.root, "manager", &ModuleDescriptor::new("manager", "module.manager"));
    h.lifecycle.startup().await.unwrap();

    let names: Vec<String> = ["echo", "fixed", "manager", "ghost"].iter().map(|s| s.to_string()).collect();
    let reply = h.service.switch(&names, Some("100"), false).await;

    assert_eq!(reply, "Disabled 1 modules\nCould not change: fixed, manager, ghost");
    assert_eq!(h.switches.get("module.echo", Some("100")).await, Some(false));
    assert_eq!(h.switches.get("module.fixed", Some("100")).await, None);

    let echo = h.descriptor("module.echo").await.unwrap();
    let fixed = h.descriptor("module.fixed").await.unwrap();
    assert!(!h.lifecycle.resolve_switch(&echo, Some("100")).await);
    assert!(h.lifecycle.resolve_switch(&echo, Some("200")).await);
    assert!(h.lifecycle.resolve_switch(&fixed, Some("100")).await);

    // the manager stays on even when a stale switch says otherwise
    h.switches.update("module.manager", Some("100"), false).await.unwrap();
    let manager = h.descriptor("module.manager").await.unwrap();
    assert!(h.lifecycle.resolve_switch(&manager, Some("100")).await);
}

#[tokio::test]
async fn test_list_reflects_disk_and_runtime() {
    let h = Harness::new();
    place(&h.root, "echo", &ModuleDescriptor::new("echo", "module.echo"));
    place(&h.root, "idle", &ModuleDescriptor::new("idle", "module.idle").with_loaded(false));
    let mut secret = ModuleDescriptor::new("secret", "module.secret");
    secret.hidden = true;
    place(&h.root, "secret", &secret);
    h.lifecycle.startup().await.unwrap();

    // appears on disk after startup
    place(&h.root, "late", &ModuleDescriptor::new("late", "module.late"));
    let listing = h.lifecycle.list(Some("100")).await;

    assert!(listing.starts_with("Installed 3 modules\nLoaded 1 modules\nUnloaded 2 modules"), "{}", listing);
    assert!(listing.contains("module.late"));
    assert!(!listing.contains("module.secret"));
    assert!(listing.contains(" - Switch: on"));
    assert!(listing.contains(" - Switch: off"));
}

#[tokio::test]
async fn test_uninstall_removes_module() {
    let h = Harness::new();
    h.hub.publish("echo", ModuleDescriptor::new("echo", "module.echo"), None);
    h.installer.install("echo", false, "", false).await;

    let reply = h.lifecycle.uninstall("echo").await;

    assert_eq!(reply, "Uninstalled module echo");
    assert!(!h.root.join("echo").exists());
    assert!(h.host.handle_of("module.echo").is_none());
    assert!(h.descriptor("echo").await.is_none());
}

#[tokio::test]
async fn test_upgrade_all_compares_versions() {
    let h = Harness::new();
    h.hub.publish("echo", ModuleDescriptor::new("echo", "module.echo").with_version("1.0"), None);
    h.installer.install("echo", false, "", false).await;

    assert_eq!(h.service.upgrade_all(false).await, "No updates available");

    h.hub.publish("echo", ModuleDescriptor::new("echo", "module.echo").with_version("1.1"), None);
    let reply = h.service.upgrade_all(false).await;
    assert!(reply.contains("Installed version: 1.1"), "{}", reply);
    assert_eq!(h.descriptor("echo").await.unwrap().version, "1.1");

    let forced = h.service.upgrade_all(true).await;
    assert!(forced.contains("Installed module module.echo"), "{}", forced);
}

#[tokio::test]
async fn test_dispatcher_checks_permission_before_acting() {
    let h = Harness::new();
    h.hub.publish("echo", ModuleDescriptor::new("echo", "module.echo"), None);
    let dispatcher = MessageDispatcher::new(".plugin", h.service.clone());
    let admin = User::new("7").with_permission(UserPerm::Administrator);
    let owner = User::new("1").with_permission(UserPerm::BotOwner);

    let denied = dispatcher
        .process_text("chat", ".plugin install echo", Some(admin.clone()), Some("100"))
        .await
        .unwrap();
    assert!(denied.starts_with("Permission denied"), "{}", denied);
    assert!(h.hub.downloads().is_empty());

    let installed = dispatcher
        .process_text("chat", ".plugin install echo", Some(owner), Some("100"))
        .await
        .unwrap();
    assert!(installed.contains("Installed module echo"), "{}", installed);

    let listing = dispatcher
        .process_text("chat", ".plugin list", Some(admin), Some("100"))
        .await
        .unwrap();
    assert!(listing.starts_with("Installed 1 modules"), "{}", listing);

    assert!(dispatcher.process_text("chat", "hello there", None, None).await.is_none());
}

#[tokio::test]
async fn test_hub_verbs_need_enabled_hub() {
    let h = Harness::new();
    let offline = Arc::new(ModuleService::new(
        h.lifecycle.clone(),
        h.installer.clone(),
        h.hub.clone(),
        h.switches.clone(),
        false,
    ));
    let dispatcher = MessageDispatcher::new(".plugin", offline);
    let owner = User::new("1").with_permission(UserPerm::BotOwner);

    let reply = dispatcher
        .process_text("chat", ".plugin search weather", Some(owner.clone()), None)
        .await
        .unwrap();
    assert_eq!(reply, "Hub service is not enabled");

    let reply = dispatcher.process_text("chat", ".plugin list", Some(owner), None).await.unwrap();
    assert!(reply.starts_with("Installed 0 modules"), "{}", reply);
}
