//! The content controller.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use content_core::{
    CatalogLocator, CatalogSource, ContentConfig, ContentError, InstallPriority,
    InstalledVersion, Item, Result, SourceFailure, Transport, CATALOG_SCHEMA_VERSION,
    DEFAULT_CATALOG_NAME,
};
use content_store::{
    Catalog, CatalogMerger, ContentLayout, Inventory, ItemPackage,
};
use content_sync::{
    download_catalogs, DownloadCatalog, DownloadItemPackage, HttpTransport, Progress, Session,
};

use crate::results::{InstallItemPackageResult, UpdateCatalogResult};

/// Capacity of each observer channel. Slow subscribers skip old events.
const OBSERVER_CAPACITY: usize = 16;

/// Clears the updating flag when an update ends, however it ends.
struct UpdatingFlag<'a>(&'a AtomicBool);

impl<'a> UpdatingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for UpdatingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Installs, updates, and serves catalogs and item packages under one
/// storage root.
///
/// A root has a single owner: open at most one controller per root at a
/// time, in one process. Opening a controller clears the root's scratch
/// directory, which would remove another owner's in-flight downloads.
pub struct ContentController {
    layout: Arc<ContentLayout>,
    inventory: Arc<Inventory>,
    session: Arc<Session>,
    default_source: CatalogSource,
    updating: AtomicBool,
    update_lock: tokio::sync::Mutex<()>,
    install_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    catalog_updated: broadcast::Sender<Arc<Catalog>>,
    package_installed: broadcast::Sender<Arc<ItemPackage>>,
    package_uninstalled: broadcast::Sender<i64>,
}

impl ContentController {
    /// Open a controller that talks HTTP.
    pub fn open(config: &ContentConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.remote)?);
        Self::with_transport(config, transport)
    }

    /// Open a controller over any transport.
    ///
    /// Scratch space under the root is cleared first, so no other
    /// controller may be using the same root.
    pub fn with_transport(config: &ContentConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let layout = Arc::new(ContentLayout::new(config.storage.root.clone()));
        std::fs::create_dir_all(layout.root())?;

        // Scratch left behind by an interrupted run is never resumed
        let scratch = layout.temp_dir();
        if scratch.exists() {
            if let Err(e) = std::fs::remove_dir_all(&scratch) {
                warn!("Failed to clear scratch directory {:?}: {}", scratch, e);
            }
        }

        let inventory = Arc::new(Inventory::open(layout.inventory_path())?);
        let session = Arc::new(Session::new(transport, config, scratch));

        info!("Content controller opened at {:?}", layout.root());

        Ok(Self {
            layout,
            inventory,
            session,
            default_source: CatalogSource::default_source(config.remote.base_url.clone()),
            updating: AtomicBool::new(false),
            update_lock: tokio::sync::Mutex::new(()),
            install_locks: Mutex::new(HashMap::new()),
            catalog_updated: broadcast::channel(OBSERVER_CAPACITY).0,
            package_installed: broadcast::channel(OBSERVER_CAPACITY).0,
            package_uninstalled: broadcast::channel(OBSERVER_CAPACITY).0,
        })
    }

    pub fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    // Observers

    /// Receive every catalog produced by an update.
    pub fn subscribe_catalog_updates(&self) -> broadcast::Receiver<Arc<Catalog>> {
        self.catalog_updated.subscribe()
    }

    /// Receive every newly installed item package.
    pub fn subscribe_package_installs(&self) -> broadcast::Receiver<Arc<ItemPackage>> {
        self.package_installed.subscribe()
    }

    /// Receive the item id of every uninstalled item package.
    pub fn subscribe_package_uninstalls(&self) -> broadcast::Receiver<i64> {
        self.package_uninstalled.subscribe()
    }

    // State

    /// Whether a catalog update is running.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    /// Resolve once no update, install, or transfer is in flight.
    pub async fn wait_until_idle(&self) {
        self.session.wait_until_idle().await
    }

    /// Catalog version currently published by the default source.
    pub async fn fetch_latest_version(&self) -> Result<i64> {
        self.session.fetch_version(&self.default_source).await
    }

    /// The merged catalog for the currently installed catalogs.
    ///
    /// Returns `None` until a default catalog is installed. The cached merge
    /// is reused when one exists for the installed set; otherwise the merge
    /// runs again, leaving out secondary catalogs that still fail.
    pub fn catalog(&self) -> Result<Option<Catalog>> {
        let installed = self.inventory.installed_catalogs()?;
        if !installed.iter().any(|catalog| catalog.is_default()) {
            return Ok(None);
        }

        let outcome = CatalogMerger::new(self.layout.as_ref()).merge(&installed)?;
        for failure in &outcome.failures {
            warn!("Catalog {} left out of merge: {}", failure.name, failure.error);
        }

        Catalog::open(outcome.path).map(Some)
    }

    // Catalog update

    /// Bring the default catalog and `secondary` sources up to date, then
    /// rebuild the merged catalog.
    ///
    /// Secondary catalogs installed earlier but missing from `secondary` are
    /// dropped from the inventory. A default catalog failure fails the
    /// update; secondary failures are reported alongside the merged result.
    pub async fn update_catalog(
        &self,
        secondary: &[CatalogSource],
        progress: Option<Progress>,
    ) -> UpdateCatalogResult {
        let _serial = self.update_lock.lock().await;
        let _work = self.session.track();
        let _flag = UpdatingFlag::raise(&self.updating);

        self.revoke_missing_sources(secondary);

        let mut request = DownloadCatalog::new(self.default_source.clone())
            .installed(self.installed_catalog_version(DEFAULT_CATALOG_NAME));
        if let Some(progress) = progress {
            request = request.with_progress(progress);
        }

        let default = match request.run(&self.session, self.layout.as_ref()).await {
            Ok(download) => download,
            Err(e) => {
                warn!("Default catalog update failed: {}", e);
                return UpdateCatalogResult::Error { errors: vec![e] };
            }
        };
        if let Err(e) = self.inventory.add_or_update_catalog(&default.metadata) {
            return UpdateCatalogResult::Error { errors: vec![e] };
        }

        let mut failures = Vec::new();
        let mut requests = Vec::with_capacity(secondary.len());
        for source in secondary {
            if source.is_default() {
                failures.push(SourceFailure::new(
                    source.name.clone(),
                    ContentError::invalid_argument(format!(
                        "Secondary source {} uses the default catalog name",
                        source.base_url
                    )),
                ));
                continue;
            }
            requests.push(
                DownloadCatalog::new(source.clone())
                    .installed(self.installed_catalog_version(&source.name)),
            );
        }

        let locator: Arc<dyn CatalogLocator> = self.layout.clone();
        let results = download_catalogs(self.session.clone(), locator, requests).await;

        let mut downloaded = default.downloaded;
        for (name, result) in results {
            let recorded = result.and_then(|download| {
                self.inventory.add_or_update_catalog(&download.metadata)?;
                Ok(download.downloaded)
            });
            match recorded {
                Ok(fresh) => downloaded |= fresh,
                Err(e) => failures.push(SourceFailure::new(name, e)),
            }
        }

        let catalog = match self.merge().await {
            Ok((catalog, merge_failures)) => {
                failures.extend(merge_failures);
                catalog
            }
            Err(e) => {
                warn!("Catalog merge failed: {}", e);
                return UpdateCatalogResult::Error { errors: vec![e] };
            }
        };

        // No receivers is not an error
        let _ = self.catalog_updated.send(catalog.clone());

        if !failures.is_empty() {
            info!("Catalog update finished with {} failure(s)", failures.len());
            UpdateCatalogResult::PartialSuccess { catalog, failures }
        } else if downloaded {
            info!("Catalog updated to version {}", default.metadata.version);
            UpdateCatalogResult::Success { catalog }
        } else {
            debug!("Catalog already current at version {}", default.metadata.version);
            UpdateCatalogResult::AlreadyCurrent { catalog }
        }
    }

    fn installed_catalog_version(&self, name: &str) -> Option<i64> {
        match self.inventory.catalog_named(name) {
            Ok(catalog) => catalog.map(|catalog| catalog.version),
            Err(e) => {
                warn!("Failed to read installed version of catalog {}: {}", name, e);
                None
            }
        }
    }

    /// Forget secondary catalogs the caller no longer supplies.
    fn revoke_missing_sources(&self, secondary: &[CatalogSource]) {
        let wanted: HashSet<&str> = secondary.iter().map(|source| source.name.as_str()).collect();

        let revoked: Vec<String> = match self.inventory.installed_catalogs() {
            Ok(installed) => installed
                .into_iter()
                .filter(|catalog| !catalog.is_default() && !wanted.contains(catalog.name.as_str()))
                .map(|catalog| catalog.name)
                .collect(),
            Err(e) => {
                warn!("Failed to list installed catalogs: {}", e);
                return;
            }
        };

        if revoked.is_empty() {
            return;
        }

        match self.inventory.delete_catalogs_named(&revoked) {
            Ok(_) => info!("Revoked catalogs: {}", revoked.join(", ")),
            Err(e) => warn!("Failed to revoke catalogs {}: {}", revoked.join(", "), e),
        }
    }

    async fn merge(&self) -> Result<(Arc<Catalog>, Vec<SourceFailure>)> {
        let installed = self.inventory.installed_catalogs()?;
        let layout = self.layout.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            CatalogMerger::new(layout.as_ref()).merge(&installed)
        })
        .await
        .map_err(|e| ContentError::internal(format!("Merge task failed: {}", e)))??;

        let catalog = Catalog::open(&outcome.path)?;
        Ok((Arc::new(catalog), outcome.failures))
    }

    // Item packages

    /// Ids of every item with an installed package.
    pub fn installed_item_ids(&self) -> Result<Vec<i64>> {
        self.inventory.installed_item_ids()
    }

    /// The installed package for an item.
    ///
    /// Packages built for another schema version count as not installed.
    pub fn item_package_for_item(&self, item_id: i64) -> Result<Option<ItemPackage>> {
        let Some(installed) = self.inventory.installed_version(item_id)? else {
            return Ok(None);
        };
        if installed.schema_version != CATALOG_SCHEMA_VERSION {
            debug!(
                "Item {} installed under schema {}, ignoring",
                item_id, installed.schema_version
            );
            return Ok(None);
        }

        let path = self
            .layout
            .item_package_path(item_id, installed.item_package_version);
        if !path.is_file() {
            warn!("Inventory lists item {} but {:?} is missing", item_id, path);
            return Ok(None);
        }

        ItemPackage::open(path).map(Some)
    }

    /// Like [`Self::item_package_for_item`], but a missing package is an
    /// error.
    pub fn require_item_package(&self, item_id: i64) -> Result<ItemPackage> {
        self.item_package_for_item(item_id)?
            .ok_or(ContentError::ItemPackageNotFound { item_id })
    }

    /// Install the package for `item` at the item's latest version.
    ///
    /// Requests for the same item are serialized, so a second concurrent
    /// request observes the first one's install.
    pub async fn install_item_package(
        &self,
        item: &Item,
        priority: InstallPriority,
        progress: Option<Progress>,
    ) -> InstallItemPackageResult {
        let lock = self.install_lock(item.id);
        let result = {
            let _serial = lock.lock().await;
            self.install_serialized(item, priority, progress).await
        };
        self.release_install_lock(item.id, lock);
        result
    }

    async fn install_serialized(
        &self,
        item: &Item,
        priority: InstallPriority,
        progress: Option<Progress>,
    ) -> InstallItemPackageResult {
        let _work = self.session.track();

        let target = InstalledVersion::new(CATALOG_SCHEMA_VERSION, item.latest_version);

        match self.inventory.installed_version(item.id) {
            Ok(Some(installed)) if installed == target => {
                let path = self.layout.item_package_path(item.id, item.latest_version);
                return match ItemPackage::open(path) {
                    Ok(package) => InstallItemPackageResult::AlreadyInstalled {
                        package: Arc::new(package),
                    },
                    Err(e) => InstallItemPackageResult::Error { errors: vec![e] },
                };
            }
            Ok(_) => {}
            Err(e) => return InstallItemPackageResult::Error { errors: vec![e] },
        }

        if let Err(e) = self.inventory.add_to_install_queue(item.id) {
            warn!("Failed to queue item {}: {}", item.id, e);
        }

        let installed = self.download_item_package(item, target, priority, progress).await;

        if let Err(e) = self.inventory.remove_from_install_queue(item.id) {
            warn!("Failed to dequeue item {}: {}", item.id, e);
        }

        match installed {
            Ok(package) => {
                if let Err(e) = self.inventory.set_errored(item.id, false) {
                    warn!("Failed to clear error state of item {}: {}", item.id, e);
                }
                info!(
                    "Installed item {} ({}) version {}",
                    item.id, item.external_id, item.latest_version
                );
                let _ = self.package_installed.send(package.clone());
                InstallItemPackageResult::Success { package }
            }
            Err(e) => {
                warn!("Failed to install item {}: {}", item.id, e);
                if let Err(mark) = self.inventory.set_errored(item.id, true) {
                    warn!("Failed to record error state of item {}: {}", item.id, mark);
                }
                InstallItemPackageResult::Error { errors: vec![e] }
            }
        }
    }

    async fn download_item_package(
        &self,
        item: &Item,
        target: InstalledVersion,
        priority: InstallPriority,
        progress: Option<Progress>,
    ) -> Result<Arc<ItemPackage>> {
        let mut request =
            DownloadItemPackage::new(&self.default_source, &item.external_id, item.latest_version)
                .with_priority(priority);
        if let Some(progress) = progress {
            request = request.with_progress(progress);
        }

        let download = request.run(&self.session).await?;
        let path = download.install_into(&self.layout.item_package_dir(item.id, item.latest_version))?;
        let package = ItemPackage::open(&path)?;

        // Record only once the files are in place
        self.inventory.set_installed_version(item.id, target)?;

        Ok(Arc::new(package))
    }

    /// Remove an item's package files and inventory record.
    ///
    /// Uninstalling an item that is not installed succeeds without effect.
    pub async fn uninstall_item_package(&self, item_id: i64) -> Result<()> {
        let lock = self.install_lock(item_id);
        let result = {
            let _serial = lock.lock().await;
            self.uninstall_serialized(item_id)
        };
        self.release_install_lock(item_id, lock);
        result
    }

    fn uninstall_serialized(&self, item_id: i64) -> Result<()> {
        let dir = self.layout.item_dir(item_id);
        let had_files = dir.exists();
        if had_files {
            std::fs::remove_dir_all(&dir)?;
        }

        let was_installed = self.inventory.in_transaction(|txn| {
            let installed = txn.is_item_installed(item_id)?;
            txn.remove_installed_version(item_id)?;
            txn.set_errored(item_id, false)?;
            Ok(installed)
        })?;

        if had_files || was_installed {
            info!("Uninstalled item {}", item_id);
            let _ = self.package_uninstalled.send(item_id);
        }

        Ok(())
    }

    fn install_lock(&self, item_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        match self.install_locks.lock() {
            Ok(mut locks) => locks.entry(item_id).or_default().clone(),
            // A poisoned map only loses serialization, never correctness of
            // the install itself
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn release_install_lock(&self, item_id: i64, lock: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut locks) = self.install_locks.lock() {
            // Held only by the map and this caller
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&item_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_core::CatalogMetadata;
    use content_store::{MutableCatalog, MutableItemPackage, CATALOG_FILE_NAME, ITEM_PACKAGE_FILE_NAME};
    use content_sync::{archive_file, catalog_url, item_package_url, MemoryTransport};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const BASE_URL: &str = "https://cdn.example.com/";

    struct Fixture {
        root: TempDir,
        staging: TempDir,
        transport: Arc<MemoryTransport>,
        controller: ContentController,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());

        let mut config = ContentConfig::default();
        config.storage.root = root.path().to_path_buf();
        config.remote.base_url = BASE_URL.to_string();

        let controller = ContentController::with_transport(&config, transport.clone()).unwrap();
        Fixture {
            root,
            staging,
            transport,
            controller,
        }
    }

    fn item(id: i64, latest_version: i64) -> Item {
        Item {
            id,
            external_id: format!("ext-{}", id),
            language_id: 1,
            source_id: 1,
            platform_id: 1,
            uri: format!("/items/{}", id),
            title: format!("Item {}", id),
            item_category_id: 1,
            latest_version,
            obsolete: false,
        }
    }

    impl Fixture {
        fn default_source(&self) -> CatalogSource {
            CatalogSource::default_source(BASE_URL)
        }

        fn publish_catalog(&self, source: &CatalogSource, version: i64, items: &[Item]) {
            let path = self
                .staging
                .path()
                .join(format!("{}-{}.sqlite", source.name, version));
            let builder = MutableCatalog::create(&path, version).unwrap();
            for item in items {
                builder.add_item(item, None).unwrap();
            }
            drop(builder);

            self.transport.insert(
                source.resource_url("v3/index.json"),
                format!(r#"{{"catalogVersion": {}}}"#, version).into_bytes(),
            );
            self.transport.insert(
                catalog_url(source, version),
                archive_file(&path, CATALOG_FILE_NAME).unwrap(),
            );
        }

        fn publish_package(&self, item: &Item) -> String {
            let path = self
                .staging
                .path()
                .join(format!("package-{}-{}.sqlite", item.id, item.latest_version));
            let builder =
                MutableItemPackage::create(&path, CATALOG_SCHEMA_VERSION, item.latest_version).unwrap();
            builder.set_item(item.id, &item.external_id, &item.uri).unwrap();
            drop(builder);

            let url = item_package_url(&self.default_source(), &item.external_id, item.latest_version);
            self.transport
                .insert(url.clone(), archive_file(&path, ITEM_PACKAGE_FILE_NAME).unwrap());
            url
        }
    }

    #[tokio::test]
    async fn test_second_update_is_already_current_without_download() {
        let fixture = fixture();
        let source = fixture.default_source();
        fixture.publish_catalog(&source, 10, &[item(1, 1)]);

        let first = fixture.controller.update_catalog(&[], None).await;
        assert!(matches!(first, UpdateCatalogResult::Success { .. }));

        let second = fixture.controller.update_catalog(&[], None).await;
        assert!(matches!(second, UpdateCatalogResult::AlreadyCurrent { .. }));
        assert_eq!(fixture.transport.request_count(&catalog_url(&source, 10)), 1);

        let catalog = second.catalog().unwrap();
        assert_eq!(catalog.catalog_version().unwrap(), Some(10));
        assert!(!fixture.controller.is_updating());
    }

    #[tokio::test]
    async fn test_new_version_is_downloaded() {
        let fixture = fixture();
        let source = fixture.default_source();
        fixture.publish_catalog(&source, 1, &[item(1, 1)]);
        fixture.controller.update_catalog(&[], None).await;

        fixture.publish_catalog(&source, 2, &[item(1, 1), item(2, 1)]);
        let result = fixture.controller.update_catalog(&[], None).await;

        assert!(matches!(result, UpdateCatalogResult::Success { .. }));
        assert_eq!(result.catalog().unwrap().items().unwrap().len(), 2);
        assert_eq!(
            fixture.controller.inventory().catalog_named("default").unwrap(),
            Some(CatalogMetadata::new("default", None, 2))
        );
        let current = fixture.controller.catalog().unwrap().unwrap();
        assert_eq!(current.catalog_version().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_partial_success_reports_failing_source() {
        let fixture = fixture();
        let alpha = CatalogSource::new("alpha", "https://alpha.example.com/");
        let beta = CatalogSource::new("beta", "https://beta.example.com/");
        fixture.publish_catalog(&fixture.default_source(), 5, &[item(1, 1)]);
        fixture.publish_catalog(&alpha, 2, &[item(100, 1)]);

        let result = fixture
            .controller
            .update_catalog(&[alpha, beta], None)
            .await;

        let UpdateCatalogResult::PartialSuccess { catalog, failures } = result else {
            panic!("expected partial success");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "beta");
        assert_eq!(failures[0].error.error_code(), "TRANSPORT_ERROR");
        assert!(catalog.item(100).unwrap().is_some());
        assert!(catalog.item(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_secondary_still_merged_when_update_fails() {
        let fixture = fixture();
        let alpha = CatalogSource::new("alpha", "https://alpha.example.com/");
        fixture.publish_catalog(&fixture.default_source(), 5, &[item(1, 1)]);
        fixture.publish_catalog(&alpha, 2, &[item(100, 1)]);
        fixture.controller.update_catalog(&[alpha.clone()], None).await;

        fixture.transport.remove(&alpha.resource_url("v3/index.json"));
        let result = fixture.controller.update_catalog(&[alpha], None).await;

        assert_eq!(result.failures().len(), 1);
        assert!(result.catalog().unwrap().item(100).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoked_secondary_is_dropped() {
        let fixture = fixture();
        let alpha = CatalogSource::new("alpha", "https://alpha.example.com/");
        fixture.publish_catalog(&fixture.default_source(), 5, &[item(1, 1)]);
        fixture.publish_catalog(&alpha, 2, &[item(100, 1)]);

        fixture.controller.update_catalog(&[alpha], None).await;
        let result = fixture.controller.update_catalog(&[], None).await;

        assert!(matches!(result, UpdateCatalogResult::AlreadyCurrent { .. }));
        assert!(fixture.controller.inventory().catalog_named("alpha").unwrap().is_none());
        assert!(result.catalog().unwrap().item(100).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secondary_using_default_name_is_rejected() {
        let fixture = fixture();
        fixture.publish_catalog(&fixture.default_source(), 5, &[item(1, 1)]);
        let impostor = CatalogSource::new("default", "https://other.example.com/");

        let result = fixture.controller.update_catalog(&[impostor], None).await;

        let failures = result.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "default");
        assert_eq!(failures[0].error.error_code(), "INVALID_ARGUMENT");
        assert!(result.catalog().unwrap().item(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recovers_after_corrupt_catalog() {
        let fixture = fixture();
        let source = fixture.default_source();
        fixture.transport.insert(
            source.resource_url("v3/index.json"),
            br#"{"catalogVersion": 1}"#.to_vec(),
        );
        let junk = fixture.staging.path().join("junk.sqlite");
        std::fs::write(&junk, b"not a database").unwrap();
        fixture.transport.insert(
            catalog_url(&source, 1),
            archive_file(&junk, CATALOG_FILE_NAME).unwrap(),
        );

        let first = fixture.controller.update_catalog(&[], None).await;
        assert!(first.is_error());
        assert!(fixture.controller.inventory().catalog_named("default").unwrap().is_none());

        fixture.publish_catalog(&source, 1, &[item(1, 1)]);
        let second = fixture.controller.update_catalog(&[], None).await;

        assert!(matches!(second, UpdateCatalogResult::Success { .. }));
        assert_eq!(fixture.transport.request_count(&catalog_url(&source, 1)), 2);
    }

    #[tokio::test]
    async fn test_secondary_missing_at_merge_is_merged_once_present() {
        let fixture = fixture();
        let alpha = CatalogSource::new("alpha", "https://alpha.example.com/");
        fixture.publish_catalog(&fixture.default_source(), 5, &[item(1, 1)]);
        fixture.publish_catalog(&alpha, 2, &[item(100, 1)]);
        fixture.controller.update_catalog(&[alpha.clone()], None).await;

        let alpha_file = fixture.controller.layout().catalog_path("alpha", 2);
        let parked = fixture.staging.path().join("parked.sqlite");
        std::fs::rename(&alpha_file, &parked).unwrap();
        // Force a fresh merge of the same installed set
        std::fs::remove_dir_all(fixture.controller.layout().merged_catalogs_dir()).unwrap();

        let degraded = fixture.controller.catalog().unwrap().unwrap();
        assert!(degraded.item(100).unwrap().is_none());

        std::fs::rename(&parked, &alpha_file).unwrap();
        let result = fixture.controller.update_catalog(&[alpha], None).await;

        assert!(result.failures().is_empty());
        assert!(result.catalog().unwrap().item(100).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_default_failure_is_error() {
        let fixture = fixture();
        let result = fixture.controller.update_catalog(&[], None).await;

        let UpdateCatalogResult::Error { errors } = result else {
            panic!("expected error");
        };
        assert_eq!(errors.len(), 1);
        assert!(fixture.controller.catalog().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_notifies_and_reports_progress() {
        let fixture = fixture();
        fixture.publish_catalog(&fixture.default_source(), 3, &[item(1, 1)]);
        let mut updates = fixture.controller.subscribe_catalog_updates();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let progress: Progress = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        fixture.controller.update_catalog(&[], Some(progress)).await;

        let catalog = updates.try_recv().unwrap();
        assert_eq!(catalog.catalog_version().unwrap(), Some(3));
        assert!(calls.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_install_compares_versions_exactly() {
        let fixture = fixture();
        let v5 = item(42, 5);
        let v5_url = fixture.publish_package(&v5);

        let first = fixture
            .controller
            .install_item_package(&v5, InstallPriority::Default, None)
            .await;
        assert!(matches!(first, InstallItemPackageResult::Success { .. }));
        assert_eq!(
            fixture.controller.inventory().installed_version(42).unwrap(),
            Some(InstalledVersion::new(3, 5))
        );

        let again = fixture
            .controller
            .install_item_package(&v5, InstallPriority::Default, None)
            .await;
        assert!(matches!(again, InstallItemPackageResult::AlreadyInstalled { .. }));
        assert_eq!(fixture.transport.request_count(&v5_url), 1);

        let v6 = item(42, 6);
        let v6_url = fixture.publish_package(&v6);
        let upgraded = fixture
            .controller
            .install_item_package(&v6, InstallPriority::High, None)
            .await;
        assert!(matches!(upgraded, InstallItemPackageResult::Success { .. }));
        assert_eq!(fixture.transport.request_count(&v6_url), 1);
        assert_eq!(
            upgraded.package().unwrap().item_package_version().unwrap(),
            6
        );
    }

    #[tokio::test]
    async fn test_concurrent_installs_download_once() {
        let fixture = fixture();
        let target = item(7, 1);
        let url = fixture.publish_package(&target);

        let (a, b) = tokio::join!(
            fixture
                .controller
                .install_item_package(&target, InstallPriority::Default, None),
            fixture
                .controller
                .install_item_package(&target, InstallPriority::Default, None),
        );

        let outcomes = [&a, &b];
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, InstallItemPackageResult::Success { .. }))
                .count(),
            1
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, InstallItemPackageResult::AlreadyInstalled { .. }))
                .count(),
            1
        );
        assert_eq!(fixture.transport.request_count(&url), 1);
    }

    #[tokio::test]
    async fn test_failed_install_is_recorded() {
        let fixture = fixture();
        let missing = item(9, 1);

        let result = fixture
            .controller
            .install_item_package(&missing, InstallPriority::Default, None)
            .await;
        assert!(result.is_error());

        let inventory = fixture.controller.inventory();
        assert_eq!(inventory.errored_item_ids().unwrap(), vec![9]);
        assert!(inventory.installing_item_ids().unwrap().is_empty());
        assert!(!inventory.is_item_installed(9).unwrap());

        fixture.publish_package(&missing);
        let retried = fixture
            .controller
            .install_item_package(&missing, InstallPriority::Default, None)
            .await;
        assert!(matches!(retried, InstallItemPackageResult::Success { .. }));
        assert!(inventory.errored_item_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_removes_lookup() {
        let fixture = fixture();
        let target = item(11, 2);
        fixture.publish_package(&target);
        let mut uninstalls = fixture.controller.subscribe_package_uninstalls();
        let mut installs = fixture.controller.subscribe_package_installs();

        fixture
            .controller
            .install_item_package(&target, InstallPriority::Default, None)
            .await;
        assert_eq!(installs.try_recv().unwrap().item_id().unwrap(), Some(11));
        assert_eq!(fixture.controller.installed_item_ids().unwrap(), vec![11]);
        assert!(fixture.controller.item_package_for_item(11).unwrap().is_some());

        fixture.controller.uninstall_item_package(11).await.unwrap();

        assert!(!fixture.controller.installed_item_ids().unwrap().contains(&11));
        assert!(fixture.controller.item_package_for_item(11).unwrap().is_none());
        let err = fixture.controller.require_item_package(11).unwrap_err();
        assert_eq!(err.error_code(), "ITEM_PACKAGE_NOT_FOUND");
        assert!(!fixture.controller.layout().item_dir(11).exists());
        assert_eq!(uninstalls.try_recv().unwrap(), 11);

        // Nothing left to remove
        fixture.controller.uninstall_item_package(11).await.unwrap();
        assert!(uninstalls.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_package_built_for_other_schema_is_not_installed() {
        let fixture = fixture();
        let target = item(77, 4);
        let path = fixture.staging.path().join("old-schema.sqlite");
        let builder = MutableItemPackage::create(&path, 2, 4).unwrap();
        builder.set_item(77, &target.external_id, &target.uri).unwrap();
        drop(builder);
        fixture.transport.insert(
            item_package_url(&fixture.default_source(), &target.external_id, 4),
            archive_file(&path, ITEM_PACKAGE_FILE_NAME).unwrap(),
        );

        let result = fixture
            .controller
            .install_item_package(&target, InstallPriority::Default, None)
            .await;

        let InstallItemPackageResult::Error { errors } = result else {
            panic!("expected error");
        };
        assert_eq!(errors[0].error_code(), "VERSION_MISMATCH");
        assert_eq!(fixture.controller.inventory().installed_version(77).unwrap(), None);
        assert!(fixture.controller.item_package_for_item(77).unwrap().is_none());
        assert!(!fixture.controller.layout().item_package_dir(77, 4).exists());
    }

    #[tokio::test]
    async fn test_other_schema_counts_as_not_installed() {
        let fixture = fixture();
        fixture
            .controller
            .inventory()
            .set_installed_version(5, InstalledVersion::new(2, 1))
            .unwrap();

        assert!(fixture.controller.item_package_for_item(5).unwrap().is_none());
    }

    #[test]
    fn test_open_clears_leftover_scratch() {
        let root = TempDir::new().unwrap();
        let leftover = root.path().join("tmp").join("download-interrupted");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("archive.zip"), b"partial").unwrap();

        let mut config = ContentConfig::default();
        config.storage.root = root.path().to_path_buf();
        let controller =
            ContentController::with_transport(&config, Arc::new(MemoryTransport::new())).unwrap();

        assert!(!leftover.exists());
        assert!(controller.layout().root().join("Inventory.sqlite").is_file());
    }

    #[tokio::test]
    async fn test_fetch_latest_version_and_idle() {
        let fixture = fixture();
        fixture.publish_catalog(&fixture.default_source(), 8, &[]);

        assert_eq!(fixture.controller.fetch_latest_version().await.unwrap(), 8);
        fixture.controller.wait_until_idle().await;
        assert!(fixture.root.path().join("Inventory.sqlite").is_file());
    }
}
