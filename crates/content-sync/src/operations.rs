//! Download and install operations.
//!
//! Each operation is one asynchronous unit of work against a [`Session`].
//! Operations compose: [`DownloadCatalog`] runs a [`FetchVersion`] first
//! unless its version is pinned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use content_core::{
    CatalogLocator, CatalogMetadata, CatalogSource, ContentError, InstallPriority, Result,
    CATALOG_SCHEMA_VERSION,
};
use content_store::{Catalog, ItemPackage, CATALOG_FILE_NAME, ITEM_PACKAGE_FILE_NAME};

use crate::session::{DownloadedArchive, Progress, Session};

/// Location of a catalog archive under a source.
pub fn catalog_url(source: &CatalogSource, version: i64) -> String {
    source.resource_url(&format!("v3/catalogs/{}.zip", version))
}

/// Location of an item package archive under the default source.
pub fn item_package_url(default_source: &CatalogSource, external_id: &str, version: i64) -> String {
    default_source.resource_url(&format!("v3/item-packages/{}/{}.zip", external_id, version))
}

/// Ask a source for its current catalog version.
#[derive(Debug, Clone)]
pub struct FetchVersion {
    source: CatalogSource,
}

impl FetchVersion {
    pub fn new(source: CatalogSource) -> Self {
        Self { source }
    }

    pub async fn run(&self, session: &Session) -> Result<i64> {
        session.fetch_version(&self.source).await
    }
}

/// Outcome of a catalog download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDownload {
    /// Inventory record describing the catalog now on disk.
    pub metadata: CatalogMetadata,

    /// Installed catalog file.
    pub path: PathBuf,

    /// False when the requested version was already in place.
    pub downloaded: bool,
}

/// Download one named catalog and install it at its versioned location.
#[derive(Clone)]
pub struct DownloadCatalog {
    source: CatalogSource,
    pinned_version: Option<i64>,
    installed_version: Option<i64>,
    progress: Option<Progress>,
}

impl DownloadCatalog {
    pub fn new(source: CatalogSource) -> Self {
        Self {
            source,
            pinned_version: None,
            installed_version: None,
            progress: None,
        }
    }

    /// Download exactly `version` instead of asking the source.
    pub fn pinned(mut self, version: i64) -> Self {
        self.pinned_version = Some(version);
        self
    }

    /// Skip the download when the resolved version equals this one and its
    /// file is present.
    pub fn installed(mut self, version: Option<i64>) -> Self {
        self.installed_version = version;
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn source(&self) -> &CatalogSource {
        &self.source
    }

    pub async fn run(&self, session: &Session, locator: &dyn CatalogLocator) -> Result<CatalogDownload> {
        let version = match self.pinned_version {
            Some(version) => version,
            None => FetchVersion::new(self.source.clone()).run(session).await?,
        };

        let metadata = CatalogMetadata::new(
            self.source.name.clone(),
            (!self.source.is_default()).then(|| self.source.base_url.clone()),
            version,
        );
        let destination = locator.catalog_path(&self.source.name, version);

        if self.installed_version == Some(version) && destination.is_file() {
            match verify_catalog(&destination, version) {
                Ok(()) => {
                    debug!("Catalog {} already at version {}", self.source.name, version);
                    if let Some(progress) = &self.progress {
                        progress(1.0);
                    }
                    return Ok(CatalogDownload {
                        metadata,
                        path: destination,
                        downloaded: false,
                    });
                }
                Err(e) => warn!(
                    "Installed catalog {} version {} is unusable, downloading again: {}",
                    self.source.name, version, e
                ),
            }
        }

        let archive = session
            .download_archive(
                &catalog_url(&self.source, version),
                CATALOG_FILE_NAME,
                InstallPriority::Default,
                self.progress.clone(),
            )
            .await?;

        verify_catalog(&archive.file_path(), version)?;
        move_into_place(&archive.file_path(), &destination)?;
        info!(
            "Installed catalog {} version {} at {:?}",
            self.source.name, version, destination
        );

        Ok(CatalogDownload {
            metadata,
            path: destination,
            downloaded: true,
        })
    }
}

/// Run several catalog downloads concurrently.
///
/// Every request runs to completion; one failure never cancels the others.
/// Results come back in request order, each tagged with its source name.
pub async fn download_catalogs(
    session: Arc<Session>,
    locator: Arc<dyn CatalogLocator>,
    requests: Vec<DownloadCatalog>,
) -> Vec<(String, Result<CatalogDownload>)> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let name = request.source().name.clone();
            let session = session.clone();
            let locator = locator.clone();
            let handle =
                tokio::spawn(async move { request.run(&session, locator.as_ref()).await });
            (name, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let result = handle
            .await
            .unwrap_or_else(|e| Err(ContentError::internal(format!("Download task failed: {}", e))));
        if let Err(e) = &result {
            warn!("Catalog {} failed to update: {}", name, e);
        }
        results.push((name, result));
    }

    results
}

/// Download one item package into scratch space.
#[derive(Clone)]
pub struct DownloadItemPackage {
    url: String,
    version: i64,
    priority: InstallPriority,
    progress: Option<Progress>,
}

impl DownloadItemPackage {
    pub fn new(default_source: &CatalogSource, external_id: &str, version: i64) -> Self {
        Self {
            url: item_package_url(default_source, external_id, version),
            version,
            priority: InstallPriority::Default,
            progress: None,
        }
    }

    pub fn with_priority(mut self, priority: InstallPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Download and extract the package.
    ///
    /// Fails with a version mismatch unless the package was built for the
    /// current schema at the requested version. A rejected package never
    /// leaves scratch space.
    pub async fn run(&self, session: &Session) -> Result<ItemPackageDownload> {
        let archive = session
            .download_archive(
                &self.url,
                ITEM_PACKAGE_FILE_NAME,
                self.priority,
                self.progress.clone(),
            )
            .await?;

        verify_item_package(&archive.file_path(), self.version)?;

        Ok(ItemPackageDownload { archive })
    }
}

/// An extracted item package waiting to be moved into place.
#[derive(Debug)]
pub struct ItemPackageDownload {
    archive: DownloadedArchive,
}

impl ItemPackageDownload {
    /// Path of the extracted package file.
    pub fn package_path(&self) -> PathBuf {
        self.archive.file_path()
    }

    /// Move the extracted directory to `dest_dir`, replacing anything there,
    /// and return the installed package file.
    pub fn install_into(self, dest_dir: &Path) -> Result<PathBuf> {
        if dest_dir.exists() {
            std::fs::remove_dir_all(dest_dir)?;
        }
        if let Some(parent) = dest_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::rename(self.archive.contents_dir(), dest_dir)?;
        Ok(dest_dir.join(ITEM_PACKAGE_FILE_NAME))
    }
}

/// Check that the catalog at `path` opens and carries `version`.
fn verify_catalog(path: &Path, version: i64) -> Result<()> {
    let catalog = Catalog::open(path)?;
    match catalog.catalog_version()? {
        Some(actual) if actual == version => Ok(()),
        Some(actual) => Err(ContentError::VersionMismatch {
            expected: version,
            actual,
        }),
        None => Err(ContentError::decode(format!(
            "Catalog {:?} has no catalog version",
            path
        ))),
    }
}

fn verify_item_package(path: &Path, version: i64) -> Result<()> {
    let package = ItemPackage::open(path)?;

    let schema = package.schema_version()?;
    if schema != CATALOG_SCHEMA_VERSION {
        return Err(ContentError::VersionMismatch {
            expected: CATALOG_SCHEMA_VERSION,
            actual: schema,
        });
    }

    let actual = package.item_package_version()?;
    if actual != version {
        return Err(ContentError::VersionMismatch {
            expected: version,
            actual,
        });
    }

    Ok(())
}

fn move_into_place(file: &Path, destination: &Path) -> Result<()> {
    let parent = destination
        .parent()
        .ok_or_else(|| ContentError::internal(format!("No parent for {:?}", destination)))?;
    std::fs::create_dir_all(parent)?;
    std::fs::rename(file, destination)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::archive_file;
    use crate::transport::MemoryTransport;
    use content_core::ContentConfig;
    use content_store::{ContentLayout, MutableCatalog, MutableItemPackage};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        transport: Arc<MemoryTransport>,
        session: Arc<Session>,
        layout: Arc<ContentLayout>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(ContentLayout::new(dir.path()));
        let transport = Arc::new(MemoryTransport::new());
        let session = Arc::new(Session::new(
            transport.clone(),
            &ContentConfig::default(),
            layout.temp_dir(),
        ));
        Fixture {
            dir,
            transport,
            session,
            layout,
        }
    }

    fn catalog_file(fixture: &Fixture, catalog_version: i64) -> Vec<u8> {
        let file = fixture.dir.path().join(format!("catalog-{}.sqlite", catalog_version));
        if !file.exists() {
            MutableCatalog::create(&file, catalog_version).unwrap();
        }
        std::fs::read(&file).unwrap()
    }

    fn publish(fixture: &Fixture, source: &CatalogSource, version: i64, body: &[u8]) {
        let file = fixture.dir.path().join("fixture.bin");
        std::fs::write(&file, body).unwrap();
        fixture.transport.insert(
            source.resource_url("v3/index.json"),
            format!(r#"{{"catalogVersion": {}}}"#, version).into_bytes(),
        );
        fixture.transport.insert(
            catalog_url(source, version),
            archive_file(&file, CATALOG_FILE_NAME).unwrap(),
        );
    }

    #[test]
    fn test_urls() {
        let source = CatalogSource::default_source("https://cdn.example.com/base/");
        assert_eq!(
            catalog_url(&source, 7),
            "https://cdn.example.com/base/v3/catalogs/7.zip"
        );
        assert_eq!(
            item_package_url(&source, "abc", 2),
            "https://cdn.example.com/base/v3/item-packages/abc/2.zip"
        );
    }

    #[tokio::test]
    async fn test_download_catalog_installs_fetched_version() {
        let fixture = fixture();
        let source = CatalogSource::default_source("https://cdn.example.com");
        publish(&fixture, &source, 12, &catalog_file(&fixture, 12));

        let download = DownloadCatalog::new(source.clone())
            .run(&fixture.session, fixture.layout.as_ref())
            .await
            .unwrap();

        assert!(download.downloaded);
        assert_eq!(download.metadata, CatalogMetadata::new("default", None, 12));
        assert_eq!(download.path, fixture.layout.catalog_path("default", 12));
        let catalog = Catalog::open(&download.path).unwrap();
        assert_eq!(catalog.catalog_version().unwrap(), Some(12));
    }

    #[tokio::test]
    async fn test_download_catalog_skips_current_version() {
        let fixture = fixture();
        let source = CatalogSource::new("secure", "https://secure.example.com");
        publish(&fixture, &source, 3, &catalog_file(&fixture, 3));

        DownloadCatalog::new(source.clone())
            .pinned(3)
            .run(&fixture.session, fixture.layout.as_ref())
            .await
            .unwrap();
        let archive_url = catalog_url(&source, 3);
        assert_eq!(fixture.transport.request_count(&archive_url), 1);

        let again = DownloadCatalog::new(source.clone())
            .installed(Some(3))
            .run(&fixture.session, fixture.layout.as_ref())
            .await
            .unwrap();

        assert!(!again.downloaded);
        assert_eq!(
            again.metadata.base_url.as_deref(),
            Some("https://secure.example.com")
        );
        assert_eq!(fixture.transport.request_count(&archive_url), 1);
    }

    #[tokio::test]
    async fn test_corrupt_catalog_is_not_installed() {
        let fixture = fixture();
        let source = CatalogSource::default_source("https://cdn.example.com");
        publish(&fixture, &source, 1, b"definitely not sqlite");

        let result = DownloadCatalog::new(source.clone())
            .run(&fixture.session, fixture.layout.as_ref())
            .await;
        assert!(result.is_err());
        assert!(!fixture.layout.catalog_path("default", 1).exists());

        // A later good copy of the same version installs normally
        publish(&fixture, &source, 1, &catalog_file(&fixture, 1));
        let download = DownloadCatalog::new(source.clone())
            .run(&fixture.session, fixture.layout.as_ref())
            .await
            .unwrap();
        assert!(download.downloaded);
        assert_eq!(fixture.transport.request_count(&catalog_url(&source, 1)), 2);
    }

    #[tokio::test]
    async fn test_catalog_with_wrong_version_is_rejected() {
        let fixture = fixture();
        let source = CatalogSource::new("secure", "https://secure.example.com");
        publish(&fixture, &source, 5, &catalog_file(&fixture, 4));

        let err = DownloadCatalog::new(source)
            .run(&fixture.session, fixture.layout.as_ref())
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "VERSION_MISMATCH");
        assert!(!fixture.layout.catalog_path("secure", 5).exists());
    }

    #[tokio::test]
    async fn test_unusable_installed_catalog_is_downloaded_again() {
        let fixture = fixture();
        let source = CatalogSource::default_source("https://cdn.example.com");
        publish(&fixture, &source, 2, &catalog_file(&fixture, 2));

        let destination = fixture.layout.catalog_path("default", 2);
        std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
        std::fs::write(&destination, b"truncated").unwrap();

        let download = DownloadCatalog::new(source)
            .installed(Some(2))
            .run(&fixture.session, fixture.layout.as_ref())
            .await
            .unwrap();

        assert!(download.downloaded);
        assert!(Catalog::open(&destination).is_ok());
    }

    #[tokio::test]
    async fn test_batch_collects_every_result() {
        let fixture = fixture();
        let good = CatalogSource::new("alpha", "https://alpha.example.com");
        let bad = CatalogSource::new("beta", "https://beta.example.com");
        publish(&fixture, &good, 1, &catalog_file(&fixture, 1));

        let results = download_catalogs(
            fixture.session.clone(),
            fixture.layout.clone(),
            vec![DownloadCatalog::new(good), DownloadCatalog::new(bad)],
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "alpha");
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, "beta");
        assert!(results[1].1.is_err());
        assert_eq!(fixture.session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_item_package_install_into() {
        let fixture = fixture();
        let source = CatalogSource::default_source("https://cdn.example.com");

        let file = fixture.dir.path().join("package.sqlite");
        MutableItemPackage::create(&file, CATALOG_SCHEMA_VERSION, 6).unwrap();
        fixture.transport.insert(
            item_package_url(&source, "ext-42", 6),
            archive_file(&file, ITEM_PACKAGE_FILE_NAME).unwrap(),
        );

        let download = DownloadItemPackage::new(&source, "ext-42", 6)
            .with_priority(InstallPriority::High)
            .run(&fixture.session)
            .await
            .unwrap();

        let dest = fixture.layout.item_package_dir(42, 6);
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale"), b"old").unwrap();

        let installed = download.install_into(&dest).unwrap();
        assert_eq!(installed, fixture.layout.item_package_path(42, 6));
        let package = ItemPackage::open(&installed).unwrap();
        assert_eq!(package.item_package_version().unwrap(), 6);
        assert!(!dest.join("stale").exists());

        let scratch = std::fs::read_dir(fixture.layout.temp_dir()).unwrap().count();
        assert_eq!(scratch, 0);
    }

    #[tokio::test]
    async fn test_item_package_for_other_schema_is_rejected() {
        let fixture = fixture();
        let source = CatalogSource::default_source("https://cdn.example.com");

        let old_schema = fixture.dir.path().join("old-schema.sqlite");
        MutableItemPackage::create(&old_schema, 2, 4).unwrap();
        fixture.transport.insert(
            item_package_url(&source, "ext-77", 4),
            archive_file(&old_schema, ITEM_PACKAGE_FILE_NAME).unwrap(),
        );

        let wrong_version = fixture.dir.path().join("wrong-version.sqlite");
        MutableItemPackage::create(&wrong_version, CATALOG_SCHEMA_VERSION, 99).unwrap();
        fixture.transport.insert(
            item_package_url(&source, "ext-78", 4),
            archive_file(&wrong_version, ITEM_PACKAGE_FILE_NAME).unwrap(),
        );

        for external_id in ["ext-77", "ext-78"] {
            let err = DownloadItemPackage::new(&source, external_id, 4)
                .run(&fixture.session)
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), "VERSION_MISMATCH");
        }

        let scratch = std::fs::read_dir(fixture.layout.temp_dir()).unwrap().count();
        assert_eq!(scratch, 0);
    }

    #[tokio::test]
    async fn test_missing_item_package_fails() {
        let fixture = fixture();
        let source = CatalogSource::default_source("https://cdn.example.com");

        let result = DownloadItemPackage::new(&source, "nope", 1)
            .run(&fixture.session)
            .await;
        assert!(result.is_err());
    }
}
