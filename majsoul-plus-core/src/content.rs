use std::{
    collections::BTreeSet,
    fmt, fs, io,
    path::PathBuf,
};

use axum::Router;
use tower_http::services::ServeDir;

use crate::paths::{AppPaths, ACTIVE_ENTRIES_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContentCategory {
    ResourcePack,
    Extension,
    Tool,
}

impl ContentCategory {
    pub fn route_prefix(self) -> &'static str {
        match self {
            Self::ResourcePack => "resourcepack",
            Self::Extension => "extension",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route_prefix())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Produces the routes for one content category.
pub trait ContentLoader: Send + Sync {
    fn category(&self) -> ContentCategory;
    fn load(&self) -> Result<Router, LoaderError>;
}

/// Route table handed verbatim to the asset server.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    router: Router,
    unavailable: Vec<ContentCategory>,
}

impl RouteTable {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            unavailable: Vec::new(),
        }
    }

    pub fn unavailable(&self) -> &[ContentCategory] {
        &self.unavailable
    }

    pub fn is_available(&self, category: ContentCategory) -> bool {
        !self.unavailable.contains(&category)
    }

    pub fn map_router<F>(self, map: F) -> Self
    where
        F: FnOnce(Router) -> Router,
    {
        Self {
            router: map(self.router),
            unavailable: self.unavailable,
        }
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// A failing loader only disables its own category.
pub fn assemble_routes(loaders: &[Box<dyn ContentLoader>]) -> RouteTable {
    let mut table = RouteTable::default();
    for loader in loaders {
        let category = loader.category();
        match loader.load() {
            Ok(router) => {
                table.router = table.router.merge(router);
                log::info!("[content] loaded {category} routes");
            }
            Err(error) => {
                log::error!("[content] {category} unavailable: {error}");
                table.unavailable.push(category);
            }
        }
    }
    table
}

/// Serves `<folder>/<id>/assets` under `/<category>/<id>` for every id listed in
/// `<folder>/active.json`.
#[derive(Debug, Clone)]
pub struct DirectoryContentLoader {
    category: ContentCategory,
    folder: PathBuf,
}

impl DirectoryContentLoader {
    pub fn new(category: ContentCategory, folder: impl Into<PathBuf>) -> Self {
        Self {
            category,
            folder: folder.into(),
        }
    }

    pub fn defaults(paths: &AppPaths) -> Vec<Box<dyn ContentLoader>> {
        vec![
            Box::new(Self::new(
                ContentCategory::ResourcePack,
                paths.resource_pack_dir(),
            )),
            Box::new(Self::new(ContentCategory::Extension, paths.extension_dir())),
            Box::new(Self::new(ContentCategory::Tool, paths.tool_dir())),
        ]
    }

    pub fn active_entries(&self) -> Result<Vec<String>, LoaderError> {
        let path = self.folder.join(ACTIVE_ENTRIES_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LoaderError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let ids: Vec<String> = serde_json::from_str(&raw).map_err(|source| LoaderError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let mut seen = BTreeSet::new();
        Ok(ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| {
                if !is_route_safe_id(id) {
                    log::warn!(
                        "[content] skipping {} entry with unusable id {id:?}",
                        self.category
                    );
                    return false;
                }
                seen.insert(id.clone())
            })
            .collect())
    }

    fn entry_assets_dir(&self, id: &str) -> PathBuf {
        self.folder.join(id).join("assets")
    }
}

impl ContentLoader for DirectoryContentLoader {
    fn category(&self) -> ContentCategory {
        self.category
    }

    fn load(&self) -> Result<Router, LoaderError> {
        let mut router = Router::new();
        for id in self.active_entries()? {
            let assets_dir = self.entry_assets_dir(&id);
            if !assets_dir.is_dir() {
                log::warn!(
                    "[content] {} entry {id} has no assets directory at {}",
                    self.category,
                    assets_dir.display()
                );
                continue;
            }
            let mount = format!("/{}/{}", self.category.route_prefix(), id);
            router = router.nest_service(&mount, ServeDir::new(assets_dir));
        }
        Ok(router)
    }
}

fn is_route_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}
