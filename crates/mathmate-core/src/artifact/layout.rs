use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{MathmateError, Result};

/// Directory layout for one session's byproducts.
///
/// Structure:
/// ```text
/// <cache_root>/
///   layout.html            shared page template
///   <session_id>/
///     <uuid>.gif           captured images
///     <uuid>.html          current transcript
/// ```
#[derive(Debug, Clone)]
pub struct SessionLayout {
    session_id: String,
    cache_root: PathBuf,
    folder: PathBuf,
    layout_file: String,
    yield_token: String,
}

impl SessionLayout {
    pub fn new(cache: &CacheConfig, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            cache_root: cache.root.clone(),
            folder: cache.root.join(session_id),
            layout_file: cache.layout_file.clone(),
            yield_token: cache.yield_token.clone(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn template_path(&self) -> PathBuf {
        self.cache_root.join(&self.layout_file)
    }

    /// Path of a file inside the session folder.
    pub fn named_file(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    /// A fresh random file name with the given extension.
    pub fn unique_name(extension: &str) -> String {
        format!("{}.{extension}", Uuid::new_v4())
    }

    /// Create the session folder, wiping any leftover folder of the same name.
    pub fn prepare(&self) -> Result<()> {
        if self.folder.exists() {
            debug!(path = %self.folder.display(), "removing stale session folder");
            std::fs::remove_dir_all(&self.folder)
                .map_err(|e| MathmateError::fs(&self.folder, e))?;
        }
        std::fs::create_dir_all(&self.folder).map_err(|e| MathmateError::fs(&self.folder, e))
    }

    /// Remove the (empty) session folder. A folder that is already gone is fine.
    pub fn remove_folder(&self) -> Result<()> {
        match std::fs::remove_dir(&self.folder) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MathmateError::fs(&self.folder, e)),
        }
    }

    /// Read the page template and substitute its yield token with `content`.
    pub fn apply_template(&self, content: &str) -> Result<String> {
        let path = self.template_path();
        let template =
            std::fs::read_to_string(&path).map_err(|e| MathmateError::fs(&path, e))?;
        let Some(start) = template.find(&self.yield_token) else {
            return Err(MathmateError::Layout(format!(
                "template {} has no '{}' token",
                path.display(),
                self.yield_token
            )));
        };

        let mut page = String::with_capacity(template.len() + content.len());
        page.push_str(&template[..start]);
        page.push_str(content);
        page.push_str(&template[start + self.yield_token.len()..]);
        Ok(page)
    }
}

/// Delete a file, treating a missing file as success.
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MathmateError::fs(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(root: &Path) -> SessionLayout {
        let cache = CacheConfig {
            root: root.to_path_buf(),
            ..CacheConfig::default()
        };
        SessionLayout::new(&cache, "s-1")
    }

    #[test]
    fn path_structure() {
        let tmp = TempDir::new().unwrap();
        let l = layout(tmp.path());
        assert_eq!(l.folder(), tmp.path().join("s-1"));
        assert_eq!(l.template_path(), tmp.path().join("layout.html"));
        assert_eq!(l.named_file("a.gif"), tmp.path().join("s-1").join("a.gif"));
    }

    #[test]
    fn prepare_wipes_stale_folder() {
        let tmp = TempDir::new().unwrap();
        let l = layout(tmp.path());
        std::fs::create_dir_all(l.folder().join("nested")).unwrap();
        std::fs::write(l.folder().join("old.html"), "stale").unwrap();

        l.prepare().unwrap();

        assert!(l.folder().is_dir());
        assert_eq!(std::fs::read_dir(l.folder()).unwrap().count(), 0);
    }

    #[test]
    fn remove_folder_tolerates_missing() {
        let tmp = TempDir::new().unwrap();
        let l = layout(tmp.path());
        l.prepare().unwrap();
        l.remove_folder().unwrap();
        assert!(!l.folder().exists());
        l.remove_folder().unwrap();
    }

    #[test]
    fn unique_names_differ() {
        let a = SessionLayout::unique_name("gif");
        let b = SessionLayout::unique_name("gif");
        assert_ne!(a, b);
        assert!(a.ends_with(".gif"));
    }

    #[test]
    fn apply_template_replaces_token_once() {
        let tmp = TempDir::new().unwrap();
        let l = layout(tmp.path());
        std::fs::write(
            l.template_path(),
            "<html><body><%= yield %></body><!-- <%= yield %> --></html>",
        )
        .unwrap();

        let page = l.apply_template("<p>hi</p>").unwrap();
        assert_eq!(
            page,
            "<html><body><p>hi</p></body><!-- <%= yield %> --></html>"
        );
    }

    #[test]
    fn apply_template_without_token_fails() {
        let tmp = TempDir::new().unwrap();
        let l = layout(tmp.path());
        std::fs::write(l.template_path(), "<html></html>").unwrap();
        let err = l.apply_template("x").unwrap_err();
        assert!(matches!(err, MathmateError::Layout(_)));
    }

    #[test]
    fn remove_file_if_exists_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        std::fs::write(&path, "x").unwrap();
        assert!(remove_file_if_exists(&path).unwrap());
        assert!(!remove_file_if_exists(&path).unwrap());
    }
}
