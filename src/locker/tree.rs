use super::LockerError;
use crate::identity::FileMeta;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCKER_DIR_MODE: u32 = 0o750;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerDirs {
    pub public: PathBuf,
    pub private: PathBuf,
    pub cache: PathBuf,
    pub shared: PathBuf,
    pub global: PathBuf,
}

impl LockerDirs {
    fn for_root(file_meta: &FileMeta, root: &Path) -> Self {
        let relocated = FileMeta {
            locker_root: root.to_path_buf(),
            ..file_meta.clone()
        };
        let page = relocated.page_dir();
        Self {
            public: page.join("public"),
            private: page.join("private"),
            cache: page.join("cache"),
            shared: relocated.tenant_shared_dir(),
            global: relocated.tenant_global_dir(),
        }
    }

    pub fn all(&self) -> [&Path; 5] {
        [
            &self.public,
            &self.private,
            &self.cache,
            &self.shared,
            &self.global,
        ]
    }
}

/// The same logical cell seen from the daemon (`internal`) and from the
/// container runtime (`bind`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerTree {
    pub internal: LockerDirs,
    pub bind: LockerDirs,
}

pub fn locker_tree(file_meta: &FileMeta, host_root: Option<&Path>) -> LockerTree {
    let internal = LockerDirs::for_root(file_meta, &file_meta.locker_root);
    let bind = match host_root {
        Some(host) => LockerDirs::for_root(file_meta, host),
        None => internal.clone(),
    };
    LockerTree { internal, bind }
}

pub fn ensure_locker_tree(
    file_meta: &FileMeta,
    host_root: Option<&Path>,
) -> Result<LockerTree, LockerError> {
    let tree = locker_tree(file_meta, host_root);
    for dir in tree.internal.all() {
        create_locker_dir(dir)?;
    }
    Ok(tree)
}

fn create_locker_dir(path: &Path) -> Result<(), LockerError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(LOCKER_DIR_MODE);
    }
    builder
        .create(path)
        .map_err(|source| LockerError::CreateDir {
            path: path.display().to_string(),
            source,
        })
}
