//! Scoped working directory of one run
//!
//! Layout under `{root}/{run_id}/`:
//!
//! ```text
//! grid/{stage}.labels        grid/{stage}.json
//! tiles/{stage}/{id}.img     tiles/{stage}/{id}.mask
//! clumps/{stage}/{id}.clumps borders/{stage}/{id}.border
//! stats/{id}.centres         stats/{id}.stretch   stats/index.json
//! composite/C{n}.clumps      composite/B{n}.border
//! ```
//!
//! Dropping the value removes the run directory. When the root was
//! created here it is removed too; a caller-supplied root is left in place.

use crate::error::Stage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct WorkingDirectory {
    run_id: String,
    run_dir: PathBuf,
    owned_root: Option<TempDir>,
}

impl WorkingDirectory {
    /// Allocate a fresh run directory under `root`, or under a private
    /// temporary directory when `root` is `None`.
    pub fn acquire(root: Option<&Path>) -> io::Result<Self> {
        let run_id = Uuid::new_v4().simple().to_string();
        let (base, owned_root) = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                (root.to_path_buf(), None)
            }
            None => {
                let tmp = tempfile::Builder::new().prefix("tiledseg-").tempdir()?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        let run_dir = base.join(&run_id);
        fs::create_dir(&run_dir)?;
        for sub in ["grid", "stats", "composite"] {
            fs::create_dir(run_dir.join(sub))?;
        }
        debug!("working directory {}", run_dir.display());
        Ok(Self {
            run_id,
            run_dir,
            owned_root,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.run_dir
    }

    /// Whether the root directory belongs to the caller
    pub fn caller_owned(&self) -> bool {
        self.owned_root.is_none()
    }

    /// Create the per-stage tile, clump and border directories
    pub fn prepare_stage(&self, stage: Stage) -> io::Result<()> {
        for sub in ["tiles", "clumps", "borders"] {
            fs::create_dir_all(self.run_dir.join(sub).join(stage.to_string()))?;
        }
        Ok(())
    }

    pub fn grid_labels(&self, stage: Stage) -> PathBuf {
        self.run_dir.join("grid").join(format!("{}.labels", stage))
    }

    pub fn grid_layout(&self, stage: Stage) -> PathBuf {
        self.run_dir.join("grid").join(format!("{}.json", stage))
    }

    pub fn tile_image(&self, stage: Stage, id: u32) -> PathBuf {
        self.staged("tiles", stage, id, "img")
    }

    pub fn tile_mask(&self, stage: Stage, id: u32) -> PathBuf {
        self.staged("tiles", stage, id, "mask")
    }

    pub fn clumps(&self, stage: Stage, id: u32) -> PathBuf {
        self.staged("clumps", stage, id, "clumps")
    }

    pub fn border(&self, stage: Stage, id: u32) -> PathBuf {
        self.staged("borders", stage, id, "border")
    }

    pub fn stats_centres(&self, id: u32) -> PathBuf {
        self.run_dir.join("stats").join(format!("{}.centres", id))
    }

    pub fn stats_stretch(&self, id: u32) -> PathBuf {
        self.run_dir.join("stats").join(format!("{}.stretch", id))
    }

    pub fn stats_index(&self) -> PathBuf {
        self.run_dir.join("stats").join("index.json")
    }

    /// Running clump raster after a stage (`C1`, `C2`)
    pub fn composite_clumps(&self, stage: Stage) -> PathBuf {
        self.run_dir
            .join("composite")
            .join(format!("C{}.clumps", stage))
    }

    /// Composite border mask after a stage (`B1`, `B2`)
    pub fn composite_border(&self, stage: Stage) -> PathBuf {
        self.run_dir
            .join("composite")
            .join(format!("B{}.border", stage))
    }

    fn staged(&self, kind: &str, stage: Stage, id: u32, ext: &str) -> PathBuf {
        self.run_dir
            .join(kind)
            .join(stage.to_string())
            .join(format!("{}.{}", id, ext))
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.run_dir) {
            Ok(()) => debug!("removed {}", self.run_dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove {}: {}", self.run_dir.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_keyed_by_stage_and_id() {
        let root = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::acquire(Some(root.path())).unwrap();
        let run = root.path().join(wd.run_id());

        assert_eq!(wd.path(), run);
        assert_eq!(wd.tile_image(Stage::Two, 5), run.join("tiles/2/5.img"));
        assert_eq!(wd.clumps(Stage::One, 12), run.join("clumps/1/12.clumps"));
        assert_eq!(wd.border(Stage::Three, 1), run.join("borders/3/1.border"));
        assert_eq!(wd.stats_centres(3), run.join("stats/3.centres"));
        assert_eq!(wd.grid_labels(Stage::One), run.join("grid/1.labels"));
        assert_eq!(wd.composite_clumps(Stage::Two), run.join("composite/C2.clumps"));
        assert_eq!(wd.composite_border(Stage::One), run.join("composite/B1.border"));
    }

    #[test]
    fn test_caller_root_survives_drop() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("keep.txt"), "mine").unwrap();

        let run_dir = {
            let wd = WorkingDirectory::acquire(Some(root.path())).unwrap();
            assert!(wd.caller_owned());
            wd.prepare_stage(Stage::One).unwrap();
            fs::write(wd.tile_image(Stage::One, 1), b"x").unwrap();
            wd.path().to_path_buf()
        };

        assert!(!run_dir.exists());
        let left: Vec<_> = fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(left.len(), 1);
        assert!(root.path().join("keep.txt").exists());
    }

    #[test]
    fn test_private_root_is_removed() {
        let wd = WorkingDirectory::acquire(None).unwrap();
        assert!(!wd.caller_owned());
        let root = wd.path().parent().unwrap().to_path_buf();
        assert!(root.exists());
        drop(wd);
        assert!(!root.exists());
    }

    #[test]
    fn test_run_ids_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = WorkingDirectory::acquire(Some(root.path())).unwrap();
        let b = WorkingDirectory::acquire(Some(root.path())).unwrap();
        assert_ne!(a.run_id(), b.run_id());
    }
}
