use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use opencv::core::{FileNodeTraitConst, FileStorage, FileStorageTrait, FileStorageTraitConst};
use opencv::core::{FileStorage_Mode, Mat};
use opencv::prelude::*;

/// Structured parameter file access. One YAML file per calibration artifact,
/// holding named matrices; every save fully overwrites the target file.
#[derive(Debug, Clone)]
pub struct ParamStore {
    dir: PathBuf,
}

impl ParamStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    pub fn save(&self, file_name: &str, entries: &[(&str, &Mat)]) -> Result<()> {
        let path = self.path(file_name);
        let mut fs = FileStorage::new(&Self::path_str(&path), FileStorage_Mode::WRITE as i32, "utf-8")
            .with_context(|| format!("cannot open {} for writing", path.display()))?;
        if !fs.is_opened()? {
            bail!("cannot open {} for writing", path.display());
        }
        for &(key, mat) in entries {
            fs.write_mat(key, mat)?;
        }
        fs.release()?;
        log::info!("saved {} keys to {}", entries.len(), path.display());
        Ok(())
    }

    pub fn load(&self, file_name: &str, keys: &[&str]) -> Result<Vec<Mat>> {
        let path = self.path(file_name);
        let fs = FileStorage::new(&Self::path_str(&path), FileStorage_Mode::READ as i32, "utf-8")
            .with_context(|| format!("cannot read {}", path.display()))?;
        if !fs.is_opened()? {
            bail!("cannot read {}", path.display());
        }
        let mut mats = Vec::with_capacity(keys.len());
        for key in keys {
            let mat = fs
                .get(key)
                .and_then(|node| node.mat())
                .with_context(|| format!("{} has no readable key {:?}", path.display(), key))?;
            if mat.empty() {
                bail!("{} is missing key {:?}", path.display(), key);
            }
            mats.push(mat);
        }
        Ok(mats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_64F;
    use opencv::prelude::*;

    fn temp_store(tag: &str) -> ParamStore {
        let dir = std::env::temp_dir().join(format!("stereo-calibrator-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        ParamStore::new(dir)
    }

    #[test]
    fn save_then_load_round_trip() {
        let store = temp_store("roundtrip");
        let k = Mat::eye(3, 3, CV_64F).unwrap().to_mat().unwrap();
        let d = Mat::zeros(5, 1, CV_64F).unwrap().to_mat().unwrap();
        store.save("mono.yaml", &[("K", &k), ("D", &d)]).unwrap();

        let mats = store.load("mono.yaml", &["K", "D"]).unwrap();
        assert_eq!(mats[0].rows(), 3);
        assert_eq!(mats[0].cols(), 3);
        assert_eq!(*mats[0].at_2d::<f64>(1, 1).unwrap(), 1.0);
        assert_eq!(mats[1].rows(), 5);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let store = temp_store("missing");
        assert!(store.load("does_not_exist.yaml", &["K"]).is_err());
    }

    #[test]
    fn load_missing_key_is_an_error() {
        let store = temp_store("missing-key");
        let k = Mat::eye(3, 3, CV_64F).unwrap().to_mat().unwrap();
        store.save("partial.yaml", &[("K", &k)]).unwrap();
        assert!(store.load("partial.yaml", &["K", "D"]).is_err());
    }

    #[test]
    fn save_overwrites_wholesale() {
        let store = temp_store("overwrite");
        let k = Mat::eye(3, 3, CV_64F).unwrap().to_mat().unwrap();
        store.save("mono.yaml", &[("K", &k), ("D", &k)]).unwrap();
        store.save("mono.yaml", &[("K", &k)]).unwrap();
        // The old D key must be gone after the second write.
        assert!(store.load("mono.yaml", &["D"]).is_err());
        assert!(store.load("mono.yaml", &["K"]).is_ok());
    }
}
