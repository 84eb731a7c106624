//! Hugging Face model downloads
//!
//! Files are fetched into the hub cache (`~/.cache/huggingface/hub` by
//! default) and then copied into `models_dir/<model_name>/` so that
//! [`effusive_common::models::find_models`] picks them up as a folder model.

use effusive_common::api::FolderModel;
use effusive_common::filename::sanitize_filename;
use effusive_common::models::find_models_in_listing;
use effusive_common::{Error, Result};
use hf_hub::api::sync::Api;
use std::path::{Path, PathBuf};
use tracing::info;

/// Remote model repository
pub trait ModelHub: Send + Sync {
    /// Every file path in `repo`
    fn list_files(&self, repo: &str) -> Result<Vec<String>>;

    /// Download one file, returning its local path
    fn fetch(&self, repo: &str, file: &str) -> Result<PathBuf>;
}

/// The public Hugging Face Hub
pub struct HfHub;

impl HfHub {
    fn api() -> Result<Api> {
        Api::new().map_err(|e| Error::Network(format!("Failed to initialise Hugging Face client: {}", e)))
    }
}

impl ModelHub for HfHub {
    fn list_files(&self, repo: &str) -> Result<Vec<String>> {
        let info = Self::api()?
            .model(repo.to_string())
            .info()
            .map_err(|e| Error::Network(format!("Failed to list '{}': {}", repo, e)))?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    fn fetch(&self, repo: &str, file: &str) -> Result<PathBuf> {
        Self::api()?
            .model(repo.to_string())
            .get(file)
            .map_err(|e| Error::Network(format!("Failed to download '{}' from '{}': {}", file, repo, e)))
    }
}

fn copy_into(source: &Path, target_dir: &Path, remote_name: &str) -> Result<String> {
    let file_name = Path::new(remote_name)
        .file_name()
        .ok_or_else(|| Error::MalformedData(format!("bad repository path '{}'", remote_name)))?;
    let target = target_dir.join(file_name);
    std::fs::copy(source, &target)?;
    Ok(target.to_string_lossy().into_owned())
}

/// Download `model_name` (or every complete model) from `repo` into `models_dir`
///
/// Blocking; call from `spawn_blocking`.
pub fn download_models(
    hub: &dyn ModelHub,
    repo: &str,
    model_name: Option<&str>,
    models_dir: &Path,
) -> Result<Vec<FolderModel>> {
    let files = hub.list_files(repo)?;
    let mut models = find_models_in_listing(repo, &files);

    let selected: Vec<_> = match model_name {
        Some(name) => {
            let pair = models
                .remove(name)
                .ok_or_else(|| Error::NotFound(format!("no model '{}' in {}", name, repo)))?;
            vec![(name.to_string(), pair)]
        }
        None => models.into_iter().collect(),
    };
    if selected.is_empty() {
        return Err(Error::NotFound(format!("no complete models in {}", repo)));
    }

    let mut downloaded = Vec::with_capacity(selected.len());
    for (name, pair) in selected {
        let folder = sanitize_filename(&name, 200);
        let target_dir = models_dir.join(&folder);
        std::fs::create_dir_all(&target_dir)?;

        info!(repo, model = %name, "Downloading model");
        let gpt = hub.fetch(repo, &pair.gpt_weight)?;
        let sovits = hub.fetch(repo, &pair.sovits_weight)?;

        downloaded.push(FolderModel {
            model_name: folder,
            gpt_weight: copy_into(&gpt, &target_dir, &pair.gpt_weight)?,
            sovits_weight: copy_into(&sovits, &target_dir, &pair.sovits_weight)?,
        });
    }
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Hub backed by a local directory
    struct DirHub {
        root: PathBuf,
    }

    impl ModelHub for DirHub {
        fn list_files(&self, _repo: &str) -> Result<Vec<String>> {
            let mut files = Vec::new();
            for entry in walk(&self.root) {
                let rel = entry.strip_prefix(&self.root).unwrap();
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
            Ok(files)
        }

        fn fetch(&self, _repo: &str, file: &str) -> Result<PathBuf> {
            Ok(self.root.join(file))
        }
    }

    fn walk(dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                out.extend(walk(&path));
            } else {
                out.push(path);
            }
        }
        out
    }

    fn remote_repo() -> TempDir {
        let remote = TempDir::new().unwrap();
        for file in [
            "Twilight/GPT_weights_v2/twi-e8.ckpt",
            "Twilight/SoVITS_weights_v2/twi_e12.pth",
            "Rarity/GPT_weights_v2/rar.ckpt",
            "Rarity/SoVITS_weights_v2/rar.pth",
            "README.md",
        ] {
            let path = remote.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, file.as_bytes()).unwrap();
        }
        remote
    }

    #[test]
    fn test_download_named_model() {
        let remote = remote_repo();
        let models_dir = TempDir::new().unwrap();
        let hub = DirHub {
            root: remote.path().to_path_buf(),
        };

        let models = download_models(&hub, "owner/ponies", Some("Twilight"), models_dir.path()).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_name, "Twilight");
        assert!(models_dir.path().join("Twilight/twi-e8.ckpt").exists());
        assert!(models_dir.path().join("Twilight/twi_e12.pth").exists());
        assert!(!models_dir.path().join("Rarity").exists());
    }

    #[test]
    fn test_download_all_models() {
        let remote = remote_repo();
        let models_dir = TempDir::new().unwrap();
        let hub = DirHub {
            root: remote.path().to_path_buf(),
        };

        let models = download_models(&hub, "owner/ponies", None, models_dir.path()).unwrap();
        let names: Vec<_> = models.iter().map(|m| m.model_name.as_str()).collect();
        assert_eq!(names, vec!["Rarity", "Twilight"]);
    }

    #[test]
    fn test_unknown_model_is_not_found() {
        let remote = remote_repo();
        let models_dir = TempDir::new().unwrap();
        let hub = DirHub {
            root: remote.path().to_path_buf(),
        };
        assert!(matches!(
            download_models(&hub, "owner/ponies", Some("Pinkie"), models_dir.path()),
            Err(Error::NotFound(_))
        ));
    }
}
