//! Model weight discovery
//!
//! A usable voice model is a pair of weights: a GPT checkpoint (`.ckpt`)
//! and a SoVITS checkpoint (`.pth`). Weights are found either loose in the
//! engine's standard weight folders or grouped per model in a models folder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::api::{FolderModel, FoundModels, ModelPair};

/// Folders holding loose SoVITS weights under the engine base directory
pub const SOVITS_WEIGHT_ROOTS: &[&str] = &["SoVITS_weights_v2", "SoVITS_weights"];

/// Folders holding loose GPT weights under the engine base directory
pub const GPT_WEIGHT_ROOTS: &[&str] = &["GPT_weights_v2", "GPT_weights"];

const SOVITS_EXT: &str = "pth";
const GPT_EXT: &str = "ckpt";

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

fn absolute(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Files with `ext` directly inside `dir`, sorted
fn glob_dir(dir: &Path, ext: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, ext))
        .collect();
    found.sort();
    found.iter().map(|p| absolute(p)).collect()
}

/// First file with `ext` anywhere below `dir`, in sorted walk order
fn first_recursive(dir: &Path, ext: &str) -> Option<String> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && has_extension(e.path(), ext))
        .map(|e| absolute(e.path()))
}

/// Find weights available on this filesystem (server side)
///
/// `base_dir` is the engine install directory; `models_dir` holds one
/// sub-directory per model. Folder-model weights are also listed loose so
/// they can be mixed and matched.
pub fn find_models(base_dir: &Path, models_dir: &Path) -> FoundModels {
    let mut found = FoundModels::default();

    for root in SOVITS_WEIGHT_ROOTS {
        found
            .loose_models
            .sovits_weights
            .extend(glob_dir(&base_dir.join(root), SOVITS_EXT));
    }
    for root in GPT_WEIGHT_ROOTS {
        found
            .loose_models
            .gpt_weights
            .extend(glob_dir(&base_dir.join(root), GPT_EXT));
    }

    let Ok(entries) = std::fs::read_dir(models_dir) else {
        return found;
    };
    let mut model_dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    model_dirs.sort();

    for dir in model_dirs {
        let model_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(sovits_weight) = first_recursive(&dir, SOVITS_EXT) else {
            tracing::warn!("Could not find a SoVITS weight for model folder {}", dir.display());
            continue;
        };
        let Some(gpt_weight) = first_recursive(&dir, GPT_EXT) else {
            tracing::warn!("Could not find a GPT weight for model folder {}", dir.display());
            continue;
        };

        found.loose_models.sovits_weights.push(sovits_weight.clone());
        found.loose_models.gpt_weights.push(gpt_weight.clone());
        found.folder_models.push(FolderModel {
            model_name,
            sovits_weight,
            gpt_weight,
        });
    }

    found
}

/// Name of the model a repository file belongs to
///
/// Walks up from the file's directory past any weight-root folder names.
/// Files with no such ancestor belong to the repository itself.
fn model_name_for(file: &str, weight_roots: &[&str], repo: &str) -> String {
    let mut components: Vec<&str> = file.split('/').collect();
    components.pop();
    while let Some(last) = components.last() {
        if !weight_roots.contains(last) {
            break;
        }
        components.pop();
    }
    if components.is_empty() {
        repo.to_string()
    } else {
        components.join("/")
    }
}

/// Group a remote repository listing into complete models
///
/// Only models with both a GPT and a SoVITS weight are returned.
pub fn find_models_in_listing<S: AsRef<str>>(repo: &str, files: &[S]) -> BTreeMap<String, ModelPair> {
    let mut gpt: BTreeMap<String, String> = BTreeMap::new();
    let mut sovits: BTreeMap<String, String> = BTreeMap::new();

    for file in files {
        let file = file.as_ref();
        if file.ends_with(".pth") {
            sovits.insert(model_name_for(file, SOVITS_WEIGHT_ROOTS, repo), file.to_string());
        } else if file.ends_with(".ckpt") {
            gpt.insert(model_name_for(file, GPT_WEIGHT_ROOTS, repo), file.to_string());
        }
    }

    sovits
        .into_iter()
        .filter_map(|(name, sovits_weight)| {
            gpt.remove(&name).map(|gpt_weight| {
                (
                    name,
                    ModelPair {
                        gpt_weight,
                        sovits_weight,
                    },
                )
            })
        })
        .collect()
}
